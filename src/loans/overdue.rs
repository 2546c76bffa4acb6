use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::Event;
use crate::state::Loan;
use crate::types::{BranchId, LoanId, LoanStatus};

use super::LoanManager;

/// outcome of one overdue sweep over a branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverdueSweepReport {
    pub branch_id: BranchId,
    pub as_of: DateTime<Utc>,
    pub examined: u32,
    pub marked_overdue: u32,
    pub marked_defaulted: u32,
    pub unchanged: u32,
    pub late_fees_assessed: Money,
    /// loans another writer touched first; the next sweep picks them up
    pub conflicts: Vec<LoanId>,
}

impl OverdueSweepReport {
    fn new(branch_id: BranchId, as_of: DateTime<Utc>) -> Self {
        Self {
            branch_id,
            as_of,
            examined: 0,
            marked_overdue: 0,
            marked_defaulted: 0,
            unchanged: 0,
            late_fees_assessed: Money::ZERO,
            conflicts: Vec::new(),
        }
    }

    pub fn changed(&self) -> u32 {
        self.marked_overdue + self.marked_defaulted
    }
}

/// status a past-due loan should have at `now`
///
/// Overdue up to and including the last day of grace, defaulted after.
pub fn overdue_status(loan: &Loan, now: DateTime<Utc>) -> LoanStatus {
    if now <= loan.grace_deadline() {
        LoanStatus::Overdue
    } else {
        LoanStatus::Defaulted
    }
}

impl LoanManager {
    /// re-derive overdue and defaulted status for every past-due loan of a branch
    #[instrument(name = "ledger.sweep_overdue", skip(self, time_provider), err)]
    pub fn sweep_overdue(
        &mut self,
        branch_id: BranchId,
        time_provider: &SafeTimeProvider,
    ) -> Result<OverdueSweepReport> {
        let now = time_provider.now();
        let candidates = self
            .stores
            .loans
            .list_overdue(branch_id, now)
            .map_err(LedgerError::persistence("list overdue loans"))?;

        let mut report = OverdueSweepReport::new(branch_id, now);

        for loan in candidates {
            report.examined += 1;

            let target = overdue_status(&loan, now);
            if target == loan.status {
                report.unchanged += 1;
                continue;
            }

            let mut updated = Loan {
                status: target,
                updated_at: now,
                ..loan.clone()
            };
            // charged once per loan, even if a reversed payoff sends it back to Active
            let late_fee = if loan.late_fees_assessed.is_zero() {
                loan.principal_remaining.apply_rate(loan.late_fee_rate)
            } else {
                Money::ZERO
            };
            if late_fee.is_positive() {
                updated.assess_late_fee(late_fee);
            }

            match self.stores.loans.update_loan(&updated) {
                Ok(_) => {}
                Err(err) if err.is_version_conflict() => {
                    warn!(loan_id = %loan.id, "loan changed during sweep, skipping");
                    report.conflicts.push(loan.id);
                    continue;
                }
                Err(source) => {
                    return Err(LedgerError::Persistence {
                        operation: "update loan status",
                        source,
                    })
                }
            }

            match target {
                LoanStatus::Overdue => report.marked_overdue += 1,
                _ => report.marked_defaulted += 1,
            }

            if late_fee.is_positive() {
                report.late_fees_assessed += late_fee;
                self.events.emit(Event::LateFeeAssessed {
                    loan_id: loan.id,
                    fee_amount: late_fee,
                    days_overdue: loan.days_overdue(now),
                    timestamp: now,
                });
            }
            self.events.emit(Event::StatusChanged {
                loan_id: loan.id,
                old_status: loan.status,
                new_status: target,
                reason: format!("{} days past due", loan.days_overdue(now)),
                timestamp: now,
            });
            info!(
                loan_number = %loan.loan_number,
                from = %loan.status,
                to = %target,
                late_fee = %late_fee,
                "loan status updated"
            );
        }

        info!(
            %branch_id,
            examined = report.examined,
            changed = report.changed(),
            conflicts = report.conflicts.len(),
            "overdue sweep finished"
        );

        Ok(report)
    }
}
