use hourglass_rs::SafeTimeProvider;
use tracing::{debug, info, instrument};

use crate::collateral::{Item, ItemStateMachine};
use crate::customer::record_side_effect;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::{Event, SideEffect};
use crate::state::Loan;
use crate::store::{run_in_transaction, CommitOutcome};
use crate::types::{ActorId, ItemStatus, LoanId, LoanStatus};

use super::LoanManager;

#[derive(Debug, Clone, PartialEq)]
pub struct ConfiscationResult {
    pub loan: Loan,
    pub item: Item,
    /// principal, interest and late fee left unpaid
    pub unpaid_balance: Money,
}

impl LoanManager {
    /// take the collateral of a delinquent loan
    ///
    /// Loan and item move together; the customer's default total is updated
    /// afterwards and reported through [`Event::SideEffectFailed`] if that fails.
    #[instrument(name = "ledger.confiscate_loan", skip(self, notes, time_provider), err)]
    pub fn confiscate_loan(
        &mut self,
        loan_id: LoanId,
        actor_id: ActorId,
        notes: &str,
        time_provider: &SafeTimeProvider,
    ) -> Result<ConfiscationResult> {
        for attempt in 1..=self.config.max_update_attempts {
            let loan = self.load_loan(loan_id)?;
            if !matches!(loan.status, LoanStatus::Overdue | LoanStatus::Defaulted) {
                return Err(LedgerError::InvalidStatusForConfiscation {
                    loan_number: loan.loan_number,
                    status: loan.status,
                });
            }

            let item = self
                .stores
                .items
                .get_item(loan.item_id)
                .map_err(LedgerError::persistence("load item"))?
                .ok_or(LedgerError::ItemNotFound { id: loan.item_id })?;
            let change = ItemStateMachine::plan(
                &item,
                ItemStatus::Confiscated,
                actor_id,
                format!("confiscated for loan {}", loan.loan_number),
                time_provider,
            )?;

            let now = time_provider.now();
            let unpaid_balance = loan.payoff_amount();
            let confiscated = Loan {
                status: LoanStatus::Confiscated,
                confiscated_at: Some(now),
                notes: if notes.is_empty() {
                    loan.notes.clone()
                } else {
                    Some(notes.to_string())
                },
                updated_at: now,
                ..loan.clone()
            };

            let outcome = run_in_transaction(self.stores.loans.as_ref(), |tx| {
                tx.update_loan(&confiscated)
                    .map_err(LedgerError::persistence("update confiscated loan"))?;
                tx.change_item_status(&change)
                    .map_err(LedgerError::persistence("update item status"))
            })?;

            if outcome == CommitOutcome::Conflict {
                debug!(attempt, %loan_id, "loan or item changed during confiscation, retrying");
                continue;
            }

            self.events.emit(Event::StatusChanged {
                loan_id,
                old_status: loan.status,
                new_status: LoanStatus::Confiscated,
                reason: "collateral confiscated".to_string(),
                timestamp: now,
            });
            self.events.emit(Event::ItemStatusChanged {
                item_id: item.id,
                old_status: change.from,
                new_status: change.to,
                timestamp: now,
            });
            self.events.emit(Event::LoanConfiscated {
                loan_id,
                item_id: item.id,
                unpaid_balance,
                timestamp: now,
            });
            info!(
                loan_number = %loan.loan_number,
                unpaid = %unpaid_balance,
                "loan confiscated"
            );

            record_side_effect(
                self.stores.customers.as_ref(),
                &self.config.credit_policy,
                &mut self.events,
                loan_id,
                SideEffect::RecordDefault {
                    customer_id: loan.customer_id,
                    unpaid: unpaid_balance,
                },
                now,
            );

            return Ok(ConfiscationResult {
                loan: Loan {
                    version: loan.version + 1,
                    ..confiscated
                },
                item: Item {
                    status: change.to,
                    updated_at: now,
                    ..item
                },
                unpaid_balance,
            });
        }

        Err(LedgerError::ConcurrentModification {
            loan_id,
            attempts: self.config.max_update_attempts,
        })
    }
}
