use chrono::{DateTime, Duration, Utc};
use hourglass_rs::SafeTimeProvider;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::events::Event;
use crate::payments::add_months;
use crate::state::Loan;
use crate::store::{run_in_transaction, CommitOutcome};
use crate::types::{ActorId, LoanId, LoanStatus, PaymentPlanType};

use super::LoanManager;

/// request to roll a loan's outstanding principal into a new loan
#[derive(Debug, Clone, PartialEq)]
pub struct RenewLoanRequest {
    pub loan_id: LoanId,
    pub new_term_days: u32,
    /// `None` or zero keeps the current rate
    pub new_interest_rate: Option<Rate>,
    /// refuse while any interest is still owed
    pub require_interest_paid: bool,
    pub renewed_by: ActorId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenewalResult {
    /// the source loan, now marked Renewed
    pub source: Loan,
    pub renewed: Loan,
}

impl LoanManager {
    /// close a loan as renewed and open its successor in one unit of work
    #[instrument(
        name = "ledger.renew_loan",
        skip(self, request, time_provider),
        fields(loan_id = %request.loan_id),
        err
    )]
    pub fn renew_loan(
        &mut self,
        request: RenewLoanRequest,
        time_provider: &SafeTimeProvider,
    ) -> Result<RenewalResult> {
        if request.new_term_days == 0 || request.new_term_days > self.config.max_term_days {
            return Err(LedgerError::InvalidLoanTerms {
                message: format!(
                    "renewal term of {} days outside 1..={}",
                    request.new_term_days, self.config.max_term_days
                ),
            });
        }
        if request.new_interest_rate.map_or(false, |rate| rate.is_negative()) {
            return Err(LedgerError::InvalidLoanTerms {
                message: "negative interest rate".to_string(),
            });
        }

        let mut loan_number: Option<String> = None;

        for attempt in 1..=self.config.max_update_attempts {
            let source = self.load_loan(request.loan_id)?;
            check_renewable(&source, request.require_interest_paid)?;

            let number = match &loan_number {
                Some(number) => number.clone(),
                None => {
                    let number = self.next_loan_number(source.branch_id)?;
                    loan_number = Some(number.clone());
                    number
                }
            };

            let now = time_provider.now();
            let renewed = successor(&source, &request, number, now)?;
            let closed = Loan {
                status: LoanStatus::Renewed,
                updated_at: now,
                ..source.clone()
            };

            let outcome = run_in_transaction(self.stores.loans.as_ref(), |tx| {
                tx.update_loan(&closed)
                    .map_err(LedgerError::persistence("update renewed loan"))?;
                tx.create_loan(&renewed)
                    .map_err(LedgerError::persistence("create renewal loan"))
            })?;

            if outcome == CommitOutcome::Conflict {
                debug!(attempt, loan_id = %source.id, "loan changed during renewal, retrying");
                continue;
            }

            self.events.emit(Event::StatusChanged {
                loan_id: source.id,
                old_status: source.status,
                new_status: LoanStatus::Renewed,
                reason: format!("renewed into {}", renewed.loan_number),
                timestamp: now,
            });
            self.events.emit(Event::LoanRenewed {
                source_loan_id: source.id,
                new_loan_id: renewed.id,
                new_loan_number: renewed.loan_number.clone(),
                principal_carried: renewed.loan_amount,
                renewal_count: renewed.renewal_count,
                timestamp: now,
            });
            info!(
                from = %source.loan_number,
                to = %renewed.loan_number,
                principal = %renewed.loan_amount,
                rate = %renewed.interest_rate,
                "loan renewed"
            );

            return Ok(RenewalResult {
                source: Loan {
                    version: source.version + 1,
                    ..closed
                },
                renewed,
            });
        }

        Err(LedgerError::ConcurrentModification {
            loan_id: request.loan_id,
            attempts: self.config.max_update_attempts,
        })
    }
}

fn check_renewable(loan: &Loan, require_interest_paid: bool) -> Result<()> {
    if !matches!(loan.status, LoanStatus::Active | LoanStatus::Overdue) {
        return Err(LedgerError::InvalidStatusForRenewal {
            loan_number: loan.loan_number.clone(),
            status: loan.status,
        });
    }
    if require_interest_paid && !loan.interest_remaining.is_zero() {
        return Err(LedgerError::InterestNotPaid {
            loan_number: loan.loan_number.clone(),
            outstanding: loan.interest_remaining,
        });
    }
    Ok(())
}

/// the new loan, carrying only the source's outstanding principal
fn successor(
    source: &Loan,
    request: &RenewLoanRequest,
    loan_number: String,
    now: DateTime<Utc>,
) -> Result<Loan> {
    let interest_rate = request
        .new_interest_rate
        .filter(|rate| !rate.is_zero())
        .unwrap_or(source.interest_rate);
    let principal = source.principal_remaining;
    let interest_amount = principal.apply_rate(interest_rate);

    // installment rows are never rewritten for a renewal
    let payment_plan = match source.payment_plan {
        PaymentPlanType::Installments => PaymentPlanType::Single,
        plan => plan,
    };
    let next_payment_due_date = match source.minimum_payment_amount {
        Some(_) => Some(add_months(now, 1)?),
        None => None,
    };

    Ok(Loan {
        id: Uuid::new_v4(),
        loan_number,
        branch_id: source.branch_id,
        customer_id: source.customer_id,
        item_id: source.item_id,
        loan_amount: principal,
        interest_rate,
        interest_amount,
        principal_remaining: principal,
        interest_remaining: interest_amount,
        late_fee_rate: source.late_fee_rate,
        late_fee_amount: Money::ZERO,
        late_fees_assessed: Money::ZERO,
        total_amount: principal + interest_amount,
        amount_paid: Money::ZERO,
        start_date: now,
        due_date: now + Duration::days(request.new_term_days as i64),
        loan_term_days: request.new_term_days,
        grace_period_days: source.grace_period_days,
        payment_plan,
        minimum_payment_amount: source.minimum_payment_amount,
        next_payment_due_date,
        status: LoanStatus::Active,
        paid_at: None,
        confiscated_at: None,
        notes: None,
        renewed_from_id: Some(source.id),
        renewal_count: source.renewal_count + 1,
        created_by: request.renewed_by,
        created_at: now,
        updated_at: now,
        version: 0,
    })
}
