use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::customer::record_side_effect;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::{Event, EventStore, SideEffect};
use crate::state::Loan;
use crate::store::{run_in_transaction, CommitOutcome, LedgerStores};
use crate::types::{
    ActorId, LoanId, LoanStatus, NumberKind, PaymentId, PaymentPlanType, PaymentStatus,
};

use super::waterfall::{allocate, OutstandingBalances};
use super::{ApplyPaymentRequest, Payment, PaymentResult, PaymentReversal, PaymentSummary};

/// outcome of reversing a payment
#[derive(Debug, Clone, PartialEq)]
pub struct ReversalResult {
    pub payment: Payment,
    pub loan: Loan,
}

/// applies, reverses and queries payments
pub struct PaymentLedger {
    stores: LedgerStores,
    config: LedgerConfig,
    events: EventStore,
}

impl PaymentLedger {
    pub fn new(stores: LedgerStores, config: LedgerConfig) -> Self {
        Self {
            stores,
            config,
            events: EventStore::new(),
        }
    }

    pub fn events(&self) -> &EventStore {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        self.events.take_events()
    }

    /// run a payment through the waterfall and persist it with the loan
    #[instrument(
        name = "ledger.apply_payment",
        skip(self, request, time_provider),
        fields(loan_id = %request.loan_id, amount = %request.amount),
        err
    )]
    pub fn apply_payment(
        &mut self,
        request: ApplyPaymentRequest,
        time_provider: &SafeTimeProvider,
    ) -> Result<PaymentResult> {
        if !request.amount.is_positive() {
            return Err(LedgerError::InvalidPaymentAmount { amount: request.amount });
        }

        let mut payment_number: Option<String> = None;

        for attempt in 1..=self.config.max_update_attempts {
            let loan = self.load_loan(request.loan_id)?;
            validate_payment(&loan, request.amount)?;

            let number = match &payment_number {
                Some(number) => number.clone(),
                None => {
                    let number = self
                        .stores
                        .payments
                        .generate_payment_number(request.branch_id)
                        .map_err(|source| LedgerError::NumberGeneration {
                            kind: NumberKind::Payment,
                            source,
                        })?;
                    payment_number = Some(number.clone());
                    number
                }
            };

            let now = time_provider.now();
            let breakdown = allocate(request.amount, &OutstandingBalances::of(&loan));

            let mut updated = loan.clone();
            updated.apply_payment(request.amount, &breakdown, now);

            let payment = Payment {
                id: Uuid::new_v4(),
                payment_number: number,
                loan_id: loan.id,
                branch_id: request.branch_id,
                amount: request.amount,
                breakdown,
                method: request.method,
                status: PaymentStatus::Completed,
                received_by: request.received_by,
                created_at: now,
                reversal: None,
            };

            let outcome = run_in_transaction(self.stores.loans.as_ref(), |tx| {
                tx.create_payment(&payment)
                    .map_err(LedgerError::persistence("create payment"))?;
                tx.update_loan(&updated)
                    .map_err(LedgerError::persistence("update loan"))
            })?;

            if outcome == CommitOutcome::Conflict {
                debug!(attempt, loan_id = %loan.id, "loan changed underneath payment, retrying");
                continue;
            }
            updated.version = loan.version + 1;

            return Ok(self.finish_payment(loan, updated, payment, now));
        }

        Err(LedgerError::ConcurrentModification {
            loan_id: request.loan_id,
            attempts: self.config.max_update_attempts,
        })
    }

    fn finish_payment(
        &mut self,
        before: Loan,
        loan: Loan,
        payment: Payment,
        now: DateTime<Utc>,
    ) -> PaymentResult {
        let is_paid_off = loan.status == LoanStatus::Paid;
        let remaining_balance = loan.payoff_amount();

        self.events.emit(Event::PaymentApplied {
            loan_id: loan.id,
            payment_id: payment.id,
            amount: payment.amount,
            breakdown: payment.breakdown,
            remaining_balance,
            timestamp: now,
        });

        if payment.breakdown.overpayment.is_positive() {
            info!(
                loan_id = %loan.id,
                excess = %payment.breakdown.overpayment,
                "overpayment absorbed into principal"
            );
            self.events.emit(Event::OverpaymentAbsorbed {
                loan_id: loan.id,
                payment_id: payment.id,
                excess: payment.breakdown.overpayment,
                timestamp: now,
            });
        }

        info!(
            loan_number = %loan.loan_number,
            payment_number = %payment.payment_number,
            late_fee = %payment.breakdown.late_fee_amount,
            interest = %payment.breakdown.interest_amount,
            principal = %payment.breakdown.principal_amount,
            remaining = %remaining_balance,
            "payment applied"
        );

        if is_paid_off {
            self.events.emit(Event::StatusChanged {
                loan_id: loan.id,
                old_status: before.status,
                new_status: LoanStatus::Paid,
                reason: format!("paid off by {}", payment.payment_number),
                timestamp: now,
            });
            self.events.emit(Event::LoanPaidOff {
                loan_id: loan.id,
                total_paid: loan.amount_paid,
                timestamp: now,
            });
            info!(loan_number = %loan.loan_number, "loan paid off");

            record_side_effect(
                self.stores.customers.as_ref(),
                &self.config.credit_policy,
                &mut self.events,
                loan.id,
                SideEffect::RecordPayoff {
                    customer_id: loan.customer_id,
                    amount_paid: loan.amount_paid,
                },
                now,
            );
        }

        PaymentResult {
            payment,
            loan,
            is_paid_off,
            remaining_balance,
        }
    }

    /// undo a payment by adding its recorded breakdown back onto the loan
    #[instrument(name = "ledger.reverse_payment", skip(self, reason, time_provider), err)]
    pub fn reverse_payment(
        &mut self,
        payment_id: PaymentId,
        reason: &str,
        reversed_by: ActorId,
        time_provider: &SafeTimeProvider,
    ) -> Result<ReversalResult> {
        let mut loan_id = None;

        for attempt in 1..=self.config.max_update_attempts {
            let payment = self.get_payment(payment_id)?;
            if payment.is_reversed() {
                return Err(LedgerError::PaymentNotReversible {
                    payment_number: payment.payment_number,
                });
            }
            let loan = self.load_loan(payment.loan_id)?;
            loan_id = Some(loan.id);

            let now = time_provider.now();
            let mut updated = loan.clone();
            updated.restore_payment(payment.amount, &payment.breakdown, now);

            let reversed = Payment {
                status: PaymentStatus::Reversed,
                reversal: Some(PaymentReversal {
                    reason: reason.to_string(),
                    reversed_by,
                    reversed_at: now,
                }),
                ..payment
            };

            let outcome = run_in_transaction(self.stores.loans.as_ref(), |tx| {
                tx.update_payment(&reversed)
                    .map_err(LedgerError::persistence("update payment"))?;
                tx.update_loan(&updated)
                    .map_err(LedgerError::persistence("update loan"))
            })?;

            if outcome == CommitOutcome::Conflict {
                debug!(attempt, loan_id = %loan.id, "loan changed underneath reversal, retrying");
                continue;
            }
            updated.version = loan.version + 1;

            self.events.emit(Event::PaymentReversed {
                loan_id: loan.id,
                payment_id,
                amount: reversed.amount,
                reason: reason.to_string(),
                timestamp: now,
            });
            if loan.status != updated.status {
                self.events.emit(Event::StatusChanged {
                    loan_id: loan.id,
                    old_status: loan.status,
                    new_status: updated.status,
                    reason: format!("payment {} reversed", reversed.payment_number),
                    timestamp: now,
                });
            }
            info!(
                loan_number = %updated.loan_number,
                payment_number = %reversed.payment_number,
                status = %updated.status,
                "payment reversed"
            );

            if loan.status == LoanStatus::Paid && updated.status != LoanStatus::Paid {
                record_side_effect(
                    self.stores.customers.as_ref(),
                    &self.config.credit_policy,
                    &mut self.events,
                    loan.id,
                    SideEffect::ReversePayoff {
                        customer_id: loan.customer_id,
                        amount_paid: loan.amount_paid,
                    },
                    now,
                );
            }

            return Ok(ReversalResult {
                payment: reversed,
                loan: updated,
            });
        }

        Err(LedgerError::ConcurrentModification {
            loan_id: loan_id.unwrap_or(payment_id),
            attempts: self.config.max_update_attempts,
        })
    }

    pub fn get_payment(&self, payment_id: PaymentId) -> Result<Payment> {
        self.stores
            .payments
            .get_payment(payment_id)
            .map_err(LedgerError::persistence("load payment"))?
            .ok_or(LedgerError::PaymentNotFound { id: payment_id })
    }

    /// every payment on a loan, oldest first, reversed ones included
    pub fn list_payments(&self, loan_id: LoanId) -> Result<Vec<Payment>> {
        self.stores
            .payments
            .list_by_loan(loan_id)
            .map_err(LedgerError::persistence("list payments"))
    }

    pub fn payment_summary(&self, loan_id: LoanId) -> Result<PaymentSummary> {
        self.stores
            .payments
            .summarize_by_loan(loan_id)
            .map_err(LedgerError::persistence("summarize payments"))
    }

    fn load_loan(&self, loan_id: LoanId) -> Result<Loan> {
        self.stores
            .loans
            .get_loan(loan_id)
            .map_err(LedgerError::persistence("load loan"))?
            .ok_or_else(|| LedgerError::loan_not_found(loan_id))
    }
}

/// status and minimum-payment gate for a new payment
fn validate_payment(loan: &Loan, amount: Money) -> Result<()> {
    match loan.status {
        LoanStatus::Paid => {
            return Err(LedgerError::LoanAlreadyPaid {
                loan_number: loan.loan_number.clone(),
            })
        }
        LoanStatus::Confiscated => {
            return Err(LedgerError::LoanConfiscated {
                loan_number: loan.loan_number.clone(),
            })
        }
        LoanStatus::Renewed => {
            return Err(LedgerError::LoanRenewed {
                loan_number: loan.loan_number.clone(),
            })
        }
        LoanStatus::Active | LoanStatus::Overdue | LoanStatus::Defaulted => {}
    }

    if loan.payment_plan == PaymentPlanType::MinimumPayment {
        if let Some(minimum) = loan.minimum_payment_amount {
            if amount < minimum && amount < loan.payoff_amount() {
                return Err(LedgerError::PaymentBelowMinimum {
                    minimum,
                    provided: amount,
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::fixtures::{loan_with_balances, start_date};
    use crate::store::memory::FailPoint;
    use crate::store::{CustomerStore, LoanStore, MemoryStore, PaymentStore};
    use crate::types::PaymentMethod;
    use chrono::Duration;
    use hourglass_rs::TimeSource;
    use std::sync::Arc;

    struct Harness {
        store: Arc<MemoryStore>,
        ledger: PaymentLedger,
        time: SafeTimeProvider,
        loan: Loan,
    }

    fn harness(loan: Loan) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let customer = store.seed_customer("Ana").unwrap();
        let loan = Loan {
            customer_id: customer.id,
            ..loan
        };
        store.create_loan(&loan).unwrap();

        Harness {
            ledger: PaymentLedger::new(
                LedgerStores::in_memory(store.clone()),
                LedgerConfig::standard(),
            ),
            store,
            time: SafeTimeProvider::new(TimeSource::Test(start_date() + Duration::days(5))),
            loan,
        }
    }

    fn request(loan: &Loan, amount: Money) -> ApplyPaymentRequest {
        ApplyPaymentRequest {
            loan_id: loan.id,
            amount,
            method: PaymentMethod::Cash,
            received_by: Uuid::new_v4(),
            branch_id: loan.branch_id,
        }
    }

    #[test]
    fn test_partial_payment_covers_late_fee_first() {
        let mut h = harness(loan_with_balances(500, 100, 20));

        let result = h
            .ledger
            .apply_payment(request(&h.loan, Money::from_major(50)), &h.time)
            .unwrap();

        let b = result.payment.breakdown;
        assert_eq!(b.late_fee_amount, Money::from_major(20));
        assert_eq!(b.interest_amount, Money::from_major(30));
        assert_eq!(b.principal_amount, Money::ZERO);
        assert!(!result.is_paid_off);
        assert_eq!(result.loan.interest_remaining, Money::from_major(70));
        assert_eq!(result.loan.amount_paid, Money::from_major(50));
        assert_eq!(result.remaining_balance, Money::from_major(570));
        assert!(result.payment.payment_number.starts_with("PY-"));
    }

    #[test]
    fn test_payment_reaching_principal_leaves_loan_open() {
        let mut h = harness(loan_with_balances(500, 100, 50));

        let result = h
            .ledger
            .apply_payment(request(&h.loan, Money::from_major(200)), &h.time)
            .unwrap();

        assert_eq!(result.payment.breakdown.principal_amount, Money::from_major(50));
        assert_eq!(result.loan.principal_remaining, Money::from_major(450));
        assert_eq!(result.loan.status, LoanStatus::Active);

        let stored = h.store.get_loan(h.loan.id).unwrap().unwrap();
        assert_eq!(stored, result.loan);
    }

    #[test]
    fn test_exact_payoff_then_reversal_restores_loan() {
        let mut h = harness(loan_with_balances(800, 80, 0));
        let before = h.loan.clone();

        let paid = h
            .ledger
            .apply_payment(request(&h.loan, Money::from_major(880)), &h.time)
            .unwrap();
        assert!(paid.is_paid_off);
        assert_eq!(paid.loan.status, LoanStatus::Paid);
        assert!(paid.loan.paid_at.is_some());
        assert!(paid.loan.principal_remaining.is_zero());
        assert!(paid.loan.interest_remaining.is_zero());

        let customer = h.store.get_customer(h.loan.customer_id).unwrap().unwrap();
        assert_eq!(customer.total_paid, Money::from_major(880));

        let reversed = h
            .ledger
            .reverse_payment(paid.payment.id, "bounced", Uuid::new_v4(), &h.time)
            .unwrap();

        assert_eq!(reversed.loan.status, LoanStatus::Active);
        assert_eq!(reversed.loan.paid_at, None);
        assert_eq!(reversed.loan.principal_remaining, before.principal_remaining);
        assert_eq!(reversed.loan.interest_remaining, before.interest_remaining);
        assert_eq!(reversed.loan.late_fee_amount, before.late_fee_amount);
        assert_eq!(reversed.loan.amount_paid, Money::ZERO);
        assert_eq!(reversed.payment.status, PaymentStatus::Reversed);
        assert_eq!(reversed.payment.reversal.as_ref().unwrap().reason, "bounced");

        let customer = h.store.get_customer(h.loan.customer_id).unwrap().unwrap();
        assert_eq!(customer.total_paid, Money::ZERO);
        assert_eq!(customer.credit_score, 500);

        // paying off again counts once
        h.ledger
            .apply_payment(request(&h.loan, Money::from_major(880)), &h.time)
            .unwrap();
        let customer = h.store.get_customer(h.loan.customer_id).unwrap().unwrap();
        assert_eq!(customer.total_paid, Money::from_major(880));
        let bonus = LedgerConfig::standard().credit_policy.payoff_bonus;
        assert_eq!(customer.credit_score, 500 + bonus);
    }

    #[test]
    fn test_overpayment_reverses_exactly() {
        let mut h = harness(loan_with_balances(800, 80, 0));

        let paid = h
            .ledger
            .apply_payment(request(&h.loan, Money::from_major(900)), &h.time)
            .unwrap();
        assert_eq!(paid.payment.breakdown.overpayment, Money::from_major(20));
        assert_eq!(paid.payment.breakdown.total(), Money::from_major(900));
        assert!(h.ledger.events().events().iter().any(|e| matches!(
            e,
            Event::OverpaymentAbsorbed { excess, .. } if *excess == Money::from_major(20)
        )));

        let reversed = h
            .ledger
            .reverse_payment(paid.payment.id, "duplicate", Uuid::new_v4(), &h.time)
            .unwrap();
        assert_eq!(reversed.loan.principal_remaining, Money::from_major(800));
    }

    #[test]
    fn test_second_reversal_rejected() {
        let mut h = harness(loan_with_balances(500, 50, 0));
        let paid = h
            .ledger
            .apply_payment(request(&h.loan, Money::from_major(100)), &h.time)
            .unwrap();
        let actor = Uuid::new_v4();

        h.ledger.reverse_payment(paid.payment.id, "error", actor, &h.time).unwrap();
        let err = h
            .ledger
            .reverse_payment(paid.payment.id, "again", actor, &h.time)
            .unwrap_err();

        assert!(matches!(err, LedgerError::PaymentNotReversible { .. }));
    }

    #[test]
    fn test_rejects_closed_loans_and_bad_amounts() {
        let mut paid = loan_with_balances(500, 50, 0);
        paid.status = LoanStatus::Paid;
        let mut h = harness(paid);
        let err = h
            .ledger
            .apply_payment(request(&h.loan, Money::from_major(10)), &h.time)
            .unwrap_err();
        assert!(matches!(err, LedgerError::LoanAlreadyPaid { .. }));

        let mut confiscated = loan_with_balances(500, 50, 0);
        confiscated.status = LoanStatus::Confiscated;
        let mut h = harness(confiscated);
        let err = h
            .ledger
            .apply_payment(request(&h.loan, Money::from_major(10)), &h.time)
            .unwrap_err();
        assert!(matches!(err, LedgerError::LoanConfiscated { .. }));

        let mut h = harness(loan_with_balances(500, 50, 0));
        let err = h.ledger.apply_payment(request(&h.loan, Money::ZERO), &h.time).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidPaymentAmount { .. }));

        let missing = ApplyPaymentRequest {
            loan_id: Uuid::new_v4(),
            ..request(&h.loan, Money::from_major(10))
        };
        let err = h.ledger.apply_payment(missing, &h.time).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::NotFound);
    }

    #[test]
    fn test_minimum_payment_enforced_unless_paying_off() {
        let mut loan = loan_with_balances(100, 10, 0);
        loan.payment_plan = PaymentPlanType::MinimumPayment;
        loan.minimum_payment_amount = Some(Money::from_major(25));
        let mut h = harness(loan);

        let err = h
            .ledger
            .apply_payment(request(&h.loan, Money::from_major(20)), &h.time)
            .unwrap_err();
        assert!(matches!(err, LedgerError::PaymentBelowMinimum { .. }));

        h.ledger
            .apply_payment(request(&h.loan, Money::from_major(100)), &h.time)
            .unwrap();
        // 10 left, below the minimum but clears the loan
        let result = h
            .ledger
            .apply_payment(request(&h.loan, Money::from_major(10)), &h.time)
            .unwrap();
        assert!(result.is_paid_off);
    }

    #[test]
    fn test_conflicting_writer_is_retried() {
        let mut h = harness(loan_with_balances(500, 50, 0));
        h.store.inject_failure(FailPoint::RacingLoanWrite);

        let result = h
            .ledger
            .apply_payment(request(&h.loan, Money::from_major(50)), &h.time)
            .unwrap();

        assert_eq!(result.loan.interest_remaining, Money::ZERO);
        assert_eq!(h.store.list_by_loan(h.loan.id).unwrap().len(), 1);
        let stored = h.store.get_loan(h.loan.id).unwrap().unwrap();
        assert_eq!(stored.version, result.loan.version);
    }

    #[test]
    fn test_gives_up_after_configured_attempts() {
        let mut h = harness(loan_with_balances(500, 50, 0));
        for _ in 0..3 {
            h.store.inject_failure(FailPoint::RacingLoanWrite);
        }

        let err = h
            .ledger
            .apply_payment(request(&h.loan, Money::from_major(50)), &h.time)
            .unwrap_err();

        assert!(matches!(err, LedgerError::ConcurrentModification { attempts: 3, .. }));
        assert!(h.store.list_by_loan(h.loan.id).unwrap().is_empty());
    }

    #[test]
    fn test_commit_failure_leaves_no_payment() {
        let mut h = harness(loan_with_balances(500, 50, 0));
        h.store.inject_failure(FailPoint::Commit);

        let err = h
            .ledger
            .apply_payment(request(&h.loan, Money::from_major(50)), &h.time)
            .unwrap_err();

        assert_eq!(err.kind(), crate::errors::ErrorKind::Transaction);
        assert!(h.store.list_by_loan(h.loan.id).unwrap().is_empty());
        assert_eq!(h.store.get_loan(h.loan.id).unwrap().unwrap(), h.loan);
    }

    #[test]
    fn test_failed_payoff_bookkeeping_is_reported() {
        let mut h = harness(loan_with_balances(100, 10, 0));
        h.store.inject_failure(FailPoint::UpdateAggregates);

        let result = h
            .ledger
            .apply_payment(request(&h.loan, Money::from_major(110)), &h.time)
            .unwrap();

        assert!(result.is_paid_off);
        let failed: Vec<_> = h.ledger.events().failed_side_effects().cloned().collect();
        assert_eq!(
            failed,
            vec![SideEffect::RecordPayoff {
                customer_id: h.loan.customer_id,
                amount_paid: Money::from_major(110),
            }]
        );
    }

    #[test]
    fn test_summary_and_listing() {
        let mut h = harness(loan_with_balances(500, 50, 10));
        let first = h
            .ledger
            .apply_payment(request(&h.loan, Money::from_major(30)), &h.time)
            .unwrap();
        h.ledger
            .apply_payment(request(&h.loan, Money::from_major(100)), &h.time)
            .unwrap();
        h.ledger
            .reverse_payment(first.payment.id, "wrong loan", Uuid::new_v4(), &h.time)
            .unwrap();

        let payments = h.ledger.list_payments(h.loan.id).unwrap();
        assert_eq!(payments.len(), 2);
        assert_eq!(payments[0].id, first.payment.id);

        let summary = h.ledger.payment_summary(h.loan.id).unwrap();
        assert_eq!(summary.completed_count, 1);
        assert_eq!(summary.reversed_count, 1);
        assert_eq!(summary.total_amount, Money::from_major(100));
    }
}
