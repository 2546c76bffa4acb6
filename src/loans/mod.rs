pub mod confiscation;
pub mod overdue;
pub mod renewal;
pub mod views;

use chrono::{DateTime, Duration, Utc};
use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::collateral::{Item, ItemStateMachine};
use crate::config::LedgerConfig;
use crate::customer::{record_side_effect, Customer};
use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::events::{Event, EventStore, SideEffect};
use crate::payments::{add_months, InstallmentSchedule};
use crate::state::{Loan, LoanInstallment};
use crate::store::{run_in_transaction, CommitOutcome, LedgerStores};
use crate::types::{
    ActorId, BranchId, CustomerId, ItemId, ItemStatus, LoanId, LoanStatus, NumberKind,
    PaymentPlanType,
};

pub use confiscation::ConfiscationResult;
pub use overdue::{overdue_status, OverdueSweepReport};
pub use renewal::{RenewLoanRequest, RenewalResult};
pub use views::LoanView;

/// request to open a loan against an item
#[derive(Debug, Clone, PartialEq)]
pub struct CreateLoanRequest {
    pub customer_id: CustomerId,
    pub item_id: ItemId,
    pub branch_id: BranchId,
    pub amount: Money,
    pub interest_rate: Rate,
    pub term_days: u32,
    pub payment_plan: PaymentPlanType,
    /// falls back to the configured default
    pub grace_period_days: Option<u32>,
    /// falls back to the configured default
    pub late_fee_rate: Option<Rate>,
    pub minimum_payment_amount: Option<Money>,
    pub installment_count: Option<u32>,
    pub notes: Option<String>,
    pub created_by: ActorId,
}

impl CreateLoanRequest {
    pub fn builder() -> CreateLoanRequestBuilder {
        CreateLoanRequestBuilder::new()
    }
}

/// builder for loan requests
#[derive(Debug, Default)]
pub struct CreateLoanRequestBuilder {
    customer_id: Option<CustomerId>,
    item_id: Option<ItemId>,
    branch_id: Option<BranchId>,
    amount: Option<Money>,
    interest_rate: Option<Rate>,
    term_days: Option<u32>,
    payment_plan: Option<PaymentPlanType>,
    grace_period_days: Option<u32>,
    late_fee_rate: Option<Rate>,
    minimum_payment_amount: Option<Money>,
    installment_count: Option<u32>,
    notes: Option<String>,
    created_by: Option<ActorId>,
}

impl CreateLoanRequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn customer(mut self, customer_id: CustomerId) -> Self {
        self.customer_id = Some(customer_id);
        self
    }

    pub fn item(mut self, item_id: ItemId) -> Self {
        self.item_id = Some(item_id);
        self
    }

    pub fn branch(mut self, branch_id: BranchId) -> Self {
        self.branch_id = Some(branch_id);
        self
    }

    pub fn amount(mut self, amount: Money) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn rate(mut self, rate: Rate) -> Self {
        self.interest_rate = Some(rate);
        self
    }

    pub fn term_days(mut self, days: u32) -> Self {
        self.term_days = Some(days);
        self
    }

    pub fn grace_period_days(mut self, days: u32) -> Self {
        self.grace_period_days = Some(days);
        self
    }

    pub fn late_fee_rate(mut self, rate: Rate) -> Self {
        self.late_fee_rate = Some(rate);
        self
    }

    /// minimum-payment plan with the given periodic minimum
    pub fn minimum_payment(mut self, amount: Money) -> Self {
        self.payment_plan = Some(PaymentPlanType::MinimumPayment);
        self.minimum_payment_amount = Some(amount);
        self
    }

    /// installments plan with `count` monthly installments
    pub fn installments(mut self, count: u32) -> Self {
        self.payment_plan = Some(PaymentPlanType::Installments);
        self.installment_count = Some(count);
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn created_by(mut self, actor_id: ActorId) -> Self {
        self.created_by = Some(actor_id);
        self
    }

    pub fn build(self) -> Result<CreateLoanRequest> {
        let missing = |field: &str| LedgerError::InvalidLoanTerms {
            message: format!("{} required", field),
        };

        Ok(CreateLoanRequest {
            customer_id: self.customer_id.ok_or_else(|| missing("customer"))?,
            item_id: self.item_id.ok_or_else(|| missing("item"))?,
            branch_id: self.branch_id.ok_or_else(|| missing("branch"))?,
            amount: self.amount.ok_or_else(|| missing("amount"))?,
            interest_rate: self.interest_rate.ok_or_else(|| missing("interest rate"))?,
            term_days: self.term_days.unwrap_or(0),
            payment_plan: self.payment_plan.unwrap_or(PaymentPlanType::Single),
            grace_period_days: self.grace_period_days,
            late_fee_rate: self.late_fee_rate,
            minimum_payment_amount: self.minimum_payment_amount,
            installment_count: self.installment_count,
            notes: self.notes,
            created_by: self.created_by.ok_or_else(|| missing("created_by"))?,
        })
    }
}

/// computed terms of a prospective loan; nothing is persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanQuote {
    pub loan_amount: Money,
    pub interest_rate: Rate,
    pub interest_amount: Money,
    pub total_amount: Money,
    pub start_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub loan_term_days: u32,
    pub grace_period_days: u32,
    pub late_fee_rate: Rate,
    pub next_payment_due_date: Option<DateTime<Utc>>,
    /// empty unless the plan is installments
    pub installments: Vec<LoanInstallment>,
    /// loan total the installments do not collect
    pub rounding_residue: Money,
}

/// a freshly created loan with what it was created against
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedLoan {
    pub loan: Loan,
    pub customer: Customer,
    pub item: Item,
    pub installments: Vec<LoanInstallment>,
}

/// reject malformed terms before anything is read
fn validate_terms(request: &CreateLoanRequest, config: &LedgerConfig) -> Result<()> {
    let invalid = |message: String| Err(LedgerError::InvalidLoanTerms { message });

    if !request.amount.is_positive() {
        return invalid(format!("loan amount must be positive, got {}", request.amount));
    }
    if request.interest_rate.is_negative() {
        return invalid(format!("negative interest rate {}", request.interest_rate));
    }
    if request.late_fee_rate.map_or(false, |rate| rate.is_negative()) {
        return invalid("negative late fee rate".to_string());
    }

    match request.payment_plan {
        PaymentPlanType::Installments => match request.installment_count {
            Some(count) if count >= 1 && count <= config.max_installments => {}
            Some(count) => {
                return invalid(format!(
                    "installment count {} outside 1..={}",
                    count, config.max_installments
                ))
            }
            None => return invalid("installments plan needs an installment count".to_string()),
        },
        PaymentPlanType::Single | PaymentPlanType::MinimumPayment => {
            if request.term_days == 0 || request.term_days > config.max_term_days {
                return invalid(format!(
                    "term of {} days outside 1..={}",
                    request.term_days, config.max_term_days
                ));
            }
        }
    }

    if request.payment_plan == PaymentPlanType::MinimumPayment
        && !request.minimum_payment_amount.map_or(false, |m| m.is_positive())
    {
        return invalid("minimum-payment plan needs a positive minimum amount".to_string());
    }

    Ok(())
}

/// compute interest, dates and installments for a request starting at `start`
fn quote(
    request: &CreateLoanRequest,
    config: &LedgerConfig,
    loan_id: LoanId,
    start: DateTime<Utc>,
) -> Result<LoanQuote> {
    validate_terms(request, config)?;

    let interest_amount = request.amount.apply_rate(request.interest_rate);
    let total_amount = request.amount + interest_amount;

    let installment_count = match request.payment_plan {
        PaymentPlanType::Installments => request.installment_count.filter(|n| *n > 0),
        _ => None,
    };

    let (due_date, installments, rounding_residue) = match installment_count {
        Some(count) => {
            let schedule =
                InstallmentSchedule::generate(
                    loan_id,
                    request.amount,
                    interest_amount,
                    start,
                    count,
                )?;
            let residue = schedule.rounding_residue();
            (add_months(start, count)?, schedule.into_installments(), residue)
        }
        None => (
            start + Duration::days(request.term_days as i64),
            Vec::new(),
            Money::ZERO,
        ),
    };

    let next_payment_due_date = match request.minimum_payment_amount {
        Some(_) => Some(add_months(start, 1)?),
        None => None,
    };

    Ok(LoanQuote {
        loan_amount: request.amount,
        interest_rate: request.interest_rate,
        interest_amount,
        total_amount,
        start_date: start,
        due_date,
        loan_term_days: (due_date - start).num_days().max(0) as u32,
        grace_period_days: request
            .grace_period_days
            .unwrap_or(config.default_grace_period_days),
        late_fee_rate: request.late_fee_rate.unwrap_or(config.default_late_fee_rate),
        next_payment_due_date,
        installments,
        rounding_residue,
    })
}

/// originates, renews, confiscates and sweeps loans
pub struct LoanManager {
    stores: LedgerStores,
    config: LedgerConfig,
    events: EventStore,
}

impl LoanManager {
    pub fn new(stores: LedgerStores, config: LedgerConfig) -> Self {
        Self {
            stores,
            config,
            events: EventStore::new(),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn events(&self) -> &EventStore {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        self.events.take_events()
    }

    /// preview a loan without touching any store
    #[instrument(name = "ledger.calculate", skip(self, request, time_provider), err)]
    pub fn calculate(
        &self,
        request: &CreateLoanRequest,
        time_provider: &SafeTimeProvider,
    ) -> Result<LoanQuote> {
        quote(request, &self.config, Uuid::nil(), time_provider.now())
    }

    /// open a loan: persist it, pledge the item and write installments in one unit
    #[instrument(
        name = "ledger.create_loan",
        skip(self, request, time_provider),
        fields(
            customer_id = %request.customer_id,
            item_id = %request.item_id,
            amount = %request.amount
        ),
        err
    )]
    pub fn create_loan(
        &mut self,
        request: CreateLoanRequest,
        time_provider: &SafeTimeProvider,
    ) -> Result<CreatedLoan> {
        validate_terms(&request, &self.config)?;

        let loan_id = Uuid::new_v4();
        let mut loan_number: Option<String> = None;

        for attempt in 1..=self.config.max_update_attempts {
            let customer = self.load_customer(request.customer_id)?;
            if let Some(reason) = customer.loan_ineligibility() {
                return Err(LedgerError::CustomerIneligible {
                    id: customer.id,
                    reason: reason.to_string(),
                });
            }

            let item = self
                .stores
                .items
                .get_item(request.item_id)
                .map_err(LedgerError::persistence("load item"))?
                .ok_or(LedgerError::ItemNotFound { id: request.item_id })?;
            if item.status != ItemStatus::Available {
                return Err(LedgerError::ItemUnavailable {
                    id: item.id,
                    status: item.status,
                });
            }
            if let Some(existing) = self
                .stores
                .loans
                .find_open_loan_by_item(item.id)
                .map_err(LedgerError::persistence("find loan by item"))?
            {
                return Err(LedgerError::ItemAlreadyPledged {
                    item_id: item.id,
                    loan_number: existing.loan_number,
                });
            }
            if request.amount > item.loan_value {
                return Err(LedgerError::AmountExceedsCollateralValue {
                    requested: request.amount,
                    loan_value: item.loan_value,
                });
            }

            let number = match &loan_number {
                Some(number) => number.clone(),
                None => {
                    let number = self.next_loan_number(request.branch_id)?;
                    loan_number = Some(number.clone());
                    number
                }
            };

            let now = time_provider.now();
            let terms = quote(&request, &self.config, loan_id, now)?;
            let loan = Loan {
                id: loan_id,
                loan_number: number,
                branch_id: request.branch_id,
                customer_id: customer.id,
                item_id: item.id,
                loan_amount: terms.loan_amount,
                interest_rate: terms.interest_rate,
                interest_amount: terms.interest_amount,
                principal_remaining: terms.loan_amount,
                interest_remaining: terms.interest_amount,
                late_fee_rate: terms.late_fee_rate,
                late_fee_amount: Money::ZERO,
                late_fees_assessed: Money::ZERO,
                total_amount: terms.total_amount,
                amount_paid: Money::ZERO,
                start_date: now,
                due_date: terms.due_date,
                loan_term_days: terms.loan_term_days,
                grace_period_days: terms.grace_period_days,
                payment_plan: request.payment_plan,
                minimum_payment_amount: request.minimum_payment_amount,
                next_payment_due_date: terms.next_payment_due_date,
                status: LoanStatus::Active,
                paid_at: None,
                confiscated_at: None,
                notes: request.notes.clone(),
                renewed_from_id: None,
                renewal_count: 0,
                created_by: request.created_by,
                created_at: now,
                updated_at: now,
                version: 0,
            };

            let change = ItemStateMachine::plan(
                &item,
                ItemStatus::Collateral,
                request.created_by,
                format!("pledged for loan {}", loan.loan_number),
                time_provider,
            )?;
            let installments = terms.installments;

            let outcome = run_in_transaction(self.stores.loans.as_ref(), |tx| {
                tx.create_loan(&loan)
                    .map_err(LedgerError::persistence("create loan"))?;
                tx.change_item_status(&change)
                    .map_err(LedgerError::persistence("update item status"))?;
                if !installments.is_empty() {
                    tx.create_installments(&installments)
                        .map_err(LedgerError::persistence("create installments"))?;
                }
                Ok(())
            })?;

            if outcome == CommitOutcome::Conflict {
                debug!(attempt, item_id = %item.id, "item changed during origination, retrying");
                continue;
            }

            self.events.emit(Event::LoanCreated {
                loan_id: loan.id,
                loan_number: loan.loan_number.clone(),
                customer_id: loan.customer_id,
                item_id: loan.item_id,
                amount: loan.loan_amount,
                interest_amount: loan.interest_amount,
                due_date: loan.due_date,
                timestamp: now,
            });
            self.events.emit(Event::ItemStatusChanged {
                item_id: item.id,
                old_status: change.from,
                new_status: change.to,
                timestamp: now,
            });
            info!(
                loan_number = %loan.loan_number,
                total = %loan.total_amount,
                due_date = %loan.due_date,
                installments = installments.len(),
                "loan created"
            );

            record_side_effect(
                self.stores.customers.as_ref(),
                &self.config.credit_policy,
                &mut self.events,
                loan.id,
                SideEffect::CountLoanOpened { customer_id: customer.id },
                now,
            );
            let customer = self
                .stores
                .customers
                .get_customer(customer.id)
                .ok()
                .flatten()
                .unwrap_or(customer);

            return Ok(CreatedLoan {
                loan,
                customer,
                item: Item {
                    status: change.to,
                    updated_at: now,
                    ..item
                },
                installments,
            });
        }

        Err(LedgerError::ConcurrentModification {
            loan_id,
            attempts: self.config.max_update_attempts,
        })
    }

    pub fn get_loan(&self, loan_id: LoanId) -> Result<Loan> {
        self.load_loan(loan_id)
    }

    pub fn get_loan_by_number(&self, loan_number: &str) -> Result<Loan> {
        self.stores
            .loans
            .get_loan_by_number(loan_number)
            .map_err(LedgerError::persistence("load loan by number"))?
            .ok_or_else(|| LedgerError::loan_not_found(loan_number))
    }

    /// installment rows in sequence order; empty for other plans
    pub fn installments(&self, loan_id: LoanId) -> Result<Vec<LoanInstallment>> {
        self.load_loan(loan_id)?;
        self.stores
            .loans
            .get_installments(loan_id)
            .map_err(LedgerError::persistence("load installments"))
    }

    /// amount that closes the loan right now
    pub fn payoff_amount(&self, loan_id: LoanId) -> Result<Money> {
        Ok(self.load_loan(loan_id)?.payoff_amount())
    }

    /// rerun a customer update reported by [`Event::SideEffectFailed`]
    #[instrument(name = "ledger.retry_side_effect", skip(self), err)]
    pub fn retry_side_effect(&mut self, loan_id: LoanId, effect: SideEffect) -> Result<()> {
        effect.apply(self.stores.customers.as_ref(), &self.config.credit_policy)?;
        info!(%loan_id, "side effect replayed");
        Ok(())
    }

    fn load_loan(&self, loan_id: LoanId) -> Result<Loan> {
        self.stores
            .loans
            .get_loan(loan_id)
            .map_err(LedgerError::persistence("load loan"))?
            .ok_or_else(|| LedgerError::loan_not_found(loan_id))
    }

    fn load_customer(&self, customer_id: CustomerId) -> Result<Customer> {
        self.stores
            .customers
            .get_customer(customer_id)
            .map_err(LedgerError::persistence("load customer"))?
            .ok_or(LedgerError::CustomerNotFound { id: customer_id })
    }

    fn next_loan_number(&self, branch_id: BranchId) -> Result<String> {
        self.stores
            .loans
            .generate_number(NumberKind::Loan, branch_id)
            .map_err(|source| LedgerError::NumberGeneration {
                kind: NumberKind::Loan,
                source,
            })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::Fixture;
    use super::*;
    use crate::errors::{ErrorKind, TransactionStage};
    use crate::state::fixtures::start_date;
    use crate::store::memory::FailPoint;
    use crate::store::{CustomerStore, ItemStore, LoanStore};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_create_single_payment_loan() {
        let mut f = Fixture::new();
        let created = f
            .manager
            .create_loan(f.request(800).build().unwrap(), &f.time)
            .unwrap();
        let loan = &created.loan;

        assert_eq!(loan.interest_amount, Money::from_major(80));
        assert_eq!(loan.total_amount, Money::from_major(880));
        assert_eq!(loan.status, LoanStatus::Active);
        assert_eq!(loan.due_date, start_date() + Duration::days(30));
        assert_eq!(loan.grace_period_days, 15);
        assert_eq!(loan.late_fee_rate, Rate::from_percentage(5));
        assert!(loan.loan_number.starts_with("LN-"));
        assert_eq!(created.item.status, ItemStatus::Collateral);
        assert_eq!(created.customer.total_loans, 1);

        let item = f.store.get_item(f.item.id).unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Collateral);
        assert_eq!(f.store.list_history(f.item.id).unwrap().len(), 1);
        assert_eq!(f.manager.get_loan_by_number(&loan.loan_number).unwrap(), *loan);
    }

    #[test]
    fn test_installment_plan_derives_due_date_from_months() {
        let mut f = Fixture::new();
        let request = f.request(900).installments(3).build().unwrap();

        let created = f.manager.create_loan(request, &f.time).unwrap();

        assert_eq!(
            created.loan.due_date,
            Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(created.loan.loan_term_days, 91);
        let stored = f.manager.installments(created.loan.id).unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[0].total_amount, Money::from_major(330));
        assert_eq!(stored[2].due_date, created.loan.due_date);
    }

    #[test]
    fn test_minimum_payment_sets_next_due_date() {
        let mut f = Fixture::new();
        let request = f.request(500).minimum_payment(Money::from_major(60)).build().unwrap();

        let loan = f.manager.create_loan(request, &f.time).unwrap().loan;

        assert_eq!(loan.payment_plan, PaymentPlanType::MinimumPayment);
        assert_eq!(
            loan.next_payment_due_date,
            Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_calculate_persists_nothing() {
        let f = Fixture::new();
        let request = f
            .request(1000)
            .rate(Rate::from_percent(dec!(7.5)))
            .installments(3)
            .build()
            .unwrap();

        let quote = f.manager.calculate(&request, &f.time).unwrap();

        assert_eq!(quote.interest_amount, Money::from_major(75));
        assert_eq!(quote.total_amount, Money::from_major(1075));
        assert_eq!(quote.installments.len(), 3);
        assert_eq!(quote.rounding_residue, Money::from_decimal(dec!(0.01)));
        assert_eq!(f.store.get_item(f.item.id).unwrap().unwrap().status, ItemStatus::Available);
    }

    #[test]
    fn test_preconditions_in_order() {
        let mut f = Fixture::new();

        let err = f
            .manager
            .create_loan(f.request(100).customer(Uuid::new_v4()).build().unwrap(), &f.time)
            .unwrap_err();
        assert!(matches!(err, LedgerError::CustomerNotFound { .. }));

        let mut blocked = f.customer.clone();
        blocked.is_blocked = true;
        f.store.put_customer(blocked).unwrap();
        let err = f
            .manager
            .create_loan(f.request(100).item(Uuid::new_v4()).build().unwrap(), &f.time)
            .unwrap_err();
        assert!(matches!(err, LedgerError::CustomerIneligible { .. }));
        f.store.put_customer(f.customer.clone()).unwrap();

        let err = f
            .manager
            .create_loan(f.request(100).item(Uuid::new_v4()).build().unwrap(), &f.time)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = f
            .manager
            .create_loan(f.request(1500).build().unwrap(), &f.time)
            .unwrap_err();
        assert!(matches!(err, LedgerError::AmountExceedsCollateralValue { .. }));

        f.open_loan(500);
        let err = f
            .manager
            .create_loan(f.request(100).build().unwrap(), &f.time)
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::ItemUnavailable { status: ItemStatus::Collateral, .. }
        ));
    }

    #[test]
    fn test_open_loan_on_available_item_is_a_conflict() {
        let mut f = Fixture::new();
        let loan = f.open_loan(500);
        // item released out of band while the loan stayed open
        f.store
            .put_item(Item {
                status: ItemStatus::Available,
                ..f.item.clone()
            })
            .unwrap();

        let err = f
            .manager
            .create_loan(f.request(100).build().unwrap(), &f.time)
            .unwrap_err();

        assert!(matches!(
            &err,
            LedgerError::ItemAlreadyPledged { loan_number, .. } if *loan_number == loan.loan_number
        ));
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_invalid_terms_rejected_before_reads() {
        let mut f = Fixture::new();
        let cases = vec![
            f.request(0).build().unwrap(),
            f.request(100).term_days(0).build().unwrap(),
            f.request(100).installments(0).build().unwrap(),
            f.request(100).installments(13).build().unwrap(),
            f.request(100).rate(Rate::from_percent(dec!(-1))).build().unwrap(),
            f.request(100).customer(Uuid::new_v4()).term_days(400).build().unwrap(),
        ];

        for request in cases {
            let err = f.manager.create_loan(request, &f.time).unwrap_err();
            assert!(matches!(err, LedgerError::InvalidLoanTerms { .. }), "{err}");
        }
        assert!(CreateLoanRequest::builder().build().is_err());
    }

    #[test]
    fn test_failed_installments_roll_back_everything() {
        let mut f = Fixture::new();
        f.store.inject_failure(FailPoint::StageInstallments);

        let err = f
            .manager
            .create_loan(f.request(900).installments(3).build().unwrap(), &f.time)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert_eq!(f.store.get_item(f.item.id).unwrap().unwrap().status, ItemStatus::Available);
        assert!(f.store.find_open_loan_by_item(f.item.id).unwrap().is_none());
        assert!(f.store.list_history(f.item.id).unwrap().is_empty());
        assert_eq!(f.store.get_customer(f.customer.id).unwrap().unwrap().total_loans, 0);
    }

    #[test]
    fn test_transaction_failures_are_distinguishable() {
        let mut f = Fixture::new();

        f.store.inject_failure(FailPoint::Begin);
        let err = f.manager.create_loan(f.request(100).build().unwrap(), &f.time).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Transaction { stage: TransactionStage::Begin, .. }
        ));

        f.store.inject_failure(FailPoint::Commit);
        let err = f.manager.create_loan(f.request(100).build().unwrap(), &f.time).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Transaction { stage: TransactionStage::Commit, .. }
        ));

        f.store.inject_failure(FailPoint::GenerateNumber);
        let err = f.manager.create_loan(f.request(100).build().unwrap(), &f.time).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Generation);

        assert_eq!(f.store.get_item(f.item.id).unwrap().unwrap().status, ItemStatus::Available);
    }

    #[test]
    fn test_counter_failure_does_not_undo_loan() {
        let mut f = Fixture::new();
        f.store.inject_failure(FailPoint::UpdateAggregates);

        let created = f
            .manager
            .create_loan(f.request(300).build().unwrap(), &f.time)
            .unwrap();

        assert_eq!(created.customer.total_loans, 0);
        let pending: Vec<SideEffect> = f.manager.events().failed_side_effects().cloned().collect();
        assert_eq!(pending, vec![SideEffect::CountLoanOpened { customer_id: f.customer.id }]);

        f.manager
            .retry_side_effect(created.loan.id, pending[0].clone())
            .unwrap();
        assert_eq!(f.store.get_customer(f.customer.id).unwrap().unwrap().total_loans, 1);
    }

    #[test]
    fn test_unknown_loan_lookups() {
        let f = Fixture::new();
        assert!(matches!(
            f.manager.get_loan_by_number("LN-NOPE-000001"),
            Err(LedgerError::LoanNotFound { .. })
        ));
        assert!(f.manager.payoff_amount(Uuid::new_v4()).is_err());
    }
}
