use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use uuid::Uuid;

use crate::collateral::{Item, ItemHistoryRecord, ItemStatusChange};
use crate::customer::{Customer, CustomerAggregateUpdate};
use crate::decimal::Money;
use crate::payments::{Payment, PaymentSummary};
use crate::state::{Loan, LoanInstallment};
use crate::types::{BranchId, CustomerId, ItemId, ItemStatus, LoanId, NumberKind, PaymentId};

use super::{
    CustomerStore, ItemStore, LedgerTransaction, LoanStore, PaymentStore, StoreError, StoreResult,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    loans: HashMap<LoanId, Loan>,
    installments: HashMap<LoanId, Vec<LoanInstallment>>,
    items: HashMap<ItemId, Item>,
    item_history: Vec<ItemHistoryRecord>,
    customers: HashMap<CustomerId, Customer>,
    payments: HashMap<PaymentId, Payment>,
    sequences: HashMap<(NumberKind, BranchId), u64>,
}

impl Tables {
    fn insert_loan(&mut self, loan: &Loan) -> StoreResult<()> {
        if self.loans.contains_key(&loan.id)
            || self.loans.values().any(|l| l.loan_number == loan.loan_number)
        {
            return Err(StoreError::Duplicate {
                entity: "loan",
                key: loan.loan_number.clone(),
            });
        }
        self.loans.insert(loan.id, loan.clone());
        Ok(())
    }

    fn replace_loan(&mut self, loan: &Loan) -> StoreResult<Loan> {
        let stored = self
            .loans
            .get_mut(&loan.id)
            .ok_or(StoreError::NotFound { entity: "loan", id: loan.id })?;
        if stored.version != loan.version {
            return Err(StoreError::VersionConflict { entity: "loan", id: loan.id });
        }
        *stored = Loan {
            version: loan.version + 1,
            ..loan.clone()
        };
        Ok(stored.clone())
    }

    fn insert_installments(&mut self, installments: &[LoanInstallment]) {
        for installment in installments {
            self.installments
                .entry(installment.loan_id)
                .or_default()
                .push(installment.clone());
        }
    }

    fn apply_item_change(&mut self, change: &ItemStatusChange) -> StoreResult<()> {
        let item = self
            .items
            .get_mut(&change.item_id)
            .ok_or(StoreError::NotFound { entity: "item", id: change.item_id })?;
        if item.status != change.from {
            return Err(StoreError::VersionConflict { entity: "item", id: change.item_id });
        }
        item.status = change.to;
        item.updated_at = change.history.recorded_at;
        self.item_history.push(change.history.clone());
        Ok(())
    }

    fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        if self.payments.contains_key(&payment.id) {
            return Err(StoreError::Duplicate {
                entity: "payment",
                key: payment.payment_number.clone(),
            });
        }
        self.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    fn replace_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        let stored = self
            .payments
            .get_mut(&payment.id)
            .ok_or(StoreError::NotFound { entity: "payment", id: payment.id })?;
        *stored = payment.clone();
        Ok(())
    }

    fn next_number(&mut self, kind: NumberKind, branch_id: BranchId) -> String {
        let seq = self.sequences.entry((kind, branch_id)).or_insert(0);
        *seq += 1;
        let branch = branch_id.simple().to_string()[..4].to_uppercase();
        format!("{}-{}-{:06}", kind.prefix(), branch, seq)
    }

    fn payments_for(&self, loan_id: LoanId) -> Vec<Payment> {
        let mut payments: Vec<Payment> = self
            .payments
            .values()
            .filter(|p| p.loan_id == loan_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.payment_number.cmp(&b.payment_number))
        });
        payments
    }
}

/// points where a store call can be made to fail once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailPoint {
    Begin,
    Commit,
    GenerateNumber,
    StageInstallments,
    StageItemStatus,
    UpdateAggregates,
    UpdateLoan,
    /// another writer bumps every loan touched by the next commit
    RacingLoanWrite,
}

/// in-process store backing all four contracts behind one lock
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    failures: Mutex<Vec<FailPoint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| StoreError::Backend {
            message: "memory store lock poisoned".to_string(),
        })
    }

    /// register a new available item
    pub fn seed_item(
        &self,
        branch_id: BranchId,
        description: &str,
        loan_value: Money,
        time_provider: &SafeTimeProvider,
    ) -> StoreResult<Item> {
        let item = Item {
            id: Uuid::new_v4(),
            branch_id,
            description: description.to_string(),
            loan_value,
            status: ItemStatus::Available,
            updated_at: time_provider.now(),
        };
        self.put_item(item.clone())?;
        Ok(item)
    }

    /// register a new active customer with no history
    pub fn seed_customer(&self, name: &str) -> StoreResult<Customer> {
        let customer = Customer {
            id: Uuid::new_v4(),
            name: name.to_string(),
            is_active: true,
            is_blocked: false,
            total_loans: 0,
            total_defaulted: Money::ZERO,
            total_paid: Money::ZERO,
            credit_score: 500,
        };
        self.put_customer(customer.clone())?;
        Ok(customer)
    }

    /// insert or overwrite an item as is, bypassing the state machine
    pub fn put_item(&self, item: Item) -> StoreResult<()> {
        self.tables()?.items.insert(item.id, item);
        Ok(())
    }

    pub fn put_customer(&self, customer: Customer) -> StoreResult<()> {
        self.tables()?.customers.insert(customer.id, customer);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn inject_failure(&self, point: FailPoint) {
        self.failures.lock().unwrap().push(point);
    }

    fn trip(&self, point: FailPoint) -> StoreResult<()> {
        let Ok(mut failures) = self.failures.lock() else {
            return Ok(());
        };
        if let Some(pos) = failures.iter().position(|p| *p == point) {
            failures.remove(pos);
            return Err(StoreError::Backend {
                message: format!("injected failure at {:?}", point),
            });
        }
        Ok(())
    }

    fn racing_write(&self, tables: &mut Tables, loan_ids: impl IntoIterator<Item = LoanId>) {
        if self.trip(FailPoint::RacingLoanWrite).is_ok() {
            return;
        }
        for id in loan_ids {
            if let Some(stored) = tables.loans.get_mut(&id) {
                stored.version += 1;
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Staged {
    CreateLoan(Loan),
    UpdateLoan(Loan),
    CreateInstallments(Vec<LoanInstallment>),
    ItemStatus(ItemStatusChange),
    CreatePayment(Payment),
    UpdatePayment(Payment),
}

/// transaction over a [`MemoryStore`]; writes are buffered until commit
pub struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    staged: Vec<Staged>,
}

impl LedgerTransaction for MemoryTransaction<'_> {
    fn create_loan(&mut self, loan: &Loan) -> StoreResult<()> {
        self.staged.push(Staged::CreateLoan(loan.clone()));
        Ok(())
    }

    fn update_loan(&mut self, loan: &Loan) -> StoreResult<()> {
        self.staged.push(Staged::UpdateLoan(loan.clone()));
        Ok(())
    }

    fn create_installments(&mut self, installments: &[LoanInstallment]) -> StoreResult<()> {
        self.store.trip(FailPoint::StageInstallments)?;
        self.staged.push(Staged::CreateInstallments(installments.to_vec()));
        Ok(())
    }

    fn change_item_status(&mut self, change: &ItemStatusChange) -> StoreResult<()> {
        self.store.trip(FailPoint::StageItemStatus)?;
        self.staged.push(Staged::ItemStatus(change.clone()));
        Ok(())
    }

    fn create_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        self.staged.push(Staged::CreatePayment(payment.clone()));
        Ok(())
    }

    fn update_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        self.staged.push(Staged::UpdatePayment(payment.clone()));
        Ok(())
    }

    fn commit(self: Box<Self>) -> StoreResult<()> {
        self.store.trip(FailPoint::Commit)?;
        let mut tables = self.store.tables()?;
        let updated_loans = self.staged.iter().filter_map(|op| match op {
            Staged::UpdateLoan(loan) => Some(loan.id),
            _ => None,
        });
        self.store.racing_write(&mut tables, updated_loans);

        // apply to a scratch copy so a failing write leaves nothing behind
        let mut next = tables.clone();
        for op in &self.staged {
            match op {
                Staged::CreateLoan(loan) => next.insert_loan(loan)?,
                Staged::UpdateLoan(loan) => {
                    next.replace_loan(loan)?;
                }
                Staged::CreateInstallments(installments) => next.insert_installments(installments),
                Staged::ItemStatus(change) => next.apply_item_change(change)?,
                Staged::CreatePayment(payment) => next.insert_payment(payment)?,
                Staged::UpdatePayment(payment) => next.replace_payment(payment)?,
            }
        }
        *tables = next;
        Ok(())
    }

    fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

impl LoanStore for MemoryStore {
    fn get_loan(&self, id: LoanId) -> StoreResult<Option<Loan>> {
        Ok(self.tables()?.loans.get(&id).cloned())
    }

    fn get_loan_by_number(&self, loan_number: &str) -> StoreResult<Option<Loan>> {
        Ok(self
            .tables()?
            .loans
            .values()
            .find(|l| l.loan_number == loan_number)
            .cloned())
    }

    fn find_open_loan_by_item(&self, item_id: ItemId) -> StoreResult<Option<Loan>> {
        Ok(self
            .tables()?
            .loans
            .values()
            .find(|l| l.item_id == item_id && l.status.is_open())
            .cloned())
    }

    fn create_loan(&self, loan: &Loan) -> StoreResult<()> {
        self.tables()?.insert_loan(loan)
    }

    fn update_loan(&self, loan: &Loan) -> StoreResult<Loan> {
        self.trip(FailPoint::UpdateLoan)?;
        let mut tables = self.tables()?;
        self.racing_write(&mut tables, [loan.id]);
        tables.replace_loan(loan)
    }

    fn generate_number(&self, kind: NumberKind, branch_id: BranchId) -> StoreResult<String> {
        self.trip(FailPoint::GenerateNumber)?;
        Ok(self.tables()?.next_number(kind, branch_id))
    }

    fn list_overdue(&self, branch_id: BranchId, as_of: DateTime<Utc>) -> StoreResult<Vec<Loan>> {
        let mut loans: Vec<Loan> = self
            .tables()?
            .loans
            .values()
            .filter(|l| l.branch_id == branch_id && l.status.is_open() && l.due_date < as_of)
            .cloned()
            .collect();
        loans.sort_by_key(|l| l.due_date);
        Ok(loans)
    }

    fn create_installments(&self, installments: &[LoanInstallment]) -> StoreResult<()> {
        self.tables()?.insert_installments(installments);
        Ok(())
    }

    fn get_installments(&self, loan_id: LoanId) -> StoreResult<Vec<LoanInstallment>> {
        let mut installments = self
            .tables()?
            .installments
            .get(&loan_id)
            .cloned()
            .unwrap_or_default();
        installments.sort_by_key(|i| i.sequence);
        Ok(installments)
    }

    fn begin(&self) -> StoreResult<Box<dyn LedgerTransaction + '_>> {
        self.trip(FailPoint::Begin)?;
        Ok(Box::new(MemoryTransaction {
            store: self,
            staged: Vec::new(),
        }))
    }
}

impl ItemStore for MemoryStore {
    fn get_item(&self, id: ItemId) -> StoreResult<Option<Item>> {
        Ok(self.tables()?.items.get(&id).cloned())
    }

    fn update_status(&self, change: &ItemStatusChange) -> StoreResult<()> {
        self.tables()?.apply_item_change(change)
    }

    fn append_history(&self, record: &ItemHistoryRecord) -> StoreResult<()> {
        let mut tables = self.tables()?;
        if !tables.items.contains_key(&record.item_id) {
            return Err(StoreError::NotFound { entity: "item", id: record.item_id });
        }
        tables.item_history.push(record.clone());
        Ok(())
    }

    fn list_history(&self, item_id: ItemId) -> StoreResult<Vec<ItemHistoryRecord>> {
        Ok(self
            .tables()?
            .item_history
            .iter()
            .filter(|r| r.item_id == item_id)
            .cloned()
            .collect())
    }
}

impl CustomerStore for MemoryStore {
    fn get_customer(&self, id: CustomerId) -> StoreResult<Option<Customer>> {
        Ok(self.tables()?.customers.get(&id).cloned())
    }

    fn update_aggregates(
        &self,
        id: CustomerId,
        update: &CustomerAggregateUpdate,
    ) -> StoreResult<()> {
        self.trip(FailPoint::UpdateAggregates)?;
        let mut tables = self.tables()?;
        let customer = tables
            .customers
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "customer", id })?;
        update.apply_to(customer);
        Ok(())
    }
}

impl PaymentStore for MemoryStore {
    fn get_payment(&self, id: PaymentId) -> StoreResult<Option<Payment>> {
        Ok(self.tables()?.payments.get(&id).cloned())
    }

    fn create_payment(&self, payment: &Payment) -> StoreResult<()> {
        self.tables()?.insert_payment(payment)
    }

    fn update_payment(&self, payment: &Payment) -> StoreResult<()> {
        self.tables()?.replace_payment(payment)
    }

    fn list_by_loan(&self, loan_id: LoanId) -> StoreResult<Vec<Payment>> {
        Ok(self.tables()?.payments_for(loan_id))
    }

    fn summarize_by_loan(&self, loan_id: LoanId) -> StoreResult<PaymentSummary> {
        let payments = self.tables()?.payments_for(loan_id);
        Ok(PaymentSummary::from_payments(loan_id, &payments))
    }

    fn generate_payment_number(&self, branch_id: BranchId) -> StoreResult<String> {
        self.trip(FailPoint::GenerateNumber)?;
        Ok(self.tables()?.next_number(NumberKind::Payment, branch_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::fixtures::{loan_with_balances, start_date};
    use hourglass_rs::TimeSource;
    use std::sync::Arc;

    #[test]
    fn test_numbers_are_sequential_per_branch_and_kind() {
        let store = MemoryStore::new();
        let branch = Uuid::new_v4();
        let other = Uuid::new_v4();

        let first = store.generate_number(NumberKind::Loan, branch).unwrap();
        let second = store.generate_number(NumberKind::Loan, branch).unwrap();
        let payment = store.generate_payment_number(branch).unwrap();
        let elsewhere = store.generate_number(NumberKind::Loan, other).unwrap();

        assert!(first.starts_with("LN-") && first.ends_with("-000001"));
        assert!(second.ends_with("-000002"));
        assert!(payment.starts_with("PY-") && payment.ends_with("-000001"));
        assert!(elsewhere.ends_with("-000001"));
    }

    #[test]
    fn test_update_bumps_version_and_rejects_stale_writes() {
        let store = MemoryStore::new();
        let loan = loan_with_balances(500, 50, 0);
        store.create_loan(&loan).unwrap();

        let updated = store.update_loan(&loan).unwrap();
        assert_eq!(updated.version, 1);

        let err = store.update_loan(&loan).unwrap_err();
        assert!(err.is_version_conflict());
    }

    #[test]
    fn test_failed_commit_applies_nothing() {
        let store = MemoryStore::new();
        let existing = loan_with_balances(500, 50, 0);
        store.create_loan(&existing).unwrap();

        let mut fresh = loan_with_balances(300, 30, 0);
        fresh.loan_number = "LN-TEST-000002".to_string();

        let mut tx = store.begin().unwrap();
        tx.create_loan(&fresh).unwrap();
        // stale version: the stored loan is at 0, pretend we read 7
        tx.update_loan(&Loan { version: 7, ..existing.clone() }).unwrap();
        assert!(tx.commit().unwrap_err().is_version_conflict());

        assert!(store.get_loan(fresh.id).unwrap().is_none());
    }

    #[test]
    fn test_dropped_transaction_discards_writes() {
        let store = MemoryStore::new();
        let loan = loan_with_balances(500, 50, 0);

        {
            let mut tx = store.begin().unwrap();
            tx.create_loan(&loan).unwrap();
        }

        assert!(store.get_loan(loan.id).unwrap().is_none());
    }

    #[test]
    fn test_item_change_requires_expected_status() {
        let store = MemoryStore::new();
        let time = SafeTimeProvider::new(TimeSource::Test(start_date()));
        let item = store
            .seed_item(Uuid::new_v4(), "guitar", Money::from_major(400), &time)
            .unwrap();
        assert_eq!(item.updated_at, start_date());
        let record = ItemHistoryRecord {
            item_id: item.id,
            old_status: ItemStatus::ForSale,
            new_status: ItemStatus::Sold,
            actor_id: Uuid::new_v4(),
            note: String::new(),
            recorded_at: time.now(),
        };
        let change = ItemStatusChange {
            item_id: item.id,
            from: ItemStatus::ForSale,
            to: ItemStatus::Sold,
            history: record,
        };

        assert!(store.update_status(&change).unwrap_err().is_version_conflict());
        assert!(store.list_history(item.id).unwrap().is_empty());
    }

    #[test]
    fn test_poisoned_lock_is_reported() {
        let store = Arc::new(MemoryStore::new());
        let writer = store.clone();
        let _ = std::thread::spawn(move || {
            let _tables = writer.tables.lock().unwrap();
            panic!("writer died holding the lock");
        })
        .join();

        assert!(matches!(store.seed_customer("Ana"), Err(StoreError::Backend { .. })));
        assert!(store.get_loan(Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_list_overdue_filters_branch_status_and_date() {
        let store = MemoryStore::new();
        let mut due = loan_with_balances(100, 10, 0);
        let branch = due.branch_id;

        let mut paid = loan_with_balances(100, 10, 0);
        paid.loan_number = "LN-TEST-000002".to_string();
        paid.branch_id = branch;
        paid.status = crate::types::LoanStatus::Paid;

        let mut not_yet = loan_with_balances(100, 10, 0);
        not_yet.loan_number = "LN-TEST-000003".to_string();
        not_yet.branch_id = branch;
        not_yet.due_date = due.due_date + chrono::Duration::days(60);

        due.status = crate::types::LoanStatus::Overdue;
        for loan in [&due, &paid, &not_yet] {
            store.create_loan(loan).unwrap();
        }

        let as_of = due.due_date + chrono::Duration::days(1);
        let overdue = store.list_overdue(branch, as_of).unwrap();

        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, due.id);
    }
}
