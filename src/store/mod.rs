pub mod memory;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::collateral::{Item, ItemHistoryRecord, ItemStatusChange};
use crate::customer::{Customer, CustomerAggregateUpdate};
use crate::errors::{LedgerError, Result, TransactionStage};
use crate::payments::{Payment, PaymentSummary};
use crate::state::{Loan, LoanInstallment};
use crate::types::{BranchId, CustomerId, ItemId, LoanId, NumberKind, PaymentId};

pub use memory::MemoryStore;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("{entity} {id} was modified by another writer")]
    VersionConflict { entity: &'static str, id: Uuid },

    #[error("duplicate {entity}: {key}")]
    Duplicate { entity: &'static str, key: String },

    #[error("store backend failure: {message}")]
    Backend { message: String },
}

impl StoreError {
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub trait LoanStore: Send + Sync {
    fn get_loan(&self, id: LoanId) -> StoreResult<Option<Loan>>;

    fn get_loan_by_number(&self, loan_number: &str) -> StoreResult<Option<Loan>>;

    /// the open (active, overdue or defaulted) loan secured by an item
    fn find_open_loan_by_item(&self, item_id: ItemId) -> StoreResult<Option<Loan>>;

    fn create_loan(&self, loan: &Loan) -> StoreResult<()>;

    /// optimistic update; returns the loan carrying its new version
    fn update_loan(&self, loan: &Loan) -> StoreResult<Loan>;

    fn generate_number(&self, kind: NumberKind, branch_id: BranchId) -> StoreResult<String>;

    /// open loans of a branch whose due date is before `as_of`
    fn list_overdue(&self, branch_id: BranchId, as_of: DateTime<Utc>) -> StoreResult<Vec<Loan>>;

    fn create_installments(&self, installments: &[LoanInstallment]) -> StoreResult<()>;

    fn get_installments(&self, loan_id: LoanId) -> StoreResult<Vec<LoanInstallment>>;

    fn begin(&self) -> StoreResult<Box<dyn LedgerTransaction + '_>>;
}

/// staged unit of work from [`LoanStore::begin`]
///
/// Writes land on `commit` all at once or not at all. Dropping it without
/// `commit` discards everything.
pub trait LedgerTransaction {
    fn create_loan(&mut self, loan: &Loan) -> StoreResult<()>;

    /// checked against `loan.version` at commit; the stored copy then
    /// carries `loan.version + 1`
    fn update_loan(&mut self, loan: &Loan) -> StoreResult<()>;

    fn create_installments(&mut self, installments: &[LoanInstallment]) -> StoreResult<()>;

    /// checked against `change.from` at commit
    fn change_item_status(&mut self, change: &ItemStatusChange) -> StoreResult<()>;

    fn create_payment(&mut self, payment: &Payment) -> StoreResult<()>;

    fn update_payment(&mut self, payment: &Payment) -> StoreResult<()>;

    fn commit(self: Box<Self>) -> StoreResult<()>;

    fn rollback(self: Box<Self>) -> StoreResult<()>;
}

pub trait ItemStore: Send + Sync {
    fn get_item(&self, id: ItemId) -> StoreResult<Option<Item>>;

    /// apply a change and append its history record
    fn update_status(&self, change: &ItemStatusChange) -> StoreResult<()>;

    fn append_history(&self, record: &ItemHistoryRecord) -> StoreResult<()>;

    fn list_history(&self, item_id: ItemId) -> StoreResult<Vec<ItemHistoryRecord>>;
}

pub trait CustomerStore: Send + Sync {
    fn get_customer(&self, id: CustomerId) -> StoreResult<Option<Customer>>;

    fn update_aggregates(
        &self,
        id: CustomerId,
        update: &CustomerAggregateUpdate,
    ) -> StoreResult<()>;
}

pub trait PaymentStore: Send + Sync {
    fn get_payment(&self, id: PaymentId) -> StoreResult<Option<Payment>>;

    fn create_payment(&self, payment: &Payment) -> StoreResult<()>;

    fn update_payment(&self, payment: &Payment) -> StoreResult<()>;

    /// oldest first
    fn list_by_loan(&self, loan_id: LoanId) -> StoreResult<Vec<Payment>>;

    fn summarize_by_loan(&self, loan_id: LoanId) -> StoreResult<PaymentSummary>;

    fn generate_payment_number(&self, branch_id: BranchId) -> StoreResult<String>;
}

/// every store the ledger talks to
#[derive(Clone)]
pub struct LedgerStores {
    pub loans: Arc<dyn LoanStore>,
    pub items: Arc<dyn ItemStore>,
    pub customers: Arc<dyn CustomerStore>,
    pub payments: Arc<dyn PaymentStore>,
}

impl LedgerStores {
    /// one in-memory store backing every contract
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            loans: store.clone(),
            items: store.clone(),
            customers: store.clone(),
            payments: store,
        }
    }
}

/// how a unit of work ended when it did not fail outright
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommitOutcome {
    Committed,
    /// another writer got there first; re-read and try again
    Conflict,
}

/// begin a transaction, stage writes, commit
///
/// A staging error rolls back and is returned as is. A version conflict at
/// commit is reported as [`CommitOutcome::Conflict`] so callers can retry.
pub(crate) fn run_in_transaction<F>(loans: &dyn LoanStore, stage: F) -> Result<CommitOutcome>
where
    F: FnOnce(&mut dyn LedgerTransaction) -> Result<()>,
{
    let mut tx = loans.begin().map_err(|source| LedgerError::Transaction {
        stage: TransactionStage::Begin,
        source,
    })?;

    if let Err(err) = stage(tx.as_mut()) {
        if let Err(rollback_err) = tx.rollback() {
            error!(error = %rollback_err, "rollback failed");
        }
        return Err(err);
    }

    match tx.commit() {
        Ok(()) => Ok(CommitOutcome::Committed),
        Err(source) if source.is_version_conflict() => Ok(CommitOutcome::Conflict),
        Err(source) => Err(LedgerError::Transaction {
            stage: TransactionStage::Commit,
            source,
        }),
    }
}
