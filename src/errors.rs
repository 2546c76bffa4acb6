use thiserror::Error;
use uuid::Uuid;

use crate::decimal::Money;
use crate::store::StoreError;
use crate::types::{ItemStatus, LoanStatus, NumberKind};

/// broad category of a ledger failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Ineligible,
    Conflict,
    Generation,
    Persistence,
    Transaction,
}

/// stage of a transactional unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStage {
    Begin,
    Commit,
}

impl std::fmt::Display for TransactionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionStage::Begin => f.write_str("begin"),
            TransactionStage::Commit => f.write_str("commit"),
        }
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("customer not found: {id}")]
    CustomerNotFound { id: Uuid },

    #[error("customer {id} cannot take a loan: {reason}")]
    CustomerIneligible { id: Uuid, reason: String },

    #[error("item not found: {id}")]
    ItemNotFound { id: Uuid },

    #[error("item {id} is not available for pawning: current status is {status}")]
    ItemUnavailable { id: Uuid, status: ItemStatus },

    #[error("item {item_id} already secures active loan {loan_number}")]
    ItemAlreadyPledged { item_id: Uuid, loan_number: String },

    #[error("loan amount {requested} exceeds collateral value {loan_value}")]
    AmountExceedsCollateralValue { requested: Money, loan_value: Money },

    #[error("invalid loan terms: {message}")]
    InvalidLoanTerms { message: String },

    #[error("loan not found: {reference}")]
    LoanNotFound { reference: String },

    #[error("loan {loan_number} is already paid")]
    LoanAlreadyPaid { loan_number: String },

    #[error("loan {loan_number} has been confiscated")]
    LoanConfiscated { loan_number: String },

    #[error("loan {loan_number} has been renewed into a new loan")]
    LoanRenewed { loan_number: String },

    #[error("invalid payment amount: {amount}")]
    InvalidPaymentAmount { amount: Money },

    #[error("payment less than minimum: minimum {minimum}, provided {provided}")]
    PaymentBelowMinimum { minimum: Money, provided: Money },

    #[error("payment not found: {id}")]
    PaymentNotFound { id: Uuid },

    #[error("payment {payment_number} cannot be reversed: already reversed")]
    PaymentNotReversible { payment_number: String },

    #[error("loan {loan_number} cannot be renewed from status {status}")]
    InvalidStatusForRenewal { loan_number: String, status: LoanStatus },

    #[error("loan {loan_number} still owes interest {outstanding}")]
    InterestNotPaid { loan_number: String, outstanding: Money },

    #[error("loan {loan_number} cannot be confiscated from status {status}")]
    InvalidStatusForConfiscation { loan_number: String, status: LoanStatus },

    #[error("invalid item status transition: {from} -> {to}")]
    InvalidStatusTransition { from: ItemStatus, to: ItemStatus },

    #[error("loan {loan_id} was modified concurrently; gave up after {attempts} attempts")]
    ConcurrentModification { loan_id: Uuid, attempts: u32 },

    #[error("failed to generate {kind:?} number")]
    NumberGeneration {
        kind: NumberKind,
        #[source]
        source: StoreError,
    },

    #[error("transaction {stage} failed")]
    Transaction {
        stage: TransactionStage,
        #[source]
        source: StoreError,
    },

    #[error("{operation} failed")]
    Persistence {
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::CustomerNotFound { .. }
            | LedgerError::ItemNotFound { .. }
            | LedgerError::LoanNotFound { .. }
            | LedgerError::PaymentNotFound { .. } => ErrorKind::NotFound,
            LedgerError::ItemAlreadyPledged { .. }
            | LedgerError::ConcurrentModification { .. } => ErrorKind::Conflict,
            LedgerError::NumberGeneration { .. } => ErrorKind::Generation,
            LedgerError::Transaction { .. } => ErrorKind::Transaction,
            LedgerError::Persistence { .. } => ErrorKind::Persistence,
            _ => ErrorKind::Ineligible,
        }
    }

    /// wrap a store failure with the operation it interrupted
    pub(crate) fn persistence(operation: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| LedgerError::Persistence { operation, source }
    }

    pub(crate) fn loan_not_found(reference: impl ToString) -> Self {
        LedgerError::LoanNotFound { reference: reference.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
