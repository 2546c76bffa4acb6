use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::decimal::Money;

pub type LoanId = Uuid;
pub type PaymentId = Uuid;
pub type ItemId = Uuid;
pub type CustomerId = Uuid;
pub type BranchId = Uuid;
/// staff member performing an operation
pub type ActorId = Uuid;

/// loan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoanStatus {
    /// performing, not yet past due
    Active,
    /// past due but within the grace period
    Overdue,
    /// past the grace period
    Defaulted,
    /// fully paid off
    Paid,
    /// replaced by a successor loan
    Renewed,
    /// collateral taken by the shop
    Confiscated,
}

impl LoanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoanStatus::Paid | LoanStatus::Renewed | LoanStatus::Confiscated)
    }

    /// statuses in which the loan still occupies its collateral item
    pub fn is_open(&self) -> bool {
        matches!(self, LoanStatus::Active | LoanStatus::Overdue | LoanStatus::Defaulted)
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoanStatus::Active => "active",
            LoanStatus::Overdue => "overdue",
            LoanStatus::Defaulted => "defaulted",
            LoanStatus::Paid => "paid",
            LoanStatus::Renewed => "renewed",
            LoanStatus::Confiscated => "confiscated",
        };
        f.write_str(s)
    }
}

/// how the borrower intends to repay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPlanType {
    /// everything due at the due date
    Single,
    /// periodic minimum payments until the due date
    MinimumPayment,
    /// even installments on monthly due dates
    Installments,
}

/// payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Completed,
    Reversed,
}

/// payment method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
    MobileWallet,
}

/// status of an item held by the shop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemStatus {
    Available,
    /// pawned, securing a loan
    Collateral,
    ForSale,
    Sold,
    Confiscated,
    /// moved to another branch
    Transferred,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemStatus::Available => "available",
            ItemStatus::Collateral => "collateral",
            ItemStatus::ForSale => "for_sale",
            ItemStatus::Sold => "sold",
            ItemStatus::Confiscated => "confiscated",
            ItemStatus::Transferred => "transferred",
        };
        f.write_str(s)
    }
}

/// kinds of human-readable numbers issued by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NumberKind {
    Loan,
    Payment,
}

impl NumberKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            NumberKind::Loan => "LN",
            NumberKind::Payment => "PY",
        }
    }
}

/// split of a payment across the waterfall buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PaymentBreakdown {
    pub late_fee_amount: Money,
    pub interest_amount: Money,
    /// includes any overpayment
    pub principal_amount: Money,
    /// part of `principal_amount` that exceeded the outstanding balance
    pub overpayment: Money,
}

impl PaymentBreakdown {
    pub fn total(&self) -> Money {
        self.late_fee_amount + self.interest_amount + self.principal_amount
    }

    /// principal actually removed from the loan balance
    pub fn principal_applied(&self) -> Money {
        self.principal_amount - self.overpayment
    }
}
