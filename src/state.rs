use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::types::{
    ActorId, BranchId, CustomerId, ItemId, LoanId, LoanStatus, PaymentBreakdown, PaymentPlanType,
};

/// loan record as persisted by the loan store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    // identification
    pub id: LoanId,
    pub loan_number: String,
    pub branch_id: BranchId,
    pub customer_id: CustomerId,
    pub item_id: ItemId,

    // core balances
    pub loan_amount: Money,
    pub interest_rate: Rate,
    /// fixed at issuance
    pub interest_amount: Money,
    pub principal_remaining: Money,
    pub interest_remaining: Money,
    pub late_fee_rate: Rate,
    /// late fee still owed
    pub late_fee_amount: Money,
    /// every late fee ever assessed on this loan
    pub late_fees_assessed: Money,
    pub total_amount: Money,
    pub amount_paid: Money,

    // terms
    pub start_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub loan_term_days: u32,
    pub grace_period_days: u32,
    pub payment_plan: PaymentPlanType,
    pub minimum_payment_amount: Option<Money>,
    pub next_payment_due_date: Option<DateTime<Utc>>,

    // status
    pub status: LoanStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub confiscated_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,

    // lineage
    pub renewed_from_id: Option<LoanId>,
    pub renewal_count: u32,

    // bookkeeping
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// bumped by the store on every write
    pub version: u64,
}

impl Loan {
    /// amount required to close the loan right now
    pub fn payoff_amount(&self) -> Money {
        self.principal_remaining + self.interest_remaining + self.late_fee_amount
    }

    pub fn is_fully_paid(&self) -> bool {
        self.principal_remaining.is_zero() && self.interest_remaining.is_zero()
    }

    /// last instant at which the loan counts as overdue rather than defaulted
    pub fn grace_deadline(&self) -> DateTime<Utc> {
        self.due_date + Duration::days(self.grace_period_days as i64)
    }

    /// whole days past the due date, negative while not yet due
    pub fn days_overdue(&self, now: DateTime<Utc>) -> i64 {
        (now - self.due_date).num_days()
    }

    /// reduce balances by an allocated payment
    pub fn apply_payment(
        &mut self,
        amount: Money,
        breakdown: &PaymentBreakdown,
        now: DateTime<Utc>,
    ) {
        self.late_fee_amount = self.late_fee_amount.saturating_sub(breakdown.late_fee_amount);
        self.interest_remaining = self.interest_remaining.saturating_sub(breakdown.interest_amount);
        self.principal_remaining = self
            .principal_remaining
            .saturating_sub(breakdown.principal_applied());
        self.amount_paid += amount;
        self.updated_at = now;

        if self.is_fully_paid() {
            self.status = LoanStatus::Paid;
            self.paid_at = Some(now);
        }
    }

    /// add back exactly what a payment took off
    pub fn restore_payment(
        &mut self,
        amount: Money,
        breakdown: &PaymentBreakdown,
        now: DateTime<Utc>,
    ) {
        self.late_fee_amount += breakdown.late_fee_amount;
        self.interest_remaining += breakdown.interest_amount;
        self.principal_remaining += breakdown.principal_applied();
        self.amount_paid -= amount;
        self.updated_at = now;

        if self.status == LoanStatus::Paid {
            self.status = LoanStatus::Active;
            self.paid_at = None;
        }
    }

    /// charge a late fee on top of the outstanding balance
    pub fn assess_late_fee(&mut self, fee: Money) {
        self.late_fee_amount += fee;
        self.late_fees_assessed += fee;
        self.total_amount += fee;
    }
}

/// one scheduled sub-payment under the installments plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanInstallment {
    pub loan_id: LoanId,
    pub sequence: u32,
    pub due_date: DateTime<Utc>,
    pub principal_amount: Money,
    pub interest_amount: Money,
    pub total_amount: Money,
}
