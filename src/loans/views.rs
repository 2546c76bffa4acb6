use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::payments::PaymentSummary;
use crate::state::{Loan, LoanInstallment};
use crate::types::{BranchId, CustomerId, ItemId, LoanId, LoanStatus, PaymentPlanType};

use super::LoanManager;

/// serializable view of a loan's state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanView {
    pub id: LoanId,
    pub loan_number: String,
    pub status: LoanStatus,
    pub branch_id: BranchId,
    pub customer_id: CustomerId,
    pub item_id: ItemId,
    pub balances: BalanceView,
    pub terms: TermsView,
    pub lineage: LineageView,
    pub installments: Vec<LoanInstallment>,
    pub payments: PaymentSummary,
    /// whole days past due, zero while not yet due
    pub days_overdue: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceView {
    pub loan_amount: Money,
    pub interest_amount: Money,
    pub principal_remaining: Money,
    pub interest_remaining: Money,
    pub late_fee_amount: Money,
    pub late_fees_assessed: Money,
    pub total_amount: Money,
    pub amount_paid: Money,
    pub payoff_amount: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermsView {
    pub interest_rate: Rate,
    pub late_fee_rate: Rate,
    pub start_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub grace_deadline: DateTime<Utc>,
    pub loan_term_days: u32,
    pub grace_period_days: u32,
    pub payment_plan: PaymentPlanType,
    pub minimum_payment_amount: Option<Money>,
    pub next_payment_due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageView {
    pub renewed_from_id: Option<LoanId>,
    pub renewal_count: u32,
    pub paid_at: Option<DateTime<Utc>>,
    pub confiscated_at: Option<DateTime<Utc>>,
}

impl LoanView {
    pub fn from_loan(
        loan: &Loan,
        installments: Vec<LoanInstallment>,
        payments: PaymentSummary,
        now: DateTime<Utc>,
    ) -> Self {
        LoanView {
            id: loan.id,
            loan_number: loan.loan_number.clone(),
            status: loan.status,
            branch_id: loan.branch_id,
            customer_id: loan.customer_id,
            item_id: loan.item_id,
            balances: BalanceView {
                loan_amount: loan.loan_amount,
                interest_amount: loan.interest_amount,
                principal_remaining: loan.principal_remaining,
                interest_remaining: loan.interest_remaining,
                late_fee_amount: loan.late_fee_amount,
                late_fees_assessed: loan.late_fees_assessed,
                total_amount: loan.total_amount,
                amount_paid: loan.amount_paid,
                payoff_amount: loan.payoff_amount(),
            },
            terms: TermsView {
                interest_rate: loan.interest_rate,
                late_fee_rate: loan.late_fee_rate,
                start_date: loan.start_date,
                due_date: loan.due_date,
                grace_deadline: loan.grace_deadline(),
                loan_term_days: loan.loan_term_days,
                grace_period_days: loan.grace_period_days,
                payment_plan: loan.payment_plan,
                minimum_payment_amount: loan.minimum_payment_amount,
                next_payment_due_date: loan.next_payment_due_date,
            },
            lineage: LineageView {
                renewed_from_id: loan.renewed_from_id,
                renewal_count: loan.renewal_count,
                paid_at: loan.paid_at,
                confiscated_at: loan.confiscated_at,
            },
            installments,
            payments,
            days_overdue: loan.days_overdue(now).max(0),
        }
    }

    /// get json representation of the view
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("JSON error: {}", e))
    }
}

impl LoanManager {
    /// loan with its installments and payment totals, as of now
    pub fn loan_view(&self, loan_id: LoanId, time_provider: &SafeTimeProvider) -> Result<LoanView> {
        let loan = self.load_loan(loan_id)?;
        let installments = self
            .stores
            .loans
            .get_installments(loan_id)
            .map_err(LedgerError::persistence("load installments"))?;
        let payments = self
            .stores
            .payments
            .summarize_by_loan(loan_id)
            .map_err(LedgerError::persistence("summarize payments"))?;

        Ok(LoanView::from_loan(&loan, installments, payments, time_provider.now()))
    }
}
