pub mod installments;
pub mod ledger;
pub mod waterfall;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::state::Loan;
use crate::types::{
    ActorId, BranchId, LoanId, PaymentBreakdown, PaymentId, PaymentMethod, PaymentStatus,
};

pub use installments::{add_months, InstallmentSchedule};
pub use ledger::PaymentLedger;
pub use waterfall::{allocate, OutstandingBalances, PaymentComponent, ALLOCATION_ORDER};

/// a money receipt applied to one loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub payment_number: String,
    pub loan_id: LoanId,
    pub branch_id: BranchId,
    pub amount: Money,
    pub breakdown: PaymentBreakdown,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub received_by: ActorId,
    pub created_at: DateTime<Utc>,
    pub reversal: Option<PaymentReversal>,
}

impl Payment {
    pub fn is_reversed(&self) -> bool {
        self.status == PaymentStatus::Reversed
    }
}

/// who reversed a payment, when and why
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentReversal {
    pub reason: String,
    pub reversed_by: ActorId,
    pub reversed_at: DateTime<Utc>,
}

/// payment request
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyPaymentRequest {
    pub loan_id: LoanId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub received_by: ActorId,
    pub branch_id: BranchId,
}

/// outcome of applying a payment
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentResult {
    pub payment: Payment,
    pub loan: Loan,
    pub is_paid_off: bool,
    pub remaining_balance: Money,
}

/// per-loan payment totals; reversed payments only count towards `reversed_count`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSummary {
    pub loan_id: LoanId,
    pub completed_count: u32,
    pub reversed_count: u32,
    pub total_amount: Money,
    pub total_late_fee: Money,
    pub total_interest: Money,
    pub total_principal: Money,
    pub total_overpayment: Money,
    pub last_payment_at: Option<DateTime<Utc>>,
}

impl PaymentSummary {
    pub fn empty(loan_id: LoanId) -> Self {
        Self {
            loan_id,
            completed_count: 0,
            reversed_count: 0,
            total_amount: Money::ZERO,
            total_late_fee: Money::ZERO,
            total_interest: Money::ZERO,
            total_principal: Money::ZERO,
            total_overpayment: Money::ZERO,
            last_payment_at: None,
        }
    }

    pub fn from_payments(loan_id: LoanId, payments: &[Payment]) -> Self {
        payments
            .iter()
            .filter(|p| p.loan_id == loan_id)
            .fold(Self::empty(loan_id), |mut summary, payment| {
                if payment.is_reversed() {
                    summary.reversed_count += 1;
                    return summary;
                }
                summary.completed_count += 1;
                summary.total_amount += payment.amount;
                summary.total_late_fee += payment.breakdown.late_fee_amount;
                summary.total_interest += payment.breakdown.interest_amount;
                summary.total_principal += payment.breakdown.principal_amount;
                summary.total_overpayment += payment.breakdown.overpayment;
                summary.last_payment_at = summary.last_payment_at.max(Some(payment.created_at));
                summary
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn payment(loan_id: LoanId, amount: i64, status: PaymentStatus, at: DateTime<Utc>) -> Payment {
        let amount = Money::from_major(amount);
        Payment {
            id: Uuid::new_v4(),
            payment_number: "PY-TEST-000001".to_string(),
            loan_id,
            branch_id: Uuid::new_v4(),
            amount,
            breakdown: PaymentBreakdown {
                interest_amount: amount,
                ..Default::default()
            },
            method: PaymentMethod::Cash,
            status,
            received_by: Uuid::new_v4(),
            created_at: at,
            reversal: None,
        }
    }

    #[test]
    fn test_summary_skips_reversed_payments() {
        let loan_id = Uuid::new_v4();
        let now = Utc::now();
        let payments = vec![
            payment(loan_id, 50, PaymentStatus::Completed, now),
            payment(loan_id, 70, PaymentStatus::Reversed, now + Duration::days(2)),
            payment(loan_id, 30, PaymentStatus::Completed, now + Duration::days(1)),
            payment(Uuid::new_v4(), 999, PaymentStatus::Completed, now),
        ];

        let summary = PaymentSummary::from_payments(loan_id, &payments);

        assert_eq!(summary.completed_count, 2);
        assert_eq!(summary.reversed_count, 1);
        assert_eq!(summary.total_amount, Money::from_major(80));
        assert_eq!(summary.total_interest, Money::from_major(80));
        assert_eq!(summary.last_payment_at, Some(now + Duration::days(1)));
    }
}
