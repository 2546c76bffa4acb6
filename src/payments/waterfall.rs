use crate::decimal::Money;
use crate::state::Loan;
use crate::types::PaymentBreakdown;

/// balance buckets a payment can be applied to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentComponent {
    LateFee,
    Interest,
    Principal,
}

/// fixed allocation order: late fee -> interest -> principal
pub const ALLOCATION_ORDER: [PaymentComponent; 3] = [
    PaymentComponent::LateFee,
    PaymentComponent::Interest,
    PaymentComponent::Principal,
];

/// outstanding balances a payment is allocated against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutstandingBalances {
    pub late_fee: Money,
    pub interest: Money,
    pub principal: Money,
}

impl OutstandingBalances {
    pub fn of(loan: &Loan) -> Self {
        Self {
            late_fee: loan.late_fee_amount,
            interest: loan.interest_remaining,
            principal: loan.principal_remaining,
        }
    }

    pub fn total(&self) -> Money {
        self.late_fee + self.interest + self.principal
    }
}

/// split `amount` across the buckets in [`ALLOCATION_ORDER`]
///
/// Whatever is left once every bucket is cleared still lands on principal
/// and is reported as `overpayment`, so the breakdown always sums to
/// `amount`.
pub fn allocate(amount: Money, balances: &OutstandingBalances) -> PaymentBreakdown {
    let mut remaining = amount;
    let mut breakdown = PaymentBreakdown::default();

    for component in ALLOCATION_ORDER {
        remaining = apply_to_component(component, remaining, balances, &mut breakdown);
        if remaining.is_zero() {
            break;
        }
    }

    if remaining.is_positive() {
        breakdown.principal_amount += remaining;
        breakdown.overpayment = remaining;
    }

    breakdown
}

fn apply_to_component(
    component: PaymentComponent,
    available: Money,
    balances: &OutstandingBalances,
    breakdown: &mut PaymentBreakdown,
) -> Money {
    let (balance, applied_field) = match component {
        PaymentComponent::LateFee => (balances.late_fee, &mut breakdown.late_fee_amount),
        PaymentComponent::Interest => (balances.interest, &mut breakdown.interest_amount),
        PaymentComponent::Principal => (balances.principal, &mut breakdown.principal_amount),
    };

    let payment = available.min(balance.max(Money::ZERO));
    *applied_field = payment;

    available - payment
}
