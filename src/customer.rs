use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CreditPolicy;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::{Event, EventStore, SideEffect};
use crate::store::CustomerStore;
use crate::types::{CustomerId, LoanId};

/// aggregate view of a customer, as far as the ledger cares
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    pub is_active: bool,
    pub is_blocked: bool,
    pub total_loans: u32,
    pub total_defaulted: Money,
    pub total_paid: Money,
    pub credit_score: i32,
}

impl Customer {
    /// reason the customer may not borrow, if any
    pub fn loan_ineligibility(&self) -> Option<&'static str> {
        if self.is_blocked {
            Some("customer is blocked")
        } else if !self.is_active {
            Some("customer is inactive")
        } else {
            None
        }
    }

    pub fn can_take_loan(&self) -> bool {
        self.loan_ineligibility().is_none()
    }
}

/// partial update of the aggregate credit fields; `None` leaves a field as is
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerAggregateUpdate {
    pub total_loans: Option<u32>,
    pub total_defaulted: Option<Money>,
    pub total_paid: Option<Money>,
    pub credit_score: Option<i32>,
}

impl CustomerAggregateUpdate {
    /// one more loan on the books
    pub fn loan_opened(customer: &Customer) -> Self {
        Self {
            total_loans: Some(customer.total_loans + 1),
            ..Default::default()
        }
    }

    /// a loan paid off in full
    pub fn loan_paid_off(customer: &Customer, amount_paid: Money, policy: &CreditPolicy) -> Self {
        Self {
            total_paid: Some(customer.total_paid + amount_paid),
            credit_score: Some(policy.adjust(customer.credit_score, policy.payoff_bonus)),
            ..Default::default()
        }
    }

    /// a payoff undone by a payment reversal
    pub fn payoff_reversed(customer: &Customer, amount_paid: Money, policy: &CreditPolicy) -> Self {
        Self {
            total_paid: Some(customer.total_paid.saturating_sub(amount_paid)),
            credit_score: Some(policy.adjust(customer.credit_score, -policy.payoff_bonus)),
            ..Default::default()
        }
    }

    /// a loan lost to confiscation with `unpaid` still owed
    pub fn loan_defaulted(customer: &Customer, unpaid: Money, policy: &CreditPolicy) -> Self {
        Self {
            total_defaulted: Some(customer.total_defaulted + unpaid),
            credit_score: Some(policy.adjust(customer.credit_score, -policy.confiscation_penalty)),
            ..Default::default()
        }
    }

    pub fn apply_to(&self, customer: &mut Customer) {
        if let Some(total_loans) = self.total_loans {
            customer.total_loans = total_loans;
        }
        if let Some(total_defaulted) = self.total_defaulted {
            customer.total_defaulted = total_defaulted;
        }
        if let Some(total_paid) = self.total_paid {
            customer.total_paid = total_paid;
        }
        if let Some(credit_score) = self.credit_score {
            customer.credit_score = credit_score;
        }
    }
}

impl SideEffect {
    pub fn customer_id(&self) -> CustomerId {
        match self {
            SideEffect::CountLoanOpened { customer_id }
            | SideEffect::RecordPayoff { customer_id, .. }
            | SideEffect::ReversePayoff { customer_id, .. }
            | SideEffect::RecordDefault { customer_id, .. } => *customer_id,
        }
    }

    /// read the customer and write the matching aggregate update
    pub fn apply(&self, customers: &dyn CustomerStore, policy: &CreditPolicy) -> Result<()> {
        let id = self.customer_id();
        let customer = customers
            .get_customer(id)
            .map_err(LedgerError::persistence("load customer"))?
            .ok_or(LedgerError::CustomerNotFound { id })?;

        let update = match self {
            SideEffect::CountLoanOpened { .. } => CustomerAggregateUpdate::loan_opened(&customer),
            SideEffect::RecordPayoff { amount_paid, .. } => {
                CustomerAggregateUpdate::loan_paid_off(&customer, *amount_paid, policy)
            }
            SideEffect::ReversePayoff { amount_paid, .. } => {
                CustomerAggregateUpdate::payoff_reversed(&customer, *amount_paid, policy)
            }
            SideEffect::RecordDefault { unpaid, .. } => {
                CustomerAggregateUpdate::loan_defaulted(&customer, *unpaid, policy)
            }
        };

        customers
            .update_aggregates(id, &update)
            .map_err(LedgerError::persistence("update customer aggregates"))
    }
}

/// run a post-commit customer update; a failure is logged and emitted, never returned
pub(crate) fn record_side_effect(
    customers: &dyn CustomerStore,
    policy: &CreditPolicy,
    events: &mut EventStore,
    loan_id: LoanId,
    effect: SideEffect,
    now: DateTime<Utc>,
) {
    match effect.apply(customers, policy) {
        Ok(()) => debug!(%loan_id, ?effect, "customer aggregates updated"),
        Err(err) => {
            warn!(%loan_id, ?effect, error = %err, "customer aggregate update failed");
            events.emit(Event::SideEffectFailed {
                loan_id,
                effect,
                error: err.to_string(),
                timestamp: now,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn customer() -> Customer {
        Customer {
            id: Uuid::new_v4(),
            name: "Ana".to_string(),
            is_active: true,
            is_blocked: false,
            total_loans: 2,
            total_defaulted: Money::ZERO,
            total_paid: Money::from_major(100),
            credit_score: 600,
        }
    }

    #[test]
    fn test_eligibility() {
        let mut c = customer();
        assert!(c.can_take_loan());

        c.is_active = false;
        assert_eq!(c.loan_ineligibility(), Some("customer is inactive"));

        c.is_blocked = true;
        assert_eq!(c.loan_ineligibility(), Some("customer is blocked"));
    }

    #[test]
    fn test_partial_update_only_touches_supplied_fields() {
        let mut c = customer();
        let policy = CreditPolicy::default();

        let update = CustomerAggregateUpdate::loan_paid_off(&c, Money::from_major(880), &policy);
        update.apply_to(&mut c);

        assert_eq!(c.total_paid, Money::from_major(980));
        assert_eq!(c.credit_score, 600 + policy.payoff_bonus);
        assert_eq!(c.total_loans, 2);
        assert_eq!(c.total_defaulted, Money::ZERO);
    }

    #[test]
    fn test_reversed_payoff_takes_back_total_and_bonus() {
        let mut c = customer();
        let policy = CreditPolicy::default();

        let paid = Money::from_major(880);
        CustomerAggregateUpdate::loan_paid_off(&c, paid, &policy).apply_to(&mut c);
        CustomerAggregateUpdate::payoff_reversed(&c, paid, &policy).apply_to(&mut c);

        assert_eq!(c.total_paid, Money::from_major(100));
        assert_eq!(c.credit_score, 600);
    }

    #[test]
    fn test_default_penalty_is_clamped() {
        let mut c = customer();
        c.credit_score = 10;
        let policy = CreditPolicy::default();

        CustomerAggregateUpdate::loan_defaulted(&c, Money::from_major(500), &policy)
            .apply_to(&mut c);

        assert_eq!(c.total_defaulted, Money::from_major(500));
        assert_eq!(c.credit_score, policy.min_score);
    }
}
