use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{
    CustomerId, ItemId, ItemStatus, LoanId, LoanStatus, PaymentBreakdown, PaymentId,
};

/// all events that can be emitted by the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // lifecycle events
    LoanCreated {
        loan_id: LoanId,
        loan_number: String,
        customer_id: CustomerId,
        item_id: ItemId,
        amount: Money,
        interest_amount: Money,
        due_date: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    LoanRenewed {
        source_loan_id: LoanId,
        new_loan_id: LoanId,
        new_loan_number: String,
        principal_carried: Money,
        renewal_count: u32,
        timestamp: DateTime<Utc>,
    },
    LoanConfiscated {
        loan_id: LoanId,
        item_id: ItemId,
        unpaid_balance: Money,
        timestamp: DateTime<Utc>,
    },
    LoanPaidOff {
        loan_id: LoanId,
        total_paid: Money,
        timestamp: DateTime<Utc>,
    },

    // payment events
    PaymentApplied {
        loan_id: LoanId,
        payment_id: PaymentId,
        amount: Money,
        breakdown: PaymentBreakdown,
        remaining_balance: Money,
        timestamp: DateTime<Utc>,
    },
    OverpaymentAbsorbed {
        loan_id: LoanId,
        payment_id: PaymentId,
        excess: Money,
        timestamp: DateTime<Utc>,
    },
    PaymentReversed {
        loan_id: LoanId,
        payment_id: PaymentId,
        amount: Money,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    // delinquency events
    LateFeeAssessed {
        loan_id: LoanId,
        fee_amount: Money,
        days_overdue: i64,
        timestamp: DateTime<Utc>,
    },

    // status change events
    StatusChanged {
        loan_id: LoanId,
        old_status: LoanStatus,
        new_status: LoanStatus,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    ItemStatusChanged {
        item_id: ItemId,
        old_status: ItemStatus,
        new_status: ItemStatus,
        timestamp: DateTime<Utc>,
    },

    /// a best-effort step after commit did not happen and needs replaying
    SideEffectFailed {
        loan_id: LoanId,
        effect: SideEffect,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

/// best-effort follow-ups run after a unit of work commits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SideEffect {
    CountLoanOpened { customer_id: CustomerId },
    RecordPayoff { customer_id: CustomerId, amount_paid: Money },
    /// takes back a `RecordPayoff` whose payoff was reversed
    ReversePayoff { customer_id: CustomerId, amount_paid: Money },
    RecordDefault { customer_id: CustomerId, unpaid: Money },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// side effects still waiting to be replayed
    pub fn failed_side_effects(&self) -> impl Iterator<Item = &SideEffect> {
        self.events.iter().filter_map(|event| match event {
            Event::SideEffectFailed { effect, .. } => Some(effect),
            _ => None,
        })
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
