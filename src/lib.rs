pub mod collateral;
pub mod config;
pub mod customer;
pub mod decimal;
pub mod errors;
pub mod events;
pub mod loans;
pub mod payments;
pub mod state;
pub mod store;
pub mod types;

// re-export key types
pub use collateral::{is_valid_status_transition, Item, ItemHistoryRecord, ItemStateMachine};
pub use config::{CreditPolicy, LedgerConfig};
pub use customer::{Customer, CustomerAggregateUpdate};
pub use decimal::{Money, Rate};
pub use errors::{ErrorKind, LedgerError, Result};
pub use events::{Event, EventStore, SideEffect};
pub use loans::{
    CreateLoanRequest, CreatedLoan, LoanManager, LoanQuote, LoanView, OverdueSweepReport,
    RenewLoanRequest, RenewalResult,
};
pub use payments::{
    allocate, ApplyPaymentRequest, InstallmentSchedule, Payment, PaymentLedger, PaymentResult,
    PaymentSummary,
};
pub use state::{Loan, LoanInstallment};
pub use store::{LedgerStores, MemoryStore, StoreError};
pub use types::{
    ActorId, BranchId, CustomerId, ItemId, ItemStatus, LoanId, LoanStatus, PaymentBreakdown,
    PaymentId, PaymentMethod, PaymentPlanType, PaymentStatus,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
