/// pawn lifecycle - pledge an item, pay, fall behind, renew and confiscate
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use pawn_ledger::{
    ApplyPaymentRequest, CreateLoanRequest, LedgerConfig, LedgerStores, LoanManager, MemoryStore,
    Money, PaymentLedger, PaymentMethod, Rate, RenewLoanRequest, SafeTimeProvider, TimeSource,
    Uuid,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("=== pawn lifecycle example ===\n");

    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
    ));
    let controller = time.test_control().unwrap();

    let store = Arc::new(MemoryStore::new());
    let stores = LedgerStores::in_memory(store.clone());
    let config = LedgerConfig::standard();
    let mut loans = LoanManager::new(stores.clone(), config.clone());
    let mut payments = PaymentLedger::new(stores, config);

    let branch = Uuid::new_v4();
    let clerk = Uuid::new_v4();
    let customer = store.seed_customer("Maria")?;
    let ring = store.seed_item(branch, "18k gold ring", Money::from_major(1_000), &time)?;
    let guitar = store.seed_item(branch, "acoustic guitar", Money::from_major(400), &time)?;

    // quote first, then open the loan
    let request = CreateLoanRequest::builder()
        .customer(customer.id)
        .item(ring.id)
        .branch(branch)
        .amount(Money::from_major(800))
        .rate(Rate::from_percentage(10))
        .term_days(30)
        .created_by(clerk)
        .build()?;
    let quote = loans.calculate(&request, &time)?;
    println!(
        "quote: interest {} total {} due {}",
        quote.interest_amount,
        quote.total_amount,
        quote.due_date.format("%Y-%m-%d")
    );

    let ring_loan = loans.create_loan(request, &time)?.loan;
    println!("opened {} against the ring", ring_loan.loan_number);

    // partial payment, then renew the rest
    controller.advance(Duration::days(25));
    let paid = payments.apply_payment(
        ApplyPaymentRequest {
            loan_id: ring_loan.id,
            amount: Money::from_major(280),
            method: PaymentMethod::Cash,
            received_by: clerk,
            branch_id: branch,
        },
        &time,
    )?;
    println!(
        "paid 280: interest {} principal {} remaining {}",
        paid.payment.breakdown.interest_amount,
        paid.payment.breakdown.principal_amount,
        paid.remaining_balance
    );

    let renewal = loans.renew_loan(
        RenewLoanRequest {
            loan_id: ring_loan.id,
            new_term_days: 30,
            new_interest_rate: None,
            require_interest_paid: true,
            renewed_by: clerk,
        },
        &time,
    )?;
    println!(
        "renewed into {} for {}",
        renewal.renewed.loan_number, renewal.renewed.loan_amount
    );

    // guitar loan goes unpaid
    let guitar_loan = loans
        .create_loan(
            CreateLoanRequest::builder()
                .customer(customer.id)
                .item(guitar.id)
                .branch(branch)
                .amount(Money::from_major(300))
                .rate(Rate::from_percentage(12))
                .term_days(30)
                .created_by(clerk)
                .build()?,
            &time,
        )?
        .loan;

    controller.advance(Duration::days(40));
    let report = loans.sweep_overdue(branch, &time)?;
    println!("sweep: {} overdue, {} defaulted", report.marked_overdue, report.marked_defaulted);

    controller.advance(Duration::days(20));
    let report = loans.sweep_overdue(branch, &time)?;
    println!("sweep: {} overdue, {} defaulted", report.marked_overdue, report.marked_defaulted);

    let confiscated = loans.confiscate_loan(guitar_loan.id, clerk, "no contact", &time)?;
    println!(
        "confiscated {} with {} unpaid",
        confiscated.loan.loan_number, confiscated.unpaid_balance
    );

    println!("\nrenewed loan:");
    println!("{}", loans.loan_view(renewal.renewed.id, &time)?.to_json_pretty());

    println!("\nevents:");
    for event in loans.take_events().into_iter().chain(payments.take_events()) {
        println!("  {:?}", event);
    }

    Ok(())
}
