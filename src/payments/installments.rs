use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::state::LoanInstallment;
use crate::types::LoanId;

/// `start` moved forward by whole calendar months, clamped to month end
pub fn add_months(start: DateTime<Utc>, months: u32) -> Result<DateTime<Utc>> {
    start
        .checked_add_months(Months::new(months))
        .ok_or_else(|| LedgerError::InvalidLoanTerms {
            message: format!("{} months after {} is out of range", months, start),
        })
}

/// even split of a loan into monthly installments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentSchedule {
    pub loan_id: LoanId,
    pub principal: Money,
    pub interest: Money,
    pub start_date: DateTime<Utc>,
    pub installments: Vec<LoanInstallment>,
}

impl InstallmentSchedule {
    /// build `count` installments due 1..=count months after `start_date`
    ///
    /// Each share is rounded to the cent on its own, so the schedule can
    /// fall short of (or exceed) the loan total by a few cents; see
    /// [`InstallmentSchedule::rounding_residue`].
    pub fn generate(
        loan_id: LoanId,
        principal: Money,
        interest: Money,
        start_date: DateTime<Utc>,
        count: u32,
    ) -> Result<Self> {
        if count == 0 {
            return Err(LedgerError::InvalidLoanTerms {
                message: "installment count must be at least 1".to_string(),
            });
        }

        let principal_share = principal.split_even(count);
        let interest_share = interest.split_even(count);

        let installments = (1..=count)
            .map(|sequence| {
                Ok(LoanInstallment {
                    loan_id,
                    sequence,
                    due_date: add_months(start_date, sequence)?,
                    principal_amount: principal_share,
                    interest_amount: interest_share,
                    total_amount: principal_share + interest_share,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            loan_id,
            principal,
            interest,
            start_date,
            installments,
        })
    }

    pub fn total_scheduled(&self) -> Money {
        self.installments.iter().map(|i| i.total_amount).sum()
    }

    /// loan total minus what the schedule collects
    pub fn rounding_residue(&self) -> Money {
        (self.principal + self.interest) - self.total_scheduled()
    }

    pub fn final_due_date(&self) -> Option<DateTime<Utc>> {
        self.installments.last().map(|i| i.due_date)
    }

    pub fn into_installments(self) -> Vec<LoanInstallment> {
        self.installments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[test]
    fn test_even_split_and_monthly_dates() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let schedule = InstallmentSchedule::generate(
            Uuid::new_v4(),
            Money::from_major(900),
            Money::from_major(90),
            start,
            3,
        )
        .unwrap();

        assert_eq!(schedule.installments.len(), 3);
        for (i, installment) in schedule.installments.iter().enumerate() {
            assert_eq!(installment.sequence, i as u32 + 1);
            assert_eq!(installment.principal_amount, Money::from_major(300));
            assert_eq!(installment.interest_amount, Money::from_major(30));
            assert_eq!(installment.total_amount, Money::from_major(330));
        }
        assert_eq!(
            schedule.final_due_date(),
            Some(Utc.with_ymd_and_hms(2024, 4, 15, 10, 0, 0).unwrap())
        );
        assert!(schedule.rounding_residue().is_zero());
    }

    #[test]
    fn test_remainder_is_not_redistributed() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let schedule = InstallmentSchedule::generate(
            Uuid::new_v4(),
            Money::from_major(1000),
            Money::from_major(100),
            start,
            3,
        )
        .unwrap();

        let last = schedule.installments.last().unwrap();
        assert_eq!(last.principal_amount, Money::from_decimal(dec!(333.33)));
        assert_eq!(last.interest_amount, Money::from_decimal(dec!(33.33)));
        assert_eq!(schedule.rounding_residue(), Money::from_decimal(dec!(0.02)));
    }

    #[test]
    fn test_month_end_clamps() {
        let start = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        assert_eq!(
            add_months(start, 1).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_zero_count_rejected() {
        let result = InstallmentSchedule::generate(
            Uuid::new_v4(),
            Money::from_major(100),
            Money::from_major(10),
            Utc::now(),
            0,
        );
        assert!(matches!(result, Err(LedgerError::InvalidLoanTerms { .. })));
    }
}
