use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::decimal::Rate;
use crate::errors::{LedgerError, Result};

/// ledger configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// grace period used when a request does not carry one
    pub default_grace_period_days: u32,
    /// late fee rate used when a request does not carry one
    pub default_late_fee_rate: Rate,
    pub max_installments: u32,
    pub max_term_days: u32,
    /// attempts per operation before a version conflict is reported
    pub max_update_attempts: u32,
    pub credit_policy: CreditPolicy,
}

/// how loan outcomes move a customer's credit score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditPolicy {
    pub min_score: i32,
    pub max_score: i32,
    pub payoff_bonus: i32,
    pub confiscation_penalty: i32,
}

impl CreditPolicy {
    /// shift a score, clamped to the policy bounds
    pub fn adjust(&self, score: i32, delta: i32) -> i32 {
        score.saturating_add(delta).clamp(self.min_score, self.max_score)
    }
}

impl Default for CreditPolicy {
    fn default() -> Self {
        Self {
            min_score: 0,
            max_score: 1000,
            payoff_bonus: 10,
            confiscation_penalty: 50,
        }
    }
}

impl LedgerConfig {
    /// typical pawnshop terms: 30 day loans, 15 day grace, 5% late fee
    pub fn standard() -> Self {
        Self {
            default_grace_period_days: 15,
            default_late_fee_rate: Rate::from_percent(dec!(5)),
            max_installments: 12,
            max_term_days: 365,
            max_update_attempts: 3,
            credit_policy: CreditPolicy::default(),
        }
    }

    /// parse and validate; every field is required
    pub fn from_json(json: &str) -> Result<Self> {
        let config: LedgerConfig = serde_json::from_str(json).map_err(|e| {
            LedgerError::InvalidConfiguration { message: e.to_string() }
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_update_attempts == 0 {
            return Err(LedgerError::InvalidConfiguration {
                message: "max_update_attempts must be at least 1".to_string(),
            });
        }
        if self.max_installments == 0 || self.max_term_days == 0 {
            return Err(LedgerError::InvalidConfiguration {
                message: "installment and term limits must be positive".to_string(),
            });
        }
        if self.default_late_fee_rate.is_negative() {
            return Err(LedgerError::InvalidConfiguration {
                message: format!("negative late fee rate {}", self.default_late_fee_rate),
            });
        }
        let policy = &self.credit_policy;
        if policy.min_score > policy.max_score {
            return Err(LedgerError::InvalidConfiguration {
                message: format!(
                    "credit score bounds inverted: {} > {}",
                    policy.min_score, policy.max_score
                ),
            });
        }
        Ok(())
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_config_is_valid() {
        assert!(LedgerConfig::standard().validate().is_ok());
    }

    #[test]
    fn test_json_round_trip_keeps_rates() {
        let config = LedgerConfig::standard();
        let json = serde_json::to_string(&config).unwrap();
        let parsed = LedgerConfig::from_json(&json).unwrap();

        assert_eq!(parsed.default_late_fee_rate, Rate::from_percentage(5));
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let mut config = LedgerConfig::standard();
        config.max_update_attempts = 0;

        assert!(matches!(
            config.validate(),
            Err(LedgerError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(LedgerConfig::from_json("{\"max_installments\": 3}").is_err());
    }

    #[test]
    fn test_credit_adjust_clamps() {
        let policy = CreditPolicy::default();
        assert_eq!(policy.adjust(995, 10), 1000);
        assert_eq!(policy.adjust(20, -50), 0);
        assert_eq!(policy.adjust(500, 10), 510);
    }
}
