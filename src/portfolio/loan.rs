//! Loan entity and its derived-value calculators

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimulationError};
use crate::fund::Zone;

/// Index of a loan inside its portfolio
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LoanId(pub usize);

/// Lifecycle state of a loan at a given period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoanState {
    /// Origination period not reached yet
    Pending,
    Active,
    Exited,
    Defaulted,
}

/// Inputs for creating a loan
///
/// Exactly one of `loan_amount`, `property_value`, `ltv` may be omitted; it is
/// derived from the other two.
#[derive(Debug, Clone, Default)]
pub struct LoanTerms {
    pub loan_amount: Option<f64>,
    pub property_value: Option<f64>,
    pub ltv: Option<f64>,
    pub zone: Option<Zone>,
    pub interest_rate: f64,
    pub origination_fee_rate: f64,
    pub appreciation_rate: f64,
    pub appreciation_share_rate: f64,
    pub default_rate: f64,
    pub property_discount_rate: f64,
    pub origination_period: u32,
    pub expected_exit_period: u32,
    pub reinvested: bool,
    pub suburb_id: Option<String>,
    pub periods_per_year: u32,
}

/// One origination event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub loan_amount: f64,
    pub property_value: f64,
    pub ltv: f64,
    pub zone: Zone,
    pub interest_rate: f64,
    pub origination_fee_rate: f64,
    pub appreciation_rate: f64,
    pub appreciation_share_rate: f64,
    /// Annual probability of default at exit
    pub default_rate: f64,
    pub property_discount_rate: f64,
    pub origination_period: u32,
    pub expected_exit_period: u32,
    pub suburb_id: Option<String>,
    pub periods_per_year: u32,

    // Lifecycle state
    pub actual_exit_period: Option<u32>,
    pub is_default: bool,
    pub is_exited: bool,
    pub reinvested: bool,
    /// Property value carried forward period by period by the lifecycle engine
    pub current_property_value: f64,
}

fn check_unit_rate(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(SimulationError::InvalidLoan(format!("{} {} outside [0, 1]", name, value)));
    }
    Ok(())
}

impl Loan {
    /// Build a loan, deriving whichever of amount / value / LTV was omitted
    pub fn from_terms(id: LoanId, terms: LoanTerms) -> Result<Self> {
        let (loan_amount, property_value, ltv) = match (terms.loan_amount, terms.property_value, terms.ltv) {
            (Some(amount), Some(value), None) => (amount, value, if value > 0.0 { amount / value } else { f64::NAN }),
            (Some(amount), None, Some(ltv)) => (amount, if ltv > 0.0 { amount / ltv } else { f64::NAN }, ltv),
            (None, Some(value), Some(ltv)) => (value * ltv, value, ltv),
            (Some(amount), Some(value), Some(ltv)) => {
                if value > 0.0 && ((amount / value) - ltv).abs() > 1e-6 {
                    return Err(SimulationError::InvalidLoan(format!(
                        "inconsistent terms: amount {} / value {} != ltv {}",
                        amount, value, ltv
                    )));
                }
                (amount, value, ltv)
            }
            _ => {
                return Err(SimulationError::InvalidLoan(
                    "at least two of loan_amount, property_value, ltv are required".to_string(),
                ))
            }
        };

        if !(loan_amount.is_finite() && loan_amount > 0.0) {
            return Err(SimulationError::InvalidLoan(format!("loan amount {} must be positive", loan_amount)));
        }
        if !(property_value.is_finite() && property_value > 0.0) {
            return Err(SimulationError::InvalidLoan(format!(
                "property value {} must be positive",
                property_value
            )));
        }
        if !(ltv > 0.0 && ltv < 1.0) {
            return Err(SimulationError::InvalidLoan(format!("ltv {} outside (0, 1)", ltv)));
        }
        let zone = terms
            .zone
            .ok_or_else(|| SimulationError::InvalidLoan("zone is required".to_string()))?;
        check_unit_rate("interest_rate", terms.interest_rate)?;
        check_unit_rate("origination_fee_rate", terms.origination_fee_rate)?;
        check_unit_rate("appreciation_share_rate", terms.appreciation_share_rate)?;
        check_unit_rate("default_rate", terms.default_rate)?;
        check_unit_rate("property_discount_rate", terms.property_discount_rate)?;
        if !terms.appreciation_rate.is_finite() || terms.appreciation_rate <= -1.0 {
            return Err(SimulationError::InvalidLoan(format!(
                "appreciation rate {} must exceed -1",
                terms.appreciation_rate
            )));
        }
        if terms.expected_exit_period <= terms.origination_period {
            return Err(SimulationError::InvalidLoan(format!(
                "expected exit {} must follow origination {}",
                terms.expected_exit_period, terms.origination_period
            )));
        }
        if terms.periods_per_year == 0 {
            return Err(SimulationError::InvalidLoan("periods_per_year must be positive".to_string()));
        }

        Ok(Self {
            id,
            loan_amount,
            property_value,
            ltv,
            zone,
            interest_rate: terms.interest_rate,
            origination_fee_rate: terms.origination_fee_rate,
            appreciation_rate: terms.appreciation_rate,
            appreciation_share_rate: terms.appreciation_share_rate,
            default_rate: terms.default_rate,
            property_discount_rate: terms.property_discount_rate,
            origination_period: terms.origination_period,
            expected_exit_period: terms.expected_exit_period,
            suburb_id: terms.suburb_id,
            periods_per_year: terms.periods_per_year,
            actual_exit_period: None,
            is_default: false,
            is_exited: false,
            reinvested: terms.reinvested,
            current_property_value: property_value,
        })
    }

    pub fn state_at(&self, period: u32) -> LoanState {
        if period < self.origination_period {
            return LoanState::Pending;
        }
        match self.actual_exit_period {
            Some(exit) if period >= exit => {
                if self.is_default {
                    LoanState::Defaulted
                } else {
                    LoanState::Exited
                }
            }
            _ => LoanState::Active,
        }
    }

    pub fn is_active_at(&self, period: u32) -> bool {
        self.state_at(period) == LoanState::Active
    }

    /// Periods elapsed since origination (capped at the exit period once exited)
    pub fn periods_held(&self, period: u32) -> u32 {
        let end = match self.actual_exit_period {
            Some(exit) => period.min(exit),
            None => period,
        };
        end.saturating_sub(self.origination_period)
    }

    pub fn years_held(&self, period: u32) -> f64 {
        self.periods_held(period) as f64 / self.periods_per_year as f64
    }

    /// Simple interest earned in one period
    pub fn period_interest(&self) -> f64 {
        self.loan_amount * self.interest_rate / self.periods_per_year as f64
    }

    /// Simple interest accrued from origination to `period`
    pub fn accrued_interest(&self, period: u32) -> f64 {
        self.loan_amount * self.interest_rate * self.years_held(period)
    }

    pub fn origination_fee(&self) -> f64 {
        self.loan_amount * self.origination_fee_rate
    }

    /// Scheduled property value at `period`, compounding the per-period
    /// (annual / periods_per_year) appreciation rate
    pub fn property_value_at(&self, period: u32) -> f64 {
        let per_period = self.appreciation_rate / self.periods_per_year as f64;
        self.property_value * (1.0 + per_period).powi(self.periods_held(period) as i32)
    }

    /// Fund's share of price appreciation realised so far (never negative)
    pub fn appreciation_share(&self) -> f64 {
        self.appreciation_share_rate * (self.current_property_value - self.property_value).max(0.0)
    }

    /// Cash returned when the loan exits at `period`
    pub fn exit_value(&self, period: u32, recovery_rate: f64) -> f64 {
        if self.is_default {
            self.loan_amount * recovery_rate
        } else {
            self.loan_amount + self.accrued_interest(period) + self.appreciation_share()
        }
    }

    /// Fair value of the position at `period`: claim value capped by discounted collateral
    pub fn fair_value(&self, period: u32) -> f64 {
        match self.state_at(period) {
            LoanState::Pending | LoanState::Exited | LoanState::Defaulted => 0.0,
            LoanState::Active => {
                let claim = self.loan_amount + self.accrued_interest(period) + self.appreciation_share();
                let collateral = self.current_property_value * (1.0 - self.property_discount_rate);
                claim.min(collateral)
            }
        }
    }

    /// Flag the loan as exited; the exit must follow origination
    pub fn mark_exited(&mut self, period: u32, is_default: bool) -> Result<()> {
        if period <= self.origination_period {
            return Err(SimulationError::InvalidLoan(format!(
                "loan {} cannot exit in period {} (originated {})",
                self.id.0, period, self.origination_period
            )));
        }
        if self.is_exited {
            return Err(SimulationError::InvalidLoan(format!("loan {} already exited", self.id.0)));
        }
        self.actual_exit_period = Some(period);
        self.is_exited = true;
        self.is_default = is_default;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn terms() -> LoanTerms {
        LoanTerms {
            loan_amount: Some(200_000.0),
            ltv: Some(0.5),
            zone: Some(Zone::Green),
            interest_rate: 0.06,
            origination_fee_rate: 0.02,
            appreciation_rate: 0.05,
            appreciation_share_rate: 0.5,
            default_rate: 0.01,
            origination_period: 1,
            expected_exit_period: 4,
            periods_per_year: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_derives_missing_term() {
        let loan = Loan::from_terms(LoanId(0), terms()).unwrap();
        assert_relative_eq!(loan.property_value, 400_000.0);

        let from_value = Loan::from_terms(
            LoanId(1),
            LoanTerms {
                loan_amount: None,
                property_value: Some(400_000.0),
                ..terms()
            },
        )
        .unwrap();
        assert_relative_eq!(from_value.loan_amount, 200_000.0);

        let from_amount_value = Loan::from_terms(
            LoanId(2),
            LoanTerms {
                ltv: None,
                property_value: Some(400_000.0),
                ..terms()
            },
        )
        .unwrap();
        assert_relative_eq!(from_amount_value.ltv, 0.5);
    }

    #[test]
    fn test_rejects_invalid_terms() {
        let missing = LoanTerms {
            ltv: None,
            ..terms()
        };
        assert!(Loan::from_terms(LoanId(0), missing).is_err());

        let inconsistent = LoanTerms {
            property_value: Some(300_000.0),
            ..terms()
        };
        assert!(Loan::from_terms(LoanId(0), inconsistent).is_err());

        let bad_ltv = LoanTerms {
            ltv: Some(1.2),
            ..terms()
        };
        assert!(Loan::from_terms(LoanId(0), bad_ltv).is_err());

        let exit_before_origination = LoanTerms {
            expected_exit_period: 1,
            ..terms()
        };
        assert!(Loan::from_terms(LoanId(0), exit_before_origination).is_err());
    }

    #[test]
    fn test_state_transitions() {
        let mut loan = Loan::from_terms(LoanId(0), terms()).unwrap();
        assert_eq!(loan.state_at(0), LoanState::Pending);
        assert_eq!(loan.state_at(1), LoanState::Active);

        assert!(loan.mark_exited(1, false).is_err());
        loan.mark_exited(3, true).unwrap();
        assert_eq!(loan.state_at(2), LoanState::Active);
        assert_eq!(loan.state_at(3), LoanState::Defaulted);
        assert!(loan.mark_exited(4, false).is_err());
    }

    #[test]
    fn test_value_calculators() {
        let mut loan = Loan::from_terms(LoanId(0), terms()).unwrap();

        assert_relative_eq!(loan.period_interest(), 12_000.0);
        assert_relative_eq!(loan.accrued_interest(4), 36_000.0);
        assert_relative_eq!(loan.origination_fee(), 4_000.0);
        assert_relative_eq!(loan.property_value_at(3), 400_000.0 * 1.05f64.powi(2));

        loan.current_property_value = 440_000.0;
        assert_relative_eq!(loan.appreciation_share(), 20_000.0);
        assert_relative_eq!(loan.exit_value(4, 0.7), 200_000.0 + 36_000.0 + 20_000.0);

        loan.is_default = true;
        assert_relative_eq!(loan.exit_value(4, 0.7), 140_000.0);
    }

    #[test]
    fn test_fair_value_capped_by_discounted_collateral() {
        let mut loan = Loan::from_terms(
            LoanId(0),
            LoanTerms {
                ltv: Some(0.95),
                property_discount_rate: 0.1,
                ..terms()
            },
        )
        .unwrap();
        assert_eq!(loan.fair_value(0), 0.0);
        let collateral = loan.property_value * 0.9;
        assert_relative_eq!(loan.fair_value(3), collateral);

        loan.mark_exited(3, false).unwrap();
        assert_eq!(loan.fair_value(3), 0.0);
    }
}
