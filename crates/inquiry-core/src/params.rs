use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_YEAR: u32 = 1400;
pub const MAX_YEAR: u32 = 1499;
const MIN_RANDOM_NIN: u64 = 100_000_000;
const MAX_RANDOM_NIN: u64 = 999_999_999;

/// Input for one lookup call. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallParams {
    /// `YYYY-MM`, year in 1400..=1499
    pub date_string: String,
    /// National identification number, 9 or 10 decimal digits
    pub nin: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("date string must look like YYYY-MM (got {0:?})")]
    DateFormat(String),
    #[error("year {0} is outside 1400..=1499")]
    YearOutOfRange(u32),
    #[error("month {0} is outside 1..=12")]
    MonthOutOfRange(u32),
    #[error("nin must be 9 or 10 decimal digits (got {0:?})")]
    Nin(String),
}

impl CallParams {
    pub fn new(date_string: impl Into<String>, nin: impl Into<String>) -> Self {
        Self {
            date_string: date_string.into(),
            nin: nin.into(),
        }
    }

    /// Check the syntactic rules. Semantic validity is the API's business.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let (year, month) = self
            .date_string
            .split_once('-')
            .filter(|(y, m)| y.len() == 4 && m.len() == 2)
            .and_then(|(y, m)| Some((parse_digits(y)?, parse_digits(m)?)))
            .ok_or_else(|| ValidationError::DateFormat(self.date_string.clone()))?;

        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return Err(ValidationError::YearOutOfRange(year));
        }
        if !(1..=12).contains(&month) {
            return Err(ValidationError::MonthOutOfRange(month));
        }

        let nin_ok = (9..=10).contains(&self.nin.len()) && self.nin.bytes().all(|b| b.is_ascii_digit());
        if !nin_ok {
            return Err(ValidationError::Nin(self.nin.clone()));
        }

        Ok(())
    }
}

fn parse_digits(s: &str) -> Option<u32> {
    if s.bytes().all(|b| b.is_ascii_digit()) {
        s.parse().ok()
    } else {
        None
    }
}

/// How calls after the canary get their parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamStrategy {
    /// Uniformly random fuzz inputs; most are expected to be rejected.
    #[default]
    Randomized,
    /// Every call reuses the canary parameters.
    RepeatCanary,
}

/// Produces fuzz parameters. Seeded generators are reproducible.
#[derive(Debug, Clone)]
pub struct ParamGenerator {
    rng: StdRng,
}

impl ParamGenerator {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    pub fn next_params(&mut self) -> CallParams {
        let year = self.rng.gen_range(MIN_YEAR..=MAX_YEAR);
        let month = self.rng.gen_range(1..=12u32);
        let nin = self.rng.gen_range(MIN_RANDOM_NIN..=MAX_RANDOM_NIN);
        CallParams {
            date_string: format!("{year:04}-{month:02}"),
            nin: nin.to_string(),
        }
    }
}

/// Hands out parameters for call ids 1..=N: the canary first, then
/// whatever the strategy dictates.
#[derive(Debug)]
pub struct ParamPlan {
    canary: CallParams,
    strategy: ParamStrategy,
    generator: ParamGenerator,
}

impl ParamPlan {
    pub fn new(canary: CallParams, strategy: ParamStrategy, seed: Option<u64>) -> Self {
        Self {
            canary,
            strategy,
            generator: ParamGenerator::new(seed),
        }
    }

    pub fn params_for(&mut self, id: u64) -> CallParams {
        if id == 1 || self.strategy == ParamStrategy::RepeatCanary {
            return self.canary.clone();
        }
        self.generator.next_params()
    }
}
