//! Value object trait: equality by value, not identity.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values. To
/// "modify" one, construct a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

/// A percentage in the closed range `0..=100`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Percentage(Decimal);

impl ValueObject for Percentage {}

impl Percentage {
    pub const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

    pub fn new(value: Decimal) -> DomainResult<Self> {
        if value.is_sign_negative() || value > Self::HUNDRED {
            return Err(DomainError::validation(format!(
                "percentage must be within 0..=100 (got {value})"
            )));
        }
        Ok(Self(value))
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// `amount × pct / 100`.
    pub fn of(&self, amount: Decimal) -> Decimal {
        amount * self.0 / Self::HUNDRED
    }

    /// `amount × (1 − pct / 100)`.
    pub fn discount(&self, amount: Decimal) -> Decimal {
        amount * (Decimal::ONE - self.0 / Self::HUNDRED)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl TryFrom<Decimal> for Percentage {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Percentage::new(value)
    }
}

impl From<Percentage> for Decimal {
    fn from(value: Percentage) -> Self {
        value.0
    }
}

impl core::fmt::Display for Percentage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}%", self.0.normalize())
    }
}
