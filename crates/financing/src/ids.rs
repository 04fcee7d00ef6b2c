//! Record identifiers for the financing workflow.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use scf_core::{AggregateId, DomainError};

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub AggregateId);

        impl $name {
            pub fn new(id: AggregateId) -> Self {
                Self(id)
            }

            /// Fresh time-ordered identifier.
            pub fn generate() -> Self {
                Self(AggregateId::new())
            }

            pub fn as_uuid(&self) -> uuid::Uuid {
                *self.0.as_uuid()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<AggregateId>().map(Self).map_err(|_| {
                    DomainError::invalid_id(format!("{}: '{}'", stringify!($name), s))
                })
            }
        }

        impl From<uuid::Uuid> for $name {
            fn from(value: uuid::Uuid) -> Self {
                Self(AggregateId::from_uuid(value))
            }
        }

        impl From<$name> for uuid::Uuid {
            fn from(value: $name) -> Self {
                value.as_uuid()
            }
        }
    };
}

record_id!(
    /// Invoice identifier.
    InvoiceId
);
record_id!(
    /// Discount offer identifier.
    OfferId
);
record_id!(
    /// Financier bid identifier.
    BidId
);
record_id!(DisbursementId);
record_id!(RepaymentId);
record_id!(ContractId);
record_id!(
    /// Bank account registered by a buyer entity (owned by an external collaborator).
    BankAccountId
);
