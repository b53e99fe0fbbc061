//! Identifiers for billing documents
//!
//! Every identifier is a time-ordered UUID (v7) behind a newtype, so bill,
//! payment, and adjustment ids sort by creation and cannot be mixed up.
//! `Display` renders `PREFIX-uuid`; the store uses that form as document id.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// A string that is not an identifier of the expected kind
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("'{value}' is not a valid {kind} id")]
pub struct IdParseError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! billing_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Prefix used in the rendered form
            pub const PREFIX: &'static str = $prefix;

            /// Generates a fresh time-ordered identifier
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Wraps an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", Self::PREFIX, self.0)
            }
        }

        /// Accepts the rendered form or a bare UUID
        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bare = s
                    .strip_prefix(Self::PREFIX)
                    .and_then(|rest| rest.strip_prefix('-'))
                    .unwrap_or(s);
                Uuid::parse_str(bare).map(Self).map_err(|_| IdParseError {
                    kind: Self::PREFIX,
                    value: s.to_string(),
                })
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Uuid {
                id.0
            }
        }
    };
}

billing_id!(
    /// A customer's water service account
    AccountId,
    "ACC"
);
billing_id!(
    /// An issued bill
    BillId,
    "BILL"
);
billing_id!(
    /// A credit adjustment against a bill
    AdjustmentId,
    "ADJ"
);
billing_id!(
    /// A customer payment
    PaymentId,
    "PAY"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_prefix() {
        assert!(BillId::new().to_string().starts_with("BILL-"));
    }

    #[test]
    fn test_other_kind_prefix_is_rejected() {
        let bill = BillId::new().to_string();
        let err = bill.parse::<AccountId>().unwrap_err();
        assert_eq!(err.kind, "ACC");
    }
}
