use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// The raw integer value.
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = TypeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<u64>()
                    .map(Self)
                    .map_err(|e| TypeError::InvalidId(format!("{}: {e}", $label)))
            }
        }
    };
}

id_type!(
    /// Identifier of a platform user (player, provider, or studio owner).
    UserId,
    "user"
);

id_type!(
    /// Identifier of a studio. [`StudioId::INDEPENDENT`] marks a balance held
    /// with a provider outside any studio.
    StudioId,
    "studio"
);

id_type!(
    /// Identifier of a stored balance row.
    BalanceId,
    "balance"
);

id_type!(
    /// Identifier of a transaction log entry.
    TransactionId,
    "txn"
);

id_type!(
    /// Identifier of a provider↔studio relationship.
    RelationId,
    "relation"
);

impl StudioId {
    /// Studio id used for providers that are not affiliated with a studio.
    pub const INDEPENDENT: StudioId = StudioId(0);

    /// Returns `true` for the independent-provider sentinel.
    pub fn is_independent(self) -> bool {
        self == Self::INDEPENDENT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_parse_and_display() {
        let id: UserId = " 42 ".parse().unwrap();
        assert_eq!(id, UserId(42));
        assert_eq!(id.to_string(), "42");
        assert_eq!(format!("{id:?}"), "user#42");
    }

    #[test]
    fn bad_id_is_rejected() {
        let err = "abc".parse::<BalanceId>().unwrap_err();
        assert!(matches!(err, TypeError::InvalidId(msg) if msg.starts_with("balance")));
    }

    #[test]
    fn independent_studio_is_zero() {
        assert!(StudioId::default().is_independent());
        assert!(!StudioId(2).is_independent());
    }

    #[test]
    fn ids_serialize_as_bare_integers() {
        let json = serde_json::to_string(&TransactionId(9)).unwrap();
        assert_eq!(json, "9");
    }
}
