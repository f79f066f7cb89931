//! Strongly-typed identifiers for stored records.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Column representation (bare hyphenated UUID).
            pub fn to_db(&self) -> String {
                self.0.hyphenated().to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                let uuid_str = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(uuid_str)?))
            }
        }
    };
}

define_id!(LicenseId, "lic");
define_id!(ActivationId, "act");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_license_id_display() {
        let id = LicenseId::new();
        assert!(id.to_string().starts_with("lic_"));
    }

    #[test]
    fn test_activation_id_parse_accepts_column_form() {
        let id = ActivationId::new();
        let from_display: ActivationId = id.to_string().parse().unwrap();
        let from_column: ActivationId = id.to_db().parse().unwrap();
        assert_eq!(id, from_display);
        assert_eq!(id, from_column);
    }
}
