//! Domain identifier types with proper encapsulation.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(format!("{}-{}", $prefix, Uuid::new_v4()))
            }

            /// Wrap an existing identifier (e.g. loaded from the store).
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the ID as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }
    };
}

uuid_id!(
    /// Bot identifier - newtype for type safety.
    BotId,
    "bot"
);

uuid_id!(
    /// Deal identifier - one DCA cycle for a bot.
    DealId,
    "deal"
);

uuid_id!(
    /// Local order identifier (distinct from the exchange-assigned one).
    OrderId,
    "ord"
);

/// Order identifier assigned by the exchange gateway.
///
/// The inner String is private to ensure all construction goes through
/// the defined constructors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalOrderId(String);

impl ExternalOrderId {
    /// Create a new `ExternalOrderId` from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ExternalOrderId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for ExternalOrderId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_and_prefixed() {
        let a = DealId::generate();
        let b = DealId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("deal-"));
        assert!(BotId::generate().as_str().starts_with("bot-"));
        assert!(OrderId::generate().as_str().starts_with("ord-"));
    }

    #[test]
    fn external_id_roundtrips_through_display() {
        let id = ExternalOrderId::new("12345");
        assert_eq!(id.to_string(), "12345");
        assert_eq!(ExternalOrderId::from("12345"), id);
    }
}
