//! Domain validation errors for core domain types.
//!
//! These errors are returned by validating constructors and by the pure
//! calculation functions (ladder, position aggregation) when an input
//! violates a domain rule.

use thiserror::Error;

/// Errors that occur when domain invariants are violated.
#[derive(Error, Debug, Clone)]
pub enum DomainError {
    /// Prices used as divisors or anchors must be positive.
    #[error("price must be positive, got {price}")]
    NonPositivePrice {
        /// The invalid price that was provided.
        price: rust_decimal::Decimal,
    },

    /// Order sizes and increments must be positive.
    #[error("{field} must be positive, got {value}")]
    NonPositiveValue {
        /// Which bot/ladder field was invalid.
        field: &'static str,
        /// The invalid value that was provided.
        value: rust_decimal::Decimal,
    },

    /// Position aggregation over an empty (zero-quantity) fill set.
    #[error("cannot aggregate a position with zero total quantity")]
    EmptyPosition,

    /// A filled order is missing the price needed for cost weighting.
    #[error("filled order {order_id} has no fill price")]
    MissingFillPrice {
        /// The offending order.
        order_id: String,
    },

    /// Deal state machine transition that is not allowed.
    #[error("invalid deal transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: &'static str,
        /// Requested status.
        to: &'static str,
    },
}
