//! Error types for Ezri core types.

/// Errors that can occur when parsing a stored or transmitted enum value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The string does not name any variant of the enum.
    #[error("unknown {kind}: {value}")]
    UnknownVariant {
        /// Human-readable name of the enum being parsed.
        kind: &'static str,
        /// The rejected input.
        value: String,
    },
}
