//! # steward-id
//!
//! Stable ID types, parsing, and validation for the steward engine.
//!
//! ## Design Principles
//!
//! - IDs are stable and system-generated; names are user-controlled labels
//! - All IDs have a canonical string representation with strict parsing
//! - IDs support roundtrip serialization (parse → format → parse)
//! - IDs are typed to prevent mixing different resource types
//!
//! ## ID Format
//!
//! All IDs use a prefixed format: `{prefix}_{ulid}`
//!
//! Examples:
//! - `res_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `req_01HV4Z3MXNKPQR9HSTZ7WCLD4E`
//!
//! This format provides:
//! - Type safety (prefix indicates what the ID refers to)
//! - Sortability (ULID is time-ordered)
//! - Uniqueness (ULID has 80 bits of randomness)
//! - Human readability (clear prefixes)

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
