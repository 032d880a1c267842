//! Wire-format types for the three supported protocols
//!
//! Pure serde shapes; all conversion logic lives in [`crate::convert`].

pub mod anthropic;
pub mod chat;
pub mod responses;
