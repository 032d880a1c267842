//! Shared primitives for the crossbar gateway
//!
//! Types that cross crate boundaries: the per-request envelope, the wire
//! protocol marker, request-id issuance, and the `HttpError` trait that
//! keeps domain errors decoupled from the HTTP layer.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc, clippy::missing_panics_doc)]

pub mod context;
pub mod error;

pub use context::{RequestEnvelope, RequestIdSource, WireProtocol};
pub use error::HttpError;
