//! Protocol switch and provider pipeline for the crossbar gateway
//!
//! One canonical request/response form, three wire protocols
//! (chat-completions, responses, anthropic messages), six codecs between
//! them, and the machinery that carries a request from classification
//! through credential selection to an upstream call and back — including
//! SSE translation in both directions.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc, clippy::missing_panics_doc)]

pub mod convert;
pub mod error;
#[cfg(feature = "http")]
pub mod handler;
pub mod pipeline;
pub mod protocol;
pub mod provider;
pub mod router;
pub mod sessions;
pub mod state;
pub mod stream;
pub mod toolset;
pub mod types;

pub use error::GatewayError;
#[cfg(feature = "http")]
pub use handler::gateway_router;
pub use router::{RoutingDecision, VirtualRouter};
pub use state::GatewayState;
pub use types::{CanonicalRequest, CanonicalResponse, StreamEvent};
