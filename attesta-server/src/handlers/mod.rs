//! HTTP request handlers
//!
//! One handler per ceremony endpoint plus health.

pub mod assertion;
pub mod attestation;
pub mod health;

pub use crate::state::AppState;
pub use assertion::{assertion_options_handler, assertion_result_handler};
pub use attestation::{attestation_options_handler, attestation_result_handler};
pub use health::{health, HealthResponse};
