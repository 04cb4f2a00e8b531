//! Password reset: opaque single-use tokens, their storage and the HTTP flow.

use crate::state::AppState;
use axum::Router;

pub mod handlers;
pub mod memory;
pub mod service;
pub mod store;
pub mod token;

pub use service::{ResetError, ResetManager, ResetSettings};

pub fn router() -> Router<AppState> {
    handlers::reset_routes()
}
