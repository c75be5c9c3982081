//! HTTP and duplex-audio surface (§6). Wires a `services::Runtime` into
//! axum routes: the duplex audio protocol, batch upload, and conversation
//! CRUD/versioning/reprocess endpoints. Authentication itself is out of
//! scope — `middleware::Principal` trusts headers an upstream authenticating
//! proxy is assumed to have already verified.

pub mod middleware;
pub mod models;
pub mod routes;

use services::Runtime;

/// Shared axum state. `Runtime` is itself cheap to clone (every field is an
/// `Arc` or plain config), so route handlers hold their own copy rather than
/// wrapping it in another `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Runtime,
}

impl AppState {
    pub fn new(runtime: Runtime) -> Self {
        Self { runtime }
    }
}
