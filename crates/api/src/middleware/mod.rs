//! API middleware: a single extractor standing in for authentication
//! (§1 Non-goals — "authentication middleware, assumed to yield a
//! verified principal"). Everything downstream of the extractor is ordinary
//! access control (§7).

pub mod auth;

pub use auth::Principal;
