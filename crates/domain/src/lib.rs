// ============================================================================
// Domain Layer - Core Entities
// ============================================================================
//
// This crate contains the technology-agnostic entities shared by every other
// Chronicle crate: sessions, audio chunks, transcription results,
// conversations (with their versioned transcript/memory history), and jobs.
//
// It has no I/O of its own — no Redis, no Postgres, no HTTP. Those live in
// `streambus`, `database`, and `api` respectively, all of which depend on
// this crate for their shared vocabulary.

pub mod conversation;
pub mod errors;
pub mod job;
pub mod session;
pub mod transcription;

pub use conversation::*;
pub use errors::*;
pub use job::*;
pub use session::*;
pub use transcription::*;
