//! Stream Bus (§4.A) and Audio Session Registry (§4.B).
//!
//! Two Redis-backed primitives that decouple the producers (the connection
//! handler) from the consumers (persistence worker, transcription worker,
//! speech-detection/conversation controllers): an append-only ordered log
//! with consumer-group semantics, and a keyed map of session state plus the
//! handful of signaling keys components use to hand off work to each other.
//!
//! Both are specified as ports (`ports` submodules) with a Redis adapter
//! for production and an in-memory adapter (`Memory*`) for unit tests.

pub mod session_registry;
pub mod stream_bus;

pub use session_registry::ports::{SessionRegistry, SessionRegistryError};
pub use session_registry::{MemorySessionRegistry, RedisSessionRegistry};
pub use stream_bus::ports::{StreamBus, StreamBusError, StreamEntry, StreamName};
pub use stream_bus::{MemoryStreamBus, RedisStreamBus};
