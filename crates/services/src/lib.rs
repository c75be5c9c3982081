//! Components C-I of §2/§4: the Audio Persistence Worker, Live
//! Transcription Worker, Results Aggregator, Speech-Detection Controller,
//! Conversation Controller, and the post-processing job chain, plus the
//! provider ports they depend on (§6) and the `Runtime` that wires them
//! together (§9). One submodule per component, `ports.rs` for traits/
//! errors, `mod.rs` for the implementation.

pub mod aggregator;
pub mod audio_persistence;
pub mod conversation_controller;
pub mod jobs;
pub mod live_transcription;
pub mod providers;
pub mod runtime;
pub mod speech_detection;
pub mod storage_paths;

pub use runtime::Runtime;
