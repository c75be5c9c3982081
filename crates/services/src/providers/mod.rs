pub mod mock;
pub mod ports;

pub use ports::{
    BatchTranscription, BatchTranscriptionProvider, DiarizationProvider, LLMClient, MemoryProvider, MemoryRecord, ProviderError,
    SpeakerRecognitionService, StreamingPartial, StreamingTranscriptionProvider,
};
