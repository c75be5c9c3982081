use serde::{Deserialize, Serialize};

/// A single word with timing and confidence, as emitted by a
/// `StreamingTranscriptionProvider` or `BatchTranscriptionProvider` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Word {
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub confidence: f32,
}

/// A labeled stretch of transcript, optionally attributed to a speaker.
/// `speaker` is always a string (§9: no legacy int coercion).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub speaker: Option<String>,
    pub text: String,
    pub confidence: Option<f32>,
}

/// §3 TranscriptionResult — one entry appended to the result stream per
/// final emission from the Live Transcription Worker (§4.D).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub text: String,
    pub words: Vec<Word>,
    pub segments: Vec<Segment>,
    pub chunk_count_at_emission: u64,
}

/// §4.E Results Aggregator output — the merged view of all transcription
/// results produced so far for a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Aggregate {
    pub text: String,
    pub words: Vec<Word>,
    pub segments: Vec<Segment>,
    pub chunk_count: u64,
}

impl Aggregate {
    pub fn word_count(&self) -> usize {
        if self.words.is_empty() {
            self.text.split_whitespace().count()
        } else {
            self.words.len()
        }
    }

    pub fn speakers(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for seg in &self.segments {
            if let Some(speaker) = &seg.speaker {
                if !seen.contains(speaker) {
                    seen.push(speaker.clone());
                }
            }
        }
        seen
    }

    pub fn duration_seconds(&self) -> f64 {
        self.words
            .last()
            .map(|w| w.end)
            .or_else(|| self.segments.last().map(|s| s.end))
            .unwrap_or(0.0)
    }
}
