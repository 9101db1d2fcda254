//! Messages flowing along worker graph edges.
//!
//! A [`Message`] is either `Data` (an audio chunk, a transcript, or a
//! structured command) or `Control` (silence / turn-end / end-of-stream /
//! error signals). Messages are immutable once sent; audio samples sit
//! behind an `Arc` so fan-out clones share the buffer.

use crate::config::ParamValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A chunk of audio flowing through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioChunk {
    /// PCM samples (16-bit signed integers, mono).
    pub samples: Arc<Vec<i16>>,
    /// Capture time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Sequence number for ordering and gap detection.
    pub sequence: u64,
}

impl AudioChunk {
    /// Creates a new audio chunk stamped with the current time.
    pub fn new(samples: Vec<i16>, sequence: u64) -> Self {
        Self {
            samples: Arc::new(samples),
            timestamp_ms: now_ms(),
            sequence,
        }
    }

    /// Creates a chunk with an explicit timestamp.
    pub fn with_timestamp(samples: Vec<i16>, timestamp_ms: u64, sequence: u64) -> Self {
        Self {
            samples: Arc::new(samples),
            timestamp_ms,
            sequence,
        }
    }

    /// Number of samples in this chunk.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the chunk carries no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// A timed segment within a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// Transcribed text produced by an accumulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    /// Per-segment timestamps, when the backend provides them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<Segment>,
    /// Timestamp of the first audio chunk in the transcribed unit.
    pub timestamp_ms: u64,
}

impl Transcript {
    pub fn new(text: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            text: text.into(),
            segments: Vec::new(),
            timestamp_ms,
        }
    }
}

/// Data payload of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Audio(AudioChunk),
    Transcript(Transcript),
    /// Structured command addressed to downstream workers.
    Command {
        name: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        args: BTreeMap<String, ParamValue>,
    },
}

/// Control signal carried along an edge.
///
/// Control messages are never dropped by backpressure; they carry
/// shutdown, error and turn semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    /// The gate observed a run of silent chunks.
    SilenceSignal,
    /// Explicit conversational turn boundary.
    TurnEnd,
    /// No more data will follow on this edge.
    EndOfStream,
    /// An upstream worker failed.
    Error { worker: String, message: String },
}

/// A tagged message flowing along an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Message {
    Data(Payload),
    Control(Signal),
}

impl Message {
    /// Wraps an audio chunk as a data message.
    pub fn audio(chunk: AudioChunk) -> Self {
        Message::Data(Payload::Audio(chunk))
    }

    /// Wraps a transcript as a data message.
    pub fn transcript(transcript: Transcript) -> Self {
        Message::Data(Payload::Transcript(transcript))
    }

    /// Returns true for control messages.
    pub fn is_control(&self) -> bool {
        matches!(self, Message::Control(_))
    }

    /// Borrows the audio chunk if this is an audio data message.
    pub fn as_audio(&self) -> Option<&AudioChunk> {
        match self {
            Message::Data(Payload::Audio(chunk)) => Some(chunk),
            _ => None,
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
