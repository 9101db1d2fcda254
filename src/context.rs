//! Context accumulator: turns gated audio chunks into transcription-ready
//! units and runs them through a [`Transcriber`].
//!
//! Two strategies, selected by configuration:
//!
//! - **prefix**: every chunk is transcribed as it arrives, with the trailing
//!   fraction of the previous chunk prepended for acoustic continuity and,
//!   optionally, the previous transcription passed as a decoding hint.
//! - **buffer**: chunks accumulate in a bounded queue and are transcribed as
//!   one unit when a silence or turn boundary arrives.

use crate::config::ResolvedParams;
use crate::defaults;
use crate::error::{Result, VoxflowError};
use crate::message::{AudioChunk, Message, Payload, Segment, Signal, Transcript};
use crate::runtime::router::Outbox;
use crate::runtime::worker::{BuildCtx, Worker, WorkerError, WorkerRegistry};
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Output of one transcription call.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub text: String,
    pub segments: Vec<Segment>,
}

/// Speech-to-text capability.
pub trait Transcriber: Send {
    /// Transcribes one unit of audio. `prior_text` is a decoding hint from
    /// the previous unit, when the strategy carries one.
    fn transcribe(&mut self, samples: &[i16], prior_text: Option<&str>) -> Result<Transcription>;
}

/// Canned transcriber for tests and dry runs: replays a script, then
/// repeats its last line.
pub struct MockTranscriber {
    script: Vec<String>,
    next: usize,
}

impl MockTranscriber {
    pub fn new(script: Vec<String>) -> Self {
        Self { script, next: 0 }
    }

    pub fn fixed(text: impl Into<String>) -> Self {
        Self::new(vec![text.into()])
    }
}

impl Transcriber for MockTranscriber {
    fn transcribe(&mut self, _samples: &[i16], _prior_text: Option<&str>) -> Result<Transcription> {
        let idx = self.next.min(self.script.len().saturating_sub(1));
        self.next += 1;
        let text = self
            .script
            .get(idx)
            .cloned()
            .ok_or_else(|| VoxflowError::Capability {
                message: "mock transcriber has an empty script".to_string(),
            })?;
        Ok(Transcription {
            text,
            segments: Vec::new(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextMode {
    Prefix,
    Buffer,
}

/// Carried state of prefix mode: one tail and one prior text, overwritten
/// on every passed chunk.
struct PrefixState {
    tail: Vec<i16>,
    tail_timestamp_ms: u64,
    prior_text: Option<String>,
}

/// The `asr` worker.
pub struct AsrWorker {
    transcriber: Box<dyn Transcriber>,
    mode: ContextMode,
    prefix_ratio: f32,
    prefix_text: bool,
    max_gap_ms: u64,
    buffer_size: usize,
    prefix: Option<PrefixState>,
    buffer: VecDeque<AudioChunk>,
}

impl AsrWorker {
    fn new(transcriber: Box<dyn Transcriber>, mode: ContextMode) -> Self {
        Self {
            transcriber,
            mode,
            prefix_ratio: defaults::PREFIX_SIZE_RATIO,
            prefix_text: false,
            max_gap_ms: defaults::CONTEXT_MAX_GAP_MS,
            buffer_size: defaults::CONTEXT_BUFFER_CHUNKS,
            prefix: None,
            buffer: VecDeque::new(),
        }
    }

    /// Prefix-mode accumulator around a custom transcriber.
    pub fn prefix_mode(transcriber: Box<dyn Transcriber>) -> Self {
        Self::new(transcriber, ContextMode::Prefix)
    }

    /// Buffer-mode accumulator around a custom transcriber.
    pub fn buffer_mode(transcriber: Box<dyn Transcriber>) -> Self {
        Self::new(transcriber, ContextMode::Buffer)
    }

    pub fn with_prefix_ratio(mut self, ratio: f32) -> Self {
        self.prefix_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn with_prefix_text(mut self, enabled: bool) -> Self {
        self.prefix_text = enabled;
        self
    }

    pub fn with_max_gap_ms(mut self, gap: u64) -> Self {
        self.max_gap_ms = gap;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    fn from_params(params: &ResolvedParams<'_>) -> Result<Self> {
        let transcriber: Box<dyn Transcriber> = match params.str_or("backend", "mock")?.as_str() {
            "mock" => Box::new(MockTranscriber::fixed(
                params.str_or("mock_text", "mock transcript")?,
            )),
            other => {
                return Err(VoxflowError::Capability {
                    message: format!("transcription backend '{other}' is not available"),
                })
            }
        };
        let mode = match params.str_or("mode", "prefix")?.as_str() {
            "prefix" => ContextMode::Prefix,
            "buffer" => ContextMode::Buffer,
            other => {
                return Err(VoxflowError::ConfigInvalidValue {
                    worker: params.worker().to_string(),
                    key: "mode".to_string(),
                    message: format!("expected 'prefix' or 'buffer', got '{other}'"),
                })
            }
        };
        Ok(Self::new(transcriber, mode)
            .with_prefix_ratio(params.f32_or("prefix_size_ratio", defaults::PREFIX_SIZE_RATIO)?)
            .with_prefix_text(params.bool_or("prefix_text", false)?)
            .with_max_gap_ms(params.u64_or("max_gap_ms", defaults::CONTEXT_MAX_GAP_MS)?)
            .with_buffer_size(params.usize_or("buffer_size", defaults::CONTEXT_BUFFER_CHUNKS)?))
    }

    fn emit(
        &mut self,
        samples: &[i16],
        prior_text: Option<&str>,
        timestamp_ms: u64,
        out: &Outbox,
    ) -> std::result::Result<Option<String>, WorkerError> {
        let result = self.transcriber.transcribe(samples, prior_text)?;
        let text = result.text.trim().to_string();
        if text.is_empty() {
            trace!("empty transcription, nothing to forward");
            return Ok(None);
        }
        out.deliver(Message::transcript(Transcript {
            text: text.clone(),
            segments: result.segments,
            timestamp_ms,
        }))?;
        Ok(Some(text))
    }

    fn on_audio(&mut self, chunk: AudioChunk, out: &Outbox) -> std::result::Result<(), WorkerError> {
        match self.mode {
            ContextMode::Prefix => self.on_audio_prefix(chunk, out),
            ContextMode::Buffer => {
                if self.buffer.len() == self.buffer_size {
                    self.buffer.pop_front();
                }
                self.buffer.push_back(chunk);
                Ok(())
            }
        }
    }

    fn on_audio_prefix(
        &mut self,
        chunk: AudioChunk,
        out: &Outbox,
    ) -> std::result::Result<(), WorkerError> {
        // A carried tail is only relevant close to the chunk it came from.
        let carried = self.prefix.take().filter(|state| {
            chunk.timestamp_ms.saturating_sub(state.tail_timestamp_ms) <= self.max_gap_ms
        });

        let (samples, prior_text) = match &carried {
            Some(state) => {
                let mut joined = Vec::with_capacity(state.tail.len() + chunk.samples.len());
                joined.extend_from_slice(&state.tail);
                joined.extend_from_slice(&chunk.samples);
                (joined, state.prior_text.clone())
            }
            None => (chunk.samples.to_vec(), None),
        };

        let hint = if self.prefix_text {
            prior_text.as_deref()
        } else {
            None
        };
        let text = self.emit(&samples, hint, chunk.timestamp_ms, out)?;

        // Next tail comes from this chunk alone, never from the joined unit.
        let tail_len =
            ((chunk.samples.len() as f32 * self.prefix_ratio).ceil() as usize).min(chunk.samples.len());
        let tail = chunk.samples[chunk.samples.len() - tail_len..].to_vec();
        self.prefix = Some(PrefixState {
            tail,
            tail_timestamp_ms: chunk.timestamp_ms,
            prior_text: text,
        });
        Ok(())
    }

    /// A silence or turn boundary: flush buffer mode, reset prefix mode.
    fn on_boundary(&mut self, out: &Outbox) -> std::result::Result<(), WorkerError> {
        match self.mode {
            ContextMode::Prefix => {
                self.prefix = None;
            }
            ContextMode::Buffer => {
                if self.buffer.is_empty() {
                    return Ok(());
                }
                let timestamp_ms = self.buffer.front().map(|c| c.timestamp_ms).unwrap_or(0);
                let total: usize = self.buffer.iter().map(|c| c.samples.len()).sum();
                let mut samples = Vec::with_capacity(total);
                for chunk in self.buffer.drain(..) {
                    samples.extend_from_slice(&chunk.samples);
                }
                debug!(samples = samples.len(), "boundary reached, transcribing buffer");
                self.emit(&samples, None, timestamp_ms, out)?;
            }
        }
        Ok(())
    }
}

impl Worker for AsrWorker {
    fn process(&mut self, message: Message, out: &Outbox) -> std::result::Result<(), WorkerError> {
        match message {
            Message::Data(Payload::Audio(chunk)) => self.on_audio(chunk, out),
            Message::Control(signal @ (Signal::SilenceSignal | Signal::TurnEnd)) => {
                self.on_boundary(out)?;
                out.deliver(Message::Control(signal))?;
                Ok(())
            }
            other => {
                out.deliver(other)?;
                Ok(())
            }
        }
    }

    fn shutdown(&mut self) {
        // Partial context is discarded, not flushed: a unit cut off
        // mid-stream has no reliable boundary.
        self.prefix = None;
        self.buffer.clear();
    }
}

pub fn register(registry: &mut WorkerRegistry) {
    registry.register("asr", |ctx: &BuildCtx| {
        Ok(Box::new(AsrWorker::from_params(&ctx.params)?))
    });
}
