//! Flow-control gate: voice-activity detection over audio chunks.
//!
//! Each chunk is split into fixed-size sub-windows (the trailing partial
//! window is scored on its own), every sub-window is scored through a
//! [`SpeechScorer`], and the scores are averaged into one chunk score.
//! Chunks at or above the threshold pass downstream unchanged; chunks below
//! it are filtered, and a run of consecutive filtered chunks produces
//! exactly one [`Signal::SilenceSignal`].

use crate::config::ResolvedParams;
use crate::defaults;
use crate::error::{Result, VoxflowError};
use crate::message::{Message, Payload, Signal};
use crate::runtime::router::Outbox;
use crate::runtime::worker::{BuildCtx, Worker, WorkerError, WorkerRegistry};
use tracing::{debug, trace};

/// Scores one sub-window of samples; 0.0 is certain silence, 1.0 certain
/// speech.
pub trait SpeechScorer: Send {
    fn score(&mut self, samples: &[i16]) -> Result<f32>;
}

/// Normalized RMS energy. Crude but model-free; good enough for clean
/// close-mic input and for pipelines that bring their own scorer.
pub struct EnergyScorer;

impl SpeechScorer for EnergyScorer {
    fn score(&mut self, samples: &[i16]) -> Result<f32> {
        if samples.is_empty() {
            return Ok(0.0);
        }
        let sum: f64 = samples
            .iter()
            .map(|&s| {
                let x = f64::from(s) / f64::from(i16::MAX);
                x * x
            })
            .sum();
        let rms = (sum / samples.len() as f64).sqrt();
        Ok(rms.min(1.0) as f32)
    }
}

/// Replays a fixed score sequence, then repeats the last one. Test scorer.
pub struct FixedScorer {
    scores: Vec<f32>,
    next: usize,
}

impl FixedScorer {
    pub fn new(scores: Vec<f32>) -> Self {
        Self { scores, next: 0 }
    }
}

impl SpeechScorer for FixedScorer {
    fn score(&mut self, _samples: &[i16]) -> Result<f32> {
        let idx = self.next.min(self.scores.len().saturating_sub(1));
        self.next += 1;
        self.scores
            .get(idx)
            .copied()
            .ok_or_else(|| VoxflowError::Capability {
                message: "fixed scorer has no scores".to_string(),
            })
    }
}

/// The `vad` worker.
pub struct VadGate {
    scorer: Box<dyn SpeechScorer>,
    window: usize,
    threshold: f32,
    n_silence: u32,
    silence_run: u32,
}

impl VadGate {
    pub fn new(scorer: Box<dyn SpeechScorer>, window: usize, threshold: f32, n_silence: u32) -> Self {
        Self {
            scorer,
            window: window.max(1),
            threshold,
            n_silence: n_silence.max(1),
            silence_run: 0,
        }
    }

    fn from_params(params: &ResolvedParams<'_>) -> Result<Self> {
        let scorer: Box<dyn SpeechScorer> = match params.str_or("scorer", "energy")?.as_str() {
            "energy" => Box::new(EnergyScorer),
            "fixed" => Box::new(FixedScorer::new(vec![params.f32_or("score", 1.0)?])),
            other => {
                return Err(VoxflowError::Capability {
                    message: format!("unknown speech scorer '{other}'"),
                })
            }
        };
        Ok(Self::new(
            scorer,
            params.usize_or("window", defaults::VAD_WINDOW_SAMPLES)?,
            params.f32_or("threshold", defaults::VAD_THRESHOLD)?,
            params.u64_or("n_silence", defaults::N_SILENCE as u64)? as u32,
        ))
    }

    /// Average of per-sub-window scores; the final partial window is scored
    /// on its own.
    fn chunk_score(&mut self, samples: &[i16]) -> Result<f32> {
        if samples.is_empty() {
            return Ok(0.0);
        }
        let mut total = 0.0f32;
        let mut windows = 0u32;
        for sub in samples.chunks(self.window) {
            total += self.scorer.score(sub)?;
            windows += 1;
        }
        Ok(total / windows as f32)
    }
}

impl Worker for VadGate {
    fn process(&mut self, message: Message, out: &Outbox) -> std::result::Result<(), WorkerError> {
        let chunk = match &message {
            Message::Data(Payload::Audio(chunk)) => chunk,
            // Everything that is not audio passes through untouched.
            _ => {
                out.deliver(message)?;
                return Ok(());
            }
        };

        let score = self.chunk_score(&chunk.samples)?;
        if score >= self.threshold {
            trace!(score, sequence = chunk.sequence, "speech, passing chunk");
            self.silence_run = 0;
            out.deliver(message)?;
        } else {
            self.silence_run += 1;
            trace!(score, run = self.silence_run, "silence, filtering chunk");
            // Emit once when the run first reaches the limit; the counter
            // keeps growing past it, so longer silence stays quiet.
            if self.silence_run == self.n_silence {
                debug!("silence run reached {}, signalling", self.n_silence);
                out.deliver(Message::Control(Signal::SilenceSignal))?;
            }
        }
        Ok(())
    }
}

pub fn register(registry: &mut WorkerRegistry) {
    registry.register("vad", |ctx: &BuildCtx| {
        Ok(Box::new(VadGate::from_params(&ctx.params)?))
    });
}
