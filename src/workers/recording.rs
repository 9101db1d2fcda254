//! The `recording` worker: persists the audio stream as WAV files.
//!
//! Chunks accumulate in memory and are flushed to a new timestamped file in
//! the target directory every `buffer_size` chunks; whatever is left at
//! shutdown is flushed too.

use crate::config::ResolvedParams;
use crate::defaults;
use crate::error::Result;
use crate::message::{AudioChunk, Message, Payload};
use crate::runtime::router::Outbox;
use crate::runtime::worker::{Worker, WorkerError};
use crate::workers::format_now;
use std::path::PathBuf;
use tracing::{debug, info};

pub struct RecordingSink {
    dir: PathBuf,
    sample_rate: u32,
    buffer_size: usize,
    buffer: Vec<AudioChunk>,
    files_written: u64,
}

impl RecordingSink {
    pub(crate) fn from_params(params: &ResolvedParams<'_>) -> Result<Self> {
        Ok(Self {
            dir: PathBuf::from(params.str_or("dir", "recordings")?),
            sample_rate: params.u64_or("sample_rate", defaults::SAMPLE_RATE as u64)? as u32,
            buffer_size: params
                .usize_or("buffer_size", defaults::RECORDING_BUFFER_CHUNKS)?
                .max(1),
            buffer: Vec::new(),
            files_written: 0,
        })
    }

    fn flush(&mut self) -> std::result::Result<(), WorkerError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let name = format!(
            "{}-{:04}.wav",
            format_now().replace(':', "-"),
            self.files_written
        );
        let path = self.dir.join(name);
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec)
            .map_err(|e| WorkerError::fatal(format!("cannot create {}: {e}", path.display())))?;
        for chunk in self.buffer.drain(..) {
            for &sample in chunk.samples.iter() {
                writer
                    .write_sample(sample)
                    .map_err(|e| WorkerError::fatal(format!("write failed: {e}")))?;
            }
        }
        writer
            .finalize()
            .map_err(|e| WorkerError::fatal(format!("cannot finalize {}: {e}", path.display())))?;
        self.files_written += 1;
        info!(file = %path.display(), "recording written");
        Ok(())
    }
}

impl Worker for RecordingSink {
    fn setup(&mut self) -> std::result::Result<(), WorkerError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| WorkerError::fatal(format!("cannot create {}: {e}", self.dir.display())))?;
        Ok(())
    }

    fn process(&mut self, message: Message, _out: &Outbox) -> std::result::Result<(), WorkerError> {
        if let Message::Data(Payload::Audio(chunk)) = message {
            self.buffer.push(chunk);
            if self.buffer.len() >= self.buffer_size {
                self.flush()?;
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Err(err) = self.flush() {
            debug!("final flush failed: {err}");
        }
    }
}
