//! The `file_stream` worker: replays WAV files as a timed chunk stream.
//!
//! `path` names a single WAV file or a directory of them (sorted by file
//! name). Each file is cut into fixed-size chunks emitted with a
//! configurable pause in between, approximating live capture. A `TurnEnd`
//! follows each file; end-of-stream follows the last.

use crate::config::ResolvedParams;
use crate::defaults;
use crate::error::{Result, VoxflowError};
use crate::message::{AudioChunk, Message, Signal};
use crate::runtime::router::Outbox;
use crate::runtime::worker::{Tick, Worker, WorkerError};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub struct FileStream {
    path: PathBuf,
    chunk_samples: usize,
    pause: Duration,
    expected_rate: u32,
    files: Vec<PathBuf>,
    current: Option<hound::WavReader<BufReader<File>>>,
    next_file: usize,
    sequence: u64,
    last_emit: Option<Instant>,
}

impl FileStream {
    pub(crate) fn from_params(params: &ResolvedParams<'_>) -> Result<Self> {
        let path = params
            .opt_str("path")?
            .ok_or_else(|| VoxflowError::ConfigInvalidValue {
                worker: params.worker().to_string(),
                key: "path".to_string(),
                message: "required: a WAV file or a directory of WAV files".to_string(),
            })?;
        Ok(Self {
            path: PathBuf::from(path),
            chunk_samples: params.usize_or("chunk_samples", defaults::CHUNK_SAMPLES)?.max(1),
            pause: Duration::from_millis(
                params.u64_or("pause_ms", defaults::FILE_STREAM_PAUSE_MS)?,
            ),
            expected_rate: params.u64_or("sample_rate", defaults::SAMPLE_RATE as u64)? as u32,
            files: Vec::new(),
            current: None,
            next_file: 0,
            sequence: 0,
            last_emit: None,
        })
    }

    fn open_next(&mut self) -> std::result::Result<bool, WorkerError> {
        let path = match self.files.get(self.next_file) {
            Some(path) => path.clone(),
            None => return Ok(false),
        };
        self.next_file += 1;

        let reader = hound::WavReader::open(&path)
            .map_err(|e| WorkerError::fatal(format!("cannot open {}: {e}", path.display())))?;
        let spec = reader.spec();
        if spec.channels != 1 {
            return Err(WorkerError::fatal(format!(
                "{} has {} channels, expected mono",
                path.display(),
                spec.channels
            )));
        }
        if spec.sample_rate != self.expected_rate {
            warn!(
                file = %path.display(),
                rate = spec.sample_rate,
                expected = self.expected_rate,
                "sample rate differs from the configured rate"
            );
        }
        info!(file = %path.display(), "streaming file");
        self.current = Some(reader);
        Ok(true)
    }

    fn read_chunk(&mut self) -> std::result::Result<Vec<i16>, WorkerError> {
        let reader = match &mut self.current {
            Some(reader) => reader,
            None => return Ok(Vec::new()),
        };
        let mut chunk = Vec::with_capacity(self.chunk_samples);
        for sample in reader.samples::<i16>() {
            let sample =
                sample.map_err(|e| WorkerError::fatal(format!("corrupt WAV data: {e}")))?;
            chunk.push(sample);
            if chunk.len() == self.chunk_samples {
                return Ok(chunk);
            }
        }
        // File exhausted; the (possibly empty) remainder is the last chunk.
        self.current = None;
        Ok(chunk)
    }
}

impl Worker for FileStream {
    fn setup(&mut self) -> std::result::Result<(), WorkerError> {
        if self.path.is_dir() {
            let entries = std::fs::read_dir(&self.path)
                .map_err(|e| WorkerError::fatal(format!("cannot read {}: {e}", self.path.display())))?;
            for entry in entries {
                let entry =
                    entry.map_err(|e| WorkerError::fatal(format!("cannot read directory: {e}")))?;
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "wav") {
                    self.files.push(path);
                }
            }
            self.files.sort();
        } else if self.path.is_file() {
            self.files.push(self.path.clone());
        }
        if self.files.is_empty() {
            return Err(WorkerError::fatal(format!(
                "no WAV files at {}",
                self.path.display()
            )));
        }
        Ok(())
    }

    fn process(&mut self, _message: Message, _out: &Outbox) -> std::result::Result<(), WorkerError> {
        // A pure producer; inbound data has nowhere to go.
        Ok(())
    }

    fn tick(&mut self, out: &Outbox) -> std::result::Result<Tick, WorkerError> {
        if let Some(last) = self.last_emit {
            if last.elapsed() < self.pause {
                return Ok(Tick::Idle);
            }
        }

        if self.current.is_none() && !self.open_next()? {
            return Ok(Tick::Done);
        }

        let was_streaming = self.current.is_some();
        let chunk = self.read_chunk()?;
        if !chunk.is_empty() {
            let seq = self.sequence;
            self.sequence += 1;
            out.deliver(Message::audio(AudioChunk::new(chunk, seq)))?;
            self.last_emit = Some(Instant::now());
        }
        if was_streaming && self.current.is_none() {
            out.deliver(Message::Control(Signal::TurnEnd))?;
        }
        Ok(Tick::Progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::router::mailbox;
    use std::path::Path;

    fn write_wav(path: &Path, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn stream_for(path: &Path, chunk_samples: usize) -> FileStream {
        FileStream {
            path: path.to_path_buf(),
            chunk_samples,
            pause: Duration::ZERO,
            expected_rate: 16000,
            files: Vec::new(),
            current: None,
            next_file: 0,
            sequence: 0,
            last_emit: None,
        }
    }

    fn drain(stream: &mut FileStream) -> Vec<Message> {
        let (tx, rx) = mailbox(1024);
        let out = Outbox::new(vec![("t".to_string(), tx)]);
        loop {
            match stream.tick(&out).unwrap() {
                Tick::Done => break,
                _ => continue,
            }
        }
        let mut messages = Vec::new();
        while let Ok(msg) = rx.recv_timeout(Duration::from_millis(10)) {
            messages.push(msg);
        }
        messages
    }

    #[test]
    fn chunks_one_file_with_partial_tail_and_turn_end() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.wav");
        write_wav(&file, &[7i16; 250]);

        let mut stream = stream_for(&file, 100);
        stream.setup().unwrap();
        let messages = drain(&mut stream);

        // 100 + 100 + 50, then the turn boundary.
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].as_audio().unwrap().len(), 100);
        assert_eq!(messages[1].as_audio().unwrap().len(), 100);
        assert_eq!(messages[2].as_audio().unwrap().len(), 50);
        assert_eq!(messages[3], Message::Control(Signal::TurnEnd));
        // Sequences are contiguous.
        let seqs: Vec<u64> = messages
            .iter()
            .filter_map(|m| m.as_audio().map(|c| c.sequence))
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn directory_streams_files_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(&dir.path().join("b.wav"), &[2i16; 10]);
        write_wav(&dir.path().join("a.wav"), &[1i16; 10]);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut stream = stream_for(dir.path(), 10);
        stream.setup().unwrap();
        let messages = drain(&mut stream);

        // a.wav chunk, TurnEnd, b.wav chunk, TurnEnd.
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].as_audio().unwrap().samples[0], 1);
        assert_eq!(messages[1], Message::Control(Signal::TurnEnd));
        assert_eq!(messages[2].as_audio().unwrap().samples[0], 2);
        assert_eq!(messages[3], Message::Control(Signal::TurnEnd));
    }

    #[test]
    fn missing_path_fails_setup() {
        let mut stream = stream_for(Path::new("/nonexistent/audio"), 100);
        assert!(matches!(stream.setup(), Err(WorkerError::Fatal(_))));
    }

    #[test]
    fn stereo_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&file, spec).unwrap();
        for _ in 0..20 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let mut stream = stream_for(&file, 100);
        stream.setup().unwrap();
        let (tx, _rx) = mailbox(16);
        let out = Outbox::new(vec![("t".to_string(), tx)]);
        assert!(matches!(stream.tick(&out), Err(WorkerError::Fatal(_))));
    }

    #[test]
    fn pause_throttles_emission() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.wav");
        write_wav(&file, &[0i16; 20]);

        let mut stream = stream_for(&file, 10);
        stream.pause = Duration::from_secs(60);
        stream.setup().unwrap();

        let (tx, rx) = mailbox(16);
        let out = Outbox::new(vec![("t".to_string(), tx)]);
        assert_eq!(stream.tick(&out).unwrap(), Tick::Progress);
        // The pause gates the second chunk.
        assert_eq!(stream.tick(&out).unwrap(), Tick::Idle);
        assert!(rx.recv_timeout(Duration::from_millis(10)).is_ok());
        assert!(rx.recv_timeout(Duration::from_millis(10)).is_err());
    }
}
