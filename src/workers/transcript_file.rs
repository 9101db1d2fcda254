//! The `transcript_file` worker: appends transcripts to a per-session file.

use crate::config::ResolvedParams;
use crate::error::Result;
use crate::message::{Message, Payload, Signal};
use crate::runtime::router::Outbox;
use crate::runtime::worker::{Worker, WorkerError};
use crate::workers::{format_now, format_timestamp};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::info;

pub struct TranscriptFileSink {
    dir: PathBuf,
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
}

impl TranscriptFileSink {
    pub(crate) fn from_params(params: &ResolvedParams<'_>) -> Result<Self> {
        Ok(Self {
            dir: PathBuf::from(params.str_or("dir", "transcripts")?),
            writer: None,
            path: None,
        })
    }

    /// The session file, once setup has run.
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    fn write_line(&mut self, line: &str) -> std::result::Result<(), WorkerError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| WorkerError::fatal("transcript file not open"))?;
        writeln!(writer, "{line}")
            .and_then(|_| writer.flush())
            .map_err(|e| WorkerError::fatal(format!("cannot write transcript: {e}")))
    }
}

impl Worker for TranscriptFileSink {
    fn setup(&mut self) -> std::result::Result<(), WorkerError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| WorkerError::fatal(format!("cannot create {}: {e}", self.dir.display())))?;
        let path = self
            .dir
            .join(format!("session-{}.txt", format_now().replace(':', "-")));
        let file = File::create(&path)
            .map_err(|e| WorkerError::fatal(format!("cannot create {}: {e}", path.display())))?;
        info!(file = %path.display(), "transcript session started");
        self.writer = Some(BufWriter::new(file));
        self.path = Some(path);
        Ok(())
    }

    fn process(&mut self, message: Message, _out: &Outbox) -> std::result::Result<(), WorkerError> {
        match message {
            Message::Data(Payload::Transcript(t)) => {
                self.write_line(&format!("[{}] {}", format_timestamp(t.timestamp_ms), t.text))
            }
            Message::Control(Signal::SilenceSignal) => self.write_line("-- silence --"),
            Message::Control(Signal::TurnEnd) => self.write_line("-- turn end --"),
            // Audio and other payloads do not belong in a transcript.
            _ => Ok(()),
        }
    }

    fn shutdown(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{AudioChunk, Transcript};
    use crate::runtime::router::mailbox;

    #[test]
    fn appends_transcripts_and_markers_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = TranscriptFileSink {
            dir: dir.path().to_path_buf(),
            writer: None,
            path: None,
        };
        sink.setup().unwrap();
        let (tx, _rx) = mailbox(16);
        let out = Outbox::new(vec![("t".to_string(), tx)]);

        sink.process(Message::transcript(Transcript::new("hello", 1500)), &out)
            .unwrap();
        sink.process(Message::Control(Signal::SilenceSignal), &out)
            .unwrap();
        sink.process(Message::transcript(Transcript::new("world", 4000)), &out)
            .unwrap();
        sink.process(Message::Control(Signal::TurnEnd), &out).unwrap();
        // Audio is not transcribable content.
        sink.process(Message::audio(AudioChunk::new(vec![0], 0)), &out)
            .unwrap();

        let path = sink.path().unwrap().clone();
        sink.shutdown();
        let contents = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(
            lines,
            vec![
                "[1970-01-01T00:00:01.500Z] hello",
                "-- silence --",
                "[1970-01-01T00:00:04.000Z] world",
                "-- turn end --",
            ]
        );
    }

    #[test]
    fn each_session_gets_its_own_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = TranscriptFileSink {
            dir: dir.path().to_path_buf(),
            writer: None,
            path: None,
        };
        sink.setup().unwrap();
        assert!(sink.path().unwrap().starts_with(dir.path()));
        assert!(sink
            .path()
            .unwrap()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("session-"));
    }
}
