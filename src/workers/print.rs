//! The `print` worker: a console sink for inspecting a pipeline.

use crate::config::ResolvedParams;
use crate::error::Result;
use crate::message::{Message, Payload, Signal};
use crate::runtime::router::Outbox;
use crate::runtime::worker::{Worker, WorkerError};
use crate::workers::format_timestamp;

pub struct PrintSink {
    /// When set, only this transcript field is printed (currently `text`);
    /// other messages are skipped.
    field: Option<String>,
}

impl PrintSink {
    pub(crate) fn from_params(params: &ResolvedParams<'_>) -> Result<Self> {
        Ok(Self {
            field: params.opt_str("field")?,
        })
    }

    fn render(&self, message: &Message) -> Option<String> {
        if let Some(field) = &self.field {
            return match (field.as_str(), message) {
                ("text", Message::Data(Payload::Transcript(t))) => Some(t.text.clone()),
                _ => None,
            };
        }
        let line = match message {
            Message::Data(Payload::Audio(chunk)) => format!(
                "[{}] audio #{} ({} samples)",
                format_timestamp(chunk.timestamp_ms),
                chunk.sequence,
                chunk.len()
            ),
            Message::Data(Payload::Transcript(t)) => {
                format!("[{}] {}", format_timestamp(t.timestamp_ms), t.text)
            }
            Message::Data(Payload::Command { name, .. }) => format!("command: {name}"),
            Message::Control(Signal::SilenceSignal) => "-- silence --".to_string(),
            Message::Control(Signal::TurnEnd) => "-- turn end --".to_string(),
            Message::Control(other) => format!("control: {other:?}"),
        };
        Some(line)
    }
}

impl Worker for PrintSink {
    fn process(&mut self, message: Message, _out: &Outbox) -> std::result::Result<(), WorkerError> {
        if let Some(line) = self.render(&message) {
            println!("{line}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{AudioChunk, Transcript};

    #[test]
    fn renders_each_message_shape() {
        let sink = PrintSink { field: None };
        let audio = Message::audio(AudioChunk::with_timestamp(vec![0; 3], 1500, 4));
        assert_eq!(
            sink.render(&audio).unwrap(),
            "[1970-01-01T00:00:01.500Z] audio #4 (3 samples)"
        );
        let transcript = Message::transcript(Transcript::new("hello there", 0));
        assert_eq!(
            sink.render(&transcript).unwrap(),
            "[1970-01-01T00:00:00.000Z] hello there"
        );
        assert_eq!(
            sink.render(&Message::Control(Signal::TurnEnd)).unwrap(),
            "-- turn end --"
        );
    }

    #[test]
    fn field_filter_prints_only_transcript_text() {
        let sink = PrintSink {
            field: Some("text".to_string()),
        };
        let transcript = Message::transcript(Transcript::new("just this", 0));
        assert_eq!(sink.render(&transcript).unwrap(), "just this");
        assert!(sink
            .render(&Message::audio(AudioChunk::new(vec![0], 0)))
            .is_none());
        assert!(sink.render(&Message::Control(Signal::SilenceSignal)).is_none());
    }
}
