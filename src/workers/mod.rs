//! Built-in worker set: file playback, printing, and persistence sinks.
//!
//! The gate, accumulator and transport workers live in their own modules;
//! this one holds the small file/console workers and the registration hook
//! for all of them.

pub mod file_stream;
pub mod print;
pub mod recording;
pub mod transcript_file;

pub use file_stream::FileStream;
pub use print::PrintSink;
pub use recording::RecordingSink;
pub use transcript_file::TranscriptFileSink;

use crate::runtime::worker::{BuildCtx, WorkerRegistry};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub fn register_builtin(registry: &mut WorkerRegistry) {
    registry.register("file_stream", |ctx: &BuildCtx| {
        Ok(Box::new(FileStream::from_params(&ctx.params)?))
    });
    registry.register("print", |ctx: &BuildCtx| {
        Ok(Box::new(PrintSink::from_params(&ctx.params)?))
    });
    registry.register("recording", |ctx: &BuildCtx| {
        Ok(Box::new(RecordingSink::from_params(&ctx.params)?))
    });
    registry.register("transcript_file", |ctx: &BuildCtx| {
        Ok(Box::new(TranscriptFileSink::from_params(&ctx.params)?))
    });
}

/// RFC 3339 rendering of a millisecond Unix timestamp.
pub(crate) fn format_timestamp(timestamp_ms: u64) -> String {
    let time = UNIX_EPOCH + Duration::from_millis(timestamp_ms);
    humantime::format_rfc3339_millis(time).to_string()
}

/// RFC 3339 rendering of "now", for file names and log lines.
pub(crate) fn format_now() -> String {
    humantime::format_rfc3339_millis(SystemTime::now()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_rendering_is_rfc3339() {
        assert_eq!(format_timestamp(0), "1970-01-01T00:00:00.000Z");
        assert_eq!(format_timestamp(1500), "1970-01-01T00:00:01.500Z");
    }
}
