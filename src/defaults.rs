//! Default configuration constants shared across workers.

/// Default audio sample rate in Hz.
///
/// 16kHz is the standard for speech recognition pipelines.
pub const SAMPLE_RATE: u32 = 16000;

/// Default audio chunk length in samples (one second at 16kHz).
pub const CHUNK_SAMPLES: usize = 16000;

/// Default VAD sub-window size in samples.
pub const VAD_WINDOW_SAMPLES: usize = 512;

/// Default VAD speech-presence threshold (chunk score in 0.0..=1.0).
pub const VAD_THRESHOLD: f32 = 0.3;

/// Default number of consecutive silent chunks before a silence signal.
pub const N_SILENCE: usize = 3;

/// Default fraction of the previous chunk prepended in prefix context mode.
pub const PREFIX_SIZE_RATIO: f32 = 0.1;

/// Default buffer-mode context capacity in chunks.
pub const CONTEXT_BUFFER_CHUNKS: usize = 10;

/// Maximum age of carried context before it is considered stale, in
/// milliseconds. A prefix older than this is not prepended.
pub const CONTEXT_MAX_GAP_MS: u64 = 2000;

/// Default bounded mailbox capacity (Data messages; Control is exempt).
pub const MAILBOX_CAPACITY: usize = 64;

/// Default readiness timeout in seconds.
pub const READY_TIMEOUT_SECS: u64 = 120;

/// Default transport host.
pub const TRANSPORT_HOST: &str = "127.0.0.1";

/// Default transport port.
pub const TRANSPORT_PORT: u16 = 8080;

/// Default pause between streamed file chunks, in milliseconds.
///
/// Keeps a file producer from flooding downstream mailboxes faster than
/// real time.
pub const FILE_STREAM_PAUSE_MS: u64 = 500;

/// Default number of chunks the recording sink buffers before writing a
/// WAV file.
pub const RECORDING_BUFFER_CHUNKS: usize = 60;
