//! Timeouts and stream layout constants.

/// Seconds to wait for a TCP/TLS connection.
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Seconds a whole request may take, body included.
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Deezer streams are striped in chunks of this many bytes.
pub const DEEZER_CHUNK_SIZE: usize = 6144;

/// Leading bytes of each full chunk that are encrypted.
pub const DEEZER_ENCRYPTED_PREFIX: usize = 2048;

/// Responses shorter than this are JSON error documents, not audio.
pub const DEEZER_MIN_AUDIO_BYTES: u64 = 20_000;

/// Concurrent segment requests for an HLS stream.
pub const HLS_SEGMENT_CONCURRENCY: usize = 8;
