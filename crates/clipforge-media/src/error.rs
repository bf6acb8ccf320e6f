//! Error types for manifest parsing, segment resolution and container assembly.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while parsing a session manifest.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The document is not well-formed XML or violates the manifest schema.
    #[error("malformed manifest: {0}")]
    Malformed(String),

    /// A required attribute or element is absent.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The declared segments do not form a valid sequence.
    #[error("invalid segment topology: {0}")]
    InvalidTopology(String),
}

/// Errors that can occur while resolving manifest entries against the filesystem.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A segment declared by the manifest does not exist on disk.
    #[error("missing segment {index} of track {track}: {}", path.display())]
    MissingSegment {
        track: String,
        index: u64,
        path: PathBuf,
    },

    /// A segment's on-disk size disagrees with the manifest beyond tolerance.
    #[error(
        "size mismatch for segment {index} of track {track}: \
         manifest declares {expected} bytes, file has {actual}"
    )]
    SizeMismatch {
        track: String,
        index: u64,
        expected: u64,
        actual: u64,
    },

    /// Filesystem metadata could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while assembling a single-file container.
#[derive(Debug, Error)]
pub enum AssembleError {
    /// A track has no initialization segment, so no movie header can be built.
    #[error("track {0} has no initialization segment")]
    NoInitSegment(String),

    /// The destination path already exists and overwriting is not allowed.
    #[error("output file already exists: {0}")]
    OutputExists(PathBuf),

    /// A fragment's box structure is damaged or inconsistent.
    #[error("corrupt fragment {index}: {detail}")]
    CorruptFragment { index: u64, detail: String },

    /// The sample description declares a codec this assembler cannot carry.
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// The per-job deadline elapsed before assembly finished.
    #[error("assembly deadline exceeded")]
    DeadlineExceeded,

    /// I/O error while reading segments or writing the output.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the low-level ISO-BMFF box reader and writer.
///
/// Callers wrap these into [`AssembleError`] with the segment index attached.
#[derive(Debug, Error)]
pub enum Mp4Error {
    /// The box structure is damaged or inconsistent.
    #[error("{0}")]
    Invalid(String),

    /// I/O error during box reading.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Mp4Error {
    /// Create an [`Mp4Error::Invalid`] with a descriptive message.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}
