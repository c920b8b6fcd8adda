use std::{io, path::PathBuf};

use thiserror::Error;

/// Failure of a `convert` run. Every variant is terminal.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("cannot probe {}: {reason}", path.display())]
    Probe { path: PathBuf, reason: String },

    #[error("{width}x{height} cannot be reframed to an exact 16:9 geometry")]
    Geometry { width: u32, height: u32 },

    #[error("encoding failed while {stage}: {source}")]
    Encode {
        stage: &'static str,
        #[source]
        source: ffmpeg::Error,
    },

    #[error("I/O failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write preview {}: {source}", path.display())]
    Preview {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl ConversionError {
    pub(crate) fn probe(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Probe {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wraps a backend failure that happened while writing `path`.
    ///
    /// FFmpeg reports filesystem trouble (full disk, permissions) as a plain
    /// errno, those become [`ConversionError::Io`].
    pub(crate) fn encode(
        stage: &'static str,
        path: impl Into<PathBuf>,
        source: ffmpeg::Error,
    ) -> Self {
        match filesystem_errno(&source) {
            Some(io) => Self::io(path, io),
            None => Self::Encode { stage, source },
        }
    }

    /// Process exit code reported by the `convert` binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Probe { .. } => 2,
            Self::Encode { .. } => 3,
            Self::Io { .. } => 4,
            Self::Geometry { .. } => 5,
            Self::Preview { .. } => 6,
        }
    }
}

fn filesystem_errno(err: &ffmpeg::Error) -> Option<io::Error> {
    let ffmpeg::Error::Other { errno } = *err else {
        return None;
    };
    let io = io::Error::from_raw_os_error(errno);
    match io.kind() {
        io::ErrorKind::NotFound
        | io::ErrorKind::PermissionDenied
        | io::ErrorKind::StorageFull
        | io::ErrorKind::ReadOnlyFilesystem
        | io::ErrorKind::IsADirectory
        | io::ErrorKind::WriteZero => Some(io),
        _ => None,
    }
}

/// Failure of a `fetch` run.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid video url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("video at {url} is unavailable: {reason}")]
    Unavailable { url: String, reason: String },

    #[error("network failure while fetching {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("cannot run {program}: {source}")]
    Tool {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("malformed metadata for {url}: {source}")]
    Metadata {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DownloadError {
    /// Process exit code reported by the `fetch` binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidUrl { .. } => 2,
            Self::Unavailable { .. } => 3,
            Self::Network { .. } => 4,
            Self::Tool { .. } => 5,
            Self::Metadata { .. } => 6,
            Self::Io { .. } => 7,
        }
    }
}
