extern crate ffmpeg_next as ffmpeg;

pub mod canvas;
pub mod converter;
pub mod error;
pub mod fetcher;
pub mod geometry;
pub mod logging;
pub mod preview;
pub mod probe;

pub use converter::{convert, Conversion, ConvertOptions};
pub use error::{ConversionError, DownloadError};
pub use geometry::{FillColor, FitPolicy, Plan, TargetGeometry, TransformPlan};
pub use probe::{probe, AudioTrack, VideoStream};

/// Initializes the FFmpeg libraries. Safe to call more than once.
pub fn init() -> Result<(), ConversionError> {
    ffmpeg::init().map_err(|source| ConversionError::Encode {
        stage: "initializing ffmpeg",
        source,
    })
}
