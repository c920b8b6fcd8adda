use std::{fmt, path::Path, time::Duration};

use ffmpeg::{codec, format, media, Rational};

use crate::error::ConversionError;

/// Metadata of the best video track in a file, read without decoding frames.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoStream {
    pub width: u32,
    pub height: u32,
    /// Frames per second, `None` when the container does not declare one.
    pub frame_rate: Option<Rational>,
    pub duration: Option<Duration>,
    pub video_codec: codec::Id,
    /// Bits per second, when known.
    pub bit_rate: Option<usize>,
    /// Declared or estimated number of video frames.
    pub frame_count: Option<u64>,
    pub audio: Option<AudioTrack>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    pub codec: codec::Id,
    pub duration: Option<Duration>,
}

impl VideoStream {
    pub fn ratio(&self) -> f64 {
        crate::geometry::ratio(self.width, self.height)
    }

    pub fn fps(&self) -> Option<f64> {
        self.frame_rate.map(f64::from)
    }
}

impl fmt::Display for VideoStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.video_codec.name())?;
        if let Some(fps) = self.fps() {
            write!(f, " @ {fps:.3} fps")?;
        }
        if let Some(duration) = self.duration {
            write!(f, ", {:.2}s", duration.as_secs_f64())?;
        }
        if let Some(audio) = &self.audio {
            write!(f, ", audio {}", audio.codec.name())?;
        }
        Ok(())
    }
}

/// Reads the dimensions, timing and codecs of `path`.
pub fn probe(path: &Path) -> Result<VideoStream, ConversionError> {
    crate::init()?;

    let input = format::input(&path).map_err(|err| ConversionError::probe(path, err))?;

    let stream = input
        .streams()
        .best(media::Type::Video)
        .ok_or_else(|| ConversionError::probe(path, "no video track"))?;
    let time_base = stream.time_base();
    let parameters = stream.parameters();
    let video_codec = parameters.id();

    let decoder = codec::Context::from_parameters(parameters)
        .and_then(|context| context.decoder().video())
        .map_err(|err| ConversionError::probe(path, err))?;
    let (width, height) = (decoder.width(), decoder.height());
    if width == 0 || height == 0 {
        return Err(ConversionError::probe(path, "video track has no dimensions"));
    }

    let frame_rate = [stream.avg_frame_rate(), stream.rate()]
        .into_iter()
        .find(|rate| rate.numerator() > 0 && rate.denominator() > 0);

    // Container duration is in AV_TIME_BASE units
    let duration = stream_duration(time_base, stream.duration())
        .or_else(|| stream_duration(Rational::new(1, ffmpeg::ffi::AV_TIME_BASE), input.duration()));

    let bit_rate = Some(decoder.bit_rate())
        .filter(|rate| *rate > 0)
        .or_else(|| usize::try_from(input.bit_rate()).ok().filter(|rate| *rate > 0));

    let frame_count = u64::try_from(stream.frames())
        .ok()
        .filter(|frames| *frames > 0)
        .or_else(|| {
            let fps = f64::from(frame_rate?);
            Some((duration?.as_secs_f64() * fps).round() as u64)
        });

    let audio = input.streams().best(media::Type::Audio).map(|audio| AudioTrack {
        codec: audio.parameters().id(),
        duration: stream_duration(audio.time_base(), audio.duration()),
    });

    Ok(VideoStream {
        width,
        height,
        frame_rate,
        duration,
        video_codec,
        bit_rate,
        frame_count,
        audio,
    })
}

/// Converts a timestamp count in `time_base` units into a duration.
/// Unset (`AV_NOPTS_VALUE`) and non-positive counts yield `None`.
pub(crate) fn stream_duration(time_base: Rational, duration: i64) -> Option<Duration> {
    if duration <= 0 || time_base.numerator() <= 0 || time_base.denominator() <= 0 {
        return None;
    }
    let seconds = duration as f64 * f64::from(time_base);
    Some(Duration::from_secs_f64(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_follow_the_time_base() {
        let d = stream_duration(Rational::new(1, 12800), 128_000).unwrap();
        assert_eq!(d, Duration::from_secs(10));

        let d = stream_duration(Rational::new(1001, 30000), 300).unwrap();
        assert!((d.as_secs_f64() - 10.01).abs() < 1e-9);
    }

    #[test]
    fn unset_durations_are_none() {
        assert_eq!(stream_duration(Rational::new(1, 1000), ffmpeg::ffi::AV_NOPTS_VALUE), None);
        assert_eq!(stream_duration(Rational::new(1, 1000), 0), None);
        assert_eq!(stream_duration(Rational::new(0, 0), 100), None);
    }

    #[test]
    fn missing_input_is_a_probe_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = probe(&dir.path().join("missing.mp4")).unwrap_err();
        assert!(matches!(err, ConversionError::Probe { .. }), "{err:?}");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn non_media_input_is_a_probe_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.mp4");
        std::fs::write(&path, b"definitely not a video").unwrap();
        let err = probe(&path).unwrap_err();
        assert!(matches!(err, ConversionError::Probe { .. }), "{err:?}");
    }
}
