use std::path::Path;

use ffmpeg::{codec, format, media, software, util::frame::Video, Rational, Rescale};
use image::RgbImage;
use tracing::debug;

use crate::error::ConversionError;

/// Fraction of the duration to seek to before grabbing the frame.
const SEEK_FRACTION: f64 = 0.1;

/// Saves one frame of `video`, taken about 10% in, as an image at `dest`.
/// The image format follows the extension of `dest`.
pub fn save_preview(video: &Path, dest: &Path) -> Result<(), ConversionError> {
    let image = grab_frame(video)
        .map_err(|err| ConversionError::encode("extracting a preview frame", dest, err))?;
    image.save(dest).map_err(|source| ConversionError::Preview {
        path: dest.to_path_buf(),
        source,
    })?;
    debug!("preview saved to {}", dest.display());
    Ok(())
}

/// Decodes the first frame at or after the seek point as RGB.
pub fn grab_frame(video: &Path) -> Result<RgbImage, ffmpeg::Error> {
    let mut input = format::input(&video)?;

    let stream = input
        .streams()
        .best(media::Type::Video)
        .ok_or(ffmpeg::Error::StreamNotFound)?;
    let video_stream_index = stream.index();
    let time_base = stream.time_base();
    let start = stream.start_time().max(0);
    let seek_ts = start + (stream.duration().max(0) as f64 * SEEK_FRACTION) as i64;

    let context_decoder = codec::Context::from_parameters(stream.parameters())?;
    let mut decoder = context_decoder.decoder().video()?;
    let mut scaler = software::scaling::context::Context::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        format::Pixel::RGB24,
        decoder.width(),
        decoder.height(),
        software::scaling::Flags::BILINEAR,
    )?;

    // Seeking lands on a keyframe at or before the target, decode forward from there
    if seek_ts > start {
        let target = seek_ts.rescale(time_base, Rational(1, ffmpeg::ffi::AV_TIME_BASE));
        input.seek(target, ..target)?;
    }

    let mut rgb = Video::empty();
    let mut decoded = Video::empty();
    let mut found = false;
    for (stream, packet) in input.packets() {
        if stream.index() != video_stream_index {
            continue;
        }
        decoder.send_packet(&packet)?;
        while decoder.receive_frame(&mut decoded).is_ok() {
            if decoded.timestamp().unwrap_or(i64::MAX) >= seek_ts {
                scaler.run(&decoded, &mut rgb)?;
                found = true;
                break;
            }
        }
        if found {
            break;
        }
    }
    if !found {
        decoder.send_eof()?;
        while decoder.receive_frame(&mut decoded).is_ok() {
            scaler.run(&decoded, &mut rgb)?;
            found = true;
        }
    }
    if !found {
        return Err(ffmpeg::Error::Eof);
    }

    to_image(&rgb).ok_or(ffmpeg::Error::InvalidData)
}

/// Copies an RGB24 frame into an image, dropping the row padding.
fn to_image(frame: &Video) -> Option<RgbImage> {
    let (width, height) = (frame.width(), frame.height());
    let row = width as usize * 3;
    let stride = frame.stride(0);
    let pixels = frame
        .data(0)
        .chunks(stride)
        .take(height as usize)
        .flat_map(|line| &line[..row])
        .copied()
        .collect();
    RgbImage::from_raw(width, height, pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_padding_is_stripped() {
        let mut frame = Video::new(format::Pixel::RGB24, 5, 3);
        let stride = frame.stride(0);
        assert!(stride >= 15);
        for (y, line) in frame.data_mut(0).chunks_mut(stride).enumerate() {
            line.fill(0xee);
            line[..15].fill(y as u8);
        }

        let image = to_image(&frame).unwrap();
        assert_eq!(image.dimensions(), (5, 3));
        assert_eq!(image.get_pixel(4, 0).0, [0, 0, 0]);
        assert_eq!(image.get_pixel(0, 2).0, [2, 2, 2]);
        assert!(image.pixels().all(|p| p.0[0] != 0xee));
    }
}
