//! Synthetic clips for the feature tests, so no media files are checked in.

use std::path::Path;

use ffmpeg::{codec, encoder, format, frame, ChannelLayout, Packet, Rational};

const FRAME_RATE: i32 = 25;
const SAMPLE_RATE: i32 = 44_100;

/// Writes an MPEG-4 clip of a moving gradient, optionally with a silent
/// mono AAC track of the same length.
pub fn write_clip(
    path: &Path,
    width: u32,
    height: u32,
    seconds: u32,
    with_audio: bool,
) -> Result<(), ffmpeg::Error> {
    ffmpeg::init()?;
    let mut octx = format::output(&path)?;
    let global_header = octx.format().flags().contains(format::Flags::GLOBAL_HEADER);

    let mut video = VideoTrack::add(&mut octx, width, height, global_header)?;
    let mut audio = if with_audio {
        Some(AudioTrack::add(&mut octx, global_header)?)
    } else {
        None
    };

    octx.write_header()?;
    video.stream_time_base = octx
        .stream(video.index)
        .map_or(video.time_base, |s| s.time_base());
    if let Some(audio) = audio.as_mut() {
        audio.stream_time_base = octx
            .stream(audio.index)
            .map_or(audio.time_base, |s| s.time_base());
    }

    let frames = seconds as i64 * FRAME_RATE as i64;
    for pts in 0..frames {
        video.send(pts, &mut octx)?;
    }
    video.flush(&mut octx)?;

    if let Some(audio) = audio.as_mut() {
        let total = seconds as i64 * SAMPLE_RATE as i64;
        let mut pts = 0;
        while pts < total {
            audio.send(pts, &mut octx)?;
            pts += audio.frame_size as i64;
        }
        audio.flush(&mut octx)?;
    }

    octx.write_trailer()
}

struct VideoTrack {
    index: usize,
    encoder: encoder::Video,
    width: u32,
    height: u32,
    time_base: Rational,
    stream_time_base: Rational,
}

impl VideoTrack {
    fn add(
        octx: &mut format::context::Output,
        width: u32,
        height: u32,
        global_header: bool,
    ) -> Result<Self, ffmpeg::Error> {
        let codec = encoder::find(codec::Id::MPEG4).ok_or(ffmpeg::Error::EncoderNotFound)?;
        let time_base = Rational(1, FRAME_RATE);
        let mut stream = octx.add_stream(codec)?;
        let index = stream.index();

        let mut settings = codec::context::Context::new_with_codec(codec).encoder().video()?;
        settings.set_width(width);
        settings.set_height(height);
        settings.set_format(format::Pixel::YUV420P);
        settings.set_frame_rate(Some(Rational(FRAME_RATE, 1)));
        settings.set_time_base(time_base);
        settings.set_bit_rate(400_000);
        if global_header {
            settings.set_flags(codec::Flags::GLOBAL_HEADER);
        }
        let encoder = settings.open_as(codec)?;
        stream.set_parameters(&encoder);
        stream.set_time_base(time_base);

        Ok(Self {
            index,
            encoder,
            width,
            height,
            time_base,
            stream_time_base: time_base,
        })
    }

    fn send(&mut self, pts: i64, octx: &mut format::context::Output) -> Result<(), ffmpeg::Error> {
        let mut frame = frame::Video::new(format::Pixel::YUV420P, self.width, self.height);
        for plane in 0..frame.planes() {
            let stride = frame.stride(plane);
            for (y, row) in frame.data_mut(plane).chunks_mut(stride).enumerate() {
                let shade = if plane == 0 { (y as i64 + pts * 3) % 220 + 16 } else { 128 };
                row.fill(shade as u8);
            }
        }
        frame.set_pts(Some(pts));
        self.encoder.send_frame(&frame)?;
        self.drain(octx)
    }

    fn flush(&mut self, octx: &mut format::context::Output) -> Result<(), ffmpeg::Error> {
        self.encoder.send_eof()?;
        self.drain(octx)
    }

    fn drain(&mut self, octx: &mut format::context::Output) -> Result<(), ffmpeg::Error> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.index);
            packet.rescale_ts(self.time_base, self.stream_time_base);
            packet.write_interleaved(octx)?;
        }
        Ok(())
    }
}

struct AudioTrack {
    index: usize,
    encoder: encoder::Audio,
    frame_size: u32,
    time_base: Rational,
    stream_time_base: Rational,
}

impl AudioTrack {
    fn add(octx: &mut format::context::Output, global_header: bool) -> Result<Self, ffmpeg::Error> {
        let codec = encoder::find(codec::Id::AAC).ok_or(ffmpeg::Error::EncoderNotFound)?;
        let time_base = Rational(1, SAMPLE_RATE);
        let mut stream = octx.add_stream(codec)?;
        let index = stream.index();

        let mut settings = codec::context::Context::new_with_codec(codec).encoder().audio()?;
        settings.set_rate(SAMPLE_RATE);
        settings.set_channel_layout(ChannelLayout::MONO);
        settings.set_channels(1);
        settings.set_format(format::Sample::F32(format::sample::Type::Planar));
        settings.set_bit_rate(64_000);
        settings.set_time_base(time_base);
        if global_header {
            settings.set_flags(codec::Flags::GLOBAL_HEADER);
        }
        let encoder = settings.open_as(codec)?;
        stream.set_parameters(&encoder);
        stream.set_time_base(time_base);

        let frame_size = match encoder.frame_size() {
            0 => 1024,
            size => size,
        };
        Ok(Self {
            index,
            encoder,
            frame_size,
            time_base,
            stream_time_base: time_base,
        })
    }

    fn send(&mut self, pts: i64, octx: &mut format::context::Output) -> Result<(), ffmpeg::Error> {
        let mut frame = frame::Audio::new(
            format::Sample::F32(format::sample::Type::Planar),
            self.frame_size as usize,
            ChannelLayout::MONO,
        );
        frame.set_rate(SAMPLE_RATE as u32);
        frame.data_mut(0).fill(0);
        frame.set_pts(Some(pts));
        self.encoder.send_frame(&frame)?;
        self.drain(octx)
    }

    fn flush(&mut self, octx: &mut format::context::Output) -> Result<(), ffmpeg::Error> {
        self.encoder.send_eof()?;
        self.drain(octx)
    }

    fn drain(&mut self, octx: &mut format::context::Output) -> Result<(), ffmpeg::Error> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.index);
            packet.rescale_ts(self.time_base, self.stream_time_base);
            packet.write_interleaved(octx)?;
        }
        Ok(())
    }
}
