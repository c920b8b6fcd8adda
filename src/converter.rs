use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Instant,
};

use ffmpeg::{
    codec, encoder, format, media, picture, util::frame::Video, Codec, Packet, Rational, Rescale,
};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::{
    canvas::{FrameCanvas, PIXEL_FORMAT},
    error::ConversionError,
    geometry::{self, FillColor, FitPolicy, Plan},
    preview,
    probe::{self, VideoStream},
};

/// Log progress every this many encoded frames.
const PROGRESS_INTERVAL: u64 = 100;

const FALLBACK_FRAME_RATE: Rational = Rational(25, 1);

#[cfg(unix)]
const OUTPUT_MODE: u32 = 0o644;

/// Knobs for a single conversion.
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    pub policy: FitPolicy,
    pub fill_color: FillColor,
    /// FFmpeg encoder name, e.g. `libx264`. Defaults to an encoder for the
    /// source codec, then MPEG-4 Part 2.
    pub encoder: Option<String>,
    /// Target video bit rate in bits per second. Defaults to the source's.
    pub bit_rate: Option<usize>,
    /// Also write one frame of the result as an image here.
    pub preview: Option<PathBuf>,
}

/// What a finished conversion did.
#[derive(Debug, Clone)]
pub struct Conversion {
    pub source: VideoStream,
    pub plan: Plan,
    pub frames: u64,
    pub output: PathBuf,
}

/// Writes a 16:9 version of `input` to `output`.
///
/// The result is staged in a temporary file next to `output` and renamed
/// into place only once the container trailer has been written, so a failed
/// run leaves nothing behind. The input is never modified.
pub fn convert(
    input: &Path,
    output: &Path,
    options: &ConvertOptions,
) -> Result<Conversion, ConversionError> {
    let started = Instant::now();
    let source = probe::probe(input)?;
    let plan = Plan::new(source.width, source.height, options.policy, options.fill_color)?;
    info!(
        "original dimensions: {}x{} (ratio: {:.4})",
        source.width,
        source.height,
        source.ratio()
    );
    info!(
        "new dimensions: {} (ratio: {:.4})",
        plan.target,
        geometry::ratio(plan.target.width(), plan.target.height())
    );
    match &plan.transform {
        Some(transform) => info!("applying {transform}"),
        None => info!("source is already 16:9, copying streams unchanged"),
    }

    ensure_distinct(input, output)?;
    let staged = stage(output)?;
    let frames = transcode(input, staged.path(), &source, &plan, options)?;

    if let Some(path) = &options.preview {
        preview::save_preview(staged.path(), path)?;
    }
    publish(staged, output)?;

    info!(
        frames,
        elapsed = ?started.elapsed(),
        "conversion complete, output saved to {}",
        output.display()
    );
    Ok(Conversion {
        source,
        plan,
        frames,
        output: output.to_path_buf(),
    })
}

fn ensure_distinct(input: &Path, output: &Path) -> Result<(), ConversionError> {
    if let (Ok(input), Ok(resolved)) = (input.canonicalize(), output.canonicalize()) {
        if input == resolved {
            let err = io::Error::new(
                io::ErrorKind::InvalidInput,
                "output would overwrite the input",
            );
            return Err(ConversionError::io(output, err));
        }
    }
    Ok(())
}

/// Creates the temporary output in the destination directory, keeping the
/// extension so FFmpeg picks the same container.
fn stage(output: &Path) -> Result<NamedTempFile, ConversionError> {
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let suffix = output
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    tempfile::Builder::new()
        .prefix(".widescreen-")
        .suffix(&suffix)
        .tempfile_in(dir)
        .map_err(|err| ConversionError::io(output, err))
}

/// Renames the finished staging file over `output`. Staging files are
/// created owner-only, so the usual `rw-r--r--` is restored first.
fn publish(staged: NamedTempFile, output: &Path) -> Result<(), ConversionError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(staged.path(), fs::Permissions::from_mode(OUTPUT_MODE))
            .map_err(|err| ConversionError::io(output, err))?;
    }
    staged
        .persist(output)
        .map_err(|err| ConversionError::io(output, err.error))?;
    Ok(())
}

fn transcode(
    input: &Path,
    staged: &Path,
    source: &VideoStream,
    plan: &Plan,
    options: &ConvertOptions,
) -> Result<u64, ConversionError> {
    let mut ictx = format::input(&input).map_err(|err| ConversionError::probe(input, err))?;
    let mut octx = format::output(&staged)
        .map_err(|err| ConversionError::encode("opening the output container", staged, err))?;

    let (video_index, video_time_base, video_parameters) = {
        let stream = ictx
            .streams()
            .best(media::Type::Video)
            .ok_or_else(|| ConversionError::probe(input, "no video track"))?;
        (stream.index(), stream.time_base(), stream.parameters())
    };
    let audio_track = ictx
        .streams()
        .best(media::Type::Audio)
        .map(|stream| (stream.index(), stream.time_base(), stream.parameters()));

    let mut video = match plan.transform {
        None => VideoRoute::Copy(
            StreamCopy::add(&mut octx, video_index, video_time_base, video_parameters)
                .map_err(|err| ConversionError::encode("adding the video stream", staged, err))?,
        ),
        Some(_) => {
            let reframer = Reframer::new(
                &mut octx,
                video_index,
                video_time_base,
                video_parameters,
                source,
                plan,
                options,
            )
            .map_err(|err| match err {
                ConversionError::Encode { stage, source } => {
                    ConversionError::encode(stage, staged, source)
                }
                other => other,
            })?;
            VideoRoute::Reframe(Box::new(reframer))
        }
    };
    let mut audio = audio_track
        .map(|(index, time_base, parameters)| {
            StreamCopy::add(&mut octx, index, time_base, parameters)
        })
        .transpose()
        .map_err(|err| ConversionError::encode("adding the audio stream", staged, err))?;

    octx.set_metadata(ictx.metadata().to_owned());
    octx.write_header()
        .map_err(|err| ConversionError::encode("writing the container header", staged, err))?;

    // The muxer may pick its own stream time bases while writing the header
    video.bind(&octx);
    if let Some(audio) = audio.as_mut() {
        audio.bind(&octx);
    }

    let mut progress = Progress::new(source.frame_count);
    for (stream, packet) in ictx.packets() {
        let index = stream.index();
        if index == video_index {
            video.push(packet, &mut octx, &mut progress, staged)?;
        } else if let Some(audio) = audio.as_ref().filter(|audio| audio.input_index == index) {
            audio
                .write(packet, &mut octx)
                .map_err(|err| ConversionError::encode("writing audio packets", staged, err))?;
        }
    }
    video.finish(&mut octx, &mut progress, staged)?;

    octx.write_trailer()
        .map_err(|err| ConversionError::encode("writing the container trailer", staged, err))?;
    Ok(progress.frames)
}

struct Progress {
    frames: u64,
    total: Option<u64>,
}

impl Progress {
    fn new(total: Option<u64>) -> Self {
        Self { frames: 0, total }
    }

    fn tick(&mut self) {
        self.frames += 1;
        if self.frames % PROGRESS_INTERVAL != 0 {
            return;
        }
        match self.total {
            Some(total) if total > 0 => {
                let percent = self.frames as f64 / total as f64 * 100.0;
                info!("progress: {percent:.1}% ({}/{total} frames)", self.frames);
            }
            _ => info!("progress: {} frames", self.frames),
        }
    }
}

/// Remuxes one input stream's packets without touching their payload.
struct StreamCopy {
    input_index: usize,
    input_time_base: Rational,
    output_index: usize,
    output_time_base: Rational,
}

impl StreamCopy {
    fn add(
        octx: &mut format::context::Output,
        input_index: usize,
        input_time_base: Rational,
        parameters: codec::Parameters,
    ) -> Result<Self, ffmpeg::Error> {
        let mut stream = octx.add_stream(encoder::find(codec::Id::None))?;
        stream.set_parameters(parameters);
        // SAFETY: the parameters belong to a stream owned by `octx`, which
        // outlives this write. A tag from another container would be rejected.
        unsafe {
            (*stream.parameters().as_mut_ptr()).codec_tag = 0;
        }
        Ok(Self {
            input_index,
            input_time_base,
            output_index: stream.index(),
            output_time_base: input_time_base,
        })
    }

    fn bind(&mut self, octx: &format::context::Output) {
        if let Some(stream) = octx.stream(self.output_index) {
            self.output_time_base = stream.time_base();
        }
    }

    fn write(
        &self,
        mut packet: Packet,
        octx: &mut format::context::Output,
    ) -> Result<(), ffmpeg::Error> {
        packet.rescale_ts(self.input_time_base, self.output_time_base);
        packet.set_position(-1);
        packet.set_stream(self.output_index);
        packet.write_interleaved(octx)
    }
}

enum VideoRoute {
    Copy(StreamCopy),
    Reframe(Box<Reframer>),
}

impl VideoRoute {
    fn bind(&mut self, octx: &format::context::Output) {
        match self {
            Self::Copy(copy) => copy.bind(octx),
            Self::Reframe(reframer) => reframer.bind(octx),
        }
    }

    fn push(
        &mut self,
        packet: Packet,
        octx: &mut format::context::Output,
        progress: &mut Progress,
        staged: &Path,
    ) -> Result<(), ConversionError> {
        match self {
            Self::Copy(copy) => {
                copy.write(packet, octx)
                    .map_err(|err| ConversionError::encode("writing video packets", staged, err))?;
                progress.tick();
                Ok(())
            }
            Self::Reframe(reframer) => reframer.push(&packet, octx, progress, staged),
        }
    }

    fn finish(
        &mut self,
        octx: &mut format::context::Output,
        progress: &mut Progress,
        staged: &Path,
    ) -> Result<(), ConversionError> {
        match self {
            Self::Copy(_) => Ok(()),
            Self::Reframe(reframer) => reframer.finish(octx, progress, staged),
        }
    }
}

/// Decode, relocate into the target frame, encode.
struct Reframer {
    decoder: ffmpeg::decoder::Video,
    input_time_base: Rational,
    canvas: FrameCanvas,
    encoder: encoder::Video,
    encoder_time_base: Rational,
    output_index: usize,
    output_time_base: Rational,
    last_pts: Option<i64>,
}

impl Reframer {
    fn new(
        octx: &mut format::context::Output,
        input_index: usize,
        input_time_base: Rational,
        parameters: codec::Parameters,
        source: &VideoStream,
        plan: &Plan,
        options: &ConvertOptions,
    ) -> Result<Self, ConversionError> {
        let encode = |stage| move |source| ConversionError::Encode { stage, source };

        let decoder = codec::context::Context::from_parameters(parameters)
            .and_then(|context| context.decoder().video())
            .map_err(encode("opening the video decoder"))?;

        let codec = select_encoder(options.encoder.as_deref(), source.video_codec)?;
        let global_header = octx.format().flags().contains(format::Flags::GLOBAL_HEADER);
        let frame_rate = source.frame_rate.unwrap_or(FALLBACK_FRAME_RATE);
        let encoder_time_base = frame_rate.invert();

        let mut stream = octx.add_stream(codec).map_err(encode("adding the video stream"))?;
        let output_index = stream.index();

        let mut settings = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(encode("creating the video encoder"))?;
        settings.set_width(plan.target.width());
        settings.set_height(plan.target.height());
        settings.set_format(PIXEL_FORMAT);
        settings.set_aspect_ratio(Rational(1, 1));
        settings.set_frame_rate(Some(frame_rate));
        settings.set_time_base(encoder_time_base);
        if let Some(bit_rate) = options.bit_rate.or(source.bit_rate) {
            settings.set_bit_rate(bit_rate);
        }
        if global_header {
            settings.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let encoder = settings.open_as(codec).map_err(encode("opening the video encoder"))?;
        stream.set_parameters(&encoder);
        stream.set_time_base(encoder_time_base);
        debug!(
            encoder = codec.name(),
            stream = output_index,
            time_base = %encoder_time_base,
            "video encoder ready"
        );

        Ok(Self {
            decoder,
            input_time_base,
            canvas: FrameCanvas::new(*plan),
            encoder,
            encoder_time_base,
            output_index,
            output_time_base: encoder_time_base,
            last_pts: None,
        })
    }

    fn bind(&mut self, octx: &format::context::Output) {
        if let Some(stream) = octx.stream(self.output_index) {
            self.output_time_base = stream.time_base();
        }
    }

    fn push(
        &mut self,
        packet: &Packet,
        octx: &mut format::context::Output,
        progress: &mut Progress,
        staged: &Path,
    ) -> Result<(), ConversionError> {
        self.decoder
            .send_packet(packet)
            .map_err(|err| ConversionError::encode("decoding video", staged, err))?;
        self.drain_decoder(octx, progress, staged)
    }

    fn finish(
        &mut self,
        octx: &mut format::context::Output,
        progress: &mut Progress,
        staged: &Path,
    ) -> Result<(), ConversionError> {
        self.decoder
            .send_eof()
            .map_err(|err| ConversionError::encode("flushing the video decoder", staged, err))?;
        self.drain_decoder(octx, progress, staged)?;
        self.encoder
            .send_eof()
            .map_err(|err| ConversionError::encode("flushing the video encoder", staged, err))?;
        self.drain_encoder(octx, staged)
    }

    fn drain_decoder(
        &mut self,
        octx: &mut format::context::Output,
        progress: &mut Progress,
        staged: &Path,
    ) -> Result<(), ConversionError> {
        let mut decoded = Video::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let mut frame = self
                .canvas
                .apply(&decoded)
                .map_err(|err| ConversionError::encode("reframing video", staged, err))?;
            let pts = self.next_pts(decoded.timestamp());
            frame.set_pts(Some(pts));
            frame.set_kind(picture::Type::None);
            self.encoder
                .send_frame(&frame)
                .map_err(|err| ConversionError::encode("encoding video", staged, err))?;
            progress.tick();
            self.drain_encoder(octx, staged)?;
        }
        Ok(())
    }

    fn drain_encoder(
        &mut self,
        octx: &mut format::context::Output,
        staged: &Path,
    ) -> Result<(), ConversionError> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.output_index);
            packet.rescale_ts(self.encoder_time_base, self.output_time_base);
            packet
                .write_interleaved(octx)
                .map_err(|err| ConversionError::encode("writing video packets", staged, err))?;
        }
        Ok(())
    }

    /// Maps a decoded timestamp into the encoder time base, forcing the
    /// sequence to be strictly increasing.
    fn next_pts(&mut self, timestamp: Option<i64>) -> i64 {
        let pts = next_pts(self.last_pts, timestamp, self.input_time_base, self.encoder_time_base);
        self.last_pts = Some(pts);
        pts
    }
}

fn next_pts(last: Option<i64>, timestamp: Option<i64>, from: Rational, to: Rational) -> i64 {
    let following = last.map_or(0, |last| last + 1);
    match timestamp.map(|ts| ts.rescale(from, to)) {
        Some(pts) if pts >= following => pts,
        _ => following,
    }
}

fn select_encoder(name: Option<&str>, source: codec::Id) -> Result<Codec, ConversionError> {
    let not_found = ConversionError::Encode {
        stage: "selecting the video encoder",
        source: ffmpeg::Error::EncoderNotFound,
    };
    match name {
        Some(name) => encoder::find_by_name(name)
            .filter(supports_pixel_format)
            .ok_or(not_found),
        None => encoder::find(source)
            .filter(supports_pixel_format)
            .or_else(|| encoder::find(codec::Id::MPEG4))
            .ok_or(not_found),
    }
}

fn supports_pixel_format(codec: &Codec) -> bool {
    match codec.video() {
        Ok(video) => video
            .formats()
            .map_or(true, |mut formats| formats.any(|format| format == PIXEL_FORMAT)),
        Err(_) => false,
    }
}
