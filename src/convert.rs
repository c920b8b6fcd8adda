use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use tracing::error;
use widescreen::{convert, logging, ConvertOptions, FillColor, FitPolicy};

/// Convert a video to a 16:9 aspect ratio by cropping or padding.
#[derive(Parser, Debug)]
#[command(name = "convert", version)]
struct Args {
    /// Input video file path
    input: PathBuf,

    /// Output video file path
    output: PathBuf,

    /// How sources that are not 16:9 are reframed
    #[arg(long, value_enum, default_value_t = FitPolicy::Crop)]
    fit: FitPolicy,

    /// Colour of padding bars: black, white, gray or #rrggbb
    #[arg(long, default_value = "black")]
    fill: FillColor,

    /// FFmpeg video encoder, e.g. libx264 (default: match the source)
    #[arg(long)]
    encoder: Option<String>,

    /// Video bit rate in bits per second (default: match the source)
    #[arg(long)]
    bit_rate: Option<usize>,

    /// Also save a frame of the result as an image (png, jpg)
    #[arg(long)]
    preview: Option<PathBuf>,

    /// More log output, repeat for more
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init_tracing(logging::level(args.verbose, args.quiet));

    let options = ConvertOptions {
        policy: args.fit,
        fill_color: args.fill,
        encoder: args.encoder,
        bit_rate: args.bit_rate,
        preview: args.preview,
    };

    match convert(&args.input, &args.output, &options) {
        Ok(conversion) => {
            println!("{}", conversion.output.display());
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            ExitCode::from(err.exit_code())
        }
    }
}
