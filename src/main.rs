use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use widescreen::{geometry, logging, probe, FillColor, FitPolicy, Plan};

/// Show what `convert` would do with a video, without writing anything.
#[derive(Parser, Debug)]
#[command(name = "widescreen", version)]
struct Args {
    /// Video file to inspect
    input: PathBuf,

    /// Reframing policy to plan with
    #[arg(long, value_enum, default_value_t = FitPolicy::Crop)]
    fit: FitPolicy,

    /// Colour of padding bars: black, white, gray or #rrggbb
    #[arg(long, default_value = "black")]
    fill: FillColor,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_tracing(logging::level(0, true));

    let source = probe(&args.input).with_context(|| format!("probing {}", args.input.display()))?;
    println!("source: {source}");
    println!("ratio: {:.4}", source.ratio());
    if let Some(bit_rate) = source.bit_rate {
        println!("bit rate: {bit_rate} b/s");
    }
    if let Some(frames) = source.frame_count {
        println!("frames: {frames}");
    }
    if let Some(audio) = &source.audio {
        let duration = audio.duration.map(|d| format!("{:.2}s", d.as_secs_f64()));
        println!("audio: {} {}", audio.codec.name(), duration.unwrap_or_default());
    }

    let plan = Plan::new(source.width, source.height, args.fit, args.fill)
        .context("planning the 16:9 geometry")?;
    println!(
        "target: {} (ratio: {:.4})",
        plan.target,
        geometry::ratio(plan.target.width(), plan.target.height())
    );
    match plan.transform {
        Some(transform) => println!("transform: {transform}"),
        None => println!("transform: none, streams are copied unchanged"),
    }
    Ok(())
}
