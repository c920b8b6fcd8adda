use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use tracing::{error, info};
use widescreen::{
    fetcher::{Browser, FetchOptions, Fetcher, DEFAULT_FORMAT},
    logging,
};

/// Download a video in the best available quality using yt-dlp.
#[derive(Parser, Debug)]
#[command(name = "fetch", version)]
struct Args {
    /// Video URL to download
    url: String,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Browser to extract login cookies from (default: safari on macOS, chrome elsewhere)
    #[arg(short, long, value_enum, conflicts_with = "no_cookies")]
    browser: Option<Browser>,

    /// Disable browser cookie authentication
    #[arg(long)]
    no_cookies: bool,

    /// yt-dlp format selector
    #[arg(short, long, default_value = DEFAULT_FORMAT)]
    format: String,

    /// yt-dlp executable
    #[arg(long, default_value = "yt-dlp")]
    yt_dlp: PathBuf,

    /// More log output, repeat for more
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

const TROUBLESHOOTING: &[&str] = &[
    "check that the video URL is correct",
    "check your internet connection",
    "make sure yt-dlp is up to date (pip install -U yt-dlp)",
    "install or update ffmpeg, it is needed to merge the best streams",
    "for private videos, log in with the selected browser and check you have access",
];

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init_tracing(logging::level(args.verbose, args.quiet));

    let cookies = match (args.no_cookies, args.browser) {
        (true, _) => None,
        (false, browser) => Some(browser.unwrap_or_else(Browser::platform_default)),
    };
    let fetcher = Fetcher::new(FetchOptions {
        output_dir: args.output_dir,
        cookies,
        format: args.format,
        program: args.yt_dlp,
    });

    match fetcher.fetch(&args.url).await {
        Ok(path) => {
            println!("{}", path.display());
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            for (step, hint) in TROUBLESHOOTING.iter().enumerate() {
                info!("troubleshooting {}: {hint}", step + 1);
            }
            ExitCode::from(err.exit_code())
        }
    }
}
