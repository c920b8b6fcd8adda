//! Video download through the `yt-dlp` executable.
//!
//! `yt-dlp` does stream resolution, retrieval and audio/video merging. This
//! module builds its command lines, reads its metadata and progress output,
//! and classifies its failures into [`DownloadError`].

use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
    process::Stdio,
};

use serde::Deserialize;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
    process::Command,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::DownloadError;

/// Best MP4 video with M4A audio, falling back to the best single file.
pub const DEFAULT_FORMAT: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";

const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";
const PROGRESS_TEMPLATE: &str =
    "download:progress %(progress._percent_str)s of %(progress._total_bytes_str)s";
const SAVED_TEMPLATE: &str = "after_move:saved %(filepath)s";
/// Prefer resolutions from 4K down to 720p, highest first.
const FORMAT_SORT: &str = "res:2160,res:1440,res:1080,res:720";

/// Browsers `yt-dlp` can read login cookies from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Browser {
    Chrome,
    Firefox,
    Safari,
    Edge,
    Opera,
}

impl Browser {
    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            Self::Safari
        } else {
            Self::Chrome
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chrome => "chrome",
            Self::Firefox => "firefox",
            Self::Safari => "safari",
            Self::Edge => "edge",
            Self::Opera => "opera",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Directory the video is saved in.
    pub output_dir: PathBuf,
    /// Browser whose cookies authenticate the request, if any.
    pub cookies: Option<Browser>,
    /// `yt-dlp` format selector.
    pub format: String,
    /// The `yt-dlp` executable.
    pub program: PathBuf,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            cookies: Some(Browser::platform_default()),
            format: DEFAULT_FORMAT.to_string(),
            program: PathBuf::from("yt-dlp"),
        }
    }
}

/// The subset of `yt-dlp --dump-json` output used here.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoInfo {
    #[serde(default = "untitled")]
    pub title: String,
    /// Seconds.
    pub duration: Option<f64>,
    #[serde(default)]
    pub formats: Vec<FormatInfo>,
}

fn untitled() -> String {
    "video".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct FormatInfo {
    pub format_id: Option<String>,
    pub vcodec: Option<String>,
    pub height: Option<u32>,
    pub filesize: Option<u64>,
    pub filesize_approx: Option<u64>,
}

impl FormatInfo {
    fn has_video(&self) -> bool {
        self.vcodec.as_deref() != Some("none")
    }

    /// Exact size when known, otherwise the estimate.
    pub fn size(&self) -> Option<u64> {
        self.filesize.or(self.filesize_approx)
    }
}

impl VideoInfo {
    /// The tallest video format, larger files winning ties.
    pub fn best_video(&self) -> Option<&FormatInfo> {
        self.formats
            .iter()
            .filter(|format| format.has_video())
            .max_by_key(|format| (format.height.unwrap_or(0), format.size().unwrap_or(0)))
    }
}

/// One line of `yt-dlp` stdout, as shaped by the templates above.
#[derive(Debug, PartialEq, Eq)]
enum Event {
    Progress { percent: String, total: String },
    Saved(PathBuf),
    Message(String),
}

fn parse_line(line: &str) -> Event {
    if let Some(rest) = line.strip_prefix("progress ") {
        let (percent, total) = rest.split_once(" of ").unwrap_or((rest, "?"));
        return Event::Progress {
            percent: percent.trim().to_string(),
            total: total.trim().to_string(),
        };
    }
    if let Some(path) = line.strip_prefix("saved ") {
        return Event::Saved(PathBuf::from(path));
    }
    Event::Message(line.to_string())
}

/// Human-readable size with two decimals, base 1024.
pub fn format_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if value < 1024.0 {
            return format!("{value:.2} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.2} TB")
}

/// `m:ss`.
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

/// Checks that `url` is an absolute http(s) URL.
pub fn validate_url(url: &str) -> Result<Url, DownloadError> {
    let invalid = |reason: String| DownloadError::InvalidUrl {
        url: url.to_string(),
        reason,
    };
    let parsed = Url::parse(url.trim()).map_err(|err| invalid(err.to_string()))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host().is_some() => Ok(parsed),
        "http" | "https" => Err(invalid("missing host".to_string())),
        scheme => Err(invalid(format!("unsupported scheme {scheme:?}"))),
    }
}

fn classify_failure(url: &Url, stderr: &str) -> DownloadError {
    const NETWORK_MARKERS: [&str; 7] = [
        "Unable to download",
        "urlopen error",
        "timed out",
        "Connection",
        "HTTP Error 5",
        "Name or service not known",
        "Temporary failure in name resolution",
    ];
    let reason = stderr
        .lines()
        .rev()
        .find(|line| line.starts_with("ERROR"))
        .or_else(|| stderr.lines().rev().find(|line| !line.trim().is_empty()))
        .unwrap_or("yt-dlp exited with an error")
        .trim()
        .to_string();
    let url = url.to_string();
    if NETWORK_MARKERS.iter().any(|marker| stderr.contains(marker)) {
        DownloadError::Network { url, reason }
    } else {
        DownloadError::Unavailable { url, reason }
    }
}

pub struct Fetcher {
    options: FetchOptions,
}

impl Fetcher {
    pub fn new(options: FetchOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Downloads `url` into the output directory and returns the saved path.
    pub async fn fetch(&self, url: &str) -> Result<PathBuf, DownloadError> {
        let url = validate_url(url)?;
        let dir = &self.options.output_dir;
        tokio::fs::create_dir_all(dir).await.map_err(|source| DownloadError::Io {
            path: dir.clone(),
            source,
        })?;
        if let Some(browser) = self.options.cookies {
            info!("using cookies from {} for authentication", browser.as_str());
        }

        info!("fetching video information");
        let info = self.inspect(&url).await?;
        log_details(&info);

        info!("starting download");
        let path = self.download(&url, &info).await?;
        info!("download completed, saved to {}", path.display());
        Ok(path)
    }

    /// Reads the video's metadata without downloading it.
    pub async fn inspect(&self, url: &Url) -> Result<VideoInfo, DownloadError> {
        let output = self
            .command(self.inspect_args(url))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| self.tool_error(source))?;
        if !output.status.success() {
            return Err(classify_failure(url, &String::from_utf8_lossy(&output.stderr)));
        }
        serde_json::from_slice(&output.stdout).map_err(|source| DownloadError::Metadata {
            url: url.to_string(),
            source,
        })
    }

    async fn download(&self, url: &Url, info: &VideoInfo) -> Result<PathBuf, DownloadError> {
        let mut child = self
            .command(self.download_args(url))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| self.tool_error(source))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let read_stdout = async {
            let mut saved = None;
            let Some(stdout) = stdout else {
                return Ok(saved);
            };
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                match parse_line(&line) {
                    Event::Progress { percent, total } => {
                        info!("downloading: {percent} of {total}")
                    }
                    Event::Saved(path) => saved = Some(path),
                    Event::Message(message) if !message.trim().is_empty() => {
                        debug!("yt-dlp: {message}")
                    }
                    Event::Message(_) => {}
                }
            }
            Ok::<_, io::Error>(saved)
        };
        let read_stderr = async {
            let mut text = String::new();
            if let Some(mut stderr) = stderr {
                stderr.read_to_string(&mut text).await?;
            }
            Ok::<_, io::Error>(text)
        };

        let (saved, errors) = tokio::try_join!(read_stdout, read_stderr)
            .map_err(|source| self.tool_error(source))?;
        let status = child.wait().await.map_err(|source| self.tool_error(source))?;
        if !status.success() {
            return Err(classify_failure(url, &errors));
        }
        for line in errors.lines().filter(|line| line.starts_with("WARNING")) {
            warn!("yt-dlp: {line}");
        }

        let path = saved
            .unwrap_or_else(|| self.options.output_dir.join(format!("{}.mp4", info.title)));
        if !path.exists() {
            return Err(DownloadError::Unavailable {
                url: url.to_string(),
                reason: format!("yt-dlp reported success but {} does not exist", path.display()),
            });
        }
        Ok(path)
    }

    fn command(&self, args: Vec<OsString>) -> Command {
        let mut command = Command::new(&self.options.program);
        command.args(args).stdin(Stdio::null()).kill_on_drop(true);
        command
    }

    fn common_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--no-playlist".into()];
        if let Some(browser) = self.options.cookies {
            args.push("--cookies-from-browser".into());
            args.push(browser.as_str().into());
        }
        args
    }

    fn inspect_args(&self, url: &Url) -> Vec<OsString> {
        let mut args = self.common_args();
        args.extend(["--dump-json", "--skip-download", url.as_str()].map(OsString::from));
        args
    }

    fn download_args(&self, url: &Url) -> Vec<OsString> {
        let mut args = self.common_args();
        args.extend(
            [
                "--format",
                self.options.format.as_str(),
                "--format-sort",
                FORMAT_SORT,
                "--prefer-free-formats",
                "--merge-output-format",
                "mp4",
                "--output",
                OUTPUT_TEMPLATE,
                "--newline",
                "--progress",
                "--progress-template",
                PROGRESS_TEMPLATE,
                "--print",
                SAVED_TEMPLATE,
                "--no-simulate",
            ]
            .map(OsString::from),
        );
        args.push("--paths".into());
        args.push(self.options.output_dir.as_os_str().to_owned());
        args.push(url.as_str().into());
        args
    }

    fn tool_error(&self, source: io::Error) -> DownloadError {
        DownloadError::Tool {
            program: display_program(&self.options.program),
            source,
        }
    }
}

fn display_program(program: &Path) -> String {
    program.display().to_string()
}

fn log_details(info: &VideoInfo) {
    info!("title: {}", info.title);
    if let Some(duration) = info.duration {
        info!("duration: {}", format_duration(duration));
    }
    if let Some(best) = info.best_video() {
        match best.height {
            Some(height) => info!("best quality available: {height}p"),
            None => info!("best quality available: N/A"),
        }
        if let Some(size) = best.size() {
            info!("approximate size: {}", format_size(size));
        }
    }
}
