extern crate ffmpeg_next as ffmpeg;

mod support;

use std::{
    path::PathBuf,
    process::{Command, Output},
    time::Duration,
};

use cucumber::{given, then, when, writer, World};
use tempfile::TempDir;
use widescreen::{probe, VideoStream};

#[derive(Debug, World)]
#[world(init = Self::new)]
struct WidescreenWorld {
    dir: TempDir,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    last_run: Option<Output>,
}

impl WidescreenWorld {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            input: None,
            output: None,
            last_run: None,
        }
    }

    fn run(&mut self, program: &str, args: &[&str]) {
        let output = Command::new(program)
            .args(args)
            .arg("--quiet")
            .current_dir(self.dir.path())
            .output()
            .unwrap();
        self.last_run = Some(output);
    }

    fn convert(&mut self, input: &str, output: &str, extra: &str) {
        self.input = Some(self.dir.path().join(input));
        self.output = Some(self.dir.path().join(output));
        let mut args = vec![input, output];
        args.extend(extra.split_whitespace());
        self.run(env!("CARGO_BIN_EXE_convert"), &args);
    }

    fn last_run(&self) -> &Output {
        self.last_run.as_ref().expect("nothing was run")
    }

    fn source(&self) -> VideoStream {
        probe(self.input.as_ref().unwrap()).unwrap()
    }

    fn result(&self) -> VideoStream {
        probe(self.output.as_ref().unwrap()).unwrap()
    }
}

#[given(regex = r"^a (\d+)x(\d+) clip of (\d+) seconds (with|without) audio named (\S+)$")]
async fn given_a_clip(
    world: &mut WidescreenWorld,
    width: u32,
    height: u32,
    seconds: u32,
    audio: String,
    name: String,
) {
    let path = world.dir.path().join(&name);
    support::write_clip(&path, width, height, seconds, audio == "with").unwrap();
    world.input = Some(path);
}

#[when(regex = r#"^(\S+) is converted to "([^"]*)"$"#)]
async fn when_converted(world: &mut WidescreenWorld, input: String, output: String) {
    world.convert(&input, &output, "");
}

#[when(regex = r#"^(\S+) is converted to "([^"]*)" with "([^"]*)"$"#)]
async fn when_converted_with(
    world: &mut WidescreenWorld,
    input: String,
    output: String,
    args: String,
) {
    world.convert(&input, &output, &args);
}

#[when(regex = r#"^"([^"]*)" is fetched with "([^"]*)"$"#)]
async fn when_fetched(world: &mut WidescreenWorld, url: String, args: String) {
    let mut all = vec![url.as_str()];
    all.extend(args.split_whitespace());
    world.run(env!("CARGO_BIN_EXE_fetch"), &all);
}

#[then("the command succeeds")]
async fn then_succeeds(world: &mut WidescreenWorld) {
    let run = world.last_run();
    assert!(run.status.success(), "{}", String::from_utf8_lossy(&run.stderr));
}

#[then(regex = r"^the command fails with exit code (\d+)$")]
async fn then_fails_with(world: &mut WidescreenWorld, code: i32) {
    let run = world.last_run();
    assert_eq!(run.status.code(), Some(code), "{}", String::from_utf8_lossy(&run.stderr));
}

#[then(regex = r"^the output is (\d+)x(\d+)$")]
async fn then_output_is(world: &mut WidescreenWorld, width: u32, height: u32) {
    let result = world.result();
    assert_eq!((result.width, result.height), (width, height));
    assert_eq!(result.width * 9, result.height * 16);
}

#[then("the output keeps the source frame rate and duration")]
async fn then_keeps_timing(world: &mut WidescreenWorld) {
    let (source, result) = (world.source(), world.result());
    let (fps, source_fps) = (result.fps().unwrap(), source.fps().unwrap());
    assert!((fps - source_fps).abs() < 0.01, "{fps} fps vs {source_fps} fps");
    assert_close(result.duration, source.duration);
}

#[then("the output has as many video frames as the source")]
async fn then_same_frame_count(world: &mut WidescreenWorld) {
    let (source, result) = (world.source(), world.result());
    assert_eq!(result.frame_count.unwrap(), source.frame_count.unwrap());
}

#[then("the output audio lasts as long as the source audio")]
async fn then_audio_kept(world: &mut WidescreenWorld) {
    let (source, result) = (world.source(), world.result());
    let (source, result) = (source.audio.unwrap(), result.audio.unwrap());
    assert_eq!(result.codec, source.codec);
    assert_close(result.duration, source.duration);
}

#[then("the output has no audio")]
async fn then_no_audio(world: &mut WidescreenWorld) {
    assert!(world.result().audio.is_none());
}

#[then("the output video codec matches the source")]
async fn then_same_codec(world: &mut WidescreenWorld) {
    assert_eq!(world.result().video_codec, world.source().video_codec);
}

#[then(regex = r#"^no file named "([^"]*)" exists$"#)]
async fn then_no_file(world: &mut WidescreenWorld, name: String) {
    assert!(!world.dir.path().join(name).exists());
}

#[then(regex = r#"^"([^"]*)" is a (\d+)x(\d+) image$"#)]
async fn then_image(world: &mut WidescreenWorld, name: String, width: u32, height: u32) {
    let image = image::open(world.dir.path().join(name)).unwrap();
    assert_eq!((image.width(), image.height()), (width, height));
}

#[then("the working directory holds no staging files")]
async fn then_no_staging(world: &mut WidescreenWorld) {
    let leftovers: Vec<_> = std::fs::read_dir(world.dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(".widescreen-"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

fn assert_close(left: Option<Duration>, right: Option<Duration>) {
    let (left, right) = (left.unwrap().as_secs_f64(), right.unwrap().as_secs_f64());
    assert!((left - right).abs() < 0.1, "{left}s vs {right}s");
}

#[tokio::main]
async fn main() {
    WidescreenWorld::cucumber()
        .max_concurrent_scenarios(1)
        .with_writer(writer::Libtest::or_basic())
        .run("tests/features")
        .await;
}
