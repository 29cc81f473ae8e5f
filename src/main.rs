use anyhow::Context;
use event_recorder::capture::CaptureSource;
use event_recorder::export::FfmpegMuxer;
use event_recorder::recorder::AppConfig;
use event_recorder::Recorder;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Record from the test pattern, trigger twice, export both segments.
///
/// Usage: `event-recorder [config.json]`
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    event_recorder::init_logging();
    tracing::info!("Starting Event Recorder v{}", env!("CARGO_PKG_VERSION"));

    let app = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => AppConfig::load(&path).with_context(|| format!("loading {:?}", path))?,
        None => AppConfig::default(),
    };
    let window = app.recorder.window();

    let mut recorder = Recorder::new(app, capture_source(), Arc::new(FfmpegMuxer::new()))
        .context("creating recorder")?;
    recorder.set_state_observer(|old, new| tracing::info!("State {:?} -> {:?}", old, new));

    recorder.start()?;
    tokio::time::sleep(window + Duration::from_millis(500)).await;
    recorder.capture_segment()?;

    tokio::time::sleep(Duration::from_secs(1)).await;
    recorder.capture_segment()?;
    recorder.pause();

    let artifacts = recorder.export_all().await.context("exporting segments")?;
    for artifact in &artifacts {
        match artifact.duration() {
            Some(secs) => println!("{} ({:.2}s)", artifact.output_path().display(), secs),
            None => println!("{}", artifact.output_path().display()),
        }
    }

    // Artifacts stay on disk; the next stop() or reconfiguration clears them
    Ok(())
}

#[cfg(feature = "webcam")]
fn capture_source() -> Box<dyn CaptureSource> {
    Box::new(event_recorder::capture::WebcamSource::new(None))
}

#[cfg(not(feature = "webcam"))]
fn capture_source() -> Box<dyn CaptureSource> {
    Box::new(event_recorder::capture::TestPatternSource::new(640, 360))
}
