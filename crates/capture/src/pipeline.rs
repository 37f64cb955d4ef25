//! GStreamer pipeline helpers shared by the camera source and the video sink.
//!
//! Pipelines are described with launch strings and the application ends
//! (`appsink` / `appsrc`) are looked up by name afterwards.

use std::path::Path;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use camcast_common::error::{CamcastError, CamcastResult};
use gst::prelude::*;
use gstreamer as gst;

/// Elements the camera source needs.
pub const CAMERA_ELEMENTS: &[&str] = &["v4l2src", "videoconvert", "videoscale", "appsink"];

/// Elements the MJPG/AVI sink needs.
pub const SINK_ELEMENTS: &[&str] = &["appsrc", "videoconvert", "jpegenc", "avimux", "filesink"];

/// Initialize GStreamer once per process.
pub fn init_gstreamer() -> CamcastResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(CamcastError::unsupported(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

/// Build a pipeline from a launch string.
pub fn launch_pipeline(name: &str, launch: &str) -> CamcastResult<gst::Pipeline> {
    init_gstreamer()?;

    let element = gst::parse::launch(launch)
        .map_err(|e| CamcastError::capture(format!("Failed to build {name} pipeline: {e}")))?;

    element
        .dynamic_cast::<gst::Pipeline>()
        .map_err(|_| CamcastError::capture(format!("{name} launch string did not produce a pipeline")))
}

/// Set a pipeline to Playing and wait (bounded) for the transition.
pub fn start_pipeline(name: &str, pipeline: &gst::Pipeline) -> CamcastResult<()> {
    pipeline
        .set_state(gst::State::Playing)
        .map_err(|e| CamcastError::capture(format!("Failed to start {name} pipeline: {e:?}")))?;

    match pipeline.state(gst::ClockTime::from_seconds(5)) {
        (Ok(_), gst::State::Playing, _) => {}
        (Ok(_), state, _) => {
            tracing::warn!(
                pipeline = name,
                ?state,
                "Pipeline did not reach Playing state within timeout"
            );
        }
        (Err(e), _, _) => {
            return Err(CamcastError::capture(format!(
                "{name} pipeline failed to reach Playing state: {e:?}"
            )));
        }
    }
    Ok(())
}

/// Wait for EOS (or an error) on the pipeline bus, bounded by `deadline`.
///
/// Returns `true` if EOS arrived.
pub fn wait_for_eos(name: &str, pipeline: &gst::Pipeline, deadline: Duration) -> bool {
    let Some(bus) = pipeline.bus() else {
        return false;
    };
    let start = Instant::now();
    loop {
        let elapsed = start.elapsed();
        if elapsed >= deadline {
            tracing::warn!(pipeline = name, "EOS drain timed out");
            return false;
        }
        let remaining = gst::ClockTime::from_nseconds((deadline - elapsed).as_nanos() as u64);
        match bus.timed_pop(remaining) {
            Some(msg) => match msg.view() {
                gst::MessageView::Eos(_) => {
                    tracing::debug!(pipeline = name, "EOS received; pipeline drained");
                    return true;
                }
                gst::MessageView::Error(e) => {
                    tracing::warn!(
                        pipeline = name,
                        error = %e.error(),
                        "Pipeline error during EOS drain"
                    );
                    return false;
                }
                _ => {}
            },
            None => {
                tracing::warn!(pipeline = name, "EOS drain timed out");
                return false;
            }
        }
    }
}

/// Tear a pipeline down to Null.
pub fn stop_pipeline(name: &str, pipeline: &gst::Pipeline) -> CamcastResult<()> {
    pipeline
        .set_state(gst::State::Null)
        .map_err(|e| CamcastError::capture(format!("Failed to stop {name} pipeline: {e:?}")))?;
    Ok(())
}

/// Which of `names` have no registered element factory.
pub fn missing_elements(names: &[&str]) -> CamcastResult<Vec<String>> {
    init_gstreamer()?;
    Ok(names
        .iter()
        .filter(|name| gst::ElementFactory::find(name).is_none())
        .map(|name| name.to_string())
        .collect())
}

/// GStreamer version string, e.g. "GStreamer 1.22.0".
pub fn gstreamer_version() -> CamcastResult<String> {
    init_gstreamer()?;
    Ok(gst::version_string().to_string())
}

pub(crate) fn escape_path(path: &Path) -> String {
    path.to_string_lossy().replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::escape_path;
    use std::path::Path;

    #[test]
    fn escape_path_quotes_double_quotes() {
        assert_eq!(
            escape_path(Path::new("/tmp/a\"b.avi")),
            "/tmp/a\\\"b.avi".to_string()
        );
    }
}
