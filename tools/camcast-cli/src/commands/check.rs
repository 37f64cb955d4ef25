//! Check host capabilities.

use camcast_capture::pipeline::{gstreamer_version, missing_elements, CAMERA_ELEMENTS, SINK_ELEMENTS};
use camcast_capture::Annotator;
use camcast_common::config::{config_file_path, AppConfig, SourceKind};

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("camcast System Check");
    println!("{}", "=".repeat(50));

    let mut ready = true;

    match gstreamer_version() {
        Ok(version) => println!("[OK] {version}"),
        Err(e) => {
            println!("[FAIL] GStreamer unavailable: {e}");
            ready = false;
        }
    }

    let camera_required = config.capture.source == SourceKind::Camera;
    for (label, elements, required) in [
        ("Camera capture", CAMERA_ELEMENTS, camera_required),
        ("MJPG recording", SINK_ELEMENTS, true),
    ] {
        match missing_elements(elements) {
            Ok(missing) if missing.is_empty() => println!("[OK] {label} elements"),
            Ok(missing) => {
                let tag = if required { "FAIL" } else { "WARN" };
                println!("[{tag}] {label}: missing {}", missing.join(", "));
                ready &= !required;
            }
            Err(e) => {
                println!("[FAIL] {label}: {e}");
                ready = false;
            }
        }
    }

    if Annotator::new(&config.overlay).has_text() {
        println!("[OK] Overlay font available");
    } else {
        println!("[WARN] No overlay font; frames will carry indicators only");
    }

    println!("     Config file: {}", config_file_path().display());
    match config.validate() {
        Ok(()) => println!("[OK] Configuration valid"),
        Err(e) => {
            println!("[FAIL] {e}");
            ready = false;
        }
    }

    println!();
    if ready {
        println!("All required capabilities are available. camcast is ready.");
    } else {
        println!("Some required capabilities are missing. See above for fixes.");
    }

    Ok(())
}
