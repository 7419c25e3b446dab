//! Compile-time application configuration
//!
//! There are no CLI flags or config files; everything the app needs to know
//! is a named constant here. Model calibration constants live next to the
//! detector in `crate::detect` since they are fixed by the model artifact.

use std::time::Duration;

/// Camera device index passed to the capture backend.
pub const CAMERA_INDEX: u32 = 0;

/// Requested capture resolution, applied as a best-effort device hint.
pub const CAPTURE_WIDTH: u32 = 1920;
pub const CAPTURE_HEIGHT: u32 = 1080;

/// Brightness hint, also best-effort (the device may ignore it).
pub const CAPTURE_BRIGHTNESS: i64 = 70;

/// Minimum score for a detection to be kept.
pub const CONFIDENCE_THRESHOLD: f32 = 0.50;

/// Working resolution every captured frame is resized to before detection
/// and display.
pub const FRAME_WIDTH: u32 = 700;
pub const FRAME_HEIGHT: u32 = 500;

/// Delay between loop iterations while detection is running.
pub const LOOP_INTERVAL: Duration = Duration::from_millis(10);

/// Startup file dependencies. Missing any of these is fatal at launch.
pub const CLASS_LIST_PATH: &str = "models/coco.names";
pub const MODEL_WEIGHTS_PATH: &str = "models/ssd_mobilenet_v3_large_coco.onnx";
pub const MODEL_MANIFEST_PATH: &str = "models/ssd_mobilenet_v3_large_coco.json";

/// Primary window.
pub const WINDOW_TITLE: &str = "Object Detection App";
pub const WINDOW_WIDTH: u32 = 1280;
pub const WINDOW_HEIGHT: u32 = 720;

/// Secondary display window, kept open at a fixed size.
pub const OUTPUT_WINDOW_TITLE: &str = "Output";
pub const OUTPUT_WINDOW_WIDTH: u32 = 1280;
pub const OUTPUT_WINDOW_HEIGHT: u32 = 720;
