//! Object detection module
//!
//! Wraps a pre-trained SSD MobileNet V3 model behind ONNX Runtime. The model
//! is loaded once at startup from two artifacts: the ONNX weights file and a
//! JSON manifest naming the graph's input/output tensors. Inference runs
//! synchronously inside the frame loop.

use std::fs;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use image::imageops::{self, FilterType};
use ndarray::Array4;
use serde::Deserialize;

use crate::camera::Frame;

/// Calibration constants fixed by the model's training pipeline. These are
/// tied to the ssd_mobilenet_v3_large_coco artifact and are not tunable by
/// the rest of the system.
pub mod ssd_mobilenet_v3 {
    pub const INPUT_WIDTH: u32 = 320;
    pub const INPUT_HEIGHT: u32 = 320;
    pub const INPUT_SCALE: f32 = 1.0 / 127.5;
    pub const INPUT_MEAN: [f32; 3] = [127.5, 127.5, 127.5];
    pub const SWAP_RED_BLUE: bool = true;
}

/// Axis-aligned box in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// One detected object. Produced fresh each frame; there is no identity or
/// tracking across frames.
#[derive(Clone, Debug)]
pub struct Detection {
    /// 1-based class id as reported by the model.
    pub class_id: u32,
    /// Score in [0, 1].
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Anything the frame loop can run detection with.
///
/// Returns an empty vector when nothing clears the threshold; inference
/// errors are contained (logged) and also yield an empty vector, never a
/// failure to the caller.
pub trait Detector {
    fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> Vec<Detection>;
}

/// Graph topology manifest shipped next to the weights file. Names the
/// tensors the code binds to and pins the input size the artifact was
/// exported with.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelManifest {
    pub input: InputInfo,
    pub outputs: OutputNames,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputInfo {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputNames {
    /// Normalized [ymin, xmin, ymax, xmax] boxes, shape [1, N, 4].
    pub boxes: String,
    /// 1-based class ids as floats, shape [1, N].
    pub classes: String,
    /// Scores in [0, 1], shape [1, N].
    pub scores: String,
}

impl ModelManifest {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read model manifest {}", path.display()))?;
        let manifest: ModelManifest = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse model manifest {}", path.display()))?;

        // The manifest must agree with the calibration constants the
        // preprocessing is built around.
        ensure!(
            manifest.input.width == ssd_mobilenet_v3::INPUT_WIDTH
                && manifest.input.height == ssd_mobilenet_v3::INPUT_HEIGHT,
            "manifest input size {}x{} does not match model calibration {}x{}",
            manifest.input.width,
            manifest.input.height,
            ssd_mobilenet_v3::INPUT_WIDTH,
            ssd_mobilenet_v3::INPUT_HEIGHT,
        );

        Ok(manifest)
    }
}

/// SSD MobileNet V3 detector backed by an ONNX Runtime session.
pub struct SsdDetector {
    session: ort::session::Session,
    manifest: ModelManifest,
}

impl SsdDetector {
    /// Load the model from its two artifacts. Failure of either is fatal at
    /// startup; the application has no fallback detector.
    pub fn load(weights_path: impl AsRef<Path>, manifest_path: impl AsRef<Path>) -> Result<Self> {
        let weights_path = weights_path.as_ref();
        ensure!(
            weights_path.exists(),
            "model weights not found: {}",
            weights_path.display()
        );

        let manifest = ModelManifest::load(manifest_path)?;

        ort::init()
            .with_name("CameraDetect")
            .commit()
            .context("failed to initialize ONNX Runtime")?;

        let session = ort::session::Session::builder()
            .context("failed to create session builder")?
            .with_intra_threads(2)
            .context("failed to set session threads")?
            .commit_from_file(weights_path)
            .with_context(|| format!("failed to load model {}", weights_path.display()))?;

        log::info!("Loaded detection model from {}", weights_path.display());

        Ok(Self { session, manifest })
    }

    fn run(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<Detection>> {
        let input = preprocess(frame);
        let input_tensor =
            ort::value::Tensor::from_array(input).context("failed to create input tensor")?;

        let outputs = self
            .session
            .run(ort::inputs![self.manifest.input.name.as_str() => input_tensor])
            .context("inference failed")?;

        let mut boxes: Option<Vec<f32>> = None;
        let mut classes: Option<Vec<f32>> = None;
        let mut scores: Option<Vec<f32>> = None;

        for (name, value) in outputs.iter() {
            let (_shape, data) = match value.try_extract_tensor::<f32>() {
                Ok(t) => t,
                Err(_) => continue,
            };
            if name == self.manifest.outputs.boxes {
                boxes = Some(data.to_vec());
            } else if name == self.manifest.outputs.classes {
                classes = Some(data.to_vec());
            } else if name == self.manifest.outputs.scores {
                scores = Some(data.to_vec());
            }
        }

        let boxes = boxes.context("model output missing detection boxes")?;
        let classes = classes.context("model output missing detection classes")?;
        let scores = scores.context("model output missing detection scores")?;

        Ok(postprocess(
            &boxes,
            &classes,
            &scores,
            frame.width(),
            frame.height(),
            confidence_threshold,
        ))
    }
}

impl Detector for SsdDetector {
    fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> Vec<Detection> {
        match self.run(frame, confidence_threshold) {
            Ok(detections) => detections,
            Err(e) => {
                log::warn!("Inference error: {:#}", e);
                Vec::new()
            }
        }
    }
}

/// Resize the frame to the model input size and normalize to float NHWC
/// (1, H, W, 3) with the model's scale/mean calibration and R/B swap.
fn preprocess(frame: &Frame) -> Array4<f32> {
    use ssd_mobilenet_v3::*;

    let resized = if frame.width() == INPUT_WIDTH && frame.height() == INPUT_HEIGHT {
        frame.clone()
    } else {
        imageops::resize(frame, INPUT_WIDTH, INPUT_HEIGHT, FilterType::Triangle)
    };

    let mut input = Array4::<f32>::zeros((1, INPUT_HEIGHT as usize, INPUT_WIDTH as usize, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let (c0, c2) = if SWAP_RED_BLUE { (b, r) } else { (r, b) };
        input[[0, y as usize, x as usize, 0]] = (c0 as f32 - INPUT_MEAN[0]) * INPUT_SCALE;
        input[[0, y as usize, x as usize, 1]] = (g as f32 - INPUT_MEAN[1]) * INPUT_SCALE;
        input[[0, y as usize, x as usize, 2]] = (c2 as f32 - INPUT_MEAN[2]) * INPUT_SCALE;
    }

    input
}

/// Convert raw model output into pixel-space detections, dropping everything
/// below the confidence threshold. `boxes` holds normalized
/// [ymin, xmin, ymax, xmax] quads, `classes` 1-based ids, `scores` the
/// confidences, all indexed in lockstep.
fn postprocess(
    boxes: &[f32],
    classes: &[f32],
    scores: &[f32],
    frame_width: u32,
    frame_height: u32,
    confidence_threshold: f32,
) -> Vec<Detection> {
    let count = scores.len().min(classes.len()).min(boxes.len() / 4);
    let mut detections = Vec::new();

    for i in 0..count {
        let confidence = scores[i];
        if confidence < confidence_threshold {
            continue;
        }

        let ymin = boxes[i * 4];
        let xmin = boxes[i * 4 + 1];
        let ymax = boxes[i * 4 + 2];
        let xmax = boxes[i * 4 + 3];

        let x = (xmin * frame_width as f32).round() as i32;
        let y = (ymin * frame_height as f32).round() as i32;
        let width = ((xmax - xmin) * frame_width as f32).round() as i32;
        let height = ((ymax - ymin) * frame_height as f32).round() as i32;

        detections.push(Detection {
            class_id: classes[i] as u32,
            confidence,
            bbox: BoundingBox {
                x,
                y,
                width,
                height,
            },
        });
    }

    detections
}
