//! Camera capture module
//!
//! Provides cross-platform camera capture using the nokhwa crate. Frames are
//! pulled synchronously on the event-loop thread, one per loop iteration;
//! there is no capture thread and no frame queue.

use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraIndex, ControlValueSetter, KnownCameraControl, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::Camera;

/// One captured frame: height x width x 3 (RGB).
pub type Frame = RgbImage;

/// Anything the frame loop can pull frames from.
///
/// `read` returning `None` signals a transient capture failure; it must never
/// panic or surface an error to the caller.
pub trait FrameSource {
    fn read(&mut self) -> Option<Frame>;
}

/// A camera device opened once at startup and held for the process lifetime.
///
/// Opening can fail (bad index, device busy); the source is still constructed
/// and every subsequent `read` returns `None`, mirroring how a capture handle
/// on a bad device just produces failed reads.
pub struct CameraSource {
    camera: Option<Camera>,
}

impl CameraSource {
    /// Open the camera, requesting `width`x`height` and the brightness hint.
    /// Both are best-effort: the device may pick another format and may not
    /// support the control at all.
    pub fn open(camera_index: u32, width: u32, height: u32, brightness: i64) -> Self {
        let index = CameraIndex::Index(camera_index);

        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::HighestResolution(
            Resolution::new(width, height),
        ));

        let mut camera = match Camera::new(index.clone(), requested) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Failed to open camera with requested resolution: {:?}", e);

                // Fall back to whatever format the device offers
                let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::None);
                match Camera::new(index, requested) {
                    Ok(c) => c,
                    Err(e2) => {
                        log::error!("Failed to open camera {}: {:?}", camera_index, e2);
                        return Self { camera: None };
                    }
                }
            }
        };

        if let Err(e) = camera.set_camera_control(
            KnownCameraControl::Brightness,
            ControlValueSetter::Integer(brightness),
        ) {
            log::debug!("Brightness hint ignored by device: {:?}", e);
        }

        if let Err(e) = camera.open_stream() {
            log::error!("Failed to open camera stream: {:?}", e);
            return Self { camera: None };
        }

        log::info!(
            "Camera opened: {} ({}x{})",
            camera.info().human_name(),
            camera.resolution().width(),
            camera.resolution().height()
        );

        Self {
            camera: Some(camera),
        }
    }
}

impl FrameSource for CameraSource {
    fn read(&mut self) -> Option<Frame> {
        let camera = self.camera.as_mut()?;

        let buffer = match camera.frame() {
            Ok(b) => b,
            Err(e) => {
                log::warn!("Failed to capture frame: {:?}", e);
                return None;
            }
        };

        match buffer.decode_image::<RgbFormat>() {
            Ok(image) => Some(image),
            Err(e) => {
                log::warn!("Failed to decode frame: {:?}", e);
                None
            }
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        if let Some(camera) = self.camera.as_mut() {
            if let Err(e) = camera.stop_stream() {
                log::debug!("Error stopping camera stream: {:?}", e);
            }
        }
    }
}
