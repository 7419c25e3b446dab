//! Frame loop controller
//!
//! Owns the Idle/Running state machine and the per-iteration logic: pull a
//! frame, resize to the working resolution, detect and overlay while
//! running, convert for display, present, and re-arm the next deadline.
//!
//! Everything runs on the event-loop thread. The controller never schedules
//! work itself; it exposes the next deadline and the host event loop calls
//! `poll` when that deadline is due.

use std::time::Instant;

use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::camera::{Frame, FrameSource};
use crate::catalog::ClassCatalog;
use crate::config;
use crate::detect::Detector;
use crate::overlay;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
}

/// Where converted frames end up. The app backs this with a GPU texture
/// upload; tests record the presented images.
pub trait DisplaySink {
    fn present(&mut self, image: RgbaImage);
}

pub struct FrameLoop {
    state: LoopState,
    /// Single armed deadline for the next iteration. One slot: re-arming
    /// replaces it, so rapid double-Start cannot create two chains.
    next_deadline: Option<Instant>,
    confidence_threshold: f32,
}

impl FrameLoop {
    pub fn new(confidence_threshold: f32) -> Self {
        Self {
            state: LoopState::Idle,
            next_deadline: None,
            confidence_threshold,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == LoopState::Running
    }

    /// Deadline the host event loop should wake at, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_deadline
    }

    /// Begin detection: runs one iteration synchronously, which arms the
    /// next deadline. Calling while already running restarts the chain
    /// without duplicating it.
    pub fn start<S, D, K>(
        &mut self,
        now: Instant,
        source: &mut S,
        detector: &mut D,
        catalog: &ClassCatalog,
        sink: &mut K,
    ) where
        S: FrameSource,
        D: Detector,
        K: DisplaySink,
    {
        log::info!("Detection started");
        self.state = LoopState::Running;
        self.next_deadline = None;
        self.run_iteration(now, source, detector, catalog, sink);
    }

    /// Stop detection. Idempotent. An already-armed iteration still runs
    /// once (rendering one more frame without detection) but will not
    /// re-arm.
    pub fn stop(&mut self) {
        if self.state == LoopState::Running {
            log::info!("Detection stopped");
        }
        self.state = LoopState::Idle;
    }

    /// Run the armed iteration if its deadline has passed. Returns whether
    /// an iteration ran.
    pub fn poll<S, D, K>(
        &mut self,
        now: Instant,
        source: &mut S,
        detector: &mut D,
        catalog: &ClassCatalog,
        sink: &mut K,
    ) -> bool
    where
        S: FrameSource,
        D: Detector,
        K: DisplaySink,
    {
        match self.next_deadline {
            Some(deadline) if now >= deadline => {}
            _ => return false,
        }
        self.next_deadline = None;
        self.run_iteration(now, source, detector, catalog, sink);
        true
    }

    /// One loop iteration. A failed read stalls the loop: nothing is
    /// presented and no deadline is armed, so the display keeps its last
    /// image until the next Start. No retry is attempted.
    fn run_iteration<S, D, K>(
        &mut self,
        now: Instant,
        source: &mut S,
        detector: &mut D,
        catalog: &ClassCatalog,
        sink: &mut K,
    ) where
        S: FrameSource,
        D: Detector,
        K: DisplaySink,
    {
        let Some(frame) = source.read() else {
            log::warn!("Frame read failed, loop stalled");
            return;
        };

        let mut frame = resize_to_working(frame);

        if self.state == LoopState::Running {
            let detections = detector.detect(&frame, self.confidence_threshold);
            overlay::render(&mut frame, &detections, catalog);
        }

        sink.present(to_display(frame));

        if self.state == LoopState::Running {
            self.next_deadline = Some(now + config::LOOP_INTERVAL);
        }
    }
}

fn resize_to_working(frame: Frame) -> Frame {
    if frame.width() == config::FRAME_WIDTH && frame.height() == config::FRAME_HEIGHT {
        frame
    } else {
        imageops::resize(
            &frame,
            config::FRAME_WIDTH,
            config::FRAME_HEIGHT,
            FilterType::Triangle,
        )
    }
}

/// Channel-order conversion for the display surface: the capture side hands
/// us RGB, the frame texture wants RGBA.
fn to_display(frame: Frame) -> RgbaImage {
    image::DynamicImage::ImageRgb8(frame).into_rgba8()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection};
    use std::collections::VecDeque;
    use std::time::Duration;

    struct ScriptedSource {
        /// Upcoming read results; `true` yields a frame, `false` a failure.
        /// An exhausted script keeps yielding frames.
        script: VecDeque<bool>,
        reads: usize,
    }

    impl ScriptedSource {
        fn always_ok() -> Self {
            Self {
                script: VecDeque::new(),
                reads: 0,
            }
        }

        fn with_script(script: &[bool]) -> Self {
            Self {
                script: script.iter().copied().collect(),
                reads: 0,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn read(&mut self) -> Option<Frame> {
            self.reads += 1;
            match self.script.pop_front() {
                Some(false) => None,
                _ => Some(Frame::new(64, 48)),
            }
        }
    }

    #[derive(Default)]
    struct StubDetector {
        detections: Vec<Detection>,
        calls: usize,
        last_threshold: Option<f32>,
    }

    impl Detector for StubDetector {
        fn detect(&mut self, _frame: &Frame, confidence_threshold: f32) -> Vec<Detection> {
            self.calls += 1;
            self.last_threshold = Some(confidence_threshold);
            self.detections.clone()
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        presented: Vec<RgbaImage>,
    }

    impl DisplaySink for RecordingSink {
        fn present(&mut self, image: RgbaImage) {
            self.presented.push(image);
        }
    }

    fn catalog() -> ClassCatalog {
        ClassCatalog::from_names(vec!["person".into(), "car".into()])
    }

    #[test]
    fn start_runs_one_iteration_and_arms_deadline() {
        let mut looper = FrameLoop::new(0.5);
        let mut source = ScriptedSource::always_ok();
        let mut detector = StubDetector::default();
        let mut sink = RecordingSink::default();
        let now = Instant::now();

        looper.start(now, &mut source, &mut detector, &catalog(), &mut sink);

        assert_eq!(looper.state(), LoopState::Running);
        assert_eq!(sink.presented.len(), 1);
        assert_eq!(detector.calls, 1);
        assert_eq!(looper.next_deadline(), Some(now + config::LOOP_INTERVAL));
    }

    #[test]
    fn frames_are_resized_and_converted_for_display() {
        let mut looper = FrameLoop::new(0.5);
        let mut source = ScriptedSource::always_ok();
        let mut detector = StubDetector::default();
        let mut sink = RecordingSink::default();

        looper.start(
            Instant::now(),
            &mut source,
            &mut detector,
            &catalog(),
            &mut sink,
        );

        let image = &sink.presented[0];
        assert_eq!(image.width(), config::FRAME_WIDTH);
        assert_eq!(image.height(), config::FRAME_HEIGHT);
    }

    #[test]
    fn detections_are_overlaid_on_presented_frames() {
        let mut looper = FrameLoop::new(0.5);
        let mut source = ScriptedSource::always_ok();
        let mut detector = StubDetector {
            detections: vec![Detection {
                class_id: 2,
                confidence: 0.73,
                bbox: BoundingBox {
                    x: 10,
                    y: 10,
                    width: 50,
                    height: 50,
                },
            }],
            ..Default::default()
        };
        let mut sink = RecordingSink::default();

        looper.start(
            Instant::now(),
            &mut source,
            &mut detector,
            &catalog(),
            &mut sink,
        );

        let image = &sink.presented[0];
        assert_eq!(image.get_pixel(10, 10).0, [0, 255, 0, 255]);
    }

    #[test]
    fn detector_receives_configured_threshold() {
        let mut looper = FrameLoop::new(0.42);
        let mut source = ScriptedSource::always_ok();
        let mut detector = StubDetector::default();
        let mut sink = RecordingSink::default();

        looper.start(
            Instant::now(),
            &mut source,
            &mut detector,
            &catalog(),
            &mut sink,
        );

        assert_eq!(detector.last_threshold, Some(0.42));
    }

    #[test]
    fn failed_read_stalls_without_presenting() {
        let mut looper = FrameLoop::new(0.5);
        let mut source = ScriptedSource::with_script(&[false]);
        let mut detector = StubDetector::default();
        let mut sink = RecordingSink::default();

        looper.start(
            Instant::now(),
            &mut source,
            &mut detector,
            &catalog(),
            &mut sink,
        );

        assert_eq!(sink.presented.len(), 0);
        assert_eq!(detector.calls, 0);
        assert_eq!(looper.next_deadline(), None);
        // The stalled loop recovers on the next Start
        looper.start(
            Instant::now(),
            &mut source,
            &mut detector,
            &catalog(),
            &mut sink,
        );
        assert_eq!(sink.presented.len(), 1);
    }

    #[test]
    fn stop_when_idle_is_a_noop() {
        let mut looper = FrameLoop::new(0.5);
        looper.stop();
        looper.stop();

        assert_eq!(looper.state(), LoopState::Idle);
        assert_eq!(looper.next_deadline(), None);
    }

    #[test]
    fn stop_lets_armed_iteration_render_once_more_without_detection() {
        let mut looper = FrameLoop::new(0.5);
        let mut source = ScriptedSource::always_ok();
        let mut detector = StubDetector::default();
        let mut sink = RecordingSink::default();
        let now = Instant::now();

        looper.start(now, &mut source, &mut detector, &catalog(), &mut sink);
        looper.stop();

        // Before the deadline nothing fires
        assert!(!looper.poll(now, &mut source, &mut detector, &catalog(), &mut sink));

        // The armed iteration fires once: one more frame, no detection
        let later = now + config::LOOP_INTERVAL;
        assert!(looper.poll(later, &mut source, &mut detector, &catalog(), &mut sink));
        assert_eq!(sink.presented.len(), 2);
        assert_eq!(detector.calls, 1);
        assert_eq!(looper.state(), LoopState::Idle);
        assert_eq!(looper.next_deadline(), None);

        // And stays idle from here on
        let much_later = later + Duration::from_secs(1);
        assert!(!looper.poll(much_later, &mut source, &mut detector, &catalog(), &mut sink));
        assert_eq!(sink.presented.len(), 2);
    }

    #[test]
    fn double_start_does_not_create_two_chains() {
        let mut looper = FrameLoop::new(0.5);
        let mut source = ScriptedSource::always_ok();
        let mut detector = StubDetector::default();
        let mut sink = RecordingSink::default();
        let now = Instant::now();

        looper.start(now, &mut source, &mut detector, &catalog(), &mut sink);
        looper.start(now, &mut source, &mut detector, &catalog(), &mut sink);
        assert_eq!(sink.presented.len(), 2);

        // A single deadline slot: one poll fires one iteration, and the
        // next poll before its new deadline fires nothing.
        let later = now + config::LOOP_INTERVAL;
        assert!(looper.poll(later, &mut source, &mut detector, &catalog(), &mut sink));
        assert_eq!(sink.presented.len(), 3);
        assert!(!looper.poll(later, &mut source, &mut detector, &catalog(), &mut sink));
        assert_eq!(sink.presented.len(), 3);
    }

    #[test]
    fn running_loop_keeps_rescheduling() {
        let mut looper = FrameLoop::new(0.5);
        let mut source = ScriptedSource::always_ok();
        let mut detector = StubDetector::default();
        let mut sink = RecordingSink::default();
        let mut now = Instant::now();

        looper.start(now, &mut source, &mut detector, &catalog(), &mut sink);
        for _ in 0..5 {
            now += config::LOOP_INTERVAL;
            assert!(looper.poll(now, &mut source, &mut detector, &catalog(), &mut sink));
        }

        assert_eq!(sink.presented.len(), 6);
        assert_eq!(detector.calls, 6);
        assert!(looper.next_deadline().is_some());
    }
}
