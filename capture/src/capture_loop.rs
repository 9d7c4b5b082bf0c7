use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tracing::{debug, dispatcher, info, warn, Dispatch};

use crate::display::{Display, KEY_ESC, KEY_SPACE};
use crate::receiver::FrameReceiver;
use crate::saver::PhotoSaver;
use crate::source::FrameSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// No frame decoded yet.
    Idle,
    /// A frame is held and can be saved.
    Ready,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Exit,
    Capture,
    Ignore,
}

impl KeyAction {
    pub fn from_code(code: u32) -> Self {
        match code {
            KEY_ESC => Self::Exit,
            KEY_SPACE => Self::Capture,
            _ => Self::Ignore,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    ExitKey,
    Interrupted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExitKey => f.write_str("exit key"),
            Self::Interrupted => f.write_str("interrupt"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSummary {
    pub photos_saved: u32,
    pub frames_decoded: u64,
    pub decode_failures: u64,
    pub reason: StopReason,
}

/// Single-threaded loop: service the topic, draw the newest frame, react to
/// one key press.
///
/// The exit key and the shutdown flag both end in [`CaptureLoop::terminate`],
/// which closes the window, logs the summary and releases the bus connection
/// in that order. Once terminated, further steps are no-ops.
pub struct CaptureLoop<S, D> {
    source: S,
    display: D,
    receiver: FrameReceiver,
    saver: PhotoSaver,
    shutdown: Arc<AtomicBool>,
    spin_timeout: Duration,
    dispatch: Dispatch,
    state: CaptureState,
    stop: Option<StopReason>,
    display_failed: bool,
}

impl<S: FrameSource, D: Display> CaptureLoop<S, D> {
    pub fn new(
        source: S,
        display: D,
        receiver: FrameReceiver,
        saver: PhotoSaver,
        shutdown: Arc<AtomicBool>,
        spin_timeout: Duration,
        dispatch: Dispatch,
    ) -> Self {
        Self {
            source,
            display,
            receiver,
            saver,
            shutdown,
            spin_timeout,
            dispatch,
            state: CaptureState::Idle,
            stop: None,
            display_failed: false,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> CaptureState {
        self.state
    }

    #[cfg(test)]
    pub fn photos_saved(&self) -> u32 {
        self.saver.count()
    }

    /// Run until the exit key or an interrupt.
    pub fn run(&mut self) -> CaptureSummary {
        dispatcher::with_default(&self.dispatch, || {
            info!("press SPACE to save a photo, ESC to exit");
        });
        let reason = loop {
            if let Some(reason) = self.step() {
                break reason;
            }
        };
        self.summary(reason)
    }

    /// One loop iteration. Returns the stop reason once terminated.
    pub fn step(&mut self) -> Option<StopReason> {
        if self.state == CaptureState::Terminated {
            return self.stop;
        }
        if self.interrupted() {
            return Some(self.terminate(StopReason::Interrupted));
        }

        self.source.spin_once(self.spin_timeout, &self.receiver);
        if self.interrupted() {
            return Some(self.terminate(StopReason::Interrupted));
        }

        let frame = self.receiver.mailbox().latest();
        if let Some(frame) = &frame {
            if self.state == CaptureState::Idle {
                self.state = CaptureState::Ready;
                dispatcher::with_default(&self.dispatch, || {
                    debug!(seq = frame.seq, "capture ready");
                });
            }
            if let Err(e) = self.display.show(frame) {
                if !self.display_failed {
                    self.display_failed = true;
                    dispatcher::with_default(&self.dispatch, || {
                        warn!(error = %e, "failed to render frame");
                    });
                }
            }
        }

        match self.display.poll_key().map(KeyAction::from_code) {
            Some(KeyAction::Exit) => Some(self.terminate(StopReason::ExitKey)),
            Some(KeyAction::Capture) => {
                // Failures are logged by the saver; the loop keeps running.
                let _ = self
                    .saver
                    .save(frame.as_deref(), Local::now().naive_local());
                None
            }
            Some(KeyAction::Ignore) | None => None,
        }
    }

    fn interrupted(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn terminate(&mut self, reason: StopReason) -> StopReason {
        self.display.close();
        let summary = self.summary(reason);
        dispatcher::with_default(&self.dispatch, || {
            info!(
                photos_saved = summary.photos_saved,
                frames_decoded = summary.frames_decoded,
                decode_failures = summary.decode_failures,
                dir = self.saver.dir().display().to_string(),
                reason = %reason,
                "capture stopped"
            );
        });
        self.source.close();
        self.state = CaptureState::Terminated;
        self.stop = Some(reason);
        reason
    }

    fn summary(&self, reason: StopReason) -> CaptureSummary {
        CaptureSummary {
            photos_saved: self.saver.count(),
            frames_decoded: self.receiver.decoded_count(),
            decode_failures: self.receiver.failed_count(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::FrameMailbox;
    use crate::test_support::{solid_payload, LogCapture};
    use frame_snap_common::bridge::Frame;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;
    use tracing::Level;

    #[derive(Default)]
    struct Tally {
        spins: usize,
        shown: Vec<u64>,
        display_closed: bool,
        source_closed: bool,
        /// Ordered shutdown events.
        teardown: Vec<&'static str>,
    }

    type SharedTally = Arc<Mutex<Tally>>;

    /// Delivers one scripted batch of payloads per spin.
    struct ScriptedSource {
        batches: VecDeque<Vec<Vec<u8>>>,
        tally: SharedTally,
        /// Raise the shutdown flag while waiting on this spin (1-based).
        interrupt_on_spin: Option<(usize, Arc<AtomicBool>)>,
    }

    impl FrameSource for ScriptedSource {
        fn spin_once(&mut self, _timeout: Duration, receiver: &FrameReceiver) -> usize {
            let spin = {
                let mut tally = self.tally.lock().unwrap();
                tally.spins += 1;
                tally.spins
            };
            if let Some((at, flag)) = &self.interrupt_on_spin {
                if *at == spin {
                    flag.store(true, Ordering::SeqCst);
                }
            }
            let batch = self.batches.pop_front().unwrap_or_default();
            for payload in &batch {
                receiver.on_payload(payload);
            }
            batch.len()
        }

        fn close(&mut self) {
            let mut tally = self.tally.lock().unwrap();
            tally.source_closed = true;
            tally.teardown.push("source");
        }
    }

    /// Returns one scripted key per poll, then ESC forever.
    struct ScriptedDisplay {
        keys: VecDeque<Option<u32>>,
        tally: SharedTally,
    }

    impl Display for ScriptedDisplay {
        fn show(&mut self, frame: &Frame) -> Result<(), crate::display::DisplayError> {
            self.tally.lock().unwrap().shown.push(frame.seq);
            Ok(())
        }

        fn poll_key(&mut self) -> Option<u32> {
            self.keys.pop_front().unwrap_or(Some(KEY_ESC))
        }

        fn close(&mut self) {
            let mut tally = self.tally.lock().unwrap();
            tally.display_closed = true;
            tally.teardown.push("display");
        }
    }

    struct Harness {
        capture: CaptureLoop<ScriptedSource, ScriptedDisplay>,
        tally: SharedTally,
        logs: LogCapture,
        shutdown: Arc<AtomicBool>,
    }

    fn harness(
        dir: &Path,
        batches: Vec<Vec<Vec<u8>>>,
        keys: Vec<Option<u32>>,
        interrupt_on_spin: Option<usize>,
    ) -> Harness {
        let logs = LogCapture::default();
        let tally = SharedTally::default();
        let shutdown = Arc::new(AtomicBool::new(false));
        let source = ScriptedSource {
            batches: batches.into(),
            tally: Arc::clone(&tally),
            interrupt_on_spin: interrupt_on_spin.map(|n| (n, Arc::clone(&shutdown))),
        };
        let display = ScriptedDisplay {
            keys: keys.into(),
            tally: Arc::clone(&tally),
        };
        let receiver = FrameReceiver::new(FrameMailbox::new(), logs.dispatch());
        let saver = PhotoSaver::create(dir, 95, logs.dispatch()).unwrap();
        let capture = CaptureLoop::new(
            source,
            display,
            receiver,
            saver,
            Arc::clone(&shutdown),
            Duration::from_millis(1),
            logs.dispatch(),
        );
        Harness {
            capture,
            tally,
            logs,
            shutdown,
        }
    }

    fn saved_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    const SPACE: Option<u32> = Some(KEY_SPACE);
    const ESC: Option<u32> = Some(KEY_ESC);

    #[test]
    fn key_codes_map_to_actions() {
        assert_eq!(KeyAction::from_code(27), KeyAction::Exit);
        assert_eq!(KeyAction::from_code(32), KeyAction::Capture);
        assert_eq!(KeyAction::from_code(0x11B), KeyAction::Ignore);
        assert_eq!(KeyAction::from_code(0x120), KeyAction::Ignore);
        assert_eq!(KeyAction::from_code(b'q' as u32), KeyAction::Ignore);
    }

    #[test]
    fn capture_without_frames_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let mut h = harness(tmp.path(), vec![], vec![SPACE, SPACE, SPACE, ESC], None);

        let summary = h.capture.run();

        assert_eq!(summary.photos_saved, 0);
        assert_eq!(summary.reason, StopReason::ExitKey);
        assert!(saved_files(tmp.path()).is_empty());
        assert_eq!(h.logs.count(Level::WARN), 3);
        assert_eq!(h.capture.state(), CaptureState::Terminated);
    }

    #[test]
    fn exit_key_works_before_any_frame() {
        let tmp = tempfile::tempdir().unwrap();
        let mut h = harness(tmp.path(), vec![], vec![None, Some(b'x' as u32), ESC], None);

        assert_eq!(h.capture.step(), None);
        assert_eq!(h.capture.state(), CaptureState::Idle);
        assert_eq!(h.capture.step(), None);
        assert_eq!(h.capture.step(), Some(StopReason::ExitKey));
        assert_eq!(h.capture.state(), CaptureState::Terminated);

        let tally = h.tally.lock().unwrap();
        assert!(tally.display_closed);
        assert!(tally.source_closed);
        assert!(tally.shown.is_empty());
    }

    #[test]
    fn solid_frame_captured_twice() {
        let tmp = tempfile::tempdir().unwrap();
        let colour = [30, 140, 220];
        let mut h = harness(
            tmp.path(),
            vec![vec![solid_payload(colour, 16, 8, 1)]],
            vec![SPACE, SPACE, ESC],
            None,
        );

        let summary = h.capture.run();
        assert_eq!(summary.photos_saved, 2);
        assert_eq!(summary.frames_decoded, 1);

        let files = saved_files(tmp.path());
        assert_eq!(files.len(), 2);
        assert!(files[0].starts_with("photo_000_") && files[0].ends_with(".jpg"));
        assert!(files[1].starts_with("photo_001_") && files[1].ends_with(".jpg"));

        for name in &files {
            let img = image::open(tmp.path().join(name)).unwrap().to_rgb8();
            assert_eq!(img.dimensions(), (16, 8));
            for px in img.pixels() {
                for (got, want) in px.0.iter().zip(colour) {
                    assert!(got.abs_diff(want) <= 6, "{name}: pixel {:?} drifted", px);
                }
            }
        }
    }

    #[test]
    fn decode_failure_keeps_prior_frame_for_saving() {
        let tmp = tempfile::tempdir().unwrap();
        let mut h = harness(
            tmp.path(),
            vec![
                vec![solid_payload([10, 200, 10], 4, 4, 1)],
                vec![vec![0x02, 0x00, 0x01]],
            ],
            vec![None, SPACE, ESC],
            None,
        );

        let summary = h.capture.run();

        assert_eq!(summary.decode_failures, 1);
        assert_eq!(summary.photos_saved, 1);
        assert_eq!(h.logs.count(Level::ERROR), 1);
        let files = saved_files(tmp.path());
        let img = image::open(tmp.path().join(&files[0])).unwrap().to_rgb8();
        assert!(img.get_pixel(0, 0).0[1] > 180);
        assert_eq!(h.tally.lock().unwrap().shown, vec![1, 1, 1]);
    }

    #[test]
    fn newest_frame_is_shown_and_saved() {
        let tmp = tempfile::tempdir().unwrap();
        let mut h = harness(
            tmp.path(),
            vec![
                vec![solid_payload([0, 0, 0], 2, 2, 1), solid_payload([250, 250, 250], 2, 2, 2)],
                vec![solid_payload([0, 0, 250], 2, 2, 3)],
            ],
            vec![None, SPACE, ESC],
            None,
        );

        h.capture.run();

        assert_eq!(h.tally.lock().unwrap().shown, vec![2, 3, 3]);
        let files = saved_files(tmp.path());
        let img = image::open(tmp.path().join(&files[0])).unwrap().to_rgb8();
        assert!(img.get_pixel(0, 0).0[2] > 200);
        assert!(img.get_pixel(0, 0).0[0] < 50);
    }

    #[test]
    fn state_moves_idle_to_ready_on_first_frame() {
        let tmp = tempfile::tempdir().unwrap();
        let mut h = harness(
            tmp.path(),
            vec![vec![], vec![solid_payload([1, 2, 3], 2, 2, 1)]],
            vec![None, None, ESC],
            None,
        );

        h.capture.step();
        assert_eq!(h.capture.state(), CaptureState::Idle);
        h.capture.step();
        assert_eq!(h.capture.state(), CaptureState::Ready);
        h.capture.step();
        assert_eq!(h.capture.state(), CaptureState::Terminated);
    }

    #[test]
    fn interrupt_during_wait_runs_full_cleanup() {
        let tmp = tempfile::tempdir().unwrap();
        let mut h = harness(
            tmp.path(),
            vec![vec![solid_payload([5, 5, 5], 2, 2, 1)]],
            vec![SPACE, None, None, None],
            Some(2),
        );

        let summary = h.capture.run();

        assert_eq!(summary.reason, StopReason::Interrupted);
        assert_eq!(summary.photos_saved, 1);
        let tally = h.tally.lock().unwrap();
        assert_eq!(tally.spins, 2);
        assert_eq!(tally.teardown, vec!["display", "source"]);
        assert!(h
            .logs
            .messages(Level::INFO)
            .iter()
            .any(|m| m.contains("capture stopped")));
    }

    #[test]
    fn interrupt_before_first_step_skips_spinning() {
        let tmp = tempfile::tempdir().unwrap();
        let mut h = harness(tmp.path(), vec![], vec![], None);
        h.shutdown.store(true, Ordering::SeqCst);

        assert_eq!(h.capture.step(), Some(StopReason::Interrupted));
        let tally = h.tally.lock().unwrap();
        assert_eq!(tally.spins, 0);
        assert!(tally.display_closed && tally.source_closed);
    }

    #[test]
    fn terminated_is_final() {
        let tmp = tempfile::tempdir().unwrap();
        let mut h = harness(
            tmp.path(),
            vec![vec![], vec![solid_payload([1, 1, 1], 2, 2, 1)]],
            vec![ESC, SPACE],
            None,
        );

        assert_eq!(h.capture.step(), Some(StopReason::ExitKey));
        assert_eq!(h.capture.step(), Some(StopReason::ExitKey));
        assert_eq!(h.capture.state(), CaptureState::Terminated);
        assert_eq!(h.capture.photos_saved(), 0);

        let tally = h.tally.lock().unwrap();
        assert_eq!(tally.spins, 1);
        assert_eq!(tally.teardown, vec!["display", "source"]);
    }
}
