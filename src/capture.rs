// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The capture → display → record loop.
//!
//! The loop is written against small traits so that the OpenCV backend in
//! [`crate::cv`] is only one possible set of collaborators. It owns exactly one
//! frame buffer, which the source overwrites on every read.

use std::future::Future;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::error::Error;
use crate::report::Reporter;

/// Key that ends the recording cleanly when pressed in the display window.
pub const QUIT_KEY: i32 = 'q' as i32;

/// Description of a frame's pixel buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameInfo {
    pub pixel_type: String,
    pub rows: u32,
    pub cols: u32,
    pub bytes: u64,
}

impl FrameInfo {
    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.cols,
            height: self.rows,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// A reusable pixel buffer.
pub trait Frame: Default {
    fn describe(&self) -> Result<FrameInfo, Error>;
}

pub trait FrameSource {
    type Frame: Frame;

    /// Replaces the contents of `frame` with the next frame.
    ///
    /// End of stream is reported as [`Error::FrameRead`].
    fn read(&mut self, frame: &mut Self::Frame) -> Result<(), Error>;
}

pub trait FrameSink<F> {
    fn write(&mut self, frame: &F) -> Result<(), Error>;

    /// Flushes and releases the underlying file.
    fn finish(self) -> Result<(), Error>;
}

/// Creates the sink once the frame size is known.
pub trait SinkOpener<F> {
    type Sink: FrameSink<F>;

    fn open(&mut self, dims: Dimensions) -> Result<Self::Sink, Error>;
}

/// Somewhere to show frames.
pub trait Surface<F> {
    /// Shows `frame` and polls briefly for a key press.
    fn present(&mut self, frame: &F) -> Result<Option<i32>, Error>;
}

/// Surface for running without a window.
pub struct Headless;

impl<F> Surface<F> for Headless {
    fn present(&mut self, _frame: &F) -> Result<Option<i32>, Error> {
        Ok(None)
    }
}

/// Transformation applied to frames before they are displayed.
pub trait FrameFilter<F> {
    fn apply<'a>(&'a mut self, frame: &'a F) -> Result<&'a F, Error>;
}

pub struct Passthrough;

impl<F> FrameFilter<F> for Passthrough {
    fn apply<'a>(&'a mut self, frame: &'a F) -> Result<&'a F, Error> {
        Ok(frame)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Signal,
    QuitKey,
    Duration,
}

/// Shared request to stop recording, plus an optional time limit.
#[derive(Clone, Debug, Default)]
pub struct Stop {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Stop {
    /// Adds a time limit; one too large to represent means no limit.
    pub fn after(mut self, duration: Option<Duration>) -> Self {
        self.deadline = duration.and_then(|d| Instant::now().checked_add(d));
        self
    }

    /// Asks the loop to stop. Returns false if a stop was already requested.
    pub fn request(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }

    fn check(&self) -> Option<StopReason> {
        if self.flag.load(Ordering::SeqCst) {
            Some(StopReason::Signal)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(StopReason::Duration)
        } else {
            None
        }
    }
}

/// Turns interrupts from `next_signal` into stop requests.
///
/// The loop only notices a request between frames and a stalled source read
/// never returns, so a second interrupt returns `true`: the caller should exit
/// immediately. Returns `false` if listening fails.
pub async fn watch_signals<F, Fut>(stop: Stop, mut next_signal: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    loop {
        if let Err(e) = next_signal().await {
            error!("unable to listen for interrupts: {}", e);
            return false;
        }
        if !stop.request() {
            return true;
        }
        info!("Stopping after the current frame; interrupt again to exit now");
    }
}

/// Summary of a recording that ended without error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recorded {
    pub reason: StopReason,
    pub frames: u64,
    pub dimensions: Dimensions,
}

/// Runs the loop until an error or a stop request.
///
/// The first frame is read before the sink is opened so the sink's size
/// matches the stream; that frame is then displayed and written like every
/// other. The sink is finished on every exit path once opened.
pub fn run<S, O, D, T, W>(
    source: &mut S,
    filter: &mut T,
    surface: &mut D,
    opener: &mut O,
    reporter: &mut Reporter<W>,
    stop: &Stop,
) -> Result<Recorded, Error>
where
    S: FrameSource,
    O: SinkOpener<S::Frame>,
    D: Surface<S::Frame>,
    T: FrameFilter<S::Frame>,
    W: Write,
{
    let mut frame = S::Frame::default();
    source.read(&mut frame)?;
    let first = frame.describe()?;
    let dimensions = first.dimensions();
    info!(
        "first frame {}x{} ({}); opening writer",
        dimensions.width, dimensions.height, first.pixel_type
    );
    let mut sink = opener.open(dimensions)?;

    let mut frames = 0;
    let result = stream(
        source,
        filter,
        surface,
        &mut sink,
        reporter,
        stop,
        &mut frame,
        &mut frames,
    );
    match (result, sink.finish()) {
        (Ok(reason), Ok(())) => Ok(Recorded {
            reason,
            frames,
            dimensions,
        }),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), finished) => {
            if let Err(close) = finished {
                error!("releasing video writer failed too: {}", close);
            }
            Err(e)
        }
    }
}

/// Processes the already-read `frame`, then reads and processes more until
/// something fails or a stop is requested.
#[allow(clippy::too_many_arguments)]
fn stream<S, K, D, T, W>(
    source: &mut S,
    filter: &mut T,
    surface: &mut D,
    sink: &mut K,
    reporter: &mut Reporter<W>,
    stop: &Stop,
    frame: &mut S::Frame,
    frames: &mut u64,
) -> Result<StopReason, Error>
where
    S: FrameSource,
    K: FrameSink<S::Frame>,
    D: Surface<S::Frame>,
    T: FrameFilter<S::Frame>,
    W: Write,
{
    loop {
        let key = surface.present(filter.apply(frame)?)?;
        sink.write(frame)?;
        *frames += 1;

        let info = frame.describe()?;
        if let Err(e) = reporter.frame(&info) {
            debug!("unable to write status line: {}", e);
        }

        if key == Some(QUIT_KEY) {
            info!("Stopping due to quit key");
            return Ok(StopReason::QuitKey);
        }
        if let Some(reason) = stop.check() {
            match reason {
                StopReason::Signal => info!("Stopping due to signal"),
                _ => info!("Stopping after time limit"),
            }
            return Ok(reason);
        }
        source.read(frame)?;
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::report::Clock;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Harness {
        log: Rc<RefCell<Log>>,
        surface: TestSurface,
        reporter: Reporter<Vec<u8>>,
    }

    impl Harness {
        fn new() -> Self {
            Harness {
                log: Rc::default(),
                surface: TestSurface::default(),
                reporter: Reporter::new(Vec::new(), Clock::None),
            }
        }

        fn run(&mut self, source: &mut TestSource, stop: &Stop) -> Result<Recorded, Error> {
            run(
                source,
                &mut Passthrough,
                &mut self.surface,
                &mut TestOpener(self.log.clone()),
                &mut self.reporter,
                stop,
            )
        }

        fn lines(self) -> Vec<String> {
            String::from_utf8(self.reporter.into_inner())
                .unwrap()
                .lines()
                .map(str::to_owned)
                .collect()
        }
    }

    #[test]
    fn ten_frame_file_end_to_end() {
        let mut h = Harness::new();
        let mut source = TestSource::uniform(10, 480, 640);
        let err = h.run(&mut source, &Stop::default()).unwrap_err();
        assert!(matches!(err, Error::FrameRead { .. }));

        let log = h.log.borrow();
        assert_eq!(log.opened, [Dimensions { width: 640, height: 480 }]);
        assert_eq!(log.written.len(), 10);
        assert!(log.finished);
        assert_eq!(h.surface.shown, (1..=10).collect::<Vec<u32>>());
        drop(log);

        let lines = h.lines();
        assert_eq!(lines.len(), 10);
        assert!(lines
            .iter()
            .all(|l| l == " new frame (CV_8UC1, 480x640, 300.00KB)"));
    }

    #[test]
    fn sink_sized_from_first_frame() {
        let mut h = Harness::new();
        let mut source = TestSource::new(vec![(2, 3), (4, 5), (6, 7)]);
        h.run(&mut source, &Stop::default()).unwrap_err();
        assert_eq!(h.log.borrow().opened, [Dimensions { width: 3, height: 2 }]);
    }

    #[test]
    fn buffer_is_overwritten_each_iteration() {
        let mut h = Harness::new();
        let mut source = TestSource::new(vec![(4, 4), (1, 2), (3, 3)]);
        h.run(&mut source, &Stop::default()).unwrap_err();
        let log = h.log.borrow();
        let lens: Vec<_> = log.written.iter().map(|f| f.data.len()).collect();
        assert_eq!(lens, [16, 2, 9]);
        for f in &log.written {
            assert!(f.data.iter().all(|&b| b == f.seq as u8));
        }
    }

    #[test]
    fn first_read_failure_opens_nothing() {
        let mut h = Harness::new();
        let err = h.run(&mut TestSource::new(vec![]), &Stop::default());
        assert!(matches!(err, Err(Error::FrameRead { .. })));
        let log = h.log.borrow();
        assert!(log.opened.is_empty());
        assert!(!log.finished);
        assert!(h.surface.shown.is_empty());
    }

    #[test]
    fn write_failure_stops_and_still_finishes() {
        let mut h = Harness::new();
        h.log.borrow_mut().fail_write_at = Some(3);
        let mut source = TestSource::uniform(10, 2, 2);
        let err = h.run(&mut source, &Stop::default()).unwrap_err();
        assert!(matches!(err, Error::FrameWrite { .. }));
        let log = h.log.borrow();
        assert_eq!(log.written.len(), 3);
        assert!(log.finished);
        // The fourth frame was displayed before its write failed; no more.
        assert_eq!(h.surface.shown, [1, 2, 3, 4]);
        assert_eq!(source.next_seq, 4);
    }

    #[test]
    fn stop_request_finishes_cleanly() {
        let mut h = Harness::new();
        let stop = Stop::default();
        stop.request();
        let recorded = h.run(&mut TestSource::uniform(10, 2, 2), &stop).unwrap();
        assert_eq!(recorded.reason, StopReason::Signal);
        assert_eq!(recorded.frames, 1);
        assert!(h.log.borrow().finished);
    }

    #[test]
    fn elapsed_duration_stops() {
        let mut h = Harness::new();
        let stop = Stop::default().after(Some(Duration::ZERO));
        let recorded = h.run(&mut TestSource::uniform(10, 2, 2), &stop).unwrap();
        assert_eq!(recorded.reason, StopReason::Duration);
    }

    #[test]
    fn huge_duration_means_no_limit() {
        let stop = Stop::default().after(Some(Duration::from_secs(u64::MAX)));
        assert_eq!(stop.check(), None);
    }

    #[test]
    fn request_reports_first_call_only() {
        let stop = Stop::default();
        assert!(stop.request());
        assert!(!stop.request());
        assert_eq!(stop.check(), Some(StopReason::Signal));
    }

    #[tokio::test]
    async fn second_interrupt_forces_exit() {
        let stop = Stop::default();
        let mut interrupts = 0;
        let forced = watch_signals(stop.clone(), || {
            interrupts += 1;
            std::future::ready(Ok(()))
        })
        .await;
        assert!(forced);
        assert_eq!(interrupts, 2);
        assert_eq!(stop.check(), Some(StopReason::Signal));
    }

    #[tokio::test]
    async fn first_interrupt_only_requests_stop() {
        let stop = Stop::default();
        let mut interrupts = 0;
        let watcher = watch_signals(stop.clone(), || {
            interrupts += 1;
            let first = interrupts == 1;
            async move {
                if !first {
                    std::future::pending::<()>().await;
                }
                Ok(())
            }
        });
        let waited = tokio::time::timeout(Duration::from_millis(50), watcher).await;
        assert!(waited.is_err(), "watcher returned after a single interrupt");
        assert_eq!(stop.check(), Some(StopReason::Signal));
    }

    #[tokio::test]
    async fn listen_failure_ends_watch() {
        let stop = Stop::default();
        let forced = watch_signals(stop.clone(), || {
            std::future::ready(Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "no signal handler",
            )))
        })
        .await;
        assert!(!forced);
        assert_eq!(stop.check(), None);
    }

    #[test]
    fn quit_key_stops_after_writing_frame() {
        let mut h = Harness::new();
        h.surface.key_at = Some((2, QUIT_KEY));
        let recorded = h.run(&mut TestSource::uniform(10, 2, 2), &Stop::default()).unwrap();
        assert_eq!(recorded.reason, StopReason::QuitKey);
        assert_eq!(recorded.frames, 3);
        assert_eq!(h.log.borrow().written.len(), 3);
        assert_eq!(h.lines().len(), 3);
    }

    #[test]
    fn other_keys_are_ignored() {
        let mut h = Harness::new();
        h.surface.key_at = Some((0, 'x' as i32));
        let err = h.run(&mut TestSource::uniform(4, 2, 2), &Stop::default());
        assert!(err.is_err());
        assert_eq!(h.log.borrow().written.len(), 4);
    }

    /// Shows a derived frame; the original must still be what gets written.
    struct Invert(TestFrame);

    impl FrameFilter<TestFrame> for Invert {
        fn apply<'a>(&'a mut self, frame: &'a TestFrame) -> Result<&'a TestFrame, Error> {
            self.0.clone_from(frame);
            self.0.seq += 1000;
            Ok(&self.0)
        }
    }

    #[test]
    fn filtered_frame_is_shown_original_is_written() {
        let log = Rc::new(RefCell::new(Log::default()));
        let mut surface = TestSurface::default();
        let mut reporter = Reporter::new(Vec::new(), Clock::None);
        run(
            &mut TestSource::uniform(2, 2, 2),
            &mut Invert(TestFrame::default()),
            &mut surface,
            &mut TestOpener(log.clone()),
            &mut reporter,
            &Stop::default(),
        )
        .unwrap_err();
        assert_eq!(surface.shown, [1001, 1002]);
        let written: Vec<_> = log.borrow().written.iter().map(|f| f.seq).collect();
        assert_eq!(written, [1, 2]);
    }
}
