//! Measurement state machine for one session.
//!
//! Per-frame pipeline: decode → append → progress → cadence gate →
//! (maybe) estimate → report. Decode and estimation failures are local to the
//! frame or cycle that produced them; only a [`SessionFatalError`] moves the
//! run to [`SessionState::Errored`].
//!
//! Image decoding runs on the blocking pool, like estimation, so a large
//! JPEG never stalls the async workers serving other sessions.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use pulse_core::{
    Command, DecodeError, EstimationError, Estimator, Frame, FrameDecoder, Report,
    SessionFatalError, SessionId, WindowPolicy,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::SessionBuffer;
use crate::interrupt::RunInterrupt;
use crate::metrics::{
    ESTIMATION_DURATION_SECONDS, ESTIMATION_ERRORS_TOTAL, ESTIMATIONS_TOTAL,
    FRAME_DECODE_ERRORS_TOTAL, FRAMES_RECEIVED_TOTAL, SESSION_FAULTS_TOTAL, SESSIONS_MEASURING,
};
use crate::state::SessionState;

/// Default bound on a single estimator call.
pub const DEFAULT_ESTIMATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns one session's buffer, counters, and state.
pub struct SessionController {
    id: SessionId,
    policy: WindowPolicy,
    state: SessionState,
    buffer: SessionBuffer,
    frames_received: u64,
    decoder: Arc<dyn FrameDecoder>,
    estimator: Arc<dyn Estimator>,
    estimate_timeout: Duration,
    interrupt: RunInterrupt,
}

impl SessionController {
    pub fn new(
        policy: WindowPolicy,
        decoder: Arc<dyn FrameDecoder>,
        estimator: Arc<dyn Estimator>,
    ) -> Self {
        let buffer = SessionBuffer::new(policy.max_window);
        Self {
            id: SessionId::new(),
            policy,
            state: SessionState::Idle,
            buffer,
            frames_received: 0,
            decoder,
            estimator,
            estimate_timeout: DEFAULT_ESTIMATE_TIMEOUT,
            interrupt: RunInterrupt::new(),
        }
    }

    #[must_use]
    pub fn with_estimate_timeout(mut self, timeout: Duration) -> Self {
        self.estimate_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: SessionId) -> Self {
        self.id = id;
        self
    }

    /// Handle one inbound command. `None` means nothing is sent back.
    pub async fn handle(&mut self, command: Command) -> Option<Report> {
        let token = self.interrupt.current();
        self.handle_with(command, token).await
    }

    /// Handle a command that was queued under `token`.
    ///
    /// The token is the one current when the command was received. An
    /// interrupt raised after that point (a later `start`/`stop`) cancels any
    /// estimate the command triggers, even if the estimate has not begun yet.
    pub async fn handle_with(
        &mut self,
        command: Command,
        token: CancellationToken,
    ) -> Option<Report> {
        match command {
            Command::Start => Some(self.start()),
            Command::Stop => Some(self.stop()),
            Command::Frame { payload, timestamp } => {
                self.process_frame_with(payload, timestamp, token).await
            }
        }
    }

    /// Begin a fresh run from any state.
    pub fn start(&mut self) -> Report {
        self.reset();
        self.transition(SessionState::Calibrating);
        info!(session_id = %self.id, "measurement started");
        Report::started()
    }

    /// End the run from any state.
    pub fn stop(&mut self) -> Report {
        let frames = self.frames_received;
        self.reset();
        self.transition(SessionState::Idle);
        info!(session_id = %self.id, frames_received = frames, "measurement stopped");
        Report::stopped()
    }

    /// Run one frame through the pipeline.
    pub async fn process_frame(
        &mut self,
        payload: impl Into<String>,
        timestamp: Option<f64>,
    ) -> Option<Report> {
        let token = self.interrupt.current();
        self.process_frame_with(payload.into(), timestamp, token).await
    }

    async fn process_frame_with(
        &mut self,
        payload: String,
        timestamp: Option<f64>,
        token: CancellationToken,
    ) -> Option<Report> {
        match self.state {
            SessionState::Idle => {
                debug!(session_id = %self.id, "frame ignored while idle");
                return None;
            }
            SessionState::Errored => return Some(Report::awaiting_restart()),
            SessionState::Calibrating | SessionState::Measuring => {}
        }

        let frame = match self.decode(payload).await {
            Ok(frame) => frame.with_timestamp(timestamp),
            Err(e) => {
                counter!(FRAME_DECODE_ERRORS_TOTAL).increment(1);
                warn!(session_id = %self.id, kind = e.error_kind(), error = %e, "frame decode failed");
                return Some(Report::frame_error(&e));
            }
        };

        self.buffer.append(Arc::new(frame));
        self.frames_received += 1;
        counter!(FRAMES_RECEIVED_TOTAL).increment(1);

        debug_assert!(self.buffer.len() <= self.policy.max_window);

        let progress = self.policy.progress(self.buffer.len());
        let phase = self.policy.phase(progress);
        self.transition(phase.into());

        if self
            .policy
            .should_estimate(self.frames_received, self.buffer.len())
        {
            self.run_estimate(progress, token).await
        } else {
            Some(Report::progress(phase, progress))
        }
    }

    /// Abort the current run: clear everything and park in `Errored`.
    pub fn fail(&mut self, err: SessionFatalError) -> Report {
        counter!(SESSION_FAULTS_TOTAL).increment(1);
        error!(
            session_id = %self.id,
            frames_received = self.frames_received,
            error = %err,
            "session fault, run aborted"
        );
        self.reset();
        self.transition(SessionState::Errored);
        Report::session_error(&err)
    }

    async fn decode(&self, payload: String) -> Result<Frame, DecodeError> {
        let decoder = Arc::clone(&self.decoder);
        tokio::task::spawn_blocking(move || decoder.decode(&payload))
            .await
            .unwrap_or_else(|e| Err(DecodeError::Image(format!("decoder task failed: {e}"))))
    }

    async fn run_estimate(&mut self, progress: f64, token: CancellationToken) -> Option<Report> {
        let frames = self.buffer.snapshot(self.policy.estimate_window);
        let window = frames.len();
        let timeout = self.estimate_timeout;
        let started = Instant::now();
        counter!(ESTIMATIONS_TOTAL).increment(1);

        let result = tokio::select! {
            biased;
            () = token.cancelled() => Err(EstimationError::Cancelled),
            outcome = tokio::time::timeout(
                timeout,
                self.estimator.estimate(frames, self.policy.frame_rate),
            ) => outcome.unwrap_or(Err(EstimationError::Timeout(timeout))),
        };

        let elapsed = started.elapsed();
        histogram!(ESTIMATION_DURATION_SECONDS).record(elapsed.as_secs_f64());

        match result {
            Ok(reading) => {
                debug!(
                    session_id = %self.id,
                    window,
                    rate = ?reading.rate,
                    quality = reading.quality,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "estimation complete"
                );
                Some(Report::reading(reading.rate, reading.quality, progress))
            }
            Err(EstimationError::Cancelled) => {
                counter!(ESTIMATION_ERRORS_TOTAL, "kind" => "cancelled").increment(1);
                debug!(session_id = %self.id, "estimation interrupted, result discarded");
                None
            }
            Err(e) => {
                counter!(ESTIMATION_ERRORS_TOTAL, "kind" => e.error_kind()).increment(1);
                warn!(
                    session_id = %self.id,
                    kind = e.error_kind(),
                    error = %e,
                    buffer_len = self.buffer.len(),
                    "estimation failed"
                );
                Some(Report::estimation_error(&e))
            }
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.frames_received = 0;
    }

    fn transition(&mut self, next: SessionState) {
        if next == self.state {
            return;
        }
        if next == SessionState::Measuring {
            gauge!(SESSIONS_MEASURING).increment(1.0);
        } else if self.state == SessionState::Measuring {
            gauge!(SESSIONS_MEASURING).decrement(1.0);
        }
        debug!(session_id = %self.id, from = %self.state, to = %next, "state transition");
        self.state = next;
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn policy(&self) -> &WindowPolicy {
        &self.policy
    }

    /// Handle for interrupting this session's in-flight estimate from another task.
    pub fn interrupt_handle(&self) -> RunInterrupt {
        self.interrupt.clone()
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if self.state == SessionState::Measuring {
            gauge!(SESSIONS_MEASURING).decrement(1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mockall::mock;
    use pulse_core::{DecodeError, Frame, Phase, Reading};
    use tokio::sync::Notify;

    mock! {
        pub Est {}

        #[async_trait]
        impl Estimator for Est {
            async fn estimate(
                &self,
                frames: Vec<Arc<Frame>>,
                frame_rate: f64,
            ) -> Result<Reading, EstimationError>;
        }
    }

    /// Decodes anything except `"bad"` into a tiny frame.
    struct StubDecoder;

    impl FrameDecoder for StubDecoder {
        fn decode(&self, payload: &str) -> Result<Frame, DecodeError> {
            match payload {
                "" => Err(DecodeError::Empty),
                "bad" => Err(DecodeError::Image("not an image".into())),
                _ => Ok(Frame::solid(2, 2, [120, 80, 60])),
            }
        }
    }

    /// Signals when called, then never answers.
    struct Hanging {
        entered: Arc<Notify>,
    }

    #[async_trait]
    impl Estimator for Hanging {
        async fn estimate(
            &self,
            _frames: Vec<Arc<Frame>>,
            _frame_rate: f64,
        ) -> Result<Reading, EstimationError> {
            self.entered.notify_one();
            std::future::pending().await
        }
    }

    fn controller(est: impl Estimator + 'static) -> SessionController {
        SessionController::new(
            WindowPolicy::default(),
            Arc::new(StubDecoder),
            Arc::new(est),
        )
    }

    fn idle_estimator() -> MockEst {
        let mut est = MockEst::new();
        let _ = est.expect_estimate().never();
        est
    }

    async fn feed(ctrl: &mut SessionController, n: usize) -> Vec<Option<Report>> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(ctrl.process_frame("ok", None).await);
        }
        out
    }

    #[tokio::test]
    async fn start_enters_calibrating() {
        let mut ctrl = controller(idle_estimator());
        assert_eq!(ctrl.state(), SessionState::Idle);
        let report = ctrl.handle(Command::Start).await.unwrap();
        assert_eq!(report, Report::started());
        assert_eq!(ctrl.state(), SessionState::Calibrating);
    }

    #[tokio::test]
    async fn idle_ignores_frames() {
        let mut ctrl = controller(idle_estimator());
        assert!(ctrl.process_frame("ok", None).await.is_none());
        assert_eq!(ctrl.buffered(), 0);
        assert_eq!(ctrl.frames_received(), 0);
    }

    #[tokio::test]
    async fn start_then_stop_resets_from_any_state() {
        let mut ctrl = controller(idle_estimator());
        let _ = ctrl.start();
        let _ = feed(&mut ctrl, 40).await;
        assert_eq!(ctrl.frames_received(), 40);

        let _ = ctrl.start();
        let report = ctrl.stop();
        assert_eq!(report, Report::stopped());
        assert_eq!(ctrl.buffered(), 0);
        assert_eq!(ctrl.frames_received(), 0);
        assert_eq!(ctrl.state(), SessionState::Idle);

        let _ = ctrl.fail(SessionFatalError::Transport("x".into()));
        let _ = ctrl.start();
        let _ = ctrl.stop();
        assert_eq!(ctrl.buffered(), 0);
        assert_eq!(ctrl.frames_received(), 0);
    }

    #[tokio::test]
    async fn decode_error_leaves_counters_untouched() {
        let mut ctrl = controller(idle_estimator());
        let _ = ctrl.start();
        let _ = feed(&mut ctrl, 10).await;

        let report = ctrl.process_frame("bad", None).await.unwrap();
        assert!(report.is_error());
        assert!(report.message().starts_with("Frame error: "));
        assert_eq!(ctrl.frames_received(), 10);
        assert_eq!(ctrl.buffered(), 10);
        assert_eq!(ctrl.state(), SessionState::Calibrating);

        let next = ctrl.process_frame("ok", None).await.unwrap();
        assert_eq!(next.status(), "calibrating");
        assert_eq!(ctrl.frames_received(), 11);
    }

    #[tokio::test]
    async fn label_flips_to_measuring_at_threshold() {
        let mut ctrl = controller(idle_estimator());
        let _ = ctrl.start();
        // 148 / 450 = 32.9 %
        let reports = feed(&mut ctrl, 148).await;
        assert_eq!(reports.last().unwrap().as_ref().unwrap().status(), "calibrating");
        assert_eq!(ctrl.state(), SessionState::Calibrating);

        // 149 / 450 = 33.1 %
        let report = ctrl.process_frame("ok", None).await.unwrap();
        assert_eq!(report, Report::progress(Phase::Measuring, ctrl.policy().progress(149)));
        assert_eq!(ctrl.state(), SessionState::Measuring);
    }

    #[tokio::test]
    async fn cadence_gate_fires_exactly_once_at_150() {
        let mut est = MockEst::new();
        let _ = est
            .expect_estimate()
            .times(1)
            .withf(|frames, rate| frames.len() == 150 && (*rate - 30.0).abs() < f64::EPSILON)
            .returning(|_, _| Ok(Reading::new(Some(72.04), 0.912)));

        let mut ctrl = controller(est);
        let _ = ctrl.start();
        let reports = feed(&mut ctrl, 149).await;
        assert_eq!(reports.len(), 149);
        for report in &reports {
            let report = report.as_ref().unwrap();
            assert!(matches!(report, Report::Progress { .. }), "got {report:?}");
        }

        let report = ctrl.process_frame("ok", None).await.unwrap();
        let Report::Reading {
            hr, confidence, ..
        } = &report
        else {
            panic!("expected reading, got {report:?}");
        };
        assert_eq!(*hr, Some(72.0));
        assert_eq!(*confidence, 0.91);
        assert_eq!(report.message(), "Heart Rate: 72.0 BPM");
    }

    #[tokio::test]
    async fn estimator_gets_most_recent_window() {
        let mut est = MockEst::new();
        let _ = est
            .expect_estimate()
            .returning(|frames, _| {
                assert!(frames.len() <= 300);
                let first = frames.first().and_then(|f| f.timestamp()).unwrap();
                let last = frames.last().and_then(|f| f.timestamp()).unwrap();
                assert_eq!((last - first) as usize + 1, frames.len());
                Ok(Reading::undetected(0.1))
            });

        let mut ctrl = controller(est);
        let _ = ctrl.start();
        for i in 0..420 {
            let _ = ctrl.process_frame("ok", Some(f64::from(i))).await;
        }
        // At frame 420 the window is frames 120..420
        assert_eq!(ctrl.buffered(), 420);
    }

    #[tokio::test]
    async fn buffer_is_capped_at_max_window() {
        let mut est = MockEst::new();
        let _ = est
            .expect_estimate()
            .returning(|_, _| Ok(Reading::new(Some(60.0), 0.5)));
        let mut ctrl = controller(est);
        let _ = ctrl.start();
        let _ = feed(&mut ctrl, 600).await;
        assert_eq!(ctrl.buffered(), 450);
        assert_eq!(ctrl.frames_received(), 600);
    }

    #[tokio::test]
    async fn estimator_failure_retains_buffer_and_counters() {
        let mut seq = mockall::Sequence::new();
        let mut est = MockEst::new();
        let _ = est
            .expect_estimate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(EstimationError::Failed("inference error".into())));
        let _ = est
            .expect_estimate()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|frames, _| frames.len() == 180)
            .returning(|_, _| Ok(Reading::new(Some(80.0), 0.7)));

        let mut ctrl = controller(est);
        let _ = ctrl.start();
        let _ = feed(&mut ctrl, 149).await;

        let failed = ctrl.process_frame("ok", None).await.unwrap();
        assert_eq!(failed.message(), "Processing failed: inference error");
        assert_eq!(ctrl.buffered(), 150);
        assert_eq!(ctrl.frames_received(), 150);
        assert_eq!(ctrl.state(), SessionState::Measuring);

        let reports = feed(&mut ctrl, 30).await;
        let last = reports.last().unwrap().as_ref().unwrap();
        assert!(matches!(last, Report::Reading { hr: Some(_), .. }));
    }

    #[tokio::test]
    async fn absent_rate_reports_detecting() {
        let mut est = MockEst::new();
        let _ = est
            .expect_estimate()
            .times(1)
            .returning(|_, _| Ok(Reading::undetected(0.05)));
        let mut ctrl = controller(est);
        let _ = ctrl.start();
        let reports = feed(&mut ctrl, 150).await;
        let last = reports.last().unwrap().as_ref().unwrap();
        assert!(matches!(last, Report::Reading { hr: None, .. }));
        assert_eq!(last.message(), "Detecting...");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_estimator_times_out() {
        let entered = Arc::new(Notify::new());
        let mut ctrl = controller(Hanging {
            entered: entered.clone(),
        })
        .with_estimate_timeout(Duration::from_millis(250));
        let _ = ctrl.start();
        let _ = feed(&mut ctrl, 149).await;

        let report = ctrl.process_frame("ok", None).await.unwrap();
        assert!(report.message().starts_with("Processing failed: estimation timed out"));
        assert_eq!(ctrl.buffered(), 150);
        assert_eq!(ctrl.state(), SessionState::Measuring);
    }

    #[tokio::test]
    async fn interrupt_discards_in_flight_estimate() {
        let entered = Arc::new(Notify::new());
        let mut ctrl = controller(Hanging {
            entered: entered.clone(),
        });
        let interrupt = ctrl.interrupt_handle();
        let _ = ctrl.start();
        let _ = feed(&mut ctrl, 149).await;

        let task = tokio::spawn(async move {
            let report = ctrl.process_frame("ok", None).await;
            (ctrl, report)
        });
        entered.notified().await;
        interrupt.interrupt();

        let (mut ctrl, report) = task.await.unwrap();
        assert!(report.is_none());

        let stopped = ctrl.handle(Command::Stop).await.unwrap();
        assert_eq!(stopped, Report::stopped());
        assert_eq!(ctrl.buffered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn frame_queued_before_stop_does_not_delay_it() {
        let entered = Arc::new(Notify::new());
        let mut ctrl = controller(Hanging {
            entered: entered.clone(),
        });
        let interrupt = ctrl.interrupt_handle();
        let _ = ctrl.start();
        let _ = feed(&mut ctrl, 149).await;

        // Frame 150 is queued, then the reader sees `stop` and interrupts
        let queued_under = interrupt.current();
        interrupt.interrupt();

        let started = tokio::time::Instant::now();
        let report = ctrl
            .handle_with(
                Command::Frame {
                    payload: "ok".into(),
                    timestamp: None,
                },
                queued_under,
            )
            .await;
        assert!(report.is_none(), "got {report:?}");
        assert_eq!(started.elapsed(), Duration::ZERO);

        let stopped = ctrl.handle(Command::Stop).await.unwrap();
        assert_eq!(stopped, Report::stopped());
        assert_eq!(ctrl.buffered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn frame_queued_after_stop_gets_a_live_token() {
        let mut est = MockEst::new();
        let _ = est
            .expect_estimate()
            .times(1)
            .returning(|_, _| Ok(Reading::new(Some(61.0), 0.6)));
        let mut ctrl = controller(est);
        let interrupt = ctrl.interrupt_handle();
        let _ = ctrl.start();
        let _ = feed(&mut ctrl, 149).await;

        interrupt.interrupt();
        let report = ctrl
            .handle_with(
                Command::Frame {
                    payload: "ok".into(),
                    timestamp: None,
                },
                interrupt.current(),
            )
            .await
            .unwrap();
        assert!(matches!(report, Report::Reading { hr: Some(_), .. }));
    }

    #[tokio::test]
    async fn decoder_panic_is_a_frame_error() {
        struct Exploding;

        impl FrameDecoder for Exploding {
            fn decode(&self, _payload: &str) -> Result<Frame, DecodeError> {
                panic!("codec blew up");
            }
        }

        let mut ctrl = SessionController::new(
            WindowPolicy::default(),
            Arc::new(Exploding),
            Arc::new(idle_estimator()),
        );
        let _ = ctrl.start();
        let report = ctrl.process_frame("ok", None).await.unwrap();
        assert!(report.message().starts_with("Frame error: "), "got {report:?}");
        assert_eq!(ctrl.buffered(), 0);
        assert_eq!(ctrl.state(), SessionState::Calibrating);
    }

    #[tokio::test]
    async fn fault_moves_to_errored_until_start() {
        let mut ctrl = controller(idle_estimator());
        let _ = ctrl.start();
        let _ = feed(&mut ctrl, 20).await;

        let report = ctrl.fail(SessionFatalError::Transport("binary frame is not UTF-8".into()));
        assert_eq!(
            report.message(),
            "Session error: transport fault: binary frame is not UTF-8"
        );
        assert_eq!(ctrl.state(), SessionState::Errored);
        assert_eq!(ctrl.buffered(), 0);

        let reply = ctrl.process_frame("ok", None).await.unwrap();
        assert_eq!(reply, Report::awaiting_restart());
        assert_eq!(ctrl.buffered(), 0);

        let _ = ctrl.start();
        assert_eq!(ctrl.state(), SessionState::Calibrating);
        assert!(ctrl.process_frame("ok", None).await.is_some());
        assert_eq!(ctrl.buffered(), 1);
    }

    #[tokio::test]
    async fn end_to_end_scenario() {
        let mut est = MockEst::new();
        let _ = est
            .expect_estimate()
            .times(1)
            .returning(|_, _| Ok(Reading::new(Some(66.6), 0.8)));
        let mut ctrl = controller(est);

        assert_eq!(ctrl.handle(Command::Start).await, Some(Report::started()));

        for _ in 0..149 {
            let report = ctrl
                .handle(Command::Frame {
                    payload: "data:image/png;base64,ok".into(),
                    timestamp: Some(0.0),
                })
                .await
                .unwrap();
            assert!(matches!(report.status(), "calibrating" | "measuring"));
            assert!(!matches!(report, Report::Reading { .. }));
        }

        let report = ctrl
            .handle(Command::Frame {
                payload: "ok".into(),
                timestamp: None,
            })
            .await
            .unwrap();
        assert!(matches!(report, Report::Reading { hr: Some(_), .. }));

        assert_eq!(ctrl.handle(Command::Stop).await, Some(Report::stopped()));
        assert_eq!(ctrl.buffered(), 0);
        assert_eq!(ctrl.frames_received(), 0);

        let after = ctrl
            .handle(Command::Frame {
                payload: "ok".into(),
                timestamp: None,
            })
            .await;
        assert!(after.is_none());
    }
}
