//! Scanner Coordinator
//!
//! Owns the frame worker thread, the control thread and the async runtime the
//! recognizer runs on, and wires them to one shared pipeline session.

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::analysis::{DateInputError, ParsedDate, ScanState, TransitionError};
use crate::capture::{DropReason, RawFrame};
use crate::config::AppConfig;
use crate::shared::{ControlEvent, PipelineSession, ScanStats};
use crate::vision::{compute_crop, PixelBufferRecycler, RecognitionError, RegionSpec, TextRecognizer};

/// Live expiry date scanner
///
/// Frames go in through [`ExpiryScanner::submit_frame`]; the current
/// [`ScanState`] comes out through [`ExpiryScanner::state`] or a
/// [`ExpiryScanner::subscribe`] receiver.
pub struct ExpiryScanner {
    session: Arc<Mutex<PipelineSession>>,
    frames: Option<Sender<RawFrame>>,
    control: Sender<ControlEvent>,
    state_rx: watch::Receiver<ScanState>,
    recognizer: Arc<dyn TextRecognizer>,
    worker_handle: Option<JoinHandle<()>>,
    control_handle: Option<JoinHandle<()>>,
    runtime: Option<Runtime>,
}

/// Everything the frame worker needs
struct Worker {
    frames: Receiver<RawFrame>,
    session: Arc<Mutex<PipelineSession>>,
    control: Sender<ControlEvent>,
    recognizer: Arc<dyn TextRecognizer>,
    runtime: Handle,
    region: RegionSpec,
    timeout: Duration,
    recycler: PixelBufferRecycler,
}

impl ExpiryScanner {
    /// Start a scanning session
    pub fn start(config: &AppConfig, recognizer: Arc<dyn TextRecognizer>) -> Result<Self> {
        config.validate()?;
        let capture = config.capture_config();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("expiry-recognizer")
            .enable_all()
            .build()
            .context("Failed to start recognizer runtime")?;

        let session = Arc::new(Mutex::new(PipelineSession::new(
            capture.min_interval,
            config.date_extractor(),
        )));
        let state_rx = session.lock().subscribe();

        let (frame_tx, frame_rx) = bounded(capture.queue_depth);
        let (control_tx, control_rx) = unbounded();

        let control_session = session.clone();
        let control_handle = std::thread::Builder::new()
            .name("expiry-control".to_string())
            .spawn(move || run_control_loop(control_rx, control_session))
            .context("Failed to spawn control thread")?;

        let worker = Worker {
            frames: frame_rx,
            session: session.clone(),
            control: control_tx.clone(),
            recognizer: recognizer.clone(),
            runtime: runtime.handle().clone(),
            region: config.region,
            timeout: config.recognition_timeout(),
            recycler: PixelBufferRecycler::new(),
        };
        let worker_handle = std::thread::Builder::new()
            .name("expiry-worker".to_string())
            .spawn(move || worker.run())
            .context("Failed to spawn frame worker thread")?;

        info!(
            min_interval_ms = capture.min_interval.as_millis() as u64,
            queue_depth = capture.queue_depth,
            "Expiry scanner started"
        );

        Ok(Self {
            session,
            frames: Some(frame_tx),
            control: control_tx,
            state_rx,
            recognizer,
            worker_handle: Some(worker_handle),
            control_handle: Some(control_handle),
            runtime: Some(runtime),
        })
    }

    /// Hand a camera frame to the pipeline. Never blocks; the frame is
    /// released right away if the worker is busy.
    pub fn submit_frame(&self, frame: RawFrame) {
        self.session.lock().record_received();

        let rejected = match &self.frames {
            Some(frames) => match frames.try_send(frame) {
                Ok(()) => None,
                Err(TrySendError::Full(frame)) => Some((DropReason::QueueFull, frame)),
                Err(TrySendError::Disconnected(frame)) => Some((DropReason::Closed, frame)),
            },
            None => Some((DropReason::Closed, frame)),
        };

        // Release outside the session lock; the hook may call back into the scanner
        if let Some((reason, frame)) = rejected {
            self.session.lock().record_drop(reason);
            drop(frame);
        }
    }

    /// Current state
    pub fn state(&self) -> ScanState {
        self.state_rx.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<ScanState> {
        self.state_rx.clone()
    }

    /// Session counters
    pub fn stats(&self) -> ScanStats {
        self.session.lock().stats().clone()
    }

    /// Discard the accepted date and scan again
    pub fn retry(&self) -> Result<(), TransitionError> {
        self.session.lock().retry()
    }

    /// Use a date supplied by the user instead of a recognized one
    pub fn manual_override(&self, date: ParsedDate) {
        self.session.lock().manual_override(date);
    }

    /// Parse a user-typed `dd/mm/yyyy` date and apply it as a manual override.
    /// The year must lie in the configured extraction range.
    pub fn manual_override_input(&self, input: &str) -> Result<ParsedDate, DateInputError> {
        let mut session = self.session.lock();
        let date = session.extractor().parse_user_input(input)?;
        session.manual_override(date.clone());
        Ok(date)
    }

    /// Block until `predicate` holds for the published state or `timeout` passes
    pub fn wait_for_state(
        &self,
        timeout: Duration,
        predicate: impl FnMut(&ScanState) -> bool,
    ) -> Option<ScanState> {
        let runtime = self.runtime.as_ref()?;
        let mut rx = self.state_rx.clone();
        runtime.block_on(async move {
            match tokio::time::timeout(timeout, rx.wait_for(predicate)).await {
                Ok(Ok(state)) => Some(state.clone()),
                _ => None,
            }
        })
    }

    /// Stop the session: no more frames are admitted, late completions are
    /// ignored and the recognizer is closed.
    pub fn shutdown(&mut self) {
        if self.runtime.is_none() {
            return;
        }

        self.session.lock().teardown();

        // Closing the frame channel ends the worker loop
        self.frames.take();
        if let Some(handle) = self.worker_handle.take() {
            if handle.join().is_err() {
                warn!("Frame worker thread panicked");
            }
        }

        let _ = self.control.send(ControlEvent::Shutdown);
        if let Some(handle) = self.control_handle.take() {
            if handle.join().is_err() {
                warn!("Control thread panicked");
            }
        }

        self.recognizer.close();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }

        info!("Expiry scanner stopped");
    }
}

impl Drop for ExpiryScanner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Worker {
    fn run(mut self) {
        debug!("Frame worker starting");
        while let Ok(frame) = self.frames.recv() {
            self.process(frame);
        }
        debug!("Frame worker exiting");
    }

    /// Admission, conversion and crop for one frame; the frame is released
    /// when this returns
    fn process(&mut self, frame: RawFrame) {
        let ticket = match self.session.lock().try_admit(frame.timestamp) {
            Ok(ticket) => ticket,
            Err(_) => return,
        };

        let rotation = frame.rotation();
        let crop = match self.recycler.convert(&frame) {
            Ok(image) => {
                let rect = compute_crop(frame.width, frame.height, rotation, &self.region);
                debug!(?rect, rotation = rotation.degrees(), "Cropping scan window");
                rect.crop(image)
            }
            Err(e) => {
                self.session.lock().abandon(ticket, &e);
                return;
            }
        };
        drop(frame);

        let recognizer = self.recognizer.clone();
        let control = self.control.clone();
        let timeout = self.timeout;
        self.runtime.spawn(async move {
            // Own task so a panicking recognizer still produces a completion
            let mut task = tokio::spawn(async move { recognizer.recognize(crop, rotation.degrees()).await });
            let result = match tokio::time::timeout(timeout, &mut task).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    warn!(error = %e, "Recognizer task failed");
                    Err(RecognitionError::Engine(format!("recognizer task failed: {e}")))
                }
                Err(_) => {
                    task.abort();
                    Err(RecognitionError::Timeout(timeout))
                }
            };
            if control.send(ControlEvent::Completed { ticket, result }).is_err() {
                debug!("Control path closed, dropping completion");
            }
        });
    }
}

/// Apply completions in arrival order until shutdown
fn run_control_loop(events: Receiver<ControlEvent>, session: Arc<Mutex<PipelineSession>>) {
    debug!("Control loop starting");
    for event in events.iter() {
        match event {
            ControlEvent::Completed { ticket, result } => {
                let outcome = session.lock().complete(ticket, result);
                debug!(?outcome, sequence = ticket.sequence(), "Applied completion");
            }
            ControlEvent::Shutdown => break,
        }
    }
    debug!("Control loop exiting");
}
