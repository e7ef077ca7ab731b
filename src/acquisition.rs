//! Acquisition state machine.
//!
//! A dedicated worker thread turns start/stop requests into a bounded or
//! unbounded loop of frame pulls. The worker owns the data channel and the
//! frame sink outright; the only state shared with the caller thread is
//! [`AcqState`] behind one mutex, with two direction-specific condition
//! variables: `wake` carries caller-to-worker signals (start, stop,
//! terminate) and `settled` carries worker-to-caller transitions (running
//! flag changes). Each waiter re-checks its own predicate in a loop.
//!
//! The worker never re-reads caller-mutable configuration mid-run: every
//! run executes an immutable [`AcquisitionPlan`] snapshot captured at
//! start time.
//!
//! Stop is cooperative. The flag is observed at loop-iteration boundaries
//! only; an in-flight frame pull completes (or blocks, if the detector is
//! silent) before the loop notices.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, trace};

use crate::camera::TriggerMode;
use crate::data::DataChannel;
use crate::error::{Result, UltraError};

/// Completion record delivered to the sink after each frame pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Zero-based index of the frame within the run.
    pub frame_index: usize,
    /// Sequence number carried in the frame's datagram header.
    pub frame_number: u32,
}

/// Consumer of acquired frames.
///
/// The sink owns frame storage and acquisition bookkeeping. It is moved
/// onto the worker thread and called from there exclusively.
pub trait FrameSink: Send {
    /// Called once when a run begins, before the first frame pull.
    fn acquisition_started(&mut self);

    /// Writable destination for the frame at `frame_index`. Must be at
    /// least the plan's payload size.
    fn frame_buffer(&mut self, frame_index: usize) -> &mut [u8];

    /// Deliver a completed frame. Returning `false` vetoes continuation
    /// and ends the run (e.g. on buffer exhaustion).
    fn frame_ready(&mut self, info: FrameInfo) -> bool;
}

/// Immutable description of one acquisition run.
#[derive(Debug, Clone, Copy)]
pub struct AcquisitionPlan {
    /// Frames to acquire; 0 means run until stopped or vetoed.
    pub frame_count: usize,
    /// Trigger mode the run was started under.
    pub trigger_mode: TriggerMode,
    /// Pixel payload bytes per frame.
    pub payload_bytes: usize,
    /// Grant the sequence tracker a fresh first-frame exemption.
    pub resequence: bool,
}

/// Shared state record; every field is read and written under one mutex.
struct AcqState {
    running: bool,
    stop_requested: bool,
    terminate: bool,
    frames_acquired: usize,
    runs_started: u64,
    plan: Option<AcquisitionPlan>,
    fault: Option<UltraError>,
}

struct Shared {
    state: Mutex<AcqState>,
    /// Caller-to-worker: start, stop and terminate requests.
    wake: Condvar,
    /// Worker-to-caller: `running` transitions.
    settled: Condvar,
}

/// Owner of the acquisition worker thread.
///
/// The worker is spawned Idle at construction, runs plans handed to
/// [`start`](Self::start), and is joined on drop.
pub struct AcquisitionController {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl AcquisitionController {
    /// Spawn the worker thread in the Idle state.
    pub fn new(data: DataChannel, sink: Box<dyn FrameSink>) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(AcqState {
                running: false,
                stop_requested: true,
                terminate: false,
                frames_acquired: 0,
                runs_started: 0,
                plan: None,
                fault: None,
            }),
            wake: Condvar::new(),
            settled: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("ultra-acq".to_string())
            .spawn(move || worker_main(worker_shared, data, sink))?;

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Begin a run described by `plan`.
    ///
    /// Returns once the worker has been signalled. For the externally
    /// clocked multi-trigger mode the call additionally blocks until the
    /// worker reports itself running, so the caller knows the detector's
    /// trigger pulses will find a listener.
    pub fn start(&self, plan: AcquisitionPlan) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.running {
            return Err(UltraError::Busy);
        }
        if state.terminate {
            return Err(UltraError::WorkerGone);
        }

        state.frames_acquired = 0;
        state.fault = None;
        state.plan = Some(plan);
        state.stop_requested = false;
        let run_marker = state.runs_started;
        self.shared.wake.notify_all();

        if plan.trigger_mode == TriggerMode::ExtTrigMult {
            // Rendezvous: wait for the worker to enter this run. The run
            // counter covers the case where the run also ends before we
            // observe `running == true`.
            while !state.running && state.runs_started == run_marker {
                self.shared.settled.wait(&mut state);
            }
        }
        Ok(())
    }

    /// Request a stop and block until the worker is back in Idle.
    ///
    /// A synchronous drain, not a cancellation: an in-flight frame pull
    /// completes before the loop observes the flag. Returns immediately
    /// when the controller is already Idle.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        state.stop_requested = true;
        self.shared.wake.notify_all();
        while state.running {
            self.shared.settled.wait(&mut state);
        }
    }

    /// Whether a run is currently executing.
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    /// Frames delivered so far in the current (or last) run.
    pub fn frames_acquired(&self) -> usize {
        self.shared.state.lock().frames_acquired
    }

    /// Take the error that ended the last run, if any.
    pub fn take_fault(&self) -> Option<UltraError> {
        self.shared.state.lock().fault.take()
    }
}

impl Drop for AcquisitionController {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.terminate = true;
            state.stop_requested = true;
            self.shared.wake.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("acquisition worker panicked");
            }
        }
    }
}

fn worker_main(shared: Arc<Shared>, mut data: DataChannel, mut sink: Box<dyn FrameSink>) {
    loop {
        // Idle: publish `running = false` and wait for a plan.
        let plan = {
            let mut state = shared.state.lock();
            state.running = false;
            shared.settled.notify_all();
            let plan = loop {
                if state.terminate {
                    debug!("acquisition worker terminating");
                    return;
                }
                if !state.stop_requested {
                    if let Some(plan) = state.plan.take() {
                        break plan;
                    }
                }
                shared.wake.wait(&mut state);
            };
            state.running = true;
            state.runs_started += 1;
            shared.settled.notify_all();
            plan
        };

        info!(
            frames = plan.frame_count,
            payload_bytes = plan.payload_bytes,
            "acquisition run starting"
        );

        match run_plan(&shared, &mut data, sink.as_mut(), &plan) {
            Ok(delivered) => {
                info!(delivered, "acquisition run finished");
            }
            Err(e) => {
                // A failed pull ends the run; the worker itself survives
                // and the caller picks the fault up from the shared state.
                error!(error = %e, "acquisition run failed");
                shared.state.lock().fault = Some(e);
            }
        }

        shared.state.lock().stop_requested = true;
    }
}

fn run_plan(
    shared: &Shared,
    data: &mut DataChannel,
    sink: &mut dyn FrameSink,
    plan: &AcquisitionPlan,
) -> Result<usize> {
    if plan.resequence {
        data.reset_sequence();
    }
    sink.acquisition_started();

    loop {
        let frame_index = {
            let state = shared.state.lock();
            if state.stop_requested {
                return Ok(state.frames_acquired);
            }
            if plan.frame_count != 0 && state.frames_acquired >= plan.frame_count {
                return Ok(state.frames_acquired);
            }
            state.frames_acquired
        };

        let buffer = sink.frame_buffer(frame_index);
        if buffer.len() < plan.payload_bytes {
            return Err(UltraError::InvalidConfig {
                message: format!(
                    "frame buffer holds {} bytes, payload needs {}",
                    buffer.len(),
                    plan.payload_bytes
                ),
            });
        }
        let frame_number = data.receive_frame(&mut buffer[..plan.payload_bytes])?;

        let continue_flag = sink.frame_ready(FrameInfo {
            frame_index,
            frame_number,
        });
        trace!(frame_index, frame_number, continue_flag, "frame delivered");

        let delivered = {
            let mut state = shared.state.lock();
            state.frames_acquired += 1;
            state.frames_acquired
        };

        if !continue_flag {
            debug!(delivered, "sink vetoed continuation");
            return Ok(delivered);
        }
    }
}
