#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Frame step and the background thread that runs it.
//!
//! [`step_frame`] is the pure per-frame physics update over a
//! [`ColumnarBatch`]: it moves unfrozen rows, decays fading rows and flags
//! rows for culling. The world calls it inline on its own thread, or hands
//! requests to an [`UpdateWorker`], which runs the same step on a dedicated
//! thread and returns the mutated buffers through a channel.

use std::{
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use danmaku_core::{ColumnarBatch, FrameParams, FrameRequest, FrameResponse, ItemFlags};
use danmaku_system_kinematics::Kernel;
use thiserror::Error;

/// Failures surfaced by the background worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The operating system refused to start the worker thread.
    #[error("failed to spawn update worker thread")]
    Spawn(#[source] std::io::Error),
    /// A request is already outstanding.
    #[error("update worker is still processing request {seq}")]
    Busy {
        /// Sequence number of the outstanding request.
        seq: u64,
    },
    /// The worker thread has exited.
    #[error("update worker channel disconnected")]
    Disconnected,
}

/// Runs the kernel over a batch while reusing its scratch masks between frames.
#[derive(Debug)]
pub struct FrameStepper {
    kernel: Kernel,
    movable: Vec<bool>,
    changed: Vec<bool>,
}

impl FrameStepper {
    /// Creates a stepper backed by the provided kernel.
    #[must_use]
    pub fn new(kernel: Kernel) -> Self {
        Self {
            kernel,
            movable: Vec::new(),
            changed: Vec::new(),
        }
    }

    /// Kernel used for position updates.
    #[must_use]
    pub const fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Advances every row of the request by its elapsed time.
    ///
    /// Requests whose columns disagree in length, or that carry no rows,
    /// produce a response with the same sequence number and no changes.
    pub fn step(&mut self, request: FrameRequest) -> FrameResponse {
        let FrameRequest {
            seq,
            params,
            mut columns,
        } = request;

        let count = columns.len();
        if count == 0 || !columns.is_consistent() {
            columns.clear();
            return FrameResponse {
                seq,
                elapsed_ms: params.elapsed_ms,
                columns,
                changed_rows: Vec::new(),
                remove_rows: Vec::new(),
            };
        }

        self.movable.clear();
        self.movable.extend(
            columns
                .flags
                .iter()
                .map(|flags| !params.paused && !flags.contains(ItemFlags::FROZEN)),
        );
        self.changed.clear();
        self.changed.resize(count, false);

        self.kernel.advance(
            &mut columns.x,
            &columns.speed,
            &self.movable,
            params.movement_factor(),
            &mut self.changed,
        );

        let mut changed_rows = Vec::with_capacity(count);
        let mut remove_rows = Vec::with_capacity(count / 4);
        for index in 0..count {
            let flags = columns.flags[index];
            if flags.contains(ItemFlags::FADING) {
                let remaining = columns.fade_remaining_ms[index] - params.elapsed_ms;
                columns.fade_remaining_ms[index] = remaining;
                columns.alpha[index] = fade_alpha(remaining, params.fade_window_ms);
                self.changed[index] = true;
            }

            let row = columns.rows[index];
            if self.changed[index] {
                changed_rows.push(row);
            }

            if !flags.contains(ItemFlags::DRAGGING)
                && is_cullable(&columns, index, &params)
            {
                remove_rows.push(row);
            }
        }

        FrameResponse {
            seq,
            elapsed_ms: params.elapsed_ms,
            columns,
            changed_rows,
            remove_rows,
        }
    }
}

/// Opacity of a fading row with `remaining_ms` left out of `window_ms`.
#[must_use]
pub fn fade_alpha(remaining_ms: f64, window_ms: f64) -> f64 {
    if remaining_ms <= 0.0 || window_ms <= 0.0 {
        0.0
    } else {
        (remaining_ms / window_ms).clamp(0.0, 1.0)
    }
}

fn is_cullable(columns: &ColumnarBatch, index: usize, params: &FrameParams) -> bool {
    let x = columns.x[index];
    let y = columns.y[index];
    columns.alpha[index] <= 0.0
        || x + columns.width[index] < params.cull_threshold
        || y > params.viewport_height
        || y + params.item_height < 0.0
}

/// Runs a single frame step with fresh scratch buffers.
#[must_use]
pub fn step_frame(kernel: &Kernel, request: FrameRequest) -> FrameResponse {
    FrameStepper::new(*kernel).step(request)
}

/// Handle to the background thread that executes frame steps.
///
/// At most one request is in flight at a time. Dropping the handle closes the
/// request channel and joins the thread.
#[derive(Debug)]
pub struct UpdateWorker {
    requests: Option<Sender<FrameRequest>>,
    responses: Receiver<FrameResponse>,
    handle: Option<JoinHandle<()>>,
    in_flight: Option<u64>,
}

impl UpdateWorker {
    /// Starts the worker thread.
    pub fn spawn(kernel: Kernel) -> Result<Self, WorkerError> {
        let (request_tx, request_rx) = crossbeam_channel::bounded::<FrameRequest>(1);
        let (response_tx, response_rx) = crossbeam_channel::bounded::<FrameResponse>(1);

        let handle = thread::Builder::new()
            .name("danmaku-update".to_owned())
            .spawn(move || {
                let mut stepper = FrameStepper::new(kernel);
                tracing::debug!(kernel = %stepper.kernel().mode(), "update worker started");
                for request in request_rx {
                    if response_tx.send(stepper.step(request)).is_err() {
                        break;
                    }
                }
                tracing::debug!("update worker stopped");
            })
            .map_err(WorkerError::Spawn)?;

        Ok(Self {
            requests: Some(request_tx),
            responses: response_rx,
            handle: Some(handle),
            in_flight: None,
        })
    }

    /// Sequence number of the outstanding request, if any.
    #[must_use]
    pub const fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    /// Hands a request to the worker thread.
    pub fn submit(&mut self, request: FrameRequest) -> Result<(), WorkerError> {
        if let Some(seq) = self.in_flight {
            return Err(WorkerError::Busy { seq });
        }
        let requests = self.requests.as_ref().ok_or(WorkerError::Disconnected)?;
        let seq = request.seq;
        requests
            .send(request)
            .map_err(|_| WorkerError::Disconnected)?;
        self.in_flight = Some(seq);
        Ok(())
    }

    /// Collects a finished response without blocking.
    pub fn try_receive(&mut self) -> Result<Option<FrameResponse>, WorkerError> {
        match self.responses.try_recv() {
            Ok(response) => {
                self.in_flight = None;
                Ok(Some(response))
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(WorkerError::Disconnected),
        }
    }

    /// Waits up to `timeout` for the outstanding response.
    pub fn receive_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<FrameResponse>, WorkerError> {
        if self.in_flight.is_none() {
            return self.try_receive();
        }
        match self.responses.recv_timeout(timeout) {
            Ok(response) => {
                self.in_flight = None;
                Ok(Some(response))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(WorkerError::Disconnected),
        }
    }
}

impl Drop for UpdateWorker {
    fn drop(&mut self) {
        drop(self.requests.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("update worker thread panicked");
            }
        }
    }
}
