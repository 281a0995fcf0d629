//! Bridge between the frame thread and the optional update worker.

use std::time::Duration;

use danmaku_core::{ColumnarBatch, FrameParams, FrameRequest, FrameResponse};
use danmaku_system_kinematics::Kernel;
use danmaku_system_update_worker::{UpdateWorker, WorkerError};

/// Request generation, elapsed-time accumulator and recycled buffers.
#[derive(Debug)]
pub(crate) struct Pipeline {
    worker: Option<UpdateWorker>,
    seq: u64,
    accumulated_ms: f64,
    elapsed_cap_ms: f64,
    in_flight_rows: usize,
    spare: ColumnarBatch,
}

/// What became of a response handed back to the frame thread.
#[derive(Debug)]
pub(crate) enum Delivery {
    /// The response matches the current generation and may be applied.
    Current(FrameResponse),
    /// The world changed after the request was issued.
    Stale,
}

impl Pipeline {
    pub(crate) fn new(kernel: Kernel, enabled: bool, elapsed_cap_ms: f64) -> Result<Self, WorkerError> {
        let worker = if enabled {
            Some(UpdateWorker::spawn(kernel)?)
        } else {
            None
        };
        Ok(Self {
            worker,
            seq: 0,
            accumulated_ms: 0.0,
            elapsed_cap_ms,
            in_flight_rows: 0,
            spare: ColumnarBatch::default(),
        })
    }

    pub(crate) fn is_threaded(&self) -> bool {
        self.worker.is_some()
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    pub(crate) fn in_flight(&self) -> Option<u64> {
        self.worker.as_ref().and_then(UpdateWorker::in_flight)
    }

    /// Marks any outstanding request as stale.
    pub(crate) fn invalidate(&mut self) {
        if self.in_flight().is_some() {
            self.seq += 1;
        }
    }

    /// Adds frame time to the accumulator, saturating at the cap.
    pub(crate) fn accumulate(&mut self, elapsed_ms: f64) {
        self.accumulated_ms = (self.accumulated_ms + elapsed_ms).min(self.elapsed_cap_ms);
    }

    /// Drains the accumulator into the elapsed time of the next request.
    pub(crate) fn take_elapsed(&mut self) -> f64 {
        let elapsed = self.accumulated_ms.clamp(1.0, self.elapsed_cap_ms);
        self.accumulated_ms = 0.0;
        elapsed
    }

    /// Empty columns backed by buffers from the previous response.
    pub(crate) fn take_buffers(&mut self) -> ColumnarBatch {
        let mut columns = std::mem::take(&mut self.spare);
        columns.clear();
        columns
    }

    pub(crate) fn recycle(&mut self, mut columns: ColumnarBatch) {
        columns.clear();
        self.spare = columns;
    }

    /// Request for the inline path, tagged with the current generation.
    pub(crate) fn inline_request(&self, params: FrameParams, columns: ColumnarBatch) -> FrameRequest {
        FrameRequest {
            seq: self.seq,
            params,
            columns,
        }
    }

    /// Sends the columns to the worker under a fresh generation.
    pub(crate) fn submit(&mut self, params: FrameParams, columns: ColumnarBatch) -> Result<(), WorkerError> {
        let worker = self.worker.as_mut().ok_or(WorkerError::Disconnected)?;
        self.seq += 1;
        self.in_flight_rows = columns.len();
        worker.submit(FrameRequest {
            seq: self.seq,
            params,
            columns,
        })
    }

    /// Polls for a finished response without blocking.
    pub(crate) fn poll(&mut self) -> Result<Option<Delivery>, WorkerError> {
        let Some(worker) = self.worker.as_mut() else {
            return Ok(None);
        };
        let response = worker.try_receive()?;
        Ok(response.map(|response| self.classify(response)))
    }

    /// Blocks up to `timeout` for the outstanding response.
    pub(crate) fn wait(&mut self, timeout: Duration) -> Result<Option<Delivery>, WorkerError> {
        let Some(worker) = self.worker.as_mut() else {
            return Ok(None);
        };
        let response = worker.receive_timeout(timeout)?;
        Ok(response.map(|response| self.classify(response)))
    }

    /// Stops using the worker thread after a failure.
    pub(crate) fn disable(&mut self) {
        self.worker = None;
        self.accumulated_ms = 0.0;
    }

    fn classify(&mut self, response: FrameResponse) -> Delivery {
        let current = response.seq == self.seq
            && response.columns.is_consistent()
            && response.columns.len() == self.in_flight_rows;
        if current {
            return Delivery::Current(response);
        }
        tracing::debug!(
            response_seq = response.seq,
            current_seq = self.seq,
            "discarding stale update worker response"
        );
        self.accumulate(response.elapsed_ms);
        self.recycle(response.into_buffers());
        Delivery::Stale
    }
}
