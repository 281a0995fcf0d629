use std::time::Duration;

use danmaku_core::{BatchRow, ColumnarBatch, FrameParams, FrameRequest, ItemFlags};
use danmaku_system_kinematics::Kernel;
use danmaku_system_update_worker::{step_frame, UpdateWorker, WorkerError};

fn params(elapsed_ms: f64) -> FrameParams {
    FrameParams {
        paused: false,
        rate: 1.0,
        elapsed_ms,
        viewport_height: 720.0,
        cull_threshold: -20.0,
        item_height: 42.0,
        fade_window_ms: 300.0,
    }
}

fn row(row: usize, x: f64, flags: ItemFlags) -> BatchRow {
    BatchRow {
        row,
        x,
        y: 10.0,
        speed: 100.0,
        alpha: 1.0,
        width: 80.0,
        fade_remaining_ms: if flags.contains(ItemFlags::FADING) {
            300.0
        } else {
            0.0
        },
        flags,
    }
}

fn request(seq: u64, elapsed_ms: f64, rows: &[BatchRow]) -> FrameRequest {
    let mut columns = ColumnarBatch::default();
    for entry in rows {
        columns.push(*entry);
    }
    FrameRequest {
        seq,
        params: params(elapsed_ms),
        columns,
    }
}

#[test]
fn movable_rows_advance_and_report_changes() {
    let response = step_frame(
        &Kernel::scalar(),
        request(
            4,
            500.0,
            &[
                row(0, 600.0, ItemFlags::empty()),
                row(1, 600.0, ItemFlags::FROZEN),
            ],
        ),
    );
    assert_eq!(response.seq, 4);
    assert_eq!(response.columns.x, vec![550.0, 600.0]);
    assert_eq!(response.changed_rows, vec![0]);
    assert!(response.remove_rows.is_empty());
}

#[test]
fn paused_frame_moves_nothing() {
    let mut frame = request(1, 500.0, &[row(0, 600.0, ItemFlags::empty())]);
    frame.params.paused = true;
    let response = step_frame(&Kernel::wide(), frame);
    assert_eq!(response.columns.x, vec![600.0]);
    assert!(response.changed_rows.is_empty());
}

#[test]
fn fading_rows_decay_then_cull() {
    let kernel = Kernel::scalar();
    let response = step_frame(&kernel, request(1, 150.0, &[row(3, 600.0, ItemFlags::FADING)]));
    assert!((response.columns.alpha[0] - 0.5).abs() < 1e-12);
    assert_eq!(response.columns.fade_remaining_ms[0], 150.0);
    assert_eq!(response.changed_rows, vec![3]);
    assert!(response.remove_rows.is_empty());

    let response = step_frame(&kernel, request(2, 300.0, &[row(3, 600.0, ItemFlags::FADING)]));
    assert_eq!(response.columns.alpha[0], 0.0);
    assert_eq!(response.remove_rows, vec![3]);
}

#[test]
fn offscreen_rows_are_culled_unless_dragged() {
    let response = step_frame(
        &Kernel::scalar(),
        request(
            1,
            16.0,
            &[
                row(0, -150.0, ItemFlags::empty()),
                row(1, -150.0, ItemFlags::FROZEN | ItemFlags::DRAGGING),
            ],
        ),
    );
    assert_eq!(response.remove_rows, vec![0]);
}

#[test]
fn mismatched_columns_yield_empty_response() {
    let mut frame = request(9, 16.0, &[row(0, 600.0, ItemFlags::empty())]);
    let _ = frame.columns.speed.pop();
    let response = step_frame(&Kernel::scalar(), frame);
    assert_eq!(response.seq, 9);
    assert!(response.columns.is_empty());
    assert!(response.changed_rows.is_empty());
    assert!(response.remove_rows.is_empty());
}

#[test]
fn worker_thread_round_trips_requests() {
    let mut worker = UpdateWorker::spawn(Kernel::scalar()).expect("worker spawns");
    worker
        .submit(request(1, 1_000.0, &[row(0, 600.0, ItemFlags::empty())]))
        .expect("first submit succeeds");
    assert_eq!(worker.in_flight(), Some(1));

    let busy = worker.submit(request(2, 16.0, &[]));
    assert!(matches!(busy, Err(WorkerError::Busy { seq: 1 })));

    let response = worker
        .receive_timeout(Duration::from_secs(5))
        .expect("worker alive")
        .expect("response arrives");
    assert_eq!(response.seq, 1);
    assert_eq!(response.columns.x, vec![500.0]);
    assert_eq!(worker.in_flight(), None);

    let buffers = response.into_buffers();
    worker
        .submit(FrameRequest {
            seq: 2,
            params: params(16.0),
            columns: buffers,
        })
        .expect("buffers can be resubmitted");
    let response = worker
        .receive_timeout(Duration::from_secs(5))
        .expect("worker alive")
        .expect("response arrives");
    assert_eq!(response.seq, 2);
    assert!(response.columns.is_empty());
}

#[test]
fn idle_worker_reports_nothing() {
    let mut worker = UpdateWorker::spawn(Kernel::default()).expect("worker spawns");
    assert!(worker.try_receive().expect("worker alive").is_none());
    assert!(worker
        .receive_timeout(Duration::from_millis(1))
        .expect("worker alive")
        .is_none());
}
