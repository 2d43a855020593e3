use std::{
    any::Any,
    io,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
};

use chrono::Utc;
use crossbeam_channel::{select, Receiver, TryRecvError};
use log::{error, info, warn};
use parking_lot::Mutex;

use crate::manager::{evictor::Evictor, store::TaskStore};
use crate::worker::workload::Workload;

pub struct WorkerContext {
    pub number: usize,
    pub store: Arc<Mutex<TaskStore>>,
    pub dispatch: Receiver<u64>,
    pub shutdown: Receiver<()>,
    pub evictor: Evictor,
    pub workload: Arc<dyn Workload>,
}

pub fn spawn_worker_thread(context: WorkerContext) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("worker-{}", context.number))
        .spawn(move || run_worker(context))
}

fn run_worker(context: WorkerContext) {
    info!("Worker {} waiting for tasks.", context.number);
    loop {
        // Cancellation is only observed between tasks.
        if matches!(context.shutdown.try_recv(), Err(TryRecvError::Disconnected)) {
            break;
        }
        select! {
            recv(context.shutdown) -> _ => break,
            recv(context.dispatch) -> message => match message {
                Ok(id) => handle_task(id, &context),
                Err(e) => {
                    error!("Worker {} failed to receive a task: {}", context.number, e);
                    break;
                }
            }
        }
    }
    info!("Worker {} received the cancel signal.", context.number);
}

fn handle_task(id: u64, context: &WorkerContext) {
    let started = context.store.lock().start(id, Utc::now());
    let params = match started {
        Some(params) => params,
        None => {
            warn!("Worker {} skipped task '{}'.", context.number, id);
            let mut store = context.store.lock();
            // A queued id without history would otherwise stay queued forever.
            if store.get(id).is_none() {
                store.dequeue(id);
                store.sync_queue_position();
            }
            return;
        }
    };
    info!("Worker {} started work on task '{}'.", context.number, id);

    let store = &context.store;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        context
            .workload
            .run(&params, &mut |iteration| store.lock().progress(id, iteration))
    }));
    let outcome = match outcome {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(panic_reason(payload)),
    };

    match &outcome {
        Ok(result) => info!("Worker {} ended task '{}' with result: {}", context.number, id, result),
        Err(reason) => error!("Worker {} failed task '{}': {}", context.number, id, reason),
    }

    // Armed under the lock so anyone who sees the task Done can cancel its eviction.
    let mut store = context.store.lock();
    store.finish(id, Utc::now(), outcome);
    context.evictor.arm(id, params.ttl_duration());
}

fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("task panicked: {}", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crossbeam_channel::{bounded, unbounded};

    use crate::models::message::EvictionCommand;
    use crate::models::task::{TaskParams, TaskStatus};
    use crate::worker::workload::{ArithmeticProgression, WorkloadError};

    struct Panicking;

    impl Workload for Panicking {
        fn run(&self, _: &TaskParams, _: &mut dyn FnMut(u64)) -> Result<f64, WorkloadError> {
            panic!("boom");
        }
    }

    struct Failing;

    impl Workload for Failing {
        fn run(&self, _: &TaskParams, _: &mut dyn FnMut(u64)) -> Result<f64, WorkloadError> {
            Err(WorkloadError::Failed("no result".to_string()))
        }
    }

    struct Harness {
        store: Arc<Mutex<TaskStore>>,
        dispatch: crossbeam_channel::Sender<u64>,
        evictions: Receiver<EvictionCommand>,
        shutdown: Option<crossbeam_channel::Sender<()>>,
        handle: JoinHandle<()>,
    }

    fn start(workload: Arc<dyn Workload>) -> Harness {
        let store = Arc::new(Mutex::new(TaskStore::new()));
        let (dispatch_tx, dispatch_rx) = bounded(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let (eviction_tx, eviction_rx) = unbounded();
        let handle = spawn_worker_thread(WorkerContext {
            number: 1,
            store: Arc::clone(&store),
            dispatch: dispatch_rx,
            shutdown: shutdown_rx,
            evictor: Evictor::new(eviction_tx),
            workload,
        })
        .unwrap();

        Harness {
            store,
            dispatch: dispatch_tx,
            evictions: eviction_rx,
            shutdown: Some(shutdown_tx),
            handle,
        }
    }

    fn submit(harness: &Harness, id: u64, params: TaskParams) {
        harness.store.lock().push(id, params, Utc::now());
        harness.dispatch.send(id).unwrap();
    }

    #[test]
    fn worker_completes_task_and_arms_eviction() {
        let harness = start(Arc::new(ArithmeticProgression));
        submit(&harness, 1, TaskParams::new(5, 1.0, 0.0, 0.0, 2.5));

        let command = harness.evictions.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(
            command,
            EvictionCommand::Arm {
                id: 1,
                after: Duration::from_millis(2500)
            }
        );

        let store = harness.store.lock();
        let task = store.get(1).unwrap();
        assert_eq!(task.status, TaskStatus::Done);
        assert_eq!(task.result, Some(10.0));
        assert_eq!(task.queue_position, 0);
        assert_eq!(store.queue_len(), 0);
    }

    #[test]
    fn panic_marks_task_done_and_worker_survives() {
        let harness = start(Arc::new(Panicking));
        submit(&harness, 1, TaskParams::new(1, 0.0, 0.0, 0.0, 0.0));
        harness.evictions.recv_timeout(Duration::from_secs(2)).unwrap();
        submit(&harness, 2, TaskParams::new(1, 0.0, 0.0, 0.0, 0.0));
        harness.evictions.recv_timeout(Duration::from_secs(2)).unwrap();

        let store = harness.store.lock();
        for id in [1, 2] {
            let task = store.get(id).unwrap();
            assert_eq!(task.status, TaskStatus::Done);
            assert_eq!(task.error.as_deref(), Some("task panicked: boom"));
            assert!(task.result.is_none());
        }
    }

    #[test]
    fn workload_error_is_annotated() {
        let harness = start(Arc::new(Failing));
        submit(&harness, 1, TaskParams::new(1, 0.0, 0.0, 0.0, 0.0));
        harness.evictions.recv_timeout(Duration::from_secs(2)).unwrap();

        let store = harness.store.lock();
        assert_eq!(store.get(1).unwrap().error.as_deref(), Some("workload failed: no result"));
    }

    #[test]
    fn task_missing_from_history_leaves_the_queue() {
        let harness = start(Arc::new(ArithmeticProgression));
        harness.store.lock().push(1, TaskParams::new(1, 0.0, 0.0, 0.0, 0.0), Utc::now());
        harness.store.lock().remove_history(1);
        harness.dispatch.send(1).unwrap();
        submit(&harness, 2, TaskParams::new(1, 0.0, 0.0, 0.0, 5.0));
        harness.evictions.recv_timeout(Duration::from_secs(2)).unwrap();

        let store = harness.store.lock();
        assert_eq!(store.queue_len(), 0);
        assert!(store.queue_ids().is_empty());
        assert_eq!(store.get(2).unwrap().status, TaskStatus::Done);
    }

    #[test]
    fn running_task_finishes_before_worker_exits() {
        let mut harness = start(Arc::new(ArithmeticProgression));
        submit(&harness, 1, TaskParams::new(4, 1.0, 0.0, 0.1, 0.0));
        thread::sleep(Duration::from_millis(50));

        drop(harness.shutdown.take());
        harness.handle.join().unwrap();

        let task = harness.store.lock().get(1).cloned().unwrap();
        assert_eq!(task.status, TaskStatus::Done);
        assert_eq!(task.result, Some(6.0));
    }
}
