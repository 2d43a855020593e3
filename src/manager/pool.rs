use std::{
    io,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use chrono::Utc;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use thiserror::Error;

use crate::manager::{
    dispatch::spawn_feeder,
    evictor::{spawn_evictor, Evictor},
    store::TaskStore,
};
use crate::models::{
    message::EvictionCommand,
    task::{Task, TaskError, TaskParams},
};
use crate::worker::{
    worker::{spawn_worker_thread, WorkerContext},
    workload::{ArithmeticProgression, Workload},
};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("count of workers should be more than zero")]
    NoWorkers,
    #[error("workers are already running")]
    AlreadyRunning,
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Fixed set of workers fed from one bounded dispatch channel.
///
/// All queue and history access goes through a single mutex-guarded
/// [`TaskStore`]. Submission never blocks: ids go to an unbounded channel and
/// a feeder thread moves them into the dispatch channel, which holds at most
/// `max_workers` ids.
pub struct Pool {
    max_workers: usize,
    next_id: AtomicU64,
    store: Arc<Mutex<TaskStore>>,
    workload: Arc<dyn Workload>,
    submit_tx: Sender<u64>,
    submit_rx: Receiver<u64>,
    dispatch_tx: Sender<u64>,
    dispatch_rx: Receiver<u64>,
    evictor: Evictor,
    eviction_rx: Receiver<EvictionCommand>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    drained_tx: Mutex<Option<Sender<()>>>,
    drained_rx: Receiver<()>,
    running: AtomicBool,
}

impl Pool {
    pub fn new(max_workers: usize) -> Result<Self, PoolError> {
        Self::with_workload(max_workers, Arc::new(ArithmeticProgression))
    }

    pub fn with_workload(max_workers: usize, workload: Arc<dyn Workload>) -> Result<Self, PoolError> {
        if max_workers < 1 {
            return Err(PoolError::NoWorkers);
        }
        let (submit_tx, submit_rx) = unbounded();
        let (dispatch_tx, dispatch_rx) = bounded(max_workers);
        let (eviction_tx, eviction_rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = bounded(0);
        let (drained_tx, drained_rx) = bounded(0);

        Ok(Self {
            max_workers,
            next_id: AtomicU64::new(1),
            store: Arc::new(Mutex::new(TaskStore::new())),
            workload,
            submit_tx,
            submit_rx,
            dispatch_tx,
            dispatch_rx,
            evictor: Evictor::new(eviction_tx),
            eviction_rx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            drained_tx: Mutex::new(Some(drained_tx)),
            drained_rx,
            running: AtomicBool::new(false),
        })
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Starts the workers, the dispatch feeder, the evictor and a supervisor
    /// that reports the pool drained once every worker has exited.
    pub fn workers_run(&self) -> Result<(), PoolError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        spawn_evictor(Arc::clone(&self.store), self.eviction_rx.clone(), self.shutdown_rx.clone())
            .map_err(|source| spawn_error("evictor", source))?;
        spawn_feeder(self.submit_rx.clone(), self.dispatch_tx.clone(), self.shutdown_rx.clone())
            .map_err(|source| spawn_error("dispatch feeder", source))?;

        let mut workers = Vec::with_capacity(self.max_workers);
        for number in 1..=self.max_workers {
            let context = WorkerContext {
                number,
                store: Arc::clone(&self.store),
                dispatch: self.dispatch_rx.clone(),
                shutdown: self.shutdown_rx.clone(),
                evictor: self.evictor.clone(),
                workload: Arc::clone(&self.workload),
            };
            match spawn_worker_thread(context) {
                Ok(handle) => workers.push(handle),
                Err(source) => {
                    self.shutdown();
                    return Err(spawn_error(&format!("worker {}", number), source));
                }
            }
        }

        let drained = self.drained_tx.lock().take();
        thread::Builder::new()
            .name("supervisor".to_string())
            .spawn(move || supervise(workers, drained))
            .map_err(|source| spawn_error("supervisor", source))?;

        info!("Started {} workers.", self.max_workers);
        Ok(())
    }

    /// Admits a task without validating it. Returns the assigned id.
    pub fn enqueue(&self, params: TaskParams) -> u64 {
        let mut store = self.store.lock();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        store.push(id, params, Utc::now());
        // Sent under the lock so dispatch order matches queue order.
        if let Err(e) = self.submit_tx.send(id) {
            error!("Failed to submit task '{}': {}", id, e);
        }
        drop(store);

        info!("Enqueue task with id: {}", id);
        if self.is_shutdown() {
            warn!("Task '{}' accepted after shutdown, it will not run.", id);
        }
        id
    }

    pub fn try_enqueue(&self, params: TaskParams) -> Result<u64, TaskError> {
        params.validate()?;
        Ok(self.enqueue(params))
    }

    pub fn dequeue(&self, id: u64) {
        debug!("Dequeue task with id: {}", id);
        self.store.lock().dequeue(id);
    }

    pub fn sync_queue_position(&self) {
        self.store.lock().sync_queue_position();
    }

    pub fn remove_task_history(&self, id: u64) {
        if self.store.lock().remove_history(id).is_some() {
            info!("Removing task '{}' from history.", id);
        }
    }

    /// Disarms the pending eviction of a finished task; it then stays in history.
    pub fn cancel_eviction(&self, id: u64) {
        self.evictor.cancel(id);
    }

    /// Stops dispatch. Workers exit after their current task. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown_tx.lock().take().is_some() {
            info!("Signal to cancel received, stopping workers.");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_tx.lock().is_none()
    }

    /// Disconnects once every worker has exited.
    pub fn drained(&self) -> Receiver<()> {
        self.drained_rx.clone()
    }

    pub fn wait_drained(&self) {
        let _ = self.drained_rx.recv();
    }

    pub fn snapshot(&self) -> Vec<Task> {
        self.store.lock().snapshot()
    }

    pub fn get(&self, id: u64) -> Option<Task> {
        self.store.lock().get(id).cloned()
    }

    pub fn queue_ids(&self) -> Vec<u64> {
        self.store.lock().queue_ids()
    }

    pub fn queue_len(&self) -> usize {
        self.store.lock().queue_len()
    }

    /// Ids handed to the dispatch channel but not yet picked up by a worker.
    pub fn in_flight(&self) -> usize {
        self.dispatch_rx.len()
    }

    /// Ids accepted but still waiting for room in the dispatch channel.
    pub fn awaiting_dispatch(&self) -> usize {
        self.submit_rx.len()
    }
}

fn spawn_error(name: &str, source: io::Error) -> PoolError {
    PoolError::Spawn {
        name: name.to_string(),
        source,
    }
}

fn supervise(workers: Vec<JoinHandle<()>>, drained: Option<Sender<()>>) {
    for worker in workers {
        if worker.join().is_err() {
            error!("A worker exited by panic.");
        }
    }
    info!("All workers stopped.");
    drop(drained);
}
