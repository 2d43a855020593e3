use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    io,
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{select, Receiver, Sender};
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::manager::store::TaskStore;
use crate::models::message::EvictionCommand;

/// Handle used to arm and cancel history eviction timers.
#[derive(Debug, Clone)]
pub struct Evictor {
    sender: Sender<EvictionCommand>,
}

impl Evictor {
    pub fn new(sender: Sender<EvictionCommand>) -> Self {
        Self { sender }
    }

    pub fn arm(&self, id: u64, after: Duration) {
        self.send(EvictionCommand::Arm { id, after });
    }

    pub fn cancel(&self, id: u64) {
        self.send(EvictionCommand::Cancel(id));
    }

    fn send(&self, command: EvictionCommand) {
        if let Err(e) = self.sender.send(command) {
            debug!("Evictor is gone, dropping {:?}.", e.into_inner());
        }
    }
}

struct Timers {
    deadlines: BinaryHeap<Reverse<(Instant, u64)>>,
    armed: HashMap<u64, Instant>,
}

impl Timers {
    fn new() -> Self {
        Self {
            deadlines: BinaryHeap::new(),
            armed: HashMap::new(),
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.peek().map(|Reverse((deadline, _))| *deadline)
    }

    fn apply(&mut self, command: EvictionCommand) {
        match command {
            EvictionCommand::Arm { id, after } => match Instant::now().checked_add(after) {
                Some(deadline) => {
                    self.armed.insert(id, deadline);
                    self.deadlines.push(Reverse((deadline, id)));
                }
                None => {
                    self.armed.remove(&id);
                    warn!("Task '{}' lifetime is unbounded, it stays in history.", id);
                }
            },
            EvictionCommand::Cancel(id) => {
                if self.armed.remove(&id).is_some() {
                    debug!("Eviction of task '{}' cancelled.", id);
                }
            }
        }
    }

    /// Pops every deadline that has passed, returning ids whose timer is still armed.
    /// Entries left behind by a cancel or re-arm are discarded.
    fn expire(&mut self, now: Instant) -> Vec<u64> {
        let mut expired = Vec::new();
        while let Some(Reverse((deadline, id))) = self.deadlines.peek().copied() {
            if deadline > now {
                break;
            }
            self.deadlines.pop();
            if self.armed.get(&id) == Some(&deadline) {
                self.armed.remove(&id);
                expired.push(id);
            }
        }
        expired
    }
}

pub fn spawn_evictor(
    store: Arc<Mutex<TaskStore>>,
    commands: Receiver<EvictionCommand>,
    shutdown: Receiver<()>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("evictor".to_string())
        .spawn(move || run_evictor(store, commands, shutdown))
}

fn run_evictor(store: Arc<Mutex<TaskStore>>, commands: Receiver<EvictionCommand>, shutdown: Receiver<()>) {
    let mut timers = Timers::new();
    loop {
        let timer = match timers.next_deadline() {
            Some(deadline) => crossbeam_channel::at(deadline),
            None => crossbeam_channel::never(),
        };
        select! {
            recv(commands) -> command => match command {
                Ok(command) => timers.apply(command),
                Err(_) => break,
            },
            recv(shutdown) -> _ => break,
            recv(timer) -> _ => {
                for id in timers.expire(Instant::now()) {
                    if store.lock().remove_history(id).is_some() {
                        info!("Removing task '{}' from history by lifetime.", id);
                    }
                }
            }
        }
    }
    debug!("Evictor stopped with {} timers armed.", timers.armed.len());
}
