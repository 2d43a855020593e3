use std::{
    io,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{select, Receiver, Sender};
use log::debug;

/// Forwards submitted ids, in order, into the bounded dispatch channel.
/// Submission never blocks; this thread absorbs the backpressure instead.
pub fn spawn_feeder(
    submissions: Receiver<u64>,
    dispatch: Sender<u64>,
    shutdown: Receiver<()>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("dispatch-feeder".to_string())
        .spawn(move || {
            loop {
                let id = select! {
                    recv(submissions) -> message => match message {
                        Ok(id) => id,
                        Err(_) => break,
                    },
                    recv(shutdown) -> _ => break,
                };
                select! {
                    send(dispatch, id) -> sent => {
                        if sent.is_err() {
                            break;
                        }
                    },
                    recv(shutdown) -> _ => {
                        debug!("Task '{}' left undispatched on shutdown.", id);
                        break;
                    }
                }
            }
            debug!("Dispatch feeder stopped.");
        })
}
