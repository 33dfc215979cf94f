//! Deferred task queue for versioning operations.
//!
//! A single background consumer drains tasks in FIFO order so commits and
//! pushes never run concurrently. Callers without a queue run tasks inline.

use std::sync::mpsc::{self, Sender, SyncSender};
use std::sync::Mutex;
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::core::context::Options;
use crate::error::Result;

/// A deferred unit of work.
pub type Task = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

enum Message {
    Run(Task),
    Flush(SyncSender<()>),
}

/// FIFO queue with one consumer thread.
pub struct Queue {
    tx: Mutex<Option<Sender<Message>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue").finish_non_exhaustive()
    }
}

impl Queue {
    /// Start the consumer thread.
    pub fn spawn() -> std::sync::Arc<Self> {
        let (tx, rx) = mpsc::channel::<Message>();
        let worker = std::thread::spawn(move || {
            for msg in rx {
                match msg {
                    Message::Run(task) => {
                        if let Err(e) = task() {
                            warn!(error = %e, "queued task failed");
                        }
                    }
                    Message::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("queue drained");
        });
        std::sync::Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Append a task. If the queue is closed the task runs inline.
    pub fn add(&self, task: Task) -> Result<()> {
        let rejected = {
            let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
            match guard.as_ref() {
                Some(tx) => match tx.send(Message::Run(task)) {
                    Ok(()) => None,
                    Err(mpsc::SendError(Message::Run(task))) => Some(task),
                    Err(_) => None,
                },
                None => Some(task),
            }
        };
        match rejected {
            Some(task) => task(),
            None => Ok(()),
        }
    }

    /// Block until every task queued so far has run.
    pub fn flush(&self) {
        let (done_tx, done_rx) = mpsc::sync_channel(1);
        let sent = {
            let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
            guard
                .as_ref()
                .map(|tx| tx.send(Message::Flush(done_tx)).is_ok())
                .unwrap_or(false)
        };
        if sent {
            let _ = done_rx.recv();
        }
    }

    /// Drain remaining tasks and stop the consumer.
    pub fn close(&self) {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        drop(tx);
        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = worker {
            if handle.join().is_err() {
                warn!("queue worker panicked");
            }
        }
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        self.close();
    }
}

/// Hand a task to the queue carried in `opts`, or run it now.
pub fn enqueue(opts: &Options, task: Task) -> Result<()> {
    match &opts.queue {
        Some(queue) => queue.add(task),
        None => task(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_fifo_order() {
        let queue = Queue::spawn();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..20 {
            let seen = Arc::clone(&seen);
            queue
                .add(Box::new(move || {
                    seen.lock().unwrap().push(i);
                    Ok(())
                }))
                .unwrap();
        }
        queue.flush();
        assert_eq!(*seen.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_runs_inline_after_close() {
        let queue = Queue::spawn();
        queue.close();
        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        queue
            .add(Box::new(move || {
                *flag.lock().unwrap() = true;
                Ok(())
            }))
            .unwrap();
        assert!(*ran.lock().unwrap());
    }

    #[test]
    fn test_enqueue_without_queue_propagates() {
        let opts = Options::default();
        let err = enqueue(&opts, Box::new(|| Err(crate::error::Error::Cancelled)));
        assert!(err.is_err());
    }

    #[test]
    fn test_failed_task_does_not_stop_queue() {
        let queue = Queue::spawn();
        queue
            .add(Box::new(|| Err(crate::error::Error::Cancelled)))
            .unwrap();
        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        queue
            .add(Box::new(move || {
                *flag.lock().unwrap() = true;
                Ok(())
            }))
            .unwrap();
        queue.flush();
        assert!(*ran.lock().unwrap());
    }
}
