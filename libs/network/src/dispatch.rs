//! Dispatch Core
//!
//! ## Purpose
//!
//! One logical thread per protocol instance owns all protocol state
//! mutation. Other threads hand work across with [`Dispatcher::invoke_later`]
//! or block on [`Dispatcher::invoke_and_wait`].
//!
//! ## Architecture
//!
//! ```text
//!  any thread ──invoke_later──┐
//!  any thread ──invoke_and_wait (crossbeam reply)──┐
//!                             ▼                    ▼
//!                  ┌────── job queue (tokio mpsc) ──────┐
//!                  │  dispatch thread                    │
//!                  │  current_thread runtime + LocalSet  │
//!                  │  - runs jobs FIFO                   │
//!                  │  - hosts transport I/O tasks        │
//!                  │  - fires delayed jobs via timers    │
//!                  └─────────────────────────────────────┘
//! ```
//!
//! The dispatcher is an explicit handle: clone it into whatever needs to
//! schedule work. There is no process-wide instance.

use crate::error::{ChannelError, DispatchError};
use parking_lot::Mutex;
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::LocalSet;
use tracing::{debug, error, info};

type Work = Box<dyn FnOnce() + Send + 'static>;
type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

enum Job {
    Run(Work),
    Delayed(Duration, Work),
    Spawn(Task),
    Shutdown,
}

struct Inner {
    name: String,
    sender: mpsc::UnboundedSender<Job>,
    thread_id: ThreadId,
    thread: Mutex<Option<JoinHandle<()>>>,
    accepting: AtomicBool,
}

/// Handle to a running dispatch thread
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Spawn the dispatch thread and its single-threaded runtime
    pub fn start(name: impl Into<String>) -> Result<Self, DispatchError> {
        let name = name.into();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DispatchError::Startup {
                message: e.to_string(),
            })?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let thread_name = name.clone();
        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_loop(thread_name, runtime, receiver))
            .map_err(|e| DispatchError::Startup {
                message: e.to_string(),
            })?;

        info!(dispatcher = %name, "Dispatch thread started");

        Ok(Self {
            inner: Arc::new(Inner {
                name,
                sender,
                thread_id: thread.thread().id(),
                thread: Mutex::new(Some(thread)),
                accepting: AtomicBool::new(true),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_dispatch_thread(&self) -> bool {
        std::thread::current().id() == self.inner.thread_id
    }

    /// Guard for state-mutating entry points
    pub fn check_dispatch_thread(&self) -> Result<(), ChannelError> {
        if self.is_dispatch_thread() {
            Ok(())
        } else {
            Err(ChannelError::NotDispatchThread)
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    /// Queue work and return immediately; FIFO per submitting thread
    pub fn invoke_later<F>(&self, work: F) -> Result<(), DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Job::Run(Box::new(work)))
    }

    /// Run work after at least `delay`
    pub fn invoke_delayed<F>(&self, delay: Duration, work: F) -> Result<(), DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Job::Delayed(delay, Box::new(work)))
    }

    /// Run an async task on the dispatch thread
    pub fn spawn<F>(&self, task: F) -> Result<(), DispatchError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.submit(Job::Spawn(Box::pin(task)))
    }

    /// Run work on the dispatch thread and block until it returns
    pub fn invoke_and_wait<F, R>(&self, work: F) -> Result<R, DispatchError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_dispatch_thread() {
            return Err(DispatchError::WouldDeadlock);
        }

        let (reply, outcome) = crossbeam_channel::bounded(1);
        self.submit(Job::Run(Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(work));
            // Receiver only disappears if the waiting thread went away
            let _ = reply.send(result);
        })))?;

        match outcome.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => Err(DispatchError::Panicked {
                message: panic_message(payload.as_ref()),
            }),
            Err(_) => Err(self.shutdown_error()),
        }
    }

    /// Stop accepting work, drain what is queued and join the thread.
    ///
    /// Called from the dispatch thread itself the join is skipped; the loop
    /// still exits after the current job.
    pub fn shutdown(&self) {
        if !self.inner.accepting.swap(false, Ordering::AcqRel) {
            return;
        }
        // The loop may already have exited on its own
        let _ = self.inner.sender.send(Job::Shutdown);

        if self.is_dispatch_thread() {
            return;
        }
        if let Some(thread) = self.inner.thread.lock().take() {
            if thread.join().is_err() {
                error!(dispatcher = %self.inner.name, "Dispatch thread terminated abnormally");
            }
        }
        info!(dispatcher = %self.inner.name, "Dispatch thread stopped");
    }

    fn submit(&self, job: Job) -> Result<(), DispatchError> {
        if !self.is_running() {
            return Err(self.shutdown_error());
        }
        self.inner
            .sender
            .send(job)
            .map_err(|_| self.shutdown_error())
    }

    fn shutdown_error(&self) -> DispatchError {
        DispatchError::Shutdown {
            name: self.inner.name.clone(),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.inner.name)
            .field("running", &self.is_running())
            .finish()
    }
}

fn run_loop(name: String, runtime: tokio::runtime::Runtime, mut receiver: mpsc::UnboundedReceiver<Job>) {
    let local = LocalSet::new();
    local.block_on(&runtime, async {
        while let Some(job) = receiver.recv().await {
            match job {
                Job::Run(work) => run_guarded(&name, work),
                Job::Delayed(delay, work) => {
                    let name = name.clone();
                    tokio::task::spawn_local(async move {
                        tokio::time::sleep(delay).await;
                        run_guarded(&name, work);
                    });
                }
                Job::Spawn(task) => {
                    tokio::task::spawn_local(task);
                }
                Job::Shutdown => break,
            }
        }
    });
    debug!(dispatcher = %name, "Dispatch loop exited");
}

/// A panicking job must not take the dispatch thread down with it
fn run_guarded(name: &str, work: Work) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(work)) {
        error!(
            dispatcher = %name,
            panic = %panic_message(payload.as_ref()),
            "Dispatched work panicked"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
