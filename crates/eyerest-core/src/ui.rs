//! The single UI-affinity execution context.
//!
//! Display surfaces are only ever touched from this context. It is a
//! dedicated thread running a current-thread tokio runtime inside a
//! `LocalSet`, so jobs can hand work off with [`UiContext::post`] and
//! schedule delayed continuations with [`UiContext::post_after`] without
//! blocking the context.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::sync::{mpsc, oneshot};
use tokio::task::LocalSet;
use tracing::{debug, error};

use crate::error::{DispatchError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Shutdown,
}

struct Inner {
    name: String,
    tx: mpsc::UnboundedSender<Message>,
    thread_id: ThreadId,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn shutdown(&self) {
        let _ = self.tx.send(Message::Shutdown);
        if thread::current().id() == self.thread_id {
            return;
        }
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                error!(context = %self.name, "UI context thread panicked");
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Cloneable handle to the UI-affinity context.
#[derive(Clone)]
pub struct UiContext {
    inner: Arc<Inner>,
}

impl UiContext {
    /// Start the context thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime or the thread cannot be created.
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let thread_name = name.clone();
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_loop(thread_name, runtime, rx))?;
        let thread_id = thread.thread().id();
        debug!(context = %name, "UI context started");

        Ok(Self {
            inner: Arc::new(Inner {
                name,
                tx,
                thread_id,
                thread: Mutex::new(Some(thread)),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// True when called from the context thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.inner.thread_id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.tx.is_closed()
    }

    /// Hand a job to the context and return immediately.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> Result<(), DispatchError> {
        self.inner
            .tx
            .send(Message::Run(Box::new(job)))
            .map_err(|_| DispatchError::Closed)
    }

    /// Run `job` on the context once `delay` has passed.
    pub fn post_after(
        &self,
        delay: Duration,
        job: impl FnOnce() + Send + 'static,
    ) -> Result<(), DispatchError> {
        let name = self.inner.name.clone();
        self.post(move || {
            tokio::task::spawn_local(async move {
                tokio::time::sleep(delay).await;
                run_job(&name, job);
            });
        })
    }

    /// Run `f` on the context and wait for its result.
    ///
    /// Runs inline when already on the context. Must not be called from
    /// inside another async runtime.
    pub fn invoke<R: Send + 'static>(
        &self,
        f: impl FnOnce() -> R + Send + 'static,
    ) -> Result<R, DispatchError> {
        if self.is_current() {
            return Ok(f());
        }
        let (tx, rx) = oneshot::channel();
        self.post(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(f));
            let _ = tx.send(outcome.map_err(|_| ()));
        })?;
        match rx.blocking_recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(())) => Err(DispatchError::JobPanicked),
            Err(_) => Err(DispatchError::Closed),
        }
    }

    /// Stop the context. Pending jobs are dropped. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl std::fmt::Debug for UiContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiContext")
            .field("name", &self.inner.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn run_job(context: &str, job: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!(context, "UI job panicked");
    }
}

fn run_loop(name: String, runtime: Runtime, mut rx: mpsc::UnboundedReceiver<Message>) {
    let local = LocalSet::new();
    local.block_on(&runtime, async {
        while let Some(message) = rx.recv().await {
            match message {
                Message::Run(job) => run_job(&name, job),
                Message::Shutdown => break,
            }
        }
    });
    rx.close();
    debug!(context = %name, "UI context stopped");
}
