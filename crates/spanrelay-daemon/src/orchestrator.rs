//! Daemon lifecycle orchestration.
//!
//! [`RelayOrchestrator`] owns the daemon's concurrently running parts: one
//! serve loop per ingestion worker plus the control-plane HTTP serve loop.
//! Construction wires a fixed worker set and a pre-built [`ControlPlane`]
//! together and performs no I/O; `start()` binds the control-plane
//! listener, publishes the resolved address, and launches every loop as an
//! independent task; `stop()` initiates best-effort teardown without
//! waiting for anything to finish.
//!
//! # Architecture
//!
//! ```text
//! RelayOrchestrator
//!     |
//!     +-- start() ------> bind listener, publish resolved address,
//!     |                   spawn control serve loop + one task per worker
//!     +-- control_addr()> published "host:port" (empty before start)
//!     +-- stop() -------> spawn worker shutdowns, abort the serve loop
//! ```
//!
//! # Thread safety
//!
//! The published address lives in a write-once cell (`OnceLock`) written by
//! the task executing `start()`; any thread may read it through
//! [`control_addr`](RelayOrchestrator::control_addr) without further
//! synchronization and observes either the unset sentinel or the complete
//! address, never a partial write. Lifecycle state is a single atomic with
//! guarded transitions. The serve-task handle is behind a short-held mutex
//! touched only by `start()` and `stop()`.
//!
//! # Invariants
//!
//! - [INV-ORCH-001] `control_addr()` never blocks, and a reader that
//!   observes `start()` returned success observes the bound address.
//! - [INV-ORCH-002] `start()` returns once tasks are launched; it does not
//!   wait for workers or the serve loop to reach steady state, and their
//!   runtime errors are logged by the owning task, never surfaced.
//! - [INV-ORCH-003] `stop()` is idempotent, never blocks on worker or
//!   server shutdown, and always appears to succeed.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::ingest::IngestWorker;

const STATE_CONFIGURED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// Lifecycle state of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, not yet started. `start()` is permitted.
    Configured,
    /// Started; workers and the control-plane serve loop are running.
    Running,
    /// Torn down. Terminal.
    Stopped,
}

impl LifecycleState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            STATE_CONFIGURED => Self::Configured,
            STATE_RUNNING => Self::Running,
            _ => Self::Stopped,
        }
    }

    /// Returns the lowercase state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configured => "configured",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that `start()` can return.
///
/// Only the synchronous bind step fails visibly; every later failure is an
/// observability concern handled inside the owning task.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StartError {
    /// The control-plane listener could not be bound. The orchestrator
    /// remains in `Configured` state and `start()` may be retried.
    #[error("failed to bind control-plane listener on {addr}: {source}")]
    Bind {
        /// The configured bind address.
        addr: SocketAddr,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// `start()` was called from a state other than `Configured`.
    #[error("orchestrator already started (state: {state})")]
    AlreadyStarted {
        /// The state the orchestrator was in.
        state: LifecycleState,
    },
}

/// Pre-built control-plane server: the address to bind and the router that
/// answers configuration queries.
///
/// The router's handler logic is supplied by the caller (see
/// [`crate::control::control_router`]); the orchestrator only owns the
/// listener and the serve loop.
pub struct ControlPlane {
    bind_addr: SocketAddr,
    router: Router,
}

impl ControlPlane {
    /// Creates a control plane from a bind address and a router.
    ///
    /// A port of `0` requests an ephemeral port; the resolved address is
    /// published by [`RelayOrchestrator::start`].
    #[must_use]
    pub const fn new(bind_addr: SocketAddr, router: Router) -> Self {
        Self { bind_addr, router }
    }

    /// Returns the configured bind address.
    #[must_use]
    pub const fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }
}

impl fmt::Debug for ControlPlane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlPlane")
            .field("bind_addr", &self.bind_addr)
            .finish_non_exhaustive()
    }
}

/// Owns and coordinates the lifecycle of the ingestion workers and the
/// control-plane server.
///
/// The worker set is fixed at construction and never mutated. All methods
/// take `&self`; the orchestrator is usually held in an `Arc` and shared
/// with whatever drives shutdown (signal handler, test harness).
///
/// `stop()` spawns tasks and must therefore be called from within a tokio
/// runtime, as must `start()`.
pub struct RelayOrchestrator {
    workers: Vec<Arc<dyn IngestWorker>>,
    control: ControlPlane,
    control_addr: OnceLock<SocketAddr>,
    serve_task: Mutex<Option<JoinHandle<()>>>,
    state: AtomicU8,
}

impl RelayOrchestrator {
    /// Creates an orchestrator from a fixed worker set and a control plane.
    ///
    /// Performs no I/O; nothing runs until [`start`](Self::start).
    #[must_use]
    pub fn new(workers: Vec<Arc<dyn IngestWorker>>, control: ControlPlane) -> Self {
        Self {
            workers,
            control,
            control_addr: OnceLock::new(),
            serve_task: Mutex::new(None),
            state: AtomicU8::new(STATE_CONFIGURED),
        }
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns the number of owned ingestion workers.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Returns the published control-plane address as `host:port`, or the
    /// empty string before a successful `start()`.
    ///
    /// Never blocks; safe to call concurrently with `start()`.
    #[must_use]
    pub fn control_addr(&self) -> String {
        self.control_addr
            .get()
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    /// Returns the published control-plane socket address, if started.
    #[must_use]
    pub fn control_socket_addr(&self) -> Option<SocketAddr> {
        self.control_addr.get().copied()
    }

    /// Binds the control-plane listener and launches every owned loop.
    ///
    /// On success the resolved listener address is published before any
    /// task is spawned, the serve loop and every worker run as independent
    /// tasks, and `start()` returns without waiting for any of them to
    /// reach steady state. Worker and serve-loop runtime errors are logged
    /// by their owning tasks, not surfaced here.
    ///
    /// # Errors
    ///
    /// - [`StartError::Bind`] if the listener cannot be bound; the
    ///   orchestrator stays `Configured` and the call may be retried.
    /// - [`StartError::AlreadyStarted`] if called from `Running` or
    ///   `Stopped`.
    pub async fn start(&self) -> Result<(), StartError> {
        if let Err(actual) = self.state.compare_exchange(
            STATE_CONFIGURED,
            STATE_RUNNING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return Err(StartError::AlreadyStarted {
                state: LifecycleState::from_u8(actual),
            });
        }

        let bind_addr = self.control.bind_addr();
        let listener = match TcpListener::bind(bind_addr).await {
            Ok(listener) => listener,
            Err(source) => {
                self.state.store(STATE_CONFIGURED, Ordering::Release);
                return Err(StartError::Bind {
                    addr: bind_addr,
                    source,
                });
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(source) => {
                self.state.store(STATE_CONFIGURED, Ordering::Release);
                return Err(StartError::Bind {
                    addr: bind_addr,
                    source,
                });
            }
        };

        // Single writer: the caller that won the state transition above.
        let _ = self.control_addr.set(local_addr);
        info!(addr = %local_addr, "control-plane listener bound");

        let router = self.control.router.clone();
        let serve = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, router).await {
                error!(error = %err, "control-plane server failure");
            }
            info!("control-plane server exiting");
        });
        if let Ok(mut slot) = self.serve_task.lock() {
            *slot = Some(serve);
        }

        for worker in &self.workers {
            info!(worker = worker.label(), "starting ingestion worker");
            let worker = Arc::clone(worker);
            tokio::spawn(async move {
                worker.serve().await;
                debug!(worker = worker.label(), "ingestion worker exited");
            });
        }

        // A stop() that raced this start() found no serve-task handle to
        // abort; the listener must still end up closed.
        if self.state.load(Ordering::Acquire) == STATE_STOPPED
            && let Ok(mut slot) = self.serve_task.lock()
            && let Some(handle) = slot.take()
        {
            handle.abort();
        }

        Ok(())
    }

    /// Initiates teardown of all owned concurrent activity.
    ///
    /// Each worker's `shutdown()` runs as its own task, so one slow or
    /// blocking worker cannot delay the others or this caller. The serve
    /// task is aborted, which drops (closes) the listener; in-flight
    /// connections are not drained. Returns once teardown is initiated.
    ///
    /// Idempotent: calling `stop()` again, or before `start()`, is a
    /// logged no-op.
    pub fn stop(&self) {
        if let Err(actual) = self.state.compare_exchange(
            STATE_RUNNING,
            STATE_STOPPED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            debug!(
                state = %LifecycleState::from_u8(actual),
                "stop requested while not running; nothing to do"
            );
            return;
        }

        for worker in &self.workers {
            let worker = Arc::clone(worker);
            tokio::spawn(async move {
                worker.shutdown().await;
                debug!(worker = worker.label(), "ingestion worker shutdown requested");
            });
        }

        let handle = self
            .serve_task
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        match handle {
            Some(handle) => {
                handle.abort();
                info!("control-plane listener closed");
            }
            // stop() raced an in-flight start() that has not stored the
            // handle yet; start() re-checks the state and aborts it.
            None => warn!("control-plane serve task handle missing at stop"),
        }
    }
}

impl fmt::Debug for RelayOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayOrchestrator")
            .field("workers", &self.workers.len())
            .field("control", &self.control)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
