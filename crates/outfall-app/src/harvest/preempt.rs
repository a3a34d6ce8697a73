//! Preemption signal handling for batch schedulers.
//!
//! On the configured signal the process logs the event inside the run's span
//! and exits with status 0 immediately. Work already checkpointed stays
//! checkpointed; the in-flight key is simply redone by the next run.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{Span, info};

#[derive(Debug, Error)]
pub enum PreemptError {
    #[error("failed to install {signal} listener: {source}")]
    Install {
        signal: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("signal {0} is not supported on this platform")]
    Unsupported(&'static str),
}

/// Signal a scheduler sends ahead of preemption.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PreemptSignal {
    #[default]
    Usr1,
    Term,
    Int,
}

impl PreemptSignal {
    pub fn name(&self) -> &'static str {
        match self {
            PreemptSignal::Usr1 => "SIGUSR1",
            PreemptSignal::Term => "SIGTERM",
            PreemptSignal::Int => "SIGINT",
        }
    }
}

/// Invoked once the signal has been logged.
pub type ExitHook = Box<dyn FnOnce(PreemptSignal) + Send + 'static>;

pub struct PreemptionHandler {
    signal: PreemptSignal,
    span: Span,
    on_preempt: ExitHook,
}

impl PreemptionHandler {
    /// Handler that terminates the process with status 0.
    pub fn new(signal: PreemptSignal, span: Span) -> Self {
        Self {
            signal,
            span,
            on_preempt: Box::new(|_| std::process::exit(0)),
        }
    }

    /// Replace the process exit, e.g. to observe preemption in tests.
    pub fn with_exit_hook<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(PreemptSignal) + Send + 'static,
    {
        self.on_preempt = Box::new(hook);
        self
    }

    /// Register the listener. It stays armed until the guard is dropped.
    pub fn install(self) -> Result<PreemptionGuard, PreemptError> {
        let mut listener = listen(self.signal)?;
        let PreemptionHandler {
            signal,
            span,
            on_preempt,
        } = self;

        let task = tokio::spawn(async move {
            if listener.recv().await.is_none() {
                return;
            }
            span.in_scope(|| {
                info!(
                    signal = signal.name(),
                    "received preemption signal; exiting cleanly for requeue"
                );
            });
            on_preempt(signal);
        });

        Ok(PreemptionGuard { task })
    }
}

/// Keeps the preemption listener alive.
#[derive(Debug)]
pub struct PreemptionGuard {
    task: JoinHandle<()>,
}

impl Drop for PreemptionGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(unix)]
struct SignalListener(tokio::signal::unix::Signal);

#[cfg(unix)]
impl SignalListener {
    async fn recv(&mut self) -> Option<()> {
        self.0.recv().await
    }
}

#[cfg(unix)]
fn listen(signal: PreemptSignal) -> Result<SignalListener, PreemptError> {
    use tokio::signal::unix::{SignalKind, signal as unix_signal};

    let kind = match signal {
        PreemptSignal::Usr1 => SignalKind::user_defined1(),
        PreemptSignal::Term => SignalKind::terminate(),
        PreemptSignal::Int => SignalKind::interrupt(),
    };
    unix_signal(kind)
        .map(SignalListener)
        .map_err(|source| PreemptError::Install {
            signal: signal.name(),
            source,
        })
}

#[cfg(not(unix))]
struct SignalListener;

#[cfg(not(unix))]
impl SignalListener {
    async fn recv(&mut self) -> Option<()> {
        tokio::signal::ctrl_c().await.ok()
    }
}

#[cfg(not(unix))]
fn listen(signal: PreemptSignal) -> Result<SignalListener, PreemptError> {
    match signal {
        PreemptSignal::Int => Ok(SignalListener),
        other => Err(PreemptError::Unsupported(other.name())),
    }
}
