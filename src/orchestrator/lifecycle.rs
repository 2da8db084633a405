use std::fmt;
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

/// Process phases, in the only order they can occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Bootstrap,
    SteadyState,
    ShuttingDown,
    Stopped,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Bootstrap => "bootstrap",
            Phase::SteadyState => "steady_state",
            Phase::ShuttingDown => "shutting_down",
            Phase::Stopped => "stopped",
        }
    }

    /// A shutdown request may arrive before bootstrap finishes, so
    /// `Bootstrap -> ShuttingDown` is allowed.
    pub fn can_transition_to(&self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Bootstrap, Phase::SteadyState)
                | (Phase::Bootstrap, Phase::ShuttingDown)
                | (Phase::SteadyState, Phase::ShuttingDown)
                | (Phase::ShuttingDown, Phase::Stopped)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid phase transition from {from} to {to}")]
pub struct PhaseError {
    pub from: Phase,
    pub to: Phase,
}

/// Current phase, observable through a watch channel.
pub struct Lifecycle {
    tx: watch::Sender<Phase>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Phase::Bootstrap);
        Self { tx }
    }

    pub fn phase(&self) -> Phase {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.tx.subscribe()
    }

    pub fn advance(&self, to: Phase) -> Result<(), PhaseError> {
        let from = self.phase();
        if !from.can_transition_to(to) {
            return Err(PhaseError { from, to });
        }
        self.tx.send_replace(to);
        info!("Phase: {} -> {}", from, to);
        Ok(())
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
