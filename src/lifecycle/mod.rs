//! Instance lifecycle state machine
//!
//! Tracks a cache instance from installation through activation to
//! replacement. Transitions are validated; history is retained for
//! diagnostics. The skip-waiting flag lets a newly installed instance
//! activate immediately instead of waiting for the previous one to be
//! released.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Lifecycle states of a cache instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Pre-caching critical resources; not yet serving requests
    Installing,
    /// Installed, parked behind a still-active previous instance
    WaitingToActivate,
    /// Owning request interception
    Active,
    /// Replaced by a newer instance; passes requests through untouched
    Superseded,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            State::Installing => "installing",
            State::WaitingToActivate => "waiting_to_activate",
            State::Active => "active",
            State::Superseded => "superseded",
        };
        write!(f, "{}", name)
    }
}

/// Lifecycle error types
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("invalid lifecycle transition from {from} to {to}")]
    InvalidTransition { from: State, to: State },
}

/// A recorded state change
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: State,
    pub to: State,
    pub at: DateTime<Utc>,
}

/// The lifecycle state of one cache instance
///
/// Purely in-memory; callers share it behind a lock.
#[derive(Debug)]
pub struct Lifecycle {
    state: State,
    skip_waiting_requested: bool,
    history: Vec<Transition>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: State::Installing,
            skip_waiting_requested: false,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == State::Active
    }

    pub fn is_superseded(&self) -> bool {
        self.state == State::Superseded
    }

    /// Request immediate activation once installation finishes
    ///
    /// Idempotent. Takes effect at the installation-complete decision
    /// point; requesting it later has no effect on an already parked
    /// instance until the controller re-evaluates.
    pub fn request_skip_waiting(&mut self) {
        self.skip_waiting_requested = true;
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting_requested
    }

    /// Apply a state change, enforcing the legal transition set
    pub fn transition(&mut self, to: State) -> Result<(), LifecycleError> {
        let legal = matches!(
            (self.state, to),
            (State::Installing, State::WaitingToActivate)
                | (State::Installing, State::Active)
                | (State::WaitingToActivate, State::Active)
                | (State::Active, State::Superseded)
        );

        if !legal {
            return Err(LifecycleError::InvalidTransition {
                from: self.state,
                to,
            });
        }

        self.history.push(Transition {
            from: self.state,
            to,
            at: Utc::now(),
        });
        self.state = to;
        Ok(())
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
