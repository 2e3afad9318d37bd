//! Wake-coalescing completion relay
//!
//! Lets the host be woken exactly when completions are pending without
//! holding a live wake resource while idle: an idle wake resource would keep
//! the host's event loop alive indefinitely. The wake handle is allocated
//! lazily when the outstanding-request counter leaves zero and released
//! eagerly when it returns to zero.

use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// A host-side wake resource
///
/// `wake` must be safe to call from the worker thread and must never block;
/// multiple wakes before the host drains may be coalesced into one.
pub trait WakeHandle: Send {
    fn wake(&self);
}

type WakeFactory = Box<dyn Fn() -> Box<dyn WakeHandle> + Send + Sync>;

struct RelayState {
    /// Requests issued but not yet drained by the host
    outstanding: usize,
    wake: Option<Box<dyn WakeHandle>>,
}

/// Relay between the worker's completion pushes and the host's drain
pub struct CompletionRelay {
    factory: WakeFactory,
    state: Mutex<RelayState>,
}

impl CompletionRelay {
    /// Create a relay that allocates wake handles from `factory`
    pub fn new(factory: impl Fn() -> Box<dyn WakeHandle> + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            state: Mutex::new(RelayState {
                outstanding: 0,
                wake: None,
            }),
        }
    }

    // Counter and handle stay consistent even after a panic elsewhere;
    // giving up here would silence the completion path for good.
    fn lock_state(&self) -> MutexGuard<'_, RelayState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record one outstanding request, allocating the wake handle on 0 -> 1
    pub fn add_ref(&self) {
        let mut state = self.lock_state();
        if state.outstanding == 0 {
            debug!("completion relay: allocating wake handle");
            state.wake = Some((self.factory)());
        }
        state.outstanding += 1;
    }

    /// Request a host wake; a no-op when no wake handle exists
    ///
    /// Called from the worker thread after every completion push. When the
    /// host already drained everything (and released the handle) there is
    /// nothing left to announce.
    pub fn send(&self) {
        let state = self.lock_state();
        if let Some(wake) = &state.wake {
            wake.wake();
        }
    }

    /// Record `processed` drained completions, releasing the wake handle
    /// when nothing is outstanding anymore
    pub fn retire(&self, processed: usize) {
        let mut state = self.lock_state();
        assert!(
            processed <= state.outstanding,
            "retired more completions than were outstanding"
        );
        state.outstanding -= processed;
        if state.outstanding == 0 && state.wake.is_some() {
            debug!("completion relay: releasing wake handle");
            state.wake = None;
        }
    }

    /// Number of requests issued but not yet drained
    pub fn outstanding(&self) -> usize {
        self.lock_state().outstanding
    }
}
