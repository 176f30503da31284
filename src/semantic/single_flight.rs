//! Lazily initialised, retryable, single-flight value.
//!
//! A `SingleFlight` starts out uninitialised. The first caller of
//! [`SingleFlight::get_or_try_init`] starts the initialiser on its own task;
//! every caller, the first one included, then waits on that attempt and
//! receives the same outcome. Dropping a caller only stops that caller from
//! waiting; the attempt keeps running and no second attempt can start while
//! it does. A failed attempt leaves the cell uninitialised so the next call
//! starts a fresh one. A successful value is kept for the lifetime of the
//! cell.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::watch;

/// Lifecycle of a single-flight value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightState {
    Uninitialized,
    Loading,
    Ready,
}

/// The initialiser task died (panic or runtime shutdown) before finishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("initialisation was abandoned before completing")]
pub struct FlightAbandoned;

type Outcome<T, E> = Option<Result<T, E>>;

enum Slot<T, E> {
    Empty,
    Loading(watch::Receiver<Outcome<T, E>>),
    Ready(T),
}

type SharedSlot<T, E> = Arc<Mutex<Slot<T, E>>>;

pub struct SingleFlight<T, E> {
    slot: SharedSlot<T, E>,
}

impl<T, E> Default for SingleFlight<T, E> {
    fn default() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot::Empty)),
        }
    }
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<FlightAbandoned> + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FlightState {
        match &*lock(&self.slot) {
            Slot::Empty => FlightState::Uninitialized,
            Slot::Loading(_) => FlightState::Loading,
            Slot::Ready(_) => FlightState::Ready,
        }
    }

    /// The value, if initialisation already succeeded.
    pub fn get(&self) -> Option<T> {
        match &*lock(&self.slot) {
            Slot::Ready(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Return the value, spawning `init` if no value exists and no attempt is
    /// in flight, or joining the in-flight attempt otherwise.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn get_or_try_init<F, Fut>(&self, init: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let rx = {
            let mut slot = lock(&self.slot);
            match &*slot {
                Slot::Ready(value) => return Ok(value.clone()),
                // a closed channel means the attempt task died
                Slot::Loading(rx) if rx.has_changed().is_ok() => rx.clone(),
                _ => {
                    let (tx, rx) = watch::channel(None);
                    *slot = Slot::Loading(rx.clone());
                    tokio::spawn(run_attempt(self.slot.clone(), tx, init()));
                    rx
                }
            }
        };

        wait(rx).await
    }
}

async fn run_attempt<T, E, Fut>(slot: SharedSlot<T, E>, tx: watch::Sender<Outcome<T, E>>, init: Fut)
where
    T: Clone,
    E: Clone,
    Fut: Future<Output = Result<T, E>>,
{
    // declared after `tx` so the slot is released before waiters see the
    // channel close
    let mut guard = ResetOnDrop {
        slot: &slot,
        armed: true,
    };

    let result = init.await;
    guard.armed = false;

    *lock(&slot) = match &result {
        Ok(value) => Slot::Ready(value.clone()),
        Err(_) => Slot::Empty,
    };
    tx.send_replace(Some(result));
}

async fn wait<T, E>(mut rx: watch::Receiver<Outcome<T, E>>) -> Result<T, E>
where
    T: Clone,
    E: Clone + From<FlightAbandoned>,
{
    let outcome = rx
        .wait_for(Option::is_some)
        .await
        .map_err(|_| E::from(FlightAbandoned))?;

    match outcome.as_ref() {
        Some(result) => result.clone(),
        None => Err(E::from(FlightAbandoned)),
    }
}

fn lock<T, E>(slot: &Mutex<Slot<T, E>>) -> MutexGuard<'_, Slot<T, E>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears a `Loading` slot if the attempt task unwinds or is cancelled.
struct ResetOnDrop<'a, T, E> {
    slot: &'a Mutex<Slot<T, E>>,
    armed: bool,
}

impl<T, E> Drop for ResetOnDrop<'_, T, E> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slot = lock(self.slot);
        if matches!(&*slot, Slot::Loading(_)) {
            *slot = Slot::Empty;
        }
    }
}
