//! Single-flight resolution cache
//!
//! Each key owns a slot: an async gate serializing attempts and the entry
//! state behind a plain mutex. The attempt itself runs in a spawned task
//! that holds the gate until it has recorded its outcome, so a caller that
//! gives up waiting never cancels work other callers depend on.

use crate::base::ResolvedBase;
use crate::error::{BaseImageError, BaseImageResult};
use crate::image::{PlatformSelector, Reference};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use tracing::debug;

/// Normalized base image reference plus platform selector
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub reference: String,
    pub platform: String,
}

impl CacheKey {
    /// A digest makes any tag irrelevant. A defaulted platform stays apart
    /// from the same platform requested explicitly.
    pub fn new(reference: &Reference, selector: &PlatformSelector) -> Self {
        let reference = match reference.digest() {
            Some(digest) => reference.pinned(digest.clone()).to_string(),
            None => reference.to_string(),
        };
        let platform = match selector {
            PlatformSelector::Single {
                platform,
                explicit: false,
            } => format!("{} (default)", platform),
            other => other.to_string(),
        };
        Self {
            reference,
            platform,
        }
    }
}

/// Lifecycle of one cache entry. `Resolved` is final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    Absent,
    InFlight,
    Resolved(ResolvedBase),
    Failed(BaseImageError),
}

struct SlotState {
    entry: EntryState,
    /// Finished attempts, successful or not
    completed: u64,
}

struct Slot {
    gate: Arc<tokio::sync::Mutex<()>>,
    state: Mutex<SlotState>,
}

impl Slot {
    fn new() -> Self {
        Self {
            gate: Arc::new(tokio::sync::Mutex::new(())),
            state: Mutex::new(SlotState {
                entry: EntryState::Absent,
                completed: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Base image resolutions for one invocation
#[derive(Default)]
pub struct ResolutionCache {
    slots: Mutex<HashMap<CacheKey, Arc<Slot>>>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of a key
    pub fn state(&self, key: &CacheKey) -> EntryState {
        let slots = self.slots();
        match slots.get(key) {
            Some(slot) => slot.state().entry.clone(),
            None => EntryState::Absent,
        }
    }

    /// Number of keys ever requested
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }

    /// Return the resolved value for `key`, running `resolve` at most once
    /// per attempt.
    ///
    /// Callers that queue behind an attempt get its outcome, including a
    /// failure. A caller arriving after a failed attempt finished starts a
    /// new one. Expiry of `deadline` only abandons this caller's wait.
    pub async fn get_or_resolve<F, Fut>(
        &self,
        key: &CacheKey,
        deadline: Instant,
        resolve: F,
    ) -> BaseImageResult<ResolvedBase>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = BaseImageResult<ResolvedBase>> + Send + 'static,
    {
        let slot = self.slot(key);

        let seen = {
            let state = slot.state();
            if let EntryState::Resolved(ref base) = state.entry {
                return Ok(base.clone());
            }
            state.completed
        };

        let started = Instant::now();
        let timed_out = || BaseImageError::Timeout {
            reference: key.reference.clone(),
            waited: started.elapsed(),
        };

        let guard = tokio::time::timeout_at(deadline, slot.gate.clone().lock_owned())
            .await
            .map_err(|_| timed_out())?;

        {
            let mut state = slot.state();
            match &state.entry {
                EntryState::Resolved(base) => return Ok(base.clone()),
                EntryState::Failed(err) if state.completed > seen => return Err(err.clone()),
                _ => {}
            }
            state.entry = EntryState::InFlight;
        }

        debug!("Resolving {} for {}", key.reference, key.platform);
        let attempt = resolve();
        let task_slot = slot.clone();
        let handle = tokio::spawn(async move {
            let outcome = attempt.await;
            {
                let mut state = task_slot.state();
                state.entry = match outcome {
                    Ok(ref base) => EntryState::Resolved(base.clone()),
                    Err(ref err) => EntryState::Failed(err.clone()),
                };
                state.completed += 1;
            }
            drop(guard);
            outcome
        });

        match tokio::time::timeout_at(deadline, handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => Err(BaseImageError::Internal(format!(
                "resolution of {} aborted: {}",
                key.reference, e
            ))),
            Err(_) => Err(timed_out()),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<CacheKey, Arc<Slot>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, key: &CacheKey) -> Arc<Slot> {
        self.slots()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Slot::new()))
            .clone()
    }
}
