//! Process-wide registry of live calls.
//!
//! Each entry is inserted once when a call's stream starts and removed once
//! when its bridge closes. The registry holds only a cancellation handle for
//! each call, never the bridge itself, which is how external shutdown reaches
//! calls.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Reasons a call cannot be registered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Call {0} is already active")]
    Duplicate(String),

    #[error("Maximum concurrent calls ({0}) reached")]
    AtCapacity(usize),

    #[error("Server is shutting down")]
    ShuttingDown,
}

/// Non-owning record of one live call.
#[derive(Debug, Clone)]
pub struct CallEntry {
    pub stream_id: String,
    pub registered_at: Instant,
    shutdown: CancellationToken,
}

struct RegistryInner {
    calls: DashMap<String, CallEntry>,
    max_calls: Option<usize>,
    /// Slots taken, including inserts in progress
    reserved: AtomicUsize,
    total_removed: AtomicU64,
    draining: AtomicBool,
    emptied: Notify,
}

/// Shared handle to the call registry. Cloning is cheap.
#[derive(Clone)]
pub struct CallRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for CallRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallRegistry")
            .field("active", &self.len())
            .field("max_calls", &self.inner.max_calls)
            .finish()
    }
}

impl CallRegistry {
    /// Create a registry, optionally bounded to `max_calls` live entries.
    pub fn new(max_calls: Option<usize>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                calls: DashMap::new(),
                max_calls,
                reserved: AtomicUsize::new(0),
                total_removed: AtomicU64::new(0),
                draining: AtomicBool::new(false),
                emptied: Notify::new(),
            }),
        }
    }

    /// Insert a call. Fails if the id is live, the registry is full, or a
    /// drain has started.
    pub fn register(
        &self,
        call_id: &str,
        stream_id: &str,
        shutdown: CancellationToken,
    ) -> Result<(), RegistryError> {
        if self.inner.draining.load(Ordering::SeqCst) {
            return Err(RegistryError::ShuttingDown);
        }
        self.reserve_slot()?;

        match self.inner.calls.entry(call_id.to_string()) {
            Entry::Occupied(_) => {
                self.release_slot();
                Err(RegistryError::Duplicate(call_id.to_string()))
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CallEntry {
                    stream_id: stream_id.to_string(),
                    registered_at: Instant::now(),
                    shutdown,
                });
                tracing::debug!(call_id = %call_id, stream_id = %stream_id, "Call registered");
                Ok(())
            }
        }
    }

    fn reserve_slot(&self) -> Result<(), RegistryError> {
        let Some(max) = self.inner.max_calls else {
            self.inner.reserved.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        };
        self.inner
            .reserved
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < max).then_some(current + 1)
            })
            .map(|_| ())
            .map_err(|_| RegistryError::AtCapacity(max))
    }

    fn release_slot(&self) {
        if self.inner.reserved.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.emptied.notify_waiters();
        }
    }

    /// Remove a call. Returns `false` if it was not registered.
    pub fn remove(&self, call_id: &str) -> bool {
        let Some((_, entry)) = self.inner.calls.remove(call_id) else {
            return false;
        };
        self.inner.total_removed.fetch_add(1, Ordering::SeqCst);
        self.release_slot();
        tracing::debug!(
            call_id = %call_id,
            stream_id = %entry.stream_id,
            live_ms = entry.registered_at.elapsed().as_millis() as u64,
            "Call removed from registry"
        );
        true
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.inner.calls.contains_key(call_id)
    }

    /// Media stream id of a live call.
    pub fn stream_id(&self, call_id: &str) -> Option<String> {
        self.inner
            .calls
            .get(call_id)
            .map(|entry| entry.stream_id.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.calls.is_empty()
    }

    /// Calls removed since the registry was created.
    pub fn total_removed(&self) -> u64 {
        self.inner.total_removed.load(Ordering::SeqCst)
    }

    /// Refuse new calls, cancel every live one and wait up to `grace` for
    /// all of them to close. Returns the number still registered.
    pub async fn drain(&self, grace: Duration) -> usize {
        self.inner.draining.store(true, Ordering::SeqCst);

        let tokens: Vec<CancellationToken> = self
            .inner
            .calls
            .iter()
            .map(|entry| entry.shutdown.clone())
            .collect();
        tracing::info!(active_calls = tokens.len(), "Draining active calls");
        for token in tokens {
            token.cancel();
        }

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let notified = self.inner.emptied.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.reserved.load(Ordering::SeqCst) == 0 {
                return 0;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let remaining = self.len();
                if remaining > 0 {
                    tracing::warn!(remaining, "Drain grace period elapsed with calls still active");
                }
                return remaining;
            }
        }
    }
}

impl Default for CallRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}
