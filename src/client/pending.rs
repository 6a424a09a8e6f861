//! Pending-call registry.
//!
//! Tracks in-flight calls by sequence number. Sequence numbers start at 1
//! (0 is never issued) and grow monotonically for the life of the session.
//!
//! The map and both shutdown flags live behind one mutex; no reference to an
//! entry ever leaves the critical section. An entry is handed out by value
//! exactly once (by [`PendingCalls::remove`] or [`PendingCalls::terminate_all`]),
//! and resolving it consumes it, so every completion fires at most once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::{Result, RpcError};

/// Outcome delivered to a waiting call: the still-encoded reply body or an error.
pub(crate) type CallOutcome = Result<Bytes>;

/// One registered call, owned by the registry until resolved.
#[derive(Debug)]
pub(crate) struct PendingCall {
    service_method: String,
    done: oneshot::Sender<CallOutcome>,
}

impl PendingCall {
    /// Create an entry and the receiving half of its completion signal.
    pub(crate) fn new(service_method: impl Into<String>) -> (Self, oneshot::Receiver<CallOutcome>) {
        let (done, rx) = oneshot::channel();
        (
            Self {
                service_method: service_method.into(),
                done,
            },
            rx,
        )
    }

    pub(crate) fn service_method(&self) -> &str {
        &self.service_method
    }

    /// Fire the completion signal.
    pub(crate) fn resolve(self, outcome: CallOutcome) {
        if self.done.send(outcome).is_err() {
            tracing::trace!(
                service_method = %self.service_method,
                "caller stopped waiting; outcome dropped"
            );
        }
    }
}

#[derive(Debug)]
struct State {
    next_seq: u64,
    calls: HashMap<u64, PendingCall>,
    /// The user closed the session.
    closing: bool,
    /// The session failed (read error) and is gone for good.
    shutdown: bool,
}

/// Registry of in-flight calls keyed by sequence number.
#[derive(Debug)]
pub(crate) struct PendingCalls {
    state: Mutex<State>,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_seq: 1,
                calls: HashMap::new(),
                closing: false,
                shutdown: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a call and assign its sequence number.
    ///
    /// When the session is closing or shut down the call is resolved with
    /// [`RpcError::Shutdown`] right here and the same error is returned.
    pub(crate) fn register(&self, call: PendingCall) -> Result<u64> {
        let mut state = self.lock();
        if state.closing || state.shutdown {
            drop(state);
            call.resolve(Err(RpcError::Shutdown));
            return Err(RpcError::Shutdown);
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.calls.insert(seq, call);
        Ok(seq)
    }

    /// Look up and remove a call. Removing twice returns `None` the second time.
    pub(crate) fn remove(&self, seq: u64) -> Option<PendingCall> {
        self.lock().calls.remove(&seq)
    }

    /// Mark the session as closing. Fails if it already was.
    pub(crate) fn mark_closing(&self) -> Result<()> {
        let mut state = self.lock();
        if state.closing {
            return Err(RpcError::Shutdown);
        }
        state.closing = true;
        Ok(())
    }

    /// Shut the session down for good and resolve every pending call with `err`.
    ///
    /// Returns the number of calls resolved.
    pub(crate) fn terminate_all(&self, err: RpcError) -> usize {
        let drained: Vec<PendingCall> = {
            let mut state = self.lock();
            state.shutdown = true;
            state.calls.drain().map(|(_, call)| call).collect()
        };

        let count = drained.len();
        let err = Arc::new(err);
        for call in drained {
            call.resolve(Err(RpcError::Terminated(Arc::clone(&err))));
        }
        count
    }

    /// Neither closing nor shut down.
    pub(crate) fn is_available(&self) -> bool {
        let state = self.lock();
        !state.closing && !state.shutdown
    }

    /// Number of calls still waiting for a response.
    pub(crate) fn len(&self) -> usize {
        self.lock().calls.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_sequence_starts_at_one() {
        let pending = PendingCalls::new();
        let (a, _rx_a) = PendingCall::new("Foo.Sum");
        let (b, _rx_b) = PendingCall::new("Foo.Sum");

        assert_eq!(pending.register(a).unwrap(), 1);
        assert_eq!(pending.register(b).unwrap(), 2);
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let pending = PendingCalls::new();
        let (call, _rx) = PendingCall::new("Foo.Sum");
        let seq = pending.register(call).unwrap();

        let removed = pending.remove(seq).unwrap();
        assert_eq!(removed.service_method(), "Foo.Sum");
        assert!(pending.remove(seq).is_none());
        assert!(pending.remove(0).is_none());
    }

    #[test]
    fn test_terminate_all_resolves_everything_once() {
        let pending = PendingCalls::new();
        let mut receivers = Vec::new();
        for _ in 0..5 {
            let (call, rx) = PendingCall::new("Foo.Sum");
            pending.register(call).unwrap();
            receivers.push(rx);
        }

        assert_eq!(pending.terminate_all(RpcError::Shutdown), 5);
        assert_eq!(pending.len(), 0);

        for mut rx in receivers {
            match rx.try_recv().unwrap() {
                Err(RpcError::Terminated(cause)) => {
                    assert!(matches!(*cause, RpcError::Shutdown))
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
        }

        // Nothing left to resolve a second time.
        assert_eq!(pending.terminate_all(RpcError::Shutdown), 0);
    }

    #[test]
    fn test_register_after_shutdown_resolves_locally() {
        let pending = PendingCalls::new();
        pending.terminate_all(RpcError::Shutdown);
        assert!(!pending.is_available());

        let (call, mut rx) = PendingCall::new("Foo.Sum");
        assert!(matches!(pending.register(call), Err(RpcError::Shutdown)));
        assert!(matches!(rx.try_recv().unwrap(), Err(RpcError::Shutdown)));
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn test_mark_closing_twice_fails() {
        let pending = PendingCalls::new();
        assert!(pending.is_available());
        pending.mark_closing().unwrap();
        assert!(!pending.is_available());
        assert!(matches!(pending.mark_closing(), Err(RpcError::Shutdown)));

        let (call, _rx) = PendingCall::new("Foo.Sum");
        assert!(pending.register(call).is_err());
    }

    #[test]
    fn test_concurrent_registration_issues_distinct_sequences() {
        let pending = Arc::new(PendingCalls::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pending = Arc::clone(&pending);
                std::thread::spawn(move || {
                    (0..100)
                        .map(|_| {
                            let (call, _rx) = PendingCall::new("Foo.Sum");
                            pending.register(call).unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for seq in handle.join().unwrap() {
                assert!(seen.insert(seq), "duplicate seq {seq}");
            }
        }
        assert_eq!(seen.len(), 800);
        assert_eq!(seen.iter().min(), Some(&1));
        assert_eq!(seen.iter().max(), Some(&800));
    }
}
