//! One-shot reactions: the mechanism for in-flight protocol steps.
//!
//! A reaction is a predicate with a deadline. The dispatcher offers every
//! inbound frame to every live reaction; a predicate returning `true`
//! consumes its reaction, and a reaction that reaches its deadline first
//! runs its expiry callback instead. Per-reaction locking guarantees a
//! predicate is never entered concurrently with itself even when two
//! workers hold frames at once, and predicates are free to register further
//! reactions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uuid::Uuid;

use veil_signal::Income;

/// Opaque handle returned by registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactionToken(Uuid);

type Predicate = Box<dyn FnMut(&Income) -> bool + Send>;
type ExpiryCallback = Box<dyn FnOnce() + Send>;

struct Armed {
    predicate: Predicate,
    on_expiry: Option<ExpiryCallback>,
}

/// `None` once the reaction has matched or expired.
struct Reaction {
    armed: Mutex<Option<Armed>>,
}

#[derive(Clone, Default)]
pub(crate) struct ReactionRegistry {
    entries: Arc<Mutex<HashMap<Uuid, Arc<Reaction>>>>,
}

impl ReactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        ttl: Duration,
        predicate: impl FnMut(&Income) -> bool + Send + 'static,
    ) -> ReactionToken {
        self.add(ttl, Box::new(predicate), None)
    }

    pub fn register_with_callback(
        &self,
        ttl: Duration,
        predicate: impl FnMut(&Income) -> bool + Send + 'static,
        on_expiry: impl FnOnce() + Send + 'static,
    ) -> ReactionToken {
        self.add(ttl, Box::new(predicate), Some(Box::new(on_expiry)))
    }

    fn add(
        &self,
        ttl: Duration,
        predicate: Predicate,
        on_expiry: Option<ExpiryCallback>,
    ) -> ReactionToken {
        let id = Uuid::new_v4();
        let reaction = Arc::new(Reaction {
            armed: Mutex::new(Some(Armed {
                predicate,
                on_expiry,
            })),
        });
        self.entries.lock().unwrap().insert(id, reaction.clone());

        let entries = Arc::clone(&self.entries);
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            entries.lock().unwrap().remove(&id);
            // If the predicate won the race the slot is already empty.
            let armed = reaction.armed.lock().unwrap().take();
            if let Some(armed) = armed {
                if let Some(callback) = armed.on_expiry {
                    callback();
                }
            }
        });

        ReactionToken(id)
    }

    /// Offer `income` to every reaction alive at this instant.
    pub fn sweep(&self, income: &Income) {
        let snapshot: Vec<(Uuid, Arc<Reaction>)> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .map(|(id, r)| (*id, Arc::clone(r)))
            .collect();

        for (id, reaction) in snapshot {
            let mut armed = reaction.armed.lock().unwrap();
            let consumed = match armed.as_mut() {
                None => continue,
                Some(state) => (state.predicate)(income),
            };
            if consumed {
                *armed = None;
                drop(armed);
                self.entries.lock().unwrap().remove(&id);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use veil_crypto::MeshId;
    use veil_signal::{Signal, SignalKind};

    fn income(kind: SignalKind) -> Income {
        Income::new(
            MeshId::new("cGVlcg".to_string()).hash(),
            Signal::new(kind, vec![kind as u8]),
        )
    }

    #[tokio::test]
    async fn a_matched_reaction_fires_exactly_once() {
        let registry = ReactionRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counted = hits.clone();
        registry.register(Duration::from_secs(60), move |income| {
            if income.kind() == SignalKind::TestChallenge {
                counted.fetch_add(1, Ordering::SeqCst);
                return true;
            }
            false
        });

        registry.sweep(&income(SignalKind::ConnectionSecret));
        registry.sweep(&income(SignalKind::TestChallenge));
        registry.sweep(&income(SignalKind::TestChallenge));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_runs_the_callback_and_retires_the_reaction() {
        let registry = ReactionRegistry::new();
        let expired = Arc::new(AtomicUsize::new(0));
        let flagged = expired.clone();
        registry.register_with_callback(
            Duration::from_secs(3),
            |_| false,
            move || {
                flagged.fetch_add(1, Ordering::SeqCst);
            },
        );

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(expired.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 0);
        // Late frames find nothing to match.
        registry.sweep(&income(SignalKind::TestChallenge));
    }

    #[tokio::test(start_paused = true)]
    async fn a_match_beats_the_deadline() {
        let registry = ReactionRegistry::new();
        let expired = Arc::new(AtomicUsize::new(0));
        let flagged = expired.clone();
        registry.register_with_callback(
            Duration::from_secs(3),
            |income| income.kind() == SignalKind::TestChallenge,
            move || {
                flagged.fetch_add(1, Ordering::SeqCst);
            },
        );

        registry.sweep(&income(SignalKind::TestChallenge));
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(expired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn predicates_may_register_further_reactions() {
        let registry = ReactionRegistry::new();
        let inner_hits = Arc::new(AtomicUsize::new(0));
        let inner = registry.clone();
        let counted = inner_hits.clone();
        registry.register(Duration::from_secs(60), move |income| {
            if income.kind() != SignalKind::SolveChallenge {
                return false;
            }
            let counted = counted.clone();
            inner.register(Duration::from_secs(60), move |income| {
                if income.kind() == SignalKind::TestChallenge {
                    counted.fetch_add(1, Ordering::SeqCst);
                    return true;
                }
                false
            });
            true
        });

        registry.sweep(&income(SignalKind::SolveChallenge));
        registry.sweep(&income(SignalKind::TestChallenge));
        assert_eq!(inner_hits.load(Ordering::SeqCst), 1);
    }
}
