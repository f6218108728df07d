//! Acquisition coordinator: one in-flight resolution per identifier.
//!
//! Every HTTP request for a piece of content funnels through here. The
//! coordinator deduplicates concurrent requests for the same identifier,
//! fans the single resolution result out to every waiter, and bounds how
//! long anyone waits with a primary timeout plus a best-effort recovery
//! window listening on the engine's ready broadcast.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

use crate::config::ResolveConfig;
use crate::content::ContentId;
use crate::engine::{ContentEngine, ContentError, ResolvedContent};

type WaiterResult = Result<Arc<ResolvedContent>, ContentError>;

/// Waiters queued against one in-flight resolution, in FIFO enqueue order.
///
/// The entry's presence in the pending map is the RESOLVING state of the
/// per-identifier machine; removing it is the one authoritative settle
/// transition. Whichever of the racing completion paths (engine result,
/// timeout, late broadcast) removes the entry first wins, and the losers
/// find nothing left to settle.
struct PendingResolution {
    waiters: Vec<oneshot::Sender<WaiterResult>>,
}

/// Shared maps mutated only under one mutex, as a unit.
///
/// An identifier is either resolved, pending, or absent; it is never
/// observable as both, and never absent while a waiter still expects an
/// answer.
#[derive(Default)]
struct CoordinatorState {
    resolved: HashMap<ContentId, Arc<ResolvedContent>>,
    pending: HashMap<ContentId, PendingResolution>,
}

struct Inner {
    engine: Arc<dyn ContentEngine>,
    state: Mutex<CoordinatorState>,
    config: ResolveConfig,
}

/// Cheaply cloneable handle to the coordinator.
#[derive(Clone)]
pub struct AcquisitionCoordinator {
    inner: Arc<Inner>,
}

impl AcquisitionCoordinator {
    /// Creates a coordinator with its own explicitly-owned state stores.
    ///
    /// Multiple independent coordinators over the same engine are fine;
    /// nothing here is process-global.
    pub fn new(engine: Arc<dyn ContentEngine>, config: ResolveConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                state: Mutex::new(CoordinatorState::default()),
                config,
            }),
        }
    }

    /// Resolves an identifier into shared file metadata.
    ///
    /// Guarantees at most one engine resolution in flight per identifier:
    /// callers that arrive while one is running are queued and receive the
    /// same handle (or the same failure kind) when it settles. Requests
    /// for different identifiers proceed fully in parallel.
    ///
    /// # Errors
    /// - `ContentError::CapabilityUnavailable` - Engine cannot hold peer connections open
    /// - `ContentError::ResolutionFailed` - Engine reported an error; later requests may retry
    /// - `ContentError::ResolutionTimeout` - Primary and recovery windows both elapsed
    /// - `ContentError::ContentNotFound` - Engine knows nothing under this identifier
    pub async fn acquire(&self, content_id: &ContentId) -> WaiterResult {
        if !self.inner.engine.supports_persistent_peers() {
            return Err(ContentError::CapabilityUnavailable {
                reason: "content resolution requires a long-lived process \
                         that can hold open peer connections"
                    .to_string(),
            });
        }

        if let Some(content) = self.inner.state.lock().resolved.get(content_id) {
            return Ok(content.clone());
        }

        // Engine-side cache hit: no network activity, mirror it locally.
        if let Some(content) = self.inner.engine.lookup(content_id).await {
            self.inner
                .state
                .lock()
                .resolved
                .insert(content_id.clone(), content.clone());
            return Ok(content);
        }

        let (tx, rx) = oneshot::channel();
        let drives_resolution = {
            let mut state = self.inner.state.lock();
            // The lookup above ran unlocked; a racing settle may have
            // landed the handle in the meantime.
            if let Some(content) = state.resolved.get(content_id) {
                return Ok(content.clone());
            }
            match state.pending.get_mut(content_id) {
                Some(pending) => {
                    pending.waiters.push(tx);
                    false
                }
                None => {
                    state
                        .pending
                        .insert(content_id.clone(), PendingResolution { waiters: vec![tx] });
                    true
                }
            }
        };

        if drives_resolution {
            let inner = self.inner.clone();
            let content_id = content_id.clone();
            tokio::spawn(async move {
                drive_resolution(inner, content_id).await;
            });
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ContentError::EngineClosed),
        }
    }

    /// Whether a resolution is currently in flight for an identifier.
    pub fn is_pending(&self, content_id: &ContentId) -> bool {
        self.inner.state.lock().pending.contains_key(content_id)
    }
}

/// Runs the single resolution for one identifier and settles every waiter.
async fn drive_resolution(inner: Arc<Inner>, content_id: ContentId) {
    let primary = tokio::select! {
        result = inner.engine.resolve(&content_id) => Some(result),
        _ = tokio::time::sleep(inner.config.resolve_timeout) => None,
    };

    let outcome = match primary {
        Some(result) => result,
        None => {
            warn!(
                %content_id,
                timeout = ?inner.config.resolve_timeout,
                "resolution missed the primary window, listening for a late ready broadcast"
            );
            match await_late_ready(&inner, &content_id).await {
                Some(content) => Ok(content),
                None => Err(ContentError::ResolutionTimeout {
                    content_id: content_id.clone(),
                }),
            }
        }
    };

    settle(&inner, &content_id, outcome);
}

/// Recovery path: the primary window elapsed, but the engine may still
/// announce this identifier on its ready broadcast within the secondary
/// window. A matching announcement counts as late success.
async fn await_late_ready(inner: &Inner, content_id: &ContentId) -> Option<Arc<ResolvedContent>> {
    let mut ready = inner.engine.subscribe_ready();

    // The engine may have finished between dropping the resolve future and
    // subscribing; a cache probe closes that gap.
    if let Some(content) = inner.engine.lookup(content_id).await {
        return Some(content);
    }

    let deadline = tokio::time::sleep(inner.config.recovery_window);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => return None,
            event = ready.recv() => match event {
                Ok(ready_id) if ready_id == *content_id => {
                    debug!(%content_id, "late ready broadcast matched awaited identifier");
                    return inner.engine.lookup(content_id).await;
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    // Missed announcements may have included ours.
                    if let Some(content) = inner.engine.lookup(content_id).await {
                        return Some(content);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            },
        }
    }
}

/// The single settle transition for one pending identifier.
///
/// Removes the pending entry and releases every waiter queued up to that
/// point, exactly once. Racing completion paths all call this; only the
/// first finds the entry. On success the handle is cached before any
/// waiter observes it, so the maps never disagree.
fn settle(inner: &Inner, content_id: &ContentId, result: WaiterResult) -> bool {
    let waiters = {
        let mut state = inner.state.lock();
        let Some(pending) = state.pending.remove(content_id) else {
            return false;
        };
        if let Ok(content) = &result {
            state.resolved.insert(content_id.clone(), content.clone());
        }
        pending.waiters
    };

    debug!(
        %content_id,
        waiters = waiters.len(),
        resolved = result.is_ok(),
        "settling resolution"
    );
    for waiter in waiters {
        // A waiter that gave up (client disconnect) is fine to skip.
        let _ = waiter.send(result.clone());
    }
    true
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::engine::simulation::{ResolveBehavior, SimulatedContentEngine};

    const HASH_A: &str = "0123456789abcdef0123456789abcdef01234567";
    const HASH_B: &str = "fedcba9876543210fedcba9876543210fedcba98";

    fn fast_config() -> ResolveConfig {
        ResolveConfig {
            resolve_timeout: Duration::from_millis(100),
            recovery_window: Duration::from_millis(100),
        }
    }

    fn coordinator_over(
        engine: SimulatedContentEngine,
        config: ResolveConfig,
    ) -> (AcquisitionCoordinator, Arc<SimulatedContentEngine>) {
        let engine = Arc::new(engine);
        (
            AcquisitionCoordinator::new(engine.clone(), config),
            engine,
        )
    }

    #[tokio::test]
    async fn concurrent_acquires_share_one_resolution() {
        let engine = SimulatedContentEngine::new();
        let id = ContentId::normalize(HASH_A);
        engine.add_content_with_behavior(
            id.clone(),
            "Example",
            vec![("a.mp4", vec![0u8; 64])],
            ResolveBehavior::Delayed(Duration::from_millis(30)),
        );
        let (coordinator, engine) = coordinator_over(engine, ResolveConfig::default());

        let (first, second, third) = tokio::join!(
            coordinator.acquire(&id),
            coordinator.acquire(&id),
            coordinator.acquire(&id),
        );

        let first = first.unwrap();
        let second = second.unwrap();
        let third = third.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&second, &third));
        assert_eq!(engine.resolve_call_count(&id), 1);
        assert!(!coordinator.is_pending(&id));
    }

    #[tokio::test]
    async fn resolved_content_is_cached_for_later_requests() {
        let engine = SimulatedContentEngine::new();
        let id = ContentId::normalize(HASH_A);
        engine.add_content(id.clone(), "Example", vec![("a.mp4", vec![1, 2, 3])]);
        let (coordinator, engine) = coordinator_over(engine, ResolveConfig::default());

        let first = coordinator.acquire(&id).await.unwrap();
        let second = coordinator.acquire(&id).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(engine.resolve_call_count(&id), 1);
    }

    #[tokio::test]
    async fn engine_failure_reaches_every_waiter() {
        let engine = SimulatedContentEngine::new();
        let id = ContentId::normalize(HASH_A);
        engine.add_content_with_behavior(
            id.clone(),
            "Broken",
            vec![],
            ResolveBehavior::Fails("no peers".to_string()),
        );
        let (coordinator, _engine) = coordinator_over(engine, ResolveConfig::default());

        let (first, second) = tokio::join!(coordinator.acquire(&id), coordinator.acquire(&id));
        assert!(matches!(first, Err(ContentError::ResolutionFailed { .. })));
        assert!(matches!(
            second,
            Err(ContentError::ResolutionFailed { .. })
        ));
        assert!(!coordinator.is_pending(&id));
    }

    #[tokio::test]
    async fn stalled_resolution_times_out_for_every_waiter() {
        let engine = SimulatedContentEngine::new();
        let id = ContentId::normalize(HASH_A);
        engine.add_content_with_behavior(id.clone(), "Stuck", vec![], ResolveBehavior::Stalls);
        let (coordinator, _engine) = coordinator_over(engine, fast_config());

        let (first, second) = tokio::join!(coordinator.acquire(&id), coordinator.acquire(&id));
        assert!(matches!(
            first,
            Err(ContentError::ResolutionTimeout { .. })
        ));
        assert!(matches!(
            second,
            Err(ContentError::ResolutionTimeout { .. })
        ));
        assert!(!coordinator.is_pending(&id));
    }

    #[tokio::test]
    async fn timeout_does_not_poison_the_identifier() {
        let engine = SimulatedContentEngine::new();
        let id = ContentId::normalize(HASH_A);
        engine.add_content_with_behavior(id.clone(), "Stuck", vec![], ResolveBehavior::Stalls);
        let (coordinator, engine) = coordinator_over(engine, fast_config());

        let timed_out = coordinator.acquire(&id).await;
        assert!(matches!(
            timed_out,
            Err(ContentError::ResolutionTimeout { .. })
        ));

        // Content becomes reachable; a fresh request starts a fresh
        // resolution and succeeds via the engine-side cache.
        engine.announce_ready(&id);
        let retried = coordinator.acquire(&id).await;
        assert!(retried.is_ok());
    }

    #[tokio::test]
    async fn late_broadcast_within_recovery_window_is_success() {
        let engine = SimulatedContentEngine::new();
        let id = ContentId::normalize(HASH_A);
        engine.add_content_with_behavior(
            id.clone(),
            "Late",
            vec![("late.mkv", vec![9u8; 16])],
            ResolveBehavior::Stalls,
        );
        let (coordinator, engine) = coordinator_over(engine, fast_config());

        let announcer = {
            let engine = engine.clone();
            let id = id.clone();
            tokio::spawn(async move {
                // Past the primary window, inside the recovery window.
                tokio::time::sleep(Duration::from_millis(150)).await;
                engine.announce_ready(&id);
            })
        };

        let result = coordinator.acquire(&id).await;
        announcer.await.unwrap();
        let content = result.unwrap();
        assert_eq!(content.display_name, "Late");
        assert!(!coordinator.is_pending(&id));
    }

    #[tokio::test]
    async fn distinct_identifiers_resolve_in_parallel() {
        let engine = SimulatedContentEngine::new();
        let stuck = ContentId::normalize(HASH_A);
        let healthy = ContentId::normalize(HASH_B);
        engine.add_content_with_behavior(stuck.clone(), "Stuck", vec![], ResolveBehavior::Stalls);
        engine.add_content(healthy.clone(), "Healthy", vec![("b.mp4", vec![1])]);
        let (coordinator, _engine) = coordinator_over(engine, fast_config());

        let slow = {
            let coordinator = coordinator.clone();
            let stuck = stuck.clone();
            tokio::spawn(async move { coordinator.acquire(&stuck).await })
        };

        // The healthy identifier must not wait on the stuck one.
        let quick = tokio::time::timeout(
            Duration::from_millis(50),
            coordinator.acquire(&healthy),
        )
        .await;
        assert!(quick.is_ok());
        assert!(quick.unwrap().is_ok());

        assert!(matches!(
            slow.await.unwrap(),
            Err(ContentError::ResolutionTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_content_surfaces_not_found() {
        let engine = SimulatedContentEngine::new();
        let (coordinator, _engine) = coordinator_over(engine, ResolveConfig::default());

        let result = coordinator.acquire(&ContentId::normalize(HASH_A)).await;
        assert!(matches!(result, Err(ContentError::ContentNotFound { .. })));
    }

    #[tokio::test]
    async fn ephemeral_engine_is_refused_before_any_coordination() {
        let engine = SimulatedContentEngine::new().without_persistent_peers();
        let id = ContentId::normalize(HASH_A);
        engine.add_content(id.clone(), "Example", vec![]);
        let (coordinator, engine) = coordinator_over(engine, ResolveConfig::default());

        let result = coordinator.acquire(&id).await;
        assert!(matches!(
            result,
            Err(ContentError::CapabilityUnavailable { .. })
        ));
        assert_eq!(engine.resolve_call_count(&id), 0);
        assert!(!coordinator.is_pending(&id));
    }

    #[tokio::test]
    async fn raw_fallback_identifiers_coalesce_by_exact_string() {
        let engine = SimulatedContentEngine::new();
        let id = ContentId::normalize("some opaque target");
        engine.add_content_with_behavior(
            id.clone(),
            "Opaque",
            vec![("x.bin", vec![0u8; 8])],
            ResolveBehavior::Delayed(Duration::from_millis(20)),
        );
        let (coordinator, engine) = coordinator_over(engine, ResolveConfig::default());

        let (first, second) = tokio::join!(coordinator.acquire(&id), coordinator.acquire(&id));
        assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
        assert_eq!(engine.resolve_call_count(&id), 1);
    }
}
