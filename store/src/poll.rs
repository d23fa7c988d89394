//! Re-fetch entities that are mid-transition until they settle.
//!
//! One [`PollReconciler`] serves one resource kind. It keeps a registry of
//! poll targets (entity id plus the statuses that end polling) and at most
//! one scheduled tick. A tick re-fetches every target concurrently, waits for
//! all of them, applies the outcomes to the cache, retires finished targets
//! and then either goes idle or schedules the next tick one interval after
//! the current one completed.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::future::join_all;
use hangar_transport::TransportError;
use hangar_types::{Entity, EntityId, TerminalStatuses};
use tokio::sync::watch;

use crate::cache::CollectionCache;
use crate::timer::{Timer, TimerHandle};

pub type FetchFut<'a, E> = Pin<Box<dyn Future<Output = Result<E, TransportError>> + Send + 'a>>;

/// A resource kind's ability to re-read one entity from the backend.
pub trait Refetch<E: Entity>: Send + Sync {
    /// Fetch the current server-side state of `entity`.
    fn refetch<'a>(&'a self, entity: &'a E) -> FetchFut<'a, E>;
}

/// How the next tick is arranged while polling.
#[derive(Debug)]
enum Cadence {
    /// A timer is armed; it fires `run_scheduled(epoch)`.
    Scheduled { epoch: u64, handle: TimerHandle },
    /// The tick for `epoch` is running; it arms the next one when done.
    Ticking { epoch: u64 },
}

#[derive(Debug)]
enum PollState {
    Idle,
    Polling(Cadence),
}

struct Registry<S> {
    state: PollState,
    targets: HashMap<EntityId, TerminalStatuses<S>>,
    next_epoch: u64,
}

/// What one tick did, for logging and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Re-fetched successfully and written to the cache.
    pub refreshed: Vec<EntityId>,
    /// Targets removed from the registry by this tick.
    pub retired: Vec<EntityId>,
    /// Reported gone by the backend and removed from the cache.
    pub removed: Vec<EntityId>,
    /// Re-fetch failed for another reason; retried next tick.
    pub failed: Vec<EntityId>,
    /// Still tracked after this tick.
    pub pending: usize,
}

impl TickReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.refreshed.is_empty()
            && self.retired.is_empty()
            && self.removed.is_empty()
            && self.failed.is_empty()
    }
}

pub struct PollReconciler<E: Entity> {
    kind: &'static str,
    cache: Arc<CollectionCache<E>>,
    fetcher: Arc<dyn Refetch<E>>,
    timer: Arc<dyn Timer>,
    interval: Duration,
    registry: Mutex<Registry<E::Status>>,
    tick_lock: tokio::sync::Mutex<()>,
    idle: watch::Sender<bool>,
}

impl<E: Entity> fmt::Debug for PollReconciler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry();
        f.debug_struct("PollReconciler")
            .field("kind", &self.kind)
            .field("state", &registry.state)
            .field("targets", &registry.targets.len())
            .finish_non_exhaustive()
    }
}

impl<E: Entity> PollReconciler<E> {
    pub fn new(
        kind: &'static str,
        cache: Arc<CollectionCache<E>>,
        fetcher: Arc<dyn Refetch<E>>,
        timer: Arc<dyn Timer>,
        interval: Duration,
    ) -> Arc<Self> {
        let (idle, _) = watch::channel(true);
        Arc::new(Self {
            kind,
            cache,
            fetcher,
            timer,
            interval,
            registry: Mutex::new(Registry {
                state: PollState::Idle,
                targets: HashMap::new(),
                next_epoch: 0,
            }),
            tick_lock: tokio::sync::Mutex::new(()),
            idle,
        })
    }

    fn registry(&self) -> MutexGuard<'_, Registry<E::Status>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track `id` until it reaches one of `terminal` (or disappears, when
    /// `terminal` is empty). Re-registering replaces the terminal set.
    ///
    /// From idle this schedules an immediate first tick; while polling the
    /// already scheduled tick picks the target up.
    pub fn register_target(self: &Arc<Self>, id: EntityId, terminal: TerminalStatuses<E::Status>) {
        let mut registry = self.registry();
        tracing::debug!(
            kind = self.kind,
            entity = %id,
            terminal = ?terminal.as_slice(),
            "Registering poll target"
        );
        registry.targets.insert(id, terminal);
        if matches!(registry.state, PollState::Idle) {
            self.arm(&mut registry, Duration::ZERO);
            self.idle.send_replace(false);
        }
    }

    #[must_use]
    pub fn is_polling(&self, id: &EntityId) -> bool {
        self.registry().targets.contains_key(id)
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self.registry().state, PollState::Idle)
    }

    /// Ids currently tracked.
    #[must_use]
    pub fn pending(&self) -> Vec<EntityId> {
        self.registry().targets.keys().cloned().collect()
    }

    #[must_use]
    pub fn terminal_for(&self, id: &EntityId) -> Option<TerminalStatuses<E::Status>> {
        self.registry().targets.get(id).cloned()
    }

    /// Resolves once no target is tracked and no tick is scheduled.
    pub async fn wait_until_idle(&self) {
        let mut idle = self.idle.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = idle.wait_for(|idle| *idle).await;
    }

    /// Cancel the scheduled tick and forget every target.
    pub fn shutdown(&self) {
        let mut registry = self.registry();
        if let PollState::Polling(Cadence::Scheduled { handle, .. }) = &registry.state {
            handle.cancel();
        }
        registry.targets.clear();
        registry.state = PollState::Idle;
        self.idle.send_replace(true);
        tracing::debug!(kind = self.kind, "Poll reconciler shut down");
    }

    fn arm(self: &Arc<Self>, registry: &mut Registry<E::Status>, delay: Duration) {
        let epoch = registry.next_epoch;
        registry.next_epoch += 1;

        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = self.timer.schedule(
            delay,
            Box::pin(async move {
                if let Some(reconciler) = weak.upgrade() {
                    reconciler.run_scheduled(epoch).await;
                }
            }),
        );
        tracing::trace!(kind = self.kind, epoch, delay_ms = delay.as_millis(), "Poll tick scheduled");
        registry.state = PollState::Polling(Cadence::Scheduled { epoch, handle });
    }

    async fn run_scheduled(self: Arc<Self>, epoch: u64) {
        {
            let mut registry = self.registry();
            match &registry.state {
                PollState::Polling(Cadence::Scheduled { epoch: armed, .. }) if *armed == epoch => {}
                // Superseded or shut down.
                _ => return,
            }
            registry.state = PollState::Polling(Cadence::Ticking { epoch });
        }
        let report = self.tick().await;
        if !report.is_empty() {
            tracing::debug!(
                kind = self.kind,
                refreshed = report.refreshed.len(),
                retired = report.retired.len(),
                removed = report.removed.len(),
                failed = report.failed.len(),
                pending = report.pending,
                "Poll tick finished"
            );
        }
    }

    /// Run one tick now. Ticks never overlap: a tick that starts while
    /// another runs waits for it.
    pub async fn tick(self: &Arc<Self>) -> TickReport {
        let _serial = self.tick_lock.lock().await;

        let mut report = TickReport::default();
        let mut missing = Vec::new();
        let mut work = Vec::new();
        for id in self.pending() {
            match self.cache.find_by_id(&id) {
                Some(handle) => work.push((id, handle.snapshot())),
                None => missing.push(id),
            }
        }

        let fetcher = &self.fetcher;
        let outcomes = join_all(work.iter().map(|(id, entity)| async move {
            (id.clone(), fetcher.refetch(entity).await)
        }))
        .await;

        {
            let mut registry = self.registry();

            for id in missing {
                if registry.targets.remove(&id).is_some() {
                    tracing::warn!(kind = self.kind, entity = %id, "Poll target has no cached entity; retiring");
                    report.retired.push(id);
                }
            }

            for (id, outcome) in outcomes {
                match outcome {
                    Ok(entity) => {
                        let status = entity.status().cloned();
                        if self.cache.upsert_in_place(entity).is_some() {
                            report.refreshed.push(id.clone());
                        }
                        let settled = registry
                            .targets
                            .get(&id)
                            .is_some_and(|terminal| terminal.is_satisfied_by(status.as_ref()));
                        if settled {
                            registry.targets.remove(&id);
                            tracing::debug!(kind = self.kind, entity = %id, ?status, "Poll target reached terminal status");
                            report.retired.push(id);
                        }
                    }
                    Err(err) if err.is_not_found() => {
                        self.cache.remove_by_id(&id);
                        if registry.targets.remove(&id).is_some() {
                            report.retired.push(id.clone());
                        }
                        tracing::info!(kind = self.kind, entity = %id, "Entity gone; removed from cache");
                        report.removed.push(id);
                    }
                    Err(err) => {
                        tracing::debug!(kind = self.kind, entity = %id, error = %err, "Poll re-fetch failed; will retry");
                        report.failed.push(id);
                    }
                }
            }

            report.pending = registry.targets.len();
            self.settle(&mut registry);
        }

        report
    }

    /// After a tick: go idle when nothing is left, otherwise make sure the
    /// next tick is scheduled.
    fn settle(self: &Arc<Self>, registry: &mut Registry<E::Status>) {
        if registry.targets.is_empty() {
            if let PollState::Polling(Cadence::Scheduled { handle, .. }) = &registry.state {
                handle.cancel();
            }
            if !matches!(registry.state, PollState::Idle) {
                tracing::debug!(kind = self.kind, "Poll registry empty; going idle");
            }
            registry.state = PollState::Idle;
            self.idle.send_replace(true);
            return;
        }

        match registry.state {
            PollState::Polling(Cadence::Scheduled { .. }) => {}
            PollState::Polling(Cadence::Ticking { .. }) | PollState::Idle => {
                self.arm(registry, self.interval);
                self.idle.send_replace(false);
            }
        }
    }
}

impl<E: Entity> Drop for PollReconciler<E> {
    fn drop(&mut self) {
        let registry = self.registry.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let PollState::Polling(Cadence::Scheduled { handle, .. }) = &registry.state {
            handle.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::ManualTimer;
    use hangar_types::{Instance, InstanceStatus, TeamId, TenantId, Volume, VolumeStatus};
    use std::collections::VecDeque;

    /// Serves queued responses per id; an exhausted queue reports a 503.
    struct ScriptedFetcher<E> {
        responses: Mutex<HashMap<EntityId, VecDeque<Result<E, TransportError>>>>,
        calls: Mutex<Vec<EntityId>>,
    }

    impl<E: Entity> ScriptedFetcher<E> {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn push(&self, id: &str, response: Result<E, TransportError>) {
            self.responses
                .lock()
                .unwrap()
                .entry(EntityId::new(id))
                .or_default()
                .push_back(response);
        }

        fn calls_for(&self, id: &str) -> usize {
            let id = EntityId::new(id);
            self.calls.lock().unwrap().iter().filter(|c| **c == id).count()
        }
    }

    impl<E: Entity> Refetch<E> for ScriptedFetcher<E> {
        fn refetch<'a>(&'a self, entity: &'a E) -> FetchFut<'a, E> {
            let id = entity.id().clone();
            self.calls.lock().unwrap().push(id.clone());
            let next = self
                .responses
                .lock()
                .unwrap()
                .get_mut(&id)
                .and_then(VecDeque::pop_front);
            Box::pin(async move {
                next.unwrap_or_else(|| Err(unavailable(&id)))
            })
        }
    }

    fn not_found(id: &str) -> TransportError {
        TransportError::NotFound {
            locator: format!("api/x/{id}/"),
        }
    }

    fn unavailable(id: &EntityId) -> TransportError {
        TransportError::Status {
            locator: format!("api/x/{id}/"),
            status: 503,
            body: String::new(),
        }
    }

    fn timed_out(id: &str) -> TransportError {
        TransportError::Timeout {
            locator: format!("api/x/{id}/"),
        }
    }

    fn instance(id: &str, status: InstanceStatus) -> Instance {
        Instance::new(EntityId::new(id), TeamId::new(1), TenantId::new(10), id, status)
    }

    fn volume(id: &str, status: VolumeStatus) -> Volume {
        Volume::new(EntityId::new(id), TeamId::new(1), TenantId::new(10), 5, status)
    }

    struct Harness<E: Entity> {
        cache: Arc<CollectionCache<E>>,
        fetcher: Arc<ScriptedFetcher<E>>,
        timer: ManualTimer,
        reconciler: Arc<PollReconciler<E>>,
    }

    fn harness<E: Entity>() -> Harness<E> {
        let cache = Arc::new(CollectionCache::new());
        let fetcher = ScriptedFetcher::new();
        let timer = ManualTimer::new();
        let reconciler = PollReconciler::new(
            "test",
            Arc::clone(&cache),
            Arc::clone(&fetcher) as Arc<dyn Refetch<E>>,
            Arc::new(timer.clone()),
            Duration::from_secs(5),
        );
        Harness {
            cache,
            fetcher,
            timer,
            reconciler,
        }
    }

    fn active_or_error() -> TerminalStatuses<InstanceStatus> {
        TerminalStatuses::any_of([InstanceStatus::Active, InstanceStatus::Error])
    }

    #[tokio::test]
    async fn terminal_status_retires_target() {
        let h = harness::<Instance>();
        h.cache.insert(instance("5", InstanceStatus::Build));
        let held = h.cache.find_by_id(&EntityId::new("5")).unwrap();
        h.fetcher.push("5", Ok(instance("5", InstanceStatus::Active)));

        h.reconciler.register_target(EntityId::new("5"), active_or_error());
        assert!(h.reconciler.is_polling(&EntityId::new("5")));
        assert_eq!(h.timer.next_delay(), Some(Duration::ZERO));

        assert!(h.timer.fire_next().await);

        assert!(!h.reconciler.is_polling(&EntityId::new("5")));
        assert!(h.reconciler.is_idle());
        assert_eq!(held.read().status, Some(InstanceStatus::Active));
        assert_eq!(h.timer.pending(), 0);
    }

    #[tokio::test]
    async fn not_found_removes_entity_regardless_of_terminal_set() {
        let h = harness::<Volume>();
        h.cache.insert(volume("7", VolumeStatus::Deleting));
        h.fetcher.push("7", Err(not_found("7")));

        h.reconciler
            .register_target(EntityId::new("7"), TerminalStatuses::any_of([VolumeStatus::Available]));
        let report = h.reconciler.tick().await;

        assert_eq!(report.removed, vec![EntityId::new("7")]);
        assert_eq!(report.retired, vec![EntityId::new("7")]);
        assert!(h.cache.find_by_id(&EntityId::new("7")).is_none());
        assert!(!h.reconciler.is_polling(&EntityId::new("7")));
        assert!(h.reconciler.is_idle());
    }

    #[tokio::test]
    async fn empty_terminal_set_waits_for_disappearance() {
        let h = harness::<Volume>();
        h.cache.insert(volume("v", VolumeStatus::Deleting));
        h.fetcher.push("v", Ok(volume("v", VolumeStatus::Deleting)));
        h.fetcher.push("v", Err(not_found("v")));

        h.reconciler.register_target(EntityId::new("v"), TerminalStatuses::gone());
        h.timer.fire_next().await;
        assert!(h.reconciler.is_polling(&EntityId::new("v")));

        h.timer.fire_next().await;
        assert!(!h.reconciler.is_polling(&EntityId::new("v")));
        assert!(h.cache.is_empty());
    }

    #[tokio::test]
    async fn registering_while_polling_schedules_no_second_timer() {
        let h = harness::<Instance>();
        for id in ["a", "b", "c"] {
            h.cache.insert(instance(id, InstanceStatus::Build));
        }

        h.reconciler.register_target(EntityId::new("a"), active_or_error());
        h.reconciler.register_target(EntityId::new("b"), active_or_error());
        h.reconciler.register_target(EntityId::new("c"), active_or_error());

        assert_eq!(h.timer.schedule_calls(), 1);
        assert_eq!(h.timer.pending(), 1);

        // Everything still building: exactly one follow-up tick.
        h.timer.fire_next().await;
        assert_eq!(h.timer.schedule_calls(), 2);
        assert_eq!(h.timer.pending(), 1);
        assert_eq!(h.timer.next_delay(), Some(Duration::from_secs(5)));

        h.reconciler.register_target(EntityId::new("a"), active_or_error());
        assert_eq!(h.timer.schedule_calls(), 2);
        assert_eq!(h.reconciler.pending().len(), 3);
    }

    #[tokio::test]
    async fn re_registration_replaces_terminal_set() {
        let h = harness::<Instance>();
        h.cache.insert(instance("i", InstanceStatus::Active));

        h.reconciler
            .register_target(EntityId::new("i"), TerminalStatuses::any_of([InstanceStatus::Shutoff]));
        h.reconciler.register_target(
            EntityId::new("i"),
            TerminalStatuses::any_of([InstanceStatus::Shelved, InstanceStatus::ShelvedOffloaded]),
        );

        assert_eq!(h.reconciler.pending().len(), 1);
        assert_eq!(
            h.reconciler.terminal_for(&EntityId::new("i")).unwrap().as_slice(),
            [InstanceStatus::Shelved, InstanceStatus::ShelvedOffloaded]
        );

        h.fetcher.push("i", Ok(instance("i", InstanceStatus::Shutoff)));
        h.timer.fire_next().await;
        assert!(h.reconciler.is_polling(&EntityId::new("i")));
    }

    #[tokio::test]
    async fn nothing_is_scheduled_after_the_last_target_retires() {
        let h = harness::<Instance>();
        h.cache.insert(instance("a", InstanceStatus::Build));
        h.cache.insert(instance("b", InstanceStatus::Build));
        h.fetcher.push("a", Ok(instance("a", InstanceStatus::Active)));
        h.fetcher.push("b", Ok(instance("b", InstanceStatus::Build)));
        h.fetcher.push("b", Ok(instance("b", InstanceStatus::Error)));

        h.reconciler.register_target(EntityId::new("a"), active_or_error());
        h.reconciler.register_target(EntityId::new("b"), active_or_error());

        h.timer.fire_next().await;
        assert_eq!(h.reconciler.pending(), vec![EntityId::new("b")]);
        assert_eq!(h.timer.schedule_calls(), 2);

        h.timer.fire_next().await;
        assert!(h.reconciler.is_idle());
        assert_eq!(h.timer.schedule_calls(), 2);
        assert!(!h.timer.fire_next().await);

        h.reconciler.wait_until_idle().await;
    }

    #[tokio::test]
    async fn transient_failure_keeps_target_and_others_proceed() {
        let h = harness::<Instance>();
        h.cache.insert(instance("ok", InstanceStatus::Build));
        h.cache.insert(instance("flaky", InstanceStatus::Build));
        h.cache.insert(instance("slow", InstanceStatus::Build));
        h.fetcher.push("ok", Ok(instance("ok", InstanceStatus::Active)));
        h.fetcher.push("flaky", Err(unavailable(&EntityId::new("flaky"))));
        h.fetcher.push("flaky", Ok(instance("flaky", InstanceStatus::Active)));
        h.fetcher.push("slow", Err(timed_out("slow")));
        h.fetcher.push("slow", Ok(instance("slow", InstanceStatus::Error)));

        for id in ["ok", "flaky", "slow"] {
            h.reconciler.register_target(EntityId::new(id), active_or_error());
        }

        h.timer.fire_next().await;
        assert!(!h.reconciler.is_polling(&EntityId::new("ok")));
        assert!(h.reconciler.is_polling(&EntityId::new("flaky")));
        assert!(h.reconciler.is_polling(&EntityId::new("slow")));
        assert!(h.cache.find_by_id(&EntityId::new("slow")).is_some());

        h.timer.fire_next().await;
        assert!(h.reconciler.is_idle());
        assert_eq!(h.fetcher.calls_for("flaky"), 2);
        assert_eq!(h.fetcher.calls_for("ok"), 1);
    }

    #[tokio::test]
    async fn target_without_cached_entity_is_retired() {
        let h = harness::<Instance>();
        h.reconciler.register_target(EntityId::new("ghost"), active_or_error());

        let report = h.reconciler.tick().await;

        assert_eq!(report.retired, vec![EntityId::new("ghost")]);
        assert_eq!(h.fetcher.calls_for("ghost"), 0);
        assert!(h.reconciler.is_idle());
    }

    #[tokio::test]
    async fn manual_tick_while_scheduled_keeps_single_timer() {
        let h = harness::<Instance>();
        h.cache.insert(instance("a", InstanceStatus::Build));
        h.reconciler.register_target(EntityId::new("a"), active_or_error());
        assert_eq!(h.timer.pending(), 1);

        h.reconciler.tick().await;
        assert_eq!(h.timer.pending(), 1);
        assert_eq!(h.timer.schedule_calls(), 1);
    }

    #[tokio::test]
    async fn stale_timer_does_not_tick() {
        let h = harness::<Instance>();
        h.cache.insert(instance("a", InstanceStatus::Build));
        h.reconciler.register_target(EntityId::new("a"), active_or_error());

        h.reconciler.shutdown();
        assert!(h.reconciler.is_idle());
        assert!(!h.reconciler.is_polling(&EntityId::new("a")));
        assert_eq!(h.timer.pending(), 0);

        h.reconciler.register_target(EntityId::new("a"), active_or_error());
        assert_eq!(h.timer.schedule_calls(), 2);
        h.fetcher.push("a", Ok(instance("a", InstanceStatus::Active)));
        h.timer.fire_next().await;
        assert_eq!(h.fetcher.calls_for("a"), 1);
        assert!(h.reconciler.is_idle());
    }

    /// Holds every re-fetch open until the test releases it.
    struct GatedFetcher<E> {
        waiting: Mutex<HashMap<EntityId, tokio::sync::oneshot::Sender<Result<E, TransportError>>>>,
        started: Mutex<Vec<EntityId>>,
    }

    impl<E: Entity> GatedFetcher<E> {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                waiting: Mutex::new(HashMap::new()),
                started: Mutex::new(Vec::new()),
            })
        }

        fn in_flight(&self) -> usize {
            self.waiting.lock().unwrap().len()
        }

        fn started(&self) -> usize {
            self.started.lock().unwrap().len()
        }

        fn release(&self, id: &str, response: Result<E, TransportError>) {
            let sender = self
                .waiting
                .lock()
                .unwrap()
                .remove(&EntityId::new(id))
                .expect("no re-fetch in flight for id");
            let _ = sender.send(response);
        }
    }

    impl<E: Entity> Refetch<E> for GatedFetcher<E> {
        fn refetch<'a>(&'a self, entity: &'a E) -> FetchFut<'a, E> {
            let id = entity.id().clone();
            let (sender, receiver) = tokio::sync::oneshot::channel();
            self.started.lock().unwrap().push(id.clone());
            self.waiting.lock().unwrap().insert(id.clone(), sender);
            Box::pin(async move { receiver.await.unwrap_or_else(|_| Err(unavailable(&id))) })
        }
    }

    struct Gated {
        cache: Arc<CollectionCache<Instance>>,
        fetcher: Arc<GatedFetcher<Instance>>,
        timer: ManualTimer,
        reconciler: Arc<PollReconciler<Instance>>,
    }

    fn gated() -> Gated {
        let cache = Arc::new(CollectionCache::new());
        let fetcher = GatedFetcher::new();
        let timer = ManualTimer::new();
        let reconciler = PollReconciler::new(
            "test",
            Arc::clone(&cache),
            Arc::clone(&fetcher) as Arc<dyn Refetch<Instance>>,
            Arc::new(timer.clone()),
            Duration::from_secs(5),
        );
        Gated {
            cache,
            fetcher,
            timer,
            reconciler,
        }
    }

    /// Let spawned tasks run until `ready` holds.
    async fn until(ready: impl Fn() -> bool) {
        for _ in 0..100 {
            if ready() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition not reached");
    }

    async fn settle_tasks() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn status_of(cache: &CollectionCache<Instance>, id: &str) -> Option<InstanceStatus> {
        cache.find_by_id(&EntityId::new(id)).and_then(|handle| handle.status())
    }

    #[tokio::test]
    async fn tick_fetches_concurrently_and_applies_only_when_all_resolve() {
        let g = gated();
        g.cache.insert(instance("a", InstanceStatus::Build));
        g.cache.insert(instance("b", InstanceStatus::Build));
        g.reconciler.register_target(EntityId::new("a"), active_or_error());
        g.reconciler.register_target(EntityId::new("b"), active_or_error());

        let timer = g.timer.clone();
        let tick = tokio::spawn(async move { timer.fire_next().await });

        // Both re-fetches are out before either returns.
        until(|| g.fetcher.in_flight() == 2).await;

        g.fetcher.release("a", Ok(instance("a", InstanceStatus::Active)));
        settle_tasks().await;
        assert_eq!(status_of(&g.cache, "a"), Some(InstanceStatus::Build));
        assert!(g.reconciler.is_polling(&EntityId::new("a")));

        g.fetcher.release("b", Ok(instance("b", InstanceStatus::Error)));
        assert!(tick.await.unwrap());

        assert_eq!(status_of(&g.cache, "a"), Some(InstanceStatus::Active));
        assert_eq!(status_of(&g.cache, "b"), Some(InstanceStatus::Error));
        assert!(g.reconciler.is_idle());
    }

    #[tokio::test]
    async fn registering_during_a_tick_arms_exactly_one_follow_up() {
        let g = gated();
        g.cache.insert(instance("a", InstanceStatus::Build));
        g.cache.insert(instance("b", InstanceStatus::Build));
        g.reconciler.register_target(EntityId::new("a"), active_or_error());
        assert_eq!(g.timer.schedule_calls(), 1);

        let timer = g.timer.clone();
        let tick = tokio::spawn(async move { timer.fire_next().await });
        until(|| g.fetcher.in_flight() == 1).await;

        g.reconciler.register_target(EntityId::new("b"), active_or_error());
        assert_eq!(g.timer.schedule_calls(), 1);
        assert_eq!(g.timer.pending(), 0);
        assert!(!g.reconciler.is_idle());

        g.fetcher.release("a", Ok(instance("a", InstanceStatus::Active)));
        assert!(tick.await.unwrap());

        // `b` joined after the tick started; it waits for the next one.
        assert_eq!(g.fetcher.started(), 1);
        assert_eq!(g.reconciler.pending(), vec![EntityId::new("b")]);
        assert_eq!(g.timer.schedule_calls(), 2);
        assert_eq!(g.timer.pending(), 1);
        assert_eq!(g.timer.next_delay(), Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn manual_tick_waits_for_the_running_tick() {
        let g = gated();
        g.cache.insert(instance("a", InstanceStatus::Build));
        g.reconciler.register_target(EntityId::new("a"), active_or_error());

        let timer = g.timer.clone();
        let scheduled = tokio::spawn(async move { timer.fire_next().await });
        until(|| g.fetcher.in_flight() == 1).await;

        let reconciler = Arc::clone(&g.reconciler);
        let manual = tokio::spawn(async move { reconciler.tick().await });
        settle_tasks().await;
        assert_eq!(g.fetcher.started(), 1);

        g.fetcher.release("a", Ok(instance("a", InstanceStatus::Build)));
        assert!(scheduled.await.unwrap());
        assert_eq!(g.timer.schedule_calls(), 2);

        until(|| g.fetcher.in_flight() == 1).await;
        assert_eq!(g.fetcher.started(), 2);
        g.fetcher.release("a", Ok(instance("a", InstanceStatus::Active)));
        let report = manual.await.unwrap();

        assert_eq!(report.retired, vec![EntityId::new("a")]);
        assert!(g.reconciler.is_idle());
        assert_eq!(g.timer.pending(), 0);
    }

    #[tokio::test]
    async fn dropping_the_reconciler_cancels_its_timer() {
        let h = harness::<Instance>();
        h.cache.insert(instance("a", InstanceStatus::Build));
        h.reconciler.register_target(EntityId::new("a"), active_or_error());
        assert_eq!(h.timer.pending(), 1);

        drop(h.reconciler);
        assert_eq!(h.timer.pending(), 0);
        assert!(!h.timer.fire_next().await);
    }
}
