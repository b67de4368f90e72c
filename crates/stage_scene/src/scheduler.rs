//! Single-consumer instantiation pipeline
//!
//! Every spawn request, sync or async, funnels through one pending stack
//! drained by a dedicated worker thread, so entity construction is
//! serialized per scene. Requests are serviced most-recent-first; the
//! worker blocks on a condvar instead of spinning on an empty check.

use std::any::TypeId;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use tokio::sync::oneshot;

use stage_core::{Behaviour, PoolSet};

use crate::error::SpawnError;

/// Opaque generator: produces an entity given pool access. Runs on the
/// worker thread, never on the caller's.
pub(crate) type Generator =
    Box<dyn FnOnce(&PoolSet) -> Result<Arc<dyn Behaviour>, SpawnError> + Send>;

/// Completion handle delivering one request's outcome to its requester.
pub(crate) type SpawnReceiver = oneshot::Receiver<Result<Arc<dyn Behaviour>, SpawnError>>;

struct PendingSpawn {
    generator: Generator,
    reply: oneshot::Sender<Result<Arc<dyn Behaviour>, SpawnError>>,
}

struct StackState {
    pending: Vec<PendingSpawn>,
    cancelled: bool,
}

/// LIFO pending-request stack with a blocking pop.
struct SpawnStack {
    state: Mutex<StackState>,
    ready: Condvar,
}

impl SpawnStack {
    fn new() -> Self {
        Self {
            state: Mutex::new(StackState {
                pending: Vec::new(),
                cancelled: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Push a request, waking the worker. Returns the request back if the
    /// stack is already cancelled so the caller can resolve it itself.
    fn push(&self, request: PendingSpawn) -> Result<(), PendingSpawn> {
        let mut state = self.state.lock().expect("spawn stack poisoned");
        if state.cancelled {
            return Err(request);
        }
        state.pending.push(request);
        self.ready.notify_one();
        Ok(())
    }

    /// Pop the most recent request, sleeping while the stack is empty.
    /// Returns `None` once cancellation is signalled.
    fn pop_blocking(&self) -> Option<PendingSpawn> {
        let mut state = self.state.lock().expect("spawn stack poisoned");
        loop {
            if state.cancelled {
                return None;
            }
            if let Some(request) = state.pending.pop() {
                return Some(request);
            }
            state = self.ready.wait(state).expect("spawn stack poisoned");
        }
    }

    /// Signal cancellation and drain whatever is still resident. Pushes
    /// after this point are rejected at `push`.
    fn cancel_and_drain(&self) -> Vec<PendingSpawn> {
        let mut state = self.state.lock().expect("spawn stack poisoned");
        state.cancelled = true;
        self.ready.notify_all();
        std::mem::take(&mut state.pending)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.state.lock().expect("spawn stack poisoned").pending.len()
    }
}

/// Owns the pending stack and the worker that drains it.
pub(crate) struct Scheduler {
    stack: Arc<SpawnStack>,
    pools: Arc<PoolSet>,
    scene_name: String,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub(crate) fn start(pools: Arc<PoolSet>, scene_name: String) -> Self {
        let stack = Arc::new(SpawnStack::new());
        let worker = {
            let stack = stack.clone();
            let pools = pools.clone();
            let scene = scene_name.clone();
            std::thread::Builder::new()
                .name(format!("spawn-{scene_name}"))
                .spawn(move || worker_loop(&stack, &pools, &scene))
                .expect("failed to spawn scene worker thread")
        };
        Self {
            stack,
            pools,
            scene_name,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Scheduler with no worker attached; requests stay pending until
    /// serviced by hand. Used to test stack order and cancellation.
    #[cfg(test)]
    fn idle(pools: Arc<PoolSet>, scene_name: String) -> Self {
        Self {
            stack: Arc::new(SpawnStack::new()),
            pools,
            scene_name,
            worker: Mutex::new(None),
        }
    }

    /// The one primitive every public spawn shape routes through.
    pub(crate) fn push(&self, generator: Generator) -> SpawnReceiver {
        let (reply, receiver) = oneshot::channel();
        if let Err(rejected) = self.stack.push(PendingSpawn { generator, reply }) {
            // Stack already cancelled; resolve here so the caller never hangs.
            let _ = rejected.reply.send(Err(SpawnError::Cancelled));
        }
        receiver
    }

    /// Request an instance of the type keyed by `key`.
    pub(crate) fn spawn_for(&self, key: TypeId) -> SpawnReceiver {
        self.push(Box::new(move |pools| {
            pools.acquire(key).map_err(SpawnError::from)
        }))
    }

    /// Name-keyed request for the dynamic spawn path.
    pub(crate) fn spawn_named(&self, type_name: String) -> SpawnReceiver {
        self.push(Box::new(move |pools| {
            pools.acquire_by_name(&type_name).map_err(SpawnError::from)
        }))
    }

    /// Stop the worker and resolve every still-resident request with a
    /// cancellation outcome. Blocks until the worker has exited.
    pub(crate) fn shutdown(&self) {
        let leftovers = self.stack.cancel_and_drain();
        if let Some(handle) = self.worker.lock().expect("worker handle poisoned").take() {
            if handle.join().is_err() {
                tracing::error!(scene = %self.scene_name, "spawn worker panicked during shutdown");
            }
        }
        for request in leftovers {
            let _ = request.reply.send(Err(SpawnError::Cancelled));
        }
    }

    #[cfg(test)]
    fn service_next(&self) -> bool {
        match self.stack.pop_blocking() {
            Some(request) => {
                service(&self.pools, &self.scene_name, request);
                true
            }
            None => false,
        }
    }
}

fn worker_loop(stack: &SpawnStack, pools: &PoolSet, scene: &str) {
    while let Some(request) = stack.pop_blocking() {
        service(pools, scene, request);
    }
    tracing::debug!(scene, "spawn worker stopped");
}

/// Run one generator and resolve its completion handle. Failures are
/// logged and delivered through the handle; the worker keeps going.
fn service(pools: &PoolSet, scene: &str, request: PendingSpawn) {
    let outcome = (request.generator)(pools);
    if let Err(error) = &outcome {
        tracing::error!(scene, %error, "entity instantiation failed");
    }
    // The requester may have given up and dropped the receiver.
    let _ = request.reply.send(outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use stage_core::{EntityTypes, FactoryError, GameObject, PoolError};
    use std::any::Any;

    struct Prop {
        go: Arc<GameObject>,
    }

    impl Prop {
        fn build() -> Result<Arc<Prop>, FactoryError> {
            Ok(Arc::new(Prop {
                go: GameObject::new(TypeId::of::<Prop>(), "Prop"),
            }))
        }
    }

    impl Behaviour for Prop {
        fn game_object(&self) -> &Arc<GameObject> {
            &self.go
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    fn pools() -> Arc<PoolSet> {
        let types = Arc::new(EntityTypes::new());
        types.register::<Prop, _>("Prop", Prop::build);
        Arc::new(PoolSet::new(types))
    }

    #[tokio::test]
    async fn worker_resolves_requests() {
        let scheduler = Scheduler::start(pools(), "test".into());
        let entity = scheduler
            .spawn_for(TypeId::of::<Prop>())
            .await
            .expect("handle resolved")
            .expect("spawn succeeded");
        assert_eq!(entity.game_object().type_key(), TypeId::of::<Prop>());
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn failed_request_resolves_and_worker_continues() {
        struct Unknown;
        let scheduler = Scheduler::start(pools(), "test".into());

        let failed = scheduler.spawn_for(TypeId::of::<Unknown>()).await.unwrap();
        assert!(matches!(
            failed,
            Err(SpawnError::Pool(PoolError::Unregistered))
        ));

        // The worker must survive the failure and service later requests.
        let ok = scheduler.spawn_for(TypeId::of::<Prop>()).await.unwrap();
        assert!(ok.is_ok());
        scheduler.shutdown();
    }

    #[test]
    fn pending_batch_is_serviced_lifo() {
        let scheduler = Scheduler::idle(pools(), "test".into());
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut receivers = Vec::new();
        for i in 0..4 {
            let order = order.clone();
            receivers.push(scheduler.push(Box::new(move |pools| {
                order.lock().unwrap().push(i);
                pools.acquire(TypeId::of::<Prop>()).map_err(SpawnError::from)
            })));
        }

        assert_eq!(scheduler.stack.len(), 4);
        while scheduler.stack.len() > 0 {
            assert!(scheduler.service_next());
        }
        assert_eq!(*order.lock().unwrap(), vec![3, 2, 1, 0]);

        for rx in receivers {
            assert!(rx.blocking_recv().unwrap().is_ok());
        }
    }

    #[test]
    fn shutdown_cancels_every_pending_request() {
        let scheduler = Scheduler::idle(pools(), "test".into());
        let receivers: Vec<_> = (0..5)
            .map(|_| scheduler.spawn_for(TypeId::of::<Prop>()))
            .collect();

        scheduler.shutdown();

        for rx in receivers {
            let outcome = rx.blocking_recv().expect("handle resolved");
            assert!(matches!(outcome, Err(SpawnError::Cancelled)));
        }
    }

    #[test]
    fn push_after_shutdown_resolves_cancelled() {
        let scheduler = Scheduler::idle(pools(), "test".into());
        scheduler.shutdown();

        let rx = scheduler.spawn_for(TypeId::of::<Prop>());
        assert!(matches!(
            rx.blocking_recv().unwrap(),
            Err(SpawnError::Cancelled)
        ));
    }
}
