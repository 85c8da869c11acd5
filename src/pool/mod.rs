//! Bounded transcode worker pool
//!
//! Owns a set of OS threads, each warmed with its own transcoding
//! engine, pulling typed jobs from a shared FIFO queue. Artifact
//! loading goes through an explicit `Empty -> Loading -> Ready` state
//! machine: the first submitter starts the fetch, concurrent
//! submitters share the same in-flight future, and `dispose()` drops
//! the loaded payload. Workers are spawned lazily, up to a mutable
//! limit, when a task arrives and no unit is idle.
//!
//! There is no cancellation or timeout for dispatched tasks: a stalled
//! engine call blocks its unit until it returns.

pub mod worker;

pub use worker::{Mipmap, TranscodedTexture};

use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::engine::{EngineArtifacts, EngineFactory, TranscoderEngine};
use crate::error::DecodeError;
use crate::negotiate::Capabilities;

/// Default number of parallel execution units
pub const DEFAULT_WORKER_LIMIT: usize = 4;

type ArtifactFuture = Shared<BoxFuture<'static, Result<Arc<EngineArtifacts>, DecodeError>>>;

/// One-time artifact load state
enum ArtifactState {
    Empty,
    Loading(ArtifactFuture),
    Ready(Arc<EngineArtifacts>),
}

/// Unit of work handed to a worker thread
struct Job {
    id: u64,
    input: Arc<[u8]>,
    caps: Capabilities,
    reply: oneshot::Sender<Result<TranscodedTexture, DecodeError>>,
}

pub struct TranscodeWorkerPool {
    factory: Arc<dyn EngineFactory>,
    artifacts: Mutex<ArtifactState>,
    limit: AtomicUsize,
    disposed: AtomicBool,
    /// Taken on dispose, which closes the queue
    sender: Mutex<Option<Sender<Job>>>,
    /// Shared by all workers; whoever holds the lock takes the next job
    receiver: Arc<Mutex<Receiver<Job>>>,
    idle: Arc<AtomicUsize>,
    workers: AtomicUsize,
    next_id: AtomicU64,
}

impl TranscodeWorkerPool {
    pub fn new(factory: Arc<dyn EngineFactory>, worker_limit: usize) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            factory,
            artifacts: Mutex::new(ArtifactState::Empty),
            limit: AtomicUsize::new(worker_limit.max(1)),
            disposed: AtomicBool::new(false),
            sender: Mutex::new(Some(sender)),
            receiver: Arc::new(Mutex::new(receiver)),
            idle: Arc::new(AtomicUsize::new(0)),
            workers: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    /// Change the unit cap. Growing adds capacity for future tasks;
    /// shrinking stops further spawns but leaves running units alone.
    pub fn set_worker_limit(&self, limit: usize) {
        self.limit.store(limit.max(1), Ordering::SeqCst);
    }

    /// Submit one transcode task and wait for its result.
    ///
    /// Initializes the pool on first use (artifact fetch shared across
    /// concurrent callers), spawns a unit if none is free and the limit
    /// allows, then queues the job FIFO.
    pub async fn submit(
        &self,
        input: Arc<[u8]>,
        caps: Capabilities,
    ) -> Result<TranscodedTexture, DecodeError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(DecodeError::PoolDisposed);
        }

        let artifacts = self.ensure_artifacts().await?;
        self.ensure_worker(&artifacts, &caps)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let guard = self.sender.lock().expect("pool queue lock poisoned");
            let sender = guard.as_ref().ok_or(DecodeError::PoolDisposed)?;
            sender
                .send(Job {
                    id,
                    input,
                    caps,
                    reply: reply_tx,
                })
                .map_err(|_| DecodeError::PoolDisposed)?;
        }
        debug!(id, "transcode task queued");

        reply_rx
            .await
            .map_err(|_| DecodeError::TranscodeFailed("worker exited before replying".into()))?
    }

    /// Terminate the pool: close the queue so units exit after draining
    /// what was already accepted, release the loaded artifacts, and
    /// reject all future submissions.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.sender
            .lock()
            .expect("pool queue lock poisoned")
            .take();
        *self.artifacts.lock().expect("pool artifact lock poisoned") = ArtifactState::Empty;
        debug!("transcode worker pool disposed");
    }

    async fn ensure_artifacts(&self) -> Result<Arc<EngineArtifacts>, DecodeError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(DecodeError::PoolDisposed);
        }
        let pending = {
            let mut state = self.artifacts.lock().expect("pool artifact lock poisoned");
            match &*state {
                ArtifactState::Ready(artifacts) => return Ok(artifacts.clone()),
                ArtifactState::Loading(fut) => fut.clone(),
                ArtifactState::Empty => {
                    debug!("fetching transcoder artifacts");
                    let fetch = self.factory.fetch_artifacts();
                    let fut: ArtifactFuture = async move {
                        fetch
                            .await
                            .map(Arc::new)
                            .map_err(|e| DecodeError::Engine(format!("artifact fetch: {e:#}")))
                    }
                    .boxed()
                    .shared();
                    *state = ArtifactState::Loading(fut.clone());
                    fut
                }
            }
        };

        let result = pending.await;

        let mut state = self.artifacts.lock().expect("pool artifact lock poisoned");
        // A dispose racing the fetch must not leave the payload loaded
        if self.disposed.load(Ordering::SeqCst) {
            *state = ArtifactState::Empty;
            return Err(DecodeError::PoolDisposed);
        }
        if let ArtifactState::Loading(_) = &*state {
            match &result {
                Ok(artifacts) => *state = ArtifactState::Ready(artifacts.clone()),
                // Leave retryable: the next submit refetches
                Err(_) => *state = ArtifactState::Empty,
            }
        }
        result
    }

    /// Spawn a unit if every existing one is busy and the limit allows.
    /// The unit receives its engine (built from the artifacts and a
    /// capability snapshot) exactly once, at creation.
    fn ensure_worker(
        &self,
        artifacts: &Arc<EngineArtifacts>,
        caps: &Capabilities,
    ) -> Result<(), DecodeError> {
        if self.idle.load(Ordering::SeqCst) > 0 {
            return Ok(());
        }
        let limit = self.limit.load(Ordering::SeqCst);
        // Reserve a unit slot atomically so concurrent submits cannot
        // overshoot the limit
        let Ok(n) = self.workers.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
            (count < limit).then_some(count + 1)
        }) else {
            return Ok(());
        };

        let spawned = self
            .factory
            .create_engine(artifacts, caps)
            .map_err(|e| DecodeError::Engine(format!("engine init: {e:#}")))
            .and_then(|engine| {
                if !engine.supports_ktx2() {
                    warn!(
                        "transcoder artifacts predate KTX2 container support, update the transcoder"
                    );
                }
                let receiver = self.receiver.clone();
                let idle = self.idle.clone();
                std::thread::Builder::new()
                    .name(format!("transcode-worker-{n}"))
                    .spawn(move || worker_loop(engine, receiver, idle))
                    .map_err(|e| DecodeError::Engine(format!("spawning worker: {e}")))
            });
        match spawned {
            Ok(_) => {
                debug!(worker = n, "spawned transcode worker");
                Ok(())
            }
            Err(e) => {
                self.workers.fetch_sub(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    #[cfg(test)]
    fn worker_count(&self) -> usize {
        self.workers.load(Ordering::SeqCst)
    }
}

/// Worker thread body: take the next queued job in arrival order, run
/// it, reply, repeat until the queue is closed.
fn worker_loop(
    engine: Box<dyn TranscoderEngine>,
    receiver: Arc<Mutex<Receiver<Job>>>,
    idle: Arc<AtomicUsize>,
) {
    loop {
        idle.fetch_add(1, Ordering::SeqCst);
        let job = {
            let guard = receiver.lock().expect("pool queue lock poisoned");
            guard.recv()
        };
        idle.fetch_sub(1, Ordering::SeqCst);

        let Ok(job) = job else {
            // Queue closed: the pool was disposed
            break;
        };

        debug!(id = job.id, "transcoding");
        let result = worker::execute(engine.as_ref(), &job.input, &job.caps);
        // The submitter may have gone away; nothing to do then
        let _ = job.reply.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::{MockConfig, MockFactory};

    fn etc2_caps() -> Capabilities {
        Capabilities {
            etc2_supported: true,
            ..Capabilities::default()
        }
    }

    fn input() -> Arc<[u8]> {
        Arc::from(vec![0u8; 16].into_boxed_slice())
    }

    #[tokio::test]
    async fn test_submit_produces_transcoded_texture() {
        let factory = Arc::new(MockFactory::new(MockConfig {
            level_count: 2,
            ..MockConfig::default()
        }));
        let pool = TranscodeWorkerPool::new(factory.clone(), 2);

        let texture = pool.submit(input(), etc2_caps()).await.unwrap();
        assert_eq!(texture.mipmaps.len(), 2);
        assert_eq!(texture.width, 16);
        assert_eq!(factory.stats.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(factory.stats.engines_created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_submits_share_one_artifact_fetch() {
        let factory = Arc::new(MockFactory::new(MockConfig::default()));
        let pool = Arc::new(TranscodeWorkerPool::new(factory.clone(), 4));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let pool = pool.clone();
            handles.push(tokio::spawn(
                async move { pool.submit(input(), etc2_caps()).await },
            ));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(factory.stats.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_worker_limit_bounds_units() {
        let factory = Arc::new(MockFactory::new(MockConfig::default()));
        let pool = Arc::new(TranscodeWorkerPool::new(factory.clone(), 2));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let pool = pool.clone();
            handles.push(tokio::spawn(
                async move { pool.submit(input(), etc2_caps()).await },
            ));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(pool.worker_count() <= 2);
        assert!(factory.stats.engines_created.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_dispose_rejects_new_submissions() {
        let factory = Arc::new(MockFactory::new(MockConfig::default()));
        let pool = TranscodeWorkerPool::new(factory, 2);

        pool.submit(input(), etc2_caps()).await.unwrap();
        pool.dispose();

        let result = pool.submit(input(), etc2_caps()).await;
        assert!(matches!(result, Err(DecodeError::PoolDisposed)));

        // Idempotent
        pool.dispose();
    }

    #[tokio::test]
    async fn test_dispose_during_artifact_fetch_discards_the_payload() {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let mut factory = MockFactory::new(MockConfig::default());
        factory.fetch_gate = Some(gate.clone());
        let factory = Arc::new(factory);
        let pool = Arc::new(TranscodeWorkerPool::new(factory.clone(), 2));

        let submit = tokio::spawn({
            let pool = pool.clone();
            async move { pool.submit(input(), etc2_caps()).await }
        });
        // Let the submit reach the gated fetch
        while factory.stats.fetches.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        pool.dispose();
        gate.add_permits(1);

        let result = submit.await.unwrap();
        assert!(matches!(result, Err(DecodeError::PoolDisposed)));
        // The fetched payload must not be retained past dispose
        assert!(matches!(
            &*pool.artifacts.lock().unwrap(),
            ArtifactState::Empty
        ));
        assert_eq!(factory.stats.engines_created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_retryable() {
        let mut factory = MockFactory::new(MockConfig::default());
        factory.fail_fetch = true;
        let factory = Arc::new(factory);
        let pool = TranscodeWorkerPool::new(factory.clone(), 2);

        let result = pool.submit(input(), etc2_caps()).await;
        assert!(matches!(result, Err(DecodeError::Engine(_))));
        // State went back to Empty, so another submit refetches
        let result = pool.submit(input(), etc2_caps()).await;
        assert!(matches!(result, Err(DecodeError::Engine(_))));
        assert_eq!(factory.stats.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_poison_the_unit() {
        let factory = Arc::new(MockFactory::new(MockConfig {
            fail_at: Some((0, 0)),
            ..MockConfig::default()
        }));
        let pool = TranscodeWorkerPool::new(factory.clone(), 1);

        let result = pool.submit(input(), etc2_caps()).await;
        assert!(matches!(result, Err(DecodeError::TranscodeFailed(_))));

        // Same unit keeps serving; handle was released
        let result = pool.submit(input(), etc2_caps()).await;
        assert!(matches!(result, Err(DecodeError::TranscodeFailed(_))));
        assert_eq!(factory.stats.engines_created.load(Ordering::SeqCst), 1);
        assert_eq!(factory.stats.opened.load(Ordering::SeqCst), 2);
        assert_eq!(factory.stats.released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failing_task_stress_releases_every_handle() {
        let factory = Arc::new(MockFactory::new(MockConfig {
            level_count: 1,
            layer_count: 3,
            fail_at: Some((0, 2)),
            ..MockConfig::default()
        }));
        let pool = TranscodeWorkerPool::new(factory.clone(), 4);

        for _ in 0..10_000 {
            let result = pool.submit(input(), etc2_caps()).await;
            assert!(matches!(result, Err(DecodeError::TranscodeFailed(_))));
        }

        assert_eq!(factory.stats.opened.load(Ordering::SeqCst), 10_000);
        assert_eq!(factory.stats.released.load(Ordering::SeqCst), 10_000);
    }
}
