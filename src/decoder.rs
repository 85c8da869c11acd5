//! Public decode entry point
//!
//! `Ktx2Decoder` parses raw container bytes on the calling thread and
//! dispatches: directly-usable formats produce a [`DataTexture`]
//! synchronously, Basis-encoded payloads go through the worker pool
//! with requests deduplicated per input buffer. Capabilities must be
//! declared with [`Ktx2Decoder::detect_support`] before any decode.

use futures::FutureExt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tracing::warn;

use crate::cache::RequestCache;
use crate::container::{self, Container};
use crate::direct::{self, DataTexture};
use crate::engine::EngineFactory;
use crate::error::DecodeError;
use crate::negotiate::Capabilities;
use crate::pool::{TranscodeWorkerPool, TranscodedTexture, DEFAULT_WORKER_LIMIT};
use crate::supercompress::SupercompressionDecoder;

/// Live decoder instances, for the shared-instance diagnostic
static ACTIVE_DECODERS: AtomicUsize = AtomicUsize::new(0);

/// A decoded texture, ready for upload
#[derive(Debug, Clone)]
pub enum Texture {
    /// Direct-format path output: one level of raw pixels
    Data(DataTexture),
    /// Transcoded output: a compressed mip chain
    Compressed(TranscodedTexture),
}

pub struct Ktx2Decoder {
    pool: Arc<TranscodeWorkerPool>,
    caps: RwLock<Option<Capabilities>>,
    cache: RequestCache<Arc<Texture>>,
    supercompress: SupercompressionDecoder,
    disposed: AtomicBool,
}

impl Ktx2Decoder {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        if ACTIVE_DECODERS.fetch_add(1, Ordering::SeqCst) > 0 {
            warn!(
                "multiple active KTX2 decoders can hurt performance, \
                 use a single shared instance or dispose old ones"
            );
        }
        Self {
            pool: Arc::new(TranscodeWorkerPool::new(factory, DEFAULT_WORKER_LIMIT)),
            caps: RwLock::new(None),
            cache: RequestCache::new(),
            supercompress: SupercompressionDecoder::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Declare which compressed-format families the target hardware
    /// supports. Required before the first decode.
    pub fn detect_support(&self, caps: Capabilities) {
        *self.caps.write().expect("capability lock poisoned") = Some(caps);
    }

    /// Cap on parallel transcode units; growing adds capacity for
    /// future tasks
    pub fn set_worker_limit(&self, limit: usize) {
        self.pool.set_worker_limit(limit);
    }

    /// Decode a KTX2 container into a texture.
    ///
    /// The buffer's identity keys transcode deduplication: concurrent
    /// decodes of the same `Arc` share one underlying transcode and
    /// one result.
    pub async fn decode(&self, buffer: Arc<[u8]>) -> Result<Arc<Texture>, DecodeError> {
        let caps = self
            .caps
            .read()
            .expect("capability lock poisoned")
            .ok_or(DecodeError::PoolUninitialized)?;

        match container::parse(&buffer)? {
            Container::Direct(direct) => {
                let texture = direct::decode(&direct, &self.supercompress)?;
                Ok(Arc::new(Texture::Data(texture)))
            }
            Container::Transcodable(_) => {
                let pending = self.cache.get_or_insert(&buffer, || {
                    let pool = self.pool.clone();
                    let input = buffer.clone();
                    async move {
                        pool.submit(input, caps)
                            .await
                            .map(|texture| Arc::new(Texture::Compressed(texture)))
                    }
                    .boxed()
                });
                pending.await
            }
        }
    }

    /// Forget completed and in-flight cache entries. Use between
    /// unrelated buffer generations; identity keys can otherwise alias
    /// a reallocated buffer.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Tear down the worker pool and release the loaded transcoder
    /// artifacts. Decodes already dispatched run to completion; new
    /// transcodes fail with `PoolDisposed`.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.pool.dispose();
            ACTIVE_DECODERS.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for Ktx2Decoder {
    fn drop(&mut self) {
        self.dispose();
    }
}
