//! Transcoding engine seam
//!
//! The Basis Universal transcoder is an external artifact (a loadable
//! module plus its binary payload) rather than something this crate
//! links statically. The pool fetches the artifacts once, then creates
//! one engine per execution unit with a capability snapshot: the "init"
//! handshake. The engine hands out a native file handle per input; the
//! handle owns the native resource and releases it in `Drop`, so every
//! exit path of a transcode, success or failure, frees it exactly once.

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use std::path::PathBuf;

use crate::container::TransferFunction;
use crate::negotiate::{Capabilities, TranscoderFormat};

/// The two artifacts the transcoding engine loads from
#[derive(Debug, Clone)]
pub struct EngineArtifacts {
    /// The engine's executable module
    pub module: Vec<u8>,
    /// The engine's binary payload
    pub binary: Vec<u8>,
}

/// Dimensions of one (mip, layer) image as the engine reports them
#[derive(Debug, Clone, Copy)]
pub struct LevelInfo {
    /// Block-padded width the transcoder will emit
    pub width: u32,
    pub height: u32,
    /// True pixel width before block padding
    pub orig_width: u32,
    pub orig_height: u32,
}

/// Native handle over one opened container.
///
/// Dropping the handle releases the native resource; callers rely on
/// that for cleanup on every exit path and must not hold handles past
/// the task that opened them.
pub trait ContainerHandle: Send {
    /// Whether the payload is a well-formed transcodable container
    fn is_valid(&self) -> bool;

    /// Self-described encoding family: true for UASTC, false for ETC1S.
    /// This, not any caller hint, decides the priority ordering.
    fn is_uastc(&self) -> bool;

    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Array layer count; 0 when the container is not an array texture
    fn layer_count(&self) -> u32;

    fn level_count(&self) -> u32;
    fn has_alpha(&self) -> bool;
    fn transfer_function(&self) -> TransferFunction;
    fn premultiplied_alpha(&self) -> bool;

    /// Prepare internal transcoder state; call once before any image
    fn start_transcoding(&mut self) -> bool;

    fn level_info(&self, mip: u32, layer: u32) -> Option<LevelInfo>;

    /// Exact byte size of the (mip, layer) image in `format`
    fn transcoded_size(&self, mip: u32, layer: u32, format: TranscoderFormat) -> Option<usize>;

    /// Transcode one image into `dst`; false means the task must abort
    fn transcode_image(
        &mut self,
        dst: &mut [u8],
        mip: u32,
        layer: u32,
        format: TranscoderFormat,
    ) -> bool;
}

/// A warmed transcoding engine owned by one execution unit.
pub trait TranscoderEngine: Send {
    /// Open a container payload. Always returns a handle; validity is
    /// reported by [`ContainerHandle::is_valid`], mirroring how the
    /// native transcoder constructs a file object before validating it.
    fn open(&self, bytes: &[u8]) -> Box<dyn ContainerHandle>;

    /// False when the loaded artifacts predate KTX2 container support.
    /// Advisory only; the pool logs a warning and keeps going.
    fn supports_ktx2(&self) -> bool {
        true
    }
}

/// Fetches engine artifacts and creates per-unit engines.
pub trait EngineFactory: Send + Sync + 'static {
    /// Fetch the engine's two artifacts. The pool calls this at most
    /// once per instance and shares the in-flight future between
    /// concurrent initializers.
    fn fetch_artifacts(&self) -> BoxFuture<'static, Result<EngineArtifacts>>;

    /// Create a warmed engine for one execution unit. Called once per
    /// unit with the artifacts and a capability snapshot.
    fn create_engine(
        &self,
        artifacts: &EngineArtifacts,
        caps: &Capabilities,
    ) -> Result<Box<dyn TranscoderEngine>>;
}

/// Filesystem locations of the two engine artifacts.
///
/// Mirrors the path-configured artifact fetch of the reference loader;
/// factories that read the transcoder from disk can delegate here.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub module: PathBuf,
    pub binary: PathBuf,
}

impl ArtifactPaths {
    pub async fn load(&self) -> Result<EngineArtifacts> {
        let module = tokio::fs::read(&self.module)
            .await
            .with_context(|| format!("reading transcoder module {}", self.module.display()))?;
        let binary = tokio::fs::read(&self.binary)
            .await
            .with_context(|| format!("reading transcoder binary {}", self.binary.display()))?;
        Ok(EngineArtifacts { module, binary })
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Counting mock engine used by pool, executor, and decoder tests.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Shared counters observed by tests
    #[derive(Default)]
    pub struct MockStats {
        pub fetches: AtomicUsize,
        pub engines_created: AtomicUsize,
        pub opened: AtomicUsize,
        pub released: AtomicUsize,
    }

    /// Shape and failure knobs for the mock container
    #[derive(Debug, Clone)]
    pub struct MockConfig {
        pub width: u32,
        pub height: u32,
        pub level_count: u32,
        pub layer_count: u32,
        pub has_alpha: bool,
        pub uastc: bool,
        pub invalid: bool,
        pub fail_start: bool,
        /// Force transcode_image to fail at this (mip, layer)
        pub fail_at: Option<(u32, u32)>,
    }

    impl Default for MockConfig {
        fn default() -> Self {
            Self {
                width: 16,
                height: 16,
                level_count: 1,
                layer_count: 0,
                has_alpha: false,
                uastc: false,
                invalid: false,
                fail_start: false,
                fail_at: None,
            }
        }
    }

    /// Deterministic per-image fill byte so tests can check layer
    /// packing order
    pub fn image_byte(mip: u32, layer: u32) -> u8 {
        (mip * 16 + layer + 1) as u8
    }

    /// Bytes per transcoded mock image
    pub const IMAGE_SIZE: usize = 8;

    pub struct MockHandle {
        config: MockConfig,
        stats: Arc<MockStats>,
        started: bool,
    }

    impl Drop for MockHandle {
        fn drop(&mut self) {
            self.stats.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl ContainerHandle for MockHandle {
        fn is_valid(&self) -> bool {
            !self.config.invalid
        }

        fn is_uastc(&self) -> bool {
            self.config.uastc
        }

        fn width(&self) -> u32 {
            self.config.width
        }

        fn height(&self) -> u32 {
            self.config.height
        }

        fn layer_count(&self) -> u32 {
            self.config.layer_count
        }

        fn level_count(&self) -> u32 {
            self.config.level_count
        }

        fn has_alpha(&self) -> bool {
            self.config.has_alpha
        }

        fn transfer_function(&self) -> TransferFunction {
            TransferFunction::Srgb
        }

        fn premultiplied_alpha(&self) -> bool {
            false
        }

        fn start_transcoding(&mut self) -> bool {
            self.started = !self.config.fail_start;
            self.started
        }

        fn level_info(&self, mip: u32, _layer: u32) -> Option<LevelInfo> {
            if mip >= self.config.level_count {
                return None;
            }
            let orig_width = (self.config.width >> mip).max(1);
            let orig_height = (self.config.height >> mip).max(1);
            Some(LevelInfo {
                width: orig_width.next_multiple_of(4),
                height: orig_height.next_multiple_of(4),
                orig_width,
                orig_height,
            })
        }

        fn transcoded_size(
            &self,
            mip: u32,
            _layer: u32,
            _format: TranscoderFormat,
        ) -> Option<usize> {
            (mip < self.config.level_count).then_some(IMAGE_SIZE)
        }

        fn transcode_image(
            &mut self,
            dst: &mut [u8],
            mip: u32,
            layer: u32,
            _format: TranscoderFormat,
        ) -> bool {
            if !self.started {
                return false;
            }
            if self.config.fail_at == Some((mip, layer)) {
                return false;
            }
            dst.fill(image_byte(mip, layer));
            true
        }
    }

    pub struct MockEngine {
        config: MockConfig,
        stats: Arc<MockStats>,
    }

    impl TranscoderEngine for MockEngine {
        fn open(&self, _bytes: &[u8]) -> Box<dyn ContainerHandle> {
            self.stats.opened.fetch_add(1, Ordering::SeqCst);
            Box::new(MockHandle {
                config: self.config.clone(),
                stats: self.stats.clone(),
                started: false,
            })
        }
    }

    pub struct MockFactory {
        pub config: MockConfig,
        pub stats: Arc<MockStats>,
        pub fail_fetch: bool,
        /// When set, the fetch resolves only once a permit is added
        pub fetch_gate: Option<Arc<tokio::sync::Semaphore>>,
    }

    impl MockFactory {
        pub fn new(config: MockConfig) -> Self {
            Self {
                config,
                stats: Arc::new(MockStats::default()),
                fail_fetch: false,
                fetch_gate: None,
            }
        }
    }

    impl EngineFactory for MockFactory {
        fn fetch_artifacts(&self) -> BoxFuture<'static, Result<EngineArtifacts>> {
            self.stats.fetches.fetch_add(1, Ordering::SeqCst);
            let fail = self.fail_fetch;
            let gate = self.fetch_gate.clone();
            Box::pin(async move {
                if let Some(gate) = gate {
                    gate.acquire().await?.forget();
                }
                if fail {
                    anyhow::bail!("artifact fetch refused");
                }
                Ok(EngineArtifacts {
                    module: vec![0xB5; 4],
                    binary: vec![0x5B; 4],
                })
            })
        }

        fn create_engine(
            &self,
            _artifacts: &EngineArtifacts,
            _caps: &Capabilities,
        ) -> Result<Box<dyn TranscoderEngine>> {
            self.stats.engines_created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockEngine {
                config: self.config.clone(),
                stats: self.stats.clone(),
            }))
        }
    }
}
