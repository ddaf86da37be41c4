//! Bounded-concurrency comparison service.
//!
//! A host (HTTP handler, queue consumer) owns one [`ComparisonService`] and
//! calls [`ComparisonService::compare`] per request. The service:
//!
//! 1. validates the request (media type allow-list, size limit, config),
//! 2. waits for one of `max_concurrent` permits, optionally bounded by a
//!    queue timeout,
//! 3. runs the pipeline on its own rayon pool and hands the outcome back over
//!    a oneshot channel, turning worker panics into
//!    [`ComparisonError::Internal`].
//!
//! The permit travels with the job, so a caller that stops waiting does not
//! free a slot while its pipeline is still running. Requests are independent;
//! there is no ordering between them.

use crate::compare::process_comparison;
use crate::config::ComparisonConfig;
use crate::error::ComparisonError;
use crate::output::ComparisonResult;
use crate::pipeline::load::PageSource;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

/// Media types accepted by default.
pub const DEFAULT_ALLOWED_MEDIA_TYPES: [&str; 6] = [
    "image/jpeg",
    "image/png",
    "image/gif",
    "application/pdf",
    "image/tiff",
    "image/tif",
];

/// Default per-file size limit: 30 MiB.
pub const DEFAULT_MAX_FILE_SIZE: usize = 30 * 1024 * 1024;

/// Service-level settings.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Pipelines allowed to run at once. Default: 5.
    pub max_concurrent: usize,
    /// Longest a request may wait for a slot. `None` waits indefinitely.
    pub queue_timeout: Option<Duration>,
    /// Per-file byte limit. Default: 30 MiB.
    pub max_file_size: usize,
    pub allowed_media_types: Vec<String>,
    /// Worker threads for the pipeline pool; 0 means one per CPU core.
    pub worker_threads: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            queue_timeout: None,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            allowed_media_types: DEFAULT_ALLOWED_MEDIA_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            worker_threads: 0,
        }
    }
}

/// Two documents and the settings to compare them with.
#[derive(Debug, Clone)]
pub struct ComparisonRequest {
    pub file_a: PageSource,
    pub file_b: PageSource,
    pub config: ComparisonConfig,
}

impl ComparisonRequest {
    /// Build a request whose pages come from `config.page_a` / `config.page_b`.
    pub fn new(
        bytes_a: impl Into<Vec<u8>>,
        media_type_a: impl Into<String>,
        bytes_b: impl Into<Vec<u8>>,
        media_type_b: impl Into<String>,
        config: ComparisonConfig,
    ) -> Self {
        Self {
            file_a: PageSource::new(bytes_a, media_type_a).with_page(config.page_a),
            file_b: PageSource::new(bytes_b, media_type_b).with_page(config.page_b),
            config,
        }
    }
}

/// Runs comparisons with a cap on concurrent pipelines.
pub struct ComparisonService {
    config: ServiceConfig,
    permits: Arc<Semaphore>,
    pool: Arc<rayon::ThreadPool>,
}

impl ComparisonService {
    pub fn new(config: ServiceConfig) -> Result<Self, ComparisonError> {
        if config.max_concurrent == 0 {
            return Err(ComparisonError::InvalidConfig(
                "max_concurrent must be ≥ 1".into(),
            ));
        }
        let threads = if config.worker_threads == 0 {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        } else {
            config.worker_threads
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("docdiff-worker-{i}"))
            .build()
            .map_err(|e| ComparisonError::Internal(format!("worker pool: {e}")))?;

        info!(
            max_concurrent = config.max_concurrent,
            threads,
            "Comparison service ready"
        );
        Ok(Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            pool: Arc::new(pool),
            config,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Slots free right now.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Reject requests the pipeline should never see.
    pub fn validate(&self, request: &ComparisonRequest) -> Result<(), ComparisonError> {
        for source in [&request.file_a, &request.file_b] {
            self.check_media_type(&source.media_type)?;
            if source.bytes.len() > self.config.max_file_size {
                return Err(ComparisonError::FileTooLarge {
                    size: source.bytes.len(),
                    max: self.config.max_file_size,
                });
            }
        }
        request.config.validate()
    }

    fn check_media_type(&self, media_type: &str) -> Result<(), ComparisonError> {
        // Ignore parameters such as `; charset=binary`.
        let essence = media_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if self
            .config
            .allowed_media_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&essence))
        {
            return Ok(());
        }
        Err(ComparisonError::UnsupportedMediaType {
            media_type: media_type.to_string(),
            allowed: self.config.allowed_media_types.join(", "),
        })
    }

    /// Validate, wait for a slot, and run the comparison.
    pub async fn compare(
        &self,
        request: ComparisonRequest,
    ) -> Result<ComparisonResult, ComparisonError> {
        self.validate(&request)?;
        let permit = self.acquire().await?;
        self.run_on_pool(permit, move || {
            process_comparison(&request.file_a, &request.file_b, &request.config)
        })
        .await
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit, ComparisonError> {
        let start = Instant::now();
        let waiting = Arc::clone(&self.permits).acquire_owned();
        let permit = match self.config.queue_timeout {
            Some(limit) => tokio::time::timeout(limit, waiting).await.map_err(|_| {
                let waited_ms = start.elapsed().as_millis() as u64;
                warn!("Comparison queue timed out after {}ms", waited_ms);
                ComparisonError::QueueTimeout { waited_ms }
            })?,
            None => waiting.await,
        }
        .map_err(|_| ComparisonError::Internal("comparison service is shut down".into()))?;

        debug!(
            "Acquired comparison slot after {}ms ({} free)",
            start.elapsed().as_millis(),
            self.permits.available_permits()
        );
        Ok(permit)
    }

    /// Run `job` on the worker pool, holding `permit` until it finishes.
    async fn run_on_pool<T, F>(
        &self,
        permit: OwnedSemaphorePermit,
        job: F,
    ) -> Result<T, ComparisonError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, ComparisonError> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.pool.spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|panic| {
                let message = panic_message(panic.as_ref());
                error!("Comparison worker panicked: {}", message);
                Err(ComparisonError::Internal(format!("worker panicked: {message}")))
            });
            drop(permit);
            // The caller may have stopped waiting; nothing to do then.
            let _ = tx.send(outcome);
        });
        rx.await.map_err(|_| {
            ComparisonError::Internal("worker exited without reporting a result".into())
        })?
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(config: ServiceConfig) -> ComparisonService {
        ComparisonService::new(config).expect("service")
    }

    fn request(type_a: &str, bytes_a: usize) -> ComparisonRequest {
        ComparisonRequest::new(
            vec![0u8; bytes_a],
            type_a,
            vec![0u8; 8],
            "image/png",
            ComparisonConfig::default(),
        )
    }

    #[test]
    fn rejects_zero_concurrency() {
        let err = ComparisonService::new(ServiceConfig {
            max_concurrent: 0,
            ..ServiceConfig::default()
        })
        .err()
        .expect("must fail");
        assert!(matches!(err, ComparisonError::InvalidConfig(_)));
    }

    #[test]
    fn media_type_allow_list() {
        let svc = service(ServiceConfig::default());
        assert!(svc.validate(&request("image/tiff", 8)).is_ok());
        assert!(svc.validate(&request("Application/PDF", 8)).is_ok());
        assert!(svc.validate(&request("image/png; charset=binary", 8)).is_ok());
        let err = svc.validate(&request("image/webp", 8)).unwrap_err();
        match err {
            ComparisonError::UnsupportedMediaType { media_type, allowed } => {
                assert_eq!(media_type, "image/webp");
                assert!(allowed.contains("application/pdf"));
            }
            other => panic!("expected UnsupportedMediaType, got {other:?}"),
        }
    }

    #[test]
    fn size_limit() {
        let svc = service(ServiceConfig {
            max_file_size: 100,
            ..ServiceConfig::default()
        });
        assert!(svc.validate(&request("image/png", 100)).is_ok());
        assert!(matches!(
            svc.validate(&request("image/png", 101)),
            Err(ComparisonError::FileTooLarge { size: 101, max: 100 })
        ));
    }

    #[test]
    fn request_pages_follow_config() {
        let config = ComparisonConfig::builder().page_a(2).page_b(4).build().unwrap();
        let req = ComparisonRequest::new(vec![1], "application/pdf", vec![2], "image/tiff", config);
        assert_eq!(req.file_a.page, 2);
        assert_eq!(req.file_b.page, 4);
    }

    #[tokio::test]
    async fn saturated_service_times_out() {
        let svc = service(ServiceConfig {
            max_concurrent: 1,
            queue_timeout: Some(Duration::from_millis(20)),
            ..ServiceConfig::default()
        });
        let _held = Arc::clone(&svc.permits).acquire_owned().await.unwrap();
        assert_eq!(svc.available_permits(), 0);

        let err = svc.compare(request("image/png", 8)).await.unwrap_err();
        assert!(matches!(err, ComparisonError::QueueTimeout { .. }), "got {err:?}");
        assert!(!err.is_user_error());
    }

    #[tokio::test]
    async fn worker_panic_becomes_internal_error() {
        let svc = service(ServiceConfig::default());
        let permit = svc.acquire().await.unwrap();
        let result: Result<(), _> = svc
            .run_on_pool(permit, || panic!("boom in worker"))
            .await;
        match result {
            Err(ComparisonError::Internal(msg)) => assert!(msg.contains("boom in worker")),
            other => panic!("expected Internal, got {other:?}"),
        }
        assert_eq!(svc.available_permits(), 5);
    }

    #[tokio::test]
    async fn permit_is_released_after_job() {
        let svc = service(ServiceConfig {
            max_concurrent: 2,
            ..ServiceConfig::default()
        });
        let permit = svc.acquire().await.unwrap();
        assert_eq!(svc.available_permits(), 1);
        let value = svc.run_on_pool(permit, || Ok(41 + 1)).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(svc.available_permits(), 2);
    }
}
