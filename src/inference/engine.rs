//! Inference engine implementation
//!
//! Owns at most one loaded model and serves classification requests against it.
//!
//! # Architecture
//!
//! Backend model and context types are not safe for concurrent evaluation, so
//! every operation (`load`, `classify`, `unload`) runs under a single mutex held
//! for the operation's full duration. Inference is serialized; callers on many
//! threads queue on the lock.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use thiserror::Error;

use crate::inference::backend::{BackendError, InferenceBackend};
use crate::inference::config::ModelConfiguration;
use crate::inference::handle::ModelHandle;
use crate::truncate_str;
use crate::types::{ClassificationRequest, ClassificationResult, EngineState};

/// Errors that can occur while loading a model
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LoadError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to load model: {0}")]
    ModelLoadFailed(String),

    #[error("Failed to create context: {0}")]
    ContextInitFailed(String),
}

/// Errors that can occur during classification
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClassifyError {
    #[error("No model loaded")]
    NotLoaded,

    #[error("Inference failed: {0}")]
    InferenceError(String),
}

/// What a successful [`InferenceEngine::try_load`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// This call bound the model
    Loaded,
    /// A model was already bound; the requested one was ignored
    AlreadyLoaded,
}

impl From<BackendError> for ClassifyError {
    fn from(e: BackendError) -> Self {
        ClassifyError::InferenceError(e.to_string())
    }
}

/// Thread-safe text classification engine
///
/// Starts `Unloaded`. The first successful [`load`](Self::load) binds a model;
/// later loads are no-ops until [`unload`](Self::unload) is called.
pub struct InferenceEngine<B: InferenceBackend> {
    backend: B,
    slot: Mutex<Option<ModelHandle<B>>>,
}

impl<B: InferenceBackend> InferenceEngine<B> {
    /// Creates an unloaded engine over `backend`
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            slot: Mutex::new(None),
        }
    }

    /// Loads the model described by `config`
    ///
    /// Returns `Ok(true)` once a model is bound, including when one was already
    /// loaded (first load wins; `config` is then ignored). On failure the engine
    /// stays `Unloaded` with no resources held.
    pub fn load(&self, config: ModelConfiguration) -> Result<bool, LoadError> {
        self.try_load(config).map(|_| true)
    }

    /// [`load`](Self::load), reporting whether this call bound the model
    ///
    /// The check and the load happen under one lock, so among concurrent
    /// callers exactly one sees [`LoadOutcome::Loaded`].
    pub fn try_load(&self, config: ModelConfiguration) -> Result<LoadOutcome, LoadError> {
        let mut slot = self.lock();

        if let Some(handle) = slot.as_ref() {
            tracing::debug!(
                "Model already loaded from {:?}, ignoring load of {:?}",
                handle.config().file_path(),
                config.file_path()
            );
            return Ok(LoadOutcome::AlreadyLoaded);
        }

        let path = config.file_path();
        if path.as_os_str().is_empty() {
            return Err(LoadError::InvalidArgument(
                "model path must not be empty".to_string(),
            ));
        }
        if !path.is_file() {
            return Err(LoadError::ModelLoadFailed(format!(
                "model file not found: {}",
                path.display()
            )));
        }

        self.backend
            .init_runtime()
            .map_err(|e| LoadError::ModelLoadFailed(e.to_string()))?;

        let started = Instant::now();
        let handle = ModelHandle::open(&self.backend, &config)?;
        tracing::info!(
            "Model loaded from {} (n_ctx={}) in {:?}",
            path.display(),
            config.context_size(),
            started.elapsed()
        );

        *slot = Some(handle);
        Ok(LoadOutcome::Loaded)
    }

    /// Classifies `request` with the loaded model
    pub fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResult, ClassifyError> {
        let mut slot = self.lock();
        let handle = slot.as_mut().ok_or(ClassifyError::NotLoaded)?;

        let started = Instant::now();
        let raw = handle.infer(&self.backend, request)?;

        if raw.label.is_empty() {
            return Err(ClassifyError::InferenceError(
                "backend returned an empty label".to_string(),
            ));
        }
        let score = raw.score;
        let result = ClassificationResult::new(raw.label, score).ok_or_else(|| {
            ClassifyError::InferenceError(format!("non-finite score {score}"))
        })?;

        tracing::debug!(
            "Classified {:?} as {} ({:.3}) in {:?}",
            truncate_str(request.text(), 64),
            result.label,
            result.score,
            started.elapsed()
        );
        Ok(result)
    }

    /// Releases the loaded model, context first. No-op when nothing is loaded.
    pub fn unload(&self) {
        let mut slot = self.lock();
        if let Some(handle) = slot.take() {
            let path = handle.config().file_path().to_path_buf();
            drop(handle);
            tracing::info!("Model unloaded: {}", path.display());
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> EngineState {
        if self.lock().is_some() {
            EngineState::Loaded
        } else {
            EngineState::Unloaded
        }
    }

    /// Returns true if a model is currently loaded
    pub fn is_loaded(&self) -> bool {
        self.state() == EngineState::Loaded
    }

    /// Configuration of the bound model, if any
    pub fn loaded_config(&self) -> Option<ModelConfiguration> {
        self.lock().as_ref().map(|handle| handle.config().clone())
    }

    /// The backend this engine drives
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// A panic inside a backend call poisons the mutex; the slot itself is
    /// still either empty or a fully built handle, so keep serving.
    fn lock(&self) -> MutexGuard<'_, Option<ModelHandle<B>>> {
        self.slot.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
            tracing::warn!("Engine lock was poisoned by a panicking caller, recovering");
            poisoned.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Label;
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    type EventLog = Arc<Mutex<Vec<&'static str>>>;

    struct MockModel {
        log: EventLog,
    }

    impl Drop for MockModel {
        fn drop(&mut self) {
            self.log.lock().unwrap().push("drop model");
        }
    }

    struct MockContext {
        log: EventLog,
    }

    impl Drop for MockContext {
        fn drop(&mut self) {
            self.log.lock().unwrap().push("drop context");
        }
    }

    #[derive(Default)]
    struct MockBackend {
        log: EventLog,
        runtime_inits: AtomicUsize,
        fail_model: AtomicBool,
        fail_context: bool,
        infer_score: Option<f32>,
        fail_infer: bool,
        panic_infer: bool,
    }

    impl MockBackend {
        fn events(&self) -> Vec<&'static str> {
            self.log.lock().unwrap().clone()
        }
    }

    impl InferenceBackend for MockBackend {
        type Model = MockModel;
        type Context = MockContext;

        fn init_runtime(&self) -> Result<(), BackendError> {
            self.runtime_inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn load_model(&self, _config: &ModelConfiguration) -> Result<MockModel, BackendError> {
            if self.fail_model.load(Ordering::SeqCst) {
                return Err(BackendError::Model("corrupt weights".to_string()));
            }
            self.log.lock().unwrap().push("load model");
            Ok(MockModel {
                log: self.log.clone(),
            })
        }

        fn create_context(
            &self,
            _model: &MockModel,
            _config: &ModelConfiguration,
        ) -> Result<MockContext, BackendError> {
            if self.fail_context {
                return Err(BackendError::Context("out of memory".to_string()));
            }
            self.log.lock().unwrap().push("create context");
            Ok(MockContext {
                log: self.log.clone(),
            })
        }

        fn infer(
            &self,
            _model: &MockModel,
            _context: &mut MockContext,
            _config: &ModelConfiguration,
            request: &ClassificationRequest,
        ) -> Result<ClassificationResult, BackendError> {
            if self.panic_infer {
                panic!("backend blew up");
            }
            if self.fail_infer {
                return Err(BackendError::Inference("decode failed".to_string()));
            }
            let score = self.infer_score.unwrap_or(if request.text().contains("hate") {
                0.9
            } else {
                0.1
            });
            let label = if score >= 0.5 {
                Label::Hate
            } else {
                Label::NotHate
            };
            Ok(ClassificationResult { label, score })
        }
    }

    fn model_file() -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".gguf").tempfile().unwrap();
        file.write_all(b"weights").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_engine_new() {
        let engine = InferenceEngine::new(MockBackend::default());
        assert_eq!(engine.state(), EngineState::Unloaded);
        assert!(!engine.is_loaded());
        assert!(engine.loaded_config().is_none());
    }

    #[test]
    fn test_classify_before_load() {
        let engine = InferenceEngine::new(MockBackend::default());
        let result = engine.classify(&ClassificationRequest::new("hello world"));
        assert_eq!(result, Err(ClassifyError::NotLoaded));
    }

    #[test]
    fn test_load_then_classify() {
        let file = model_file();
        let engine = InferenceEngine::new(MockBackend::default());

        assert_eq!(engine.load(ModelConfiguration::new(file.path())), Ok(true));
        assert_eq!(engine.state(), EngineState::Loaded);

        let request =
            ClassificationRequest::new("some input text").with_prompt("classify sentiment");
        let result = engine.classify(&request).unwrap();
        assert_eq!(result.label, Label::NotHate);
        assert!((0.0..=1.0).contains(&result.score));
    }

    #[test]
    fn test_first_load_wins() {
        let first = model_file();
        let second = model_file();
        let engine = InferenceEngine::new(MockBackend::default());

        assert_eq!(engine.load(ModelConfiguration::new(first.path())), Ok(true));
        assert_eq!(engine.load(ModelConfiguration::new(second.path())), Ok(true));

        let bound = engine.loaded_config().unwrap();
        assert_eq!(bound.file_path(), first.path());
        assert_eq!(engine.backend().events(), vec!["load model", "create context"]);
    }

    #[test]
    fn test_concurrent_loads_report_one_fresh_load() {
        let file = model_file();
        let engine = Arc::new(InferenceEngine::new(MockBackend::default()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                let path = file.path().to_path_buf();
                std::thread::spawn(move || engine.try_load(ModelConfiguration::new(path)).unwrap())
            })
            .collect();
        let outcomes: Vec<LoadOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let fresh = outcomes.iter().filter(|o| **o == LoadOutcome::Loaded).count();
        assert_eq!(fresh, 1);
        assert_eq!(engine.backend().runtime_inits.load(Ordering::SeqCst), 1);
        assert_eq!(engine.backend().events(), vec!["load model", "create context"]);
    }

    #[test]
    fn test_empty_path_is_invalid_argument() {
        let engine = InferenceEngine::new(MockBackend::default());
        let result = engine.load(ModelConfiguration::new(""));
        assert!(matches!(result, Err(LoadError::InvalidArgument(_))));
        assert_eq!(engine.state(), EngineState::Unloaded);
        assert_eq!(engine.backend().runtime_inits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_file_fails_cleanly() {
        let engine = InferenceEngine::new(MockBackend::default());
        let result = engine.load(ModelConfiguration::new("missing/file.bin"));
        assert!(matches!(result, Err(LoadError::ModelLoadFailed(_))));
        assert_eq!(engine.state(), EngineState::Unloaded);
    }

    #[test]
    fn test_model_failure_then_retry() {
        let file = model_file();
        let engine = InferenceEngine::new(MockBackend {
            fail_model: AtomicBool::new(true),
            ..Default::default()
        });
        let result = engine.load(ModelConfiguration::new(file.path()));
        assert!(matches!(result, Err(LoadError::ModelLoadFailed(_))));
        assert_eq!(engine.state(), EngineState::Unloaded);

        engine.backend().fail_model.store(false, Ordering::SeqCst);
        assert_eq!(engine.load(ModelConfiguration::new(file.path())), Ok(true));
        assert!(engine.is_loaded());
    }

    #[test]
    fn test_context_failure_releases_model() {
        let file = model_file();
        let engine = InferenceEngine::new(MockBackend {
            fail_context: true,
            ..Default::default()
        });

        let result = engine.load(ModelConfiguration::new(file.path()));
        assert!(matches!(result, Err(LoadError::ContextInitFailed(_))));
        assert_eq!(engine.state(), EngineState::Unloaded);
        assert_eq!(engine.backend().events(), vec!["load model", "drop model"]);
    }

    #[test]
    fn test_unload_releases_context_then_model() {
        let file = model_file();
        let engine = InferenceEngine::new(MockBackend::default());
        engine.load(ModelConfiguration::new(file.path())).unwrap();

        engine.unload();

        assert_eq!(engine.state(), EngineState::Unloaded);
        assert_eq!(
            engine.backend().events(),
            vec!["load model", "create context", "drop context", "drop model"]
        );
        assert_eq!(
            engine.classify(&ClassificationRequest::new("hello")),
            Err(ClassifyError::NotLoaded)
        );
    }

    #[test]
    fn test_unload_without_model() {
        let engine = InferenceEngine::new(MockBackend::default());
        // Should not panic
        engine.unload();
        engine.unload();
        assert!(!engine.is_loaded());
        assert!(engine.backend().events().is_empty());
    }

    #[test]
    fn test_reload_after_unload() {
        let file = model_file();
        let engine = InferenceEngine::new(MockBackend::default());
        engine.load(ModelConfiguration::new(file.path())).unwrap();
        engine.unload();

        assert_eq!(engine.load(ModelConfiguration::new(file.path())), Ok(true));
        assert!(engine.is_loaded());
        assert_eq!(engine.backend().runtime_inits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_inference_failure_keeps_model_loaded() {
        let file = model_file();
        let engine = InferenceEngine::new(MockBackend {
            fail_infer: true,
            ..Default::default()
        });
        engine.load(ModelConfiguration::new(file.path())).unwrap();

        let result = engine.classify(&ClassificationRequest::new("hello"));
        assert!(matches!(result, Err(ClassifyError::InferenceError(_))));
        assert!(engine.is_loaded());
    }

    #[test]
    fn test_non_finite_score_is_inference_error() {
        let file = model_file();
        let engine = InferenceEngine::new(MockBackend {
            infer_score: Some(f32::NAN),
            ..Default::default()
        });
        engine.load(ModelConfiguration::new(file.path())).unwrap();

        let result = engine.classify(&ClassificationRequest::new("hello"));
        assert!(matches!(result, Err(ClassifyError::InferenceError(_))));
    }

    #[test]
    fn test_out_of_range_score_is_clamped() {
        let file = model_file();
        let engine = InferenceEngine::new(MockBackend {
            infer_score: Some(3.5),
            ..Default::default()
        });
        engine.load(ModelConfiguration::new(file.path())).unwrap();

        let result = engine.classify(&ClassificationRequest::new("hello")).unwrap();
        assert_eq!(result.score, 1.0);
    }

    #[test]
    fn test_recovers_from_panicking_backend() {
        let file = model_file();
        let engine = Arc::new(InferenceEngine::new(MockBackend {
            panic_infer: true,
            ..Default::default()
        }));
        engine.load(ModelConfiguration::new(file.path())).unwrap();

        let worker = engine.clone();
        let joined = std::thread::spawn(move || {
            let _ = worker.classify(&ClassificationRequest::new("boom"));
        })
        .join();
        assert!(joined.is_err());

        assert!(engine.is_loaded());
        engine.unload();
        assert_eq!(engine.state(), EngineState::Unloaded);
    }

    #[test]
    fn test_drop_releases_handle() {
        let file = model_file();
        let backend = MockBackend::default();
        let log = backend.log.clone();
        let engine = InferenceEngine::new(backend);
        engine.load(ModelConfiguration::new(file.path())).unwrap();

        drop(engine);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["load model", "create context", "drop context", "drop model"]
        );
    }
}
