//! llama.cpp backend
//!
//! Runs classification prompts through a GGUF model with `llama-cpp-2`.
//!
//! # Architecture
//!
//! `LlamaModel` and `LlamaContext` hold raw pointers that are not `Send`, and the
//! context borrows the model it was created from. Each loaded model therefore
//! lives on its own worker thread together with its context; the engine's
//! handles ([`LlamaWorker`], [`LlamaSession`]) only own the channel to it.
//! Commands are processed in order, so dropping the session before the worker
//! frees the context before the model.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaChatMessage, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;

use crate::inference::backend::{BackendError, InferenceBackend};
use crate::inference::config::ModelConfiguration;
use crate::inference::gguf;
use crate::inference::prompt;
use crate::inference::runtime::RuntimeCell;
use crate::types::{ClassificationRequest, ClassificationResult};

static RUNTIME: RuntimeCell<LlamaBackend> = RuntimeCell::new();

fn runtime() -> Result<&'static LlamaBackend, BackendError> {
    RUNTIME.get_or_init(|| {
        let backend = LlamaBackend::init().map_err(|e| BackendError::Runtime(e.to_string()))?;
        tracing::info!("llama.cpp backend initialized");
        Ok(backend)
    })
}

/// Commands sent to the worker thread
enum WorkerCommand {
    CreateContext {
        n_ctx: NonZeroU32,
        response_tx: Sender<Result<(), String>>,
    },
    Complete {
        prompt: String,
        max_tokens: NonZeroU32,
        response_tx: Sender<Result<String, String>>,
    },
    DropContext,
    Shutdown,
}

/// Worker thread owning one loaded model
pub struct LlamaWorker {
    command_tx: Option<Sender<WorkerCommand>>,
    worker_handle: Option<JoinHandle<()>>,
}

impl LlamaWorker {
    /// Spawns a worker and waits until it has loaded the model at `path`
    fn spawn(path: PathBuf, gpu_layers: u32) -> Result<Self, BackendError> {
        let (command_tx, command_rx) = mpsc::channel::<WorkerCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

        let handle = thread::Builder::new()
            .name("llama-worker".to_string())
            .spawn(move || worker_thread_main(path, gpu_layers, command_rx, ready_tx))
            .map_err(|e| BackendError::Model(format!("Failed to spawn worker thread: {e}")))?;

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err("worker thread exited during load".to_string()));
        if let Err(e) = ready {
            let _ = handle.join();
            return Err(BackendError::Model(e));
        }

        Ok(Self {
            command_tx: Some(command_tx),
            worker_handle: Some(handle),
        })
    }

    fn sender(&self) -> Result<Sender<WorkerCommand>, BackendError> {
        self.command_tx
            .clone()
            .ok_or_else(|| BackendError::Context("worker thread stopped".to_string()))
    }
}

impl Drop for LlamaWorker {
    fn drop(&mut self) {
        if let Some(tx) = self.command_tx.take() {
            let _ = tx.send(WorkerCommand::Shutdown);
        }
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}

/// Evaluation context held by a [`LlamaWorker`]
pub struct LlamaSession {
    command_tx: Sender<WorkerCommand>,
}

impl LlamaSession {
    fn complete(&self, prompt: String, max_tokens: NonZeroU32) -> Result<String, BackendError> {
        let (response_tx, response_rx) = mpsc::channel();
        self.command_tx
            .send(WorkerCommand::Complete {
                prompt,
                max_tokens,
                response_tx,
            })
            .map_err(|e| BackendError::Inference(format!("worker thread stopped: {e}")))?;
        response_rx
            .recv()
            .map_err(|e| BackendError::Inference(format!("worker thread stopped: {e}")))?
            .map_err(BackendError::Inference)
    }
}

impl Drop for LlamaSession {
    fn drop(&mut self) {
        let _ = self.command_tx.send(WorkerCommand::DropContext);
    }
}

/// [`InferenceBackend`] backed by llama.cpp
#[derive(Debug, Clone, Copy, Default)]
pub struct LlamaCppBackend;

impl LlamaCppBackend {
    pub fn new() -> Self {
        Self
    }
}

impl InferenceBackend for LlamaCppBackend {
    type Model = LlamaWorker;
    type Context = LlamaSession;

    fn init_runtime(&self) -> Result<(), BackendError> {
        runtime().map(|_| ())
    }

    fn load_model(&self, config: &ModelConfiguration) -> Result<LlamaWorker, BackendError> {
        let path = config.file_path();
        // Header check stays on the caller thread; it is plain file I/O
        let header = gguf::read_header(path).map_err(|e| BackendError::Model(e.to_string()))?;
        tracing::debug!(
            "GGUF v{} header ok for {} ({} tensors)",
            header.version,
            path.display(),
            header.tensor_count
        );

        LlamaWorker::spawn(path.to_path_buf(), config.gpu_layers())
    }

    fn create_context(
        &self,
        model: &LlamaWorker,
        config: &ModelConfiguration,
    ) -> Result<LlamaSession, BackendError> {
        let command_tx = model.sender()?;
        let (response_tx, response_rx) = mpsc::channel();
        command_tx
            .send(WorkerCommand::CreateContext {
                n_ctx: config.context_size(),
                response_tx,
            })
            .map_err(|e| BackendError::Context(format!("worker thread stopped: {e}")))?;
        response_rx
            .recv()
            .map_err(|e| BackendError::Context(format!("worker thread stopped: {e}")))?
            .map_err(BackendError::Context)?;

        Ok(LlamaSession { command_tx })
    }

    fn infer(
        &self,
        _model: &LlamaWorker,
        session: &mut LlamaSession,
        config: &ModelConfiguration,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResult, BackendError> {
        let rendered = prompt::render(request.prompt(), request.text());
        let completion = session.complete(rendered, config.max_tokens())?;
        tracing::trace!("Completion: {completion:?}");

        prompt::parse_completion(&completion).map_err(|e| BackendError::Inference(e.to_string()))
    }
}

/// Worker thread main loop
///
/// Owns the model and at most one context borrowing it. Locals drop in reverse
/// order, so the context always goes first.
fn worker_thread_main(
    path: PathBuf,
    gpu_layers: u32,
    command_rx: Receiver<WorkerCommand>,
    ready_tx: Sender<Result<(), String>>,
) {
    let model = match load_model_on_worker(&path, gpu_layers) {
        Ok(model) => {
            let _ = ready_tx.send(Ok(()));
            model
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    let mut context: Option<(LlamaContext<'_>, u32)> = None;

    loop {
        match command_rx.recv() {
            Ok(WorkerCommand::CreateContext { n_ctx, response_tx }) => {
                context = None;
                let result = match new_context(&model, n_ctx) {
                    Ok(ctx) => {
                        context = Some((ctx, n_ctx.get()));
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                let _ = response_tx.send(result);
            }
            Ok(WorkerCommand::Complete {
                prompt,
                max_tokens,
                response_tx,
            }) => {
                let result = match context.as_mut() {
                    Some((ctx, n_ctx)) => {
                        let input = match build_chat_prompt(&model, &prompt) {
                            Ok(chat_prompt) => chat_prompt,
                            Err(error) => {
                                tracing::trace!("Chat template not applied: {error}");
                                prompt
                            }
                        };
                        run_completion(&model, ctx, *n_ctx, &input, max_tokens)
                    }
                    None => Err("no context bound to model".to_string()),
                };
                let _ = response_tx.send(result);
            }
            Ok(WorkerCommand::DropContext) => {
                context = None;
                tracing::debug!("Context released in worker thread");
            }
            Ok(WorkerCommand::Shutdown) | Err(_) => break,
        }
    }

    drop(context);
    drop(model);
    tracing::debug!("Model released, worker exiting");
}

fn load_model_on_worker(path: &Path, gpu_layers: u32) -> Result<LlamaModel, String> {
    let backend = runtime().map_err(|e| e.to_string())?;
    let params = LlamaModelParams::default().with_n_gpu_layers(gpu_layers);
    let model = LlamaModel::load_from_file(backend, path, &params).map_err(|e| e.to_string())?;

    tracing::info!(
        "Model weights loaded: {} params, {} vocab, {} ctx trained",
        model.n_params(),
        model.n_vocab(),
        model.n_ctx_train()
    );
    Ok(model)
}

fn new_context(model: &LlamaModel, n_ctx: NonZeroU32) -> Result<LlamaContext<'_>, String> {
    let backend = runtime().map_err(|e| e.to_string())?;
    let params = LlamaContextParams::default()
        .with_n_ctx(Some(n_ctx))
        .with_n_batch(n_ctx.get());
    model
        .new_context(backend, params)
        .map_err(|e| e.to_string())
}

fn build_chat_prompt(model: &LlamaModel, prompt: &str) -> Result<String, String> {
    let template = model
        .chat_template(None)
        .map_err(|e| format!("Failed to load chat template: {e}"))?;
    let user_message = LlamaChatMessage::new("user".to_string(), prompt.to_string())
        .map_err(|e| format!("Failed to build chat message: {e}"))?;
    model
        .apply_chat_template(&template, &[user_message], true)
        .map_err(|e| format!("Failed to apply chat template: {e}"))
}

/// Greedy decode until end of generation, a closed JSON object, or `max_tokens`
fn run_completion(
    model: &LlamaModel,
    ctx: &mut LlamaContext<'_>,
    n_ctx: u32,
    input: &str,
    max_tokens: NonZeroU32,
) -> Result<String, String> {
    let tokens = model
        .str_to_token(input, AddBos::Always)
        .map_err(|e| format!("Failed to tokenize: {e}"))?;
    prompt::check_budget(tokens.len(), max_tokens, n_ctx).map_err(|e| e.to_string())?;

    // A previous call may have failed mid-decode; start from an empty cache.
    ctx.clear_kv_cache();

    let mut batch = LlamaBatch::new(n_ctx as usize, 1);
    let last = tokens.len() - 1;
    for (i, token) in tokens.iter().enumerate() {
        batch
            .add(*token, i as i32, &[0], i == last)
            .map_err(|e| format!("Failed to add token to batch: {e}"))?;
    }
    ctx.decode(&mut batch)
        .map_err(|e| format!("Failed to decode prompt: {e}"))?;

    let mut sampler = LlamaSampler::greedy();
    let mut n_cur = tokens.len() as i32;
    let mut bytes: Vec<u8> = Vec::new();

    for _ in 0..max_tokens.get() {
        let token = sampler.sample(ctx, batch.n_tokens() - 1);
        sampler.accept(token);

        if model.is_eog_token(token) {
            break;
        }

        let piece = model
            .token_to_bytes(token, Special::Tokenize)
            .map_err(|e| format!("Failed to convert token to bytes: {e}"))?;
        bytes.extend_from_slice(&piece);

        if prompt::is_complete(&String::from_utf8_lossy(&bytes)) {
            break;
        }

        batch.clear();
        batch
            .add(token, n_cur, &[0], true)
            .map_err(|e| format!("Failed to add token to batch: {e}"))?;
        ctx.decode(&mut batch)
            .map_err(|e| format!("Failed to decode: {e}"))?;
        n_cur += 1;
    }

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
