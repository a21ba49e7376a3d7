// Client facade for the remote classinet inference service.
//
// The service itself (model runtime, billing, token validation) is remote;
// `InferenceService` is the contract it has to satisfy and `Client`/`Model`
// are thin, thread-safe handles over it. A `Client` is an ordinary value the
// caller passes around; there is no process-wide instance.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::error::{ClassinetError, Result};
use crate::metadata::ModelMetadata;
use crate::workers::{WorkerPool, DEFAULT_WORKERS};

/// Longest accepted per-request user context.
pub const MAX_USER_CONTEXT: usize = 128;

/// Receives the outcome of an async inference, exactly once.
pub type InferenceCallback = Box<dyn FnOnce(Result<String>) + Send + 'static>;

/// Identity sent with every call, for billing and log correlation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_token: String,
    pub instance_description: String,
    pub instance_id: String,
}

/// What the remote service must provide. Implementations must be callable
/// from several threads at once.
pub trait InferenceService: Send + Sync {
    /// Validate the credentials and open a session.
    fn connect(&self, credentials: &Credentials) -> Result<()>;

    fn available_models(&self, credentials: &Credentials) -> Result<Vec<ModelMetadata>>;

    /// `Ok(None)` when no model with this id is visible to the user.
    fn model(&self, credentials: &Credentials, model_id: &str) -> Result<Option<ModelMetadata>>;

    /// Returns the metadata with its service assigned `model_id`.
    fn register_model(
        &self,
        credentials: &Credentials,
        metadata: &ModelMetadata,
        binary_model: &[u8],
    ) -> Result<ModelMetadata>;

    /// The inference as the service formats it. The client does not
    /// interpret it.
    fn infer(
        &self,
        credentials: &Credentials,
        model_id: &str,
        image: &[u8],
        user_context: &str,
    ) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    Ready,
    Failed(String),
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientState::Ready => f.write_str("ready"),
            ClientState::Failed(reason) => f.write_str(reason),
        }
    }
}

#[derive(Clone)]
pub struct Client {
    service: Arc<dyn InferenceService>,
    credentials: Arc<Credentials>,
    state: ClientState,
    /// Started on the first async inference.
    pool: Arc<OnceLock<WorkerPool>>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("instance_id", &self.credentials.instance_id)
            .field("state", &self.state)
            .finish()
    }
}

impl Client {
    /// Connect with the given token. Always returns a client; check
    /// [`Client::state`] or [`Client::ensure_ready`] before using it.
    pub fn connect(
        service: Arc<dyn InferenceService>,
        user_token: &str,
        instance_description: &str,
    ) -> Client {
        let credentials = Credentials {
            user_token: user_token.to_string(),
            instance_description: instance_description.to_string(),
            instance_id: uuid::Uuid::new_v4().to_string(),
        };

        let state = if credentials.user_token.is_empty() {
            ClientState::Failed("missing user token".into())
        } else {
            match service.connect(&credentials) {
                Ok(()) => ClientState::Ready,
                Err(e) => ClientState::Failed(e.to_string()),
            }
        };
        log::debug!(
            "Client {} connected with state: {}",
            credentials.instance_id,
            state
        );

        Client {
            service,
            credentials: Arc::new(credentials),
            state,
            pool: Arc::new(OnceLock::new()),
        }
    }

    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn ensure_ready(&self) -> Result<()> {
        match &self.state {
            ClientState::Ready => Ok(()),
            ClientState::Failed(reason) => Err(ClassinetError::Connection(reason.clone())),
        }
    }

    pub fn user_token(&self) -> &str {
        &self.credentials.user_token
    }

    pub fn instance_description(&self) -> &str {
        &self.credentials.instance_description
    }

    pub fn instance_id(&self) -> &str {
        &self.credentials.instance_id
    }

    pub fn available_models(&self) -> Result<Vec<ModelMetadata>> {
        self.ensure_ready()?;
        self.service.available_models(&self.credentials)
    }

    pub fn register_model(&self, metadata: &ModelMetadata, binary_model: &[u8]) -> Result<Model> {
        self.ensure_ready()?;
        let registered = self
            .service
            .register_model(&self.credentials, metadata, binary_model)?;
        if registered.model_id.is_empty() {
            return Err(ClassinetError::Service(
                "registration returned no model id".into(),
            ));
        }
        Ok(self.model_handle(registered))
    }

    /// Handle for a registered model, by its service assigned id.
    pub fn model(&self, model_id: &str) -> Result<Model> {
        self.ensure_ready()?;
        match self.service.model(&self.credentials, model_id)? {
            Some(metadata) => Ok(self.model_handle(metadata)),
            None => Err(ClassinetError::ModelUnavailable(model_id.to_string())),
        }
    }

    fn model_handle(&self, metadata: ModelMetadata) -> Model {
        Model {
            service: self.service.clone(),
            credentials: self.credentials.clone(),
            pool: self.pool.clone(),
            metadata: Arc::new(metadata),
        }
    }
}

#[derive(Clone)]
pub struct Model {
    service: Arc<dyn InferenceService>,
    credentials: Arc<Credentials>,
    pool: Arc<OnceLock<WorkerPool>>,
    metadata: Arc<ModelMetadata>,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model").field("metadata", &self.metadata).finish()
    }
}

fn check_user_context(user_context: &str) -> Result<()> {
    if user_context.len() > MAX_USER_CONTEXT || !user_context.is_ascii() {
        return Err(ClassinetError::InvalidArgument(format!(
            "user context must be at most {} ascii characters",
            MAX_USER_CONTEXT
        )));
    }
    Ok(())
}

/// Holds an async callback until it fires. Dropping it unfired (job lost,
/// worker panicked) reports an error instead of losing the callback.
struct Completion {
    callback: Option<InferenceCallback>,
}

impl Completion {
    fn complete(mut self, result: Result<String>) {
        if let Some(callback) = self.callback.take() {
            callback(result);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(Err(ClassinetError::Service(
                "inference was abandoned before completing".into(),
            )));
        }
    }
}

impl Model {
    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    /// Blocking inference on one binary image.
    pub fn infer(&self, image: &[u8], user_context: &str) -> Result<String> {
        check_user_context(user_context)?;
        self.service.infer(
            &self.credentials,
            &self.metadata.model_id,
            image,
            user_context,
        )
    }

    /// Queue an inference. `callback` runs exactly once on a worker thread,
    /// or inline when the arguments are rejected. Without a callback the
    /// result is discarded.
    pub fn async_infer(
        &self,
        image: Vec<u8>,
        callback: Option<InferenceCallback>,
        user_context: &str,
    ) {
        let completion = Completion { callback };
        if let Err(e) = check_user_context(user_context) {
            completion.complete(Err(e));
            return;
        }

        let model = self.clone();
        let user_context = user_context.to_string();
        let pool = self.pool.get_or_init(|| WorkerPool::new(DEFAULT_WORKERS));
        pool.submit(move || {
            let result = model.service.infer(
                &model.credentials,
                &model.metadata.model_id,
                &image,
                &user_context,
            );
            if let Err(e) = &result {
                log::debug!("Inference on {} failed: {}", model.metadata.model_id, e);
            }
            completion.complete(result);
        });
    }
}
