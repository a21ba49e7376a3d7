// HTTP binding of `InferenceService`: a blocking reqwest client talking to
// a classinet gateway. The endpoint layout is this crate's own:
//
//   POST /connect                 JSON credentials
//   GET  /models                  JSON list of metadata
//   GET  /models/{id}             JSON metadata, 404 when unknown
//   POST /models                  multipart: metadata (JSON) + model (bytes)
//   POST /models/{id}/infer       raw image bytes, plain text inference
//
// The model id is always one percent-encoded path segment.

use reqwest::blocking::{multipart, Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{StatusCode, Url};
use serde::Serialize;

use crate::api::{Credentials, InferenceService};
use crate::error::{ClassinetError, Result};
use crate::metadata::ModelMetadata;

pub const ENDPOINT_ENV: &str = "CLASSINET_ENDPOINT";
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8080";

const INSTANCE_HEADER: &str = "x-classinet-instance";
const CONTEXT_HEADER: &str = "x-classinet-context";

#[derive(Serialize)]
struct ConnectRequest<'a> {
    instance_description: &'a str,
    instance_id: &'a str,
    client_version: &'a str,
}

#[derive(Clone, Debug)]
pub struct HttpService {
    client: Client,
    base_url: Url,
}

impl HttpService {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        let base_url = base_url.parse::<Url>().map_err(|e| {
            ClassinetError::InvalidArgument(format!("invalid endpoint {}: {}", base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ClassinetError::InvalidArgument(format!(
                "invalid endpoint {}",
                base_url
            )));
        }
        let client = Client::builder().build()?;
        Ok(HttpService { client, base_url })
    }

    /// Base URL from `CLASSINET_ENDPOINT`, or the local default.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var(ENDPOINT_ENV).unwrap_or_else(|_| DEFAULT_ENDPOINT.into());
        log::debug!("Using classinet endpoint {}", base_url);
        Self::new(base_url)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Base URL extended with `segments`, each one percent-encoded as a
    /// single path segment.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ClassinetError::InvalidArgument(format!("invalid endpoint {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// `/models/{id}[/{action}]`. Ids that would not stay one segment are
    /// rejected.
    fn model_url(&self, model_id: &str, action: Option<&str>) -> Result<Url> {
        if matches!(model_id, "" | "." | "..") {
            return Err(ClassinetError::InvalidArgument(format!(
                "invalid model id '{}'",
                model_id
            )));
        }
        match action {
            Some(action) => self.url(&["models", model_id, action]),
            None => self.url(&["models", model_id]),
        }
    }

    fn auth_headers(&self, credentials: &Credentials) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", credentials.user_token))
            .map_err(|_| ClassinetError::InvalidArgument("user token is not a valid header".into()))?;
        headers.insert(AUTHORIZATION, bearer);
        if let Ok(instance) = HeaderValue::from_str(&credentials.instance_id) {
            headers.insert(INSTANCE_HEADER, instance);
        }
        Ok(headers)
    }

    fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let res = request.send()?;
        if !res.status().is_success() {
            let status = res.status();
            let txt = res.text().unwrap_or_default();
            return Err(ClassinetError::Service(format!(
                "{} failed: {} - {}",
                what, status, txt
            )));
        }
        Ok(res)
    }
}

impl InferenceService for HttpService {
    fn connect(&self, credentials: &Credentials) -> Result<()> {
        let body = ConnectRequest {
            instance_description: &credentials.instance_description,
            instance_id: &credentials.instance_id,
            client_version: env!("CARGO_PKG_VERSION"),
        };
        let request = self
            .client
            .post(self.url(&["connect"])?)
            .headers(self.auth_headers(credentials)?)
            .json(&body);
        self.send(request, "Connect")?;
        Ok(())
    }

    fn available_models(&self, credentials: &Credentials) -> Result<Vec<ModelMetadata>> {
        let request = self
            .client
            .get(self.url(&["models"])?)
            .headers(self.auth_headers(credentials)?);
        Ok(self.send(request, "Listing models")?.json()?)
    }

    fn model(&self, credentials: &Credentials, model_id: &str) -> Result<Option<ModelMetadata>> {
        let res = self
            .client
            .get(self.model_url(model_id, None)?)
            .headers(self.auth_headers(credentials)?)
            .send()?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !res.status().is_success() {
            let status = res.status();
            let txt = res.text().unwrap_or_default();
            return Err(ClassinetError::Service(format!(
                "Model lookup failed: {} - {}",
                status, txt
            )));
        }
        Ok(Some(res.json()?))
    }

    fn register_model(
        &self,
        credentials: &Credentials,
        metadata: &ModelMetadata,
        binary_model: &[u8],
    ) -> Result<ModelMetadata> {
        let metadata_json = serde_json::to_string(metadata)
            .map_err(|e| ClassinetError::InvalidArgument(e.to_string()))?;
        let model_part = multipart::Part::bytes(binary_model.to_vec())
            .file_name(format!("{}.bin", metadata.name))
            .mime_str("application/octet-stream")?;
        let form = multipart::Form::new()
            .text("metadata", metadata_json)
            .part("model", model_part);
        let request = self
            .client
            .post(self.url(&["models"])?)
            .headers(self.auth_headers(credentials)?)
            .multipart(form);
        Ok(self.send(request, "Upload")?.json()?)
    }

    fn infer(
        &self,
        credentials: &Credentials,
        model_id: &str,
        image: &[u8],
        user_context: &str,
    ) -> Result<String> {
        let mut request = self
            .client
            .post(self.model_url(model_id, Some("infer"))?)
            .headers(self.auth_headers(credentials)?)
            .body(image.to_vec());
        if !user_context.is_empty() {
            request = request.header(CONTEXT_HEADER, user_context);
        }
        Ok(self.send(request, "Inference")?.text()?)
    }
}
