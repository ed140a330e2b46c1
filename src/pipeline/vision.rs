//! Vision model client: one page image + instruction → raw model text.
//!
//! The transport sits behind the [`ModelServer`] trait so the orchestrator
//! never talks HTTP directly. [`OllamaServer`] is the production
//! implementation (`/api/generate`, `/api/show`, `/api/tags`); tests inject a
//! scripted server instead.
//!
//! [`VisionClient`] adds the capability gate on top: before the first
//! generation it probes the model once and refuses to send images to a model
//! that is known to be text-only. The probe result is cached for the lifetime
//! of the client, which is one extraction request.
//!
//! Each request carries exactly one image. There are no automatic retries.

use crate::config::ExtractionConfig;
use crate::error::{excerpt, ExtractError, VisionError};
use crate::pipeline::capability::{Capability, CapabilityRules, ModelMetadata};
use crate::pipeline::load::PageImage;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Sampling options forwarded to the model server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub num_predict: u32,
    pub repeat_penalty: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_p: 0.1,
            top_k: 10,
            num_predict: 2000,
            repeat_penalty: 1.0,
        }
    }
}

impl GenerationOptions {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
            num_predict: config.num_predict,
            repeat_penalty: config.repeat_penalty,
        }
    }
}

/// One generation call. At most one image, enforced by the type.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    /// Base64-encoded image (no data-URI prefix).
    pub image: Option<String>,
    /// Constrain the output to JSON.
    pub json_mode: bool,
    pub options: GenerationOptions,
}

/// A model installed on the server, as reported by `/api/tags`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledModel {
    pub name: String,
    /// Size on disk in bytes.
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub families: Vec<String>,
    /// e.g. `"10.7B"`.
    #[serde(default)]
    pub parameter_size: Option<String>,
    /// e.g. `"Q4_K_M"`.
    #[serde(default)]
    pub quantization_level: Option<String>,
}

impl InstalledModel {
    /// Metadata view used by the capability rules (no top-level keys).
    pub fn metadata(&self) -> ModelMetadata {
        ModelMetadata {
            name: self.name.clone(),
            family: self.family.clone(),
            families: self.families.clone(),
            parameter_size: self.parameter_size.clone(),
            ..Default::default()
        }
    }

    /// Whether this entry is the model the caller asked for.
    ///
    /// An untagged request matches the `:latest` tag.
    pub fn matches_name(&self, requested: &str) -> bool {
        self.name == requested
            || (!requested.contains(':') && self.name == format!("{requested}:latest"))
    }
}

/// Transport to a model server.
///
/// Object-safe so it can be stored as `Arc<dyn ModelServer>` in the config.
pub trait ModelServer: Send + Sync {
    /// Run one non-streaming generation and return the generated text.
    fn generate<'a>(&'a self, request: &'a GenerateRequest) -> BoxFuture<'a, Result<String, VisionError>>;

    /// Fetch full metadata for one model.
    fn show<'a>(&'a self, model: &'a str) -> BoxFuture<'a, Result<ModelMetadata, VisionError>>;

    /// List installed models.
    fn list(&self) -> BoxFuture<'_, Result<Vec<InstalledModel>, VisionError>>;

    /// Human-readable location, used in log lines and error messages.
    fn endpoint(&self) -> &str {
        "model server"
    }
}

// ── Ollama HTTP implementation ───────────────────────────────────────────

#[derive(Debug, Serialize)]
struct OllamaGenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<&'a str>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    options: &'a GenerationOptions,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagsEntry>,
}

#[derive(Debug, Deserialize)]
struct TagsEntry {
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    modified_at: Option<String>,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

impl From<TagsEntry> for InstalledModel {
    fn from(entry: TagsEntry) -> Self {
        let meta = ModelMetadata::from_details(&entry.name, entry.details.as_ref());
        let quantization_level = entry
            .details
            .as_ref()
            .and_then(|d| d.get("quantization_level"))
            .and_then(|q| q.as_str())
            .map(|q| q.to_string());
        InstalledModel {
            name: entry.name,
            size: entry.size,
            modified_at: entry.modified_at,
            family: meta.family,
            families: meta.families,
            parameter_size: meta.parameter_size,
            quantization_level,
        }
    }
}

/// Ollama server reached over HTTP.
#[derive(Debug, Clone)]
pub struct OllamaServer {
    base_url: String,
    client: reqwest::Client,
    request_timeout: Duration,
    probe_timeout: Duration,
}

impl OllamaServer {
    pub fn new(
        base_url: impl Into<String>,
        request_timeout: Duration,
        probe_timeout: Duration,
    ) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .connect_timeout(probe_timeout)
            .build()
            .map_err(|e| ExtractError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            request_timeout,
            probe_timeout,
        })
    }

    pub fn from_config(config: &ExtractionConfig) -> Result<Self, ExtractError> {
        Self::new(
            config.base_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
            Duration::from_secs(config.probe_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn transport_error(&self, err: reqwest::Error, timeout: Duration) -> VisionError {
        classify_transport(
            &self.base_url,
            TransportFailure::of(&err),
            err.to_string(),
            timeout,
        )
    }

    async fn generate_impl(&self, request: &GenerateRequest) -> Result<String, VisionError> {
        let body = OllamaGenerateBody {
            model: &request.model,
            prompt: &request.prompt,
            images: request.image.as_deref().into_iter().collect(),
            stream: false,
            format: request.json_mode.then_some("json"),
            options: &request.options,
        };

        let url = format!("{}/api/generate", self.base_url);
        let resp = self
            .client
            .post(&url)
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e, self.request_timeout))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &text, &request.model));
        }

        let parsed: OllamaGenerateResponse = resp
            .json()
            .await
            .map_err(|e| self.transport_error(e, self.request_timeout))?;
        Ok(parsed.response)
    }

    async fn show_impl(&self, model: &str) -> Result<ModelMetadata, VisionError> {
        let url = format!("{}/api/show", self.base_url);
        let resp = self
            .client
            .post(&url)
            .timeout(self.probe_timeout)
            .json(&serde_json::json!({ "model": model, "name": model }))
            .send()
            .await
            .map_err(|e| self.transport_error(e, self.probe_timeout))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(VisionError::Api {
                status: status.as_u16(),
                detail: excerpt(&text, 500),
            });
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| self.transport_error(e, self.probe_timeout))?;
        Ok(ModelMetadata::from_show_response(model, &body))
    }

    async fn list_impl(&self) -> Result<Vec<InstalledModel>, VisionError> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self
            .client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(e, self.probe_timeout))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(VisionError::Api {
                status: status.as_u16(),
                detail: excerpt(&text, 500),
            });
        }

        let tags: TagsResponse = resp
            .json()
            .await
            .map_err(|e| self.transport_error(e, self.probe_timeout))?;
        Ok(tags.models.into_iter().map(InstalledModel::from).collect())
    }
}

/// Coarse kind of a failed HTTP exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransportFailure {
    Connect,
    Timeout,
    Decode,
    Other,
}

impl TransportFailure {
    fn of(err: &reqwest::Error) -> Self {
        // A connect timeout is both; it means the server was never reached.
        if err.is_connect() {
            TransportFailure::Connect
        } else if err.is_timeout() {
            TransportFailure::Timeout
        } else if err.is_decode() {
            TransportFailure::Decode
        } else {
            TransportFailure::Other
        }
    }
}

/// `timeout` is the request timeout that was in force; it is reported only
/// when the server was reached and then went quiet.
fn classify_transport(
    base_url: &str,
    failure: TransportFailure,
    detail: String,
    timeout: Duration,
) -> VisionError {
    match failure {
        TransportFailure::Timeout => VisionError::Timeout {
            secs: timeout.as_secs(),
        },
        TransportFailure::Decode => VisionError::InvalidResponse(detail),
        TransportFailure::Connect => VisionError::Unreachable {
            url: base_url.to_string(),
            detail: format!("could not connect: {detail}"),
        },
        TransportFailure::Other => VisionError::Unreachable {
            url: base_url.to_string(),
            detail,
        },
    }
}

impl ModelServer for OllamaServer {
    fn generate<'a>(&'a self, request: &'a GenerateRequest) -> BoxFuture<'a, Result<String, VisionError>> {
        self.generate_impl(request).boxed()
    }

    fn show<'a>(&'a self, model: &'a str) -> BoxFuture<'a, Result<ModelMetadata, VisionError>> {
        self.show_impl(model).boxed()
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<InstalledModel>, VisionError>> {
        self.list_impl().boxed()
    }

    fn endpoint(&self) -> &str {
        &self.base_url
    }
}

/// The configured server, or an [`OllamaServer`] at `config.base_url`.
pub fn connect(config: &ExtractionConfig) -> Result<Arc<dyn ModelServer>, ExtractError> {
    match &config.server {
        Some(server) => Ok(Arc::clone(server)),
        None => Ok(Arc::new(OllamaServer::from_config(config)?)),
    }
}

/// Map a non-success generation status to an actionable error.
pub fn classify_status(status: u16, body: &str, model: &str) -> VisionError {
    let detail = excerpt(body.trim(), 500);
    match status {
        400 => {
            let lower = body.to_lowercase();
            if lower.contains("does not support images") || lower.contains("vision") {
                VisionError::NotVisionCapable {
                    model: model.to_string(),
                }
            } else {
                VisionError::BadRequest { detail }
            }
        }
        413 => VisionError::PayloadTooLarge,
        500..=599 => VisionError::ServerError { status, detail },
        _ => VisionError::Api { status, detail },
    }
}

// ── Client with capability gate ──────────────────────────────────────────

/// Sends one page at a time to a vision model.
pub struct VisionClient {
    server: Arc<dyn ModelServer>,
    model: String,
    rules: CapabilityRules,
    options: GenerationOptions,
    json_mode: bool,
    capability: OnceCell<Capability>,
}

impl VisionClient {
    pub fn new(server: Arc<dyn ModelServer>, model: impl Into<String>) -> Self {
        Self {
            server,
            model: model.into(),
            rules: CapabilityRules::default(),
            options: GenerationOptions::default(),
            json_mode: true,
            capability: OnceCell::new(),
        }
    }

    /// Build a client from the configuration.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, ExtractError> {
        Ok(Self::new(connect(config)?, config.model.clone())
            .with_rules(config.capability_rules.clone())
            .with_options(GenerationOptions::from_config(config))
            .with_json_mode(config.json_mode))
    }

    pub fn with_rules(mut self, rules: CapabilityRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_json_mode(mut self, v: bool) -> Self {
        self.json_mode = v;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Probe the model once and cache the answer.
    pub async fn capability(&self) -> &Capability {
        self.capability
            .get_or_init(|| probe_capability(self.server.as_ref(), &self.model, &self.rules))
            .await
    }

    /// Fail fast when the model is known to be text-only.
    pub async fn ensure_capable(&self) -> Result<(), VisionError> {
        if self.capability().await.allows_images() {
            Ok(())
        } else {
            Err(VisionError::NotVisionCapable {
                model: self.model.clone(),
            })
        }
    }

    /// Send one instruction + page image and return the raw model text.
    ///
    /// An empty answer is returned as `"{}"`.
    pub async fn invoke(&self, prompt: &str, page: &PageImage) -> Result<String, VisionError> {
        self.ensure_capable().await?;

        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            image: Some(page.data.clone()),
            json_mode: self.json_mode,
            options: self.options.clone(),
        };

        let start = Instant::now();
        debug!(
            "Page {}: sending {}x{} {} ({} bytes base64) to '{}'",
            page.index + 1,
            page.width,
            page.height,
            page.mime_type,
            page.data.len(),
            self.model
        );

        let text = self.server.generate(&request).await?;

        debug!(
            "Page {}: {} chars in {:?}",
            page.index + 1,
            text.len(),
            start.elapsed()
        );

        if text.trim().is_empty() {
            warn!("Page {}: empty response from '{}'", page.index + 1, self.model);
            return Ok("{}".to_string());
        }
        Ok(text)
    }
}

/// Decide whether `model` accepts images.
///
/// `show` metadata first, then the listed details. When neither is available
/// the answer is [`Capability::Unknown`].
pub async fn probe_capability(
    server: &dyn ModelServer,
    model: &str,
    rules: &CapabilityRules,
) -> Capability {
    let meta = match server.show(model).await {
        Ok(meta) => Some(meta),
        Err(e) => {
            debug!("show '{}' failed ({}); falling back to model list", model, e);
            match server.list().await {
                Ok(models) => {
                    let found = models.iter().find(|m| m.matches_name(model));
                    if found.is_none() {
                        warn!(
                            "Model '{}' not found on {}; assuming it accepts images",
                            model,
                            server.endpoint()
                        );
                    }
                    found.map(InstalledModel::metadata)
                }
                Err(e) => {
                    warn!(
                        "Could not verify whether '{}' is a vision model: {}",
                        model, e
                    );
                    None
                }
            }
        }
    };

    match meta {
        None => Capability::Unknown,
        Some(meta) => match rules.evaluate(&meta) {
            Some(rule) => {
                info!("Model '{}' is vision-capable ({})", model, rule.label());
                Capability::Vision { rule: rule.label() }
            }
            None => {
                warn!(
                    "Model '{}' appears to be text-only (family: {:?}, families: {:?})",
                    model, meta.family, meta.families
                );
                Capability::TextOnly
            }
        },
    }
}
