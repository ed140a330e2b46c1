//! Configuration types for document field extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. The model name and server address are
//! plain values in this struct and are passed explicitly to every call; the
//! library never reads the environment to pick a model.

use crate::error::ExtractError;
use crate::pipeline::capability::CapabilityRules;
use crate::pipeline::vision::ModelServer;
use crate::progress::ProgressCallback;
use std::fmt;
use std::sync::Arc;

/// Default Ollama endpoint.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Default vision model.
pub const DEFAULT_MODEL: &str = "llama3.2-vision";

/// Configuration for a document extraction.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_extract::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .model("llava:13b")
///     .dpi(200)
///     .max_pages(5)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_pages, 5);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Base URL of the Ollama server. Default: `http://localhost:11434`.
    pub base_url: String,

    /// Model name as installed on the server. Default: `llama3.2-vision`.
    pub model: String,

    /// Pre-constructed model server. Takes precedence over `base_url`.
    pub server: Option<Arc<dyn ModelServer>>,

    /// Rasterisation DPI for PDF pages. Range: 72–600. Default: 250.
    ///
    /// Scanned forms with small print need the extra density; the width cap
    /// below keeps the payload bounded regardless.
    pub dpi: u32,

    /// Maximum PDF pages sent to the model. Default: 10.
    ///
    /// Pages beyond the cap are dropped with a warning and counted in
    /// [`crate::ExtractionStats::dropped_pages`].
    pub max_pages: usize,

    /// Maximum image width in pixels; wider pages are downscaled. Default: 1344.
    pub max_width: u32,

    /// JPEG quality for rendered pages. Range: 1–100. Default: 95.
    pub jpeg_quality: u8,

    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,

    /// Nucleus-sampling threshold. Default: 0.1.
    pub top_p: f32,

    /// Top-k sampling. Default: 10.
    pub top_k: u32,

    /// Maximum tokens generated per page. Default: 2000.
    pub num_predict: u32,

    /// Repetition penalty. Default: 1.0.
    pub repeat_penalty: f32,

    /// Ask the server to constrain output to JSON. Default: true.
    pub json_mode: bool,

    /// Per-generation timeout in seconds. Default: 300.
    ///
    /// Large vision models on CPU can take minutes per page.
    pub request_timeout_secs: u64,

    /// Timeout for metadata probes (`show`, `list`) in seconds. Default: 5.
    pub probe_timeout_secs: u64,

    /// Ordered rules deciding whether a model accepts images.
    pub capability_rules: CapabilityRules,

    /// Custom instruction header. If None, uses [`crate::prompts::DEFAULT_INSTRUCTION`].
    pub instruction: Option<String>,

    /// Optional per-page progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            server: None,
            dpi: 250,
            max_pages: 10,
            max_width: 1344,
            jpeg_quality: 95,
            temperature: 0.0,
            top_p: 0.1,
            top_k: 10,
            num_predict: 2000,
            repeat_penalty: 1.0,
            json_mode: true,
            request_timeout_secs: 300,
            probe_timeout_secs: 5,
            capability_rules: CapabilityRules::default(),
            instruction: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("server", &self.server.as_ref().map(|_| "<dyn ModelServer>"))
            .field("dpi", &self.dpi)
            .field("max_pages", &self.max_pages)
            .field("max_width", &self.max_width)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("top_k", &self.top_k)
            .field("num_predict", &self.num_predict)
            .field("repeat_penalty", &self.repeat_penalty)
            .field("json_mode", &self.json_mode)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("probe_timeout_secs", &self.probe_timeout_secs)
            .field("instruction", &self.instruction.as_ref().map(|s| s.len()))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExtractionProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into().trim().to_string();
        self
    }

    pub fn server(mut self, server: Arc<dyn ModelServer>) -> Self {
        self.config.server = Some(server);
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n.max(1);
        self
    }

    pub fn max_width(mut self, px: u32) -> Self {
        self.config.max_width = px.max(64);
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn top_p(mut self, p: f32) -> Self {
        self.config.top_p = p.clamp(0.0, 1.0);
        self
    }

    pub fn top_k(mut self, k: u32) -> Self {
        self.config.top_k = k.max(1);
        self
    }

    pub fn num_predict(mut self, n: u32) -> Self {
        self.config.num_predict = n;
        self
    }

    pub fn repeat_penalty(mut self, p: f32) -> Self {
        self.config.repeat_penalty = p.max(0.0);
        self
    }

    pub fn json_mode(mut self, v: bool) -> Self {
        self.config.json_mode = v;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn probe_timeout_secs(mut self, secs: u64) -> Self {
        self.config.probe_timeout_secs = secs;
        self
    }

    pub fn capability_rules(mut self, rules: CapabilityRules) -> Self {
        self.config.capability_rules = rules;
        self
    }

    pub fn instruction(mut self, text: impl Into<String>) -> Self {
        self.config.instruction = Some(text.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if c.model.is_empty() {
            return Err(ExtractError::InvalidConfig("model name must not be empty".into()));
        }
        if c.server.is_none()
            && !(c.base_url.starts_with("http://") || c.base_url.starts_with("https://"))
        {
            return Err(ExtractError::InvalidConfig(format!(
                "base URL must start with http:// or https://, got '{}'",
                c.base_url
            )));
        }
        if c.request_timeout_secs == 0 || c.probe_timeout_secs == 0 {
            return Err(ExtractError::InvalidConfig(
                "timeouts must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}
