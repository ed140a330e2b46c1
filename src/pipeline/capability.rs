//! Vision-capability heuristic as an ordered table of pure predicate rules.
//!
//! Model servers do not expose a single reliable "accepts images" flag, so
//! several weaker signals are checked in priority order and the first match
//! wins. The table is plain data: callers can reorder it, drop a rule, or add
//! a family without touching the client.

use serde::{Deserialize, Serialize};

/// What the model server told us about a model.
///
/// Built from `/api/show` (full metadata) or, as a fallback, from the
/// `details` block of an `/api/tags` entry (no top-level keys).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Model name as known to the server, e.g. `llama3.2-vision:latest`.
    pub name: String,
    /// Primary family, e.g. `mllama`.
    pub family: Option<String>,
    /// All families, e.g. `["mllama", "clip"]`.
    pub families: Vec<String>,
    /// Capabilities declared by newer servers, e.g. `["completion", "vision"]`.
    pub capabilities: Vec<String>,
    /// Top-level keys present in the metadata document, e.g. `projector_info`.
    pub keys: Vec<String>,
    /// Reported parameter size, e.g. `10.7B`.
    pub parameter_size: Option<String>,
}

impl ModelMetadata {
    /// Parse an `/api/show` response body.
    pub fn from_show_response(name: &str, body: &serde_json::Value) -> Self {
        let mut meta = Self::from_details(name, body.get("details"));
        meta.capabilities = string_list(body.get("capabilities"));
        meta.keys = body
            .as_object()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default();
        meta
    }

    /// Parse a `details` block (shared by `/api/show` and `/api/tags`).
    pub fn from_details(name: &str, details: Option<&serde_json::Value>) -> Self {
        let family = details
            .and_then(|d| d.get("family"))
            .and_then(|f| f.as_str())
            .filter(|f| !f.is_empty())
            .map(|f| f.to_string());
        let parameter_size = details
            .and_then(|d| d.get("parameter_size"))
            .and_then(|p| p.as_str())
            .filter(|p| !p.is_empty())
            .map(|p| p.to_string());
        Self {
            name: name.to_string(),
            family,
            families: string_list(details.and_then(|d| d.get("families"))),
            capabilities: Vec::new(),
            keys: Vec::new(),
            parameter_size,
        }
    }

    fn all_families(&self) -> impl Iterator<Item = &str> {
        self.family
            .iter()
            .chain(self.families.iter())
            .map(|s| s.as_str())
    }
}

fn string_list(value: Option<&serde_json::Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|x| x.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// One signal that a model accepts images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", content = "values", rename_all = "snake_case")]
pub enum CapabilityRule {
    /// An image-encoder family (e.g. `clip`) is listed in `families`.
    EncoderFamily(Vec<String>),
    /// The server declares one of these capabilities.
    DeclaredCapability(Vec<String>),
    /// A top-level metadata key such as `projector_info` is present.
    MetadataKey(Vec<String>),
    /// The family (or any listed family) is a known vision family.
    FamilyAllowList(Vec<String>),
    /// The model name contains one of these keywords.
    NameKeyword(Vec<String>),
}

impl CapabilityRule {
    /// Pure predicate: does this rule recognise the model as vision-capable?
    pub fn matches(&self, meta: &ModelMetadata) -> bool {
        match self {
            CapabilityRule::EncoderFamily(markers) => meta
                .families
                .iter()
                .any(|f| contains_ignore_case(markers, f)),
            CapabilityRule::DeclaredCapability(caps) => meta
                .capabilities
                .iter()
                .any(|c| contains_ignore_case(caps, c)),
            CapabilityRule::MetadataKey(keys) => {
                meta.keys.iter().any(|k| keys.iter().any(|want| want == k))
            }
            CapabilityRule::FamilyAllowList(families) => meta
                .all_families()
                .any(|f| contains_ignore_case(families, f)),
            CapabilityRule::NameKeyword(keywords) => {
                let name = meta.name.to_lowercase();
                keywords.iter().any(|k| name.contains(&k.to_lowercase()))
            }
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            CapabilityRule::EncoderFamily(_) => "vision encoder",
            CapabilityRule::DeclaredCapability(_) => "declared capability",
            CapabilityRule::MetadataKey(_) => "multimodal projector",
            CapabilityRule::FamilyAllowList(_) => "vision family",
            CapabilityRule::NameKeyword(_) => "name keyword",
        }
    }
}

fn contains_ignore_case(list: &[String], needle: &str) -> bool {
    list.iter().any(|s| s.eq_ignore_ascii_case(needle))
}

/// Ordered rule table; the first matching rule wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRules {
    pub rules: Vec<CapabilityRule>,
}

impl Default for CapabilityRules {
    fn default() -> Self {
        fn list(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        }
        Self {
            rules: vec![
                CapabilityRule::EncoderFamily(list(&["clip"])),
                CapabilityRule::DeclaredCapability(list(&["vision"])),
                CapabilityRule::MetadataKey(list(&["projector_info"])),
                CapabilityRule::FamilyAllowList(list(&[
                    "mllama", "llava", "bakllava", "gemma3", "gemma2",
                ])),
                CapabilityRule::NameKeyword(list(&["vision", "llava", "bakllava"])),
            ],
        }
    }
}

impl CapabilityRules {
    pub fn new(rules: Vec<CapabilityRule>) -> Self {
        Self { rules }
    }

    /// Return the first rule that recognises the model, if any.
    pub fn evaluate(&self, meta: &ModelMetadata) -> Option<&CapabilityRule> {
        self.rules.iter().find(|r| r.matches(meta))
    }

    pub fn is_vision_capable(&self, meta: &ModelMetadata) -> bool {
        self.evaluate(meta).is_some()
    }
}

/// Result of probing a model before sending it an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    /// A rule matched; the label names which one.
    Vision { rule: &'static str },
    /// Metadata was retrieved and no rule matched.
    TextOnly,
    /// The probe could not decide (server unreachable, model unknown).
    Unknown,
}

impl Capability {
    /// Whether a generation call should go ahead.
    ///
    /// Unknown counts as capable; the generation call reports the real error.
    pub fn allows_images(&self) -> bool {
        !matches!(self, Capability::TextOnly)
    }
}
