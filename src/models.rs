//! Helpers for inspecting the model server: status, installed vision models,
//! and mapping a requested model name onto what is actually installed.
//!
//! None of these are needed for an extraction; the CLI uses them for
//! `--status`, `--list-models` and to tolerate `llama3.2-vision:11b` when the
//! server only has `llama3.2-vision:latest`.

use crate::error::VisionError;
use crate::pipeline::capability::CapabilityRules;
use crate::pipeline::vision::{InstalledModel, ModelServer};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Relative tolerance when matching a size tag against a reported parameter size.
const SIZE_TOLERANCE: f64 = 0.25;

/// `7b`, `3.8b`, `270m` (tags) and `10.7B`, `270M` (reported sizes).
static SIZE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*([mb])\s*$").unwrap());

/// Reachability snapshot of the model server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub running: bool,
    pub endpoint: String,
    /// Number of installed models, when the server answered.
    pub installed_models: Option<usize>,
    pub error: Option<String>,
}

/// Ask the server for its model list to see whether it is up.
pub async fn server_status(server: &dyn ModelServer) -> ServerStatus {
    match server.list().await {
        Ok(models) => ServerStatus {
            running: true,
            endpoint: server.endpoint().to_string(),
            installed_models: Some(models.len()),
            error: None,
        },
        Err(e) => ServerStatus {
            running: false,
            endpoint: server.endpoint().to_string(),
            installed_models: None,
            error: Some(e.to_string()),
        },
    }
}

/// Installed models that pass the capability rules.
///
/// Listed details are checked first; models they do not settle are checked
/// again with full `show` metadata (failures there just leave the model out).
pub async fn list_vision_models(
    server: &dyn ModelServer,
    rules: &CapabilityRules,
) -> Result<Vec<InstalledModel>, VisionError> {
    let installed = server.list().await?;
    let mut vision = Vec::new();

    for model in installed {
        if rules.is_vision_capable(&model.metadata()) {
            vision.push(model);
            continue;
        }
        match server.show(&model.name).await {
            Ok(meta) if rules.is_vision_capable(&meta) => vision.push(model),
            Ok(_) => debug!("'{}' is not a vision model", model.name),
            Err(e) => debug!("show '{}' failed: {}", model.name, e),
        }
    }

    info!("{} vision model(s) installed", vision.len());
    Ok(vision)
}

/// Parse a size tag or reported size into billions of parameters.
pub fn parse_parameter_size(text: &str) -> Option<f64> {
    let caps = SIZE.captures(text)?;
    let n: f64 = caps[1].parse().ok()?;
    match caps[2].to_ascii_lowercase().as_str() {
        "m" => Some(n / 1000.0),
        _ => Some(n),
    }
}

/// Map a requested model name onto an installed one.
///
/// 1. Exact name (an untagged name also matches `:latest`) → requested name.
/// 2. Same base name whose reported parameter size is within 25 % of the
///    requested size tag → that installed name.
/// 3. Otherwise the requested name, unchanged.
pub fn resolve_model_name(requested: &str, installed: &[InstalledModel]) -> String {
    if installed.iter().any(|m| m.matches_name(requested)) {
        return requested.to_string();
    }

    let (base, tag) = match requested.split_once(':') {
        Some((b, t)) => (b, Some(t)),
        None => (requested, None),
    };

    if let Some(target) = tag.and_then(parse_parameter_size).filter(|t| *t > 0.0) {
        for model in installed {
            let installed_base = model.name.split(':').next().unwrap_or_default();
            if installed_base != base {
                continue;
            }
            let Some(size) = model.parameter_size.as_deref().and_then(parse_parameter_size) else {
                continue;
            };
            if (size - target).abs() / target < SIZE_TOLERANCE {
                info!(
                    "Resolved '{}' → '{}' ({}B ≈ {}B)",
                    requested, model.name, size, target
                );
                return model.name.clone();
            }
        }
    }

    warn!("Could not match '{}' to an installed model, using as-is", requested);
    requested.to_string()
}
