//! Static model catalogue
//!
//! Read-only descriptors for the models a session can connect to. Capability
//! flags decide which session variant is built and whether a model can carry
//! duplex audio.

use serde::{Deserialize, Serialize};

/// Which backend protocol serves a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Persistent duplex channel (cloud realtime API)
    Streaming,
    /// Stateless request/response chat (local inference server)
    Polling,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Streaming => write!(f, "streaming"),
            Self::Polling => write!(f, "polling"),
        }
    }
}

/// Rough compute cost of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComputeTier {
    Low,
    Medium,
    High,
}

/// Catalogue entry describing one model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Backend model identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Backend protocol
    pub provider: ProviderKind,
    /// Model family, used to pick a stand-in when a capability is missing
    pub family: String,
    /// Compute tier
    pub tier: ComputeTier,
    /// Accepts image input
    #[serde(default)]
    pub vision_capable: bool,
    /// Can carry duplex audio over the streaming transport
    #[serde(default)]
    pub supports_streaming_audio: bool,
    /// Short description
    #[serde(default)]
    pub description: String,
}

/// Outcome of resolving a requested model for the streaming transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingResolution {
    /// Model that will actually be used
    pub model: ModelDescriptor,
    /// Requested model id, when it was swapped for a capable one
    pub remapped_from: Option<String>,
}

/// The set of models known to this process
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModelCatalog {
    /// Catalogue compiled into the binary
    #[must_use]
    pub fn builtin() -> Self {
        let entry = |id: &str,
                     name: &str,
                     provider: ProviderKind,
                     family: &str,
                     tier: ComputeTier,
                     vision_capable: bool,
                     supports_streaming_audio: bool,
                     description: &str| ModelDescriptor {
            id: id.to_string(),
            name: name.to_string(),
            provider,
            family: family.to_string(),
            tier,
            vision_capable,
            supports_streaming_audio,
            description: description.to_string(),
        };

        Self {
            models: vec![
                entry(
                    "gemini-2.5-flash-native-audio-preview-09-2025",
                    "Gemini 2.5 Flash (Live Native)",
                    ProviderKind::Streaming,
                    "gemini",
                    ComputeTier::Low,
                    true,
                    true,
                    "Fastest latency. Best for real-time voice interactions.",
                ),
                entry(
                    "gemini-3-flash-preview",
                    "Gemini 3.0 Flash",
                    ProviderKind::Streaming,
                    "gemini",
                    ComputeTier::Medium,
                    true,
                    false,
                    "Next-gen reasoning speed. No native duplex audio.",
                ),
                entry(
                    "gemini-3-pro-preview",
                    "Gemini 3.0 Pro",
                    ProviderKind::Streaming,
                    "gemini",
                    ComputeTier::High,
                    true,
                    false,
                    "Top-tier complex reasoning. Higher latency.",
                ),
                entry(
                    "llama3",
                    "Llama 3 (Local)",
                    ProviderKind::Polling,
                    "llama",
                    ComputeTier::Medium,
                    false,
                    false,
                    "General purpose local model.",
                ),
                entry(
                    "mistral",
                    "Mistral 7B (Local)",
                    ProviderKind::Polling,
                    "mistral",
                    ComputeTier::Low,
                    false,
                    false,
                    "Small, fast local model.",
                ),
                entry(
                    "llava",
                    "LLaVA (Local Vision)",
                    ProviderKind::Polling,
                    "llava",
                    ComputeTier::High,
                    true,
                    false,
                    "Local multimodal model for camera frames.",
                ),
            ],
        }
    }

    /// Build a catalogue from explicit descriptors
    #[must_use]
    pub const fn new(models: Vec<ModelDescriptor>) -> Self {
        Self { models }
    }

    /// Add descriptors, replacing entries that share an id
    pub fn extend(&mut self, models: impl IntoIterator<Item = ModelDescriptor>) {
        for model in models {
            if let Some(existing) = self.models.iter_mut().find(|m| m.id == model.id) {
                *existing = model;
            } else {
                self.models.push(model);
            }
        }
    }

    /// All descriptors in catalogue order
    #[must_use]
    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    /// Look up a model by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == id)
    }

    /// First duplex-audio capable model of the same family
    #[must_use]
    pub fn streaming_fallback(&self, model: &ModelDescriptor) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| {
            m.family == model.family
                && m.provider == ProviderKind::Streaming
                && m.supports_streaming_audio
        })
    }

    /// Resolve the model a streaming session should open
    ///
    /// Models flagged as not supporting duplex audio are swapped for a
    /// capable sibling. A model with no capable sibling is returned as is.
    #[must_use]
    pub fn resolve_streaming(&self, model: &ModelDescriptor) -> StreamingResolution {
        if model.supports_streaming_audio {
            return StreamingResolution {
                model: model.clone(),
                remapped_from: None,
            };
        }

        match self.streaming_fallback(model) {
            Some(capable) => StreamingResolution {
                model: capable.clone(),
                remapped_from: Some(model.id.clone()),
            },
            None => {
                tracing::warn!(
                    model = %model.id,
                    family = %model.family,
                    "no duplex-audio capable model in family"
                );
                StreamingResolution {
                    model: model.clone(),
                    remapped_from: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_has_capable_streaming_model() {
        let catalog = ModelCatalog::builtin();
        assert!(
            catalog
                .models()
                .iter()
                .any(|m| m.provider == ProviderKind::Streaming && m.supports_streaming_audio)
        );
    }

    #[test]
    fn capable_model_is_not_remapped() {
        let catalog = ModelCatalog::builtin();
        let model = catalog
            .get("gemini-2.5-flash-native-audio-preview-09-2025")
            .unwrap();
        let resolved = catalog.resolve_streaming(model);
        assert_eq!(resolved.model.id, model.id);
        assert!(resolved.remapped_from.is_none());
    }

    #[test]
    fn incapable_model_remaps_within_family() {
        let catalog = ModelCatalog::builtin();
        let model = catalog.get("gemini-3-pro-preview").unwrap();
        let resolved = catalog.resolve_streaming(model);
        assert_eq!(
            resolved.model.id,
            "gemini-2.5-flash-native-audio-preview-09-2025"
        );
        assert_eq!(resolved.remapped_from.as_deref(), Some("gemini-3-pro-preview"));
    }

    #[test]
    fn remap_uses_flag_not_id_text() {
        // An id that looks like a newer generation but carries the flag stays put
        let mut catalog = ModelCatalog::builtin();
        catalog.extend([ModelDescriptor {
            id: "gemini-3-live".to_string(),
            name: "Gemini 3 Live".to_string(),
            provider: ProviderKind::Streaming,
            family: "gemini".to_string(),
            tier: ComputeTier::Medium,
            vision_capable: true,
            supports_streaming_audio: true,
            description: String::new(),
        }]);
        let model = catalog.get("gemini-3-live").unwrap().clone();
        assert!(catalog.resolve_streaming(&model).remapped_from.is_none());
    }

    #[test]
    fn extend_replaces_same_id() {
        let mut catalog = ModelCatalog::builtin();
        let before = catalog.models().len();
        let mut llama = catalog.get("llama3").unwrap().clone();
        llama.vision_capable = true;
        catalog.extend([llama]);
        assert_eq!(catalog.models().len(), before);
        assert!(catalog.get("llama3").unwrap().vision_capable);
    }
}
