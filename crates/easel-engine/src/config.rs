//! Model descriptors loaded from a single TOML document.
//!
//! The document is plain declarative data -- one `[[models]]` table per
//! engine -- validated once at startup. Example:
//!
//! ```toml
//! default_model = "sd15"
//!
//! [[models]]
//! id = "sd15"
//! name = "Stable Diffusion 1.5"
//! command = "/opt/engines/sd-server"
//! args = ["--listen", "127.0.0.1", "--port", "{port}"]
//! exec_mode = "server"
//! load_mode = "on_demand"
//! port = 8080
//! capabilities = ["text-to-image", "image-to-image"]
//!
//! [models.generation_params]
//! sample_steps = 25
//! cfg_scale = 7.0
//! size = "512x512"
//! ```

use std::collections::HashSet;
use std::path::Path;

use easel_core::params::GenerationDefaults;
use easel_core::status::{Capability, ExecMode, LoadMode};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Default readiness deadline when neither the caller nor the descriptor
/// specifies one.
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 90_000;

/// Placeholder substituted with the allocated port in args and URLs.
pub const PORT_PLACEHOLDER: &str = "{port}";

fn default_load_mode() -> LoadMode {
    LoadMode::OnDemand
}

/// Static description of one engine, straight from the config document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Path to the engine executable.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Engine endpoint for `server` mode; may contain `{port}`.
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default = "default_load_mode")]
    pub load_mode: LoadMode,
    pub exec_mode: ExecMode,
    /// Preferred port; auto-assigned when taken.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub startup_timeout_ms: Option<u64>,
    #[serde(default)]
    pub generation_params: GenerationDefaults,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// Registry repo the model's files can be fetched from.
    #[serde(default)]
    pub registry_repo: Option<String>,
    #[serde(default)]
    pub registry_files: Vec<String>,
}

impl ModelDescriptor {
    /// The engine endpoint once a concrete port is known.
    pub fn resolved_api_url(&self, port: u16) -> String {
        match &self.api_url {
            Some(url) => url.replace(PORT_PLACEHOLDER, &port.to_string()),
            None => format!("http://127.0.0.1:{port}"),
        }
    }

    /// The argv with the port placeholder substituted.
    pub fn resolved_args(&self, port: u16) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.replace(PORT_PLACEHOLDER, &port.to_string()))
            .collect()
    }

    /// The readiness deadline for this model, honouring an override.
    pub fn startup_timeout_ms(&self, override_ms: Option<u64>) -> u64 {
        override_ms
            .or(self.startup_timeout_ms)
            .unwrap_or(DEFAULT_STARTUP_TIMEOUT_MS)
    }
}

/// The whole config document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelsConfig {
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,
}

impl ModelsConfig {
    /// Read and validate the document at `path`.
    pub async fn load(path: &Path) -> Result<Self, EngineError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            EngineError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&raw)
    }

    /// Parse and validate a document from a string.
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        let config: ModelsConfig =
            toml::from_str(raw).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), EngineError> {
        let mut seen = HashSet::new();
        for model in &self.models {
            if model.id.trim().is_empty() {
                return Err(EngineError::Config("model id must not be empty".into()));
            }
            if model.command.trim().is_empty() {
                return Err(EngineError::Config(format!(
                    "model '{}' has an empty command",
                    model.id
                )));
            }
            if !seen.insert(model.id.clone()) {
                return Err(EngineError::Config(format!(
                    "duplicate model id '{}'",
                    model.id
                )));
            }
        }

        if let Some(default) = &self.default_model {
            if !self.models.iter().any(|m| &m.id == default) {
                return Err(EngineError::Config(format!(
                    "default_model '{default}' is not defined"
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == model_id)
    }

    /// The configured default model, or the first one.
    pub fn default_descriptor(&self) -> Option<&ModelDescriptor> {
        match &self.default_model {
            Some(id) => self.get(id),
            None => self.models.first(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        default_model = "sd15"

        [[models]]
        id = "sd15"
        name = "Stable Diffusion 1.5"
        command = "/opt/engines/sd-server"
        args = ["--listen", "127.0.0.1", "--port", "{port}"]
        exec_mode = "server"
        port = 8080
        capabilities = ["text-to-image", "image-to-image"]

        [models.generation_params]
        sample_steps = 25
        cfg_scale = 7.0
        size = "512x512"

        [[models]]
        id = "esrgan"
        name = "Upscaler"
        command = "/opt/engines/upscale"
        exec_mode = "cli"
        capabilities = ["upscale"]
    "#;

    #[test]
    fn parses_sample_document() {
        let config = ModelsConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.models.len(), 2);

        let sd = config.get("sd15").unwrap();
        assert_eq!(sd.exec_mode, ExecMode::Server);
        assert_eq!(sd.load_mode, LoadMode::OnDemand);
        assert_eq!(sd.port, Some(8080));
        assert_eq!(sd.generation_params.sample_steps, Some(25));
        assert_eq!(sd.capabilities, vec![Capability::TextToImage, Capability::ImageToImage]);

        let up = config.get("esrgan").unwrap();
        assert_eq!(up.exec_mode, ExecMode::Cli);
        assert!(up.args.is_empty());
    }

    #[test]
    fn default_descriptor_follows_config() {
        let config = ModelsConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.default_descriptor().unwrap().id, "sd15");
    }

    #[test]
    fn port_placeholder_is_substituted() {
        let config = ModelsConfig::parse(SAMPLE).unwrap();
        let sd = config.get("sd15").unwrap();
        assert_eq!(
            sd.resolved_args(8123),
            vec!["--listen", "127.0.0.1", "--port", "8123"]
        );
        assert_eq!(sd.resolved_api_url(8123), "http://127.0.0.1:8123");
    }

    #[test]
    fn explicit_api_url_keeps_placeholder_substitution() {
        let doc = r#"
            [[models]]
            id = "m"
            name = "m"
            command = "/bin/true"
            exec_mode = "server"
            api_url = "http://localhost:{port}/sdapi"
        "#;
        let config = ModelsConfig::parse(doc).unwrap();
        assert_eq!(
            config.get("m").unwrap().resolved_api_url(9001),
            "http://localhost:9001/sdapi"
        );
    }

    #[test]
    fn duplicate_ids_rejected() {
        let doc = r#"
            [[models]]
            id = "m"
            name = "one"
            command = "/bin/true"
            exec_mode = "cli"

            [[models]]
            id = "m"
            name = "two"
            command = "/bin/true"
            exec_mode = "cli"
        "#;
        assert!(ModelsConfig::parse(doc).is_err());
    }

    #[test]
    fn unknown_default_rejected() {
        let doc = r#"
            default_model = "ghost"

            [[models]]
            id = "m"
            name = "m"
            command = "/bin/true"
            exec_mode = "cli"
        "#;
        assert!(ModelsConfig::parse(doc).is_err());
    }

    #[test]
    fn timeout_fallback_chain() {
        let config = ModelsConfig::parse(SAMPLE).unwrap();
        let sd = config.get("sd15").unwrap();
        assert_eq!(sd.startup_timeout_ms(Some(500)), 500);
        assert_eq!(sd.startup_timeout_ms(None), DEFAULT_STARTUP_TIMEOUT_MS);
    }
}
