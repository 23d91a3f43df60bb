use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::tools::FeatureFlags;
use crate::util::{is_local_endpoint_url, parse_bool_flag};

pub const DEFAULT_API_URL: &str = "https://api.cerebras.ai/v1";
pub const DEFAULT_MODEL: &str = "llama3.1-70b";
pub const DEFAULT_TEMPERATURE: f32 = 0.75;
pub const DEFAULT_SEARCH_URL: &str = "http://localhost:5000";
pub const DEFAULT_IMAGE_URL: &str = "https://api.openai.com/v1/images/generations";
pub const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api_key: Option<String>,
    pub api_url: String,
    pub model: String,
    pub temperature: f32,
    pub system_prompt: Option<String>,
    pub search_url: String,
    pub image_url: String,
    pub image_model: String,
    pub max_tool_rounds: usize,
    pub features: FeatureFlags,
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            system_prompt: None,
            search_url: DEFAULT_SEARCH_URL.to_string(),
            image_url: DEFAULT_IMAGE_URL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            features: FeatureFlags::default(),
            data_dir: PathBuf::from(".chatwright"),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let defaults = Self::default();

        let api_key = env_string("CHATWRIGHT_API_KEY");
        let api_url = env_string("CHATWRIGHT_API_URL").unwrap_or(defaults.api_url);
        let model = env_string("CHATWRIGHT_MODEL").unwrap_or(defaults.model);
        let temperature = env_string("CHATWRIGHT_TEMPERATURE")
            .and_then(|v| v.parse::<f32>().ok())
            .map(|v| v.clamp(0.0, 2.0))
            .unwrap_or(defaults.temperature);
        let max_tool_rounds = env_string("CHATWRIGHT_MAX_TOOL_ROUNDS")
            .and_then(|v| v.parse::<usize>().ok())
            .map(|v| v.clamp(1, 32))
            .unwrap_or(defaults.max_tool_rounds);

        let features = FeatureFlags {
            web_grounding: env_flag("CHATWRIGHT_WEB_GROUNDING"),
            image_generation: env_flag("CHATWRIGHT_IMAGE_GENERATION"),
            learning: env_flag("CHATWRIGHT_LEARNING"),
            multi_turn_cot: env_flag("CHATWRIGHT_MULTI_TURN_COT"),
        };

        Ok(Self {
            api_key,
            api_url,
            model,
            temperature,
            system_prompt: env_string("CHATWRIGHT_SYSTEM_PROMPT"),
            search_url: env_string("CHATWRIGHT_SEARCH_URL").unwrap_or(defaults.search_url),
            image_url: env_string("CHATWRIGHT_IMAGE_URL").unwrap_or(defaults.image_url),
            image_model: env_string("CHATWRIGHT_IMAGE_MODEL").unwrap_or(defaults.image_model),
            max_tool_rounds,
            features,
            data_dir: env_string("CHATWRIGHT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
        })
    }

    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("CHATWRIGHT_API_URL", &self.api_url),
            ("CHATWRIGHT_SEARCH_URL", &self.search_url),
            ("CHATWRIGHT_IMAGE_URL", &self.image_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                bail!("Invalid {name} '{url}': expected http:// or https:// URL");
            }
        }

        if self.model.trim().is_empty() {
            bail!("CHATWRIGHT_MODEL must not be empty");
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            bail!(
                "Invalid temperature {}: expected a value between 0.0 and 2.0",
                self.temperature
            );
        }

        if self.max_tool_rounds == 0 {
            bail!("CHATWRIGHT_MAX_TOOL_ROUNDS must be at least 1");
        }

        Ok(())
    }

    pub fn is_local_endpoint(&self) -> bool {
        is_local_endpoint_url(&self.api_url)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .ok()
        .and_then(parse_bool_flag)
        .unwrap_or(false)
}
