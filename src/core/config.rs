use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::error::ErrorKind;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_input")]
    pub input_folder: String,

    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default = "default_session")]
    pub session_folder: String,

    /// Reuse a previous session instead of starting a new one.
    #[serde(default)]
    pub session_id: Option<String>,

    #[serde(default)]
    pub unattended: bool,

    #[serde(default = "default_duration_minutes")]
    pub default_duration_minutes: u32,

    pub llm: LlmConfig,

    #[serde(default)]
    pub script: ScriptConfig,

    #[serde(default)]
    pub frames: FramesConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    pub provider: String, // "anthropic" or "gateway"

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_seconds: u64,
    #[serde(default = "default_stream_timeout")]
    pub stream_timeout_seconds: u64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_analysis_max_tokens")]
    pub analysis_max_tokens: u32,

    #[serde(default)]
    pub plausibility: PlausibilityConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    pub anthropic: Option<AnthropicConfig>,
    pub gateway: Option<GatewayConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    #[serde(default = "default_retry_on")]
    pub retry_on: Vec<ErrorKind>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            jitter_ms: default_jitter_ms(),
            retry_on: default_retry_on(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PlausibilityConfig {
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    /// Substrings that make a short reply acceptable anyway (dialogue labels).
    #[serde(default)]
    pub markers: Vec<String>,
}

impl Default for PlausibilityConfig {
    fn default() -> Self {
        Self {
            min_chars: default_min_chars(),
            markers: Vec::new(),
        }
    }
}

/// Substring lists used only where a backend reports failures as free text.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClassifierConfig {
    #[serde(default = "default_transient_patterns")]
    pub transient_patterns: Vec<String>,
    #[serde(default = "default_auth_patterns")]
    pub auth_patterns: Vec<String>,
    #[serde(default = "default_authorization_patterns")]
    pub authorization_patterns: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            transient_patterns: default_transient_patterns(),
            auth_patterns: default_auth_patterns(),
            authorization_patterns: default_authorization_patterns(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AnthropicConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_anthropic_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_anthropic_model")]
    pub model: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    #[serde(default = "default_gateway_model")]
    pub model: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_gateway_token_env")]
    pub token_env: String,
    pub agent: Option<AgentConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AgentConfig {
    pub agent_id: String,
    pub alias_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScriptConfig {
    #[serde(default = "default_speakers")]
    pub speakers: Vec<String>,
    /// Extra labels the sanitizer accepts as speaker lines (never prompted for).
    #[serde(default = "default_speaker_aliases")]
    pub speaker_aliases: Vec<String>,

    #[serde(default = "default_style_hints")]
    pub style_hints: Vec<StyleHint>,

    #[serde(default = "default_chapter_strategy")]
    pub chapter_strategy: String, // "heading" or "llm"

    #[serde(default = "default_max_rounds")]
    pub max_supplement_rounds: usize,
    #[serde(default = "default_section_chars")]
    pub supplement_section_chars: usize,

    pub analysis_prompt: Option<String>,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            speakers: default_speakers(),
            speaker_aliases: default_speaker_aliases(),
            style_hints: default_style_hints(),
            chapter_strategy: default_chapter_strategy(),
            max_supplement_rounds: default_max_rounds(),
            supplement_section_chars: default_section_chars(),
            analysis_prompt: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StyleHint {
    pub keyword: String,
    pub hint: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FramesConfig {
    #[serde(default = "default_frames_folder")]
    pub folder: String,
    #[serde(default = "default_max_images")]
    pub max_images: usize,
}

impl Default for FramesConfig {
    fn default() -> Self {
        Self {
            folder: default_frames_folder(),
            max_images: default_max_images(),
        }
    }
}

fn default_input() -> String {
    "input".to_string()
}
fn default_output() -> String {
    "output".to_string()
}
fn default_session() -> String {
    "sessions".to_string()
}
fn default_duration_minutes() -> u32 {
    3
}
fn default_connect_timeout() -> u64 {
    30
}
fn default_read_timeout() -> u64 {
    180
}
fn default_stream_timeout() -> u64 {
    60
}
fn default_max_tokens() -> u32 {
    5000
}
fn default_analysis_max_tokens() -> u32 {
    1024
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    2000
}
fn default_jitter_ms() -> u64 {
    500
}
fn default_retry_on() -> Vec<ErrorKind> {
    vec![ErrorKind::Transient]
}
fn default_min_chars() -> usize {
    1
}
fn default_anthropic_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}
fn default_anthropic_model() -> String {
    "claude-3-5-sonnet-20240620".to_string()
}
fn default_gateway_model() -> String {
    "anthropic.claude-3-5-sonnet-20240620-v1:0".to_string()
}
fn default_gateway_token_env() -> String {
    "GATEWAY_TOKEN".to_string()
}
fn default_speakers() -> Vec<String> {
    vec![
        "Narrator:".to_string(),
        "Reimu:".to_string(),
        "Marisa:".to_string(),
    ]
}
fn default_speaker_aliases() -> Vec<String> {
    vec![
        "ナレーション:".to_string(),
        "れいむ:".to_string(),
        "まりさ:".to_string(),
    ]
}
fn default_style_hints() -> Vec<StyleHint> {
    vec![
        StyleHint {
            keyword: "ギャル".to_string(),
            hint: "ギャル風の口調（「～だよね～」「マジ」「ヤバイ」などの言葉を使う）で".to_string(),
        },
        StyleHint {
            keyword: "お笑い".to_string(),
            hint: "お笑い風（ボケとツッコミの掛け合い、面白い例え話を含める）で".to_string(),
        },
        StyleHint {
            keyword: "gal".to_string(),
            hint: "in a casual gal-slang tone (\"totally\", \"no way\", \"so cute\")".to_string(),
        },
        StyleHint {
            keyword: "comedy".to_string(),
            hint: "as comedy banter (straight man and funny man, playful comparisons)".to_string(),
        },
    ]
}
fn default_chapter_strategy() -> String {
    "heading".to_string()
}
fn default_max_rounds() -> usize {
    3
}
fn default_section_chars() -> usize {
    600
}
fn default_frames_folder() -> String {
    "input/frames".to_string()
}
fn default_max_images() -> usize {
    20
}

pub fn default_transient_patterns() -> Vec<String> {
    [
        "throttling",
        "toomanyrequests",
        "too many requests",
        "serviceunavailable",
        "service unavailable",
        "internalserver",
        "internal server",
        "internalfailure",
        "dependencyfailed",
        "resourceinuse",
        "resourcelimitexceeded",
        "overloaded",
        "connectionerror",
        "timeout",
        "timed out",
        "failed to process eventstream",
        "stream processing error",
        "binary data",
        "connection reset",
        "network error",
        "socket error",
        "rate exceeded",
        "request throttled",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub fn default_auth_patterns() -> Vec<String> {
    [
        "security token",
        "unrecognizedclient",
        "unrecognized client",
        "expired token",
        "expiredtoken",
        "invalid api key",
        "invalid x-api-key",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub fn default_authorization_patterns() -> Vec<String> {
    ["accessdenied", "access denied", "not authorized to perform", "permission"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.yml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config =
            serde_yaml_ng::from_str(content).context("Failed to parse config.yml")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_duration_minutes == 0 {
            anyhow::bail!("default_duration_minutes must be at least 1");
        }
        if self.script.speakers.is_empty() {
            anyhow::bail!("script.speakers must name at least one speaker label");
        }
        if let Some(anthropic) = &self.llm.anthropic {
            if let Some(base) = &anthropic.base_url {
                url::Url::parse(base)
                    .with_context(|| format!("Invalid llm.anthropic.base_url: {}", base))?;
            }
        }
        if let Some(gateway) = &self.llm.gateway {
            url::Url::parse(&gateway.base_url)
                .with_context(|| format!("Invalid llm.gateway.base_url: {}", gateway.base_url))?;
        }
        match self.script.chapter_strategy.as_str() {
            "heading" | "llm" => Ok(()),
            other => anyhow::bail!("Unknown script.chapter_strategy: {}", other),
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.input_folder)?;
        fs::create_dir_all(&self.output_folder)?;
        fs::create_dir_all(&self.session_folder)?;
        Ok(())
    }
}
