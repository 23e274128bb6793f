// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Settings management for nokode
//!
//! Settings come from a YAML/TOML/JSON file (default `etc/nokode.yaml`),
//! then environment variables, then command-line flags.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::NokodeError;

mod env;
mod io;
mod validation;

pub use env::parse_duration;

/// Main settings structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Inbound HTTP server
    #[serde(default)]
    pub server: ServerConfig,

    /// Which vendor handles requests
    #[serde(default)]
    pub provider: ProviderKind,

    /// LLM provider configurations
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Outbound HTTP client timeouts and pooling
    #[serde(default)]
    pub http: HttpConfig,

    /// Retry and backoff settings for vendor calls
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Minimum spacing between outbound vendor calls
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Tool-calling loop settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Locations of the prompt, memory and database files
    #[serde(default)]
    pub paths: PathsConfig,

    /// JSON dumps of vendor traffic
    #[serde(default)]
    pub llm_log: LlmLogConfig,

    /// Response used when the model produced nothing usable
    #[serde(default)]
    pub fallback: FallbackConfig,
}

/// Supported LLM vendors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Anthropic,
    OpenAi,
    Qwen,
    Baidu,
    Spark,
}

impl ProviderKind {
    /// All supported provider names
    pub fn all() -> &'static [ProviderKind] {
        &[
            ProviderKind::Anthropic,
            ProviderKind::OpenAi,
            ProviderKind::Qwen,
            ProviderKind::Baidu,
            ProviderKind::Spark,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Qwen => "qwen",
            ProviderKind::Baidu => "baidu",
            ProviderKind::Spark => "spark",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = NokodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "openai" => Ok(ProviderKind::OpenAi),
            "qwen" | "dashscope" => Ok(ProviderKind::Qwen),
            "baidu" | "qianfan" => Ok(ProviderKind::Baidu),
            "spark" | "xfyun" => Ok(ProviderKind::Spark),
            other => Err(NokodeError::Config(format!(
                "Unsupported provider '{}'. Expected one of: anthropic, openai, qwen, baidu, spark",
                other
            ))),
        }
    }
}

/// Inbound server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bound for handling one request, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Largest accepted request body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Per-vendor configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub anthropic: VendorConfig,

    #[serde(default)]
    pub openai: VendorConfig,

    #[serde(default)]
    pub qwen: VendorConfig,

    #[serde(default)]
    pub baidu: BaiduConfig,

    #[serde(default)]
    pub spark: SparkConfig,
}

pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-haiku-20240307";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4-turbo-preview";
pub const DEFAULT_QWEN_MODEL: &str = "qwen-turbo";

/// Key/model/endpoint for a vendor with plain key authentication
///
/// Unset fields fall back to the vendor's defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VendorConfig {
    /// API key (usually supplied through the environment)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Override the vendor endpoint (tests, proxies)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl VendorConfig {
    pub fn model_or(&self, default: &str) -> String {
        self.model.clone().unwrap_or_else(|| default.to_string())
    }
}

/// Baidu Qianfan configuration
///
/// Either `api_token` (bce-v3) or `api_key` + `secret_key` (OAuth client
/// credentials) must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaiduConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,

    #[serde(default = "default_baidu_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
}

impl Default for BaiduConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            api_key: None,
            secret_key: None,
            app_id: None,
            model: default_baidu_model(),
            base_url: None,
            token_url: None,
        }
    }
}

/// iFlytek Spark configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparkConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,

    #[serde(default = "default_spark_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// System message sent ahead of the prompt
    #[serde(default = "default_spark_system_prompt")]
    pub system_prompt: String,
}

impl Default for SparkConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_secret: None,
            app_id: None,
            model: default_spark_model(),
            base_url: None,
            system_prompt: default_spark_system_prompt(),
        }
    }
}

/// Outbound HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// DNS lookup + TCP connect
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Whole request, including reading the body
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Longest wait between two reads (covers waiting for headers)
    #[serde(default = "default_request_timeout_secs")]
    pub read_timeout_secs: u64,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_max_idle_per_host")]
    pub max_idle_per_host: usize,

    /// Budget for reassembling a streamed response
    #[serde(default = "default_request_timeout_secs")]
    pub stream_timeout_secs: u64,
}

/// Retry and backoff configuration for vendor calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Retries for 429 and 5xx responses
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Retries for transport failures (refused, DNS, timeout)
    #[serde(default = "default_network_max_retries")]
    pub network_max_retries: u32,

    /// Base delay in milliseconds for the generic schedule
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap for the generic schedule
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// First delay after a 429
    #[serde(default = "default_rate_limit_base_delay_ms")]
    pub rate_limit_base_delay_ms: u64,

    /// Growth factor of the 429 schedule
    #[serde(default = "default_rate_limit_multiplier")]
    pub rate_limit_multiplier: u32,

    /// Jitter percentage (0.0 to 1.0) for randomizing delays
    #[serde(default)]
    pub jitter: f64,
}

/// Outbound rate limiting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Minimum spacing between two vendor calls, in milliseconds
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    /// Per-provider overrides of `min_interval_ms`
    #[serde(default)]
    pub per_provider: HashMap<ProviderKind, u64>,
}

impl RateLimitConfig {
    /// Interval that applies to the given provider
    pub fn interval_for(&self, provider: ProviderKind) -> u64 {
        self.per_provider
            .get(&provider)
            .copied()
            .unwrap_or(self.min_interval_ms)
    }
}

/// Tool-calling loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum model round-trips for one request
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_prompt_path")]
    pub prompt: PathBuf,

    #[serde(default = "default_memory_path")]
    pub memory: PathBuf,

    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

/// Vendor traffic dumps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmLogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_llm_log_dir")]
    pub dir: PathBuf,
}

/// Default response when nothing else could be extracted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "default_fallback_status")]
    pub status: u16,

    #[serde(default = "default_fallback_content_type")]
    pub content_type: String,

    #[serde(default = "default_fallback_body")]
    pub body: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_timeout_ms() -> u64 {
    300_000
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_baidu_model() -> String {
    "ernie-4.0-8k".to_string()
}

fn default_spark_model() -> String {
    "x1".to_string()
}

fn default_spark_system_prompt() -> String {
    "You are a web server. You can use the database, webResponse and updateMemory tools to handle requests. Always use tools appropriately.".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_idle_timeout_secs() -> u64 {
    90
}

fn default_max_idle_per_host() -> usize {
    100
}

fn default_max_retries() -> u32 {
    5
}

fn default_network_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    16000
}

fn default_rate_limit_base_delay_ms() -> u64 {
    30_000
}

fn default_rate_limit_multiplier() -> u32 {
    3
}

fn default_min_interval_ms() -> u64 {
    3000
}

fn default_max_turns() -> u32 {
    10
}

fn default_prompt_path() -> PathBuf {
    PathBuf::from("prompt.md")
}

fn default_memory_path() -> PathBuf {
    PathBuf::from("memory.md")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("database.db")
}

fn default_true() -> bool {
    true
}

fn default_llm_log_dir() -> PathBuf {
    PathBuf::from("logs/llm")
}

fn default_fallback_status() -> u16 {
    200
}

fn default_fallback_content_type() -> String {
    "text/plain; charset=utf-8".to_string()
}

fn default_fallback_body() -> String {
    "No response generated".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_ms: default_timeout_ms(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            read_timeout_secs: default_request_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_idle_per_host: default_max_idle_per_host(),
            stream_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            network_max_retries: default_network_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            rate_limit_base_delay_ms: default_rate_limit_base_delay_ms(),
            rate_limit_multiplier: default_rate_limit_multiplier(),
            jitter: 0.0,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            per_provider: HashMap::new(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            prompt: default_prompt_path(),
            memory: default_memory_path(),
            database: default_database_path(),
        }
    }
}

impl Default for LlmLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_llm_log_dir(),
        }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            status: default_fallback_status(),
            content_type: default_fallback_content_type(),
            body: default_fallback_body(),
        }
    }
}
