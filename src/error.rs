// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types for nokode
//!
//! This module defines all error types used throughout the server.

use std::time::Duration;

use thiserror::Error;

/// Main error type for nokode operations
#[derive(Error, Debug)]
pub enum NokodeError {
    /// Vendor API errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// A retryable failure persisted through every allowed attempt
    #[error("Request failed after {attempts} attempts: {source}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        source: Box<NokodeError>,
    },

    /// The model kept calling tools past the turn ceiling
    #[error("Tool-calling loop exceeded {turns} turns without a terminal response")]
    LoopExceeded { turns: u32 },

    /// Tool execution errors
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// SQLite errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Vendor API error types
#[derive(Error, Debug)]
pub enum ApiError {
    /// Authentication failed (invalid API key)
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Rate limited by the API (HTTP 429)
    #[error("Rate limited (429): {body}")]
    RateLimited {
        retry_after: Option<u64>,
        body: String,
    },

    /// Vendor returned a non-success status that is not worth retrying
    #[error("API returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Vendor returned a 5xx
    #[error("API server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// Network connectivity error (DNS, refused, reset)
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid response from API
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// Timeout waiting for response
    #[error("Request timed out")]
    Timeout,

    /// Streaming error
    #[error("Streaming error: {0}")]
    StreamError(String),
}

/// How the retry wrapper should treat a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// HTTP 429; uses the long rate-limit schedule
    RateLimited { retry_after: Option<Duration> },
    /// HTTP 5xx
    Server,
    /// Transport failure before any status was received
    Network,
    /// Never retried
    Permanent,
}

impl NokodeError {
    /// Classify this error for the retry wrapper.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            NokodeError::Api(api) => match api {
                ApiError::RateLimited { retry_after, .. } => RetryClass::RateLimited {
                    retry_after: retry_after.map(Duration::from_secs),
                },
                ApiError::ServerError { .. } => RetryClass::Server,
                ApiError::Network(_) | ApiError::Timeout => RetryClass::Network,
                _ => RetryClass::Permanent,
            },
            NokodeError::Http(err) => {
                if err.is_timeout() || err.is_connect() || err.is_request() {
                    RetryClass::Network
                } else {
                    RetryClass::Permanent
                }
            }
            _ => RetryClass::Permanent,
        }
    }

    /// Whether the retry wrapper may try again after this error.
    pub fn is_retryable(&self) -> bool {
        self.retry_class() != RetryClass::Permanent
    }
}

/// Result type alias for nokode operations
pub type Result<T> = std::result::Result<T, NokodeError>;

impl From<toml::de::Error> for NokodeError {
    fn from(err: toml::de::Error) -> Self {
        NokodeError::Toml(err.to_string())
    }
}
