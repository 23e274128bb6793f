// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Shared outbound HTTP plumbing for vendor codecs
//!
//! One pooled `reqwest::Client` per process. Every vendor call goes through
//! [`Transport::post_json`] or [`Transport::post_stream`], which wait on the
//! rate limiter once, retry per the [`RetryPolicy`], dump traffic through the
//! [`LlmLogger`] and turn HTTP failures into [`ApiError`] values.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, Response};
use serde_json::Value;

use crate::config::HttpConfig;
use crate::error::{ApiError, NokodeError, Result};
use crate::llm::llm_log::LlmLogger;
use crate::llm::providers::common::parse_retry_after_seconds;
use crate::llm::rate_limit::RateLimiter;
use crate::llm::retry::{with_retry, RetryPolicy};

/// Pooled client plus the resilience layers around it
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    retry: RetryPolicy,
    limiter: Arc<RateLimiter>,
    logger: LlmLogger,
}

impl Transport {
    /// Build the pooled client from HTTP settings
    pub fn new(
        http: &HttpConfig,
        retry: RetryPolicy,
        limiter: Arc<RateLimiter>,
        logger: LlmLogger,
    ) -> Result<Self> {
        Ok(Self::with_client(build_client(http)?, retry, limiter, logger))
    }

    /// Wrap an existing client
    pub fn with_client(
        client: Client,
        retry: RetryPolicy,
        limiter: Arc<RateLimiter>,
        logger: LlmLogger,
    ) -> Self {
        Self {
            client,
            retry,
            limiter,
            logger,
        }
    }

    /// Transport with default timeouts, no retries, no spacing and no dumps
    pub fn direct() -> Self {
        Self::with_client(
            Client::new(),
            RetryPolicy::none(),
            Arc::new(RateLimiter::unlimited()),
            LlmLogger::disabled(),
        )
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn logger(&self) -> &LlmLogger {
        &self.logger
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// POST a JSON body and return the successful response body as text
    pub async fn post_json(
        &self,
        provider: &str,
        url: &str,
        headers: &[(String, String)],
        body: &Value,
    ) -> Result<String> {
        self.limiter.acquire().await;
        self.logger.log_request(provider, url, headers, body).await;

        with_retry(
            move || async move {
                let response = self.send_once(url, headers, body).await?;
                let status = response.status().as_u16();
                let response_headers = response.headers().clone();
                let text = response
                    .text()
                    .await
                    .map_err(|e| NokodeError::Api(map_reqwest_error(&e)))?;
                self.logger.log_response(provider, status, &text).await;

                if (200..300).contains(&status) {
                    Ok(text)
                } else {
                    Err(status_error(status, &response_headers, text))
                }
            },
            &self.retry,
            provider,
        )
        .await
    }

    /// POST a JSON body and return the response once its status is a success,
    /// leaving the body unread for the caller to stream
    pub async fn post_stream(
        &self,
        provider: &str,
        url: &str,
        headers: &[(String, String)],
        body: &Value,
    ) -> Result<Response> {
        self.limiter.acquire().await;
        self.logger.log_request(provider, url, headers, body).await;

        with_retry(
            move || async move {
                let response = self.send_once(url, headers, body).await?;
                let status = response.status().as_u16();
                if (200..300).contains(&status) {
                    return Ok(response);
                }

                let response_headers = response.headers().clone();
                let text = response.text().await.unwrap_or_default();
                self.logger.log_response(provider, status, &text).await;
                Err(status_error(status, &response_headers, text))
            },
            &self.retry,
            provider,
        )
        .await
    }

    async fn send_once(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &Value,
    ) -> Result<Response> {
        let mut request = self.client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        request
            .send()
            .await
            .map_err(|e| NokodeError::Api(map_reqwest_error(&e)))
    }
}

/// Pooled client with the configured connect/read/total timeouts
pub fn build_client(http: &HttpConfig) -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(http.connect_timeout_secs))
        .timeout(Duration::from_secs(http.request_timeout_secs))
        .read_timeout(Duration::from_secs(http.read_timeout_secs))
        .pool_idle_timeout(Duration::from_secs(http.idle_timeout_secs))
        .pool_max_idle_per_host(http.max_idle_per_host)
        .tcp_keepalive(Duration::from_secs(30))
        .build()
        .map_err(|e| NokodeError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// Turn a transport-level reqwest failure into an API error
pub fn map_reqwest_error(err: &reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Network(err.to_string())
    }
}

/// Map a non-success status to the error the retry wrapper understands
pub fn status_error(status: u16, headers: &HeaderMap, body: String) -> NokodeError {
    let api = match status {
        429 => ApiError::RateLimited {
            retry_after: parse_retry_after_seconds(headers),
            body,
        },
        401 | 403 => ApiError::AuthenticationFailed(body),
        500..=599 => ApiError::ServerError {
            status,
            message: body,
        },
        _ => ApiError::Status { status, body },
    };
    NokodeError::Api(api)
}
