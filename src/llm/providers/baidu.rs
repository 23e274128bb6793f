// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Baidu Qianfan provider
//!
//! Qianfan speaks the chat completions dialect, so this module only supplies
//! the endpoint, the fixed sampling parameters and authentication. A static
//! `bce-v3` API token wins when configured; otherwise an OAuth
//! client-credentials token is fetched on first use and cached.

use reqwest::Client;
use serde::Deserialize;
use tokio::sync::OnceCell;
use url::Url;

use crate::config::BaiduConfig;
use crate::error::{ApiError, NokodeError, Result};
use crate::llm::providers::openai::{Auth, OpenAiCompatProvider};
use crate::llm::transport::{map_reqwest_error, Transport};

pub const BAIDU_API_URL: &str = "https://qianfan.baidubce.com/v2/chat/completions";
pub const BAIDU_TOKEN_URL: &str = "https://aip.baidubce.com/oauth/2.0/token";
const BAIDU_TEMPERATURE: f32 = 0.7;
const BAIDU_TOP_P: f32 = 0.8;

/// OAuth client-credentials token, fetched once per process
pub struct BaiduTokenSource {
    api_key: String,
    secret_key: String,
    token_url: String,
    token: OnceCell<String>,
}

impl BaiduTokenSource {
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret_key: secret_key.into(),
            token_url: BAIDU_TOKEN_URL.to_string(),
            token: OnceCell::new(),
        }
    }

    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    /// The cached access token, fetching it on first call
    pub async fn access_token(&self, client: &Client) -> Result<String> {
        self.token
            .get_or_try_init(|| self.fetch(client))
            .await
            .cloned()
    }

    fn request_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.token_url)
            .map_err(|e| NokodeError::Config(format!("Invalid Baidu token URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("grant_type", "client_credentials")
            .append_pair("client_id", &self.api_key)
            .append_pair("client_secret", &self.secret_key);
        Ok(url)
    }

    async fn fetch(&self, client: &Client) -> Result<String> {
        tracing::debug!("fetching Baidu access token");
        let response = client
            .post(self.request_url()?)
            .send()
            .await
            .map_err(|e| NokodeError::Api(map_reqwest_error(&e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| NokodeError::Api(map_reqwest_error(&e)))?;

        if !(200..300).contains(&status) {
            return Err(NokodeError::Api(ApiError::AuthenticationFailed(format!(
                "token request failed: status {}, body: {}",
                status, body
            ))));
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            NokodeError::Api(ApiError::InvalidResponse(format!(
                "failed to parse token response: {}",
                e
            )))
        })?;

        parsed.access_token.ok_or_else(|| {
            NokodeError::Api(ApiError::AuthenticationFailed(
                "access_token not found in response".to_string(),
            ))
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// Build the Qianfan provider from configuration
pub fn baidu_provider(transport: Transport, config: &BaiduConfig) -> Result<OpenAiCompatProvider> {
    let auth = match (&config.api_token, &config.api_key, &config.secret_key) {
        (Some(token), _, _) if !token.is_empty() => Auth::Bearer(token.clone()),
        (_, Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
            let mut source = BaiduTokenSource::new(key.clone(), secret.clone());
            if let Some(token_url) = &config.token_url {
                source = source.with_token_url(token_url.clone());
            }
            Auth::OAuth(source)
        }
        _ => {
            return Err(NokodeError::Config(
                "Baidu authentication not configured: need either api_token or api_key + secret_key"
                    .to_string(),
            ))
        }
    };

    let mut provider = OpenAiCompatProvider::new(
        transport,
        "baidu",
        config.base_url.as_deref().unwrap_or(BAIDU_API_URL),
        config.model.clone(),
        auth,
    )
    .with_sampling(BAIDU_TEMPERATURE, BAIDU_TOP_P)
    .with_stream_flag(false);

    if let Some(app_id) = config.app_id.as_deref().filter(|id| !id.is_empty()) {
        provider = provider.with_header("appid", app_id);
    }
    Ok(provider)
}
