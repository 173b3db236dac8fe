use std::{env, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, header};
use serde_json::{Value, json};

use crate::{
    config::OpenAiCompatibleOracleConfig,
    decision::{
        error::{DecisionError, invalid_input, oracle_failure},
        ports::{AlternativeRequest, OraclePort, Recommendation, RecommendationRequest},
    },
    oracle::prompt::{SYSTEM_PROMPT, alternative_prompt, parse_recommendation, recommendation_prompt},
};

const MAX_ERROR_BODY_CHARS: usize = 512;

/// Oracle backed by any `/chat/completions` endpoint that honours JSON response mode.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleOracle {
    client: Client,
    url: String,
    model: String,
    credential_env: Option<String>,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
    timeout: Duration,
}

impl OpenAiCompatibleOracle {
    pub fn new(
        config: &OpenAiCompatibleOracleConfig,
        timeout: Duration,
    ) -> Result<Self, DecisionError> {
        let endpoint = config.endpoint.trim();
        if endpoint.is_empty() {
            return Err(invalid_input("openai-compatible oracle requires endpoint"));
        }
        if config.model.trim().is_empty() {
            return Err(invalid_input("openai-compatible oracle requires model"));
        }

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| invalid_input(format!("failed to build http client: {}", err)))?;

        Ok(Self {
            client,
            url: format!("{}/chat/completions", endpoint.trim_end_matches('/')),
            model: config.model.clone(),
            credential_env: config.credential_env.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout,
        })
    }

    fn auth_header(&self) -> Result<Option<String>, DecisionError> {
        let Some(var) = &self.credential_env else {
            return Ok(None);
        };
        let token = env::var(var).map_err(|_| {
            oracle_failure(format!("missing credential environment variable {}", var))
        })?;
        Ok(Some(format!("Bearer {}", token)))
    }

    async fn complete(&self, prompt: String) -> Result<Recommendation, DecisionError> {
        let mut body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
            "response_format": {"type": "json_object"},
        });
        if let Some(temperature) = self.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = Value::Number(max_tokens.into());
        }

        let mut req_builder = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&body);
        if let Some(auth_header) = self.auth_header()? {
            req_builder = req_builder.header(header::AUTHORIZATION, auth_header);
        }

        let response = req_builder
            .send()
            .await
            .map_err(|err| oracle_failure(format!("openai-compatible request failed: {}", err)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            tracing::warn!(
                target: "oracle",
                status = status,
                body = %excerpt,
                "openai_compatible_http_error"
            );
            return Err(oracle_failure(format!(
                "openai-compatible backend returned HTTP {}",
                status
            )));
        }

        let payload: Value = response.json().await.map_err(|err| {
            oracle_failure(format!("openai-compatible response is not JSON: {}", err))
        })?;
        let content = payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| oracle_failure("openai-compatible response has no message content"))?;

        let recommendation = parse_recommendation(content)?;
        tracing::debug!(
            target: "oracle",
            model = %self.model,
            selected_treatment = %recommendation.selected_treatment,
            "openai_compatible_recommendation"
        );
        Ok(recommendation)
    }
}

#[async_trait]
impl OraclePort for OpenAiCompatibleOracle {
    async fn recommend(
        &self,
        req: RecommendationRequest,
    ) -> Result<Recommendation, DecisionError> {
        self.complete(recommendation_prompt(&req)).await
    }

    async fn find_alternative(
        &self,
        req: AlternativeRequest,
    ) -> Result<Recommendation, DecisionError> {
        self.complete(alternative_prompt(&req)).await
    }
}
