//! OpenAI-compatible chat completion client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{LlmError, redact_body};
use crate::llm::LlmConfig;
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, ResponseFormat,
};

const PROVIDER: &str = "openai";

/// Calls `{base_url}/chat/completions` with bearer auth.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    endpoint: String,
}

impl OpenAiProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("HTTP client error: {e}"),
            })?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
        })
    }

    fn request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages,
        });
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(max) = request.max_tokens {
            body["max_tokens"] = json!(max);
        }
        if request.response_format == ResponseFormat::JsonObject {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    id: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.request_body(&request);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(LlmError::RateLimited {
                provider: PROVIDER.to_string(),
                retry_after,
            });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(LlmError::AuthFailed {
                provider: PROVIDER.to_string(),
            });
        }

        let text = response.text().await.map_err(|e| LlmError::RequestFailed {
            provider: PROVIDER.to_string(),
            reason: format!("read body: {e}"),
        })?;
        if !status.is_success() {
            return Err(LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("status={status} body={}", redact_body(&text)),
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&text)?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: "no choices in response".to_string(),
            })?;
        let usage = parsed.usage.unwrap_or(ChatUsage {
            prompt_tokens: 0,
            completion_tokens: 0,
        });

        debug!(
            model = %self.model,
            input_tokens = usage.prompt_tokens,
            output_tokens = usage.completion_tokens,
            "LLM completion"
        );

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            finish_reason: FinishReason::from_api(choice.finish_reason.as_deref()),
            response_id: parsed.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::post;
    use axum::{Json, Router};
    use tokio::net::TcpListener;

    use super::*;
    use crate::llm::provider::ChatMessage;

    #[derive(Clone, Default)]
    struct Captured {
        body: Arc<Mutex<Option<serde_json::Value>>>,
        auth: Arc<Mutex<Option<String>>>,
    }

    async fn start(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://127.0.0.1:{port}/v1")
    }

    fn provider(base_url: String) -> OpenAiProvider {
        OpenAiProvider::new(&LlmConfig {
            api_key: SecretString::from("sk-test"),
            model: "gpt-4o-mini".into(),
            base_url,
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn sends_json_mode_request_and_parses_reply() {
        let captured = Captured::default();
        let router = Router::new()
            .route(
                "/v1/chat/completions",
                post(
                    |State(c): State<Captured>, headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
                        *c.body.lock().unwrap() = Some(body);
                        *c.auth.lock().unwrap() = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(String::from);
                        Json(json!({
                            "id": "chatcmpl-1",
                            "choices": [{
                                "message": {"role": "assistant", "content": "{\"summary\":\"x\"}"},
                                "finish_reason": "stop"
                            }],
                            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
                        }))
                    },
                ),
            )
            .with_state(captured.clone());
        let llm = provider(start(router).await);

        let request = CompletionRequest::new(vec![
            ChatMessage::system("classify"),
            ChatMessage::user("email"),
        ])
        .with_temperature(0.3)
        .with_json_output();
        let response = llm.complete(request).await.unwrap();

        assert_eq!(response.content, "{\"summary\":\"x\"}");
        assert_eq!(response.input_tokens, 12);
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert_eq!(response.response_id.as_deref(), Some("chatcmpl-1"));

        let body = captured.body.lock().unwrap().clone().unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "email");
        assert!((body["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
        assert_eq!(
            captured.auth.lock().unwrap().as_deref(),
            Some("Bearer sk-test")
        );
    }

    #[tokio::test]
    async fn maps_rate_limit_and_auth_failures() {
        let router = Router::new()
            .route(
                "/v1/chat/completions",
                post(|| async { (AxumStatus::TOO_MANY_REQUESTS, [("retry-after", "7")], "slow down") }),
            );
        let llm = provider(start(router).await);
        let err = llm
            .complete(CompletionRequest::new(vec![ChatMessage::user("x")]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LlmError::RateLimited { retry_after: Some(d), .. } if d == Duration::from_secs(7)
        ));

        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (AxumStatus::UNAUTHORIZED, "bad key") }),
        );
        let llm = provider(start(router).await);
        let err = llm
            .complete(CompletionRequest::new(vec![ChatMessage::user("x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::AuthFailed { .. }));
    }

    #[tokio::test]
    async fn empty_choices_is_invalid_response() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { Json(json!({"choices": []})) }),
        );
        let llm = provider(start(router).await);
        let err = llm
            .complete(CompletionRequest::new(vec![ChatMessage::user("x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn non_json_body_is_json_error() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { "<html>gateway</html>" }),
        );
        let llm = provider(start(router).await);
        let err = llm
            .complete(CompletionRequest::new(vec![ChatMessage::user("x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Json(_)));
    }
}
