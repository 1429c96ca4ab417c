use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use futures_util::{stream, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::core::config::{AgentConfig, AnthropicConfig, Config, GatewayConfig, LlmConfig};
use crate::core::error::LlmError;
use crate::services::classify::ErrorClassifier;
use crate::services::frames::Frame;
use crate::services::response::{EventStream, RawResponse, StreamEvent};
use crate::services::retry::RetryAttempt;
use crate::utils::sse::SseDecoder;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum InvokeMode {
    #[default]
    Model,
    /// Hosted agent runtime; the session id is the base before retry suffixes.
    Agent { session_id: String },
}

#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub images: Vec<Frame>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub stream: bool,
    pub mode: InvokeMode,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens,
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_images(mut self, images: Vec<Frame>) -> Self {
        self.images = images;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn agent(mut self, session_id: impl Into<String>) -> Self {
        self.mode = InvokeMode::Agent {
            session_id: session_id.into(),
        };
        self
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    fn name(&self) -> &str;

    async fn invoke(&self, request: &GenerateRequest, attempt: RetryAttempt) -> Result<RawResponse, LlmError>;

    /// Re-reads the credential source. Returns true when something changed.
    async fn refresh_credentials(&self) -> bool {
        false
    }

    fn supports_agent(&self) -> bool {
        false
    }
}

pub fn create_llm(config: &Config) -> Result<Arc<dyn LlmClient>> {
    let llm = &config.llm;
    match llm.provider.as_str() {
        "anthropic" => {
            let cfg = llm.anthropic.as_ref().context("Anthropic config missing")?;
            Ok(Arc::new(AnthropicClient::new(cfg, llm)?))
        }
        "gateway" => {
            let cfg = llm.gateway.as_ref().context("Gateway config missing")?;
            Ok(Arc::new(GatewayClient::new(cfg, llm)?))
        }
        _ => Err(anyhow!("Unknown LLM provider: {}", llm.provider)),
    }
}

fn build_http_client(config: &LlmConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
        .read_timeout(Duration::from_secs(config.read_timeout_seconds))
        .build()
        .context("Failed to build HTTP client")
}

// --- Wire types ---
// Messages-style body shared by the Anthropic API and the gateway envelope.
#[derive(Serialize)]
struct MessagesRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    anthropic_version: Option<&'static str>,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

impl<'a> MessagesRequest<'a> {
    fn from_request(request: &'a GenerateRequest) -> Self {
        Self {
            model: None,
            anthropic_version: None,
            max_tokens: request.max_tokens,
            messages: vec![Message::user(request)],
            system: request.system.as_deref(),
            temperature: request.temperature,
            stream: false,
        }
    }
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: Vec<ContentBlock<'a>>,
}

impl<'a> Message<'a> {
    /// Image blocks first, then the prompt text.
    fn user(request: &'a GenerateRequest) -> Self {
        let mut content: Vec<ContentBlock<'a>> = request
            .images
            .iter()
            .map(|frame| ContentBlock::Image {
                source: ImageSource {
                    kind: "base64",
                    media_type: &frame.media_type,
                    data: &frame.data,
                },
            })
            .collect();
        content.push(ContentBlock::Text { text: &request.prompt });
        Self { role: "user", content }
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock<'a> {
    Image { source: ImageSource<'a> },
    Text { text: &'a str },
}

#[derive(Serialize)]
struct ImageSource<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: &'a str,
    data: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AgentRequest<'a> {
    input_text: &'a str,
    enable_trace: bool,
}

#[derive(Deserialize)]
struct AnthropicStreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<AnthropicDelta>,
}

#[derive(Deserialize)]
struct AnthropicDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct GatewayStreamEvent {
    #[serde(default)]
    chunk: Option<GatewayChunk>,
    #[serde(default)]
    completion: Option<String>,
    #[serde(default)]
    trace: Option<Value>,
}

#[derive(Deserialize)]
struct GatewayChunk {
    bytes: String,
}

async fn error_for_status(response: reqwest::Response, classifier: &ErrorClassifier) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classifier.classify_status(status.as_u16(), &body))
}

/// Adapts an SSE body into stream events. Transport failures mid-stream are
/// classified like any other transport failure.
fn sse_event_stream<F>(response: reqwest::Response, classifier: ErrorClassifier, to_event: F) -> EventStream
where
    F: Fn(String) -> Option<StreamEvent> + Send + 'static,
{
    let mut decoder = SseDecoder::new();
    let events = response
        .bytes_stream()
        .map(Some)
        .chain(stream::once(async { None }))
        .flat_map(move |item| {
            let batch: Vec<Result<StreamEvent, LlmError>> = match item {
                Some(Ok(chunk)) => decoder
                    .push(&chunk)
                    .into_iter()
                    .filter_map(&to_event)
                    .map(Ok)
                    .collect(),
                Some(Err(e)) => vec![Err(classifier.classify_transport(&e))],
                None => decoder.finish().into_iter().filter_map(&to_event).map(Ok).collect(),
            };
            stream::iter(batch)
        });
    Box::pin(events)
}

// --- Anthropic ---
#[derive(Debug)]
pub struct AnthropicClient {
    api_key: String,
    model: String,
    endpoint: String,
    client: reqwest::Client,
    classifier: ErrorClassifier,
}

const ANTHROPIC_API_VERSION: &str = "2023-06-01";

impl AnthropicClient {
    pub fn new(cfg: &AnthropicConfig, llm: &LlmConfig) -> Result<Self> {
        let api_key = match &cfg.api_key {
            Some(key) if !key.is_empty() => key.clone(),
            _ => std::env::var(&cfg.api_key_env)
                .with_context(|| format!("No Anthropic API key: set llm.anthropic.api_key or {}", cfg.api_key_env))?,
        };
        let base = cfg
            .base_url
            .as_deref()
            .unwrap_or("https://api.anthropic.com/v1")
            .trim_end_matches('/');

        info!("Anthropic client initialized (model {})", cfg.model);
        Ok(Self {
            api_key,
            model: cfg.model.clone(),
            endpoint: format!("{}/messages", base),
            client: build_http_client(llm)?,
            classifier: ErrorClassifier::from(&llm.classifier),
        })
    }

    fn payload<'a>(&'a self, request: &'a GenerateRequest) -> MessagesRequest<'a> {
        MessagesRequest {
            model: Some(self.model.as_str()),
            stream: request.stream,
            ..MessagesRequest::from_request(request)
        }
    }
}

fn anthropic_event(data: String) -> Option<StreamEvent> {
    let value: Value = serde_json::from_str(&data).ok()?;
    let event: AnthropicStreamEvent = serde_json::from_value(value.clone()).ok()?;
    match event.kind.as_str() {
        "content_block_delta" => event.delta.and_then(|d| d.text).map(StreamEvent::Text),
        "error" => Some(StreamEvent::Json(value)),
        _ => None,
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn invoke(&self, request: &GenerateRequest, _attempt: RetryAttempt) -> Result<RawResponse, LlmError> {
        if let InvokeMode::Agent { .. } = request.mode {
            return Err(LlmError::Config("the anthropic backend has no agent runtime".to_string()));
        }

        debug!(
            "[Anthropic] Sending request: model={}, images={}, stream={}",
            self.model,
            request.images.len(),
            request.stream
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .json(&self.payload(request))
            .send()
            .await
            .map_err(|e| self.classifier.classify_transport(&e))?;
        let response = error_for_status(response, &self.classifier).await?;

        if request.stream {
            return Ok(RawResponse::Events(sse_event_stream(
                response,
                self.classifier.clone(),
                anthropic_event,
            )));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| self.classifier.classify_transport(&e))?;
        Ok(RawResponse::Json(json))
    }
}

// --- Gateway ---
// Managed inference gateway fronting the vendor model and a hosted agent runtime.
#[derive(Debug)]
pub struct GatewayClient {
    base_url: String,
    model: String,
    static_token: Option<String>,
    token_env: String,
    token: RwLock<Option<String>>,
    agent: Option<AgentConfig>,
    client: reqwest::Client,
    classifier: ErrorClassifier,
}

const GATEWAY_ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

impl GatewayClient {
    pub fn new(cfg: &GatewayConfig, llm: &LlmConfig) -> Result<Self> {
        let static_token = cfg.token.clone().filter(|t| !t.is_empty());
        let token = static_token.clone().or_else(|| std::env::var(&cfg.token_env).ok());
        if token.is_none() {
            warn!("Gateway client created without a token ({} not set)", cfg.token_env);
        }

        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            static_token,
            token_env: cfg.token_env.clone(),
            token: RwLock::new(token),
            agent: cfg.agent.clone(),
            client: build_http_client(llm)?,
            classifier: ErrorClassifier::from(&llm.classifier),
        })
    }

    fn envelope<'a>(&self, request: &'a GenerateRequest) -> MessagesRequest<'a> {
        MessagesRequest {
            anthropic_version: Some(GATEWAY_ANTHROPIC_VERSION),
            ..MessagesRequest::from_request(request)
        }
    }

    fn model_url(&self, stream: bool) -> String {
        let action = if stream { "invoke-with-response-stream" } else { "invoke" };
        format!("{}/model/{}/{}", self.base_url, self.model, action)
    }

    fn agent_url(&self, agent: &AgentConfig, session_id: &str) -> String {
        format!(
            "{}/agents/{}/agentAliases/{}/sessions/{}/text",
            self.base_url, agent.agent_id, agent.alias_id, session_id
        )
    }

    async fn post<B: Serialize + Sync>(&self, url: &str, body: &B) -> Result<reqwest::Response, LlmError> {
        let mut builder = self.client.post(url).json(body);
        if let Some(token) = self.token.read().await.as_deref() {
            builder = builder.bearer_auth(token);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| self.classifier.classify_transport(&e))?;
        error_for_status(response, &self.classifier).await
    }
}

fn gateway_event(data: String) -> Option<StreamEvent> {
    let Ok(value) = serde_json::from_str::<Value>(&data) else {
        return Some(StreamEvent::Other(data));
    };
    let Ok(event) = serde_json::from_value::<GatewayStreamEvent>(value.clone()) else {
        return Some(StreamEvent::Json(value));
    };
    if let Some(chunk) = event.chunk {
        return match STANDARD.decode(&chunk.bytes) {
            Ok(bytes) => Some(StreamEvent::Chunk(bytes)),
            Err(_) => Some(StreamEvent::Chunk(chunk.bytes.into_bytes())),
        };
    }
    if let Some(completion) = event.completion {
        return Some(StreamEvent::Completion(completion));
    }
    if event.trace.is_some() {
        return Some(StreamEvent::Other(data));
    }
    Some(StreamEvent::Json(value))
}

#[async_trait]
impl LlmClient for GatewayClient {
    fn name(&self) -> &str {
        "gateway"
    }

    async fn invoke(&self, request: &GenerateRequest, attempt: RetryAttempt) -> Result<RawResponse, LlmError> {
        match &request.mode {
            InvokeMode::Agent { session_id } => {
                let agent = self
                    .agent
                    .as_ref()
                    .ok_or_else(|| LlmError::Config("llm.gateway.agent is not configured".to_string()))?;
                let session = attempt.session_id(session_id);
                debug!("[Gateway] Agent call: session={}, trace={}", session, attempt.trace_enabled());

                let body = AgentRequest {
                    input_text: &request.prompt,
                    enable_trace: attempt.trace_enabled(),
                };
                let response = self.post(&self.agent_url(agent, &session), &body).await?;
                Ok(RawResponse::Events(sse_event_stream(
                    response,
                    self.classifier.clone(),
                    gateway_event,
                )))
            }
            InvokeMode::Model => {
                debug!(
                    "[Gateway] Model call: model={}, images={}, stream={}",
                    self.model,
                    request.images.len(),
                    request.stream
                );
                let response = self
                    .post(&self.model_url(request.stream), &self.envelope(request))
                    .await?;

                if request.stream {
                    return Ok(RawResponse::Events(sse_event_stream(
                        response,
                        self.classifier.clone(),
                        gateway_event,
                    )));
                }
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| self.classifier.classify_transport(&e))?;
                Ok(RawResponse::Bytes(bytes.to_vec()))
            }
        }
    }

    async fn refresh_credentials(&self) -> bool {
        let fresh = self
            .static_token
            .clone()
            .or_else(|| std::env::var(&self.token_env).ok());
        let mut token = self.token.write().await;
        if *token == fresh {
            false
        } else {
            info!("Gateway token refreshed from {}", self.token_env);
            *token = fresh;
            true
        }
    }

    fn supports_agent(&self) -> bool {
        self.agent.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> Config {
        Config::from_yaml(yaml).unwrap()
    }

    fn gateway(token_env: &str, agent: bool) -> GatewayClient {
        let agent = if agent {
            "\n    agent:\n      agent_id: AG1\n      alias_id: AL1"
        } else {
            ""
        };
        let cfg = config(&format!(
            "llm:\n  provider: gateway\n  gateway:\n    base_url: https://gw.example.com/\n    model: m1\n    token_env: {}{}\n",
            token_env, agent
        ));
        GatewayClient::new(cfg.llm.gateway.as_ref().unwrap(), &cfg.llm).unwrap()
    }

    #[test]
    fn test_unknown_provider_and_missing_section() {
        let mut cfg = config("llm:\n  provider: anthropic\n");
        assert!(create_llm(&cfg).is_err());
        cfg.llm.provider = "ollama".to_string();
        assert!(create_llm(&cfg).is_err());
    }

    #[test]
    fn test_images_precede_text() {
        let request = GenerateRequest::new("Describe the flow", 100)
            .with_images(vec![Frame::from_bytes("image/jpeg", b"test")]);
        let content = serde_json::to_value(Message::user(&request).content).unwrap();
        let blocks = content.as_array().unwrap();

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0]["type"], "image");
        assert_eq!(blocks[0]["source"]["media_type"], "image/jpeg");
        assert_eq!(blocks[0]["source"]["data"], "dGVzdA==");
        assert_eq!(blocks[1]["text"], "Describe the flow");
    }

    #[test]
    fn test_gateway_envelope_and_urls() {
        let client = gateway("VIDEO2SCRIPT_TEST_TOKEN_UNSET", true);
        let request = GenerateRequest::new("hi", 500).with_temperature(0.7);
        let envelope = serde_json::to_value(client.envelope(&request)).unwrap();

        assert_eq!(envelope["anthropic_version"], "bedrock-2023-05-31");
        assert_eq!(envelope["max_tokens"], 500);
        assert_eq!(envelope["messages"][0]["role"], "user");
        assert!(envelope.get("model").is_none());
        assert!(envelope.get("system").is_none());
        assert!(envelope.get("stream").is_none());
        assert_eq!(client.model_url(false), "https://gw.example.com/model/m1/invoke");
        assert_eq!(
            client.model_url(true),
            "https://gw.example.com/model/m1/invoke-with-response-stream"
        );

        let agent = client.agent.clone().unwrap();
        assert_eq!(
            client.agent_url(&agent, &RetryAttempt { number: 1 }.session_id("s1")),
            "https://gw.example.com/agents/AG1/agentAliases/AL1/sessions/s1_retry1/text"
        );
        assert!(client.supports_agent());
    }

    #[test]
    fn test_anthropic_payload_fields() {
        let cfg = config("llm:\n  provider: anthropic\n  anthropic:\n    api_key: k\n    model: claude-test\n");
        let client = AnthropicClient::new(cfg.llm.anthropic.as_ref().unwrap(), &cfg.llm).unwrap();
        let request = GenerateRequest::new("hi", 64).with_system("be brief").streaming();
        let payload = serde_json::to_value(client.payload(&request)).unwrap();

        assert_eq!(payload["model"], "claude-test");
        assert_eq!(payload["system"], "be brief");
        assert_eq!(payload["stream"], true);
        assert!(payload.get("anthropic_version").is_none());
        assert!(payload.get("temperature").is_none());
        assert_eq!(payload["messages"][0]["content"][0]["type"], "text");
    }

    #[test]
    fn test_agent_request_field_names() {
        let body = serde_json::to_value(AgentRequest {
            input_text: "improve this",
            enable_trace: true,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"inputText": "improve this", "enableTrace": true}));
    }

    #[test]
    fn test_gateway_event_mapping() {
        let chunk = format!(r#"{{"chunk":{{"bytes":"{}"}}}}"#, STANDARD.encode("Reimu: hi"));
        assert_eq!(gateway_event(chunk), Some(StreamEvent::Chunk(b"Reimu: hi".to_vec())));
        assert_eq!(
            gateway_event(r#"{"completion":"x"}"#.to_string()),
            Some(StreamEvent::Completion("x".to_string()))
        );
        assert!(matches!(
            gateway_event(r#"{"trace":{"step":1}}"#.to_string()),
            Some(StreamEvent::Other(_))
        ));
        assert_eq!(
            gateway_event("not json".to_string()),
            Some(StreamEvent::Other("not json".to_string()))
        );
    }

    #[test]
    fn test_anthropic_event_mapping() {
        let delta = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#;
        assert_eq!(anthropic_event(delta.to_string()), Some(StreamEvent::Text("Hi".to_string())));
        assert_eq!(anthropic_event(r#"{"type":"ping"}"#.to_string()), None);
        assert!(matches!(
            anthropic_event(r#"{"type":"error","error":{"type":"overloaded_error"}}"#.to_string()),
            Some(StreamEvent::Json(_))
        ));
    }

    #[tokio::test]
    async fn test_gateway_refresh_rereads_env() {
        let var = "VIDEO2SCRIPT_TEST_GATEWAY_TOKEN";
        std::env::remove_var(var);
        let client = gateway(var, false);
        assert!(!client.supports_agent());
        assert!(!client.refresh_credentials().await);

        std::env::set_var(var, "fresh-token");
        assert!(client.refresh_credentials().await);
        assert!(!client.refresh_credentials().await);
        assert_eq!(client.token.read().await.as_deref(), Some("fresh-token"));
        std::env::remove_var(var);
    }

    #[tokio::test]
    async fn test_anthropic_rejects_agent_mode() {
        let cfg = config("llm:\n  provider: anthropic\n  anthropic:\n    api_key: k\n");
        let client = create_llm(&cfg).unwrap();
        let request = GenerateRequest::new("x", 10).agent("s");
        let err = client.invoke(&request, RetryAttempt::FIRST).await.unwrap_err();
        assert!(matches!(err, LlmError::Config(_)));
    }
}
