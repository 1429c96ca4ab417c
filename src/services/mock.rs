//! Scripted inference backend shared by the service tests.

use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::core::error::LlmError;
use crate::services::inference::InferenceService;
use crate::services::llm::{GenerateRequest, LlmClient};
use crate::services::response::{RawResponse, ResponseNormalizer};
use crate::services::retry::{RetryAttempt, RetryPolicy};
use crate::services::sanitize::Sanitizer;

type Responder = Box<dyn Fn(&GenerateRequest, RetryAttempt, usize) -> Result<RawResponse, LlmError> + Send + Sync>;

pub struct MockLlmClient {
    responder: Responder,
    pub call_count: Arc<Mutex<usize>>,
    pub requests: Arc<Mutex<Vec<(GenerateRequest, RetryAttempt)>>>,
    pub refresh_count: Arc<Mutex<usize>>,
    agent: bool,
}

impl fmt::Debug for MockLlmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockLlmClient").field("agent", &self.agent).finish()
    }
}

impl MockLlmClient {
    /// `responder` receives the request, the attempt and the zero-based call index.
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&GenerateRequest, RetryAttempt, usize) -> Result<RawResponse, LlmError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            call_count: Arc::new(Mutex::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
            refresh_count: Arc::new(Mutex::new(0)),
            agent: false,
        }
    }

    pub fn text(reply: &'static str) -> Self {
        Self::new(move |_, _, _| Ok(RawResponse::Text(reply.to_string())))
    }

    pub fn with_agent(mut self) -> Self {
        self.agent = true;
        self
    }

    pub fn calls(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|(r, _)| r.prompt.clone()).collect()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn invoke(&self, request: &GenerateRequest, attempt: RetryAttempt) -> Result<RawResponse, LlmError> {
        let index = {
            let mut count = self.call_count.lock().unwrap();
            *count += 1;
            *count - 1
        };
        self.requests.lock().unwrap().push((request.clone(), attempt));
        (self.responder)(request, attempt, index)
    }

    async fn refresh_credentials(&self) -> bool {
        *self.refresh_count.lock().unwrap() += 1;
        true
    }

    fn supports_agent(&self) -> bool {
        self.agent
    }
}

/// An inference service over `client` with no backoff delays.
pub fn service(client: Arc<MockLlmClient>) -> InferenceService {
    InferenceService::new(
        client,
        RetryPolicy::no_delay(2),
        ResponseNormalizer::default(),
        Sanitizer::default(),
        1000,
    )
}
