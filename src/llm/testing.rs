use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{Completion, CompletionRequest, LlmBackend, TokenUsage};
use crate::error::{DealscopeError, Result};

type Responder = Box<dyn Fn(&CompletionRequest) -> Result<String> + Send + Sync>;

/// Test double that answers with a closure and records every prompt it sees.
pub struct ScriptedBackend {
    model: String,
    responder: Responder,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new<F>(model: &str, responder: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            model: model.to_string(),
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn fixed(model: &str, reply: &str) -> Self {
        let reply = reply.to_string();
        Self::new(model, move |_| Ok(reply.clone()))
    }

    pub fn quota_exhausted(model: &str) -> Self {
        let name = model.to_string();
        Self::new(model, move |_| {
            Err(DealscopeError::QuotaExceeded {
                model: name.clone(),
                message: "RESOURCE_EXHAUSTED".to_string(),
            })
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());

        let content = (self.responder)(request)?;
        Ok(Completion {
            usage: TokenUsage {
                input_tokens: (request.prompt.len() / 4) as u64,
                output_tokens: (content.len() / 4) as u64,
            },
            content,
            model: self.model.clone(),
            latency: Duration::from_millis(1),
        })
    }
}
