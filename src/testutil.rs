//! Scripted in-process backends for dispatcher and consensus tests.

use crate::backend::{Backend, CompletionRequest, CompletionResult, ModelBackend, Usage};
use crate::error::{BackendError, BackendErrorKind};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What a scripted backend does when called.
#[derive(Debug, Clone)]
pub enum Script {
    /// Respond immediately with this text.
    Respond(String),
    /// Fail immediately.
    Fail(String),
    /// Sleep forever (until the caller's timeout fires).
    Hang,
}

pub struct ScriptedBackend {
    id: Backend,
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(id: Backend, script: Script) -> Arc<Self> {
        Arc::new(Self {
            id,
            script,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn respond(id: Backend, text: &str) -> Arc<Self> {
        Self::new(id, Script::Respond(text.to_string()))
    }

    pub fn fail(id: Backend, message: &str) -> Arc<Self> {
        Self::new(id, Script::Fail(message.to_string()))
    }

    pub fn hang(id: Backend) -> Arc<Self> {
        Self::new(id, Script::Hang)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn id(&self) -> Backend {
        self.id
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Respond(text) => Ok(CompletionResult {
                content: text.clone(),
                backend: self.id,
                model: request.model_for(self.id),
                usage: Usage::default(),
            }),
            Script::Fail(message) => Err(BackendError {
                backend: self.id,
                kind: BackendErrorKind::Api,
                message: message.clone(),
            }),
            Script::Hang => {
                loop {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
            }
        }
    }
}
