//! Fallback dispatcher: the single-answer path.
//!
//! Tries backends strictly in order, one call at a time, and returns the
//! first success. This is for latency-sensitive generation where agreement
//! across models is not required, only availability. Worst case is the sum
//! of per-call timeouts; each adapter call is individually bounded.

use crate::backend::{Backend, CompletionRequest, CompletionResult, ModelBackend};
use crate::config::Settings;
use crate::error::{BackendError, DispatchError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

pub struct Dispatcher {
    /// Adapters in fixed priority order.
    backends: Vec<Arc<dyn ModelBackend>>,
    per_call_timeout: Duration,
}

impl Dispatcher {
    pub fn new(backends: Vec<Arc<dyn ModelBackend>>, per_call_timeout: Duration) -> Self {
        Self {
            backends,
            per_call_timeout,
        }
    }

    pub fn from_credentials(credentials: &crate::backend::Credentials, settings: &Settings) -> Self {
        Self::new(credentials.adapters(), settings.per_call_timeout())
    }

    /// Backends this dispatcher will try, in order, for the given request.
    fn try_order(&self, preferred: Option<Backend>) -> Vec<&Arc<dyn ModelBackend>> {
        let mut order: Vec<&Arc<dyn ModelBackend>> = Vec::with_capacity(self.backends.len());
        if let Some(preferred) = preferred {
            if let Some(adapter) = self.backends.iter().find(|b| b.id() == preferred) {
                order.push(adapter);
            }
        }
        for adapter in &self.backends {
            if !order.iter().any(|b| b.id() == adapter.id()) {
                order.push(adapter);
            }
        }
        order
    }

    /// Try each available backend in order until one succeeds.
    ///
    /// Returns the first success, `AllBackendsFailed` carrying the last
    /// error once the list is exhausted, or `NoBackendsConfigured` when
    /// there is nothing to try.
    pub async fn dispatch(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, DispatchError> {
        if self.backends.is_empty() {
            return Err(DispatchError::NoBackendsConfigured);
        }

        let order = self.try_order(request.preferred_backend);
        let mut attempted = 0usize;
        let mut last: Option<BackendError> = None;

        for adapter in order {
            attempted += 1;
            let result = timeout(self.per_call_timeout, adapter.complete(request)).await;
            let err = match result {
                Ok(Ok(result)) => {
                    debug!(backend = %result.backend, "dispatch succeeded");
                    return Ok(result);
                }
                Ok(Err(err)) => err,
                Err(_) => BackendError::timeout(adapter.id(), self.per_call_timeout),
            };
            warn!(backend = %err.backend, "backend failed, falling through: {}", err);
            last = Some(err);
        }

        match last {
            Some(last) => Err(DispatchError::AllBackendsFailed { attempted, last }),
            None => Err(DispatchError::NoBackendsConfigured),
        }
    }
}
