//! Resilient execution of one logical provider call
//!
//! [`RequestExecutor::execute`] sends a [`RequestSpec`] through a
//! [`Transport`], retrying transport-class failures with linear backoff and
//! returning either the raw success response or exactly one classified
//! [`ErrorEnvelope`].

use std::future::Future;
use std::sync::Arc;

use tokio::time::Instant;
use url::Url;

use crate::http::business::{BusinessErrorDetector, ErrorCodeRule};
use crate::http::error::{ErrorClassifier, ErrorEnvelope, Outcome};
use crate::http::request::RequestSpec;
use crate::http::response::RawResponse;
use crate::http::retry::{RetryDecision, RetryPolicy};
use crate::http::transport::Transport;

/// Executes requests for one provider
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    classifier: ErrorClassifier,
    detector: Arc<dyn BusinessErrorDetector>,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("provider", &self.classifier.provider())
            .finish_non_exhaustive()
    }
}

impl RequestExecutor {
    /// Executor using the default [`ErrorCodeRule`] business-error detector
    pub fn new(provider: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            classifier: ErrorClassifier::new(provider),
            detector: Arc::new(ErrorCodeRule::default()),
        }
    }

    /// Replace the business-error detector
    pub fn with_detector<D>(mut self, detector: D) -> Self
    where
        D: BusinessErrorDetector + 'static,
    {
        self.detector = Arc::new(detector);
        self
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub fn provider(&self) -> &str {
        self.classifier.provider()
    }

    /// Send `spec`, retrying per `policy`, bounded by the spec's deadline
    pub async fn execute(
        &self,
        spec: &RequestSpec,
        policy: &RetryPolicy,
    ) -> Result<RawResponse, ErrorEnvelope> {
        let Some(deadline) = spec.deadline() else {
            return self.run(spec, policy).await;
        };

        let started = Instant::now();
        match tokio::time::timeout_at(deadline, self.run(spec, policy)).await {
            Ok(result) => result,
            Err(_) => {
                let envelope = self
                    .classifier
                    .classify(&Outcome::TimedOut(started.elapsed()));
                tracing::error!(
                    provider = self.provider(),
                    url = %loggable_url(spec.url()),
                    "call deadline passed"
                );
                Err(envelope)
            }
        }
    }

    /// Like [`execute`](Self::execute), but abandons the call as soon as
    /// `cancel` completes. The in-flight request is dropped.
    pub async fn execute_cancellable<C>(
        &self,
        spec: &RequestSpec,
        policy: &RetryPolicy,
        cancel: C,
    ) -> Result<RawResponse, ErrorEnvelope>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancel => {
                tracing::debug!(provider = self.provider(), "call cancelled by caller");
                Err(self.classifier.classify(&Outcome::Cancelled))
            }
            result = self.execute(spec, policy) => result,
        }
    }

    async fn run(
        &self,
        spec: &RequestSpec,
        policy: &RetryPolicy,
    ) -> Result<RawResponse, ErrorEnvelope> {
        let max_attempts = policy.attempt_budget();
        let url = loggable_url(spec.url());
        let mut attempt = 0;

        loop {
            attempt += 1;
            let envelope = match self.send_once(spec).await {
                Ok(response) => {
                    tracing::debug!(
                        provider = self.provider(),
                        attempt,
                        max_attempts,
                        method = %spec.method(),
                        url = %url,
                        status = response.status().as_u16(),
                        outcome = "success",
                        "provider call attempt"
                    );
                    return Ok(response);
                }
                Err(envelope) => envelope,
            };

            tracing::debug!(
                provider = self.provider(),
                attempt,
                max_attempts,
                method = %spec.method(),
                url = %url,
                status = envelope.status(),
                outcome = envelope.kind().as_str(),
                "provider call attempt"
            );

            if !envelope.is_transport_class() || envelope.is_business_failure() {
                return Err(envelope);
            }

            match policy.decide(attempt, &envelope) {
                RetryDecision::Retry { delay } => {
                    tracing::warn!(
                        provider = self.provider(),
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %envelope,
                        "retrying provider call"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::NoRetry => {
                    tracing::error!(
                        provider = self.provider(),
                        attempts = attempt,
                        url = %url,
                        error = %envelope,
                        "provider call failed"
                    );
                    return Err(envelope);
                }
            }
        }
    }

    async fn send_once(&self, spec: &RequestSpec) -> Result<RawResponse, ErrorEnvelope> {
        let response = match tokio::time::timeout(spec.timeout(), self.transport.send(spec)).await {
            Err(_) => return Err(self.classifier.classify(&Outcome::TimedOut(spec.timeout()))),
            Ok(Err(error)) => return Err(self.classifier.classify(&Outcome::Transport(&error))),
            Ok(Ok(response)) => response,
        };

        if let Some(business) = self.detector.detect(&response) {
            return Err(self.classifier.classify(&Outcome::Business {
                response: &response,
                error: &business,
            }));
        }
        if response.is_success() {
            Ok(response)
        } else {
            Err(self.classifier.classify(&Outcome::Response(&response)))
        }
    }
}

/// URL without its query string; some token endpoints carry credentials there
fn loggable_url(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}
