//! Scan coordination: breaker check, ordered detector runs, retries and verdicts.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use warden_core::models::{ScanPhase, ScanVerdict};
use warden_core::{EventSink, LogLevel, SecurityEvent};

use super::circuit::CircuitBreaker;
use super::detector::{Detector, DetectorError, DetectorOutcome};
use super::retry::RetryPolicy;

/// Verdict and terminal phase of one scan attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub verdict: ScanVerdict,
    pub phase: ScanPhase,
}

impl ScanReport {
    fn new(verdict: ScanVerdict, phase: ScanPhase) -> Self {
        Self { verdict, phase }
    }
}

pub struct ScanCoordinator {
    detectors: Vec<Arc<dyn Detector>>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    timeout: Duration,
    events: Arc<dyn EventSink>,
}

impl ScanCoordinator {
    pub fn new(
        detectors: Vec<Arc<dyn Detector>>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        timeout: Duration,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            detectors,
            breaker,
            retry,
            timeout,
            events,
        }
    }

    pub fn detectors(&self) -> &[Arc<dyn Detector>] {
        &self.detectors
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run every configured detector against `path`. Only a `Clean` verdict permits promotion.
    #[tracing::instrument(skip(self, path, correlation_id), fields(correlation_id = %correlation_id))]
    pub async fn scan(&self, path: &Path, correlation_id: &str) -> ScanReport {
        if self.detectors.is_empty() {
            tracing::error!("Scan required but no detectors are configured");
            return ScanReport::new(
                ScanVerdict::Unavailable("no detectors configured".to_string()),
                ScanPhase::InfraFailure,
            );
        }

        for detector in &self.detectors {
            if self.circuit_open(detector.name()).await {
                self.events.emit(
                    SecurityEvent::new("scan.circuit_open", LogLevel::Error, correlation_id)
                        .with("detector", detector.name()),
                );
                return ScanReport::new(
                    ScanVerdict::Unavailable(format!("circuit open for {}", detector.name())),
                    ScanPhase::InfraFailure,
                );
            }
        }

        let start = Instant::now();
        let mut phase = ScanPhase::Running;
        tracing::debug!(phase = ?phase, detectors = self.detectors.len(), "Scan started");

        for detector in &self.detectors {
            match self.run_with_retry(detector.as_ref(), path).await {
                Ok(DetectorOutcome::Clean) => {}
                Ok(DetectorOutcome::Infected(signature)) => {
                    self.close_circuit(detector.name()).await;
                    phase = ScanPhase::Infected;
                    tracing::warn!(
                        detector = %detector.name(),
                        signature = %signature,
                        phase = ?phase,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Detector reported an infection"
                    );
                    self.events.emit(
                        SecurityEvent::new("scan.infected", LogLevel::Warn, correlation_id)
                            .with("detector", detector.name())
                            .with("signature", signature.as_str()),
                    );
                    return ScanReport::new(ScanVerdict::Infected(detector.name().to_string()), phase);
                }
                Err(error) => {
                    self.count_failure(detector.name()).await;
                    self.events.emit(
                        SecurityEvent::new("scan.unavailable", LogLevel::Error, correlation_id)
                            .with("detector", detector.name())
                            .with("transient", error.is_transient()),
                    );
                    tracing::error!(detector = %detector.name(), error = %error, "Detector failed");

                    return match error {
                        DetectorError::MalformedTarget(reason) => {
                            ScanReport::new(ScanVerdict::ValidationFailed(reason), ScanPhase::ValidationFailure)
                        }
                        other => ScanReport::new(
                            ScanVerdict::Unavailable(format!("{} unavailable: {}", detector.name(), kind_of(&other))),
                            ScanPhase::InfraFailure,
                        ),
                    };
                }
            }
        }

        for detector in &self.detectors {
            self.close_circuit(detector.name()).await;
        }
        phase = ScanPhase::Clean;
        tracing::debug!(
            phase = ?phase,
            duration_ms = start.elapsed().as_millis() as u64,
            "Scan completed: clean"
        );
        ScanReport::new(ScanVerdict::Clean, phase)
    }

    /// Attempts `detector` until it answers, fails permanently or runs out of attempts.
    async fn run_with_retry(
        &self,
        detector: &dyn Detector,
        path: &Path,
    ) -> Result<DetectorOutcome, DetectorError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.timeout, detector.scan(path)).await {
                Ok(result) => result,
                Err(_) => Err(DetectorError::Timeout(self.timeout.as_millis() as u64)),
            };

            match result {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::debug!(
                        detector = %detector.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient detector error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn circuit_open(&self, detector: &str) -> bool {
        match self.breaker.is_open(detector).await {
            Ok(open) => open,
            Err(e) => {
                tracing::error!(detector = %detector, error = %e, "Circuit state unreadable, failing closed");
                true
            }
        }
    }

    async fn count_failure(&self, detector: &str) {
        if let Err(e) = self.breaker.record_failure(detector).await {
            tracing::error!(detector = %detector, error = %e, "Failed to record detector failure");
        }
    }

    async fn close_circuit(&self, detector: &str) {
        if let Err(e) = self.breaker.record_success(detector).await {
            tracing::error!(detector = %detector, error = %e, "Failed to reset detector circuit");
        }
    }
}

/// Coarse failure class safe to carry in a verdict.
fn kind_of(error: &DetectorError) -> &'static str {
    match error {
        DetectorError::Timeout(_) => "timeout",
        DetectorError::Connection(_) => "connection failed",
        DetectorError::MissingBinary(_) => "binary missing",
        DetectorError::NotAllowListed(_) => "binary not allow-listed",
        DetectorError::RulesUnavailable(_) => "rules unavailable",
        DetectorError::MalformedTarget(_) => "malformed target",
        DetectorError::Failed(_) => "detector error",
    }
}
