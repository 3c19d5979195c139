//! Detector health summary.

use serde::Serialize;
use warden_core::models::DetectorKind;

use crate::scan::ScanCoordinator;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectorStatus {
    pub name: String,
    pub kind: DetectorKind,
    pub reachable: bool,
    pub allow_listed: bool,
    pub circuit_open: bool,
}

/// Client-safe health report. Carries no paths, hosts or binary locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub detectors: Vec<DetectorStatus>,
    pub healthy: bool,
}

impl HealthReport {
    /// Probe every detector of `scanner`. Probe details are logged, not returned.
    pub async fn collect(scanner: &ScanCoordinator) -> Self {
        let mut detectors = Vec::with_capacity(scanner.detectors().len());
        for detector in scanner.detectors() {
            let probe = detector.probe().await;
            let circuit_open = match scanner.breaker().is_open(detector.name()).await {
                Ok(open) => open,
                Err(e) => {
                    tracing::warn!(detector = %detector.name(), error = %e, "Circuit state unreadable");
                    true
                }
            };
            if let Some(detail) = &probe.detail {
                tracing::warn!(detector = %detector.name(), detail = %detail, "Detector probe failed");
            }
            detectors.push(DetectorStatus {
                name: detector.name().to_string(),
                kind: detector.kind(),
                reachable: probe.reachable,
                allow_listed: probe.allow_listed,
                circuit_open,
            });
        }

        let healthy = !detectors.is_empty()
            && detectors
                .iter()
                .all(|d| d.reachable && d.allow_listed && !d.circuit_open);
        Self { detectors, healthy }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use warden_db::MemoryCounterStore;
    use warden_infra::CapturingEventSink;

    use crate::scan::{CircuitBreaker, RetryPolicy};
    use crate::services::ClamdDetector;

    #[tokio::test]
    async fn test_unreachable_clamd_is_unhealthy_and_hides_host() {
        let breaker = Arc::new(CircuitBreaker::new(
            Arc::new(MemoryCounterStore::new()),
            3,
            Duration::from_secs(60),
        ));
        let scanner = ScanCoordinator::new(
            vec![Arc::new(ClamdDetector::new("127.0.0.1".to_string(), 1)) as Arc<dyn crate::scan::Detector>],
            breaker,
            RetryPolicy::no_retry(),
            Duration::from_secs(1),
            Arc::new(CapturingEventSink::new()),
        );

        let report = HealthReport::collect(&scanner).await;
        assert!(!report.healthy);
        assert_eq!(report.detectors.len(), 1);
        assert!(!report.detectors[0].reachable);

        let json = serde_json::to_string(&report).unwrap();
        assert!(!json.contains("127.0.0.1"));
    }

    #[tokio::test]
    async fn test_no_detectors_is_unhealthy() {
        let scanner = ScanCoordinator::new(
            Vec::new(),
            Arc::new(CircuitBreaker::new(
                Arc::new(MemoryCounterStore::new()),
                3,
                Duration::from_secs(60),
            )),
            RetryPolicy::default(),
            Duration::from_secs(1),
            Arc::new(CapturingEventSink::new()),
        );
        assert!(!HealthReport::collect(&scanner).await.healthy);
    }
}
