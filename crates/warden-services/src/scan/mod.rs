//! Malware scanning: detector abstraction, retries, circuit breaking and coordination.

pub mod args;
pub mod binary;
pub mod circuit;
pub mod coordinator;
pub mod detector;
pub mod retry;

pub use args::{ScanArg, ScanCommand};
pub use binary::BinaryAllowList;
pub use circuit::CircuitBreaker;
pub use coordinator::{ScanCoordinator, ScanReport};
pub use detector::{Detector, DetectorError, DetectorOutcome, DetectorProbe};
pub use retry::RetryPolicy;

use std::sync::Arc;
use warden_core::models::DetectorKind;
use warden_core::ScanSettings;

use crate::services::{ClamdDetector, CommandDetector};

/// Instantiate the configured detectors in invocation order.
pub fn build_detectors(settings: &ScanSettings) -> Vec<Arc<dyn Detector>> {
    let allow_list = Arc::new(BinaryAllowList::new(&settings.binary_allowlist));
    settings
        .detectors
        .iter()
        .map(|kind| -> Arc<dyn Detector> {
            match kind {
                DetectorKind::Clamd => Arc::new(
                    ClamdDetector::new(settings.clamd_host.clone(), settings.clamd_port)
                        .with_io_timeout(settings.detector_timeout),
                ),
                DetectorKind::Clamscan => {
                    Arc::new(CommandDetector::clamscan(settings, allow_list.clone()))
                }
                DetectorKind::Yara => Arc::new(CommandDetector::yara(settings, allow_list.clone())),
            }
        })
        .collect()
}
