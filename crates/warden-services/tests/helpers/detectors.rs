use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use warden_core::models::DetectorKind;
use warden_services::scan::{Detector, DetectorError, DetectorOutcome, DetectorProbe};

/// Detector replaying a fixed script of results; the last entry repeats.
pub struct Scripted {
    name: &'static str,
    script: Mutex<VecDeque<Result<DetectorOutcome, DetectorError>>>,
    last: Result<DetectorOutcome, DetectorError>,
    calls: AtomicUsize,
}

impl Scripted {
    pub fn new(
        name: &'static str,
        script: Vec<Result<DetectorOutcome, DetectorError>>,
    ) -> Arc<Self> {
        let last = script.last().cloned().unwrap_or(Ok(DetectorOutcome::Clean));
        Arc::new(Self {
            name,
            script: Mutex::new(script.into()),
            last,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn clean(name: &'static str) -> Arc<dyn Detector> {
        Self::new(name, vec![Ok(DetectorOutcome::Clean)])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Detector for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Clamd
    }

    async fn scan(&self, path: &Path) -> Result<DetectorOutcome, DetectorError> {
        assert!(path.exists(), "detector must see the quarantined file");
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.last.clone())
    }

    async fn probe(&self) -> DetectorProbe {
        DetectorProbe {
            reachable: true,
            allow_listed: true,
            detail: None,
        }
    }
}

/// Detector that never answers within a test's lifetime.
pub struct Hanging;

#[async_trait]
impl Detector for Hanging {
    fn name(&self) -> &str {
        "hanging"
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Clamscan
    }

    async fn scan(&self, _path: &Path) -> Result<DetectorOutcome, DetectorError> {
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        Ok(DetectorOutcome::Clean)
    }

    async fn probe(&self) -> DetectorProbe {
        DetectorProbe {
            reachable: false,
            allow_listed: true,
            detail: None,
        }
    }
}
