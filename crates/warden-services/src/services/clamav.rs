use async_trait::async_trait;
use clamav_client::{clean, TransportProtocol};
use std::io::{self, ErrorKind};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::str;
use std::time::{Duration, Instant};
use warden_core::models::DetectorKind;

use crate::scan::{Detector, DetectorError, DetectorOutcome, DetectorProbe};

/// clamd daemon reached over TCP. The file is streamed with INSTREAM, so the daemon
/// never needs read access to the quarantine.
#[derive(Clone)]
pub struct ClamdDetector {
    host: String,
    port: u16,
    io_timeout: Duration,
}

const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

impl ClamdDetector {
    /// # Arguments
    /// * `host` - clamd hostname
    /// * `port` - clamd port (typically 3310)
    pub fn new(host: String, port: u16) -> Self {
        Self {
            host,
            port,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    /// Bound on connecting and on every socket read or write.
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout.max(Duration::from_millis(1));
        self
    }

    fn transport(&self) -> TimedTcp {
        TimedTcp {
            address: format!("{}:{}", self.host, self.port),
            timeout: self.io_timeout,
        }
    }
}

/// TCP transport whose connect, read and write calls give up after `timeout`, so the
/// blocking thread returns once a hung daemon stops answering.
struct TimedTcp {
    address: String,
    timeout: Duration,
}

impl TransportProtocol for TimedTcp {
    type Stream = TcpStream;

    fn connect(&self) -> io::Result<TcpStream> {
        let mut last_err = None;
        for addr in self.address.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout))?;
                    stream.set_write_timeout(Some(self.timeout))?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(ErrorKind::AddrNotAvailable, "clamd address did not resolve")
        }))
    }
}

#[async_trait]
impl Detector for ClamdDetector {
    fn name(&self) -> &str {
        "clamd"
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Clamd
    }

    /// Sync client inside spawn_blocking. Socket timeouts end the blocking call even when
    /// the caller has already stopped waiting.
    async fn scan(&self, path: &Path) -> Result<DetectorOutcome, DetectorError> {
        let start = Instant::now();
        let target: PathBuf = path.to_path_buf();
        let transport = self.transport();
        let timeout_ms = self.io_timeout.as_millis() as u64;
        tracing::debug!(host = %self.host, port = %self.port, "Starting clamd scan");

        let response = tokio::task::spawn_blocking(move || {
            let meta = std::fs::symlink_metadata(&target)
                .map_err(|e| DetectorError::MalformedTarget(e.kind().to_string()))?;
            if !meta.file_type().is_file() {
                return Err(DetectorError::MalformedTarget(
                    "scan target is not a regular file".to_string(),
                ));
            }
            clamav_client::scan_file(&target, transport, None).map_err(|e| match e.kind() {
                ErrorKind::TimedOut | ErrorKind::WouldBlock => DetectorError::Timeout(timeout_ms),
                _ => DetectorError::Connection(e.to_string()),
            })
        })
        .await
        .map_err(|e| DetectorError::Failed(format!("clamd scan task join error: {}", e)))??;

        let outcome = interpret_response(&response)?;
        match &outcome {
            DetectorOutcome::Clean => tracing::debug!(
                duration_ms = start.elapsed().as_millis() as u64,
                "clamd scan completed: clean"
            ),
            DetectorOutcome::Infected(signature) => tracing::warn!(
                duration_ms = start.elapsed().as_millis() as u64,
                signature = %signature,
                "clamd detected a signature"
            ),
        }
        Ok(outcome)
    }

    async fn probe(&self) -> DetectorProbe {
        let transport = self.transport();
        let result = tokio::task::spawn_blocking(move || clamav_client::ping(transport)).await;

        match result {
            Ok(Ok(reply)) if reply == clamav_client::PONG => DetectorProbe {
                reachable: true,
                allow_listed: true,
                detail: None,
            },
            Ok(Ok(_)) => DetectorProbe {
                reachable: false,
                allow_listed: true,
                detail: Some("unexpected PING reply".to_string()),
            },
            Ok(Err(e)) => DetectorProbe {
                reachable: false,
                allow_listed: true,
                detail: Some(e.to_string()),
            },
            Err(e) => DetectorProbe {
                reachable: false,
                allow_listed: true,
                detail: Some(e.to_string()),
            },
        }
    }
}

/// Maps a raw clamd reply to an outcome. `ERROR` replies are never treated as detections.
fn interpret_response(response: &[u8]) -> Result<DetectorOutcome, DetectorError> {
    let text = str::from_utf8(response)
        .map_err(|_| DetectorError::Failed("clamd reply is not UTF-8".to_string()))?
        .trim_end_matches('\0')
        .trim();

    if text.ends_with("ERROR") {
        return Err(if text.contains("size limit") {
            DetectorError::MalformedTarget("clamd stream size limit exceeded".to_string())
        } else {
            DetectorError::Failed(text.to_string())
        });
    }

    if text.ends_with("FOUND") {
        let signature = text
            .split_once(':')
            .map(|(_, rest)| rest)
            .unwrap_or(text)
            .trim()
            .trim_end_matches("FOUND")
            .trim();
        let signature = if signature.is_empty() { "unknown" } else { signature };
        return Ok(DetectorOutcome::Infected(signature.to_string()));
    }

    match clean(response) {
        Ok(true) => Ok(DetectorOutcome::Clean),
        Ok(false) => Err(DetectorError::Failed(format!("unrecognised clamd reply: {}", text))),
        Err(e) => Err(DetectorError::Failed(format!(
            "Failed to parse clamd response: {}",
            e
        ))),
    }
}
