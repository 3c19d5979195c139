//! One-shot scanner binaries (clamscan, yara) run against a private copy of the upload.

use async_trait::async_trait;
use rand::RngCore;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use warden_core::models::DetectorKind;
use warden_core::ScanSettings;

use crate::scan::{
    BinaryAllowList, Detector, DetectorError, DetectorOutcome, DetectorProbe, ScanArg, ScanCommand,
};

const REMOVE_ATTEMPTS: u32 = 3;
const REMOVE_BACKOFF: Duration = Duration::from_millis(50);
const MAX_SIGNATURE_LEN: usize = 128;

/// Owner-only directory holding per-scan copies.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.root, std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(())
    }

    /// Copy `source` under a random name, refusing anything larger than `max_bytes`.
    fn copy_from(&self, source: &Path, max_bytes: u64) -> Result<ScratchCopy, DetectorError> {
        let meta = std::fs::symlink_metadata(source)
            .map_err(|e| DetectorError::MalformedTarget(e.kind().to_string()))?;
        if !meta.file_type().is_file() {
            return Err(DetectorError::MalformedTarget(
                "scan target is not a regular file".to_string(),
            ));
        }
        if meta.len() > max_bytes {
            return Err(DetectorError::MalformedTarget(format!(
                "scan target exceeds {} bytes",
                max_bytes
            )));
        }

        self.ensure()
            .map_err(|e| DetectorError::Failed(format!("scratch directory unavailable: {}", e)))?;

        let mut name = [0u8; 16];
        rand::rng().fill_bytes(&mut name);
        let path = self.root.join(hex::encode(name));

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut out = options
            .open(&path)
            .map_err(|e| DetectorError::Failed(format!("scratch copy failed: {}", e.kind())))?;
        let copy = ScratchCopy {
            path,
            removed: false,
        };

        let src = std::fs::File::open(source)
            .map_err(|e| DetectorError::MalformedTarget(e.kind().to_string()))?;
        let mut limited = src.take(max_bytes + 1);
        let copied = std::io::copy(&mut limited, &mut out)
            .map_err(|e| DetectorError::Failed(format!("scratch copy failed: {}", e.kind())))?;
        if copied > max_bytes {
            return Err(DetectorError::MalformedTarget(format!(
                "scan target exceeds {} bytes",
                max_bytes
            )));
        }
        out.flush()
            .map_err(|e| DetectorError::Failed(format!("scratch copy failed: {}", e.kind())))?;
        Ok(copy)
    }
}

/// Private copy of a scan target; removed on [`ScratchCopy::remove`] or drop.
#[derive(Debug)]
struct ScratchCopy {
    path: PathBuf,
    removed: bool,
}

impl ScratchCopy {
    async fn remove(mut self) {
        for attempt in 1..=REMOVE_ATTEMPTS {
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {
                    self.removed = true;
                    return;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    self.removed = true;
                    return;
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Failed to remove scratch copy");
                    if attempt < REMOVE_ATTEMPTS {
                        tokio::time::sleep(REMOVE_BACKOFF).await;
                    }
                }
            }
        }
    }
}

impl Drop for ScratchCopy {
    fn drop(&mut self) {
        if !self.removed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != ErrorKind::NotFound {
                    tracing::error!(error = %e, "Scratch copy left behind");
                }
            }
        }
    }
}

/// Detector that spawns an allow-listed scanner binary.
pub struct CommandDetector {
    kind: DetectorKind,
    binary: String,
    allow_list: Arc<BinaryAllowList>,
    rules: Option<PathBuf>,
    scratch: ScratchDir,
    copy_max_bytes: u64,
    timeout: Duration,
}

impl CommandDetector {
    pub fn clamscan(settings: &ScanSettings, allow_list: Arc<BinaryAllowList>) -> Self {
        Self {
            kind: DetectorKind::Clamscan,
            binary: settings.clamscan_path.clone(),
            allow_list,
            rules: None,
            scratch: ScratchDir::new(settings.scratch_dir.clone()),
            copy_max_bytes: settings.copy_max_bytes,
            timeout: settings.detector_timeout,
        }
    }

    pub fn yara(settings: &ScanSettings, allow_list: Arc<BinaryAllowList>) -> Self {
        Self {
            kind: DetectorKind::Yara,
            binary: settings.yara_path.clone(),
            allow_list,
            rules: settings.yara_rules.clone(),
            scratch: ScratchDir::new(settings.scratch_dir.clone()),
            copy_max_bytes: settings.copy_max_bytes,
            timeout: settings.detector_timeout,
        }
    }

    /// Rule file for yara: must exist as a regular file.
    fn rules_file(&self) -> Result<&Path, DetectorError> {
        let rules = self
            .rules
            .as_deref()
            .ok_or_else(|| DetectorError::RulesUnavailable("no rule file configured".to_string()))?;
        match std::fs::metadata(rules) {
            Ok(meta) if meta.is_file() => Ok(rules),
            Ok(_) => Err(DetectorError::RulesUnavailable(
                "rule path is not a regular file".to_string(),
            )),
            Err(e) => Err(DetectorError::RulesUnavailable(e.kind().to_string())),
        }
    }

    fn command_for(&self, target: &Path) -> Result<ScanCommand, DetectorError> {
        match self.kind {
            DetectorKind::Yara => {
                let rules = self.rules_file()?;
                let mut flags = vec![
                    ScanArg::NoWarnings,
                    ScanArg::FastScan,
                    ScanArg::Timeout(self.timeout.as_secs()),
                ];
                if rules.extension().is_some_and(|ext| ext == "yarc") {
                    flags.push(ScanArg::CompiledRules);
                }
                Ok(ScanCommand::new(flags, target).with_rules(rules))
            }
            _ => Ok(ScanCommand::new(
                vec![
                    ScanArg::NoSummary,
                    ScanArg::InfectedOnly,
                    ScanArg::Stdout,
                    ScanArg::MaxFileSize(self.copy_max_bytes),
                    ScanArg::MaxScanSize(self.copy_max_bytes),
                ],
                target,
            )),
        }
    }

    fn interpret(
        &self,
        code: Option<i32>,
        stdout: &str,
        stderr: &str,
    ) -> Result<DetectorOutcome, DetectorError> {
        let scratch = self.scratch.path().display().to_string();
        let scrub = |text: &str| text.replace(&scratch, "<scratch>");

        match self.kind {
            DetectorKind::Yara => {
                if code != Some(0) {
                    return Err(DetectorError::Failed(format!(
                        "yara exited with {:?}: {}",
                        code,
                        scrub(stderr.trim())
                    )));
                }
                match stdout.lines().find_map(|line| line.split_whitespace().next()) {
                    Some(rule) => Ok(DetectorOutcome::Infected(sanitize_signature(rule))),
                    None => Ok(DetectorOutcome::Clean),
                }
            }
            _ => match code {
                Some(0) => Ok(DetectorOutcome::Clean),
                Some(1) => {
                    let signature = stdout
                        .lines()
                        .map(str::trim)
                        .find(|line| line.ends_with("FOUND"))
                        .and_then(|line| line.rsplit_once(": "))
                        .map(|(_, rest)| rest.trim_end_matches("FOUND").trim().to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    Ok(DetectorOutcome::Infected(sanitize_signature(&scrub(&signature))))
                }
                other => Err(DetectorError::Failed(format!(
                    "clamscan exited with {:?}: {}",
                    other,
                    scrub(stderr.trim())
                ))),
            },
        }
    }
}

fn sanitize_signature(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_graphic())
        .take(MAX_SIGNATURE_LEN)
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

#[async_trait]
impl Detector for CommandDetector {
    fn name(&self) -> &str {
        match self.kind {
            DetectorKind::Yara => "yara",
            _ => "clamscan",
        }
    }

    fn kind(&self) -> DetectorKind {
        self.kind
    }

    async fn scan(&self, path: &Path) -> Result<DetectorOutcome, DetectorError> {
        let start = Instant::now();
        let binary = self.allow_list.resolve(&self.binary)?;
        if self.kind == DetectorKind::Yara {
            self.rules_file()?;
        }

        let scratch = self.scratch.clone();
        let source = path.to_path_buf();
        let max = self.copy_max_bytes;
        let copy = tokio::task::spawn_blocking(move || scratch.copy_from(&source, max))
            .await
            .map_err(|e| DetectorError::Failed(format!("scratch copy task join error: {}", e)))??;

        let result = self.run(&binary, &copy.path).await;
        copy.remove().await;

        let outcome = result?;
        tracing::debug!(
            detector = %self.name(),
            duration_ms = start.elapsed().as_millis() as u64,
            infected = matches!(outcome, DetectorOutcome::Infected(_)),
            "Command scan finished"
        );
        Ok(outcome)
    }

    async fn probe(&self) -> DetectorProbe {
        match self.allow_list.resolve(&self.binary) {
            Ok(_) => match self.kind {
                DetectorKind::Yara => match self.rules_file() {
                    Ok(_) => DetectorProbe {
                        reachable: true,
                        allow_listed: true,
                        detail: None,
                    },
                    Err(e) => DetectorProbe {
                        reachable: false,
                        allow_listed: true,
                        detail: Some(e.to_string()),
                    },
                },
                _ => DetectorProbe {
                    reachable: true,
                    allow_listed: true,
                    detail: None,
                },
            },
            Err(e @ DetectorError::NotAllowListed(_)) => DetectorProbe {
                reachable: false,
                allow_listed: false,
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

impl CommandDetector {
    async fn run(&self, binary: &Path, target: &Path) -> Result<DetectorOutcome, DetectorError> {
        let command = self.command_for(target)?;
        let output = tokio::process::Command::new(binary)
            .args(command.argv())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                    DetectorError::MissingBinary(binary.display().to_string())
                }
                _ => DetectorError::Failed(format!("spawn failed: {}", e.kind())),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        self.interpret(output.status.code(), &stdout, &stderr)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    const FAKE_CLAMSCAN: &str = r#"#!/bin/sh
for last; do :; done
if grep -q EICAR "$last"; then
  echo "$last: Eicar-Test-Signature FOUND"
  exit 1
fi
if grep -q BROKEN "$last"; then
  echo "LibClamAV Error: cannot read $last" >&2
  exit 2
fi
exit 0
"#;

    const FAKE_YARA: &str = r#"#!/bin/sh
for last; do :; done
if grep -q MALWARE "$last"; then
  echo "Suspicious_Dropper $last"
fi
exit 0
"#;

    struct Fixture {
        dir: tempfile::TempDir,
        settings: ScanSettings,
        allow: Arc<BinaryAllowList>,
    }

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir(&bin).unwrap();
        let clamscan = script(&bin, "clamscan", FAKE_CLAMSCAN);
        let yara = script(&bin, "yara", FAKE_YARA);
        let rules = dir.path().join("rules.yar");
        std::fs::write(&rules, "rule Suspicious_Dropper { condition: true }").unwrap();

        let mut settings = warden_core::WardenConfig::default().scan;
        settings.clamscan_path = clamscan.display().to_string();
        settings.yara_path = yara.display().to_string();
        settings.yara_rules = Some(rules);
        settings.scratch_dir = dir.path().join("scratch");
        settings.copy_max_bytes = 1024;
        settings.detector_timeout = Duration::from_secs(5);

        let allow = Arc::new(BinaryAllowList::new(&[clamscan, yara]));
        Fixture {
            dir,
            settings,
            allow,
        }
    }

    fn upload(fx: &Fixture, contents: &[u8]) -> PathBuf {
        let path = fx.dir.path().join("quarantined");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn scratch_is_empty(fx: &Fixture) -> bool {
        std::fs::read_dir(&fx.settings.scratch_dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    }

    #[tokio::test]
    async fn test_clamscan_clean_and_infected() {
        let fx = fixture();
        let detector = CommandDetector::clamscan(&fx.settings, fx.allow.clone());

        let clean = upload(&fx, b"plain text");
        assert_eq!(detector.scan(&clean).await.unwrap(), DetectorOutcome::Clean);

        let infected = upload(&fx, b"X5O!P%@AP EICAR test");
        assert_eq!(
            detector.scan(&infected).await.unwrap(),
            DetectorOutcome::Infected("Eicar-Test-Signature".to_string())
        );
        assert!(scratch_is_empty(&fx));
        assert!(infected.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_scratch_directory_is_owner_only() {
        let fx = fixture();
        let detector = CommandDetector::clamscan(&fx.settings, fx.allow.clone());
        detector.scan(&upload(&fx, b"data")).await.unwrap();

        let mode = std::fs::metadata(&fx.settings.scratch_dir)
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[tokio::test]
    async fn test_clamscan_error_exit_is_failure() {
        let fx = fixture();
        let detector = CommandDetector::clamscan(&fx.settings, fx.allow.clone());
        let err = detector.scan(&upload(&fx, b"BROKEN")).await.unwrap_err();

        let DetectorError::Failed(message) = err else {
            panic!("expected failure, got {err:?}");
        };
        assert!(!message.contains(&fx.settings.scratch_dir.display().to_string()));
        assert!(scratch_is_empty(&fx));
    }

    #[tokio::test]
    async fn test_oversized_target_is_malformed() {
        let fx = fixture();
        let detector = CommandDetector::clamscan(&fx.settings, fx.allow.clone());
        let big = upload(&fx, &vec![b'a'; 2048]);
        assert!(matches!(
            detector.scan(&big).await,
            Err(DetectorError::MalformedTarget(_))
        ));
        assert!(scratch_is_empty(&fx));
    }

    #[tokio::test]
    async fn test_yara_rule_match() {
        let fx = fixture();
        let detector = CommandDetector::yara(&fx.settings, fx.allow.clone());

        assert_eq!(
            detector.scan(&upload(&fx, b"benign")).await.unwrap(),
            DetectorOutcome::Clean
        );
        assert_eq!(
            detector.scan(&upload(&fx, b"MALWARE payload")).await.unwrap(),
            DetectorOutcome::Infected("Suspicious_Dropper".to_string())
        );
    }

    #[tokio::test]
    async fn test_yara_without_rules() {
        let mut fx = fixture();
        fx.settings.yara_rules = Some(fx.dir.path().join("missing.yarc"));
        let detector = CommandDetector::yara(&fx.settings, fx.allow.clone());

        assert!(matches!(
            detector.scan(&upload(&fx, b"data")).await,
            Err(DetectorError::RulesUnavailable(_))
        ));
        let probe = detector.probe().await;
        assert!(!probe.reachable);
        assert!(probe.allow_listed);
    }

    #[tokio::test]
    async fn test_unlisted_binary_refused() {
        let fx = fixture();
        let detector = CommandDetector::clamscan(&fx.settings, Arc::new(BinaryAllowList::default()));

        assert!(matches!(
            detector.scan(&upload(&fx, b"data")).await,
            Err(DetectorError::NotAllowListed(_))
        ));
        assert!(!detector.probe().await.allow_listed);
    }

    #[test]
    fn test_compiled_rules_flag() {
        let mut fx = fixture();
        let compiled = fx.dir.path().join("rules.yarc");
        std::fs::write(&compiled, b"YARA").unwrap();
        fx.settings.yara_rules = Some(compiled);
        let detector = CommandDetector::yara(&fx.settings, fx.allow.clone());

        let command = detector.command_for(Path::new("/scratch/x")).unwrap();
        assert!(command.flags.contains(&ScanArg::CompiledRules));
    }
}
