use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// File family a profile accepts; selects the type-specific guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileCategory {
    Image,
    Pdf,
    Spreadsheet,
    Csv,
    Pkcs12,
}

impl ProfileCategory {
    /// Whether files of this category are expected to be textual.
    pub fn is_textual(&self) -> bool {
        matches!(self, ProfileCategory::Csv)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileCategory::Image => "image",
            ProfileCategory::Pdf => "pdf",
            ProfileCategory::Spreadsheet => "spreadsheet",
            ProfileCategory::Csv => "csv",
            ProfileCategory::Pkcs12 => "pkcs12",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    Disabled,
    Required,
}

/// Immutable upload configuration for one upload "kind".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadProfile {
    pub id: String,
    pub category: ProfileCategory,
    pub allowed_mime_types: Vec<String>,
    pub allowed_extensions: Vec<String>,
    /// When set, stored files always carry this extension regardless of the client's.
    #[serde(default)]
    pub canonical_extension: Option<String>,
    pub max_bytes: u64,
    pub scan_mode: ScanMode,
    /// Entity kind path segment (e.g. `users`).
    pub entity_kind: String,
    /// Category path segment (e.g. `avatars`).
    pub path_category: String,
    /// Storage disk identifier reported back to callers.
    #[serde(default = "default_disk")]
    pub disk: String,
    #[serde(default)]
    pub owner_required: bool,
    /// Renditions produced asynchronously from the stored original.
    #[serde(default)]
    pub expected_renditions: Vec<String>,
}

fn default_disk() -> String {
    "local".to_string()
}

impl UploadProfile {
    /// Effective scan mode. The global kill switch can only force `Disabled`.
    pub fn effective_scan_mode(&self, scanning_globally_disabled: bool) -> ScanMode {
        if scanning_globally_disabled {
            ScanMode::Disabled
        } else {
            self.scan_mode
        }
    }

    pub fn allows_mime(&self, mime: &str) -> bool {
        let normalized = mime.trim().to_lowercase();
        self.allowed_mime_types.iter().any(|m| *m == normalized)
    }

    pub fn allows_extension(&self, extension: &str) -> bool {
        let normalized = extension.trim().trim_start_matches('.').to_lowercase();
        self.allowed_extensions.iter().any(|e| *e == normalized)
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Profiles available when no profile file is configured.
pub fn builtin_profiles() -> Vec<UploadProfile> {
    vec![
        UploadProfile {
            id: "avatar".to_string(),
            category: ProfileCategory::Image,
            allowed_mime_types: strings(&["image/jpeg", "image/png", "image/gif", "image/webp"]),
            allowed_extensions: strings(&["jpg", "jpeg", "png", "gif", "webp"]),
            canonical_extension: None,
            max_bytes: 5 * 1024 * 1024,
            scan_mode: ScanMode::Required,
            entity_kind: "users".to_string(),
            path_category: "avatars".to_string(),
            disk: default_disk(),
            owner_required: true,
            expected_renditions: strings(&["thumb", "medium"]),
        },
        UploadProfile {
            id: "pdf_document".to_string(),
            category: ProfileCategory::Pdf,
            allowed_mime_types: strings(&["application/pdf"]),
            allowed_extensions: strings(&["pdf"]),
            canonical_extension: Some("pdf".to_string()),
            max_bytes: 25 * 1024 * 1024,
            scan_mode: ScanMode::Required,
            entity_kind: "documents".to_string(),
            path_category: "pdf".to_string(),
            disk: default_disk(),
            owner_required: false,
            expected_renditions: Vec::new(),
        },
        UploadProfile {
            id: "csv_import".to_string(),
            category: ProfileCategory::Csv,
            allowed_mime_types: strings(&["text/csv", "text/plain"]),
            allowed_extensions: strings(&["csv", "txt"]),
            canonical_extension: Some("csv".to_string()),
            max_bytes: 10 * 1024 * 1024,
            scan_mode: ScanMode::Required,
            entity_kind: "imports".to_string(),
            path_category: "csv".to_string(),
            disk: default_disk(),
            owner_required: false,
            expected_renditions: Vec::new(),
        },
        UploadProfile {
            id: "spreadsheet".to_string(),
            category: ProfileCategory::Spreadsheet,
            allowed_mime_types: strings(&[
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            ]),
            allowed_extensions: strings(&["xlsx"]),
            canonical_extension: Some("xlsx".to_string()),
            max_bytes: 20 * 1024 * 1024,
            scan_mode: ScanMode::Required,
            entity_kind: "imports".to_string(),
            path_category: "spreadsheets".to_string(),
            disk: default_disk(),
            owner_required: false,
            expected_renditions: Vec::new(),
        },
        UploadProfile {
            id: "pkcs12_secret".to_string(),
            category: ProfileCategory::Pkcs12,
            allowed_mime_types: strings(&["application/x-pkcs12", "application/octet-stream"]),
            allowed_extensions: strings(&["p12", "pfx"]),
            canonical_extension: None,
            max_bytes: 64 * 1024,
            scan_mode: ScanMode::Disabled,
            entity_kind: "secrets".to_string(),
            path_category: "certificates".to_string(),
            disk: "secrets".to_string(),
            owner_required: true,
            expected_renditions: Vec::new(),
        },
    ]
}

/// Read-only set of profiles, loaded once at start.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: Arc<HashMap<String, Arc<UploadProfile>>>,
}

impl ProfileRegistry {
    pub fn new(profiles: Vec<UploadProfile>) -> Self {
        let map = profiles
            .into_iter()
            .map(|p| (p.id.clone(), Arc::new(p)))
            .collect();
        Self {
            profiles: Arc::new(map),
        }
    }

    pub fn builtin() -> Self {
        Self::new(builtin_profiles())
    }

    /// Load profiles from a JSON array file, replacing the built-ins.
    pub fn from_json_file(path: &Path) -> Result<Self, anyhow::Error> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read profile file {}: {}", path.display(), e)
        })?;
        let mut profiles: Vec<UploadProfile> = serde_json::from_str(&raw)?;
        for profile in &mut profiles {
            profile.allowed_mime_types = profile
                .allowed_mime_types
                .iter()
                .map(|m| m.trim().to_lowercase())
                .collect();
            profile.allowed_extensions = profile
                .allowed_extensions
                .iter()
                .map(|e| e.trim().trim_start_matches('.').to_lowercase())
                .collect();
            if profile.max_bytes == 0 {
                return Err(anyhow::anyhow!(
                    "Profile {} must declare a non-zero max_bytes",
                    profile.id
                ));
            }
        }
        Ok(Self::new(profiles))
    }

    pub fn get(&self, id: &str) -> Option<Arc<UploadProfile>> {
        self.profiles.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.profiles.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
