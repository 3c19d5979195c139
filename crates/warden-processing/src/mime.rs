//! MIME normalisation: aliases, extension map and format families.

/// Collapse known aliases onto one canonical spelling. Parameters (`; charset=...`) are dropped.
pub fn canonical_mime(mime: &str) -> String {
    let base = mime.split(';').next().unwrap_or("").trim().to_lowercase();
    let canonical = match base.as_str() {
        "image/x-png" => "image/png",
        "image/jpg" | "image/pjpeg" => "image/jpeg",
        "application/x-pdf" | "application/acrobat" => "application/pdf",
        "application/x-zip-compressed" | "application/x-zip" => "application/zip",
        "text/comma-separated-values" | "application/csv" | "text/x-csv" => "text/csv",
        "application/pkcs12" | "application/x-pkcs-12" => "application/x-pkcs12",
        _ => return base,
    };
    canonical.to_string()
}

/// Format family used to compare independent MIME opinions.
///
/// ZIP-based office containers are reported as plain ZIP by some detectors, and plain-text
/// formats are indistinguishable by content.
pub fn mime_family(mime: &str) -> String {
    let canonical = canonical_mime(mime);
    match canonical.as_str() {
        "application/zip"
        | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        | "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        | "application/vnd.openxmlformats-officedocument.presentationml.presentation" => {
            "application/zip".to_string()
        }
        "text/plain" | "text/csv" | "text/tab-separated-values" => "text/plain".to_string(),
        _ => canonical,
    }
}

/// Client MIME types that carry no information about the content.
pub fn is_generic_mime(mime: &str) -> bool {
    let canonical = canonical_mime(mime);
    canonical.is_empty() || canonical == "application/octet-stream" || canonical == "binary/octet-stream"
}

/// Normalise a declared extension: lowercase, no leading dot, `jpeg` → `jpg`.
pub fn normalize_extension(extension: &str) -> String {
    let lower = extension.trim().trim_start_matches('.').to_lowercase();
    match lower.as_str() {
        "jpeg" | "jpe" => "jpg".to_string(),
        _ => lower,
    }
}

/// Extension of a client file name, if any.
pub fn extension_of(file_name: &str) -> Option<String> {
    let name = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(normalize_extension(ext))
}

/// MIME types a file with this extension is expected to have.
pub fn mimes_for_extension(extension: &str) -> Option<&'static [&'static str]> {
    let mimes: &'static [&'static str] = match normalize_extension(extension).as_str() {
        // Images
        "jpg" => &["image/jpeg"],
        "png" => &["image/png"],
        "gif" => &["image/gif"],
        "webp" => &["image/webp"],
        // Documents
        "pdf" => &["application/pdf"],
        "xlsx" => &["application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"],
        "docx" => &["application/vnd.openxmlformats-officedocument.wordprocessingml.document"],
        "zip" => &["application/zip"],
        "csv" => &["text/csv"],
        "tsv" => &["text/tab-separated-values"],
        "txt" => &["text/plain"],
        // Certificates
        "p12" | "pfx" => &["application/x-pkcs12"],
        _ => return None,
    };
    Some(mimes)
}
