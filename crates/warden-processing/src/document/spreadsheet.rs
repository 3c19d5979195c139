use std::io::{Read, Seek};
use warden_core::RejectReason;
use zip::ZipArchive;

/// Decompression-bomb limits for ZIP-based containers.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveLimits {
    pub max_entries: usize,
    pub max_total_uncompressed: u64,
    /// Largest allowed uncompressed/compressed ratio for entries above `ratio_floor` bytes.
    pub max_ratio: u64,
    pub ratio_floor: u64,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_total_uncompressed: 512 * 1024 * 1024,
            max_ratio: 100,
            ratio_floor: 1024 * 1024,
        }
    }
}

const REQUIRED_ENTRIES: [&str; 2] = ["[Content_Types].xml", "xl/workbook.xml"];

/// Open an xlsx container and check it against `limits` using central-directory data only.
pub fn validate_spreadsheet<R: Read + Seek>(
    reader: R,
    limits: &ArchiveLimits,
) -> Result<(), RejectReason> {
    let mut archive = ZipArchive::new(reader)
        .map_err(|e| RejectReason::InvalidSpreadsheet(format!("unreadable container: {}", e)))?;

    if archive.len() > limits.max_entries {
        return Err(RejectReason::ArchiveBomb(format!(
            "{} entries (max {})",
            archive.len(),
            limits.max_entries
        )));
    }

    let mut total: u64 = 0;
    for index in 0..archive.len() {
        let entry = archive
            .by_index_raw(index)
            .map_err(|e| RejectReason::InvalidSpreadsheet(format!("bad entry: {}", e)))?;

        if entry.enclosed_name().is_none() {
            return Err(RejectReason::InvalidSpreadsheet("unsafe entry name".to_string()));
        }

        let size = entry.size();
        total = total.saturating_add(size);
        if total > limits.max_total_uncompressed {
            return Err(RejectReason::ArchiveBomb(format!(
                "uncompressed size exceeds {} bytes",
                limits.max_total_uncompressed
            )));
        }

        if size > limits.ratio_floor && size / entry.compressed_size().max(1) > limits.max_ratio {
            return Err(RejectReason::ArchiveBomb(format!(
                "entry ratio above {}:1",
                limits.max_ratio
            )));
        }
    }

    for required in REQUIRED_ENTRIES {
        if archive.by_name(required).is_err() {
            return Err(RejectReason::InvalidSpreadsheet(format!("missing {}", required)));
        }
    }
    Ok(())
}
