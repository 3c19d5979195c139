//! CSV-like import checks: encoding, forbidden content and structural plausibility.

use crate::polyglot;
use crate::sniff::{UTF16_BE_BOM, UTF16_LE_BOM, UTF8_BOM};
use warden_core::RejectReason;

/// Delimiters considered, in tie-break order.
pub const CANDIDATE_DELIMITERS: [char; 4] = [',', ';', '\t', '|'];

#[derive(Debug, Clone, Copy)]
pub struct CsvSettings {
    /// Fraction of non-blank rows that must share the modal column count.
    pub min_consistency: f64,
    /// Rows sampled for delimiter detection.
    pub sample_lines: usize,
}

impl Default for CsvSettings {
    fn default() -> Self {
        Self {
            min_consistency: 0.6,
            sample_lines: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CsvReport {
    pub delimiter: char,
    pub columns: usize,
    pub consistent_rows: usize,
    pub total_rows: usize,
}

/// Decode UTF-8 (BOM optional) or BOM-marked UTF-16 into a `String`.
pub fn decode_text(bytes: &[u8]) -> Result<String, RejectReason> {
    if let Some(rest) = bytes.strip_prefix(UTF8_BOM) {
        return String::from_utf8(rest.to_vec()).map_err(|_| RejectReason::InvalidCsvEncoding);
    }
    let utf16 = |rest: &[u8], le: bool| -> Result<String, RejectReason> {
        if rest.len() % 2 != 0 {
            return Err(RejectReason::InvalidCsvEncoding);
        }
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| {
                if le {
                    u16::from_le_bytes([pair[0], pair[1]])
                } else {
                    u16::from_be_bytes([pair[0], pair[1]])
                }
            })
            .collect();
        String::from_utf16(&units).map_err(|_| RejectReason::InvalidCsvEncoding)
    };
    if let Some(rest) = bytes.strip_prefix(UTF16_LE_BOM) {
        return utf16(rest, true);
    }
    if let Some(rest) = bytes.strip_prefix(UTF16_BE_BOM) {
        return utf16(rest, false);
    }
    String::from_utf8(bytes.to_vec()).map_err(|_| RejectReason::InvalidCsvEncoding)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Row {
    fields: usize,
    blank: bool,
}

fn finish(fields: &mut usize, has_content: &mut bool, out: &mut Vec<Row>) {
    out.push(Row {
        fields: *fields,
        blank: !*has_content,
    });
    *fields = 1;
    *has_content = false;
}

/// Quote-aware record splitter. Quoted fields may contain delimiters and line breaks.
fn rows(text: &str, delimiter: char, limit: Option<usize>) -> Vec<Row> {
    let mut out = Vec::new();
    let mut fields = 1;
    let mut in_quotes = false;
    let mut at_field_start = true;
    let mut has_content = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if limit.is_some_and(|l| out.len() >= l) {
            return out;
        }
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            continue;
        }
        match c {
            '"' if at_field_start => {
                in_quotes = true;
                at_field_start = false;
                has_content = true;
            }
            '\r' | '\n' => {
                if c == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                finish(&mut fields, &mut has_content, &mut out);
                at_field_start = true;
            }
            c if c == delimiter => {
                fields += 1;
                at_field_start = true;
                has_content = true;
            }
            c => {
                at_field_start = false;
                if !c.is_whitespace() {
                    has_content = true;
                }
            }
        }
    }
    if has_content && limit.map_or(true, |l| out.len() < l) {
        finish(&mut fields, &mut has_content, &mut out);
    }
    out
}

/// Most frequent column count among non-blank rows and its frequency.
/// Ties prefer the wider row.
fn modal_columns(rows: &[Row]) -> Option<(usize, usize, usize)> {
    let mut counts = std::collections::BTreeMap::<usize, usize>::new();
    let mut total = 0;
    for row in rows.iter().filter(|r| !r.blank) {
        *counts.entry(row.fields).or_default() += 1;
        total += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)))
        .map(|(columns, frequency)| (columns, frequency, total))
}

/// Pick the delimiter from the first `sample_lines` rows.
///
/// Candidates that actually split rows rank above those that leave every row whole; within
/// a rank the highest modal frequency wins, then candidate order.
pub fn sniff_delimiter(text: &str, sample_lines: usize) -> char {
    let mut best: Option<(char, bool, f64)> = None;
    for delimiter in CANDIDATE_DELIMITERS {
        let sample = rows(text, delimiter, Some(sample_lines));
        let Some((columns, frequency, total)) = modal_columns(&sample) else {
            continue;
        };
        let splits = columns > 1;
        let ratio = frequency as f64 / total as f64;
        let better = match best {
            None => true,
            Some((_, best_splits, best_ratio)) => {
                (splits && !best_splits) || (splits == best_splits && ratio > best_ratio)
            }
        };
        if better {
            best = Some((delimiter, splits, ratio));
        }
    }
    best.map(|(d, _, _)| d).unwrap_or(',')
}

/// Full CSV check on raw file bytes.
pub fn validate_csv(bytes: &[u8], settings: &CsvSettings) -> Result<CsvReport, RejectReason> {
    let text = decode_text(bytes)?;

    if text
        .chars()
        .any(|c| (c < ' ' && !matches!(c, '\t' | '\r' | '\n')) || c == '\u{7f}')
    {
        return Err(RejectReason::CsvControlCharacters);
    }
    if polyglot::script_opener(text.as_bytes()).is_some() {
        return Err(RejectReason::CsvScriptContent);
    }

    let delimiter = sniff_delimiter(&text, settings.sample_lines.max(1));
    let all = rows(&text, delimiter, None);
    let (columns, consistent, total) = modal_columns(&all).ok_or(RejectReason::EmptyFile)?;

    if (consistent as f64) < settings.min_consistency * total as f64 {
        return Err(RejectReason::CsvInconsistentColumns {
            consistent,
            total,
            columns,
        });
    }

    Ok(CsvReport {
        delimiter,
        columns,
        consistent_rows: consistent,
        total_rows: total,
    })
}
