//! Mixed-format ("polyglot") marker detection.

/// Script prologues searched case-insensitively.
const SCRIPT_OPENERS: &[&[u8]] = &[b"<script", b"<?php", b"<?=", b"<%@", b"javascript:"];

/// Magic sequences of formats that can carry executable payloads.
const FOREIGN_MAGIC: &[(&str, &[u8])] = &[
    ("pdf", b"%PDF-"),
    ("zip", &[b'P', b'K', 0x03, 0x04]),
    ("elf", &[0x7F, b'E', b'L', b'F']),
];

fn find_case_insensitive(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
}

fn find<'a>(haystack: &'a [u8], needle: &'a [u8]) -> impl Iterator<Item = usize> + 'a {
    let needle = needle.to_vec();
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(move |(_, w)| *w == needle.as_slice())
        .map(|(i, _)| i)
}

/// Offsets of `MZ` headers whose `e_lfanew` points at a `PE\0\0` signature inside `bytes`.
fn find_pe(bytes: &[u8]) -> Option<usize> {
    find(bytes, b"MZ").find(|&start| {
        let Some(lfanew) = bytes.get(start + 0x3C..start + 0x40) else {
            return false;
        };
        let offset = u32::from_le_bytes([lfanew[0], lfanew[1], lfanew[2], lfanew[3]]) as usize;
        start
            .checked_add(offset)
            .and_then(|pe| bytes.get(pe..pe + 4))
            .is_some_and(|sig| sig == b"PE\0\0")
    })
}

/// First script opener in `bytes`, if any.
pub fn script_opener(bytes: &[u8]) -> Option<&'static str> {
    SCRIPT_OPENERS
        .iter()
        .find(|opener| find_case_insensitive(bytes, opener).is_some())
        .map(|opener| std::str::from_utf8(*opener).unwrap_or("script"))
}

/// Every foreign format magic found in `bytes` with the offset of its first occurrence.
pub fn foreign_magic(bytes: &[u8]) -> Vec<(&'static str, usize)> {
    let mut found: Vec<(&'static str, usize)> = FOREIGN_MAGIC
        .iter()
        .filter_map(|(name, magic)| find(bytes, magic).next().map(|at| (*name, at)))
        .collect();
    if let Some(at) = find_pe(bytes) {
        found.push(("pe", at));
    }
    found
}

/// Describe the polyglot marker in `bytes`, or `None` when the content is single-format.
///
/// A script opener next to any foreign magic is always reported. For images, foreign magic
/// past offset 0 is reported on its own.
pub fn scan(bytes: &[u8], is_image: bool) -> Option<String> {
    let magic = foreign_magic(bytes);
    if let Some(opener) = script_opener(bytes) {
        if let Some((name, _)) = magic.first() {
            return Some(format!("script opener {} with {} signature", opener, name));
        }
    }
    if is_image {
        if let Some((name, at)) = magic.iter().find(|(_, at)| *at > 0) {
            return Some(format!("embedded {} signature at offset {}", name, at));
        }
    }
    None
}
