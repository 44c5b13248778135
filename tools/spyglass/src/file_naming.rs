//! Observation file naming.
//!
//! A test name's dot-separated segments become a directory hierarchy under
//! the observation directory. Overlong segments are truncated and suffixed
//! with a rolling hash of the full segment so that distinct long names never
//! collide and the same logical name always maps to the same file. A legacy
//! signed-hash scheme is still consulted when resolving existing reference
//! files.

use crate::runtime::FileSystem;
use std::path::{Path, PathBuf};

pub const MAX_NAME_LEN: usize = 100;
const HASH_SUFFIX_LEN: usize = 10;

/// Suffix of the current-run file next to a `<base>.json` reference.
pub const CURRENT_RUN_SUFFIX: &str = "_now.json";
pub const REFERENCE_SUFFIX: &str = ".json";

// ── hashing ───────────────────────────────────────────────────────────────────

/// DJB2-style rolling hash over the segment text, wrapping in u64.
fn segment_hash(text: &str) -> u64 {
    let mut hash: u64 = 5381;
    for byte in text.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(u64::from(byte));
    }
    hash
}

/// The same rolling hash computed in signed 64-bit arithmetic, as older
/// releases rendered it (unmasked, possibly negative).
fn segment_hash_legacy(text: &str) -> i64 {
    let mut hash: i64 = 5381;
    for byte in text.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(i64::from(byte));
    }
    hash
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).to_string()
}

/// Fixed-width base-36 rendering of the masked hash.
fn hash_suffix(text: &str) -> String {
    let modulus = 36u64.pow(HASH_SUFFIX_LEN as u32);
    let digits = to_base36(segment_hash(text) % modulus);
    format!("{digits:0>width$}", width = HASH_SUFFIX_LEN)
}

fn hash_suffix_legacy(text: &str) -> String {
    let hash = segment_hash_legacy(text);
    if hash < 0 {
        format!("-{}", to_base36(hash.unsigned_abs()))
    } else {
        to_base36(hash as u64)
    }
}

// ── segment encoding ──────────────────────────────────────────────────────────

fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

fn truncate_with(segment: &str, suffix: fn(&str) -> String) -> String {
    let sanitized = sanitize(segment);
    if sanitized.len() > MAX_NAME_LEN - 5 {
        format!("{}{}", &sanitized[..MAX_NAME_LEN - 15], suffix(&sanitized))
    } else {
        sanitized
    }
}

pub fn encode_segment(segment: &str) -> String {
    truncate_with(segment, hash_suffix)
}

fn encode_segment_legacy(segment: &str) -> String {
    truncate_with(segment, hash_suffix_legacy)
}

// ── paths ─────────────────────────────────────────────────────────────────────

fn base_path_with(dir: &Path, test_name: &str, encode: fn(&str) -> String) -> PathBuf {
    let mut path = dir.to_path_buf();
    for segment in test_name.split('.') {
        path.push(encode(segment));
    }
    path
}

/// Extension-less base path for a test's observation files, current scheme.
pub fn observation_base_path(dir: &Path, test_name: &str) -> PathBuf {
    base_path_with(dir, test_name, encode_segment)
}

fn observation_base_path_legacy(dir: &Path, test_name: &str) -> PathBuf {
    base_path_with(dir, test_name, encode_segment_legacy)
}

/// Where an older release would have stored this test's reference file.
pub fn legacy_reference_path(dir: &Path, test_name: &str) -> PathBuf {
    with_suffix(
        &observation_base_path_legacy(dir, test_name),
        REFERENCE_SUFFIX,
    )
}

pub fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    name.push_str(suffix);
    base.with_file_name(name)
}

/// Resolve the reference file for a test: the current naming scheme wins; a
/// file written under the legacy hash scheme is found as a fallback. When
/// neither exists, the current-scheme path is returned as the write target.
pub fn find_reference_file(
    fs: &dyn FileSystem,
    dir: &Path,
    test_name: &str,
) -> (PathBuf, bool) {
    let current = with_suffix(&observation_base_path(dir, test_name), REFERENCE_SUFFIX);
    if fs.exists(&current) {
        return (current, true);
    }
    let legacy = with_suffix(
        &observation_base_path_legacy(dir, test_name),
        REFERENCE_SUFFIX,
    );
    if legacy != current && fs.exists(&legacy) {
        return (legacy, true);
    }
    (current, false)
}
