//! Deterministic consumer group ids.
//!
//! When a source is created without a `group.id`, one is derived from the
//! host name and the source location that created the source. Restarting
//! the same program on the same host therefore resumes the same consumer
//! group, while two different call sites never share one.

use std::panic::Location;

use sha2::{Digest, Sha256};

/// Maximum length of the host part of a generated group id.
///
/// Kafka limits `group.id` to 255 characters and the hash suffix is appended.
const MAX_HOST_LEN: usize = 200;

/// Generates a group id of the form `{host}_{hash}`.
///
/// `hash` is the first 10 hex digits of the SHA-256 of `"{file}:{line}"`.
#[must_use]
pub fn generate_group_id(origin: &Location<'_>) -> String {
    let host = clean_hostname(&hostname(), in_kubernetes());
    format!("{host}_{}", location_hash(origin.file(), origin.line()))
}

fn location_hash(file: &str, line: u32) -> String {
    let digest = Sha256::digest(format!("{file}:{line}").as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..10].to_string()
}

fn in_kubernetes() -> bool {
    std::env::var_os("KUBERNETES_SERVICE_HOST").is_some()
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string())
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_letters(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphabetic())
}

/// Makes a host name safe for use in a group id.
///
/// Outside Kubernetes, runs of non-word characters become `_` and the result
/// is capped at 200 characters. Inside Kubernetes, the replica-set and pod
/// hash suffixes are dropped so every pod of a deployment shares a group.
#[must_use]
pub fn clean_hostname(hostname: &str, kubernetes: bool) -> String {
    if kubernetes {
        return clean_hostname_k8s(hostname);
    }
    let mut cleaned = String::with_capacity(hostname.len());
    let mut in_run = false;
    for c in hostname.chars() {
        if is_word(c) {
            cleaned.push(c);
            in_run = false;
        } else if !in_run {
            cleaned.push('_');
            in_run = true;
        }
    }
    cleaned.chars().take(MAX_HOST_LEN).collect()
}

fn clean_hostname_k8s(hostname: &str) -> String {
    let mut segments = split_segments(hostname);
    if segments.len() == 1 {
        return segments.remove(0);
    }
    let last_two = segments.split_off(segments.len() - 2);
    if is_letters(&last_two[0]) {
        segments.extend(last_two);
    }
    segments
        .into_iter()
        .filter(|s| is_letters(s))
        .collect::<Vec<_>>()
        .join("_")
}

/// Splits on runs of non-alphanumeric characters, keeping an empty segment
/// at either end when the name starts or ends with a separator.
fn split_segments(hostname: &str) -> Vec<String> {
    let mut segments = vec![String::new()];
    let mut in_run = false;
    for c in hostname.chars() {
        if c.is_alphanumeric() {
            if in_run {
                segments.push(String::new());
                in_run = false;
            }
            if let Some(last) = segments.last_mut() {
                last.push(c);
            }
        } else {
            in_run = true;
        }
    }
    if in_run {
        segments.push(String::new());
    }
    segments
}
