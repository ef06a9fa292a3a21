use sha2::{Digest, Sha256};

/// Normalize text so that cosmetic differences do not change its hash:
/// CRLF and lone CR become LF, trailing whitespace is stripped from each
/// line, and leading/trailing empty lines are dropped.
pub fn normalize_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = unified.split('\n').map(str::trim_end).collect();

    let mut start = 0;
    let mut end = lines.len();
    while start < end && lines[start].is_empty() {
        start += 1;
    }
    while end > start && lines[end - 1].is_empty() {
        end -= 1;
    }
    lines[start..end].join("\n")
}

/// Lowercase hex sha256 of the normalized UTF-8 text.
pub fn hash_text(text: &str) -> String {
    let normalized = normalize_text(text);
    let mut sha = Sha256::new();
    sha.update(normalized.as_bytes());
    format!("{:x}", sha.finalize())
}
