use chrono::Utc;
use sha2::{Digest, Sha256};

pub fn sha256_hex(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

/// Builds a run id of the form `eval-2026-02-03-f5d4dd93`: UTC date plus an
/// 8-hex suffix hashed from the description, the creating pid, and the
/// nanosecond clock.
pub fn new_run_id(description: &str) -> String {
    let now = Utc::now();
    let nonce = format!(
        "{}|{}|{}",
        description,
        std::process::id(),
        now.timestamp_nanos_opt().unwrap_or_default()
    );
    let digest = sha256_hex(&nonce);
    format!("eval-{}-{}", now.format("%Y-%m-%d"), &digest[..8])
}
