use chrono::{SecondsFormat, Utc};
use sha2::{Digest, Sha256};

pub fn now_utc_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Stable document identifier derived from the source reference.
pub fn stable_doc_id(source_ref: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_ref.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("doc-{}", &digest[..16])
}
