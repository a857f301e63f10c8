pub mod ownership;

use anyhow::{Result, anyhow};
use rocket::http::RawStr;
use std::path::Path;

pub trait PathExt {
    /// File name without its last extension, as the output prefix uses it.
    fn stem_lossy(&self) -> String;
}

impl PathExt for Path {
    fn stem_lossy(&self) -> String {
        self.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Percent-decodes an object key, turning `+` into a space first.
pub fn decode_object_key(key: &str) -> String {
    RawStr::new(key).url_decode_lossy().into_owned()
}

/// Last segment of a decoded object key.
pub fn original_filename(decoded_key: &str) -> Result<&str> {
    match decoded_key.rsplit('/').next() {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(anyhow!("Object key {:?} has no file name", decoded_key)),
    }
}

/// Name used for the downloaded copy inside the scratch directory.
pub fn local_filename(original: &str) -> String {
    original.replace(' ', "_")
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
