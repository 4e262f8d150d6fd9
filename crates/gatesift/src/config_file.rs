//! JSON config file loading.
//!
//! The file maps 1:1 onto [`ScanConfig`]; absent keys fall back to the
//! defaults, so a minimal file only needs the connection block.

use anyhow::{Context, Result};
use gatesift_protocol::ScanConfig;
use std::path::Path;

/// Load a scan configuration snapshot from a JSON file.
pub fn load(path: &Path) -> Result<ScanConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: ScanConfig = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "gatesift-config-{}-{:p}.json",
            std::process::id(),
            contents
        ));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn minimal_file_gets_defaults() {
        let path = write_temp(
            r#"{
                "api_url": "https://relay.example/v1",
                "api_key": "sk-test",
                "model": "gpt-4o-mini",
                "rules": {"block_status_codes": [400]}
            }"#,
        );
        let config = load(&path).unwrap();
        assert_eq!(config.api_url, "https://relay.example/v1");
        assert_eq!(config.concurrency, 15);
        assert!(config.rules.block_status_codes.contains(&400));
        assert!(config.rules.retry_status_codes.contains(&429));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn malformed_json_is_a_readable_error() {
        let path = write_temp("{not json");
        let err = load(&path).unwrap_err();
        assert!(err.to_string().contains("parse"));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_file_is_a_readable_error() {
        let err = load(Path::new("/nonexistent/gatesift.json")).unwrap_err();
        assert!(err.to_string().contains("read"));
    }
}
