//! Configuration file loading
//!
//! Config structs live next to the code they configure; this module only knows
//! how to turn a file into one of them. JSON, TOML and YAML are accepted.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Load a config section from a file. The format is picked from the extension,
/// falling back to trying every supported format.
pub fn load_from_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("json") => serde_json::from_str(&content)
            .map_err(|e| Error::Configuration(format!("{}: {}", path.display(), e))),
        Some("toml") => toml::from_str(&content)
            .map_err(|e| Error::Configuration(format!("{}: {}", path.display(), e))),
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
            .map_err(|e| Error::Configuration(format!("{}: {}", path.display(), e))),
        _ => load_from_str(&content),
    }
}

/// Parse a config section, trying JSON, then TOML, then YAML
pub fn load_from_str<T: DeserializeOwned>(content: &str) -> Result<T> {
    if let Ok(config) = serde_json::from_str::<T>(content) {
        return Ok(config);
    }

    if let Ok(config) = toml::from_str::<T>(content) {
        return Ok(config);
    }

    serde_yaml::from_str::<T>(content)
        .map_err(|_| Error::Configuration("Unknown config format".to_string()))
}

/// Read an environment override, ignoring unset or empty variables
pub fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Read and parse an environment override; unparsable values are logged and ignored
pub fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env_var(name)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparsable {}={}", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        rate: f32,
        voice: String,
    }

    #[test]
    fn test_load_each_format() {
        let json: Sample = load_from_str(r#"{"rate": 1.5, "voice": "nova"}"#).unwrap();
        let toml: Sample = load_from_str("rate = 1.5\nvoice = \"nova\"\n").unwrap();
        let yaml: Sample = load_from_str("rate: 1.5\nvoice: nova\n").unwrap();
        assert_eq!(json, toml);
        assert_eq!(toml, yaml);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let result: Result<Sample> = load_from_str("rate = = =");
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
