//! Build-time manifest (`ngssc.json`) describing the injection variant and
//! the declared environment variable names.
//!
//! Absence or invalidity never fails startup; it degrades to an inert
//! default that only becomes active once the watched config file provides
//! values.

use domain::{AppEnv, Variant};
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

pub const MANIFEST_NAME: &str = "ngssc.json";

#[derive(Debug, Deserialize)]
struct Manifest {
    variant: Option<Variant>,
    #[serde(rename = "environmentVariables")]
    environment_variables: Option<Vec<String>>,
}

/// Read `<root>/ngssc.json`; any failure yields `AppEnv::default()`.
pub fn load_app_env(root: &Path) -> AppEnv {
    let path = root.join(MANIFEST_NAME);
    let data = match std::fs::read(&path) {
        Ok(data) => data,
        Err(_) => return AppEnv::default(),
    };

    info!(path = %path.display(), "detected manifest, reading configuration");
    let manifest: Manifest = match serde_json::from_slice(&data) {
        Ok(manifest) => manifest,
        Err(error) => {
            warn!(path = %path.display(), %error, "failed to parse manifest, using default configuration");
            return AppEnv::default();
        }
    };

    let Some(declared) = manifest.environment_variables else {
        warn!(path = %path.display(), "manifest does not declare environmentVariables, using default configuration");
        return AppEnv::default();
    };
    let Some(variant) = manifest.variant else {
        warn!(path = %path.display(), "manifest does not declare a variant, using default configuration");
        return AppEnv::default();
    };

    AppEnv::new(variant, declared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn root_with_manifest(content: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(MANIFEST_NAME), content).unwrap();
        dir
    }

    #[test]
    fn valid_manifest_declares_keys() {
        let dir = root_with_manifest(
            r#"{"variant": "process", "environmentVariables": ["API_URL", "FLAG"]}"#,
        );
        let env = load_app_env(dir.path());
        assert_eq!(env.variant, Variant::Process);
        assert_eq!(env.declared, vec!["API_URL", "FLAG"]);
        assert!(env.has("API_URL") && env.has("FLAG"));
    }

    #[test]
    fn ng_env_variant_spelling() {
        let dir = root_with_manifest(r#"{"variant": "NG_ENV", "environmentVariables": []}"#);
        assert_eq!(load_app_env(dir.path()).variant, Variant::NgEnv);
    }

    #[test]
    fn missing_file_degrades_to_default() {
        let dir = TempDir::new().unwrap();
        let env = load_app_env(dir.path());
        assert_eq!(env.variant, Variant::Global);
        assert!(env.declared.is_empty());
        assert!(env.is_empty());
    }

    #[test]
    fn unknown_variant_degrades_to_default() {
        let dir = root_with_manifest(r#"{"variant": "nope", "environmentVariables": []}"#);
        let env = load_app_env(dir.path());
        assert_eq!(env.variant, Variant::Global);
        assert!(env.declared.is_empty());
    }

    #[test]
    fn missing_declared_set_degrades_to_default() {
        let dir = root_with_manifest(r#"{"variant": "global"}"#);
        assert!(load_app_env(dir.path()).declared.is_empty());
    }

    #[test]
    fn malformed_json_degrades_to_default() {
        let dir = root_with_manifest("{");
        assert!(load_app_env(dir.path()).is_empty());
    }
}
