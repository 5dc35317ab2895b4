//! Environment-derived values injected into dynamically rendered HTML.
//!
//! `AppEnv` is the value model only; locking and hot-reload wiring live in
//! the serving layer. The merge rules mirror the declared-manifest contract:
//! a non-empty declared set acts as an allow-list, an empty set accepts
//! whatever the watched config source provides.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use sha2::{Digest, Sha512};
use std::collections::BTreeMap;
use std::sync::LazyLock;

static CONFIG_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!--\s*CONFIG\s*-->").expect("config marker pattern"));

/// How injected values are exposed to client-side script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Variant {
    /// `self.process = {"env": {...}}`
    #[serde(rename = "process")]
    Process,
    /// `Object.assign(self, {...})`
    #[serde(rename = "global")]
    #[default]
    Global,
    /// `self.NG_ENV = {...}`
    #[serde(rename = "NG_ENV")]
    NgEnv,
}

/// Current set of environment values for dynamic HTML rendering.
#[derive(Debug, Clone)]
pub struct AppEnv {
    pub variant: Variant,
    /// Declared variable names from the build-time manifest. Empty means
    /// "accept whatever the config source provides, unfiltered".
    pub declared: Vec<String>,
    values: BTreeMap<String, Option<String>>,
    /// Bumped on every merge; the synthetic Last-Modified for rendered HTML.
    pub last_changed: DateTime<Utc>,
}

impl Default for AppEnv {
    fn default() -> Self {
        Self::new(Variant::Global, Vec::new())
    }
}

impl AppEnv {
    /// Declared keys are seeded from the process environment; a declared but
    /// unset variable is kept as an explicit null.
    pub fn new(variant: Variant, declared: Vec<String>) -> Self {
        let values = declared
            .iter()
            .map(|key| (key.clone(), std::env::var(key).ok()))
            .collect();
        Self {
            variant,
            declared,
            values,
            last_changed: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Option<String>> {
        self.values.get(key)
    }

    /// Merge incoming values. With a non-empty declared set only keys already
    /// present are updated; keys absent from the incoming map fall back to a
    /// fresh process-environment lookup. With an empty declared set the
    /// incoming map replaces the values wholesale.
    pub fn merge(&mut self, incoming: BTreeMap<String, Option<String>>) {
        self.last_changed = Utc::now();
        if self.declared.is_empty() {
            self.values = incoming;
            return;
        }
        for (key, value) in self.values.iter_mut() {
            *value = match incoming.get(key) {
                Some(incoming_value) => incoming_value.clone(),
                None => std::env::var(key).ok(),
            };
        }
    }

    /// Set a single already-present key (per-request nonce storage).
    /// Unknown keys are ignored.
    pub fn update(&mut self, key: &str, value: &str) {
        if let Some(slot) = self.values.get_mut(key) {
            *slot = Some(value.to_owned());
        }
    }

    /// The IIFE script body exposing the current values per the variant.
    pub fn iife_content(&self) -> String {
        let env_json = serde_json::to_string(&self.values).unwrap_or_else(|_| "{}".to_owned());
        let assignment = match self.variant {
            Variant::NgEnv => format!("self.NG_ENV={env_json}"),
            Variant::Global => format!("Object.assign(self,{env_json})"),
            Variant::Process => format!("self.process={{\"env\":{env_json}}}"),
        };
        format!("(function(self){{{assignment};}})(window)")
    }

    /// Inject the IIFE `<script>` into `html`: at a `<!--CONFIG-->` marker if
    /// present, else directly after `</title>`, else before `</head>`.
    /// Returns the rewritten HTML and, when requested, the CSP source token
    /// of the injected script.
    pub fn insert(&self, html: &str, with_csp_hash: bool) -> (String, Option<String>) {
        let iife = self.iife_content();
        let csp_hash = with_csp_hash.then(|| {
            let digest = Sha512::digest(iife.as_bytes());
            format!("'sha512-{}'", BASE64.encode(digest))
        });

        let script = format!("<script>{iife}</script>");
        let rewritten = if CONFIG_MARKER_RE.is_match(html) {
            CONFIG_MARKER_RE.replace_all(html, script.as_str()).into_owned()
        } else if html.contains("</title>") {
            html.replacen("</title>", &format!("</title>{script}"), 1)
        } else {
            html.replacen("</head>", &format!("{script}</head>"), 1)
        };

        (rewritten, csp_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with(declared: &[&str]) -> AppEnv {
        AppEnv::new(Variant::Global, declared.iter().map(|s| s.to_string()).collect())
    }

    fn map(pairs: &[(&str, Option<&str>)]) -> BTreeMap<String, Option<String>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_owned)))
            .collect()
    }

    #[test]
    fn declared_keys_filter_unknown_merge_entries() {
        let mut env = env_with(&["SPAHOST_TEST_LABEL"]);
        env.merge(map(&[("OTHER", Some("x"))]));

        assert_eq!(env.get("SPAHOST_TEST_LABEL"), Some(&None));
        assert!(!env.has("OTHER"));
    }

    #[test]
    fn empty_declared_set_replaces_values_wholesale() {
        let mut env = env_with(&[]);
        assert!(env.is_empty());

        env.merge(map(&[("OTHER", Some("x"))]));
        assert_eq!(env.get("OTHER"), Some(&Some("x".to_owned())));

        env.merge(map(&[("NEXT", None)]));
        assert!(!env.has("OTHER"));
        assert_eq!(env.get("NEXT"), Some(&None));
    }

    #[test]
    fn merge_bumps_last_changed() {
        let mut env = env_with(&[]);
        let before = env.last_changed;
        std::thread::sleep(std::time::Duration::from_millis(2));
        env.merge(BTreeMap::new());
        assert!(env.last_changed > before);
    }

    #[test]
    fn update_only_touches_present_keys() {
        let mut env = env_with(&["NONCE_SLOT"]);
        env.update("NONCE_SLOT", "abc");
        env.update("UNKNOWN", "zzz");

        assert_eq!(env.get("NONCE_SLOT"), Some(&Some("abc".to_owned())));
        assert!(!env.has("UNKNOWN"));
    }

    #[test]
    fn iife_shape_follows_variant() {
        let mut env = AppEnv::new(Variant::Process, vec![]);
        env.merge(map(&[("API_URL", Some("https://api"))]));
        assert_eq!(
            env.iife_content(),
            r#"(function(self){self.process={"env":{"API_URL":"https://api"}};})(window)"#
        );

        env.variant = Variant::Global;
        assert_eq!(
            env.iife_content(),
            r#"(function(self){Object.assign(self,{"API_URL":"https://api"});})(window)"#
        );

        env.variant = Variant::NgEnv;
        assert_eq!(
            env.iife_content(),
            r#"(function(self){self.NG_ENV={"API_URL":"https://api"};})(window)"#
        );
    }

    #[test]
    fn insert_prefers_config_marker() {
        let env = env_with(&[]);
        let html = "<html><head><title>t</title><!-- CONFIG --></head></html>";
        let (out, _) = env.insert(html, false);
        assert!(!out.contains("CONFIG"));
        assert!(out.contains("<script>(function(self)"));
    }

    #[test]
    fn insert_falls_back_to_title_then_head() {
        let env = env_with(&[]);

        let (out, _) = env.insert("<head><title>t</title></head>", false);
        let script_at = out.find("<script>").unwrap();
        assert!(out.find("</title>").unwrap() < script_at);
        assert!(script_at < out.find("</head>").unwrap());

        let (out, _) = env.insert("<head></head>", false);
        assert!(out.find("<script>").unwrap() < out.find("</head>").unwrap());
    }

    #[test]
    fn insert_hash_is_stable_for_unchanged_values() {
        let mut env = env_with(&[]);
        env.merge(map(&[("A", Some("1"))]));
        let (_, first) = env.insert("<head></head>", true);
        let (_, second) = env.insert("<head></head>", true);
        let token = first.expect("hash requested");
        assert_eq!(Some(&token), second.as_ref());
        assert!(token.starts_with("'sha512-") && token.ends_with('\''));
    }
}
