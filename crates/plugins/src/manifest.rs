//! Plugin manifest — `plugin.toml` at a fixed path inside the bundle.
//!
//! Required fields:
//! ```toml
//! id = "com.example.ping"
//! version = "1.0.0"
//! display_name = "Ping"
//! entry_point = "ping"
//! ```
//!
//! Optional fields:
//! ```toml
//! min_agent_version = "0.3.0"
//! required_capabilities = ["privileged_shell"]
//! dependencies = ["com.example.base"]
//! ```

use serde::{Deserialize, Serialize};

/// Validates a plugin id: dot-separated segments of `[a-z0-9_-]`.
pub fn is_valid_plugin_id(id: &str) -> bool {
    !id.is_empty()
        && id.split('.').all(|seg| {
            !seg.is_empty()
                && seg
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Globally unique id, reverse-domain style.
    pub id: String,
    pub version: String,
    pub display_name: String,
    /// Constructor name resolved against the factory registry.
    pub entry_point: String,
    #[serde(default)]
    pub min_agent_version: Option<String>,
    /// Capability flags that must be present for the plugin to load
    /// (`privileged_shell`, `accessibility`).
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    /// Ids of plugins that must be STARTED before this one.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl PluginManifest {
    pub fn parse(content: &str) -> Result<Self, String> {
        let manifest: Self = toml::from_str(content).map_err(|e| e.to_string())?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !is_valid_plugin_id(&self.id) {
            return Err(format!(
                "invalid plugin id '{}': dot-separated lowercase segments required",
                self.id
            ));
        }
        if self.version.is_empty() {
            return Err("version must not be empty".into());
        }
        if self.entry_point.is_empty() {
            return Err("entry_point must not be empty".into());
        }
        Ok(())
    }
}

/// Lenient `major.minor.patch` ordering for `min_agent_version` checks.
/// Missing segments count as zero; non-numeric segments compare as zero.
pub fn version_at_least(actual: &str, required: &str) -> bool {
    let parse = |v: &str| -> [u64; 3] {
        let mut out = [0u64; 3];
        for (i, seg) in v.split('.').take(3).enumerate() {
            out[i] = seg
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse()
                .unwrap_or(0);
        }
        out
    };
    parse(actual) >= parse(required)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_ids() {
        assert!(is_valid_plugin_id("com.example.ping"));
        assert!(is_valid_plugin_id("ping"));
        assert!(is_valid_plugin_id("my-plugin_2"));
    }

    #[test]
    fn invalid_ids() {
        assert!(!is_valid_plugin_id(""));
        assert!(!is_valid_plugin_id("Com.Example"));
        assert!(!is_valid_plugin_id("a..b"));
        assert!(!is_valid_plugin_id(".leading"));
        assert!(!is_valid_plugin_id("has space"));
    }

    #[test]
    fn parse_full_manifest() {
        let m = PluginManifest::parse(
            r#"
id = "com.example.ping"
version = "1.2.0"
display_name = "Ping"
entry_point = "ping"
min_agent_version = "0.2.0"
required_capabilities = ["accessibility"]
dependencies = ["com.example.base"]
"#,
        )
        .unwrap();
        assert_eq!(m.id, "com.example.ping");
        assert_eq!(m.dependencies, vec!["com.example.base"]);
        assert_eq!(m.required_capabilities, vec!["accessibility"]);
    }

    #[test]
    fn parse_rejects_missing_fields_and_bad_ids() {
        assert!(PluginManifest::parse("id = \"x\"").is_err());
        assert!(PluginManifest::parse(
            "id = \"BAD ID\"\nversion = \"1\"\ndisplay_name = \"x\"\nentry_point = \"x\""
        )
        .is_err());
    }

    #[test]
    fn version_ordering() {
        assert!(version_at_least("0.3.0", "0.3.0"));
        assert!(version_at_least("0.3.1", "0.3.0"));
        assert!(version_at_least("1.0.0", "0.9.9"));
        assert!(!version_at_least("0.2.9", "0.3.0"));
        // Missing segments count as zero.
        assert!(version_at_least("1", "0.9"));
        assert!(!version_at_least("0.9", "1"));
    }
}
