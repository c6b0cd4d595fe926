//! Layered device configuration: env > file > hard-coded default (§6).
//!
//! The on-disk format is the historical key=value device-config file:
//! inline-comment tolerant, quoted values supported. Fields that identify
//! hardware are regenerated by an external detection tool; this loader
//! does not distinguish those at parse time, but `DeviceConfig::merge_over`
//! preserves non-hardware fields (credentials, mode) across a regeneration
//! by only overwriting keys present in the newer layer.

use crate::error::{HorusError, HorusResult};
use std::collections::HashMap;
use std::path::Path;

/// Which layer supplied a field's value, kept for the startup log line
/// ("Log which source provided each field", §4.J step 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Env,
    File,
    Default,
}

impl ConfigSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigSource::Env => "env",
            ConfigSource::File => "file",
            ConfigSource::Default => "default",
        }
    }
}

/// Parse the key=value device-config file format.
///
/// - `#` and `;` start an inline comment outside of quotes.
/// - Values may be wrapped in single or double quotes to retain leading/
///   trailing whitespace or a literal `#`.
/// - Blank lines and lines starting with `#`/`;` (after trimming) are skipped.
pub fn parse_key_value_file(contents: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        let Some((key, rest)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_string();
        let value = strip_inline_comment(rest.trim());
        map.insert(key, value);
    }
    map
}

fn strip_inline_comment(value: &str) -> String {
    if let Some(rest) = value.strip_prefix('"') {
        if let Some(end) = rest.find('"') {
            return rest[..end].to_string();
        }
    }
    if let Some(rest) = value.strip_prefix('\'') {
        if let Some(end) = rest.find('\'') {
            return rest[..end].to_string();
        }
    }
    // Unquoted: cut at the first unescaped comment marker.
    let mut out = String::new();
    for c in value.chars() {
        if c == '#' || c == ';' {
            break;
        }
        out.push(c);
    }
    out.trim().to_string()
}

/// A single resolved field: its value plus which layer provided it.
#[derive(Debug, Clone)]
pub struct ResolvedField {
    pub value: String,
    pub source: ConfigSource,
}

/// Resolves one field across env > file > default, logging nothing itself
/// (the caller logs `ResolvedField::source`).
pub fn resolve_field(
    env_name: &str,
    file: &HashMap<String, String>,
    default: &str,
) -> ResolvedField {
    if let Ok(v) = std::env::var(env_name) {
        if !v.is_empty() {
            return ResolvedField {
                value: v,
                source: ConfigSource::Env,
            };
        }
    }
    if let Some(v) = file.get(env_name) {
        return ResolvedField {
            value: v.clone(),
            source: ConfigSource::File,
        };
    }
    ResolvedField {
        value: default.to_string(),
        source: ConfigSource::Default,
    }
}

/// Device configuration consumed by the lifecycle supervisor and adapters,
/// covering the environment variables listed in §6.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub repo_id: String,
    pub single_task: String,
    pub cloud_mode: u8,
    pub npu: bool,
    pub show_preview: bool,
    pub memory_limit_gb: f64,
    pub edge_server_host: String,
    pub edge_server_user: String,
    pub edge_server_password: String,
    pub edge_server_port: u16,
    pub edge_server_path: String,
    pub api_base_url: String,
    pub api_username: String,
    pub api_password: String,
    pub camera_top_path: String,
    pub camera_wrist_path: String,
    pub arm_leader_port: String,
    pub arm_follower_port: String,
    /// env var -> which layer resolved it, for the startup "source" log line.
    pub field_sources: HashMap<String, ConfigSource>,
}

impl DeviceConfig {
    /// Load the layered config: env > file (if `path` exists) > defaults.
    pub fn load(path: Option<&Path>) -> HorusResult<Self> {
        let file_map = match path {
            Some(p) if p.exists() => {
                let contents = std::fs::read_to_string(p)?;
                parse_key_value_file(&contents)
            }
            _ => HashMap::new(),
        };

        let mut sources = HashMap::new();
        macro_rules! field {
            ($env:literal, $default:expr) => {{
                let resolved = resolve_field($env, &file_map, $default);
                sources.insert($env.to_string(), resolved.source);
                resolved.value
            }};
        }

        let cloud_raw = field!("CLOUD", "0");
        let cloud_mode: u8 = cloud_raw
            .parse()
            .map_err(|_| HorusError::config(format!("CLOUD must be 0-4, got '{}'", cloud_raw)))?;
        if cloud_mode > 4 {
            return Err(HorusError::config(format!(
                "CLOUD must be 0-4, got {}",
                cloud_mode
            )));
        }

        let memory_limit_gb: f64 = field!("MEMORY_LIMIT_GB", "19")
            .parse()
            .map_err(|_| HorusError::config("MEMORY_LIMIT_GB must be numeric"))?;

        let edge_port: u16 = field!("EDGE_SERVER_PORT", "22")
            .parse()
            .map_err(|_| HorusError::config("EDGE_SERVER_PORT must be a valid port"))?;

        Ok(Self {
            repo_id: field!("REPO_ID", "default_repo"),
            single_task: field!("SINGLE_TASK", "unspecified_task"),
            cloud_mode,
            npu: field!("NPU", "0") != "0",
            show_preview: field!("SHOW", "0") != "0",
            memory_limit_gb,
            edge_server_host: field!("EDGE_SERVER_HOST", ""),
            edge_server_user: field!("EDGE_SERVER_USER", ""),
            edge_server_password: field!("EDGE_SERVER_PASSWORD", ""),
            edge_server_port: edge_port,
            edge_server_path: field!("EDGE_SERVER_PATH", "/uploaded_data"),
            api_base_url: field!("API_BASE_URL", "http://localhost:8000"),
            api_username: field!("API_USERNAME", ""),
            api_password: field!("API_PASSWORD", ""),
            camera_top_path: field!("CAMERA_TOP_PATH", "/dev/video0"),
            camera_wrist_path: field!("CAMERA_WRIST_PATH", "/dev/video2"),
            arm_leader_port: field!("ARM_LEADER_PORT", "/dev/ttyUSB0"),
            arm_follower_port: field!("ARM_FOLLOWER_PORT", "/dev/ttyUSB1"),
            field_sources: sources,
        })
    }

    pub fn memory_limit_bytes(&self) -> u64 {
        (self.memory_limit_gb * 1024.0 * 1024.0 * 1024.0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_and_commented_values() {
        let contents = r#"
# a comment line
REPO_ID = "my repo" # trailing note
SINGLE_TASK=pick_and_place
; semicolon comment
CLOUD=2
"#;
        let map = parse_key_value_file(contents);
        assert_eq!(map.get("REPO_ID").unwrap(), "my repo");
        assert_eq!(map.get("SINGLE_TASK").unwrap(), "pick_and_place");
        assert_eq!(map.get("CLOUD").unwrap(), "2");
    }

    #[test]
    fn env_overrides_file_overrides_default() {
        let mut file = HashMap::new();
        file.insert("REPO_ID".to_string(), "from_file".to_string());

        std::env::remove_var("HORUS_TEST_FIELD_DOES_NOT_EXIST");
        let from_default = resolve_field("HORUS_TEST_FIELD_DOES_NOT_EXIST", &file, "fallback");
        assert_eq!(from_default.value, "fallback");
        assert_eq!(from_default.source, ConfigSource::Default);

        let from_file = resolve_field("REPO_ID", &file, "fallback");
        assert_eq!(from_file.value, "from_file");
        assert_eq!(from_file.source, ConfigSource::File);
    }

    #[test]
    fn rejects_out_of_range_cloud_mode() {
        let contents = "CLOUD=7\n";
        std::env::remove_var("CLOUD");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.conf");
        std::fs::write(&path, contents).unwrap();
        let err = DeviceConfig::load(Some(&path));
        assert!(err.is_err());
    }
}
