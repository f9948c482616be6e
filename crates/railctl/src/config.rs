//! Application configuration.

use crate::error::{AppError, AppResult};
use railctl_core::{ElementId, ElementKind};
use railctl_link::{AckListenerConfig, LinkConfig, DEFAULT_MAX_LINE_BYTES};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Environment variable overriding the config path.
pub const CONFIG_ENV_VAR: &str = "RAILCTL_CONFIG";

/// Transport and supervision settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSection {
    /// UDP target for every outbound datagram.
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: SocketAddr,
    /// TCP address the ACK listener binds.
    #[serde(default = "default_ack_listen_addr")]
    pub ack_listen_addr: SocketAddr,
    /// Heartbeat period (ms). Default: 10,000.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Watchdog check period (ms). Default: 1,000.
    #[serde(default = "default_watchdog_period_ms")]
    pub watchdog_period_ms: u64,
    /// ACK age after which Connected is demoted (ms). Default: 5,000.
    #[serde(default = "default_watchdog_timeout_ms")]
    pub watchdog_timeout_ms: u64,
    /// Per-connection ACK read timeout (ms). Unset waits forever.
    #[serde(default)]
    pub ack_read_timeout_ms: Option<u64>,
    /// Longest accepted ACK line (bytes). Default: 1,024.
    #[serde(default = "default_ack_max_line_bytes")]
    pub ack_max_line_bytes: usize,
    /// Listener restart backoff base (ms). Default: 500.
    #[serde(default = "default_listener_backoff_base_ms")]
    pub listener_backoff_base_ms: u64,
    /// Listener restart backoff cap (ms). Default: 30,000.
    #[serde(default = "default_listener_backoff_max_ms")]
    pub listener_backoff_max_ms: u64,
}

fn default_broadcast_addr() -> SocketAddr {
    SocketAddr::from(([255, 255, 255, 255], 5005))
}

fn default_ack_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 6000))
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

fn default_watchdog_period_ms() -> u64 {
    1_000
}

fn default_watchdog_timeout_ms() -> u64 {
    5_000
}

fn default_ack_max_line_bytes() -> usize {
    DEFAULT_MAX_LINE_BYTES
}

fn default_listener_backoff_base_ms() -> u64 {
    500
}

fn default_listener_backoff_max_ms() -> u64 {
    30_000
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            broadcast_addr: default_broadcast_addr(),
            ack_listen_addr: default_ack_listen_addr(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            watchdog_period_ms: default_watchdog_period_ms(),
            watchdog_timeout_ms: default_watchdog_timeout_ms(),
            ack_read_timeout_ms: None,
            ack_max_line_bytes: default_ack_max_line_bytes(),
            listener_backoff_base_ms: default_listener_backoff_base_ms(),
            listener_backoff_max_ms: default_listener_backoff_max_ms(),
        }
    }
}

impl From<&LinkSection> for LinkConfig {
    fn from(cfg: &LinkSection) -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(cfg.heartbeat_interval_ms),
            watchdog_period: Duration::from_millis(cfg.watchdog_period_ms),
            watchdog_timeout: Duration::from_millis(cfg.watchdog_timeout_ms),
        }
    }
}

impl From<&LinkSection> for AckListenerConfig {
    fn from(cfg: &LinkSection) -> Self {
        Self {
            addr: cfg.ack_listen_addr,
            read_timeout: cfg.ack_read_timeout_ms.map(Duration::from_millis),
            max_line_bytes: cfg.ack_max_line_bytes,
            backoff_base: Duration::from_millis(cfg.listener_backoff_base_ms),
            backoff_max: Duration::from_millis(cfg.listener_backoff_max_ms),
        }
    }
}

/// Startup behaviour of the control layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlSection {
    /// Whether the emergency stop is engaged at startup. Default: true.
    #[serde(default = "default_true")]
    pub start_in_emergency_stop: bool,
    /// Request a connection immediately after startup. Default: false.
    #[serde(default)]
    pub connect_on_start: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            start_in_emergency_stop: true,
            connect_on_start: false,
        }
    }
}

/// One named area of the layout and the elements it contains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionConfig {
    pub name: String,
    #[serde(default)]
    pub blocks: Vec<String>,
    #[serde(default)]
    pub switches: Vec<String>,
}

/// Catalogue of layout sections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default)]
    pub sections: Vec<SectionConfig>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            sections: vec![
                section(
                    "Ablaufberg",
                    ["B001", "B002", "B003", "B004", "B005", "B007", "B008", "B009"]
                        .map(String::from)
                        .to_vec(),
                    (1..=5).map(|n| format!("W{n:03}")).collect(),
                ),
                section(
                    "Obere Ebene",
                    (101..=119).map(|n| format!("B{n}")).collect(),
                    (1..=14).map(|n| format!("W{n:02}")).collect(),
                ),
                section(
                    "Mittlere Ebene",
                    (201..=220).map(|n| format!("B{n}")).collect(),
                    (201..=212).map(|n| format!("W{n}")).collect(),
                ),
            ],
        }
    }
}

fn section(name: &str, blocks: Vec<String>, switches: Vec<String>) -> SectionConfig {
    SectionConfig {
        name: name.to_string(),
        blocks,
        switches,
    }
}

impl LayoutConfig {
    /// Check every id: it must parse, match its list's namespace and appear
    /// only once across all sections.
    pub fn validate(&self) -> AppResult<()> {
        let mut seen = HashSet::new();
        for section in &self.sections {
            if section.name.trim().is_empty() {
                return Err(AppError::Config("Layout section without a name".to_string()));
            }
            let lists = [
                (ElementKind::Block, &section.blocks),
                (ElementKind::Switch, &section.switches),
            ];
            for (kind, ids) in lists {
                for raw in ids {
                    let id = ElementId::parse(raw).map_err(|e| {
                        AppError::Config(format!("Section '{}': {e}", section.name))
                    })?;
                    if id.kind() != kind {
                        return Err(AppError::Config(format!(
                            "Section '{}': {id} is not a {kind}",
                            section.name
                        )));
                    }
                    if !seen.insert(id) {
                        return Err(AppError::Config(format!(
                            "Section '{}': {raw} is listed more than once",
                            section.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Section containing `id`, if any.
    pub fn section_of(&self, id: &ElementId) -> Option<&SectionConfig> {
        self.sections.iter().find(|s| {
            let ids = if id.is_block() { &s.blocks } else { &s.switches };
            ids.iter().any(|raw| raw == id.as_str())
        })
    }

    /// Total number of catalogued elements.
    pub fn element_count(&self) -> usize {
        self.sections
            .iter()
            .map(|s| s.blocks.len() + s.switches.len())
            .sum()
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub link: LinkSection,
    #[serde(default)]
    pub control: ControlSection,
    #[serde(default)]
    pub layout: LayoutConfig,
}

impl AppConfig {
    /// Load configuration.
    ///
    /// Path precedence: `explicit` (CLI) > `RAILCTL_CONFIG` > the default
    /// file. Only a missing default file falls back to built-in defaults;
    /// an explicitly named file must exist.
    pub fn load(explicit: Option<String>) -> AppResult<Self> {
        let named = explicit.or_else(|| std::env::var(CONFIG_ENV_VAR).ok());
        match named {
            Some(path) => Self::from_file(&path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(DEFAULT_CONFIG_PATH)
            }
            None => {
                tracing::warn!(path = DEFAULT_CONFIG_PATH, "Config file not found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config {path}: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        let link = &self.link;
        if link.heartbeat_interval_ms == 0 || link.watchdog_period_ms == 0 {
            return Err(AppError::Config(
                "heartbeat_interval_ms and watchdog_period_ms must be positive".to_string(),
            ));
        }
        if link.ack_max_line_bytes == 0 {
            return Err(AppError::Config("ack_max_line_bytes must be positive".to_string()));
        }
        if link.listener_backoff_base_ms > link.listener_backoff_max_ms {
            return Err(AppError::Config(
                "listener_backoff_base_ms exceeds listener_backoff_max_ms".to_string(),
            ));
        }
        self.layout.validate()
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig::from(&self.link)
    }

    pub fn ack_listener_config(&self) -> AckListenerConfig {
        AckListenerConfig::from(&self.link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol() {
        let config = AppConfig::default();
        assert_eq!(config.link.broadcast_addr.to_string(), "255.255.255.255:5005");
        assert_eq!(config.link.ack_listen_addr.port(), 6000);
        assert!(config.control.start_in_emergency_stop);
        assert!(!config.control.connect_on_start);

        let link = config.link_config();
        assert_eq!(link.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(link.watchdog_timeout, Duration::from_millis(5000));
    }

    #[test]
    fn test_builtin_layout_is_valid() {
        let layout = LayoutConfig::default();
        assert!(layout.validate().is_ok());
        assert_eq!(layout.sections.len(), 3);
        // 8 + 5, 19 + 14, 20 + 12
        assert_eq!(layout.element_count(), 78);

        let w01 = ElementId::parse("W01").unwrap();
        assert_eq!(layout.section_of(&w01).unwrap().name, "Obere Ebene");
        let w001 = ElementId::parse("W001").unwrap();
        assert_eq!(layout.section_of(&w001).unwrap().name, "Ablaufberg");
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.link.heartbeat_interval_ms, 10_000);
        assert!(config.link.ack_read_timeout_ms.is_none());
    }

    #[test]
    fn test_partial_sections() {
        let config = AppConfig::from_toml(
            r#"
            [link]
            broadcast_addr = "127.0.0.1:5005"
            ack_read_timeout_ms = 2000
            ack_max_line_bytes = 256

            [control]
            start_in_emergency_stop = false
            "#,
        )
        .unwrap();
        assert_eq!(config.link.broadcast_addr.ip().to_string(), "127.0.0.1");
        assert_eq!(config.link.watchdog_timeout_ms, 5_000);
        assert_eq!(
            config.ack_listener_config().read_timeout,
            Some(Duration::from_secs(2))
        );
        assert_eq!(config.ack_listener_config().max_line_bytes, 256);
        assert!(!config.control.start_in_emergency_stop);
        assert!(!config.control.connect_on_start);
    }

    #[test]
    fn test_rejects_wrong_namespace() {
        let err = AppConfig::from_toml(
            r#"
            [[layout.sections]]
            name = "Yard"
            blocks = ["W001"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Config(msg) if msg.contains("W001")));
    }

    #[test]
    fn test_rejects_unparseable_id() {
        let err = AppConfig::from_toml(
            r#"
            [[layout.sections]]
            name = "Yard"
            switches = ["X12"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_rejects_duplicate_across_sections() {
        let err = AppConfig::from_toml(
            r#"
            [[layout.sections]]
            name = "North"
            blocks = ["B001"]

            [[layout.sections]]
            name = "South"
            blocks = ["B001"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Config(msg) if msg.contains("more than once")));
    }

    #[test]
    fn test_suffix_width_is_significant() {
        let config = AppConfig::from_toml(
            r#"
            [[layout.sections]]
            name = "Mixed"
            switches = ["W01", "W001"]
            "#,
        );
        assert!(config.is_ok());
    }

    #[test]
    fn test_rejects_zero_line_cap() {
        let err = AppConfig::from_toml(
            r#"
            [link]
            ack_max_line_bytes = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Config(msg) if msg.contains("ack_max_line_bytes")));
    }

    #[test]
    fn test_rejects_inverted_backoff() {
        let err = AppConfig::from_toml(
            r#"
            [link]
            listener_backoff_base_ms = 60000
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
