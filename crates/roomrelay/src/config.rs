//! Server configuration (A1): CLI flags merged over an optional TOML
//! file, following the teacher's `RelayConfig` shape.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// HTTP/WebSocket bind address.
    pub bind_addr: String,
    /// Rate limit (requests per second per IP) at the HTTP admission boundary.
    pub rate_limit: u32,
    /// Minimum age a room must reach, with no peers left, before the
    /// idle sweep removes it.
    pub room_idle_secs: u64,
    /// Interval between idle-room sweeps.
    pub cleanup_interval_secs: u64,
    /// `"pretty"` (human-readable) or `"json"` (structured) log output.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl RelayConfig {
    const MIN_ROOM_IDLE_SECS: u64 = 10;

    pub fn validate(&mut self) {
        if self.room_idle_secs < Self::MIN_ROOM_IDLE_SECS {
            self.room_idle_secs = Self::MIN_ROOM_IDLE_SECS;
        }
        if self.cleanup_interval_secs == 0 {
            self.cleanup_interval_secs = 30;
        }
        if self.log_format != "json" {
            self.log_format = "pretty".to_string();
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            rate_limit: 100,
            room_idle_secs: 60,
            cleanup_interval_secs: 30,
            log_format: default_log_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_clamps_tiny_room_idle() {
        let mut cfg = RelayConfig { room_idle_secs: 1, ..RelayConfig::default() };
        cfg.validate();
        assert_eq!(cfg.room_idle_secs, RelayConfig::MIN_ROOM_IDLE_SECS);
    }

    #[test]
    fn validate_rejects_unknown_log_format() {
        let mut cfg = RelayConfig { log_format: "xml".to_string(), ..RelayConfig::default() };
        cfg.validate();
        assert_eq!(cfg.log_format, "pretty");
    }
}
