//! Node and transport configuration.

use shared::{GRID_HEIGHT, GRID_WIDTH, MAX_ROAMERS, ROAMER_SPAWN_CHANCE, SHRUBBERY_COUNT};
use shared::rules::RoamerLimits;
use std::time::Duration;

/// Settings for one [`crate::Node`].
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Name shown to other participants
    pub display_name: String,

    /// Cadence of authority full snapshots
    pub snapshot_interval: Duration,

    /// Minimum gap between two locally originated actions
    pub action_cooldown: Duration,

    /// Grid size used when this node opens a session
    pub grid_width: i32,
    pub grid_height: i32,

    /// Shrubbery scattered over a freshly opened world
    pub shrubbery: usize,

    pub roamer_cap: usize,

    /// Chance per tick that the authority spawns a roamer
    pub roamer_spawn_chance: f64,

    /// Fixed RNG seed, for reproducible runs
    pub seed: Option<u64>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            snapshot_interval: Duration::from_millis(500),
            action_cooldown: Duration::from_millis(200),
            grid_width: GRID_WIDTH,
            grid_height: GRID_HEIGHT,
            shrubbery: SHRUBBERY_COUNT,
            roamer_cap: MAX_ROAMERS,
            roamer_spawn_chance: ROAMER_SPAWN_CHANCE,
            seed: None,
        }
    }
}

impl NodeConfig {
    pub fn named(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..Self::default()
        }
    }

    pub fn roamer_limits(&self) -> RoamerLimits {
        RoamerLimits {
            cap: self.roamer_cap,
            spawn_chance: self.roamer_spawn_chance,
        }
    }
}

/// Settings for [`crate::transport::UdpTransport`].
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Local socket address to bind
    pub bind: String,

    /// A link silent for this long is dropped
    pub link_timeout: Duration,

    /// How often keep-alive frames go out
    pub heartbeat_interval: Duration,

    /// Maximum links the authority accepts
    pub max_peers: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:0".to_string(),
            link_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(1),
            max_peers: 16,
        }
    }
}

impl UdpConfig {
    pub fn bind(addr: impl Into<String>) -> Self {
        Self {
            bind: addr.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_node_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.snapshot_interval, Duration::from_millis(500));
        assert_eq!(config.action_cooldown, Duration::from_millis(200));
        assert_eq!((config.grid_width, config.grid_height), (30, 20));
        assert_eq!(config.shrubbery, 60);
        assert!(config.seed.is_none());

        let limits = config.roamer_limits();
        assert_eq!(limits.cap, 15);
        assert_approx_eq!(limits.spawn_chance, 0.02, 1e-9);
    }

    #[test]
    fn test_udp_defaults() {
        let config = UdpConfig::bind("127.0.0.1:0");
        assert_eq!(config.bind, "127.0.0.1:0");
        assert_eq!(config.link_timeout, Duration::from_secs(5));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(config.max_peers, 16);
    }
}
