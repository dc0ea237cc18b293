//! Configuration system.
//!
//! Loads session configuration from JSON strings (file IO left to app).
//! Every field has a default so partial documents are accepted.

use serde::{Deserialize, Serialize};

/// Default listen/connect port.
pub const DEFAULT_PORT: u16 = 8910;

/// Root configuration for a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Address to join, e.g. `127.0.0.1`.
    #[serde(default = "default_address")]
    pub address: String,
    /// Port to host on or join.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Fixed physics tick rate.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    /// How long a join may take before it is reported as failed.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub movement: MovementTuning,
}

/// Per-entity motion constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementTuning {
    /// Max speed, units per second.
    pub speed: f32,
    /// Velocity change per second while input is held.
    pub acceleration: f32,
    /// Velocity change per second toward rest while input is released.
    pub friction: f32,
    /// Replica convergence rate, per second.
    pub net_smoothing: f32,
}

impl Default for MovementTuning {
    fn default() -> Self {
        Self {
            speed: 220.0,
            acceleration: 1200.0,
            friction: 1200.0,
            net_smoothing: 12.0,
        }
    }
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_tick_hz() -> u32 {
    60
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            tick_hz: default_tick_hz(),
            connect_timeout_ms: default_connect_timeout_ms(),
            movement: MovementTuning::default(),
        }
    }
}

impl SessionConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Fixed tick length in seconds.
    pub fn tick_dt(&self) -> f32 {
        1.0 / self.tick_hz.max(1) as f32
    }
}
