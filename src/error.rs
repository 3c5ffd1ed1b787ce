//! Error types.
//!
//! Only failures a caller can act on get a type here. A missing player
//! state is repaired in place by the store, and a revert that cannot reach
//! its client is reported as a deferred outcome rather than an error.

use crate::types::PlayerId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Source(#[from] ::config::ConfigError),

    #[error("missing [settings] section")]
    MissingSettings,

    #[error("invalid setting '{key}': {reason}")]
    InvalidSetting { key: &'static str, reason: String },

    #[error("region '{name}': {reason}")]
    InvalidRegion { name: String, reason: String },

    #[error("zone '{zone}': {reason}")]
    InvalidZone { zone: String, reason: String },

    #[error("zone '{zone}' overlaps '{other}'")]
    Overlap { zone: String, other: String },

    #[error("node '{node}' in task '{task}': {reason}")]
    InvalidNode {
        task: String,
        node: String,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage document is malformed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("unexpected stored value for player {player} in zone '{zone}': {reason}")]
    Corrupt {
        player: PlayerId,
        zone: String,
        reason: String,
    },

    #[error("persistence worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("player {0} is not connected")]
    Offline(PlayerId),

    #[error("host rejected the request: {0}")]
    Rejected(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeArgumentError {
    #[error("'{0}' is not a duration")]
    Unparseable(String),

    #[error("duration must be at least {minimum} seconds, got {value}")]
    BelowMinimum { value: i64, minimum: i64 },
}
