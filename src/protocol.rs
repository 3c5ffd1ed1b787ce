//! `host.*`, `client.*` and `admin.*` wire protocol.
//!
//! This module owns **every message that crosses the boundary** between the
//! engine and the host server process that embeds it.
//!
//! ## Channel namespaces
//!
//! | Namespace     | Direction        | Meaning                                  |
//! |---------------|------------------|------------------------------------------|
//! | `host.*`      | host → engine    | world/player events the engine reacts to |
//! | `admin.*`     | host → engine    | operator command lines                   |
//! | `engine.*`    | host → engine    | request-reply queries                    |
//! | `client.*`    | engine → host    | per-player client view updates           |
//! | `world.*`     | engine → host    | requests that touch real world state     |
//!
//! ## Design rules
//!
//! 1. Every struct is `Serialize + Deserialize` with snake_case JSON.
//! 2. `client.*` messages address exactly one player; nothing is broadcast.
//! 3. Every outbound event is wrapped in [`HostEvent`] with a `frame` counter.

use crate::types::{BlockType, ChunkCoord, PlayerId, PositionKey};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// Every inbound line is one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostCommand {
    /// Set when the sender wants a [`Reply`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub command: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Every outbound message is wrapped in this envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostEvent<T> {
    pub frame: u64,
    pub subject: String,
    pub payload: T,
}

impl<T> HostEvent<T> {
    pub fn new(frame: u64, subject: impl Into<String>, payload: T) -> Self {
        Self {
            frame,
            subject: subject.into(),
            payload,
        }
    }
}

/// Answer to a [`HostCommand`] that carried an `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub id: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    pub fn success(id: u64, result: Option<serde_json::Value>) -> Self {
        Self {
            id,
            success: true,
            result,
            error: None,
        }
    }

    pub fn failed(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Client view updates  (subjects: client.*)
// ---------------------------------------------------------------------------

/// One block as a single client should see it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockChange {
    pub position: PositionKey,
    pub block: BlockType,
}

/// A batch of view updates for one player.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockChanges {
    pub player: PlayerId,
    pub changes: Vec<BlockChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BossBarShow {
    pub player: PlayerId,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BossBarHide {
    pub player: PlayerId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Teleport {
    pub player: PlayerId,
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

// ---------------------------------------------------------------------------
// World requests  (subjects: world.*)
// ---------------------------------------------------------------------------

/// Ask the host to paste a prebuilt structure. The engine never edits
/// blocks itself; this is the only request that changes real world state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StructurePaste {
    pub node_id: String,
    pub origin: PositionKey,
    pub schematic: String,
}

// ---------------------------------------------------------------------------
// Inbound host events  (subjects: host.*)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerJoinMsg {
    pub player: PlayerId,
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub bypass: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerQuitMsg {
    pub player: PlayerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerMoveMsg {
    pub player: PlayerId,
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub pitch: f32,
}

/// A chunk became visible. With `player` set only that player is
/// reconciled, otherwise every online player in the world is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkLoadMsg {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<PlayerId>,
    pub world: String,
    pub chunk: ChunkCoord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkUnloadMsg {
    pub world: String,
    pub chunk: ChunkCoord,
}

/// Mirror of a real block in the host world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockSetMsg {
    pub position: PositionKey,
    pub block: BlockType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockInteractMsg {
    pub player: PlayerId,
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub pitch: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminCommandMsg {
    pub line: String,
}

// ---------------------------------------------------------------------------
// Interaction results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Timed zone and the player has no access time left.
    NoAccessTime,
    /// The position is still on cooldown for this player.
    OnCooldown,
    /// The block type has no rule in this zone or node.
    NotMineable,
    /// Unlock zone and the player has not unlocked this block type.
    Locked,
    /// Blocks cannot be placed inside zones or nodes.
    PlaceNotAllowed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "detail")]
pub enum InteractOutcome {
    /// The host should let the interaction proceed. `overlay` is true when
    /// the position was put on cooldown and the player now sees the
    /// replacement block.
    Allowed { overlay: bool },
    Denied(DenyReason),
    NotInZone,
}

// ---------------------------------------------------------------------------
// Subject helpers
// ---------------------------------------------------------------------------

/// Every subject used by the protocol, as constants.
pub mod subjects {
    pub const PLAYER_JOIN: &str = "host.player.join";
    pub const PLAYER_QUIT: &str = "host.player.quit";
    pub const PLAYER_MOVE: &str = "host.player.move";
    pub const CHUNK_LOAD: &str = "host.chunk.load";
    pub const CHUNK_UNLOAD: &str = "host.chunk.unload";
    pub const BLOCK_SET: &str = "host.block.set";
    pub const BLOCK_INTERACT: &str = "host.block.interact";
    pub const BLOCK_PLACE: &str = "host.block.place";

    pub const ADMIN_COMMAND: &str = "admin.command";
    pub const STATS: &str = "engine.stats";

    pub const BLOCK_CHANGES: &str = "client.block_changes";
    pub const BOSS_BAR_SHOW: &str = "client.boss_bar.show";
    pub const BOSS_BAR_HIDE: &str = "client.boss_bar.hide";
    pub const TELEPORT: &str = "client.teleport";
    pub const STRUCTURE_PASTE: &str = "world.structure.paste";

    pub const REPLY: &str = "reply";
}
