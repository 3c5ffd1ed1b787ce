//! SkyMines Engine
//!
//! Per-player block illusions, cooldown decay and mine access time for a
//! block-world game server. Each player can be shown a different block than
//! the one the world actually holds; the engine tracks those overlays per
//! player and position, decays them once a second, and repairs client views
//! after chunk loads and reconnects. The real world is never modified.
//!
//! ## Architecture
//!
//! ```text
//! HostBridge  (bridge.rs)            ← NDJSON in/out, MemoryHost mirror
//!   └── MineService  (service.rs)    ← interaction checks, admin ops, lifecycle
//!         ├── DecayScheduler  (scheduler.rs)  ← 1 Hz tick + TickDriver
//!         ├── IllusionSync    (sync.rs)       ← overlay push / revert / reconcile
//!         │     └── Host      (host.rs)
//!         ├── PlayerStateStore (store.rs)     ← access, unlocks, cooldowns
//!         ├── ZoneRegistry    (registry.rs)   ← atomic Arc swap on reload
//!         │     └── config.rs (TOML → validated zones / nodes)
//!         └── PersistenceBridge (persistence.rs) ← blocking-pool storage I/O
//! ```
//!
//! The store, registry, synchronizer and host trait have no async runtime
//! dependency. Scheduling, persistence and the bridge need the `server`
//! feature (tokio).

// Always available (no server feature needed).
pub mod bossbar;
pub mod commands;
pub mod config;
pub mod error;
pub mod host;
pub mod protocol;
pub mod registry;
pub mod store;
pub mod sync;
pub mod types;

// Runtime-backed modules require the `server` feature.
#[cfg(feature = "server")]
pub mod bridge;
#[cfg(feature = "server")]
pub mod persistence;
#[cfg(feature = "server")]
pub mod scheduler;
#[cfg(feature = "server")]
pub mod service;

// Convenience re-exports (server only)
#[cfg(feature = "server")]
pub use bridge::HostBridge;
#[cfg(feature = "server")]
pub use persistence::{JsonFileStorage, MemoryStorage, PersistenceBridge, Storage};
#[cfg(feature = "server")]
pub use scheduler::{DecayScheduler, TickDriver, TickReport};
#[cfg(feature = "server")]
pub use service::MineService;

pub use error::{ConfigError, HostError, PersistenceError, TimeArgumentError};
pub use host::{Host, MemoryHost};
pub use protocol::{DenyReason, InteractOutcome};
pub use registry::{Zone, ZoneKind, ZoneRegistry};
pub use store::PlayerStateStore;
pub use sync::IllusionSync;
pub use types::{normalize, BlockPos, BlockType, ChunkCoord, EngineStats, PlayerId, PositionKey};
