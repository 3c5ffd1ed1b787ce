//! Host bridge – drives [`MineService`] from a newline-delimited JSON stream.
//!
//! ## Role
//!
//! The engine runs next to the game server. The server's plugin glue writes
//! one [`HostCommand`] per line and reads [`HostEvent`] envelopes back. The
//! bridge keeps a [`MemoryHost`] mirror of what the server reports so the
//! engine can answer `Host` queries without a round trip.
//!
//! ## Event contract (inbound)
//!
//! | Command               | Payload                         | Effect                       |
//! |-----------------------|---------------------------------|------------------------------|
//! | `host.player.join`    | player, world, x, y, z, bypass  | mirror + `on_player_join`    |
//! | `host.player.quit`    | player                          | `on_player_quit` + mirror    |
//! | `host.player.move`    | player, world, x, y, z          | mirror + `on_player_move`    |
//! | `host.chunk.load`     | world, chunk, player?           | mirror + `on_chunk_load`     |
//! | `host.chunk.unload`   | world, chunk                    | mirror                       |
//! | `host.block.set`      | position, block                 | mirror                       |
//! | `host.block.interact` | player, world, x, y, z          | reply with `InteractOutcome` |
//! | `host.block.place`    | player, world, x, y, z          | reply with `InteractOutcome` |
//! | `admin.command`       | line                            | reply with `CommandResponse` |
//! | `engine.stats`        | *(empty)*                       | reply with `EngineStats`     |
//!
//! ## Event contract (outbound)
//!
//! | Subject                  | Payload          |
//! |--------------------------|------------------|
//! | `client.block_changes`   | `BlockChanges`   |
//! | `client.boss_bar.show`   | `BossBarShow`    |
//! | `client.boss_bar.hide`   | `BossBarHide`    |
//! | `client.teleport`        | `Teleport`       |
//! | `world.structure.paste`  | `StructurePaste` |
//! | `reply`                  | `Reply`          |

use crate::host::MemoryHost;
use crate::protocol::{
    subjects, AdminCommandMsg, BlockInteractMsg, BlockSetMsg, ChunkLoadMsg, ChunkUnloadMsg,
    HostCommand, HostEvent, PlayerJoinMsg, PlayerMoveMsg, PlayerQuitMsg, Reply,
};
use crate::service::MineService;
use crate::types::BlockPos;
use anyhow::{Context, Result};
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// How often events produced by the tick are flushed to the host.
const FLUSH_INTERVAL: Duration = Duration::from_millis(50);

pub struct HostBridge {
    service: Arc<MineService>,
    host: Arc<MemoryHost>,
}

impl HostBridge {
    pub fn new(service: Arc<MineService>, host: Arc<MemoryHost>) -> Self {
        Self { service, host }
    }

    /// Serve until the input closes or Ctrl-C, then shut the service down
    /// and flush whatever it produced.
    pub async fn run<R, W>(self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!("HostBridge ready");
        let mut lines = reader.lines();
        let mut flush = tokio::time::interval(FLUSH_INTERVAL);

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line.context("Failed to read from host")? {
                        Some(line) if line.trim().is_empty() => continue,
                        Some(line) => {
                            for out in self.handle_line(&line).await {
                                write_line(&mut writer, &out).await?;
                            }
                        }
                        None => {
                            info!("Host closed the stream");
                            break;
                        }
                    }
                }
                _ = flush.tick() => {
                    for out in self.drain_events() {
                        write_line(&mut writer, &out).await?;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("HostBridge shutting down (SIGINT)");
                    break;
                }
            }
        }

        self.service.shutdown().await;
        for out in self.drain_events() {
            write_line(&mut writer, &out).await?;
        }
        writer.flush().await.context("Failed to flush output")?;
        Ok(())
    }

    /// Handle one inbound line. Returns the outbound lines it produced: the
    /// client events first, then the reply if the command asked for one.
    pub async fn handle_line(&self, line: &str) -> Vec<String> {
        let mut out = Vec::new();
        let reply = match serde_json::from_str::<HostCommand>(line) {
            Ok(cmd) => {
                let result = self.dispatch(&cmd.command, cmd.payload).await;
                cmd.id.map(|id| match result {
                    Ok(value) => Reply::success(id, value),
                    Err(e) => Reply::failed(id, e),
                })
            }
            Err(e) => {
                warn!("Malformed host line: {}", e);
                Some(Reply::failed(0, format!("Malformed command: {}", e)))
            }
        };

        out.extend(self.drain_events());
        if let Some(reply) = reply {
            let frame = self.service.stats().total_ticks;
            out.extend(encode(&HostEvent::new(frame, subjects::REPLY, reply)));
        }
        out
    }

    async fn dispatch(
        &self,
        command: &str,
        payload: Value,
    ) -> std::result::Result<Option<Value>, String> {
        match command {
            subjects::PLAYER_JOIN => {
                let m: PlayerJoinMsg = parse(payload)?;
                let pos = BlockPos::new(m.world, m.x, m.y, m.z);
                self.host.join_player(m.player, pos, m.bypass);
                let resent = self.service.on_player_join(m.player).await;
                Ok(Some(serde_json::json!({ "resent": resent })))
            }
            subjects::PLAYER_QUIT => {
                let m: PlayerQuitMsg = parse(payload)?;
                // Saving continues in the background.
                drop(self.service.on_player_quit(m.player));
                self.host.quit_player(m.player);
                Ok(None)
            }
            subjects::PLAYER_MOVE => {
                let m: PlayerMoveMsg = parse(payload)?;
                let pos = BlockPos::new(m.world, m.x, m.y, m.z).with_orientation(m.yaw, m.pitch);
                if !self.host.move_player(m.player, pos) {
                    return Err(format!("Player {} is not online", m.player));
                }
                let zone = self.service.on_player_move(m.player);
                Ok(Some(serde_json::json!({ "zone": zone })))
            }
            subjects::CHUNK_LOAD => {
                let m: ChunkLoadMsg = parse(payload)?;
                self.host.load_chunk(&m.world, m.chunk);
                let resent = self.service.on_chunk_load(&m.world, m.chunk, m.player);
                Ok(Some(serde_json::json!({ "resent": resent })))
            }
            subjects::CHUNK_UNLOAD => {
                let m: ChunkUnloadMsg = parse(payload)?;
                self.host.unload_chunk(&m.world, m.chunk);
                Ok(None)
            }
            subjects::BLOCK_SET => {
                let m: BlockSetMsg = parse(payload)?;
                self.host.set_block(m.position, m.block);
                Ok(None)
            }
            subjects::BLOCK_INTERACT => {
                let m: BlockInteractMsg = parse(payload)?;
                let pos = BlockPos::new(m.world, m.x, m.y, m.z).with_orientation(m.yaw, m.pitch);
                let outcome = self.service.on_block_interact(m.player, &pos);
                to_value(&outcome).map(Some)
            }
            subjects::BLOCK_PLACE => {
                let m: BlockInteractMsg = parse(payload)?;
                let pos = BlockPos::new(m.world, m.x, m.y, m.z).with_orientation(m.yaw, m.pitch);
                to_value(&self.service.on_block_place(m.player, &pos)).map(Some)
            }
            subjects::ADMIN_COMMAND => {
                let m: AdminCommandMsg = parse(payload)?;
                let response = self.service.execute(&m.line).await;
                to_value(&response).map(Some)
            }
            subjects::STATS => to_value(&self.service.stats()).map(Some),
            other => Err(format!("Unknown command '{}'", other)),
        }
    }

    fn drain_events(&self) -> Vec<String> {
        self.host
            .drain_events()
            .iter()
            .filter_map(|event| encode(event))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse<T: DeserializeOwned>(payload: Value) -> std::result::Result<T, String> {
    serde_json::from_value(payload).map_err(|e| format!("Invalid payload: {}", e))
}

fn to_value<T: Serialize>(value: &T) -> std::result::Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

/// Serialise an outbound envelope.
///
/// Errors are logged and swallowed; one bad event must not stop the loop.
fn encode<T: Serialize>(event: &HostEvent<T>) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(line) => Some(line),
        Err(e) => {
            warn!("Failed to serialise event for {}: {}", event.subject, e);
            None
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    writer
        .write_all(line.as_bytes())
        .await
        .context("Failed to write to host")?;
    writer.write_all(b"\n").await.context("Failed to write to host")?;
    writer.flush().await.context("Failed to flush output")?;
    Ok(())
}
