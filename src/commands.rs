//! Operator command surface.
//!
//! Parses command lines into [`Command`]s. Execution happens in the
//! service; this module only knows the grammar, duration arguments and the
//! response shape.
//!
//! ```text
//! reload
//! save
//! stats
//! time <zone> <player>
//! addtime <player> <zone> <duration>
//! removetime <player> <zone> <duration>
//! settime <player> <zone> <duration>
//! unlock <player> <zone> <block>
//! lock <player> <zone> <block>
//! ```
//!
//! Players are given by UUID. Durations accept `90`, `90s`, `15m`, `1h30m`,
//! `2d`.

use crate::error::TimeArgumentError;
use crate::types::{BlockType, PlayerId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeChange {
    Add,
    Remove,
    Set,
}

impl TimeChange {
    /// Smallest accepted duration. Setting to zero clears the balance;
    /// adding or removing nothing is rejected.
    pub fn minimum(self) -> i64 {
        match self {
            TimeChange::Add | TimeChange::Remove => 1,
            TimeChange::Set => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Reload,
    Save,
    Stats,
    Time {
        zone: String,
        player: PlayerId,
    },
    ChangeTime {
        change: TimeChange,
        player: PlayerId,
        zone: String,
        seconds: u64,
    },
    Unlock {
        player: PlayerId,
        zone: String,
        block: BlockType,
    },
    Lock {
        player: PlayerId,
        zone: String,
        block: BlockType,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("{0}")]
    Usage(&'static str),

    #[error("'{0}' is not a player id")]
    Player(String),

    #[error("'{0}' is not a block type")]
    Block(String),

    #[error(transparent)]
    Time(#[from] TimeArgumentError),
}

/// What the operator sees after running a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    pub message: String,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

pub fn parse(line: &str) -> Result<Command, CommandError> {
    let args: Vec<&str> = line.split_whitespace().collect();
    let Some((&name, rest)) = args.split_first() else {
        return Err(CommandError::Usage(
            "reload | save | stats | time | addtime | removetime | settime | unlock | lock",
        ));
    };

    match (name.to_ascii_lowercase().as_str(), rest) {
        ("reload", []) => Ok(Command::Reload),
        ("save", []) => Ok(Command::Save),
        ("stats", []) => Ok(Command::Stats),
        ("time", [zone, player]) => Ok(Command::Time {
            zone: zone.to_string(),
            player: parse_player(player)?,
        }),
        ("time", _) => Err(CommandError::Usage("time <zone> <player>")),
        ("addtime" | "removetime" | "settime", [player, zone, duration]) => {
            let change = match name.to_ascii_lowercase().as_str() {
                "addtime" => TimeChange::Add,
                "removetime" => TimeChange::Remove,
                _ => TimeChange::Set,
            };
            let player = parse_player(player)?;
            let seconds = at_least(parse_duration(duration)?, change.minimum())?;
            Ok(Command::ChangeTime {
                change,
                player,
                zone: zone.to_string(),
                seconds,
            })
        }
        ("addtime", _) => Err(CommandError::Usage("addtime <player> <zone> <duration>")),
        ("removetime", _) => Err(CommandError::Usage("removetime <player> <zone> <duration>")),
        ("settime", _) => Err(CommandError::Usage("settime <player> <zone> <duration>")),
        ("unlock", [player, zone, block]) => Ok(Command::Unlock {
            player: parse_player(player)?,
            zone: zone.to_string(),
            block: parse_block(block)?,
        }),
        ("unlock", _) => Err(CommandError::Usage("unlock <player> <zone> <block>")),
        ("lock", [player, zone, block]) => Ok(Command::Lock {
            player: parse_player(player)?,
            zone: zone.to_string(),
            block: parse_block(block)?,
        }),
        ("lock", _) => Err(CommandError::Usage("lock <player> <zone> <block>")),
        _ => Err(CommandError::Usage(
            "reload | save | stats | time | addtime | removetime | settime | unlock | lock",
        )),
    }
}

/// Parse a duration into seconds. The sign is kept so a negative value can
/// be reported as below the minimum rather than as garbage.
pub fn parse_duration(text: &str) -> Result<i64, TimeArgumentError> {
    let unparseable = || TimeArgumentError::Unparseable(text.to_string());
    let trimmed = text.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(body) => (true, body),
        None => (false, trimmed),
    };
    if body.is_empty() {
        return Err(unparseable());
    }

    let total = if body.chars().all(|c| c.is_ascii_digit()) {
        body.parse::<i64>().map_err(|_| unparseable())?
    } else {
        let mut total: i64 = 0;
        let mut digits = String::new();
        let mut seen = Vec::new();
        for c in body.chars() {
            if c.is_ascii_digit() {
                digits.push(c);
                continue;
            }
            let unit: i64 = match c.to_ascii_lowercase() {
                'd' => 86_400,
                'h' => 3600,
                'm' => 60,
                's' => 1,
                _ => return Err(unparseable()),
            };
            if digits.is_empty() || seen.contains(&unit) {
                return Err(unparseable());
            }
            seen.push(unit);
            let value: i64 = digits.parse().map_err(|_| unparseable())?;
            digits.clear();
            total = value
                .checked_mul(unit)
                .and_then(|v| total.checked_add(v))
                .ok_or_else(unparseable)?;
        }
        if !digits.is_empty() {
            return Err(unparseable());
        }
        total
    };

    Ok(if negative { -total } else { total })
}

pub fn at_least(value: i64, minimum: i64) -> Result<u64, TimeArgumentError> {
    if value < minimum {
        return Err(TimeArgumentError::BelowMinimum { value, minimum });
    }
    Ok(value as u64)
}

fn parse_player(text: &str) -> Result<PlayerId, CommandError> {
    text.parse().map_err(|_| CommandError::Player(text.to_string()))
}

fn parse_block(text: &str) -> Result<BlockType, CommandError> {
    BlockType::new(text).ok_or_else(|| CommandError::Block(text.to_string()))
}
