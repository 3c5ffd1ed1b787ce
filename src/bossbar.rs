//! Access-time boss bar.
//!
//! A player standing in a timed zone sees that zone's bar; leaving every
//! timed zone hides it. The zone currently shown is the overlay indicator
//! kept in the player's state.

use crate::host::Host;
use crate::registry::{Zone, ZoneSet};
use crate::store::PlayerStateStore;
use crate::types::{normalize, PlayerId};

/// Render seconds as `1h 2m 3s`, dropping leading zero units. Zero is `0s`.
pub fn format_duration(seconds: u64) -> String {
    if seconds == 0 {
        return "0s".into();
    }
    let days = seconds / 86_400;
    let hours = seconds % 86_400 / 3600;
    let minutes = seconds % 3600 / 60;
    let secs = seconds % 60;

    let mut parts = Vec::new();
    for (value, unit) in [(days, 'd'), (hours, 'h'), (minutes, 'm'), (secs, 's')] {
        if value > 0 {
            parts.push(format!("{value}{unit}"));
        }
    }
    parts.join(" ")
}

/// The bar text for a player with `balance` seconds in `zone`.
pub fn render(zone: &Zone, balance: u64) -> String {
    let template = if balance > 0 {
        &zone.boss_bar.time_text
    } else {
        &zone.boss_bar.no_time_text
    };
    template
        .replace("{time}", &format_duration(balance))
        .replace("{zone}", &zone.id)
}

/// Show, update or hide the player's bar for where they stand now.
///
/// Returns the zone whose bar is showing afterwards.
pub fn refresh(
    store: &PlayerStateStore,
    host: &dyn Host,
    zones: &ZoneSet,
    player: PlayerId,
) -> Option<String> {
    let zone = host
        .player_position(player)
        .map(|pos| normalize(&pos))
        .and_then(|key| zones.find_zone_containing(&key).cloned())
        .filter(|zone| zone.is_timed());

    match zone {
        Some(zone) => {
            let text = render(&zone, store.zone_access(player, &zone.id));
            host.show_boss_bar(player, &text);
            store.set_boss_bar(player, Some(zone.id.clone()));
            Some(zone.id.clone())
        }
        None => {
            if store.set_boss_bar(player, None).is_some() {
                host.hide_boss_bar(player);
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_mixed_units() {
        assert_eq!(format_duration(3723), "1h 2m 3s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(86_400 + 5), "1d 5s");
        assert_eq!(format_duration(0), "0s");
    }
}
