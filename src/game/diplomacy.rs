//! Battle resolver
//!
//! The only place the coordinator reads inside a player's opaque
//! simulation snapshot: both sides' army sizes go in, loss counts come
//! out. Everything else about a battle (what it means for the economy,
//! morale, territory) is the client simulation's business.

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BattleSide {
    Attacker,
    Defender,
}

#[derive(Debug, Clone)]
pub struct BattleOutcome {
    pub winner: BattleSide,
    pub attacker_losses: u64,
    pub defender_losses: u64,
    /// Post-battle army sizes, clamped at zero.
    pub attacker_army: u64,
    pub defender_army: u64,
}

/// Resolve one battle between two armies.
///
/// Each side's strength is its army scaled by an independent uniform
/// multiplier in [0.8, 1.2]; the stronger side wins. The winner loses a
/// uniform fraction in [0.1, 0.3] of its own pre-battle army, the loser a
/// fraction in [0.4, 0.7] of its own, floored to whole troops.
pub fn resolve_battle(
    attacker_army: u64,
    defender_army: u64,
    rng: &mut impl Rng,
) -> BattleOutcome {
    let attacker_strength = attacker_army as f64 * rng.gen_range(0.8..=1.2);
    let defender_strength = defender_army as f64 * rng.gen_range(0.8..=1.2);

    let (winner, attacker_frac, defender_frac) = if attacker_strength > defender_strength {
        (
            BattleSide::Attacker,
            rng.gen_range(0.1..=0.3),
            rng.gen_range(0.4..=0.7),
        )
    } else {
        (
            BattleSide::Defender,
            rng.gen_range(0.4..=0.7),
            rng.gen_range(0.1..=0.3),
        )
    };

    let attacker_losses = (attacker_army as f64 * attacker_frac) as u64;
    let defender_losses = (defender_army as f64 * defender_frac) as u64;

    BattleOutcome {
        winner,
        attacker_losses,
        defender_losses,
        attacker_army: attacker_army.saturating_sub(attacker_losses),
        defender_army: defender_army.saturating_sub(defender_losses),
    }
}
