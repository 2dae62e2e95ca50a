//! Experience points and levels.
//!
//! Account level and per-area level use different step sizes
//! ([`ACCOUNT_XP_PER_LEVEL`] and [`AREA_XP_PER_LEVEL`]); keep them separate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::AreaKey;
use crate::model::percentage;

pub const XP_PER_CORRECT: u32 = 10;
pub const FAST_PACE_BONUS: u32 = 20;
/// Average seconds per question below which the pace bonus applies.
pub const FAST_PACE_SECS: u64 = 60;
pub const ACCOUNT_XP_PER_LEVEL: u64 = 100;
pub const AREA_XP_PER_LEVEL: u64 = 50;

/// Breakdown of the XP earned by one completed session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XpAward {
    pub base: u32,
    pub accuracy_bonus: u32,
    pub pace_bonus: u32,
}

impl XpAward {
    #[must_use]
    pub fn total(&self) -> u32 {
        self.base + self.accuracy_bonus + self.pace_bonus
    }
}

/// Bonus for the highest score tier reached. Tiers do not stack.
#[must_use]
pub fn accuracy_bonus(score: u32) -> u32 {
    match score {
        90.. => 50,
        80..=89 => 30,
        70..=79 => 15,
        _ => 0,
    }
}

/// XP for a session with `correct` of `total` right in `elapsed_secs`.
#[must_use]
pub fn session_xp(correct: u32, total: u32, elapsed_secs: u64) -> XpAward {
    let score = percentage(u64::from(correct), u64::from(total));
    // avg < 60s  <=>  elapsed < 60 * total, without dividing.
    let fast = total > 0 && elapsed_secs < FAST_PACE_SECS * u64::from(total);
    XpAward {
        base: correct.saturating_mul(XP_PER_CORRECT),
        accuracy_bonus: accuracy_bonus(score),
        pace_bonus: if fast { FAST_PACE_BONUS } else { 0 },
    }
}

#[must_use]
pub fn account_level(total_xp: u64) -> u32 {
    level_for(total_xp, ACCOUNT_XP_PER_LEVEL)
}

#[must_use]
pub fn area_level(area_xp: u64) -> u32 {
    level_for(area_xp, AREA_XP_PER_LEVEL)
}

fn level_for(xp: u64, step: u64) -> u32 {
    u32::try_from(xp / step).unwrap_or(u32::MAX - 1) + 1
}

/// Persisted cumulative XP for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XpTotals {
    pub total: u64,
    #[serde(default)]
    pub per_area: BTreeMap<AreaKey, u64>,
}

impl XpTotals {
    pub fn add(&mut self, area: Option<&AreaKey>, xp: u32) {
        self.total = self.total.saturating_add(u64::from(xp));
        if let Some(area) = area {
            let entry = self.per_area.entry(area.clone()).or_insert(0);
            *entry = entry.saturating_add(u64::from(xp));
        }
    }

    #[must_use]
    pub fn summary(&self) -> LevelSummary {
        LevelSummary {
            total_xp: self.total,
            level: account_level(self.total),
            areas: self
                .per_area
                .iter()
                .map(|(area, xp)| {
                    (
                        area.clone(),
                        AreaLevel {
                            xp: *xp,
                            level: area_level(*xp),
                        },
                    )
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaLevel {
    pub xp: u64,
    pub level: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSummary {
    pub total_xp: u64,
    pub level: u32,
    pub areas: BTreeMap<AreaKey, AreaLevel>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seventy_percent_slow_session() {
        // 10 questions, 7 right, 65s each.
        let award = session_xp(7, 10, 650);
        assert_eq!(award.base, 70);
        assert_eq!(award.accuracy_bonus, 15);
        assert_eq!(award.pace_bonus, 0);
        assert_eq!(award.total(), 85);
    }

    #[test]
    fn bonus_tiers_do_not_stack() {
        assert_eq!(accuracy_bonus(100), 50);
        assert_eq!(accuracy_bonus(90), 50);
        assert_eq!(accuracy_bonus(89), 30);
        assert_eq!(accuracy_bonus(80), 30);
        assert_eq!(accuracy_bonus(79), 15);
        assert_eq!(accuracy_bonus(70), 15);
        assert_eq!(accuracy_bonus(69), 0);
    }

    #[test]
    fn pace_bonus_requires_strictly_under_a_minute() {
        assert_eq!(session_xp(1, 2, 119).pace_bonus, FAST_PACE_BONUS);
        assert_eq!(session_xp(1, 2, 120).pace_bonus, 0);
        assert_eq!(session_xp(0, 0, 0).pace_bonus, 0);
    }

    #[test]
    fn levels_use_separate_scales() {
        assert_eq!(account_level(0), 1);
        assert_eq!(account_level(99), 1);
        assert_eq!(account_level(100), 2);
        assert_eq!(area_level(49), 1);
        assert_eq!(area_level(50), 2);
        assert_eq!(area_level(100), 3);
    }

    #[test]
    fn totals_track_area_and_account() {
        let math = AreaKey::new("matematica");
        let mut totals = XpTotals::default();
        totals.add(Some(&math), 85);
        totals.add(None, 30);
        let summary = totals.summary();
        assert_eq!(summary.total_xp, 115);
        assert_eq!(summary.level, 2);
        assert_eq!(summary.areas[&math], AreaLevel { xp: 85, level: 2 });
    }
}
