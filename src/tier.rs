//! Reward tiers and the one-shot tier celebration.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{CongratulationUpdate, UserDetails, UserId};

pub const SILVER_POINTS: u64 = 500;
pub const GOLD_POINTS: u64 = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    Silver,
    Gold,
}

impl Tier {
    pub fn for_points(points: u64) -> Option<Tier> {
        if points >= GOLD_POINTS {
            Some(Tier::Gold)
        } else if points >= SILVER_POINTS {
            Some(Tier::Silver)
        } else {
            None
        }
    }

    /// Flags to persist once this tier has been celebrated.
    pub fn congratulation_update(self, details: &UserDetails) -> CongratulationUpdate {
        match self {
            Tier::Silver => CongratulationUpdate {
                user_id: details.user_id,
                is_congratulated_silver: true,
                is_congratulated_gold: details.congratulated_gold == Some(true),
            },
            Tier::Gold => CongratulationUpdate {
                user_id: details.user_id,
                is_congratulated_silver: true,
                is_congratulated_gold: true,
            },
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Silver => write!(f, "Silver"),
            Tier::Gold => write!(f, "Gold"),
        }
    }
}

/// Percentage of the way to the next tier; 100 once Gold is reached.
pub fn progress_percent(points: u64) -> f64 {
    if points >= GOLD_POINTS {
        100.0
    } else if points >= SILVER_POINTS {
        (points - SILVER_POINTS) as f64 / (GOLD_POINTS - SILVER_POINTS) as f64 * 100.0
    } else {
        points as f64 / SILVER_POINTS as f64 * 100.0
    }
}

pub fn next_tier_message(points: u64) -> &'static str {
    match Tier::for_points(points) {
        Some(Tier::Gold) => "You've reached the GOLD Tier!",
        Some(Tier::Silver) => "Progress to GOLD Tier",
        None => "Progress to SILVER Tier",
    }
}

/// The tier whose celebration is still owed according to the backend flags.
/// A flag the backend has no value for never owes a celebration.
pub fn due_tier(details: &UserDetails) -> Option<Tier> {
    let points = details.user_points;
    if points >= GOLD_POINTS && details.congratulated_gold == Some(false) {
        Some(Tier::Gold)
    } else if (SILVER_POINTS..GOLD_POINTS).contains(&points) && details.congratulated_silver == Some(false) {
        Some(Tier::Silver)
    } else {
        None
    }
}

/// Remembers celebrations already fired so a stale backend read cannot repeat one.
#[derive(Debug, Default)]
pub struct TierTracker {
    celebrated: HashSet<(UserId, Tier)>,
}

impl TierTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate(&mut self, details: &UserDetails) -> Option<Tier> {
        let tier = due_tier(details)?;
        if !self.celebrated.insert((details.user_id, tier)) {
            return None;
        }
        Some(tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(points: u64, silver: bool, gold: bool) -> UserDetails {
        UserDetails {
            user_id: UserId(42),
            name: "Jane".into(),
            coins_earned: 0,
            user_points: points,
            congratulated_silver: Some(silver),
            congratulated_gold: Some(gold),
        }
    }

    #[test]
    fn tiers_by_points() {
        assert_eq!(Tier::for_points(499), None);
        assert_eq!(Tier::for_points(500), Some(Tier::Silver));
        assert_eq!(Tier::for_points(1499), Some(Tier::Silver));
        assert_eq!(Tier::for_points(1500), Some(Tier::Gold));
    }

    #[test]
    fn progress_resets_per_band() {
        assert_eq!(progress_percent(250), 50.0);
        assert_eq!(progress_percent(1000), 50.0);
        assert_eq!(progress_percent(4000), 100.0);
    }

    #[test]
    fn celebration_owed_only_when_unflagged() {
        assert_eq!(due_tier(&details(520, false, false)), Some(Tier::Silver));
        assert_eq!(due_tier(&details(520, true, false)), None);
        assert_eq!(due_tier(&details(1600, true, false)), Some(Tier::Gold));
        assert_eq!(due_tier(&details(1600, false, false)), Some(Tier::Gold));
        assert_eq!(due_tier(&details(1600, true, true)), None);
        assert_eq!(due_tier(&details(480, false, false)), None);
    }

    #[test]
    fn unknown_flags_owe_nothing() {
        let unknown = UserDetails { congratulated_silver: None, congratulated_gold: None, ..details(520, false, false) };
        assert_eq!(due_tier(&unknown), None);
        let unknown = UserDetails { congratulated_gold: None, ..details(1600, false, false) };
        assert_eq!(due_tier(&unknown), None);
        let gold_unknown = UserDetails { congratulated_gold: None, ..details(600, true, false) };
        assert!(!Tier::Silver.congratulation_update(&gold_unknown).is_congratulated_gold);
    }

    #[test]
    fn tracker_fires_once_per_tier() {
        let mut tracker = TierTracker::new();
        let stale = details(520, false, false);
        assert_eq!(tracker.evaluate(&stale), Some(Tier::Silver));
        assert_eq!(tracker.evaluate(&stale), None);
        assert_eq!(tracker.evaluate(&details(1500, true, false)), Some(Tier::Gold));
    }

    #[test]
    fn gold_marks_both_flags() {
        let update = Tier::Gold.congratulation_update(&details(1500, false, false));
        assert!(update.is_congratulated_silver && update.is_congratulated_gold);
        let update = Tier::Silver.congratulation_update(&details(600, false, false));
        assert!(update.is_congratulated_silver && !update.is_congratulated_gold);
    }
}
