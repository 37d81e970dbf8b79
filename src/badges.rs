//! Points and badge tier calculation
//!
//! Badge tiers are a static ordered threshold table. A user qualifies for
//! every tier at or below their point total, and earned badges are never
//! removed, even when points drop through a reward redemption.

use crate::error::{Error, Result};

/// A badge tier with the minimum cumulative points required to unlock it.
#[derive(Debug, Clone, Copy)]
pub struct BadgeTier {
    pub label: &'static str,
    pub min_points: i64,
}

/// Tiers in ascending threshold order.
pub const BADGE_TIERS: &[BadgeTier] = &[
    BadgeTier {
        label: "Green Beginner",
        min_points: 0,
    },
    BadgeTier {
        label: "Eco Learner",
        min_points: 100,
    },
    BadgeTier {
        label: "Sustainability Hero",
        min_points: 500,
    },
    BadgeTier {
        label: "Eco-Champion",
        min_points: 1500,
    },
    BadgeTier {
        label: "Legend",
        min_points: 5000,
    },
];

/// Apply a point delta and recompute the badge set.
///
/// Returns the new total (clamped at zero for deductions) and the union of
/// the existing badges with every tier whose threshold is at or below the
/// new total. A negative current total is invalid input.
pub fn apply_award(current: i64, delta: i64, existing: &[String]) -> Result<(i64, Vec<String>)> {
    if current < 0 {
        return Err(Error::InvalidInput(format!(
            "current points must be non-negative, got {current}"
        )));
    }

    let new_total = (current + delta).max(0);

    let mut badges: Vec<String> = existing.to_vec();
    for tier in BADGE_TIERS {
        if tier.min_points <= new_total && !badges.iter().any(|b| b == tier.label) {
            badges.push(tier.label.to_string());
        }
    }

    Ok((new_total, badges))
}

/// All tiers qualified at the given point total, in table order.
pub fn qualified_tiers(points: i64) -> Vec<&'static str> {
    BADGE_TIERS
        .iter()
        .filter(|t| t.min_points <= points)
        .map(|t| t.label)
        .collect()
}

/// The starting badge every new user holds.
pub fn starting_badge() -> String {
    BADGE_TIERS[0].label.to_string()
}
