//! # Outcome Resolver
//!
//! **Weighted draws shared by case opening and upgrade rolling.**
//!
//! All odds are integer [`Chance`] values in millipercent (`100_000` = 100%),
//! and every draw is a [`Roll`] uniformly distributed over `[0, 100_000)`.
//! Source weights such as `2.5` and probe draws such as `59.999` are exact.
//!
//! ## Case resolution
//!
//! Candidates are walked in declaration order while a running total of their
//! weights is accumulated. Candidate *i* owns the half-open band
//! `[total_{i-1}, total_i)`; the first band containing the roll wins.
//!
//! - Weights summing **below** 100%: a roll past the last band selects the
//!   **last** candidate.
//! - Weights summing **above** 100%: nothing is normalized. Later candidates
//!   only keep whatever part of their band still lies below 100%, so
//!   declaration order is the tie-break.
//!
//! ## Upgrade odds
//!
//! ```text
//! chance = min(sources / target * 95%, 95%)
//! win    = roll < chance
//! ```
//!
//! ## Randomness
//!
//! Draws come from a [`RollSource`]. Production uses [`ChaChaRolls`] seeded
//! from OS entropy; tests and replays use a fixed seed or [`FixedRolls`].

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use otodrop_shared::constants::{UPGRADE_CAP_MILLIPERCENT, UPGRADE_FACTOR_MILLIPERCENT};

use crate::credits::{parse_fixed, Credits};
use crate::error::EconomyError;

/// Millipercent in one whole percent.
const MILLIPERCENT_PER_PERCENT: u32 = 1_000;

/// Exclusive upper bound of a roll (100% in millipercent).
pub const ROLL_SPAN: u32 = 100 * MILLIPERCENT_PER_PERCENT;

// =============================================================================
// Chance
// =============================================================================

/// A probability or weight in thousandths of a percent.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Chance(u32);

impl Chance {
    /// 0%.
    pub const ZERO: Self = Self(0);

    /// 100%.
    pub const CERTAIN: Self = Self(ROLL_SPAN);

    /// The upgrade ceiling (95%).
    pub const UPGRADE_CAP: Self = Self(UPGRADE_CAP_MILLIPERCENT);

    /// Creates a chance from millipercent.
    #[inline]
    #[must_use]
    pub const fn from_millipercent(value: u32) -> Self {
        Self(value)
    }

    /// Creates a chance from a whole percentage.
    #[inline]
    #[must_use]
    pub const fn from_percent(percent: u32) -> Self {
        Self(percent * MILLIPERCENT_PER_PERCENT)
    }

    /// Returns the value in millipercent.
    #[inline]
    #[must_use]
    pub const fn millipercent(self) -> u32 {
        self.0
    }

    /// Returns true for a zero chance.
    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl FromStr for Chance {
    type Err = EconomyError;

    /// Parses a decimal percentage with up to three fractional digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed(s, 3)
            .and_then(|v| u32::try_from(v).ok())
            .map(Self)
            .ok_or_else(|| EconomyError::InvalidConfig(format!("not a percentage: {s:?}")))
    }
}

impl fmt::Debug for Chance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chance({self})")
    }
}

impl fmt::Display for Chance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:03}%",
            self.0 / MILLIPERCENT_PER_PERCENT,
            self.0 % MILLIPERCENT_PER_PERCENT
        )
    }
}

impl Serialize for Chance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.0)
    }
}

impl<'de> Deserialize<'de> for Chance {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u32::deserialize(deserializer).map(Self)
    }
}

// =============================================================================
// Roll
// =============================================================================

/// A uniform draw in `[0%, 100%)`, in millipercent.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Roll(u32);

impl Roll {
    /// The smallest possible draw.
    pub const MIN: Self = Self(0);

    /// The largest possible draw (99.999%).
    pub const MAX: Self = Self(ROLL_SPAN - 1);

    /// Creates a roll, rejecting values at or above 100%.
    #[inline]
    #[must_use]
    pub const fn new(millipercent: u32) -> Option<Self> {
        if millipercent < ROLL_SPAN {
            Some(Self(millipercent))
        } else {
            None
        }
    }

    /// Creates a roll, clamping values at or above 100% to [`Roll::MAX`].
    #[inline]
    #[must_use]
    pub const fn saturating(millipercent: u32) -> Self {
        if millipercent < ROLL_SPAN {
            Self(millipercent)
        } else {
            Self::MAX
        }
    }

    /// Returns the draw in millipercent.
    #[inline]
    #[must_use]
    pub const fn millipercent(self) -> u32 {
        self.0
    }

    /// Returns true if this draw beats `chance` (strictly below it).
    #[inline]
    #[must_use]
    pub const fn wins_against(self, chance: Chance) -> bool {
        self.0 < chance.0
    }
}

impl fmt::Debug for Roll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Roll({}.{:03})",
            self.0 / MILLIPERCENT_PER_PERCENT,
            self.0 % MILLIPERCENT_PER_PERCENT
        )
    }
}

// =============================================================================
// Random sources
// =============================================================================

/// Supplier of uniform draws.
///
/// Implementations must return rolls uniformly distributed over
/// `[0, ROLL_SPAN)`.
pub trait RollSource: Send {
    /// Draws the next roll.
    fn next_roll(&mut self) -> Roll;
}

/// ChaCha20-backed production source.
pub struct ChaChaRolls {
    rng: ChaCha20Rng,
}

impl ChaChaRolls {
    /// Seeds from operating-system entropy.
    #[must_use]
    pub fn from_entropy() -> Self {
        Self {
            rng: ChaCha20Rng::from_entropy(),
        }
    }

    /// Seeds deterministically; identical seeds produce identical draws.
    #[must_use]
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: ChaCha20Rng::seed_from_u64(seed),
        }
    }
}

impl RollSource for ChaChaRolls {
    fn next_roll(&mut self) -> Roll {
        Roll(self.rng.gen_range(0..ROLL_SPAN))
    }
}

impl fmt::Debug for ChaChaRolls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Generator state predicts every future draw.
        f.debug_struct("ChaChaRolls")
            .field("state", &"[REDACTED]")
            .finish()
    }
}

/// Scripted source that replays a fixed sequence of draws, cycling when it
/// runs out. An empty script always yields [`Roll::MIN`].
#[derive(Clone, Debug, Default)]
pub struct FixedRolls {
    script: VecDeque<Roll>,
}

impl FixedRolls {
    /// Creates a source that replays `rolls` in order.
    #[must_use]
    pub fn new(rolls: impl IntoIterator<Item = Roll>) -> Self {
        Self {
            script: rolls.into_iter().collect(),
        }
    }

    /// Creates a source that always yields `roll`.
    #[must_use]
    pub fn always(roll: Roll) -> Self {
        Self::new([roll])
    }
}

impl RollSource for FixedRolls {
    fn next_roll(&mut self) -> Roll {
        match self.script.pop_front() {
            Some(roll) => {
                self.script.push_back(roll);
                roll
            }
            None => Roll::MIN,
        }
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Anything that carries a resolution weight.
pub trait Weighted {
    /// The candidate's weight.
    fn weight(&self) -> Chance;
}

impl<T> Weighted for (T, Chance) {
    fn weight(&self) -> Chance {
        self.1
    }
}

/// Selects the winning candidate for `roll`.
///
/// Returns `None` only for an empty candidate list; catalog validation
/// guarantees case contents are never empty.
#[must_use]
pub fn resolve<W: Weighted>(candidates: &[W], roll: Roll) -> Option<&W> {
    resolve_index(candidates, roll).and_then(|index| candidates.get(index))
}

/// Computes the win probability of an upgrade.
///
/// `min(sources / target * 95%, 95%)`, truncated to whole millipercent.
/// A zero target price is treated as an infinitely favourable ratio.
#[must_use]
pub fn upgrade_chance(sources_total: Credits, target_price: Credits) -> Chance {
    if sources_total.is_zero() {
        return Chance::ZERO;
    }
    if target_price.is_zero() {
        return Chance::UPGRADE_CAP;
    }

    let raw = u128::from(sources_total.cents()) * u128::from(UPGRADE_FACTOR_MILLIPERCENT)
        / u128::from(target_price.cents());
    let capped = raw.min(u128::from(UPGRADE_CAP_MILLIPERCENT));

    // capped <= UPGRADE_CAP_MILLIPERCENT, which fits in u32
    Chance(u32::try_from(capped).unwrap_or(UPGRADE_CAP_MILLIPERCENT))
}

/// Empirical outcome counts from repeated resolution.
#[derive(Clone, Debug, Default)]
pub struct ResolverStatistics {
    /// Total number of draws performed.
    pub total_rolls: u64,
    /// Wins per candidate index, in declaration order.
    pub hits: Vec<u64>,
}

impl ResolverStatistics {
    /// Resolves `iterations` draws from `source` over `candidates`.
    pub fn sample<W: Weighted>(
        candidates: &[W],
        source: &mut dyn RollSource,
        iterations: u64,
    ) -> Self {
        let mut stats = Self {
            total_rolls: 0,
            hits: vec![0; candidates.len()],
        };

        for _ in 0..iterations {
            let roll = source.next_roll();
            stats.total_rolls += 1;
            if let Some(index) = resolve_index(candidates, roll) {
                stats.hits[index] += 1;
            }
        }

        stats
    }

    /// Returns the observed share of candidate `index` in millipercent.
    #[must_use]
    pub fn observed(&self, index: usize) -> Chance {
        if self.total_rolls == 0 {
            return Chance::ZERO;
        }
        let hits = self.hits.get(index).copied().unwrap_or(0);
        let share = u128::from(hits) * u128::from(ROLL_SPAN) / u128::from(self.total_rolls);
        Chance(u32::try_from(share).unwrap_or(ROLL_SPAN))
    }
}

/// Position of the candidate whose band holds `roll`, or the last one.
fn resolve_index<W: Weighted>(candidates: &[W], roll: Roll) -> Option<usize> {
    let mut cumulative = 0u64;
    for (index, candidate) in candidates.iter().enumerate() {
        cumulative += u64::from(candidate.weight().0);
        if u64::from(roll.0) < cumulative {
            return Some(index);
        }
    }
    candidates.len().checked_sub(1)
}
