//! # Economy Constants
//!
//! Reference values for the Otodrop economy.
//!
//! Money is expressed in cents (hundredths of a credit) and probabilities in
//! millipercent (thousandths of a percent, `100_000` = 100%). Runtime code
//! wraps these in `Credits` / `Chance`; the raw integers live here so that
//! config defaults and docs agree on a single source.

// =============================================================================
// BONUSES
// =============================================================================

/// One-shot intro bonus credited on first claim (10.00 credits).
pub const INTRO_BONUS_CENTS: u64 = 10_00;

/// Bonus credited to the inviter when a referral binds (5.00 credits).
///
/// The invitee receives nothing.
pub const REFERRAL_BONUS_CENTS: u64 = 5_00;

// =============================================================================
// UPGRADE ODDS
// =============================================================================

/// Scaling factor applied to the value ratio of an upgrade (95%).
///
/// `chance = min(sources / target * FACTOR, CAP)`
pub const UPGRADE_FACTOR_MILLIPERCENT: u32 = 95_000;

/// Hard ceiling on any upgrade chance (95%).
pub const UPGRADE_CAP_MILLIPERCENT: u32 = 95_000;

// =============================================================================
// PRESENTATION PACING
// =============================================================================

/// Reveal delay used by the reference client after a case opens.
pub const REFERENCE_CASE_REVEAL_MS: u64 = 4_000;

/// Reveal delay used by the reference client after an upgrade roll.
pub const REFERENCE_UPGRADE_REVEAL_MS: u64 = 3_000;

// =============================================================================
// PERSISTENCE
// =============================================================================

/// Key (and file stem) of the single persisted store record.
pub const DATABASE_KEY: &str = "otodrop_database_v3";

/// Length of generated referral codes.
pub const REFERRAL_CODE_LEN: usize = 6;
