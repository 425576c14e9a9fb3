//! # Economy Configuration
//!
//! Tunables loaded once at startup from TOML. Every field has a default
//! reproducing the reference economy, so an empty document is valid.
//!
//! ```toml
//! intro_bonus = "10.00"
//! referral_bonus = "5.00"
//! case_reveal_ms = 4000
//! upgrade_reveal_ms = 3000
//! rng_seed = 42
//! data_dir = "var/otodrop"
//!
//! [admin_policy]
//! kind = "first_user_or_providers"
//! providers = ["google"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use otodrop_shared::constants::{
    INTRO_BONUS_CENTS, REFERENCE_CASE_REVEAL_MS, REFERENCE_UPGRADE_REVEAL_MS,
    REFERRAL_BONUS_CENTS,
};

use crate::credits::Credits;
use crate::error::{EconomyError, EconomyResult};
use crate::store::AdminPolicy;

/// Longest reveal delay accepted from a config file.
const MAX_REVEAL_MS: u64 = 60_000;

/// Economy engine configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EconomyConfig {
    /// One-shot bonus for new users.
    pub intro_bonus: Credits,
    /// Bonus credited to an inviter when a referral binds.
    pub referral_bonus: Credits,
    /// Which new accounts become admins.
    pub admin_policy: AdminPolicy,
    /// Presentation delay between a case commit and its reveal (ms).
    pub case_reveal_ms: u64,
    /// Presentation delay between an upgrade commit and its reveal (ms).
    pub upgrade_reveal_ms: u64,
    /// Fixed seed for reproducible draws; OS entropy when absent.
    pub rng_seed: Option<u64>,
    /// Directory for the durable store; in-memory when absent.
    pub data_dir: Option<PathBuf>,
    /// TOML catalog document; the reference catalog when absent.
    pub catalog_file: Option<PathBuf>,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            intro_bonus: Credits::from_cents(INTRO_BONUS_CENTS),
            referral_bonus: Credits::from_cents(REFERRAL_BONUS_CENTS),
            admin_policy: AdminPolicy::default(),
            case_reveal_ms: REFERENCE_CASE_REVEAL_MS,
            upgrade_reveal_ms: REFERENCE_UPGRADE_REVEAL_MS,
            rng_seed: None,
            data_dir: None,
            catalog_file: None,
        }
    }
}

impl EconomyConfig {
    /// Reference values with no presentation delay. Used by tests and the
    /// simulator.
    #[must_use]
    pub fn instant() -> Self {
        Self {
            case_reveal_ms: 0,
            upgrade_reveal_ms: 0,
            ..Self::default()
        }
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::InvalidConfig` on syntax errors, unknown keys or
    /// out-of-range values.
    pub fn from_toml_str(text: &str) -> EconomyResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| EconomyError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::InvalidConfig` if the file is unreadable or invalid.
    pub fn load(path: impl AsRef<Path>) -> EconomyResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            EconomyError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::InvalidConfig` describing the first bad field.
    pub fn validate(&self) -> EconomyResult<()> {
        for (name, value) in [
            ("case_reveal_ms", self.case_reveal_ms),
            ("upgrade_reveal_ms", self.upgrade_reveal_ms),
        ] {
            if value > MAX_REVEAL_MS {
                return Err(EconomyError::InvalidConfig(format!(
                    "{name} = {value} exceeds {MAX_REVEAL_MS}"
                )));
            }
        }
        if let AdminPolicy::Providers { providers } | AdminPolicy::FirstUserOrProviders { providers } =
            &self.admin_policy
        {
            if providers.is_empty() {
                return Err(EconomyError::InvalidConfig(
                    "admin_policy lists no providers".to_string(),
                ));
            }
        }
        if self
            .data_dir
            .as_ref()
            .is_some_and(|dir| dir.as_os_str().is_empty())
        {
            return Err(EconomyError::InvalidConfig("data_dir is empty".to_string()));
        }
        Ok(())
    }

    /// Case reveal delay.
    #[must_use]
    pub const fn case_reveal(&self) -> Duration {
        Duration::from_millis(self.case_reveal_ms)
    }

    /// Upgrade reveal delay.
    #[must_use]
    pub const fn upgrade_reveal(&self) -> Duration {
        Duration::from_millis(self.upgrade_reveal_ms)
    }
}
