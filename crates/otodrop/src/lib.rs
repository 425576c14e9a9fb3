//! # Otodrop
//!
//! Application crate: wires configuration, logging and the economy engine
//! together.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────────┐     ┌─────────────────────┐
//! │ otodrop.toml │────>│  load_config()   │────>│   open_market()     │
//! └──────────────┘     └──────────────────┘     │  catalog + store +  │
//!                                               │  roll source        │
//!                                               └──────────┬──────────┘
//!                                                          ▼
//!                                                   otodrop_economy::Market
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]

use std::path::Path;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

pub use otodrop_economy as economy;
pub use otodrop_shared as shared;

use otodrop_economy::{EconomyConfig, Market};

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Installs the global `tracing` subscriber.
///
/// Honors `RUST_LOG`, falling back to [`DEFAULT_LOG_FILTER`]. Calling it
/// twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Loads the configuration file, or the reference defaults when `path` is
/// `None`.
///
/// # Errors
///
/// Fails if the file is unreadable or invalid.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<EconomyConfig> {
    match path {
        Some(path) => EconomyConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(EconomyConfig::default()),
    }
}

/// Builds a ready [`Market`] from `config`.
///
/// # Errors
///
/// Fails on an invalid catalog (fatal by design of the engine), an
/// unopenable data directory or an invalid configuration.
pub fn open_market(config: &EconomyConfig) -> anyhow::Result<Market> {
    let market = Market::from_config(config).context("starting the economy engine")?;
    tracing::info!(
        intro_bonus = %config.intro_bonus,
        referral_bonus = %config.referral_bonus,
        data_dir = ?config.data_dir,
        "otodrop market open"
    );
    Ok(market)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_opens_in_memory() {
        let config = load_config(None).unwrap();
        let market = open_market(&EconomyConfig {
            rng_seed: Some(1),
            ..config
        })
        .unwrap();
        assert!(!market.store().is_durable());
        assert_eq!(market.catalog().cases().len(), 3);
    }

    #[test]
    fn test_missing_config_file_has_context() {
        let err = load_config(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(format!("{err:#}").contains("loading config"));
    }

    #[test]
    fn test_bad_catalog_is_fatal() {
        let path = std::env::temp_dir().join(format!(
            "otodrop_bad_catalog_{}.toml",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::write(
            &path,
            "[[items]]\nweapon_class = \"P250\"\nvariant_name = \"Sand Dune\"\nprice = \"0.10\"\ncolor = \"#000000\"\n",
        )
        .unwrap();

        let config = EconomyConfig {
            catalog_file: Some(path.clone()),
            ..EconomyConfig::instant()
        };
        let err = open_market(&config).unwrap_err();
        assert!(format!("{err:#}").contains("unrecognized color code"));
        std::fs::remove_file(&path).ok();
    }
}
