//! # Otodrop Economy Engine
//!
//! The virtual economy behind Otodrop: users spend credits to open cases
//! (weighted random rewards) or to upgrade owned items into more valuable
//! ones through a probability roll.
//!
//! ## Design Principles
//!
//! 1. **Zero floating point** - money is [`Credits`] (integer cents), odds are [`Chance`] (integer millipercent)
//! 2. **One transaction per action** - funds check, debit, draw and grant commit together or not at all
//! 3. **Injected randomness** - every draw comes from a [`RollSource`]; seed it and a session replays exactly
//! 4. **Journal first** - durable stores append to a write-ahead log before touching memory
//!
//! ## Layout
//!
//! ```text
//! catalog ──┐
//!           ├──> market (orchestrator) ──> store ──> wal
//! resolver ─┘                               ▲
//!                          referral ────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use otodrop_economy::{EconomyConfig, Identity, Market, Provider};
//!
//! let config = EconomyConfig { rng_seed: Some(7), ..EconomyConfig::instant() };
//! let market = Market::from_config(&config).unwrap();
//!
//! let user = market.sign_in(&Identity::new(Provider::Steam, "76561198000000000")).unwrap();
//! market.claim_intro_bonus(&user.id).unwrap();
//! let unboxed = market.open_case(&user.id, "budget").unwrap();
//! assert_eq!(market.user(&user.id).unwrap().balance.to_string(), "5.01");
//! println!("unboxed {}", unboxed.item.display_name);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod catalog;
pub mod config;
pub mod credits;
pub mod error;
pub mod inventory;
pub mod market;
pub mod referral;
pub mod resolver;
pub mod store;
pub mod wal;

pub use catalog::{
    build_catalog, register_cases, CaseDefinition, CaseEntry, Catalog, ItemCatalog,
    ItemDefinition, ItemId, Rarity, RawItemRow,
};
pub use config::EconomyConfig;
pub use credits::{CreditDelta, Credits};
pub use error::{CatalogError, EconomyError, EconomyResult, SelectionError};
pub use inventory::{Inventory, OwnedItem, Uid};
pub use market::{Market, PendingReveal, UpgradeOutcome};
pub use referral::{normalize_code, ReferralLedger};
pub use resolver::{
    resolve, upgrade_chance, ChaChaRolls, Chance, FixedRolls, ResolverStatistics, Roll,
    RollSource, Weighted,
};
pub use store::{
    AdminPolicy, EconomyStore, Identity, LedgerOp, Provider, ReferralRecord, StoreState,
    UpgradeSettlement, UserAccount, UserId,
};
pub use wal::{CommittedTxn, WriteAheadLog};
