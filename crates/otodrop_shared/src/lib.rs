//! # Otodrop Shared
//!
//! Constants and static catalog source data used by every Otodrop crate.
//!
//! ## CRITICAL RULE
//!
//! This crate holds DATA only. Parsing and validation of the catalog rows
//! happen in `otodrop_economy::catalog`, which refuses to start on bad rows.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod catalog_data;
pub mod constants;

pub use catalog_data::{
    reference_case_rows, CaseRow, ContentRow, REFERENCE_CASES, REFERENCE_ITEM_ROWS,
};
pub use constants::{
    DATABASE_KEY, INTRO_BONUS_CENTS, REFERRAL_BONUS_CENTS, UPGRADE_CAP_MILLIPERCENT,
    UPGRADE_FACTOR_MILLIPERCENT,
};
