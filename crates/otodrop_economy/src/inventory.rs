//! # Inventory
//!
//! Owned item instances, kept most-recent-first.
//!
//! An [`OwnedItem`] is a copy of an [`ItemDefinition`] stamped with a uid
//! that is never reused and the time it was acquired. Uids are unique
//! across the whole store; the store enforces that an owned item lives in
//! exactly one inventory.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::ItemDefinition;
use crate::credits::Credits;
use crate::error::{EconomyError, EconomyResult};

/// Globally unique identifier of an owned item instance.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(Uuid);

impl Uid {
    /// Generates a fresh random uid.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({})", self.0)
    }
}

impl FromStr for Uid {
    type Err = EconomyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| EconomyError::NotFound(s.to_string()))
    }
}

/// An item instance owned by exactly one user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedItem {
    /// Instance id.
    pub uid: Uid,
    /// Snapshot of the catalog definition at acquisition.
    pub item: ItemDefinition,
    /// When the item entered the inventory.
    pub acquired_at: DateTime<Utc>,
}

impl OwnedItem {
    /// Stamps a definition with a fresh uid and the current time.
    #[must_use]
    pub fn mint(item: &ItemDefinition) -> Self {
        Self {
            uid: Uid::generate(),
            item: item.clone(),
            acquired_at: Utc::now(),
        }
    }

    /// Sale value (the catalog price).
    #[inline]
    #[must_use]
    pub fn price(&self) -> Credits {
        self.item.price
    }
}

/// Ordered collection of owned items, most recent first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Inventory {
    items: Vec<OwnedItem>,
}

impl Inventory {
    /// Creates an empty inventory.
    #[must_use]
    pub const fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Prepends an item.
    pub fn push_front(&mut self, item: OwnedItem) {
        self.items.insert(0, item);
    }

    /// Looks up an item by uid.
    #[must_use]
    pub fn get(&self, uid: Uid) -> Option<&OwnedItem> {
        self.items.iter().find(|owned| owned.uid == uid)
    }

    /// Returns true if the uid is held here.
    #[must_use]
    pub fn contains(&self, uid: Uid) -> bool {
        self.get(uid).is_some()
    }

    /// Removes every listed uid that is present. Absent uids are ignored.
    ///
    /// Returns the number of items removed.
    pub fn remove_uids(&mut self, uids: &[Uid]) -> usize {
        let before = self.items.len();
        self.items.retain(|owned| !uids.contains(&owned.uid));
        before - self.items.len()
    }

    /// Total catalog value of the listed uids.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::NotFound` if any uid is absent, or
    /// `EconomyError::ArithmeticOverflow`.
    pub fn value_of(&self, uids: &[Uid]) -> EconomyResult<Credits> {
        let prices = uids
            .iter()
            .map(|&uid| {
                self.get(uid)
                    .map(OwnedItem::price)
                    .ok_or_else(|| EconomyError::NotFound(uid.to_string()))
            })
            .collect::<EconomyResult<Vec<_>>>()?;
        Credits::try_sum(prices)
    }

    /// Items in display order.
    pub fn iter(&self) -> impl Iterator<Item = &OwnedItem> {
        self.items.iter()
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the inventory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
