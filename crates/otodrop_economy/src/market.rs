//! # Market
//!
//! **The transaction orchestrator.** Every user-facing economic action goes
//! through here; the market composes the [`Catalog`], the resolver and the
//! [`EconomyStore`] so each action is one store transaction.
//!
//! ## Case opening
//!
//! ```text
//! Idle ──> FundsCheck ──> Debited ──> Resolving ──> Settled ──(reveal delay)──> OwnedItem
//!              │
//!              └── InsufficientFunds (no mutation, no draw)
//! ```
//!
//! Funds check, draw, debit and grant all happen under the store lock and
//! are journaled together, so concurrent opens by one user can never spend
//! the same balance twice.
//!
//! ## Upgrade roll
//!
//! ```text
//! Idle ──> Validated ──> Committed ──> Resolving ──> Settled(win|loss) ──(reveal)──> Idle
//! ```
//!
//! The outcome is drawn before the commit and journaled with the source
//! consumption, so a crash can never lose the win after taking the sources.
//! A per-user rolling latch is held from validation until the reveal
//! completes; a second upgrade in that window is rejected with
//! `SelectionError::AlreadyRolling`.
//!
//! ## Pacing
//!
//! Effects are committed first. [`PendingReveal::reveal`] then waits out the
//! configured presentation delay before handing over the result.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::catalog::{Catalog, ItemDefinition, ItemId};
use crate::config::EconomyConfig;
use crate::credits::{CreditDelta, Credits};
use crate::error::{EconomyError, EconomyResult, SelectionError};
use crate::inventory::{OwnedItem, Uid};
use crate::referral::ReferralLedger;
use crate::resolver::{upgrade_chance, ChaChaRolls, Chance, Roll, RollSource};
use crate::store::{EconomyStore, Identity, ReferralRecord, UpgradeSettlement, UserAccount, UserId};

// ============================================================================
// Results
// ============================================================================

/// Result of an upgrade roll.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpgradeOutcome {
    /// The requested target.
    pub target: ItemDefinition,
    /// Win probability used.
    pub chance: Chance,
    /// The draw compared against `chance`.
    pub roll: Roll,
    /// Whether the target was granted.
    pub won: bool,
    /// Source items destroyed by the attempt (always, win or lose).
    pub consumed: Vec<OwnedItem>,
    /// The granted target instance, on a win.
    pub granted: Option<OwnedItem>,
}

impl UpgradeOutcome {
    fn from_settlement(target: ItemDefinition, settlement: UpgradeSettlement) -> Self {
        Self {
            target,
            chance: settlement.chance,
            roll: settlement.roll,
            won: settlement.won,
            consumed: settlement.consumed,
            granted: settlement.granted,
        }
    }
}

/// Releases a user's rolling latch when dropped.
struct RollingLatch {
    rolling: Arc<Mutex<HashSet<UserId>>>,
    user: UserId,
}

impl Drop for RollingLatch {
    fn drop(&mut self) {
        self.rolling.lock().remove(&self.user);
    }
}

/// A committed result waiting for its presentation delay.
///
/// The economic effects are already durable; only the hand-over is paced.
#[must_use = "the result is only handed over by reveal()"]
pub struct PendingReveal<T> {
    value: T,
    ready_at: Instant,
    latch: Option<RollingLatch>,
}

impl<T> PendingReveal<T> {
    fn new(value: T, delay: Duration, latch: Option<RollingLatch>) -> Self {
        Self {
            value,
            ready_at: Instant::now() + delay,
            latch,
        }
    }

    /// When the result may be revealed.
    pub fn ready_at(&self) -> Instant {
        self.ready_at
    }

    /// Time left before the reveal.
    pub fn remaining(&self) -> Duration {
        self.ready_at.saturating_duration_since(Instant::now())
    }

    /// Blocks until the presentation delay has elapsed, then yields the
    /// result and releases any latch held for it.
    pub fn reveal(self) -> T {
        let remaining = self.remaining();
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
        drop(self.latch);
        self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for PendingReveal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingReveal")
            .field("remaining", &self.remaining())
            .field("holds_latch", &self.latch.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// The Market
// ============================================================================

/// The orchestrator.
///
/// `Market` is `Send + Sync`; share it behind an `Arc`.
///
/// ```rust
/// use std::sync::Arc;
/// use otodrop_economy::{
///     AdminPolicy, Catalog, EconomyConfig, EconomyStore, FixedRolls, Identity, Market,
///     Provider, Roll,
/// };
///
/// let market = Market::new(
///     Arc::new(Catalog::reference().unwrap()),
///     EconomyStore::in_memory(AdminPolicy::Nobody),
///     Box::new(FixedRolls::always(Roll::MIN)),
///     &EconomyConfig::instant(),
/// )
/// .unwrap();
///
/// let user = market.sign_in(&Identity::new(Provider::Guest, "demo")).unwrap();
/// market.claim_intro_bonus(&user.id).unwrap();
/// let item = market.open_case(&user.id, "budget").unwrap();
/// assert_eq!(item.item.display_name, "Glock-18 | Catacombs");
/// ```
pub struct Market {
    catalog: Arc<Catalog>,
    store: EconomyStore,
    rolls: Mutex<Box<dyn RollSource>>,
    referrals: ReferralLedger,
    intro_bonus: Credits,
    case_reveal: Duration,
    upgrade_reveal: Duration,
    rolling: Arc<Mutex<HashSet<UserId>>>,
}

impl fmt::Debug for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Market")
            .field("cases", &self.catalog.cases().len())
            .field("store", &self.store)
            .field("intro_bonus", &self.intro_bonus)
            .field("referral_bonus", &self.referrals.bonus())
            .finish_non_exhaustive()
    }
}

impl Market {
    /// Assembles a market from its parts.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::InvalidConfig` if `config` does not validate.
    pub fn new(
        catalog: Arc<Catalog>,
        store: EconomyStore,
        rolls: Box<dyn RollSource>,
        config: &EconomyConfig,
    ) -> EconomyResult<Self> {
        config.validate()?;
        Ok(Self {
            catalog,
            store,
            rolls: Mutex::new(rolls),
            referrals: ReferralLedger::new(config.referral_bonus),
            intro_bonus: config.intro_bonus,
            case_reveal: config.case_reveal(),
            upgrade_reveal: config.upgrade_reveal(),
            rolling: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Builds the catalog, store and random source described by `config`.
    ///
    /// # Errors
    ///
    /// `Catalog` if the catalog is invalid (fatal), `Storage` if the data
    /// directory cannot be opened, `InvalidConfig` for bad settings.
    pub fn from_config(config: &EconomyConfig) -> EconomyResult<Self> {
        config.validate()?;

        let catalog = match &config.catalog_file {
            Some(path) => Catalog::load(path)?,
            None => Catalog::reference()?,
        };
        let store = match &config.data_dir {
            Some(dir) => EconomyStore::open(dir, config.admin_policy.clone())?,
            None => EconomyStore::in_memory(config.admin_policy.clone()),
        };
        let rolls: Box<dyn RollSource> = match config.rng_seed {
            Some(seed) => Box::new(ChaChaRolls::from_seed(seed)),
            None => Box::new(ChaChaRolls::from_entropy()),
        };

        tracing::info!(
            items = catalog.items().len(),
            cases = catalog.cases().len(),
            durable = store.is_durable(),
            seeded = config.rng_seed.is_some(),
            "market ready"
        );
        Self::new(Arc::new(catalog), store, rolls, config)
    }

    /// The catalog.
    #[must_use]
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &EconomyStore {
        &self.store
    }

    fn next_roll(&self) -> Roll {
        self.rolls.lock().next_roll()
    }

    // ========================================================================
    // Cases
    // ========================================================================

    /// Opens a case: debit, draw and grant are committed together; the
    /// returned reveal is paced by the case delay.
    ///
    /// # Errors
    ///
    /// `UnknownCase`, `UnknownUser` or `InsufficientFunds`; nothing is
    /// mutated on error.
    pub fn begin_open_case(
        &self,
        user: &UserId,
        case_id: &str,
    ) -> EconomyResult<PendingReveal<OwnedItem>> {
        let case = self
            .catalog
            .case(case_id)
            .ok_or_else(|| EconomyError::UnknownCase(case_id.to_string()))?;

        let owned = self.store.settle_case_open(user, case.price, || {
            let roll = self.next_roll();
            let item = self
                .catalog
                .resolve_case(case, roll)
                .ok_or_else(|| EconomyError::UnknownCase(case.id.clone()))?;
            tracing::debug!(case = %case.id, ?roll, item = item.id, "case resolved");
            Ok(item.clone())
        })?;

        tracing::info!(
            user = %user,
            case = %case.id,
            price = %case.price,
            item = %owned.item.display_name,
            rarity = owned.item.rarity.name(),
            "case opened"
        );
        Ok(PendingReveal::new(owned, self.case_reveal, None))
    }

    /// [`Market::begin_open_case`] followed by the reveal.
    ///
    /// # Errors
    ///
    /// See [`Market::begin_open_case`].
    pub fn open_case(&self, user: &UserId, case_id: &str) -> EconomyResult<OwnedItem> {
        self.begin_open_case(user, case_id).map(PendingReveal::reveal)
    }

    // ========================================================================
    // Upgrades
    // ========================================================================

    /// Win probability for upgrading `sources` into `target`, without rolling.
    ///
    /// # Errors
    ///
    /// `UnknownItem`, `UnknownUser`, or `InvalidSelection` for an empty or
    /// unowned selection.
    pub fn upgrade_chance(
        &self,
        user: &UserId,
        sources: &[Uid],
        target: ItemId,
    ) -> EconomyResult<Chance> {
        let target = self.catalog.item(target).ok_or(EconomyError::UnknownItem(target))?;
        if sources.is_empty() {
            return Err(SelectionError::NoSources.into());
        }
        let account = self
            .store
            .user(user)
            .ok_or_else(|| EconomyError::UnknownUser(user.to_string()))?;

        let mut unique: Vec<Uid> = sources.to_vec();
        unique.sort_unstable();
        unique.dedup();
        let total = account
            .inventory
            .value_of(&unique)
            .map_err(|_| EconomyError::from(SelectionError::SourceNotOwned))?;
        Ok(upgrade_chance(total, target.price))
    }

    /// Rolls an upgrade. Sources are consumed whatever the outcome; the
    /// target is granted on a win. The user's rolling latch is held until
    /// the returned reveal completes.
    ///
    /// # Errors
    ///
    /// `UnknownItem` for an unknown target, `InvalidSelection` for a
    /// malformed selection or a roll already in progress; nothing is mutated
    /// on error.
    pub fn begin_upgrade(
        &self,
        user: &UserId,
        sources: &[Uid],
        target: ItemId,
    ) -> EconomyResult<PendingReveal<UpgradeOutcome>> {
        let target = self
            .catalog
            .item(target)
            .ok_or(EconomyError::UnknownItem(target))?;

        if !self.rolling.lock().insert(user.clone()) {
            return Err(SelectionError::AlreadyRolling.into());
        }
        let latch = RollingLatch {
            rolling: Arc::clone(&self.rolling),
            user: user.clone(),
        };

        let settlement = self
            .store
            .settle_upgrade(user, sources, target, || self.next_roll())?;
        let outcome = UpgradeOutcome::from_settlement(target.clone(), settlement);

        Ok(PendingReveal::new(outcome, self.upgrade_reveal, Some(latch)))
    }

    /// [`Market::begin_upgrade`] followed by the reveal.
    ///
    /// # Errors
    ///
    /// See [`Market::begin_upgrade`].
    pub fn roll_upgrade(
        &self,
        user: &UserId,
        sources: &[Uid],
        target: ItemId,
    ) -> EconomyResult<UpgradeOutcome> {
        self.begin_upgrade(user, sources, target).map(PendingReveal::reveal)
    }

    /// Returns true while an upgrade for `user` awaits its reveal.
    #[must_use]
    pub fn is_rolling(&self, user: &UserId) -> bool {
        self.rolling.lock().contains(user)
    }

    // ========================================================================
    // Balance and inventory
    // ========================================================================

    /// Sells an owned item for its catalog price. Returns the amount credited.
    ///
    /// # Errors
    ///
    /// `NotFound` if the uid is not held; `UnknownUser`.
    pub fn sell(&self, user: &UserId, uid: Uid) -> EconomyResult<Credits> {
        self.store.sell(user, uid)
    }

    /// Claims the one-shot intro bonus. Returns the new balance.
    ///
    /// # Errors
    ///
    /// `AlreadyClaimed` on every call after the first; `UnknownUser`.
    pub fn claim_intro_bonus(&self, user: &UserId) -> EconomyResult<Credits> {
        self.store.claim_intro_bonus(user, self.intro_bonus)
    }

    /// Binds `user` to the owner of `code`, crediting the inviter.
    ///
    /// # Errors
    ///
    /// `AlreadyBound`, `SelfReferral`, `UnknownCode` or `UnknownUser`.
    pub fn bind_referral(&self, user: &UserId, code: &str) -> EconomyResult<ReferralRecord> {
        self.referrals.bind(&self.store, user, code)
    }

    /// Admin balance correction, clamped at zero. Returns the new balance.
    ///
    /// Authorization is the caller's concern.
    ///
    /// # Errors
    ///
    /// `UnknownUser`.
    pub fn admin_adjust_balance(
        &self,
        user: &UserId,
        delta: CreditDelta,
    ) -> EconomyResult<Credits> {
        self.store.admin_adjust(user, delta)
    }

    // ========================================================================
    // Session and read views
    // ========================================================================

    /// Creates or fetches the account and makes it the active session.
    ///
    /// # Errors
    ///
    /// `Storage` on journal failure.
    pub fn sign_in(&self, identity: &Identity) -> EconomyResult<UserAccount> {
        self.store.sign_in(identity)
    }

    /// Clears the active session.
    ///
    /// # Errors
    ///
    /// `Storage` on journal failure.
    pub fn sign_out(&self) -> EconomyResult<()> {
        self.store.sign_out()
    }

    /// The signed-in account, if any.
    #[must_use]
    pub fn active_user(&self) -> Option<UserAccount> {
        self.store.active_user()
    }

    /// One account.
    #[must_use]
    pub fn user(&self, user: &UserId) -> Option<UserAccount> {
        self.store.user(user)
    }

    /// All accounts (admin dashboard).
    #[must_use]
    pub fn users(&self) -> Vec<UserAccount> {
        self.store.users()
    }

    /// The referral log (admin dashboard).
    #[must_use]
    pub fn referral_records(&self) -> Vec<ReferralRecord> {
        self.store.referral_records()
    }

    /// Persists a snapshot and truncates the journal.
    ///
    /// # Errors
    ///
    /// `Storage` on I/O failure.
    pub fn checkpoint(&self) -> EconomyResult<()> {
        self.store.checkpoint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::FixedRolls;
    use crate::store::{AdminPolicy, Provider};

    fn market(rolls: FixedRolls) -> Market {
        Market::new(
            Arc::new(Catalog::reference().unwrap()),
            EconomyStore::in_memory(AdminPolicy::Nobody),
            Box::new(rolls),
            &EconomyConfig::instant(),
        )
        .unwrap()
    }

    fn pct(text: &str) -> Roll {
        Roll::new(text.parse::<Chance>().unwrap().millipercent()).unwrap()
    }

    fn funded(market: &Market, name: &str, cents: i64) -> UserId {
        let user = market.sign_in(&Identity::new(Provider::Steam, name)).unwrap().id;
        market
            .admin_adjust_balance(&user, CreditDelta::from_cents(cents))
            .unwrap();
        user
    }

    #[test]
    fn test_open_case_end_to_end() {
        let market = market(FixedRolls::always(Roll::MIN));
        let user = funded(&market, "alice", 20_00);

        let owned = market.open_case(&user, "budget").unwrap();
        assert_eq!(owned.item.id, 2);

        let account = market.user(&user).unwrap();
        assert_eq!(account.balance.to_string(), "15.01");
        let held: Vec<ItemId> = account.inventory.iter().map(|o| o.item.id).collect();
        assert_eq!(held, vec![2]);
    }

    #[test]
    fn test_open_case_bands() {
        let market = market(FixedRolls::new([pct("59.999"), pct("60"), pct("99.999")]));
        let user = funded(&market, "bands", 100_00);

        let ids: Vec<ItemId> = (0..3)
            .map(|_| market.open_case(&user, "budget").unwrap().item.id)
            .collect();
        assert_eq!(ids, vec![2, 9, 29]);
    }

    #[test]
    fn test_open_case_insufficient_funds() {
        let market = market(FixedRolls::always(Roll::MIN));
        let user = funded(&market, "poor", 4_98);

        let err = market.open_case(&user, "budget").unwrap_err();
        assert!(matches!(err, EconomyError::InsufficientFunds { .. }));
        let account = market.user(&user).unwrap();
        assert_eq!(account.balance.cents(), 4_98);
        assert!(account.inventory.is_empty());
    }

    #[test]
    fn test_unknown_case_and_target() {
        let market = market(FixedRolls::default());
        let user = funded(&market, "u", 0);
        assert_eq!(
            market.open_case(&user, "nope"),
            Err(EconomyError::UnknownCase("nope".to_string()))
        );
        assert_eq!(
            market.roll_upgrade(&user, &[Uid::generate()], 999),
            Err(EconomyError::UnknownItem(999))
        );
        assert!(!market.is_rolling(&user));
    }

    #[test]
    fn test_upgrade_latch_held_until_reveal() {
        let market = market(FixedRolls::always(Roll::MAX));
        let user = funded(&market, "u", 10_00);
        let a = market.store().grant_item(&user, market.catalog().item(10).unwrap()).unwrap();
        let b = market.store().grant_item(&user, market.catalog().item(11).unwrap()).unwrap();

        let pending = market.begin_upgrade(&user, &[a.uid], 13).unwrap();
        assert!(market.is_rolling(&user));
        assert_eq!(
            market.begin_upgrade(&user, &[b.uid], 13).unwrap_err(),
            EconomyError::InvalidSelection(SelectionError::AlreadyRolling)
        );

        let outcome = pending.reveal();
        assert!(!outcome.won);
        assert!(!market.is_rolling(&user));
        assert!(market.roll_upgrade(&user, &[b.uid], 13).is_ok());
    }

    #[test]
    fn test_failed_upgrade_releases_latch() {
        let market = market(FixedRolls::default());
        let user = funded(&market, "u", 0);
        assert_eq!(
            market.roll_upgrade(&user, &[], 13),
            Err(EconomyError::InvalidSelection(SelectionError::NoSources))
        );
        assert!(!market.is_rolling(&user));
    }

    #[test]
    fn test_upgrade_chance_preview() {
        let market = market(FixedRolls::default());
        let user = funded(&market, "u", 0);
        let source = market.store().grant_item(&user, market.catalog().item(10).unwrap()).unwrap();

        // 2.00 into 3.00
        let chance = market.upgrade_chance(&user, &[source.uid], 13).unwrap();
        assert_eq!(chance.millipercent(), 63_333);
        // preview does not consume
        assert!(market.user(&user).unwrap().inventory.contains(source.uid));
    }

    #[test]
    fn test_reveal_waits_for_delay() {
        let config = EconomyConfig {
            case_reveal_ms: 30,
            ..EconomyConfig::instant()
        };
        let market = Market::new(
            Arc::new(Catalog::reference().unwrap()),
            EconomyStore::in_memory(AdminPolicy::Nobody),
            Box::new(FixedRolls::always(Roll::MIN)),
            &config,
        )
        .unwrap();
        let user = funded(&market, "u", 10_00);

        let start = Instant::now();
        let pending = market.begin_open_case(&user, "budget").unwrap();
        // committed before the reveal
        assert_eq!(market.user(&user).unwrap().inventory.len(), 1);
        pending.reveal();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
