//! # Economy Store
//!
//! **Single source of truth for users, balances, inventories and referrals.**
//!
//! Every mutation is a named atomic operation. Each one runs as a single
//! critical section over the whole state:
//!
//! ```text
//! lock ──> validate ──> build LedgerOps ──> journal BEGIN/OPs/COMMIT+fsync ──> apply ──> unlock
//!              │                                      │
//!              └── Err: nothing written               └── Err: nothing applied
//! ```
//!
//! Applying a [`LedgerOp`] cannot fail; all checks happen against the same
//! locked state before the journal is touched. Journal replay therefore
//! reproduces exactly the state that was committed.
//!
//! ## Persistence
//!
//! An in-memory store ([`EconomyStore::in_memory`]) has no journal. A durable
//! store ([`EconomyStore::open`]) keeps a JSON snapshot named after
//! [`DATABASE_KEY`] plus a write-ahead journal next to it.
//!
//! The snapshot records the journal LSN it covers:
//!
//! ```text
//! { "lsn": 42, "state": { "users": {...}, "referrals": [...], "active_user": ... } }
//! ```
//!
//! Replay skips every transaction that began below that LSN, so a crash
//! between writing the snapshot and truncating the journal replays nothing
//! twice.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use otodrop_shared::constants::{DATABASE_KEY, REFERRAL_CODE_LEN};

use crate::catalog::ItemDefinition;
use crate::credits::{CreditDelta, Credits};
use crate::error::{EconomyError, EconomyResult, SelectionError};
use crate::inventory::{Inventory, OwnedItem, Uid};
use crate::resolver::{upgrade_chance, Chance, Roll};
use crate::wal::WriteAheadLog;

// =============================================================================
// Identity
// =============================================================================

/// Identity provider a user signed in with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Google account.
    Google,
    /// Steam account.
    Steam,
    /// Anonymous guest session.
    Guest,
}

impl Provider {
    /// Lowercase provider name, used as the user id prefix.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Steam => "steam",
            Self::Guest => "guest",
        }
    }
}

impl FromStr for Provider {
    type Err = EconomyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(Self::Google),
            "steam" => Ok(Self::Steam),
            "guest" => Ok(Self::Guest),
            other => Err(EconomyError::InvalidConfig(format!("unknown provider: {other}"))),
        }
    }
}

/// A stable identity produced by an identity provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Provider.
    pub provider: Provider,
    /// Provider-scoped account id.
    pub external_id: String,
    /// Name shown in the UI.
    pub display_name: String,
}

impl Identity {
    /// Creates an identity whose display name is the external id.
    #[must_use]
    pub fn new(provider: Provider, external_id: impl Into<String>) -> Self {
        let external_id = external_id.into();
        Self {
            provider,
            display_name: external_id.clone(),
            external_id,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// The provider-qualified user id.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        UserId(format!("{}_{}", self.provider.as_str(), self.external_id))
    }
}

/// Provider-qualified user id, `"{provider}_{externalId}"`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wraps a raw id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

/// Decides which new accounts are admins.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdminPolicy {
    /// The first account ever created.
    FirstUser,
    /// Any account from one of the listed providers.
    Providers {
        /// Trusted providers.
        providers: Vec<Provider>,
    },
    /// The first account, or any account from one of the listed providers.
    FirstUserOrProviders {
        /// Trusted providers.
        providers: Vec<Provider>,
    },
    /// Nobody.
    Nobody,
}

impl Default for AdminPolicy {
    fn default() -> Self {
        Self::FirstUserOrProviders {
            providers: vec![Provider::Google],
        }
    }
}

impl AdminPolicy {
    /// Returns true if a new account should be an admin.
    #[must_use]
    pub fn grants(&self, is_first_user: bool, provider: Provider) -> bool {
        match self {
            Self::FirstUser => is_first_user,
            Self::Providers { providers } => providers.contains(&provider),
            Self::FirstUserOrProviders { providers } => {
                is_first_user || providers.contains(&provider)
            }
            Self::Nobody => false,
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// A user account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    /// Stable provider-qualified id.
    pub id: UserId,
    /// Provider the account signed in with.
    pub provider: Provider,
    /// Display name.
    pub display_name: String,
    /// Spendable balance; never negative.
    pub balance: Credits,
    /// Owned items, most recent first.
    pub inventory: Inventory,
    /// Admin flag, decided once at creation.
    pub is_admin: bool,
    /// Unique referral code.
    pub referral_code: String,
    /// Inviter this user was referred by; set at most once.
    pub referred_by: Option<UserId>,
    /// One-shot intro bonus latch.
    pub has_claimed_intro_bonus: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// An append-only referral record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralRecord {
    /// Record id.
    pub id: String,
    /// The user whose code was used.
    pub inviter_id: UserId,
    /// The user who entered the code.
    pub invitee_id: UserId,
    /// When the binding happened.
    pub timestamp: DateTime<Utc>,
}

/// One journaled state change.
///
/// Ops are applied only after validation, so `apply` never fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LedgerOp {
    /// A new account.
    CreateUser {
        /// The freshly allocated account.
        account: Box<UserAccount>,
    },
    /// Balance decrease, pre-checked against the balance.
    Debit {
        /// Account.
        user: UserId,
        /// Amount.
        amount: Credits,
    },
    /// Balance increase.
    Credit {
        /// Account.
        user: UserId,
        /// Amount.
        amount: Credits,
    },
    /// Signed admin correction, clamped at zero.
    AdminAdjust {
        /// Account.
        user: UserId,
        /// Signed delta.
        delta: CreditDelta,
    },
    /// Prepend an owned item.
    GrantItem {
        /// Account.
        user: UserId,
        /// The minted item.
        item: Box<OwnedItem>,
    },
    /// Remove owned items by uid.
    RemoveItems {
        /// Account.
        user: UserId,
        /// Uids to remove.
        uids: Vec<Uid>,
    },
    /// Set the intro bonus latch.
    MarkIntroClaimed {
        /// Account.
        user: UserId,
    },
    /// Bind invitee to inviter and record it.
    BindReferral {
        /// The record appended to the referral log.
        record: ReferralRecord,
    },
    /// Move the session pointer.
    SetActiveUser {
        /// New active user, if any.
        user: Option<UserId>,
    },
}

/// The persisted document: users, referral log and session pointer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreState {
    /// Accounts by id.
    pub users: BTreeMap<UserId, UserAccount>,
    /// Referral log, oldest first.
    pub referrals: Vec<ReferralRecord>,
    /// Currently signed-in user.
    pub active_user: Option<UserId>,
}

impl StoreState {
    fn account(&self, user: &UserId) -> EconomyResult<&UserAccount> {
        self.users
            .get(user)
            .ok_or_else(|| EconomyError::UnknownUser(user.to_string()))
    }

    fn apply(&mut self, op: LedgerOp) {
        match op {
            LedgerOp::CreateUser { account } => {
                self.users.insert(account.id.clone(), *account);
            }
            LedgerOp::Debit { user, amount } => {
                if let Some(account) = self.users.get_mut(&user) {
                    account.balance = Credits::from_cents(
                        account.balance.cents().saturating_sub(amount.cents()),
                    );
                }
            }
            LedgerOp::Credit { user, amount } => {
                if let Some(account) = self.users.get_mut(&user) {
                    account.balance = Credits::from_cents(
                        account.balance.cents().saturating_add(amount.cents()),
                    );
                }
            }
            LedgerOp::AdminAdjust { user, delta } => {
                if let Some(account) = self.users.get_mut(&user) {
                    account.balance = account.balance.apply_clamped(delta);
                }
            }
            LedgerOp::GrantItem { user, item } => {
                if let Some(account) = self.users.get_mut(&user) {
                    account.inventory.push_front(*item);
                }
            }
            LedgerOp::RemoveItems { user, uids } => {
                if let Some(account) = self.users.get_mut(&user) {
                    account.inventory.remove_uids(&uids);
                }
            }
            LedgerOp::MarkIntroClaimed { user } => {
                if let Some(account) = self.users.get_mut(&user) {
                    account.has_claimed_intro_bonus = true;
                }
            }
            LedgerOp::BindReferral { record } => {
                if let Some(invitee) = self.users.get_mut(&record.invitee_id) {
                    invitee.referred_by = Some(record.inviter_id.clone());
                }
                self.referrals.push(record);
            }
            LedgerOp::SetActiveUser { user } => {
                self.active_user = user;
            }
        }
    }

    fn fresh_referral_code(&self) -> String {
        loop {
            let code: String = Uuid::new_v4()
                .simple()
                .to_string()
                .chars()
                .take(REFERRAL_CODE_LEN)
                .collect::<String>()
                .to_ascii_uppercase();
            if !self.users.values().any(|u| u.referral_code == code) {
                return code;
            }
        }
    }
}

/// Outcome of a settled upgrade.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpgradeSettlement {
    /// Win probability used.
    pub chance: Chance,
    /// The draw compared against `chance`.
    pub roll: Roll,
    /// Whether the target was granted.
    pub won: bool,
    /// Source items destroyed by the attempt.
    pub consumed: Vec<OwnedItem>,
    /// The granted target, on a win.
    pub granted: Option<OwnedItem>,
}

// =============================================================================
// Store
// =============================================================================

/// On-disk snapshot document.
#[derive(Serialize, Deserialize)]
struct Snapshot<S> {
    /// Journal transactions with a BEGIN LSN below this are already in `state`.
    lsn: u64,
    state: S,
}

struct Journal {
    wal: WriteAheadLog,
    snapshot_path: PathBuf,
}

/// The economy store.
pub struct EconomyStore {
    state: Mutex<StoreState>,
    journal: Option<Journal>,
    admin_policy: AdminPolicy,
}

impl fmt::Debug for EconomyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EconomyStore")
            .field("durable", &self.journal.is_some())
            .field("admin_policy", &self.admin_policy)
            .finish_non_exhaustive()
    }
}

impl EconomyStore {
    /// Creates a store with no persistence.
    #[must_use]
    pub fn in_memory(admin_policy: AdminPolicy) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            journal: None,
            admin_policy,
        }
    }

    /// Opens (or creates) a durable store in `dir`.
    ///
    /// Loads the snapshot, replays committed journal transactions, discards
    /// uncommitted ones and checkpoints.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::Storage` on I/O failure or a corrupt snapshot.
    pub fn open(dir: impl AsRef<Path>, admin_policy: AdminPolicy) -> EconomyResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .map_err(|e| EconomyError::Storage(format!("create {}: {e}", dir.display())))?;

        let snapshot_path = dir.join(format!("{DATABASE_KEY}.json"));
        let Snapshot { lsn, mut state }: Snapshot<StoreState> = if snapshot_path.exists() {
            let text = fs::read_to_string(&snapshot_path)
                .map_err(|e| EconomyError::Storage(format!("read snapshot: {e}")))?;
            serde_json::from_str(&text)
                .map_err(|e| EconomyError::Storage(format!("decode snapshot: {e}")))?
        } else {
            Snapshot {
                lsn: 0,
                state: StoreState::default(),
            }
        };

        let (wal, recovery) =
            WriteAheadLog::open::<LedgerOp>(dir.join(format!("{DATABASE_KEY}.wal")))?;
        wal.advance_lsn_to(lsn);

        let mut replayed = 0;
        let mut covered = 0;
        for txn in recovery.committed {
            if txn.txn_id < lsn {
                covered += 1;
                continue;
            }
            for op in txn.ops {
                state.apply(op);
            }
            replayed += 1;
        }
        if covered > 0 {
            tracing::warn!(covered, snapshot_lsn = lsn, "skipped journal already in snapshot");
        }

        tracing::info!(
            dir = %dir.display(),
            users = state.users.len(),
            replayed,
            discarded = recovery.discarded,
            "economy store opened"
        );

        let store = Self {
            state: Mutex::new(state),
            journal: Some(Journal { wal, snapshot_path }),
            admin_policy,
        };
        store.checkpoint()?;
        Ok(store)
    }

    /// Returns true if the store writes a journal.
    #[must_use]
    pub fn is_durable(&self) -> bool {
        self.journal.is_some()
    }

    /// Persists the full state and truncates the journal. No-op in memory.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::Storage` on I/O failure.
    pub fn checkpoint(&self) -> EconomyResult<()> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        let state = self.state.lock();
        write_snapshot(&journal.snapshot_path, journal.wal.next_lsn(), &state)?;
        journal.wal.checkpoint()?;
        tracing::info!(users = state.users.len(), "store checkpoint written");
        Ok(())
    }

    /// Journals `ops` as one transaction, then applies them.
    fn commit(&self, state: &mut StoreState, ops: Vec<LedgerOp>) -> EconomyResult<()> {
        if let Some(journal) = &self.journal {
            let mut txn = journal.wal.begin_transaction()?;
            for op in &ops {
                txn.append(op)?;
            }
            txn.commit()?;
        }
        for op in ops {
            state.apply(op);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Accounts
    // -------------------------------------------------------------------------

    fn create_or_fetch_locked(
        &self,
        state: &mut StoreState,
        identity: &Identity,
        extra: Vec<LedgerOp>,
    ) -> EconomyResult<UserAccount> {
        let id = identity.user_id();
        let mut ops = Vec::new();

        if !state.users.contains_key(&id) {
            let is_admin = self
                .admin_policy
                .grants(state.users.is_empty(), identity.provider);
            let account = UserAccount {
                id: id.clone(),
                provider: identity.provider,
                display_name: identity.display_name.clone(),
                balance: Credits::ZERO,
                inventory: Inventory::new(),
                is_admin,
                referral_code: state.fresh_referral_code(),
                referred_by: None,
                has_claimed_intro_bonus: false,
                created_at: Utc::now(),
            };
            tracing::info!(user = %id, is_admin, code = %account.referral_code, "user created");
            ops.push(LedgerOp::CreateUser {
                account: Box::new(account),
            });
        }
        ops.extend(extra);

        if !ops.is_empty() {
            self.commit(state, ops)?;
        }
        state.account(&id).cloned()
    }

    /// Returns the account for `identity`, creating it on first sight.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::Storage` if the creation cannot be journaled.
    pub fn create_or_fetch_user(&self, identity: &Identity) -> EconomyResult<UserAccount> {
        let mut state = self.state.lock();
        self.create_or_fetch_locked(&mut state, identity, Vec::new())
    }

    /// Creates or fetches the account and makes it the active session.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::Storage` on journal failure.
    pub fn sign_in(&self, identity: &Identity) -> EconomyResult<UserAccount> {
        let mut state = self.state.lock();
        let set_active = LedgerOp::SetActiveUser {
            user: Some(identity.user_id()),
        };
        self.create_or_fetch_locked(&mut state, identity, vec![set_active])
    }

    /// Clears the active session.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::Storage` on journal failure.
    pub fn sign_out(&self) -> EconomyResult<()> {
        let mut state = self.state.lock();
        if state.active_user.is_none() {
            return Ok(());
        }
        self.commit(&mut state, vec![LedgerOp::SetActiveUser { user: None }])
    }

    /// The signed-in account, if any.
    #[must_use]
    pub fn active_user(&self) -> Option<UserAccount> {
        let state = self.state.lock();
        let id = state.active_user.as_ref()?;
        state.users.get(id).cloned()
    }

    /// Snapshot of one account.
    #[must_use]
    pub fn user(&self, id: &UserId) -> Option<UserAccount> {
        self.state.lock().users.get(id).cloned()
    }

    /// All accounts, oldest first.
    #[must_use]
    pub fn users(&self) -> Vec<UserAccount> {
        let mut users: Vec<UserAccount> = self.state.lock().users.values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        users
    }

    /// The referral log, oldest first.
    #[must_use]
    pub fn referral_records(&self) -> Vec<ReferralRecord> {
        self.state.lock().referrals.clone()
    }

    // -------------------------------------------------------------------------
    // Balance
    // -------------------------------------------------------------------------

    /// Spends `amount`. Returns the new balance.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::InsufficientFunds` if the balance is short, or
    /// `EconomyError::UnknownUser`.
    pub fn debit(&self, user: &UserId, amount: Credits) -> EconomyResult<Credits> {
        let mut state = self.state.lock();
        let available = state.account(user)?.balance;
        if available < amount {
            return Err(EconomyError::InsufficientFunds {
                required: amount,
                available,
            });
        }
        if !amount.is_zero() {
            self.commit(
                &mut state,
                vec![LedgerOp::Debit {
                    user: user.clone(),
                    amount,
                }],
            )?;
        }
        Ok(state.account(user)?.balance)
    }

    /// Adds `amount`. Zero is a no-op. Returns the new balance.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::UnknownUser` or `EconomyError::ArithmeticOverflow`.
    pub fn credit(&self, user: &UserId, amount: Credits) -> EconomyResult<Credits> {
        let mut state = self.state.lock();
        let balance = state.account(user)?.balance;
        if amount.is_zero() {
            return Ok(balance);
        }
        balance.safe_add(amount)?;
        self.commit(
            &mut state,
            vec![LedgerOp::Credit {
                user: user.clone(),
                amount,
            }],
        )?;
        Ok(state.account(user)?.balance)
    }

    /// Applies a signed admin correction, clamping at zero.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::UnknownUser`.
    pub fn admin_adjust(&self, user: &UserId, delta: CreditDelta) -> EconomyResult<Credits> {
        let mut state = self.state.lock();
        let before = state.account(user)?.balance;
        self.commit(
            &mut state,
            vec![LedgerOp::AdminAdjust {
                user: user.clone(),
                delta,
            }],
        )?;
        let after = state.account(user)?.balance;
        tracing::info!(user = %user, %delta, %before, %after, "admin balance adjustment");
        Ok(after)
    }

    /// Latches the intro bonus and credits it in one step. Returns the new
    /// balance.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::AlreadyClaimed` on any call after the first.
    pub fn claim_intro_bonus(&self, user: &UserId, amount: Credits) -> EconomyResult<Credits> {
        let mut state = self.state.lock();
        let account = state.account(user)?;
        if account.has_claimed_intro_bonus {
            return Err(EconomyError::AlreadyClaimed);
        }
        account.balance.safe_add(amount)?;
        self.commit(
            &mut state,
            vec![
                LedgerOp::MarkIntroClaimed { user: user.clone() },
                LedgerOp::Credit {
                    user: user.clone(),
                    amount,
                },
            ],
        )?;
        let balance = state.account(user)?.balance;
        tracing::info!(user = %user, %amount, %balance, "intro bonus claimed");
        Ok(balance)
    }

    // -------------------------------------------------------------------------
    // Inventory
    // -------------------------------------------------------------------------

    /// Prepends a freshly minted copy of `item`.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::UnknownUser`.
    pub fn grant_item(&self, user: &UserId, item: &ItemDefinition) -> EconomyResult<OwnedItem> {
        let mut state = self.state.lock();
        state.account(user)?;
        let owned = OwnedItem::mint(item);
        self.commit(
            &mut state,
            vec![LedgerOp::GrantItem {
                user: user.clone(),
                item: Box::new(owned.clone()),
            }],
        )?;
        Ok(owned)
    }

    /// Removes every listed uid the user holds; absent uids are ignored.
    ///
    /// Returns the number of items removed.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::UnknownUser`.
    pub fn remove_items(&self, user: &UserId, uids: &[Uid]) -> EconomyResult<usize> {
        let mut state = self.state.lock();
        let present: Vec<Uid> = {
            let inventory = &state.account(user)?.inventory;
            uids.iter().copied().filter(|&uid| inventory.contains(uid)).collect()
        };
        if present.is_empty() {
            return Ok(0);
        }
        let removed = present.len();
        self.commit(
            &mut state,
            vec![LedgerOp::RemoveItems {
                user: user.clone(),
                uids: present,
            }],
        )?;
        Ok(removed)
    }

    /// Removes one item and credits its catalog price. Returns the price.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::NotFound` if the uid is not held.
    pub fn sell(&self, user: &UserId, uid: Uid) -> EconomyResult<Credits> {
        let mut state = self.state.lock();
        let account = state.account(user)?;
        let price = account
            .inventory
            .get(uid)
            .map(OwnedItem::price)
            .ok_or_else(|| EconomyError::NotFound(uid.to_string()))?;
        account.balance.safe_add(price)?;

        self.commit(
            &mut state,
            vec![
                LedgerOp::RemoveItems {
                    user: user.clone(),
                    uids: vec![uid],
                },
                LedgerOp::Credit {
                    user: user.clone(),
                    amount: price,
                },
            ],
        )?;
        tracing::debug!(user = %user, %uid, %price, "item sold");
        Ok(price)
    }

    // -------------------------------------------------------------------------
    // Referrals
    // -------------------------------------------------------------------------

    /// Binds `invitee` to the owner of `code` and credits `bonus` to the
    /// inviter, appending one referral record. `code` must already be
    /// normalized.
    ///
    /// # Errors
    ///
    /// `AlreadyBound`, `UnknownCode`, `SelfReferral` or `UnknownUser`; state
    /// is unchanged on error.
    pub fn bind_referral(
        &self,
        invitee: &UserId,
        code: &str,
        bonus: Credits,
    ) -> EconomyResult<ReferralRecord> {
        let mut state = self.state.lock();
        if state.account(invitee)?.referred_by.is_some() {
            return Err(EconomyError::AlreadyBound);
        }
        let inviter = state
            .users
            .values()
            .find(|u| u.referral_code == code)
            .ok_or_else(|| EconomyError::UnknownCode(code.to_string()))?;
        if &inviter.id == invitee {
            return Err(EconomyError::SelfReferral);
        }
        inviter.balance.safe_add(bonus)?;
        let inviter_id = inviter.id.clone();

        let record = ReferralRecord {
            id: format!("ref_{}", Uuid::new_v4().simple()),
            inviter_id: inviter_id.clone(),
            invitee_id: invitee.clone(),
            timestamp: Utc::now(),
        };

        let mut ops = vec![LedgerOp::BindReferral {
            record: record.clone(),
        }];
        if !bonus.is_zero() {
            ops.push(LedgerOp::Credit {
                user: inviter_id.clone(),
                amount: bonus,
            });
        }
        self.commit(&mut state, ops)?;

        tracing::info!(inviter = %inviter_id, invitee = %invitee, code, %bonus, "referral bound");
        Ok(record)
    }

    // -------------------------------------------------------------------------
    // Settlements
    // -------------------------------------------------------------------------

    /// Funds check, debit and grant as one transaction.
    ///
    /// `resolve` is called only after the funds check passes, inside the
    /// critical section.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::InsufficientFunds` (no mutation, `resolve` not
    /// called) or whatever `resolve` returns.
    pub fn settle_case_open<F>(
        &self,
        user: &UserId,
        price: Credits,
        resolve: F,
    ) -> EconomyResult<OwnedItem>
    where
        F: FnOnce() -> EconomyResult<ItemDefinition>,
    {
        let mut state = self.state.lock();
        let available = state.account(user)?.balance;
        if available < price {
            return Err(EconomyError::InsufficientFunds {
                required: price,
                available,
            });
        }

        let item = resolve()?;
        let owned = OwnedItem::mint(&item);
        self.commit(
            &mut state,
            vec![
                LedgerOp::Debit {
                    user: user.clone(),
                    amount: price,
                },
                LedgerOp::GrantItem {
                    user: user.clone(),
                    item: Box::new(owned.clone()),
                },
            ],
        )?;
        Ok(owned)
    }

    /// Validates an upgrade, draws its outcome and commits consumption plus
    /// the conditional grant as one transaction.
    ///
    /// Duplicate uids in `sources` count once. `draw` is called only after
    /// validation passes.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::InvalidSelection` for an empty, unowned or
    /// worthless selection; state is unchanged.
    pub fn settle_upgrade<F>(
        &self,
        user: &UserId,
        sources: &[Uid],
        target: &ItemDefinition,
        draw: F,
    ) -> EconomyResult<UpgradeSettlement>
    where
        F: FnOnce() -> Roll,
    {
        let mut unique: Vec<Uid> = Vec::with_capacity(sources.len());
        for &uid in sources {
            if !unique.contains(&uid) {
                unique.push(uid);
            }
        }
        if unique.is_empty() {
            return Err(SelectionError::NoSources.into());
        }

        let mut state = self.state.lock();
        let inventory = &state.account(user)?.inventory;
        let consumed = unique
            .iter()
            .map(|&uid| inventory.get(uid).cloned())
            .collect::<Option<Vec<OwnedItem>>>()
            .ok_or(SelectionError::SourceNotOwned)?;

        let total = Credits::try_sum(consumed.iter().map(OwnedItem::price))?;
        if total.is_zero() {
            return Err(SelectionError::ZeroSourceValue.into());
        }

        let chance = upgrade_chance(total, target.price);
        let roll = draw();
        let won = roll.wins_against(chance);

        let mut ops = vec![LedgerOp::RemoveItems {
            user: user.clone(),
            uids: unique,
        }];
        let granted = won.then(|| OwnedItem::mint(target));
        if let Some(owned) = &granted {
            ops.push(LedgerOp::GrantItem {
                user: user.clone(),
                item: Box::new(owned.clone()),
            });
        }
        self.commit(&mut state, ops)?;

        tracing::info!(
            user = %user,
            target = target.id,
            sources = consumed.len(),
            %total,
            %chance,
            won,
            "upgrade settled"
        );
        Ok(UpgradeSettlement {
            chance,
            roll,
            won,
            consumed,
            granted,
        })
    }
}

/// Writes the snapshot atomically: temp file, fsync, rename.
fn write_snapshot(path: &Path, lsn: u64, state: &StoreState) -> EconomyResult<()> {
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(&Snapshot { lsn, state })
        .map_err(|e| EconomyError::Storage(format!("encode snapshot: {e}")))?;

    let mut file = fs::File::create(&tmp)
        .map_err(|e| EconomyError::Storage(format!("create snapshot: {e}")))?;
    file.write_all(&bytes)
        .and_then(|()| file.sync_all())
        .map_err(|e| EconomyError::Storage(format!("write snapshot: {e}")))?;
    fs::rename(&tmp, path).map_err(|e| EconomyError::Storage(format!("rename snapshot: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    fn store() -> EconomyStore {
        EconomyStore::in_memory(AdminPolicy::default())
    }

    fn steam(name: &str) -> Identity {
        Identity::new(Provider::Steam, name)
    }

    fn item(id: u32) -> ItemDefinition {
        Catalog::reference().unwrap().item(id).unwrap().clone()
    }

    #[test]
    fn test_create_or_fetch_is_idempotent() {
        let store = store();
        let first = store.create_or_fetch_user(&steam("alice")).unwrap();
        let again = store.create_or_fetch_user(&steam("alice")).unwrap();
        assert_eq!(first, again);
        assert_eq!(first.id.as_str(), "steam_alice");
        assert_eq!(first.balance, Credits::ZERO);
        assert_eq!(first.referral_code.len(), REFERRAL_CODE_LEN);
        assert_eq!(store.users().len(), 1);
    }

    #[test]
    fn test_admin_policy() {
        let store = store();
        assert!(store.create_or_fetch_user(&steam("first")).unwrap().is_admin);
        assert!(!store.create_or_fetch_user(&steam("second")).unwrap().is_admin);
        assert!(store
            .create_or_fetch_user(&Identity::new(Provider::Google, "g"))
            .unwrap()
            .is_admin);

        let nobody = EconomyStore::in_memory(AdminPolicy::Nobody);
        assert!(!nobody.create_or_fetch_user(&steam("first")).unwrap().is_admin);
    }

    #[test]
    fn test_debit_rejects_overspend() {
        let store = store();
        let user = store.create_or_fetch_user(&steam("a")).unwrap().id;
        store.credit(&user, Credits::from_whole(5)).unwrap();

        let err = store.debit(&user, Credits::from_cents(501)).unwrap_err();
        assert_eq!(
            err,
            EconomyError::InsufficientFunds {
                required: Credits::from_cents(501),
                available: Credits::from_whole(5)
            }
        );
        assert_eq!(store.debit(&user, Credits::from_cents(500)).unwrap(), Credits::ZERO);
    }

    #[test]
    fn test_admin_adjust_clamps_at_zero() {
        let store = store();
        let user = store.create_or_fetch_user(&steam("a")).unwrap().id;
        store.credit(&user, Credits::from_whole(3)).unwrap();
        let balance = store
            .admin_adjust(&user, CreditDelta::from_cents(-1_000_000))
            .unwrap();
        assert_eq!(balance, Credits::ZERO);
        assert_eq!(
            store.admin_adjust(&UserId::new("ghost"), CreditDelta::from_cents(1)),
            Err(EconomyError::UnknownUser("ghost".to_string()))
        );
    }

    #[test]
    fn test_sell_credits_catalog_price() {
        let store = store();
        let user = store.create_or_fetch_user(&steam("a")).unwrap().id;
        let owned = store.grant_item(&user, &item(10)).unwrap();

        assert_eq!(store.sell(&user, owned.uid).unwrap(), Credits::from_whole(2));
        assert_eq!(store.user(&user).unwrap().balance, Credits::from_whole(2));
        assert!(matches!(store.sell(&user, owned.uid), Err(EconomyError::NotFound(_))));
        assert_eq!(store.user(&user).unwrap().balance, Credits::from_whole(2));
    }

    #[test]
    fn test_remove_items_idempotent() {
        let store = store();
        let user = store.create_or_fetch_user(&steam("a")).unwrap().id;
        let a = store.grant_item(&user, &item(1)).unwrap();
        let b = store.grant_item(&user, &item(2)).unwrap();

        assert_eq!(store.remove_items(&user, &[a.uid]).unwrap(), 1);
        assert_eq!(store.remove_items(&user, &[a.uid]).unwrap(), 0);
        let left: Vec<Uid> = store.user(&user).unwrap().inventory.iter().map(|o| o.uid).collect();
        assert_eq!(left, vec![b.uid]);
    }

    #[test]
    fn test_intro_bonus_exactly_once() {
        let store = store();
        let user = store.create_or_fetch_user(&steam("a")).unwrap().id;
        assert_eq!(
            store.claim_intro_bonus(&user, Credits::from_whole(10)).unwrap(),
            Credits::from_whole(10)
        );
        assert_eq!(
            store.claim_intro_bonus(&user, Credits::from_whole(10)),
            Err(EconomyError::AlreadyClaimed)
        );
        assert_eq!(store.user(&user).unwrap().balance, Credits::from_whole(10));
    }

    #[test]
    fn test_bind_referral_rules() {
        let store = store();
        let inviter = store.create_or_fetch_user(&steam("inviter")).unwrap();
        let invitee = store.create_or_fetch_user(&steam("invitee")).unwrap();
        let bonus = Credits::from_whole(5);

        assert_eq!(
            store.bind_referral(&inviter.id, &inviter.referral_code, bonus),
            Err(EconomyError::SelfReferral)
        );
        assert_eq!(
            store.bind_referral(&invitee.id, "NOPE00", bonus),
            Err(EconomyError::UnknownCode("NOPE00".to_string()))
        );

        let record = store
            .bind_referral(&invitee.id, &inviter.referral_code, bonus)
            .unwrap();
        assert_eq!(record.inviter_id, inviter.id);
        assert_eq!(
            store.bind_referral(&invitee.id, &inviter.referral_code, bonus),
            Err(EconomyError::AlreadyBound)
        );

        assert_eq!(store.user(&inviter.id).unwrap().balance, bonus);
        assert_eq!(store.user(&invitee.id).unwrap().balance, Credits::ZERO);
        assert_eq!(store.user(&invitee.id).unwrap().referred_by, Some(inviter.id.clone()));
        assert_eq!(store.user(&inviter.id).unwrap().referred_by, None);
        assert_eq!(store.referral_records().len(), 1);
    }

    #[test]
    fn test_case_open_insufficient_funds_skips_resolution() {
        let store = store();
        let user = store.create_or_fetch_user(&steam("a")).unwrap().id;
        let mut called = false;
        let err = store
            .settle_case_open(&user, Credits::from_cents(499), || {
                called = true;
                Ok(item(1))
            })
            .unwrap_err();
        assert!(matches!(err, EconomyError::InsufficientFunds { .. }));
        assert!(!called);
        assert!(store.user(&user).unwrap().inventory.is_empty());
    }

    #[test]
    fn test_upgrade_consumes_sources_on_loss() {
        let store = store();
        let user = store.create_or_fetch_user(&steam("a")).unwrap().id;
        let source = store.grant_item(&user, &item(10)).unwrap(); // 2.00
        let target = item(13); // 3.00 -> 63.333%

        let settlement = store
            .settle_upgrade(&user, &[source.uid], &target, || Roll::MAX)
            .unwrap();
        assert!(!settlement.won);
        assert_eq!(settlement.chance.millipercent(), 63_333);
        assert!(store.user(&user).unwrap().inventory.is_empty());
    }

    #[test]
    fn test_upgrade_grants_target_on_win() {
        let store = store();
        let user = store.create_or_fetch_user(&steam("a")).unwrap().id;
        let source = store.grant_item(&user, &item(10)).unwrap();
        let target = item(13);

        let settlement = store
            .settle_upgrade(&user, &[source.uid, source.uid], &target, || Roll::MIN)
            .unwrap();
        assert!(settlement.won);
        let inventory = store.user(&user).unwrap().inventory;
        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory.iter().next().unwrap().item.id, 13);
    }

    #[test]
    fn test_upgrade_rejects_bad_selection() {
        let store = store();
        let user = store.create_or_fetch_user(&steam("a")).unwrap().id;
        let held = store.grant_item(&user, &item(1)).unwrap();
        let target = item(13);

        assert_eq!(
            store.settle_upgrade(&user, &[], &target, || Roll::MIN),
            Err(EconomyError::InvalidSelection(SelectionError::NoSources))
        );
        assert_eq!(
            store.settle_upgrade(&user, &[held.uid, Uid::generate()], &target, || Roll::MIN),
            Err(EconomyError::InvalidSelection(SelectionError::SourceNotOwned))
        );
        assert!(store.user(&user).unwrap().inventory.contains(held.uid));
    }

    #[test]
    fn test_sign_in_and_out() {
        let store = store();
        assert!(store.active_user().is_none());
        let user = store.sign_in(&steam("a")).unwrap();
        assert_eq!(store.active_user().unwrap().id, user.id);
        store.sign_out().unwrap();
        assert!(store.active_user().is_none());
        assert!(store.user(&user.id).is_some());
    }
}
