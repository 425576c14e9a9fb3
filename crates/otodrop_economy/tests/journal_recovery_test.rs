//! Integration tests for the durable store: snapshot + write-ahead journal.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use otodrop_economy::{
    AdminPolicy, Catalog, CreditDelta, EconomyConfig, EconomyStore, FixedRolls, Identity,
    LedgerOp, Market, Provider, Roll, UserId, WriteAheadLog,
};
use otodrop_shared::DATABASE_KEY;

fn temp_store_dir() -> PathBuf {
    let id = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("otodrop_test_store_{id}"))
}

fn durable_market(dir: &Path, rolls: FixedRolls) -> Market {
    Market::new(
        Arc::new(Catalog::reference().unwrap()),
        EconomyStore::open(dir, AdminPolicy::FirstUser).unwrap(),
        Box::new(rolls),
        &EconomyConfig::instant(),
    )
    .unwrap()
}

#[test]
fn test_state_survives_reopen() {
    let dir = temp_store_dir();
    let user: UserId;
    let code: String;
    {
        let market = durable_market(&dir, FixedRolls::always(Roll::MIN));
        let account = market.sign_in(&Identity::new(Provider::Steam, "persist")).unwrap();
        user = account.id.clone();
        code = account.referral_code.clone();
        market.claim_intro_bonus(&user).unwrap();
        market.open_case(&user, "budget").unwrap();
        // No checkpoint: everything after open lives only in the journal.
    }
    {
        let market = durable_market(&dir, FixedRolls::default());
        let account = market.user(&user).unwrap();
        assert_eq!(account.balance.to_string(), "5.01");
        assert_eq!(account.inventory.len(), 1);
        assert!(account.has_claimed_intro_bonus);
        assert!(account.is_admin);
        assert_eq!(account.referral_code, code);
        assert_eq!(market.active_user().unwrap().id, user);
        assert!(market.claim_intro_bonus(&user).is_err());
    }
    assert!(dir.join(format!("{DATABASE_KEY}.json")).exists());
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_replay_matches_checkpointed_state() {
    let dir = temp_store_dir();
    let before;
    {
        let market = durable_market(&dir, FixedRolls::always(Roll::MIN));
        let inviter = market.sign_in(&Identity::new(Provider::Google, "inviter")).unwrap();
        let invitee = market.sign_in(&Identity::new(Provider::Steam, "invitee")).unwrap();
        market
            .admin_adjust_balance(&invitee.id, CreditDelta::from_cents(50_00))
            .unwrap();
        market.bind_referral(&invitee.id, &inviter.referral_code).unwrap();
        let item = market.open_case(&invitee.id, "budget").unwrap();
        market.roll_upgrade(&invitee.id, &[item.uid], 23).unwrap();
        market.sign_out().unwrap();
        before = market.users();
    }
    {
        let market = durable_market(&dir, FixedRolls::default());
        assert_eq!(market.users(), before);
        assert_eq!(market.referral_records().len(), 1);
        assert!(market.active_user().is_none());
    }
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_uncommitted_transaction_is_discarded() {
    let dir = temp_store_dir();
    let user;
    {
        let market = durable_market(&dir, FixedRolls::default());
        user = market.sign_in(&Identity::new(Provider::Guest, "crash")).unwrap().id;
        market
            .admin_adjust_balance(&user, CreditDelta::from_cents(7_00))
            .unwrap();
    }

    // A credit that reached the journal but never committed.
    {
        let path = dir.join(format!("{DATABASE_KEY}.wal"));
        let (wal, _) = WriteAheadLog::open::<LedgerOp>(&path).unwrap();
        let mut txn = wal.begin_transaction().unwrap();
        txn.append(&LedgerOp::AdminAdjust {
            user: user.clone(),
            delta: CreditDelta::from_cents(1_000_00),
        })
        .unwrap();
        std::mem::forget(txn);
    }

    {
        let market = durable_market(&dir, FixedRolls::default());
        assert_eq!(market.user(&user).unwrap().balance.to_string(), "7.00");
    }
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_torn_journal_tail_is_ignored() {
    let dir = temp_store_dir();
    let user;
    {
        let market = durable_market(&dir, FixedRolls::default());
        user = market.sign_in(&Identity::new(Provider::Guest, "torn")).unwrap().id;
        market
            .admin_adjust_balance(&user, CreditDelta::from_cents(2_50))
            .unwrap();
    }
    {
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(dir.join(format!("{DATABASE_KEY}.wal")))
            .unwrap();
        file.write_all(&[0xde, 0xad, 0xbe, 0xef, 0x01]).unwrap();
    }
    {
        let market = durable_market(&dir, FixedRolls::default());
        assert_eq!(market.user(&user).unwrap().balance.to_string(), "2.50");
        market
            .admin_adjust_balance(&user, CreditDelta::from_cents(50))
            .unwrap();
    }
    {
        let market = durable_market(&dir, FixedRolls::default());
        assert_eq!(market.user(&user).unwrap().balance.to_string(), "3.00");
    }
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_crash_between_snapshot_and_journal_truncation() {
    let dir = temp_store_dir();
    let wal_path = dir.join(format!("{DATABASE_KEY}.wal"));
    let catalog = Catalog::reference().unwrap();
    let user;
    let granted;
    let stale_journal;
    {
        let store = EconomyStore::open(&dir, AdminPolicy::Nobody).unwrap();
        user = store
            .create_or_fetch_user(&Identity::new(Provider::Guest, "twice"))
            .unwrap()
            .id;
        store.checkpoint().unwrap();
        store
            .admin_adjust(&user, CreditDelta::from_cents(10_00))
            .unwrap();
        granted = store.grant_item(&user, catalog.item(2).unwrap()).unwrap();

        stale_journal = fs::read(&wal_path).unwrap();
        store.checkpoint().unwrap();
    }
    // The new snapshot landed; the journal truncation did not.
    fs::write(&wal_path, &stale_journal).unwrap();

    {
        let store = EconomyStore::open(&dir, AdminPolicy::Nobody).unwrap();
        let account = store.user(&user).unwrap();
        assert_eq!(account.balance.to_string(), "10.00");
        assert_eq!(account.inventory.len(), 1);
        assert!(account.inventory.contains(granted.uid));

        store
            .admin_adjust(&user, CreditDelta::from_cents(1_00))
            .unwrap();
    }
    {
        // Work journaled after the recovery is still replayed.
        let store = EconomyStore::open(&dir, AdminPolicy::Nobody).unwrap();
        assert_eq!(store.user(&user).unwrap().balance.to_string(), "11.00");
        assert_eq!(store.user(&user).unwrap().inventory.len(), 1);
    }
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_lost_journal_keeps_snapshot_position() {
    let dir = temp_store_dir();
    let wal_path = dir.join(format!("{DATABASE_KEY}.wal"));
    let user;
    {
        let store = EconomyStore::open(&dir, AdminPolicy::Nobody).unwrap();
        user = store
            .create_or_fetch_user(&Identity::new(Provider::Steam, "lost"))
            .unwrap()
            .id;
        store
            .admin_adjust(&user, CreditDelta::from_cents(3_00))
            .unwrap();
        store.checkpoint().unwrap();
    }
    fs::remove_file(&wal_path).unwrap();
    {
        // A fresh journal must not reuse LSNs the snapshot already covers.
        let store = EconomyStore::open(&dir, AdminPolicy::Nobody).unwrap();
        store
            .admin_adjust(&user, CreditDelta::from_cents(2_00))
            .unwrap();
    }
    {
        let store = EconomyStore::open(&dir, AdminPolicy::Nobody).unwrap();
        assert_eq!(store.user(&user).unwrap().balance.to_string(), "5.00");
    }
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_corrupt_snapshot_is_a_storage_error() {
    let dir = temp_store_dir();
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(format!("{DATABASE_KEY}.json")), b"{ not json").unwrap();

    let err = EconomyStore::open(&dir, AdminPolicy::Nobody).unwrap_err();
    assert!(matches!(err, otodrop_economy::EconomyError::Storage(_)));
    fs::remove_dir_all(&dir).ok();
}
