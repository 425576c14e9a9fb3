//! # Otodrop Session Simulator
//!
//! Drives a scripted marketplace session against a real `Market`:
//! sign-in, intro bonus, referral, case openings, one upgrade roll, sales,
//! admin views and a checkpoint.
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=debug otodrop_sim --seed 42 --cases 5 --data-dir var/otodrop
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context};
use otodrop::economy::{Credits, EconomyConfig, Identity, Market, OwnedItem, Provider, UserId};

/// Source slots offered by the reference upgrade screen.
const UPGRADE_SOURCE_SLOTS: usize = 3;

struct SimArgs {
    config: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    seed: Option<u64>,
    cases: usize,
    case_id: String,
}

fn parse_args() -> anyhow::Result<Option<SimArgs>> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = SimArgs {
        config: None,
        data_dir: None,
        seed: None,
        cases: 3,
        case_id: "budget".to_string(),
    };

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--config" | "-c", Some(v)) => parsed.config = Some(PathBuf::from(v)),
            ("--data-dir" | "-d", Some(v)) => parsed.data_dir = Some(PathBuf::from(v)),
            ("--seed" | "-s", Some(v)) => {
                parsed.seed = Some(v.parse().with_context(|| format!("bad --seed {v:?}"))?);
            }
            ("--cases" | "-n", Some(v)) => {
                parsed.cases = v.parse().with_context(|| format!("bad --cases {v:?}"))?;
            }
            ("--case", Some(v)) => parsed.case_id = v.clone(),
            ("--help" | "-h", _) => {
                println!("Usage: otodrop_sim [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <FILE>     TOML economy config");
                println!("  -d, --data-dir <DIR>    Durable store directory (default: in-memory)");
                println!("  -s, --seed <SEED>       Fixed RNG seed for a reproducible session");
                println!("  -n, --cases <NUM>       Cases to open (default: 3)");
                println!("      --case <ID>         Case id (default: budget)");
                println!("  -h, --help              Show this help");
                return Ok(None);
            }
            (flag, _) => bail!("unrecognized argument {flag:?} (try --help)"),
        }
        i += 2;
    }
    Ok(Some(parsed))
}

fn print_account(market: &Market, user: &UserId) {
    let Some(account) = market.user(user) else {
        return;
    };
    println!(
        "│ {:<28} balance {:>10}  items {:>3}  code {}",
        account.display_name,
        account.balance,
        account.inventory.len(),
        account.referral_code
    );
    for owned in account.inventory.iter() {
        println!(
            "│     {:<40} {:>10}  [{}]",
            owned.item.display_name,
            owned.item.price,
            owned.item.rarity.name()
        );
    }
}

/// Picks the cheapest item strictly more valuable than `sources`.
fn upgrade_target(market: &Market, sources: &[OwnedItem]) -> Option<u32> {
    let total = Credits::try_sum(sources.iter().map(OwnedItem::price)).ok()?;
    market
        .catalog()
        .items()
        .iter()
        .filter(|item| item.price > total)
        .min_by_key(|item| item.price)
        .map(|item| item.id)
}

fn run(market: &Market, args: &SimArgs) -> anyhow::Result<()> {
    let alice = market.sign_in(
        &Identity::new(Provider::Google, "104200000000000000001").with_display_name("alice"),
    )?;
    let bob = market
        .sign_in(&Identity::new(Provider::Steam, "76561198000000002").with_display_name("bob"))?;

    market.claim_intro_bonus(&alice.id)?;
    market.claim_intro_bonus(&bob.id)?;
    if let Err(e) = market.claim_intro_bonus(&bob.id) {
        tracing::info!(user = %bob.id, error = %e, "second intro claim refused");
    }

    let record = market.bind_referral(&bob.id, &alice.referral_code)?;
    tracing::info!(record = %record.id, inviter = %record.inviter_id, "referral recorded");

    for n in 0..args.cases {
        match market.open_case(&bob.id, &args.case_id) {
            Ok(owned) => println!(
                "│ case #{:<3} {:<40} {:>10}",
                n + 1,
                owned.item.display_name,
                owned.item.price
            ),
            Err(e) => {
                tracing::warn!(error = %e, "case opening stopped");
                break;
            }
        }
    }

    let mut inventory: Vec<OwnedItem> = market
        .user(&bob.id)
        .map(|a| a.inventory.iter().cloned().collect())
        .unwrap_or_default();
    inventory.sort_by_key(OwnedItem::price);
    let sources: Vec<OwnedItem> = inventory.into_iter().take(UPGRADE_SOURCE_SLOTS).collect();

    if let Some(target) = upgrade_target(market, &sources).filter(|_| !sources.is_empty()) {
        let uids: Vec<_> = sources.iter().map(|o| o.uid).collect();
        let chance = market.upgrade_chance(&bob.id, &uids, target)?;
        println!("│ upgrade {} item(s) into #{target} at {chance}", uids.len());
        let outcome = market.roll_upgrade(&bob.id, &uids, target)?;
        println!(
            "│ upgrade {} (roll {:?})",
            if outcome.won { "WON" } else { "lost" },
            outcome.roll
        );
    }

    if let Some(account) = market.user(&bob.id) {
        if let Some(best) = account.inventory.iter().max_by_key(|o| o.item.price) {
            let credited = market.sell(&bob.id, best.uid)?;
            println!("│ sold {} for {credited}", best.item.display_name);
        }
    }

    println!("├─ ACCOUNTS ──────────────────────────────────────────────────────┤");
    for account in market.users() {
        print_account(market, &account.id);
    }
    println!("├─ REFERRALS ─────────────────────────────────────────────────────┤");
    for record in market.referral_records() {
        println!("│ {} -> {} at {}", record.invitee_id, record.inviter_id, record.timestamp);
    }

    market.checkpoint()?;
    market.sign_out()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    otodrop::init_tracing();

    let Some(args) = parse_args()? else {
        return Ok(());
    };

    let mut config = otodrop::load_config(args.config.as_deref())?;
    if args.config.is_none() {
        config = EconomyConfig {
            case_reveal_ms: 0,
            upgrade_reveal_ms: 0,
            ..config
        };
    }
    if args.data_dir.is_some() {
        config.data_dir.clone_from(&args.data_dir);
    }
    if args.seed.is_some() {
        config.rng_seed = args.seed;
    }

    println!("┌─ OTODROP SESSION ───────────────────────────────────────────────┐");
    let market = otodrop::open_market(&config)?;
    run(&market, &args)?;
    println!("└─────────────────────────────────────────────────────────────────┘");
    Ok(())
}
