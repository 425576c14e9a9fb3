//! # Referral Ledger
//!
//! Rules layer over [`EconomyStore::bind_referral`]: codes are normalized
//! (trimmed, upper-cased) and the configured bonus goes to the inviter only.
//! Binding is one-time; the store rejects every later attempt.

use crate::credits::Credits;
use crate::error::{EconomyError, EconomyResult};
use crate::store::{EconomyStore, ReferralRecord, UserId};

/// Normalizes a user-entered referral code.
#[must_use]
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Referral bonus rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReferralLedger {
    bonus: Credits,
}

impl ReferralLedger {
    /// Creates a ledger paying `bonus` to the inviter.
    #[must_use]
    pub const fn new(bonus: Credits) -> Self {
        Self { bonus }
    }

    /// The inviter bonus.
    #[must_use]
    pub const fn bonus(&self) -> Credits {
        self.bonus
    }

    /// Binds `invitee` to the owner of `code`.
    ///
    /// # Errors
    ///
    /// `UnknownCode` for a blank code, otherwise whatever
    /// [`EconomyStore::bind_referral`] rejects.
    pub fn bind(
        &self,
        store: &EconomyStore,
        invitee: &UserId,
        code: &str,
    ) -> EconomyResult<ReferralRecord> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Err(EconomyError::UnknownCode(code));
        }
        store.bind_referral(invitee, &code, self.bonus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AdminPolicy, Identity, Provider};

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("  ab12cd \n"), "AB12CD");
    }

    #[test]
    fn test_bind_accepts_sloppy_code() {
        let store = EconomyStore::in_memory(AdminPolicy::Nobody);
        let inviter = store
            .create_or_fetch_user(&Identity::new(Provider::Steam, "inviter"))
            .unwrap();
        let invitee = store
            .create_or_fetch_user(&Identity::new(Provider::Guest, "invitee"))
            .unwrap();
        let ledger = ReferralLedger::new(Credits::from_whole(5));

        let sloppy = format!(" {} ", inviter.referral_code.to_lowercase());
        ledger.bind(&store, &invitee.id, &sloppy).unwrap();

        assert_eq!(store.user(&inviter.id).unwrap().balance.to_string(), "5.00");
        assert_eq!(
            ledger.bind(&store, &invitee.id, &sloppy),
            Err(EconomyError::AlreadyBound)
        );
        assert_eq!(store.user(&inviter.id).unwrap().balance.to_string(), "5.00");
    }

    #[test]
    fn test_blank_code_is_unknown() {
        let store = EconomyStore::in_memory(AdminPolicy::Nobody);
        let user = store
            .create_or_fetch_user(&Identity::new(Provider::Guest, "x"))
            .unwrap();
        let ledger = ReferralLedger::new(Credits::from_whole(5));
        assert_eq!(
            ledger.bind(&store, &user.id, "   "),
            Err(EconomyError::UnknownCode(String::new()))
        );
    }
}
