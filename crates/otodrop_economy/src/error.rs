//! # Economy Error Types
//!
//! All errors that can occur in the economy engine.
//!
//! Runtime errors are recoverable and always leave the store unchanged.
//! [`CatalogError`] is the exception: it is fatal at startup and no
//! [`crate::Market`] can be built while the catalog is invalid.

use thiserror::Error;

use crate::credits::Credits;

/// Errors raised while building the catalog from source data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// A row could not be split into its fields.
    #[error("malformed item row {row}: {line:?}")]
    MalformedRow {
        /// 1-based row number.
        row: usize,
        /// The offending line.
        line: String,
    },

    /// A price was zero, negative or not a two-decimal amount.
    #[error("invalid price {price:?} for {subject}")]
    InvalidPrice {
        /// Item row or case id the price belongs to.
        subject: String,
        /// The raw price text.
        price: String,
    },

    /// A color code has no rarity tier.
    #[error("unrecognized color code {color:?} on item row {row}")]
    UnknownColor {
        /// 1-based row number.
        row: usize,
        /// The raw color text.
        color: String,
    },

    /// A case references an item id that was never declared.
    #[error("case {case_id:?} references unknown item {item_id}")]
    UnknownItem {
        /// The case holding the reference.
        case_id: String,
        /// The missing item id.
        item_id: u32,
    },

    /// A case has no contents.
    #[error("case {0:?} has no contents")]
    EmptyCase(String),

    /// A case weight is outside (0, 100].
    #[error("case {case_id:?} has invalid weight {weight:?}")]
    InvalidWeight {
        /// The case holding the weight.
        case_id: String,
        /// The raw weight text.
        weight: String,
    },

    /// Two cases share an id.
    #[error("duplicate case id {0:?}")]
    DuplicateCase(String),

    /// The catalog document could not be parsed.
    #[error("catalog document: {0}")]
    Document(String),
}

/// Why an upgrade selection was rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionError {
    /// No source items were selected.
    #[error("no source items selected")]
    NoSources,

    /// One of the selected sources is not in the user's inventory.
    #[error("source item is not owned")]
    SourceNotOwned,

    /// The selected sources are worth nothing.
    #[error("source items have zero total value")]
    ZeroSourceValue,

    /// An upgrade for this user is still resolving.
    #[error("an upgrade is already rolling")]
    AlreadyRolling,
}

/// Errors that can occur in the economy engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EconomyError {
    /// Balance does not cover the requested spend.
    #[error("insufficient funds: need {required}, have {available}")]
    InsufficientFunds {
        /// The amount required.
        required: Credits,
        /// The balance available.
        available: Credits,
    },

    /// Case id not present in the catalog.
    #[error("unknown case: {0}")]
    UnknownCase(String),

    /// Item id not present in the catalog.
    #[error("unknown item: {0}")]
    UnknownItem(u32),

    /// No account exists for this user id.
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// Upgrade input was malformed.
    #[error("invalid selection: {0}")]
    InvalidSelection(SelectionError),

    /// The intro bonus was already claimed.
    #[error("intro bonus already claimed")]
    AlreadyClaimed,

    /// The invitee already has an inviter.
    #[error("referral already bound")]
    AlreadyBound,

    /// The code belongs to the invitee.
    #[error("cannot refer yourself")]
    SelfReferral,

    /// No user owns this referral code.
    #[error("unknown referral code: {0}")]
    UnknownCode(String),

    /// The uid is not in the user's inventory.
    #[error("item not found: {0}")]
    NotFound(String),

    /// Arithmetic overflow in a balance calculation.
    #[error("arithmetic overflow in economic calculation")]
    ArithmeticOverflow,

    /// Journal or snapshot I/O failed; nothing was applied.
    #[error("storage failure: {0}")]
    Storage(String),

    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The catalog failed validation.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl From<SelectionError> for EconomyError {
    fn from(reason: SelectionError) -> Self {
        Self::InvalidSelection(reason)
    }
}

/// Result type for economy operations.
pub type EconomyResult<T> = Result<T, EconomyError>;
