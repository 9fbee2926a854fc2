use std::fmt;

/// Error kinds from spec §7. The kind is the stable, matchable part of an
/// error; `message` carries human-readable detail and is not meant to be
/// parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // Input
    InvalidDn,
    InvalidEntry,
    ObjectClassRequired,
    InvalidPlacement,
    // Existence
    EntryNotFound,
    EntryExists,
    NoParent,
    NewSuperiorNotFound,
    NotAllowedOnNonLeaf,
    // Schema
    ObjectClassViolation,
    UndefinedAttributeType,
    MissingRequiredAttribute,
    SingleValueViolation,
    NoUserModification,
    InvalidAttributeSyntax,
    InheritanceCycle,
    // Authn/authz
    InvalidCredentials,
    NoPassword,
    AccountDisabled,
    AccountLocked,
    // Password policy
    TooShort,
    TooLong,
    NoUppercase,
    NoLowercase,
    NoDigit,
    NoSpecial,
    InHistory,
    TooSoon,
    // Cluster/storage
    SubtreeMoveUnsupported,
    Conflict,
    StorageError,
    UnsupportedFormat,
    // Stream
    TokenTooOld,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidDn => "InvalidDN",
            Self::InvalidEntry => "InvalidEntry",
            Self::ObjectClassRequired => "ObjectClassRequired",
            Self::InvalidPlacement => "InvalidPlacement",
            Self::EntryNotFound => "EntryNotFound",
            Self::EntryExists => "EntryExists",
            Self::NoParent => "NoParent",
            Self::NewSuperiorNotFound => "NewSuperiorNotFound",
            Self::NotAllowedOnNonLeaf => "NotAllowedOnNonLeaf",
            Self::ObjectClassViolation => "ObjectClassViolation",
            Self::UndefinedAttributeType => "UndefinedAttributeType",
            Self::MissingRequiredAttribute => "MissingRequiredAttribute",
            Self::SingleValueViolation => "SingleValueViolation",
            Self::NoUserModification => "NoUserModification",
            Self::InvalidAttributeSyntax => "InvalidAttributeSyntax",
            Self::InheritanceCycle => "InheritanceCycle",
            Self::InvalidCredentials => "InvalidCredentials",
            Self::NoPassword => "NoPassword",
            Self::AccountDisabled => "AccountDisabled",
            Self::AccountLocked => "AccountLocked",
            Self::TooShort => "TooShort",
            Self::TooLong => "TooLong",
            Self::NoUppercase => "NoUppercase",
            Self::NoLowercase => "NoLowercase",
            Self::NoDigit => "NoDigit",
            Self::NoSpecial => "NoSpecial",
            Self::InHistory => "InHistory",
            Self::TooSoon => "TooSoon",
            Self::SubtreeMoveUnsupported => "SubtreeMoveUnsupported",
            Self::Conflict => "Conflict",
            Self::StorageError => "StorageError",
            Self::UnsupportedFormat => "UnsupportedFormat",
            Self::TokenTooOld => "TokenTooOld",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Wraps a storage/IO failure with the `backend:` prefix the propagation
    /// policy in spec §7 requires, so the boundary between user-facing and
    /// backend errors stays visible to callers.
    pub fn backend(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::StorageError, format!("backend: {message}"))
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for EngineError {}

pub type Result<T> = std::result::Result<T, EngineError>;

macro_rules! err_ctor {
    ($name:ident, $kind:ident) => {
        pub fn $name(message: impl Into<String>) -> EngineError {
            EngineError::new(ErrorKind::$kind, message)
        }
    };
}

err_ctor!(invalid_dn, InvalidDn);
err_ctor!(invalid_entry, InvalidEntry);
err_ctor!(object_class_required, ObjectClassRequired);
err_ctor!(invalid_placement, InvalidPlacement);
err_ctor!(entry_not_found, EntryNotFound);
err_ctor!(entry_exists, EntryExists);
err_ctor!(no_parent, NoParent);
err_ctor!(new_superior_not_found, NewSuperiorNotFound);
err_ctor!(not_allowed_on_non_leaf, NotAllowedOnNonLeaf);
err_ctor!(object_class_violation, ObjectClassViolation);
err_ctor!(undefined_attribute_type, UndefinedAttributeType);
err_ctor!(missing_required_attribute, MissingRequiredAttribute);
err_ctor!(single_value_violation, SingleValueViolation);
err_ctor!(no_user_modification, NoUserModification);
err_ctor!(invalid_attribute_syntax, InvalidAttributeSyntax);
err_ctor!(inheritance_cycle, InheritanceCycle);
err_ctor!(invalid_credentials, InvalidCredentials);
err_ctor!(no_password, NoPassword);
err_ctor!(account_disabled, AccountDisabled);
err_ctor!(account_locked, AccountLocked);
err_ctor!(subtree_move_unsupported, SubtreeMoveUnsupported);
err_ctor!(conflict, Conflict);
err_ctor!(unsupported_format, UnsupportedFormat);
err_ctor!(token_too_old, TokenTooOld);
err_ctor!(too_short, TooShort);
err_ctor!(too_long, TooLong);
err_ctor!(no_uppercase, NoUppercase);
err_ctor!(no_lowercase, NoLowercase);
err_ctor!(no_digit, NoDigit);
err_ctor!(no_special, NoSpecial);
err_ctor!(in_history, InHistory);
err_ctor!(too_soon, TooSoon);
