//! Error type for this pass.
//!
//! Every failure here is a compile-time invariant violation, never a
//! recoverable condition. Following the rest of this crate family, errors
//! are a hand-rolled enum with manual `Display`/`Error` impls rather than a
//! `thiserror`/`anyhow` wrapper — there is exactly one error type in this
//! crate's public surface, so the derive machinery buys nothing.

use std::fmt;

use crate::ast::CodeRange;

/// A fatal, unrecoverable failure of this pass. The caller should abort the
/// current translation unit; there is no partial/best-effort output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LowerError {
    /// An input construct this pass does not support reached it — `for`,
    /// `continue`, or a stray `GotoState`/`State` node in the *input* tree.
    /// Earlier passes are responsible for removing these.
    UnsupportedConstruct { what: &'static str, at: CodeRange },
    /// The postcondition "no expression subtree contains a yield" failed to
    /// hold after statement-list-expression lowering ran.
    YieldInExpression { at: CodeRange },
    /// A `return e` was seen on an iterator with no return type, so no
    /// hidden result temporary could be synthesized to carry its value.
    MissingReturnType { at: CodeRange },
    /// Any other invariant violation, reported with a free-form message.
    Internal(String),
}

impl fmt::Display for LowerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedConstruct { what, at } => {
                write!(f, "internal error: unsupported construct `{what}` reached closure-iterator lowering at {at:?}")
            }
            Self::YieldInExpression { at } => {
                write!(f, "internal error: yield still nested in an expression after statement-list-expression lowering, at {at:?}")
            }
            Self::MissingReturnType { at } => {
                write!(f, "internal error: `return` with a value seen on an iterator with no return type, at {at:?}")
            }
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for LowerError {}

impl LowerError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

pub type LowerResult<T> = Result<T, LowerError>;
