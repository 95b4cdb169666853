//! Shared result type.
//!
//! Errors are hand-written enums owned by the crate that raises them; they
//! travel inside a [`rootcause::Report`] so callers can attach context on
//! the way up. This alias only saves spelling out the report type.

use rootcause::Report;

/// `Result` whose error is a [`Report`] with context `C`.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
