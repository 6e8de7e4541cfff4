//! Position ledgers.
//!
//! Ledgers are stateless: every operation takes the caller's open transaction so that a
//! relation change and the position shifts it implies commit or roll back together.

pub mod items;
pub mod library;

pub use items::ItemLedger;
pub use library::LibraryLedger;
