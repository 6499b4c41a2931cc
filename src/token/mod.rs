//! Tokens
//!
//! Ledger of issued tokens.

pub mod ledger;

pub use ledger::{ActiveScan, TokenLedger};
