//! CLI commands.

pub mod chat;
pub mod device;
pub mod eval;
pub mod info;
pub mod prefs;
pub mod tiers;
