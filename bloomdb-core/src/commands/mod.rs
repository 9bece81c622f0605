//! Command implementations: baseline, migrate, info, repair, destroy.

pub mod baseline;
pub mod destroy;
pub mod info;
pub mod migrate;
pub mod repair;
