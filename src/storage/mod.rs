mod audit;
mod escrows;
mod repository;
mod wallets;

pub use audit::*;
pub use repository::*;
pub use wallets::*;

/// SQL migration for the initial schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");
