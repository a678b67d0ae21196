// Application layer - use cases and orchestration over the storage handle

pub mod error;
pub mod escrow;
pub mod ledger;
pub mod notify;
pub mod retry;
pub mod service;

pub use error::*;
pub use escrow::*;
pub use ledger::*;
pub use notify::*;
pub use retry::*;
pub use service::*;
