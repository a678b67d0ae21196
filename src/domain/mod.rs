mod audit;
mod commission;
mod escrow;
mod event;
mod money;
mod reconcile;
mod transaction;
mod wallet;

pub use audit::*;
pub use commission::*;
pub use escrow::*;
pub use event::*;
pub use money::*;
pub use reconcile::*;
pub use transaction::*;
pub use wallet::*;
