pub mod account;
pub mod amm_pool;
pub mod market;
pub mod order;
pub mod position;
pub mod trade;
pub mod transaction;

pub use account::*;
pub use amm_pool::*;
pub use market::*;
pub use order::*;
pub use position::*;
pub use trade::*;
pub use transaction::*;
