pub mod block_id;
pub mod chain;
pub mod pbft;
pub mod schedule;
pub mod section;
pub mod signature;

pub use block_id::*;
pub use chain::*;
pub use pbft::*;
pub use schedule::*;
pub use section::*;
pub use signature::*;
