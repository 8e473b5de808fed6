pub mod chain;
pub mod header;
pub mod pbft;
pub mod primitives;
pub mod receipt;

pub use chain::*;
pub use header::*;
pub use pbft::*;
pub use primitives::*;
pub use receipt::*;
