//! # Keel Host
//!
//! The service layer around `keel-core`. The core verifies; the host decides
//! who may ask it to.
//!
//! ## Responsibilities
//!
//! - **Authority** (`auth`, `relays`): owner-only configuration and an
//!   allow-list of relays that may submit headers.
//! - **Registry** (`registry`): one [`ChainService`] per remote chain, keyed
//!   by chain id, answering the anchored-block queries downstream ledgers use.
//! - **Persistence** (`snapshot`): chain state is saved as JSON on exit and
//!   restored on start.
//! - **Block merkle history** (`history`): per-relay accumulator snapshots.

pub mod auth;
pub mod config;
pub mod error;
pub mod history;
pub mod registry;
pub mod relays;
pub mod service;
pub mod snapshot;

pub use auth::CallContext;
pub use config::{ChainEntry, HostConfig};
pub use error::HostError;
pub use history::{MerkleHistory, BLOCK_MERKLE_INTERVAL};
pub use registry::ChainRegistry;
pub use relays::{RelayAction, RelaySet};
pub use service::ChainService;

use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber filtered by `RUST_LOG`, defaulting to `info`.
/// Does nothing if a subscriber is already installed.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
