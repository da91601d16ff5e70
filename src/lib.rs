//! Mesh bootstrap library
//!
//! Peer discovery for a small P2P overlay: nodes bootstrap from a seed,
//! exchange known peers over a line-based protocol and keep a membership
//! map in line with their routing table.

pub mod core;
pub mod network;
pub mod utils;

// Re-export main types
pub use self::core::{Config, MembershipMap, Node, PeerDescriptor};
pub use network::{BootstrapClient, BootstrapHandler, Host, NatPolicy};
pub use utils::{
    NodeIdentity,
    error::{P2PError, Result},
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
