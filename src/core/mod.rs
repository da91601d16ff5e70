pub mod address;
pub mod config;
pub mod membership;
pub mod node;
pub mod protocol;
pub mod reconcile;

pub use address::PeerDescriptor;
pub use config::Config;
pub use membership::{MembershipDelta, MembershipEvent, MembershipMap};
pub use node::Node;
pub use protocol::{ExchangeMode, ProtocolConfig, Request};
pub use reconcile::Reconciler;
