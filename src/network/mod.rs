pub mod bootstrap;
pub mod dht;
pub mod handler;
pub mod nat;
pub mod transport;

pub use bootstrap::{BootstrapClient, BootstrapReport};
pub use handler::BootstrapHandler;
pub use nat::{NatCoordinator, NatPolicy};
pub use transport::{Host, Stream, StreamHandler};
