//! Cluster collaborators for scrivener: node configuration, peer clients
//! guarded by circuit breakers, a membership-based coordinator resolver
//! and the HTTP transport that forwards batches to the designated writer.

pub mod circuit_breaker;
pub mod config;
pub mod membership;
pub mod peer;
pub mod transport;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use config::{NodeConfig, PeerConfig};
pub use membership::{Membership, MembershipResolver};
pub use peer::PeerClient;
pub use transport::HttpTransport;
