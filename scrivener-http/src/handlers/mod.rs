use scrivener::{Manager, RemoteDelivery, TantivyEngine};
use scrivener_cluster::Membership;
use std::sync::Arc;

pub mod indexes;
pub mod internal;

pub struct AppState {
    pub manager: Arc<Manager<TantivyEngine>>,
    /// Absent on a standalone node.
    pub membership: Option<Arc<Membership>>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(manager: Arc<Manager<TantivyEngine>>, membership: Option<Arc<Membership>>) -> Self {
        AppState {
            manager,
            membership,
            start_time: std::time::Instant::now(),
        }
    }
}

pub(crate) fn delivery_name(delivery: &RemoteDelivery) -> &'static str {
    match delivery {
        RemoteDelivery::Local => "local",
        RemoteDelivery::Sent => "forwarded",
        RemoteDelivery::Scheduled(_) => "scheduled",
    }
}

pub use indexes::{post_operations, snapshot};
pub use internal::{receive_operations, status};
