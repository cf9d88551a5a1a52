pub mod dispatch;
pub mod executor;
pub mod manager;
pub mod reader;
pub mod registry;
pub mod remote;
pub mod session;
