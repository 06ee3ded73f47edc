//! Zabbix integration: trapper protocol, sender, JSON-RPC API and session.

mod api;
mod protocol;
mod sender;
mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use api::*;
pub use protocol::*;
pub use sender::*;
pub use session::*;
