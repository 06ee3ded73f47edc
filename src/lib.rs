//! Skynet polling agent.
//!
//! Periodically produces cloud and host metrics, from the Zabbix API, a
//! compute inventory and a local statistics store, and pushes them to a
//! Zabbix trapper.

pub mod config;
pub mod db;
pub mod mapping;
pub mod pipeline;
pub mod pollers;
pub mod retry;
pub mod scheduler;
pub mod zabbix;
