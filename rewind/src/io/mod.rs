//! Filesystem-backed stores and logs.

pub mod action_log;
pub mod activity_log;
pub mod atomic;
pub mod checkpoint_store;
pub mod config;
pub mod layout;
pub mod lock;
pub mod safe_parser;
pub mod state_store;
