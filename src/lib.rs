//! Virtual radio: a single global track rotation announced to every connected listener.

pub mod catalog;
pub mod channel;
pub mod config;
pub mod events;
pub mod rotation;
pub mod server;
