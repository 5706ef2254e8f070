//! Worker bodies shipped with the binary.

pub mod pinger;
pub mod web;

pub use pinger::KeepAlivePinger;
pub use web::StatusServer;
