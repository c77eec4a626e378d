//! Database durability service: encrypted, compressed backups with
//! checksum verification, retention enforcement, recovery planning and
//! rehearsal, and scheduled health monitoring.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
