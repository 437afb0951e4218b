//! pcloud-core - Personal cloud sync core
//!
//! This crate holds the local schema models, the libSQL-backed local store,
//! the durable action queue, the translation between local and remote
//! schemas, the backend contract with an in-memory reference backend, and
//! the orchestrator tying them together.

pub mod action_queue;
pub mod backend;
pub mod cloud;
pub mod config;
pub mod db;
pub mod error;
pub mod maintenance;
pub mod models;
pub mod mutex;
pub mod remote;
pub mod settings;
pub mod state;
pub mod storage;
pub mod translation;
pub mod util;

pub use cloud::{CloudAction, PersonalCloud, PersonalCloudOptions};
pub use error::{Error, Result};
