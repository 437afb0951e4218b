//! Local libSQL database shared by the settings store, the object store and
//! the action queue

mod connection;
mod migrations;

pub use connection::{Database, SharedDatabase};
