pub mod common;
pub mod completions;
pub mod passive_data;
pub mod queue;
pub mod status;
pub mod sync;
