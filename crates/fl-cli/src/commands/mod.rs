//! CLI subcommand implementations.

pub mod event;
pub mod events;
pub mod report;
pub mod status;
pub mod sync;
pub mod track;
pub mod util;
