pub mod core;
pub mod directory;
pub mod schedule;
pub mod schedule_import;
