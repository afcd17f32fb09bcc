//! CLI command handlers.

mod archive;
mod check;
mod search;

pub use archive::run_archive_command;
pub use check::run_check_command;
pub use search::run_search_command;
