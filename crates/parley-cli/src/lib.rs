pub mod commands;
pub mod error;
pub mod output;

pub use commands::{AskCommand, ChatCommand, ConfigCommand};
pub use error::{CliError, CliResult};
pub use output::{OutputFormat, print_stream, secret_status, truncate_string};
