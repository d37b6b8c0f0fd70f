/*!
Command-line configuration.
*/
use std::path::PathBuf;

use clap::Parser;

pub const DEFAULT_ADDR: &str = "0.0.0.0:9696";
pub const DEFAULT_USERS_FILE: &str = "users.txt";
pub const DEFAULT_HISTORY_FILE: &str = "chat_history.txt";

/// A line-oriented chat server with accounts and a persistent history.
#[derive(Debug, Parser)]
#[command(author, version, long_about = None)]
pub struct Config {
    /// Address to listen on.
    #[arg(long, default_value = DEFAULT_ADDR)]
    pub addr: String,

    /// File of `username:password` records.
    #[arg(long, default_value = DEFAULT_USERS_FILE)]
    pub users: PathBuf,

    /// File the chat history is appended to.
    #[arg(long, default_value = DEFAULT_HISTORY_FILE)]
    pub history: PathBuf,
}
