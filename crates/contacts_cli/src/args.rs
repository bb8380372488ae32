use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Account and token administration for the contacts backend.
#[derive(Parser, Debug)]
#[command(name = "contacts")]
#[command(version, about = "Account and token tool for the contacts backend", long_about = None)]
pub struct Cli {
    /// TOML settings file; `CONTACTS_*` environment variables override it
    #[arg(short = 'c', long = "config", env = "CONTACTS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level written to stderr (trace|debug|info|warn|error)
    #[arg(long = "log-level", default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an account and print its confirmation token
    Signup {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "CONTACTS_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Check credentials and print an access/refresh pair
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "CONTACTS_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Exchange a refresh token for a new pair
    Refresh {
        #[arg(long)]
        token: String,
    },
    /// Print the account behind an access token
    Whoami {
        #[arg(long)]
        token: String,
    },
    /// Confirm an email with its confirmation token
    Confirm {
        #[arg(long)]
        token: String,
    },
    /// Issue a fresh confirmation token for an unconfirmed account
    RequestEmail {
        #[arg(long)]
        email: String,
    },
    /// Set the avatar URL of the account behind an access token
    Avatar {
        #[arg(long)]
        token: String,
        #[arg(long)]
        url: String,
    },
    /// Print the bcrypt hash of a password
    HashPassword {
        #[arg(long, env = "CONTACTS_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Decode and validate a token without checking its scope
    Inspect {
        #[arg(long)]
        token: String,
    },
}
