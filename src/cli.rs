//! Command-line interface definition

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use nimbus::protocol;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Nimbus - client for the Cloud9 remote filesystem"
)]
pub struct Args {
    /// Server host
    #[arg(long, env = "NIMBUS_HOST")]
    pub host: String,

    /// Server port
    #[arg(long, env = "NIMBUS_PORT", default_value_t = protocol::DEFAULT_PORT)]
    pub port: u16,

    /// Secure the connection with TLS (trust-on-first-use pinning)
    #[arg(long)]
    pub tls: bool,

    /// Login name (password comes from NIMBUS_PASSWORD or a prompt)
    #[arg(short, long, env = "NIMBUS_LOGIN")]
    pub login: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the node id of a home directory
    Home {
        /// User whose home to look up (default: your own)
        user: Option<String>,
    },
    /// List a directory
    Ls { path: String },
    /// Show node metadata, owner and group
    Stat { path: String },
    /// Create a remote directory
    Mkdir { path: String },
    /// Remove a node
    Rm {
        path: String,
        /// Delete directories and their contents bottom-up
        #[arg(short, long)]
        recursive: bool,
    },
    /// Move a node into another directory
    Mv { src: String, dest_dir: String },
    /// Rename a node in place
    Rename { path: String, new_name: String },
    /// Download a remote file
    Get { remote: String, local: PathBuf },
    /// Upload a local file into a remote directory
    Put { local: PathBuf, dest_dir: String },
    /// List your group's members
    Members,
    /// Invite a user into your group
    Invite { user: String },
    /// Remove a user from your group
    Kick { user: String },
}
