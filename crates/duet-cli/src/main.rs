use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "duet")]
#[command(about = "Two-party chat over a local document store")]
struct Cli {
    /// Data directory (defaults to the platform data dir)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create an account and sign in
    SignUp {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "")]
        about: String,
    },

    /// Sign in with email and password
    SignIn {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },

    /// Sign in through an external provider (e.g. github)
    SignInWith { provider: String, subject: String },

    /// Sign out and drop the persisted session
    SignOut,

    /// Show the signed-in user
    Whoami,

    /// List all users
    Users,

    /// Find a user by username
    Find { username: String },

    /// Start a conversation with a user
    Add { username: String },

    /// List conversations, newest activity first
    Chats,

    /// Open a conversation: print its messages and mark it seen
    Open { username: String },

    /// Send a text message
    Send { username: String, text: Vec<String> },

    /// Send a file as an attachment
    SendFile { username: String, path: PathBuf },

    /// Hide a conversation from the list (soft delete)
    Hide { username: String },

    /// Block a user
    Block { username: String },

    /// Unblock a user
    Unblock { username: String },

    /// Show or edit the profile
    Profile {
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        about: Option<String>,
        #[arg(long)]
        avatar: Option<PathBuf>,
    },

    /// List attachments shared in a conversation
    Media { username: String },

    /// Follow the chat list (and optionally one conversation) live
    Watch { username: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = cli.data_dir.unwrap_or_else(commands::default_data_dir);
    commands::run(data_dir, cli.command).await
}
