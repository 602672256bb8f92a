// CLI subcommand dispatch.

use clap::Subcommand;

pub mod login;
pub mod logout;
pub mod probe;
pub mod watch;

#[derive(Subcommand)]
pub enum Command {
    /// Join a document and print its viewers until interrupted
    Watch(watch::WatchArgs),
    /// Check that the presence handshake endpoint accepts unauthenticated requests
    Probe(probe::ProbeArgs),
    /// Store an access token in the OS keychain
    Login(login::LoginArgs),
    /// Remove the stored access token
    Logout(logout::LogoutArgs),
}

impl Command {
    /// Whether the command asked for JSON output.
    pub fn json(&self) -> bool {
        match self {
            Self::Watch(args) => args.json,
            Self::Probe(args) => args.json,
            Self::Login(args) => args.json,
            Self::Logout(args) => args.json,
        }
    }
}

pub async fn run(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Watch(args) => watch::run(args).await,
        Command::Probe(args) => probe::run(args).await,
        Command::Login(args) => login::run(args),
        Command::Logout(args) => logout::run(args),
    }
}
