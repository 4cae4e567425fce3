use accounts_keys_helper::{ProxyClient, AUTHORIZED_KEYS_TIMEOUT};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

/// Prints a user's authorized SSH keys, one per line, for use as an SSH
/// `AuthorizedKeysCommand`.
#[derive(Parser, Debug)]
#[command(name = "authorized-keys", version, about)]
struct Cli {
    /// The account name to fetch keys for.
    username: String,

    /// Path of the accounts proxy's Unix-domain socket.
    #[arg(long, default_value = "/var/run/compute_accounts/sock")]
    socket_path: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let client = ProxyClient::with_timeout(&cli.socket_path, AUTHORIZED_KEYS_TIMEOUT);

    match client.get_account_info(&format!("get_authorized_keys {}", cli.username)) {
        Ok(keys) => {
            for key in keys {
                println!("{key}");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("authorized-keys: {err}");
            ExitCode::FAILURE
        }
    }
}
