//! `mailestctl`: a thin control client for `mailestd`'s Unix-domain control
//! socket (§6). Connects, sends one command line, prints whatever comes
//! back up to the blank-line terminator, and exits.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "mailestctl", about = "Control client for the mailestd search daemon")]
struct Cli {
    /// Path to the daemon's control socket. Defaults to `$HOME/Mail/.mailest.sock`.
    #[arg(short = 's', long = "socket")]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: CtlCommand,
}

#[derive(Debug, Subcommand)]
enum CtlCommand {
    /// Full-text search the index.
    Search { phrase: Vec<String> },
    /// Reconstruct a thread from a Message-Id.
    Smew { msgid: String, folder: Option<String> },
    /// Re-scan a folder and update the index.
    Update { folder: String },
    /// Wait for the daemon's catalogue/index sync to complete.
    Sync,
}

fn default_socket() -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    home.join("Mail").join(".mailest.sock")
}

fn main() {
    let cli = Cli::parse();
    let socket_path = cli.socket.unwrap_or_else(default_socket);

    let line = match &cli.command {
        CtlCommand::Search { phrase } => format!("search {}\n", phrase.join(" ")),
        CtlCommand::Smew { msgid, folder } => match folder {
            Some(f) => format!("smew {msgid} {f}\n"),
            None => format!("smew {msgid}\n"),
        },
        CtlCommand::Update { folder } => format!("update {folder}\n"),
        CtlCommand::Sync => "sync\n".to_string(),
    };

    let mut stream = match UnixStream::connect(&socket_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("mailestctl: failed to connect to {}: {e}", socket_path.display());
            std::process::exit(1);
        }
    };

    if let Err(e) = stream.write_all(line.as_bytes()) {
        eprintln!("mailestctl: failed to send command: {e}");
        std::process::exit(1);
    }

    let mut reader = BufReader::new(stream);
    loop {
        let mut buf = String::new();
        match reader.read_line(&mut buf) {
            Ok(0) => break,
            Ok(_) => {
                if buf == "\n" {
                    break;
                }
                print!("{buf}");
            }
            Err(e) => {
                eprintln!("mailestctl: read error: {e}");
                std::process::exit(1);
            }
        }
    }
}
