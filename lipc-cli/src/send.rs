//! `lipc send`: one exchange from the command line.

use std::fmt::Write as _;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use lipc::{Client, Config, Message};

#[derive(clap::Args)]
pub struct SendArgs {
    /// Socket path of the server.
    path: PathBuf,

    /// Header text.
    header: String,

    /// Message text, or `-` to read the message bytes from stdin.
    message: String,

    /// Print the response as lowercase hex.
    #[arg(long)]
    hex: bool,
}

impl SendArgs {
    pub fn run(self, config: Config) -> Result<()> {
        let message = if self.message == "-" {
            let mut buf = Vec::new();
            io::stdin()
                .read_to_end(&mut buf)
                .context("failed to read message from stdin")?;
            Message::from(buf)
        } else {
            Message::from(self.message)
        };

        let client = Client::with_config(&self.path, config);
        let response = client.send(&Message::from(self.header), &message);
        if response.is_error() {
            bail!("{}", response.as_str());
        }

        let mut out = io::stdout().lock();
        if self.hex {
            writeln!(out, "{}", hex(response.as_bytes()))?;
        } else {
            out.write_all(response.as_bytes())?;
            if !response.as_bytes().ends_with(b"\n") && !response.is_empty() {
                writeln!(out)?;
            }
        }
        Ok(())
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}
