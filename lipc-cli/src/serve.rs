//! `lipc serve`: answer exchanges until interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use lipc::{Config, Message, Server};
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::flag;
use tracing::{debug, info};

/// How often the signal watcher checks the shutdown flag.
const WATCH_INTERVAL: Duration = Duration::from_millis(100);

#[derive(clap::Args)]
pub struct ServeArgs {
    /// Socket path to bind.
    path: PathBuf,

    /// Reply with this text instead of echoing the message.
    #[arg(long)]
    reply: Option<String>,

    /// Exit after this many successful exchanges.
    #[arg(long, value_name = "N")]
    count: Option<u64>,
}

impl ServeArgs {
    pub fn run(self, config: Config) -> Result<()> {
        let server = Server::with_config(&self.path, config);
        if let Some(e) = server.init_error() {
            bail!("cannot serve on {}: {e}", self.path.display());
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        flag::register(SIGINT, Arc::clone(&shutdown)).context("failed to register SIGINT")?;
        flag::register(SIGTERM, Arc::clone(&shutdown)).context("failed to register SIGTERM")?;
        let finished = AtomicBool::new(false);

        let served = thread::scope(|s| {
            s.spawn(|| {
                while !finished.load(Ordering::Relaxed) {
                    if shutdown.load(Ordering::Relaxed) {
                        server.stop_listening();
                        return;
                    }
                    thread::sleep(WATCH_INTERVAL);
                }
            });
            let served = self.serve(&server, &shutdown);
            finished.store(true, Ordering::Relaxed);
            served
        });

        info!(served, "shutting down");
        Ok(())
    }

    /// Runs `listen` until the count is reached or a signal arrives.
    fn serve(&self, server: &Server, shutdown: &AtomicBool) -> u64 {
        let mut served = 0;
        while self.count.is_none_or(|n| served < n) && !shutdown.load(Ordering::Relaxed) {
            let done = server.listen(|header, message| self.respond(header, message));
            if !done.is_error() {
                served += 1;
            }
        }
        served
    }

    fn respond(&self, header: &Message, message: &Message) -> Message {
        if header.is_error() {
            debug!(error = message.as_str(), "listen failed");
            return Message::empty();
        }
        info!(header = header.as_str(), bytes = message.size(), "request");
        match &self.reply {
            Some(text) => Message::from(text.as_str()),
            None => Message::from(message.as_bytes()),
        }
    }
}
