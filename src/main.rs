use anyhow::{bail, Context, Result};
use clap::Parser;
use ircline::config::{self, AppConfig};
use ircline::irc::Connector;
use ircline::logging;
use std::path::PathBuf;
use std::time::Duration;

/// How long to wait for the server to hang up after QUIT.
const QUIT_GRACE: Duration = Duration::from_secs(5);

/// Connect to one IRC server and print every line nothing else handles.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Server host, e.g. irc.libera.chat
    #[arg(long)]
    host: Option<String>,

    /// Server port
    #[arg(long)]
    port: Option<u16>,

    /// Nickname to register with
    #[arg(long)]
    nick: Option<String>,

    /// Config file (defaults to the platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Args {
    fn apply(self, cfg: &mut AppConfig) {
        if let Some(host) = self.host {
            cfg.server.host = host;
        }
        if let Some(port) = self.port {
            cfg.server.port = port;
        }
        if let Some(nick) = self.nick {
            cfg.server.nickname = nick;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config()?,
    };
    args.apply(&mut cfg);
    logging::init(&cfg.logging);

    if cfg.server.host.is_empty() {
        bail!("No server host given (use --host or set [server].host in the config)");
    }

    let mut conn = Connector::from_config(&cfg.connection)
        .connect(&cfg.server.host, cfg.server.port, &cfg.server.nickname)
        .await
        .with_context(|| format!("Failed to connect to {}:{}", cfg.server.host, cfg.server.port))?;

    // Dump every unhandled line to the terminal.
    let mut unhandled = conn
        .take_unhandled()
        .context("Unhandled stream already taken")?;
    let stamp_format = cfg.logging.timestamp_format.clone();
    tokio::spawn(async move {
        while let Some(message) = unhandled.recv().await {
            println!("{}", logging::transcript_line(&stamp_format, &message));
        }
    });

    tokio::select! {
        _ = conn.closed() => {}
        _ = tokio::signal::ctrl_c() => {
            if conn.quit(Some("Leaving")).await.is_ok()
                && tokio::time::timeout(QUIT_GRACE, conn.closed()).await.is_err()
            {
                tracing::warn!("server did not close the link after QUIT");
            }
            conn.close();
        }
    }

    Ok(())
}
