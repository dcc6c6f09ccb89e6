use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use datachat_core::{
    client::DataChatClient, config::Config, conversation::Conversation, key_file::KeyFile,
    stream::settled_text,
};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(author, version, about = "Chat with an uploaded CSV/XLSX dataset", long_about = None)]
struct Cli {
    /// Config file (JSON or TOML); defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the backend origin from the config
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// Override where the dataset key is stored
    #[arg(long, global = true)]
    key_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a CSV or XLSX file and remember its dataset key
    Upload {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Ask a single question (streams the reply live to stderr)
    Chat {
        #[arg(short, long, help = "Message from the user")]
        message: String,
        /// Continue an earlier backend session
        #[arg(long)]
        session_id: Option<String>,
    },
    /// Interactive chat; `/new` starts over, `/file <path>` switches dataset, `/quit` exits
    Repl,
    /// Forget the stored dataset key
    Forget,
}

/// Prints the growing reply to stderr, only ever appending.
///
/// A trailing piece that may still turn out to be the completion marker is not
/// printed until the next update settles it.
struct LivePrinter {
    marker: String,
    printed: String,
}

impl LivePrinter {
    fn new(marker: &str) -> Self {
        Self {
            marker: marker.to_string(),
            printed: String::new(),
        }
    }

    /// Text to append for this update, if any.
    fn advance(&mut self, text: &str) -> Option<String> {
        let settled = settled_text(text, &self.marker);
        let suffix = settled.strip_prefix(self.printed.as_str())?;
        if suffix.is_empty() {
            return None;
        }
        let suffix = suffix.to_string();
        self.printed = settled.to_string();
        Some(suffix)
    }

    fn update(&mut self, text: &str) {
        if let Some(suffix) = self.advance(text) {
            eprint!("{suffix}");
            io::stderr().flush().ok();
        }
    }

    fn end(&mut self) {
        if !self.printed.is_empty() {
            eprintln!();
        }
        self.printed.clear();
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut cfg = match &cli.config {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(base) = &cli.base_url {
        cfg.api.base_url = base.clone();
    }
    if let Some(kf) = &cli.key_file {
        cfg.session.key_file = kf.display().to_string();
    }
    tracing::debug!(base_url = %cfg.api.base_url, key_file = %cfg.session.key_file, "config loaded");
    Ok(cfg)
}

async fn upload(client: &DataChatClient, keys: &KeyFile, file: &Path) -> anyhow::Result<String> {
    let resp = client
        .upload(file)
        .await
        .with_context(|| format!("Upload failed: {}", file.display()))?;
    keys.save(&resp.redis_key)?;
    tracing::info!(file = %file.display(), key_file = %keys.path().display(), "dataset key stored");
    Ok(resp.redis_key)
}

async fn turn(
    conv: &mut Conversation,
    client: &DataChatClient,
    marker: &str,
    message: &str,
) -> anyhow::Result<()> {
    let mut live = LivePrinter::new(marker);
    let result = conv.send(client, message, |t| live.update(t)).await;
    live.end();
    let payload = result.context("Chat failed")?;
    println!("{}", payload.final_response);
    Ok(())
}

async fn repl(
    mut conv: Conversation,
    client: &DataChatClient,
    keys: &KeyFile,
    marker: &str,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprint!("> ");
    io::stderr().flush().ok();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line == "/quit" {
            break;
        } else if line == "/new" {
            conv.reset();
            tracing::debug!("conversation reset");
            eprintln!("[new conversation]");
        } else if let Some(path) = line.strip_prefix("/file ") {
            keys.clear()?;
            conv.clear_key();
            match upload(client, keys, Path::new(path.trim())).await {
                Ok(key) => {
                    conv.replace_key(key);
                    eprintln!("[file processed successfully]");
                }
                Err(e) => {
                    tracing::warn!(error = %format!("{e:#}"), "upload failed");
                    eprintln!("{e:#}");
                }
            }
        } else if !line.is_empty() {
            if let Err(e) = turn(&mut conv, client, marker, line).await {
                eprintln!("{e:#}");
            }
        }
        eprint!("> ");
        io::stderr().flush().ok();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = load_config(&cli)?;
    let client = DataChatClient::from_config(&cfg)?;
    let keys = KeyFile::new(&cfg.session.key_file);

    match cli.command {
        Commands::Upload { file } => {
            let key = upload(&client, &keys, &file).await?;
            eprintln!("File processed successfully!");
            println!("{key}");
        }
        Commands::Chat {
            message,
            session_id,
        } => {
            let key = keys.load()?.unwrap_or_default();
            let mut conv = Conversation::new(key);
            conv.resume_session(session_id);
            turn(&mut conv, &client, &cfg.stream.marker, &message).await?;
            if let Some(sid) = conv.session_id() {
                eprintln!("[session: {sid}]");
            }
        }
        Commands::Repl => {
            let key = keys.load()?.unwrap_or_default();
            let conv = Conversation::new(key);
            if conv.dataset_key().is_none() {
                eprintln!("No dataset key stored; use `/file <path>` to upload one.");
            }
            repl(conv, &client, &keys, &cfg.stream.marker).await?;
        }
        Commands::Forget => {
            keys.clear()?;
            tracing::info!(key_file = %keys.path().display(), "dataset key cleared");
            eprintln!("[dataset key cleared: {}]", keys.path().display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_printer_never_prints_a_marker_fragment() {
        let mut live = LivePrinter::new("FINAL_ANSWER");
        let printed: String = ["Hello", "Hello world FINAL", "Hello world "]
            .into_iter()
            .filter_map(|t| live.advance(t))
            .collect();
        assert_eq!(printed, "Hello world ");
    }

    #[test]
    fn live_printer_releases_text_that_is_not_the_marker() {
        let mut live = LivePrinter::new("FINAL_ANSWER");
        assert_eq!(live.advance("the FINAL").as_deref(), Some("the "));
        assert_eq!(live.advance("the FINAL").as_deref(), None);
        assert_eq!(live.advance("the FINAL score").as_deref(), Some("FINAL score"));
    }
}
