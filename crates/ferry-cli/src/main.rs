//! Ferry CLI
//!
//! Share a directory with chat peers through a TLS relay.

mod config;
mod progress;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use ferry_dcc::{Accept, Negotiation, Offer};
use ferry_relay::{RelayClient, RelayError, SessionId};
use tokio::fs::{File, OpenOptions};
use tracing_subscriber::EnvFilter;

use config::Config;
use progress::{TransferProgress, format_bytes};

/// Ferry - relayed file sharing for chat peers
#[derive(Parser)]
#[command(name = "ferry")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Offer a shared file to a peer through the relay
    Get {
        /// File name inside the shared directory
        #[arg(required = true)]
        file: String,

        /// Print the offer without control-byte wrapping
        #[arg(long)]
        plain: bool,
    },

    /// Receive a file from a peer into the shared directory
    Upload {
        /// Name to store the file under
        name: Option<String>,

        /// Print the offer without control-byte wrapping
        #[arg(long)]
        plain: bool,
    },

    /// List shared files
    List {
        /// Glob pattern on file names (e.g. "*.pdf")
        pattern: Option<String>,
    },

    /// Decode a negotiation message
    Parse {
        /// Message text, wrapped or plain
        #[arg(required = true)]
        message: String,
    },

    /// Produce the acknowledgement for a resume request
    Accept {
        /// File being resumed
        file: String,

        /// Port from the resume request
        port: u16,

        /// Byte offset from the resume request
        position: u64,

        /// Print without control-byte wrapping
        #[arg(long)]
        plain: bool,
    },

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match (&cli.command, &cli.config) {
        (Commands::Init { .. }, _) => Config::default(),
        (_, Some(path)) => Config::load(path)?,
        (_, None) => Config::load_or_default()?,
    };
    init_logging(cli.verbose, &config.logging.level);

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Get { file, plain } => {
            offer_file(&file, plain, &config).await?;
        }
        Commands::Upload { name, plain } => {
            receive_upload(name.as_deref(), plain, &config).await?;
        }
        Commands::List { pattern } => {
            list_files(pattern.as_deref(), &config)?;
        }
        Commands::Parse { message } => {
            describe_message(&message);
        }
        Commands::Accept {
            file,
            port,
            position,
            plain,
        } => {
            let accept = Negotiation::from(Accept {
                filename: file,
                port,
                position,
            });
            println!("{}", render(&accept, plain));
        }
        Commands::Init { force } => {
            let path = cli.config.unwrap_or_else(Config::default_path);
            write_default_config(&path, force)?;
        }
    }

    Ok(())
}

/// Logs go to stderr; stdout carries negotiation text only
fn init_logging(verbose: bool, level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn render(message: &Negotiation, plain: bool) -> String {
    if plain {
        message.to_string()
    } else {
        message.to_ctcp()
    }
}

fn relay_client(config: &Config) -> anyhow::Result<RelayClient> {
    let credentials = config.credentials();
    let username = credentials.username().to_string();
    let client = RelayClient::new(&config.relay.url, &config.tls_options(), credentials)
        .context("creating relay client")?;
    tracing::debug!("using relay {}:{} as {username}", client.host(), client.port());
    Ok(client.with_transfer_options(config.transfer_options()))
}

/// Register a download and stream a shared file to whoever collects it
async fn offer_file(file: &str, plain: bool, config: &Config) -> anyhow::Result<()> {
    let root = ferry_files::resolve_root(&config.share.dir)?;
    let path = ferry_files::safe_path(&root, file)
        .with_context(|| format!("invalid path: {file}"))?;

    let source = File::open(&path)
        .await
        .with_context(|| format!("file not found: {file}"))?;
    let meta = source.metadata().await?;
    if meta.is_dir() {
        anyhow::bail!("not a file: {file}");
    }
    let size = meta.len();
    let max_bytes = config.share.max_file_bytes;
    if max_bytes > 0 && size > max_bytes {
        anyhow::bail!(
            "file too large: {} (limit {})",
            format_bytes(size),
            format_bytes(max_bytes)
        );
    }

    let name = ferry_files::sanitize_filename(file);
    let client = relay_client(config)?;
    let registration = client.register_download(&SessionId::generate(), &name).await?;

    let offer = Negotiation::from(Offer {
        filename: name.clone(),
        host: registration.host,
        port: registration.port,
        size: Some(size),
    });
    println!("{}", render(&offer, plain));

    let mut session = registration.session;
    let progress = TransferProgress::new(size, &name);
    let mut source = progress.wrap_read(source);

    let result = tokio::select! {
        sent = session.send_file(&mut source, max_bytes) => sent.map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => Err(anyhow::anyhow!("interrupted")),
    };
    let closed = session.close().await;

    match result {
        Ok(sent) => {
            closed?;
            progress.finish_with_message(format!("Sent {name} ({})", format_bytes(sent)));
            Ok(())
        }
        Err(err) => {
            progress.abandon();
            Err(err.context(format!("sending {name}")))
        }
    }
}

/// Register an upload and store whatever the peer sends.
///
/// Bytes land in a hidden partial file next to the destination, which only
/// replaces the destination once the whole upload has arrived.
async fn receive_upload(name: Option<&str>, plain: bool, config: &Config) -> anyhow::Result<()> {
    let name = ferry_files::sanitize_filename(name.unwrap_or_default());
    let root = ferry_files::resolve_root(&config.share.dir)?;
    let dest = ferry_files::safe_path(&root, &name)
        .with_context(|| format!("invalid filename: {name}"))?;

    let client = relay_client(config)?;
    let session_id = SessionId::generate();
    let registration = client.register_upload_stream(&session_id, &name).await?;

    let offer = Negotiation::from(Offer {
        filename: name.clone(),
        host: registration.host,
        port: registration.port,
        size: None,
    });
    println!("{}", render(&offer, plain));
    tracing::info!("accept the offer to upload as {name}");

    let mut stream = registration.session;
    let partial = ferry_files::partial_path(&dest, &session_id.to_string());
    let file = match OpenOptions::new().write(true).create_new(true).open(&partial).await {
        Ok(file) => file,
        Err(err) => {
            stream.close().await?;
            return Err(err).with_context(|| format!("could not create {}", partial.display()));
        }
    };

    let progress = TransferProgress::unbounded(&name);
    let mut sink = progress.wrap_write(file);
    let max_bytes = config.share.max_upload_bytes;

    let result = tokio::select! {
        received = stream.copy_to(&mut sink, max_bytes) => received.map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => Err(anyhow::anyhow!("interrupted")),
    };
    drop(sink);
    if let Err(err) = stream.close().await {
        tracing::debug!("closing upload stream: {err}");
    }

    let result = match result {
        Ok(received) => tokio::fs::rename(&partial, &dest)
            .await
            .map(|()| received)
            .with_context(|| format!("could not move upload into {}", dest.display())),
        Err(err) => Err(err),
    };

    match result {
        Ok(received) => {
            progress.finish_with_message(format!("Received {name} ({})", format_bytes(received)));
            Ok(())
        }
        Err(err) => {
            progress.abandon();
            if let Some(RelayError::LimitExceeded { limit }) = err.downcast_ref::<RelayError>() {
                tracing::warn!("upload of {name} exceeded {}; discarding", format_bytes(*limit));
            }
            remove_partial(&partial).await;
            Err(err.context(format!("receiving {name}")))
        }
    }
}

fn list_files(pattern: Option<&str>, config: &Config) -> anyhow::Result<()> {
    let root = ferry_files::resolve_root(&config.share.dir)?;
    let entries = ferry_files::list_dir(&root, pattern)?;

    if entries.is_empty() {
        println!("No files.");
        return Ok(());
    }
    for entry in entries {
        if entry.is_dir {
            println!("{}/", entry.name);
        } else {
            println!("{:<40} {:>12}", entry.name, format_bytes(entry.size));
        }
    }
    Ok(())
}

fn describe_message(message: &str) {
    match ferry_dcc::parse(message) {
        Some(Negotiation::Offer(offer)) => {
            println!("Offer: {}", offer.filename);
            println!("  Host: {}", offer.host);
            println!("  Port: {}", offer.port);
            match offer.size {
                Some(size) => println!("  Size: {} ({size} bytes)", format_bytes(size)),
                None => println!("  Size: unknown"),
            }
        }
        Some(Negotiation::Resume(resume)) => {
            println!("Resume: {}", resume.filename);
            println!("  Port: {}", resume.port);
            println!("  Position: {}", resume.position);
            println!("  Reply: {}", Negotiation::from(resume.accept()));
        }
        Some(Negotiation::Accept(accept)) => {
            println!("Accept: {} at {}", accept.filename, accept.position);
        }
        None => println!("Ignored: not a negotiation message"),
    }
}

fn write_default_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    Config::default().save(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
