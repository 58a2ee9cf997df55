//! unistore CLI - Command line interface for object storage operations.
//!
//! Every command takes unified identifiers such as `s3://bucket/key`,
//! `gcs://bucket/key` or `local://bucket/key`. Credentials come from the
//! provider variables (`S3_ACCESS_KEY`, `GCS_ACCESS_TOKEN`, ...).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use unistore_common::{ByteRange, PresignMethod};
use unistore_facade::{Payload, Storage, StorageConfig};
use unistore_transfer::TransferOptions;

#[derive(Parser)]
#[command(name = "unistore")]
#[command(about = "unistore - One interface for S3, R2, GCS, SFTP, FTP and local storage")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Abort the operation after this many seconds.
    #[arg(short, long)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download an object.
    Get {
        /// Object to read.
        uri: String,

        /// Destination file (default: stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Byte range `start-end` (end exclusive) or `start-`.
        #[arg(short, long)]
        range: Option<String>,
    },

    /// Upload a local file.
    Put {
        /// Source file.
        source: PathBuf,

        /// Destination object.
        uri: String,
    },

    /// List objects under a prefix.
    Ls {
        /// Prefix to list, e.g. `s3://bucket/logs/`.
        uri: String,
    },

    /// Delete an object.
    Rm {
        /// Object to delete.
        uri: String,
    },

    /// Show object metadata.
    Stat {
        /// Object to describe.
        uri: String,
    },

    /// Issue a time-limited URL.
    Presign {
        /// Object the URL grants access to.
        uri: String,

        /// HTTP method the URL is valid for.
        #[arg(short, long, value_enum, default_value = "get")]
        method: MethodArg,

        /// Validity in seconds.
        #[arg(short, long, default_value = "3600")]
        expires: u64,
    },

    /// Copy an object, across providers if needed.
    Cp {
        /// Source object.
        from: String,

        /// Destination object.
        to: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum MethodArg {
    Get,
    Put,
}

impl From<MethodArg> for PresignMethod {
    fn from(method: MethodArg) -> Self {
        match method {
            MethodArg::Get => PresignMethod::Get,
            MethodArg::Put => PresignMethod::Put,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &cli.config {
        Some(path) => StorageConfig::from_file(path)?,
        None => StorageConfig::default(),
    };
    let storage = Storage::new(config).context("Failed to set up storage adapters")?;
    let options = transfer_options(cli.timeout);

    match cli.command {
        Commands::Get { uri, output, range } => {
            cmd_get(&storage, &uri, output.as_deref(), range.as_deref(), options).await
        }

        Commands::Put { source, uri } => cmd_put(&storage, &source, &uri, options).await,

        Commands::Ls { uri } => cmd_ls(&storage, &uri, options).await,

        Commands::Rm { uri } => cmd_rm(&storage, &uri, options).await,

        Commands::Stat { uri } => cmd_stat(&storage, &uri, options).await,

        Commands::Presign {
            uri,
            method,
            expires,
        } => cmd_presign(&storage, &uri, method.into(), expires, options).await,

        Commands::Cp { from, to } => cmd_cp(&storage, &from, &to, options).await,
    }
}

/// Options cancelled by Ctrl-C and bounded by `--timeout`.
fn transfer_options(timeout: Option<u64>) -> TransferOptions {
    let mut options = TransferOptions::new();
    if let Some(secs) = timeout {
        options = options.with_timeout(Duration::from_secs(secs));
    }

    let cancel = options.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling transfer");
            cancel.cancel();
        }
    });
    options
}

/// Parse `start-end` (end exclusive) or `start-`.
fn parse_range(raw: &str) -> Result<ByteRange> {
    let (start, end) = raw
        .split_once('-')
        .with_context(|| format!("Invalid range '{}': expected start-end", raw))?;
    let start: u64 = start
        .trim()
        .parse()
        .with_context(|| format!("Invalid range start '{}'", start))?;
    let end = match end.trim() {
        "" => None,
        end => Some(
            end.parse::<u64>()
                .with_context(|| format!("Invalid range end '{}'", end))?,
        ),
    };
    if matches!(end, Some(end) if end < start) {
        anyhow::bail!("Invalid range '{}': end before start", raw);
    }
    Ok(ByteRange::new(start, end))
}

/// Download an object to a file or stdout.
async fn cmd_get(
    storage: &Storage,
    uri: &str,
    output: Option<&Path>,
    range: Option<&str>,
    options: TransferOptions,
) -> Result<()> {
    let range = range.map(parse_range).transpose()?;
    let mut stream = storage
        .get_with(uri, range, options)
        .await
        .with_context(|| format!("Failed to read {}", uri))?;

    let mut sink: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = match output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.with_context(|| format!("Failed to read {}", uri))?;
        sink.write_all(&chunk).await.context("Failed to write output")?;
        written += chunk.len() as u64;
    }
    sink.flush().await.context("Failed to write output")?;

    if let Some(path) = output {
        println!("Downloaded {} to {} ({} bytes)", uri, path.display(), written);
    }
    Ok(())
}

/// Upload a local file.
async fn cmd_put(storage: &Storage, source: &Path, uri: &str, options: TransferOptions) -> Result<()> {
    info!("Uploading {} to {}", source.display(), uri);

    let payload = Payload::from_file(source)
        .await
        .with_context(|| format!("Failed to read {}", source.display()))?;
    let descriptor = storage
        .put_with(uri, payload, options)
        .await
        .with_context(|| format!("Failed to upload {}", uri))?;

    let size = descriptor
        .size
        .map(|s| format!("{} bytes", s))
        .unwrap_or_else(|| "size unknown".to_string());
    println!("Uploaded {} ({})", descriptor.address, size);
    Ok(())
}

/// List objects under a prefix, one page at a time.
async fn cmd_ls(storage: &Storage, uri: &str, options: TransferOptions) -> Result<()> {
    let mut token: Option<String> = None;
    let mut count = 0usize;

    loop {
        let page = storage
            .list_with(uri, token.as_deref(), None, options.clone())
            .await
            .with_context(|| format!("Failed to list {}", uri))?;

        for item in &page.items {
            let size = item.size.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
            let modified = item
                .last_modified
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("{:>12}  {:19}  {}", size, modified, item.address);
        }
        count += page.items.len();

        match page.next_page_token {
            Some(next) if token.as_deref() != Some(next.as_str()) => token = Some(next),
            _ => break,
        }
    }

    if count == 0 {
        println!("No objects.");
    }
    Ok(())
}

/// Delete an object.
async fn cmd_rm(storage: &Storage, uri: &str, options: TransferOptions) -> Result<()> {
    let removed = storage
        .delete_with(uri, options)
        .await
        .with_context(|| format!("Failed to delete {}", uri))?;

    if removed {
        println!("Deleted {}", uri);
    } else {
        println!("Not found: {}", uri);
    }
    Ok(())
}

/// Print object metadata as JSON.
async fn cmd_stat(storage: &Storage, uri: &str, options: TransferOptions) -> Result<()> {
    let descriptor = storage
        .stat_with(uri, options)
        .await
        .with_context(|| format!("Failed to stat {}", uri))?;

    println!("{}", serde_json::to_string_pretty(&descriptor)?);
    Ok(())
}

/// Print a presigned URL.
async fn cmd_presign(
    storage: &Storage,
    uri: &str,
    method: PresignMethod,
    expires: u64,
    options: TransferOptions,
) -> Result<()> {
    let presigned = storage
        .presign_with(uri, method, Duration::from_secs(expires), options)
        .await
        .with_context(|| format!("Failed to presign {}", uri))?;

    println!("{}", presigned.url);
    info!("Valid for {} until {}", presigned.method.as_str(), presigned.expires_at);
    Ok(())
}

/// Copy an object.
async fn cmd_cp(storage: &Storage, from: &str, to: &str, options: TransferOptions) -> Result<()> {
    info!("Copying {} to {}", from, to);

    let descriptor = storage
        .copy_with(from, to, options)
        .await
        .with_context(|| format!("Failed to copy {} to {}", from, to))?;

    println!("Copied {} to {}", from, descriptor.address);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("10-20").unwrap(), ByteRange::new(10, Some(20)));
        assert_eq!(parse_range("5-").unwrap(), ByteRange::from_offset(5));
        assert!(parse_range("20-10").is_err());
        assert!(parse_range("abc").is_err());
        assert!(parse_range("x-1").is_err());
    }
}
