//! Wicket Server binary.
//!
//! # Usage
//!
//! ```bash
//! # Run the forum, production snapshot cadence, salted by a secret
//! wicket-server --addr 0.0.0.0:8080 --log data/main.txt -s correct-horse
//!
//! # Mint a signed cookie for identity 7 with the admin bit set, then exit
//! wicket-server --make 7,1 -s correct-horse
//!
//! # Snapshot the current log to a path, then exit
//! wicket-server --ss data/main.txt.snapshot --log data/main.txt
//! ```

use std::path::PathBuf;

use clap::Parser;
use sha2::{Digest, Sha256};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use wicket_core::Store;
use wicket_core::model::User;
use wicket_server::{Result, Server, ServerConfig, ServerError, SnapshotInterval};

/// Wicket anonymous image-board forum server
#[derive(Parser, Debug)]
#[command(name = "wicket-server")]
#[command(about = "Append-only threaded-post forum engine")]
#[command(version)]
struct Args {
    /// Listen address (reserved for the embedding HTTP layer; unused by
    /// this binary's background-only run loop)
    #[arg(long, default_value = "0.0.0.0:8080")]
    addr: String,

    /// Path to the main log file
    #[arg(long, default_value = "data/main.txt")]
    log: PathBuf,

    /// Emit a signed cookie for identity `ID,MASK[,N]`, then exit
    #[arg(long, value_name = "ID,MASK[,N]")]
    make: Option<String>,

    /// Write a snapshot to PATH, then exit
    #[arg(long, value_name = "PATH")]
    ss: Option<PathBuf>,

    /// Update the persisted CSRF-origin URL, then exit
    #[arg(long, value_name = "URL")]
    csrf: Option<String>,

    /// Salt / admin password. A non-default value also enables production
    /// mode (the 6-hour snapshot cadence instead of the 1-minute dev one).
    #[arg(short = 's', long, default_value = "dev")]
    secret: String,

    /// Thumbnail downscale target box size, in pixels
    #[arg(long, default_value_t = 256)]
    thumb_box: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    if std::env::var("f2_token").is_err() || std::env::var("f2_secret").is_err() {
        tracing::warn!("f2_token/f2_secret not set; external CAPTCHA verification is disabled");
    }

    let production = args.secret != "dev";
    let salt = derive_salt(&args.secret);

    if let Some(spec) = &args.make {
        print_cookie(spec, &salt)?;
        return Ok(());
    }

    if let Some(dest) = &args.ss {
        run_snapshot(&args.log, dest)?;
        return Ok(());
    }

    if let Some(url) = &args.csrf {
        update_csrf_url(&args.log, url)?;
        return Ok(());
    }

    tracing::info!(addr = %args.addr, log = %args.log.display(), production, "wicket-server starting");

    let interval = if production { SnapshotInterval::Production } else { SnapshotInterval::Development };
    let server = Server::start(ServerConfig {
        log_path: args.log.clone(),
        thumbnail_box_size: args.thumb_box,
        snapshot_interval: interval,
    })?;

    tracing::info!(topics = server.store().topics_count(), "store loaded");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    Ok(())
}

/// Derives the 16-byte salt from the `-s` secret: the first 16 bytes of its
/// SHA-256 digest.
fn derive_salt(secret: &str) -> [u8; 16] {
    let digest = Sha256::digest(secret.as_bytes());
    let mut salt = [0u8; 16];
    salt.copy_from_slice(&digest[..16]);
    salt
}

/// Parses `ID,MASK[,N]`, mints a fresh identity, and prints its signed
/// cookie value to stdout.
#[allow(clippy::print_stdout)]
fn print_cookie(spec: &str, salt: &[u8; 16]) -> Result<()> {
    let mut parts = spec.split(',');
    let id_num: u64 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ServerError::Store(wicket_core::StoreError::InvalidInput(format!("bad -make spec {spec:?}"))))?;
    let mask: u8 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ServerError::Store(wicket_core::StoreError::InvalidInput(format!("bad -make spec {spec:?}"))))?;
    let n: u32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);

    let user = User { id: id_num.to_be_bytes()[..8].try_into().unwrap_or([0; 8]), mask, posts: 0, n, created_at: 0, last_post_at: 0 };
    let hash = wicket_core::identity::compute_hash(&user, salt);
    let record = serde_json::json!({
        "id": user.id,
        "mask": user.mask,
        "posts": user.posts,
        "n": user.n,
        "created_at": user.created_at,
        "last_post_at": user.last_post_at,
        "hash": hash,
    });
    let cookie = record.to_string().replace(',', ";").replace('"', "'");
    println!("{cookie}");
    Ok(())
}

fn run_snapshot(log_path: &std::path::Path, dest: &std::path::Path) -> Result<()> {
    let store = Store::open(log_path)?;
    store.snapshot_to(dest)?;
    tracing::info!(dest = %dest.display(), "snapshot written");
    Ok(())
}

fn update_csrf_url(log_path: &std::path::Path, url: &str) -> Result<()> {
    let store = Store::open(log_path)?;
    let mut config = store.config();
    config.url = url.to_string();
    store.update_config(config)?;
    tracing::info!(url, "csrf-origin URL updated");
    Ok(())
}
