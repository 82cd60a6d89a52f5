//! Server command implementation

use std::path::Path;

use anyhow::{Context, Result};

use super::open_db;

pub async fn cmd_serve(
    db_path: &Path,
    data_dir: &Path,
    host: &str,
    port: u16,
    no_encrypt: bool,
    static_dir: Option<&Path>,
) -> Result<()> {
    println!("🚀 Starting Mailroom web server...");
    println!("   Database: {}", db_path.display());
    println!("   Data dir: {}", data_dir.display());
    println!("   Listening: http://{}:{}", host, port);
    if let Some(dir) = static_dir {
        println!("   Static files: {}", dir.display());
    }
    if no_encrypt {
        println!("   ⚠️  Encryption DISABLED (--no-encrypt)");
    }
    println!();
    println!("   Press Ctrl+C to stop");

    let db = open_db(db_path, no_encrypt)?;

    let allowed_origins: Vec<String> = std::env::var("MAILROOM_CORS_ORIGINS")
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let config = mailroom_server::ServerConfig { allowed_origins };

    let static_dir_str = static_dir
        .map(|p| p.to_str().context("static_dir path must be valid UTF-8"))
        .transpose()?;
    mailroom_server::serve(db, data_dir, host, port, static_dir_str, config).await?;

    Ok(())
}
