//! Content store commands

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use mailroom_core::db::Database;
use mailroom_core::store::ContentStore;

pub async fn cmd_blobs_put(db: Database, data_dir: &Path, file: &Path) -> Result<()> {
    let bytes =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let store = ContentStore::from_env(db, data_dir)?;

    let result = store.put(&bytes).await?;

    println!("{}", result.hash);
    if result.stored {
        println!(
            "   stored {} bytes ({} via {})",
            result.size,
            result.location.as_str(),
            store.backend_name()
        );
    } else {
        println!("   already stored, reused");
    }
    Ok(())
}

pub async fn cmd_blobs_get(
    db: Database,
    data_dir: &Path,
    hash: &str,
    out: Option<&Path>,
) -> Result<()> {
    let store = ContentStore::from_env(db, data_dir)?;
    let bytes = store.get(hash).await?;

    match out {
        Some(path) => {
            std::fs::write(path, &bytes)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("✅ Wrote {} bytes to {}", bytes.len(), path.display());
        }
        None => std::io::stdout().write_all(&bytes)?,
    }
    Ok(())
}
