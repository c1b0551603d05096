pub mod branch;
pub mod commit;
pub mod log;
pub mod merge_base;
pub mod repo;
pub mod rev_parse;

use anyhow::Result;
use refgraph_core::{Config, RefManager, SqliteDatabase};
use std::path::{Path, PathBuf};

pub fn get_db_path(custom_path: Option<PathBuf>) -> Result<PathBuf> {
    match custom_path {
        Some(path) => Ok(path),
        None => Ok(std::env::current_dir()?.join(".refgraph").join("refgraph.db")),
    }
}

/// Open the store at `db_path`, reading `refgraph.toml` from its directory.
///
/// Only `create` may bring a new store into existence.
pub fn open_manager(db_path: &Path, create: bool) -> Result<RefManager<SqliteDatabase>> {
    let dir = db_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    if !db_path.exists() {
        if !create {
            anyhow::bail!(
                "No refgraph store at {}. Run 'refgraph repo create' first.",
                db_path.display()
            );
        }
        std::fs::create_dir_all(dir)?;
    }

    let config = Config::load(dir)?;
    let db = SqliteDatabase::open_with_config(db_path, config.storage.clone())?;
    Ok(RefManager::with_config(db, &config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_requires_existing_store() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("store").join("refgraph.db");

        assert!(open_manager(&db_path, false).is_err());
        assert!(open_manager(&db_path, true).is_ok());
        assert!(open_manager(&db_path, false).is_ok());
    }

    #[test]
    fn test_config_next_to_store_is_used() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(refgraph_core::config::CONFIG_FILE_NAME),
            "[iteration]\nprefetch_size = 3\n",
        )
        .unwrap();

        let manager = open_manager(&dir.path().join("refgraph.db"), true).unwrap();
        assert_eq!(3, manager.prefetch_size());
    }
}
