//! On-disk schema versioning
//!
//! The version is stored under `_db_version` as a little-endian u32. A fresh
//! database is stamped with the current version; a database written by a
//! newer build is refused rather than misread.

use crate::error::{Result, StoreError};
use rocksdb::DB;

/// Database version stored in metadata
pub(crate) const DB_VERSION_KEY: &[u8] = b"_db_version";
pub const CURRENT_VERSION: u32 = 1;

/// Read the stored schema version, if any
pub(crate) fn read_version(db: &DB) -> Result<Option<u32>> {
    match db.get(DB_VERSION_KEY)? {
        Some(bytes) => {
            let bytes_slice: &[u8] = bytes.as_ref();
            let version_bytes: [u8; 4] = bytes_slice
                .try_into()
                .map_err(|_| StoreError::schema("invalid version format"))?;
            Ok(Some(u32::from_le_bytes(version_bytes)))
        }
        None => Ok(None),
    }
}

/// Stamp a fresh database or verify an existing one
pub(crate) fn ensure_schema(db: &DB, has_data: bool) -> Result<u32> {
    match read_version(db)? {
        Some(version) if version > CURRENT_VERSION => Err(StoreError::schema(format!(
            "database version {} is newer than supported version {}",
            version, CURRENT_VERSION
        ))),
        Some(version) => {
            log::debug!(
                "Database version: {} (current: {})",
                version,
                CURRENT_VERSION
            );
            Ok(version)
        }
        None => {
            if has_data {
                log::warn!(
                    "Database has records but no version key, stamping v{}",
                    CURRENT_VERSION
                );
            } else {
                log::info!("Initializing fresh database at v{}", CURRENT_VERSION);
            }
            db.put(DB_VERSION_KEY, CURRENT_VERSION.to_le_bytes())?;
            db.flush()?;
            Ok(CURRENT_VERSION)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocksdb::Options;
    use tempfile::TempDir;

    fn open(path: &std::path::Path) -> DB {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        DB::open(&opts, path).unwrap()
    }

    #[test]
    fn test_fresh_database_is_stamped() {
        let temp_dir = TempDir::new().unwrap();
        let db = open(temp_dir.path());

        assert_eq!(read_version(&db).unwrap(), None);
        assert_eq!(ensure_schema(&db, false).unwrap(), CURRENT_VERSION);
        assert_eq!(read_version(&db).unwrap(), Some(CURRENT_VERSION));
        // Second call is a no-op
        assert_eq!(ensure_schema(&db, true).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_newer_version_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let db = open(temp_dir.path());
        db.put(DB_VERSION_KEY, (CURRENT_VERSION + 1).to_le_bytes())
            .unwrap();

        let err = ensure_schema(&db, false).unwrap_err();
        assert!(matches!(err, StoreError::Schema(_)));
    }

    #[test]
    fn test_malformed_version_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let db = open(temp_dir.path());
        db.put(DB_VERSION_KEY, b"xy").unwrap();

        assert!(matches!(read_version(&db), Err(StoreError::Schema(_))));
    }
}
