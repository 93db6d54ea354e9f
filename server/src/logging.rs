//! Daily log files
//!
//! Stderr stays the primary log sink. With a log directory configured the
//! same events are also written to `geosearch.<date>.log`, rotated daily.

use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use crate::error::{ServiceError, ServiceResult};

pub const LOG_FILE_PREFIX: &str = "geosearch";

/// Writer appending to a daily file in `dir`. Lines are flushed by a
/// background thread until the guard is dropped.
pub fn daily_file_writer(dir: &Path) -> ServiceResult<(NonBlocking, WorkerGuard)> {
    let unusable = |e: &dyn std::fmt::Display| {
        ServiceError::validation(format!("cannot log to {}: {}", dir.display(), e))
    };
    std::fs::create_dir_all(dir).map_err(|e| unusable(&e))?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(dir)
        .map_err(|e| unusable(&e))?;
    Ok(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_daily_file_writer() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("logs");

        let (mut writer, guard) = daily_file_writer(&logs).unwrap();
        writer.write_all(b"[usage] search lang=en\n").unwrap();
        drop(guard);

        let files: Vec<_> = std::fs::read_dir(&logs)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with("geosearch."), "{}", name);
        assert!(name.ends_with(".log"), "{}", name);
        let content = std::fs::read_to_string(&files[0]).unwrap();
        assert!(content.contains("[usage] search lang=en"));
    }

    #[test]
    fn test_unusable_log_dir() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = daily_file_writer(&file.path().join("logs")).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }
}
