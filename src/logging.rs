// src/logging.rs
//
// Timestamped stderr logging with an optional mirror file.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Name of the symlink that always points at the newest log file.
const CURRENT_LOG_LINK: &str = "hmi-link.log";

/// Mirror file for `tlog!`. When `Some`, every line also lands here.
#[doc(hidden)]
pub static LOG_FILE: Mutex<Option<std::fs::File>> = Mutex::new(None);

/// Current local time in the `HH:MM:SS.mmm` form used as the line prefix.
#[doc(hidden)]
pub fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S%.3f").to_string()
}

/// Start mirroring log output into a timestamped file under `log_dir`.
/// Returns the path of the file that was opened.
pub fn init_file_logging(log_dir: &Path) -> Result<PathBuf, String> {
    std::fs::create_dir_all(log_dir)
        .map_err(|e| format!("Failed to create log dir {}: {}", log_dir.display(), e))?;

    let filename = chrono::Local::now()
        .format("%Y%m%d-%H%M%S-hmi-link.log")
        .to_string();
    let log_path = log_dir.join(&filename);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| format!("Failed to create log file: {}", e))?;

    #[cfg(unix)]
    {
        let link = log_dir.join(CURRENT_LOG_LINK);
        let _ = std::fs::remove_file(&link);
        if let Err(e) = std::os::unix::fs::symlink(&filename, &link) {
            eprintln!("{} [logging] Failed to create {} symlink: {}", timestamp(), CURRENT_LOG_LINK, e);
        }
    }

    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(file);
    }

    // Plain eprintln: tlog! would mirror this into the file it describes.
    eprintln!("{} [logging] File logging started: {}", timestamp(), log_path.display());

    Ok(log_path)
}

/// Stop mirroring and close the log file, if one is open.
pub fn stop_file_logging() {
    if let Ok(mut guard) = LOG_FILE.lock() {
        if guard.take().is_some() {
            eprintln!("{} [logging] File logging stopped", timestamp());
        }
    }
}

/// Timestamped logging macro.
/// Prepends `HH:MM:SS.mmm` local time to every message written to stderr,
/// and appends the same line to the log file while file logging is active.
#[macro_export]
macro_rules! tlog {
    ($($arg:tt)*) => {{
        use std::io::Write as _;
        let msg = format!("{} {}", $crate::logging::timestamp(), format_args!($($arg)*));
        eprintln!("{}", msg);
        if let Ok(mut guard) = $crate::logging::LOG_FILE.lock() {
            if let Some(ref mut f) = *guard {
                let _ = writeln!(f, "{}", msg);
            }
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_shape() {
        let ts = timestamp();
        // HH:MM:SS.mmm
        assert_eq!(ts.len(), 12);
        assert_eq!(&ts[2..3], ":");
        assert_eq!(&ts[8..9], ".");
    }

    #[test]
    fn test_file_logging_mirrors_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = init_file_logging(dir.path()).unwrap();
        crate::tlog!("[test] mirrored line {}", 42);
        stop_file_logging();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("[test] mirrored line 42"));

        #[cfg(unix)]
        assert!(dir.path().join(CURRENT_LOG_LINK).symlink_metadata().is_ok());
    }
}
