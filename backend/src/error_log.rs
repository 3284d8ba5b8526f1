//! Server error log
//!
//! Each server-side failure is written to its own file under
//! `{log_dir}/error/{YYYY-MM-DD}/{YYMMDD-HHMMSS}-{6alnum}.log`. The file name
//! is handed back to the client as an opaque reference for the operator.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use axum::http::StatusCode;
use chrono::Local;
use serde_json::json;

static ERROR_LOG_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Set the log root once at startup; later calls are ignored
pub fn init(log_dir: &Path) {
    let _ = ERROR_LOG_DIR.set(log_dir.join("error"));
}

fn root() -> PathBuf {
    ERROR_LOG_DIR
        .get()
        .cloned()
        .unwrap_or_else(|| PathBuf::from("static/log/error"))
}

/// Write one error record and return its file name, `None` if the write failed
pub fn write(status: StatusCode, code: &str, message: &str) -> Option<String> {
    write_in(&root(), status, code, message)
}

pub(crate) fn write_in(
    root: &Path,
    status: StatusCode,
    code: &str,
    message: &str,
) -> Option<String> {
    let now = Local::now();
    let dir = root.join(now.format("%Y-%m-%d").to_string());
    let file_name = format!(
        "{}-{}.log",
        now.format("%y%m%d-%H%M%S"),
        shared::random_alphanumeric(6)
    );

    let record = json!({
        "timestamp": now.to_rfc3339(),
        "status": status.as_u16(),
        "code": code,
        "message": message,
    });

    let result = std::fs::create_dir_all(&dir)
        .and_then(|_| std::fs::write(dir.join(&file_name), format!("{}\n", record)));

    match result {
        Ok(()) => Some(file_name),
        Err(e) => {
            tracing::warn!("could not write error log {}: {}", file_name, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_creates_dated_file() {
        let root = std::env::temp_dir().join(format!("errlog-{}", shared::random_alphanumeric(8)));
        let name = write_in(&root, StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR", "boom")
            .expect("log written");
        assert!(name.ends_with(".log"));

        let day = Local::now().format("%Y-%m-%d").to_string();
        let contents = std::fs::read_to_string(root.join(day).join(&name)).unwrap();
        assert!(contents.contains("STORAGE_ERROR"));
        let _ = std::fs::remove_dir_all(root);
    }
}
