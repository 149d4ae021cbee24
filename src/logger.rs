use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;

use crate::diff::diff_json;

pub enum MessageLogMode {
    Full,
    Diffed,
}

/// Appends gateway traffic and device snapshots to a file as NDJSON.
pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous_snapshot: Option<Value>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            previous_snapshot: None,
        })
    }

    pub fn log_request(&mut self, method: &str, path: &str, body: Option<&str>) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "req",
            "method": method,
            "path": path,
            "body": body,
        });
        self.write_line(&entry);
    }

    pub fn log_response(&mut self, path: &str, status: u16, bytes: usize) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "resp",
            "path": path,
            "status": status,
            "bytes": bytes,
        });
        self.write_line(&entry);
    }

    pub fn log_snapshot(&mut self, devices: &Value) {
        match self.mode {
            MessageLogMode::Full => {
                let entry = json!({
                    "ts": Utc::now().to_rfc3339(),
                    "dir": "snapshot",
                    "devices": devices,
                });
                self.write_line(&entry);
            }
            MessageLogMode::Diffed => {
                let entry = match self.previous_snapshot.as_ref() {
                    None => json!({
                        "ts": Utc::now().to_rfc3339(),
                        "dir": "snapshot",
                        "full": true,
                        "devices": devices,
                    }),
                    Some(prev) => {
                        let mut changes = Vec::new();
                        diff_json(prev, devices, "", &mut changes);

                        let change_entries: Vec<Value> = changes
                            .iter()
                            .map(|(path, old, new)| json!({ "path": path, "old": old, "new": new }))
                            .collect();

                        json!({
                            "ts": Utc::now().to_rfc3339(),
                            "dir": "snapshot",
                            "changes": change_entries,
                        })
                    }
                };
                self.write_line(&entry);
                self.previous_snapshot = Some(devices.clone());
            }
        }
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::NamedTempFile;

    fn read_lines(path: &str) -> Vec<Value> {
        let mut contents = String::new();
        std::fs::File::open(path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn log_request_writes_ndjson() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, path).unwrap();
        logger.log_request("PUT", "/core/locations;id=L1", Some("<locations/>"));

        let lines = read_lines(path);
        assert_eq!(lines[0]["dir"], "req");
        assert_eq!(lines[0]["method"], "PUT");
        assert_eq!(lines[0]["body"], "<locations/>");
        assert!(lines[0]["ts"].as_str().is_some());
    }

    #[test]
    fn log_response_captures_status() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, path).unwrap();
        logger.log_response("/ping", 404, 0);

        let lines = read_lines(path);
        assert_eq!(lines[0]["dir"], "resp");
        assert_eq!(lines[0]["status"], 404);
    }

    #[test]
    fn diffed_mode_logs_full_first_then_changes() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Diffed, path).unwrap();

        logger.log_snapshot(&json!({"L1": {"current_temp": 19.5}}));
        logger.log_snapshot(&json!({"L1": {"current_temp": 20.0}}));

        let lines = read_lines(path);
        assert_eq!(lines[0]["full"], true);
        assert!(lines[0]["devices"].is_object());
        assert_eq!(lines[1]["changes"][0]["path"], "L1.current_temp");
        assert_eq!(lines[1]["changes"][0]["new"], 20.0);
    }

    #[test]
    fn diffed_mode_no_changes_logs_empty_array() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Diffed, path).unwrap();

        let snapshot = json!({"h1": {"boiler_state": true}});
        logger.log_snapshot(&snapshot);
        logger.log_snapshot(&snapshot);

        let lines = read_lines(path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["changes"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn full_mode_logs_every_snapshot() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, path).unwrap();

        let snapshot = json!({"h1": {"boiler_state": true}});
        logger.log_snapshot(&snapshot);
        logger.log_snapshot(&snapshot);

        let lines = read_lines(path);
        assert_eq!(lines.len(), 2);
        assert!(lines[1]["devices"].is_object());
        assert!(lines[1].get("changes").is_none());
    }
}
