//! In-memory log ring backing `/0/log` (§6). `log`'s normal destination is
//! stderr via `env_logger`; this collaborator additionally mirrors records
//! into a bounded ring so the web control plane can show recent history
//! without tailing a file.

use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: log::Level,
    pub target: String,
    pub message: String,
}

pub struct LogRingBuffer {
    capacity: usize,
    records: Mutex<VecDeque<LogRecord>>,
}

impl LogRingBuffer {
    pub fn new(capacity: usize) -> Self {
        LogRingBuffer {
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, record: LogRecord) {
        let mut buf = self.records.lock().unwrap();
        if buf.len() == self.capacity {
            buf.pop_front();
        }
        buf.push_back(record);
    }

    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap().iter().cloned().collect()
    }

    pub fn render_text(&self) -> String {
        self.snapshot()
            .iter()
            .map(|r| format!("[{}] {}: {}\n", r.level, r.target, r.message))
            .collect()
    }
}

/// Installs `env_logger` with a custom format hook that mirrors every
/// record into `buffer` in addition to writing it to stderr/the log file
/// (§10 `log_level`/`logfile`). This is `env_logger`'s documented
/// `Builder::format` extension point, not a second `log::Log`
/// implementation — `log` only ever has one global logger.
pub fn install(buffer: std::sync::Arc<LogRingBuffer>, filter: log::LevelFilter, target: env_logger::Target) {
    use std::io::Write as _;
    env_logger::Builder::new()
        .filter_level(filter)
        .target(target)
        .format(move |buf, record| {
            buffer.push(LogRecord {
                level: record.level(),
                target: record.target().to_string(),
                message: record.args().to_string(),
            });
            writeln!(buf, "[{} {}] {}", record.level(), record.target(), record.args())
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_evicts_oldest_past_capacity() {
        let ring = LogRingBuffer::new(2);
        ring.push(LogRecord { level: log::Level::Info, target: "a".into(), message: "1".into() });
        ring.push(LogRecord { level: log::Level::Info, target: "a".into(), message: "2".into() });
        ring.push(LogRecord { level: log::Level::Info, target: "a".into(), message: "3".into() });
        let snap = ring.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].message, "2");
        assert_eq!(snap[1].message, "3");
    }

    #[test]
    fn render_text_includes_level_and_message() {
        let ring = LogRingBuffer::new(4);
        ring.push(LogRecord { level: log::Level::Warn, target: "pipeline".into(), message: "reconnecting".into() });
        let text = ring.render_text();
        assert!(text.contains("WARN"));
        assert!(text.contains("reconnecting"));
    }
}
