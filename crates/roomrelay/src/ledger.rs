//! Read-Time Ledger (C8): path -> last-observed-mtime map used to
//! validate write intent (write-after-read safety).
//!
//! The relay only records and looks up mtimes; the ±1-unit tolerance
//! comparison against the file's *current* mtime happens on the Local
//! peer (an external collaborator, spec §1) when it executes the write
//! and reports back success/failure.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ReadTimeLedger {
    entries: HashMap<String, i64>,
}

impl ReadTimeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, absolute_path: String, mtime: i64) {
        self.entries.insert(absolute_path, mtime);
    }

    pub fn get(&self, absolute_path: &str) -> Option<i64> {
        self.entries.get(absolute_path).copied()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_then_write_roundtrip() {
        let mut ledger = ReadTimeLedger::new();
        assert_eq!(ledger.get("/tmp/x"), None);
        ledger.record("/tmp/x".into(), 100);
        assert_eq!(ledger.get("/tmp/x"), Some(100));
        ledger.record("/tmp/x".into(), 200);
        assert_eq!(ledger.get("/tmp/x"), Some(200));
    }

    #[test]
    fn clear_drops_all_entries() {
        let mut ledger = ReadTimeLedger::new();
        ledger.record("/tmp/x".into(), 100);
        ledger.record("/tmp/y".into(), 50);
        ledger.clear();
        assert_eq!(ledger.get("/tmp/x"), None);
        assert_eq!(ledger.get("/tmp/y"), None);
    }
}
