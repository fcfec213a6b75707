//! In-memory register of saved assessment sessions.
//!
//! Sessions live for the process lifetime only. Appends are serialized, so
//! concurrent saves never lose records and listings always see a prefix of
//! the append order.

use crate::models::SessionRecord;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared, append-only list of sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionRegister {
    records: Arc<Mutex<Vec<SessionRecord>>>,
}

impl SessionRegister {
    /// Creates an empty register.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record and returns the new total.
    pub fn append(&self, record: SessionRecord) -> usize {
        let mut records = self.lock();
        tracing::debug!(
            name = %record.name,
            emotion = %record.emotion,
            stress_score = record.stress_score,
            "Saving session"
        );
        records.push(record);
        let total = records.len();
        drop(records);

        metrics::counter!("sessions_saved_total").increment(1);
        total
    }

    /// Snapshot of all records in append order.
    #[must_use]
    pub fn list(&self) -> Vec<SessionRecord> {
        self.lock().clone()
    }

    /// Number of saved records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been saved yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic while holding the lock cannot leave a half-pushed Vec, so a
    // poisoned register is still consistent.
    fn lock(&self) -> MutexGuard<'_, Vec<SessionRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_append_returns_total() {
        let register = SessionRegister::new();
        assert!(register.is_empty());
        assert_eq!(register.append(SessionRecord::new("Ana", "happy", 1.2)), 1);
        assert_eq!(register.append(SessionRecord::new("Ben", "sad", 2.4)), 2);
        assert_eq!(register.len(), 2);
    }

    #[test]
    fn test_list_preserves_order() {
        let register = SessionRegister::new();
        register.append(SessionRecord::new("first", "neutral", 0.0));
        register.append(SessionRecord::new("second", "fear", 3.0));

        let names: Vec<_> = register.list().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_duplicates_are_kept() {
        let register = SessionRegister::new();
        let record = SessionRecord::new("Ana", "happy", 1.0);
        register.append(record.clone());
        register.append(record.clone());
        assert_eq!(register.list(), vec![record.clone(), record]);
    }

    #[test]
    fn test_clones_share_storage() {
        let register = SessionRegister::new();
        let other = register.clone();
        other.append(SessionRecord::new("Ana", "happy", 1.0));
        assert_eq!(register.len(), 1);
    }

    #[test]
    fn test_concurrent_appends_lose_nothing() {
        let register = SessionRegister::new();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let register = register.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        register.append(SessionRecord::new(format!("{t}-{i}"), "neutral", 0.5));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let records = register.list();
        assert_eq!(records.len(), 400);
        // Per-thread order survives interleaving.
        for t in 0..8 {
            let seq: Vec<_> = records
                .iter()
                .filter_map(|r| r.name.strip_prefix(&format!("{t}-")).map(str::to_string))
                .map(|i| i.parse::<u32>().unwrap())
                .collect();
            assert!(seq.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
