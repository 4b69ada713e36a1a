//! Canonical interning table for file values
//!
//! The engine's caches compare values by pointer identity, so every `File`
//! must come out of one canonical table per context: structurally equal
//! payloads share one allocation. The table is keyed by deep hash with
//! bucketed collision handling.
//!
//! Record fields are interned recursively, so an interned `Record` only ever
//! references interned files.

use crate::file::{File, FileData};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Canonical table mapping payloads to their single shared allocation
#[derive(Debug, Clone, Default)]
pub struct Interner {
    buckets: HashMap<u64, Vec<Arc<FileData>>>,
    hits: u64,
    misses: u64,
}

impl Interner {
    /// Create an empty table
    pub fn new() -> Self {
        Interner::default()
    }

    /// Intern a payload, returning the canonical `File`
    ///
    /// Structurally equal payloads return the same allocation. Record fields
    /// are re-interned recursively so identity holds at every depth.
    pub fn intern(&mut self, data: FileData) -> File {
        let data = match data {
            FileData::Record { tag, fields } => FileData::Record {
                tag,
                fields: fields
                    .into_iter()
                    .map(|f| self.intern_file(f))
                    .collect(),
            },
            other => other,
        };

        let hash = Self::hash_of(&data);
        let bucket = self.buckets.entry(hash).or_default();
        if let Some(existing) = bucket.iter().find(|e| ***e == data) {
            self.hits += 1;
            return File::from_arc(Arc::clone(existing));
        }
        self.misses += 1;
        let arc = Arc::new(data);
        bucket.push(Arc::clone(&arc));
        File::from_arc(arc)
    }

    /// Re-intern a file that may come from another table (e.g. a snapshot)
    pub fn intern_file(&mut self, file: File) -> File {
        let hash = Self::hash_of(file.data());
        if let Some(bucket) = self.buckets.get(&hash) {
            if bucket.iter().any(|e| Arc::ptr_eq(e, file.as_arc())) {
                self.hits += 1;
                return file;
            }
        }
        self.intern(file.data().clone())
    }

    /// Number of canonical entries
    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    /// True if the table holds no entries
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// (hits, misses) counters since creation
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    fn hash_of(data: &FileData) -> u64 {
        let mut hasher = DefaultHasher::new();
        data.hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_payloads_share_identity() {
        let mut interner = Interner::new();
        let a = interner.intern(FileData::Int(5));
        let b = interner.intern(FileData::Int(5));
        assert!(a.same(&b));
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn test_distinct_payloads_distinct_identity() {
        let mut interner = Interner::new();
        let a = interner.intern(FileData::Int(5));
        let b = interner.intern(FileData::Str(Arc::from("5")));
        assert!(!a.same(&b));
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn test_record_fields_are_interned() {
        let mut interner = Interner::new();
        let leaf = interner.intern(FileData::Int(1));
        let rec = interner.intern(FileData::Record {
            tag: 0,
            fields: vec![File::from_arc(Arc::new(FileData::Int(1)))],
        });
        match rec.data() {
            FileData::Record { fields, .. } => assert!(fields[0].same(&leaf)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_foreign_file_reinterned() {
        let mut interner = Interner::new();
        let canon = interner.intern(FileData::Int(9));
        let foreign = File::from_arc(Arc::new(FileData::Int(9)));
        let back = interner.intern_file(foreign);
        assert!(back.same(&canon));
    }
}
