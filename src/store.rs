use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;

use crate::codec;
use crate::models::{
    parse_cgpa, AnnouncementPost, Applicant, ApplicantStatus, Drive, DriveStatus, ResultRow,
    ResultStatus, StatusValue,
};
use crate::storage::{Scope, Storage};

/// The four persisted tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Drives,
    Applicants,
    Results,
    Announcements,
}

impl Family {
    pub fn name(self) -> &'static str {
        match self {
            Family::Drives => "drives",
            Family::Applicants => "applicants",
            Family::Results => "results",
            Family::Announcements => "announcements",
        }
    }

    /// Storage key of a family's sequence. Child families are keyed by their
    /// parent drive, so two drives never share a key.
    pub fn scope_key(self, drive_id: Option<&str>) -> String {
        match (self, drive_id) {
            (Family::Drives, _) | (_, None) => format!("tpo_{}", self.name()),
            (_, Some(id)) => format!("tpo_{}_{}", self.name(), id),
        }
    }
}

/// A record that lives in one persisted, id-keyed sequence.
pub trait Record: Serialize + DeserializeOwned + Clone {
    const FAMILY: Family;

    fn id(&self) -> &str;

    /// What `load` returns when nothing usable is stored.
    fn default_sequence() -> Vec<Self> {
        Vec::new()
    }

    /// Whether the default is written back the first time a key is found empty.
    fn persist_default() -> bool {
        false
    }

    /// Patches a stored entry that failed to decode, the same way an import
    /// coerces a CSV row.
    fn repair(_value: &mut Value) {}
}

/// Rewrites a status field to its canonical spelling, or to `fallback` when
/// it is missing or unknown.
fn repair_status<S: StatusValue>(value: &mut Value, fallback: S) {
    let Some(fields) = value.as_object_mut() else {
        return;
    };
    let status = fields
        .get("status")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<S>().ok())
        .unwrap_or(fallback);
    fields.insert("status".to_string(), Value::String(status.to_string()));
}

/// Numeric ids, as time-derived ids are often written, become text. A missing
/// id is left missing: such an entry stays unreadable.
fn repair_id(value: &mut Value) {
    if let Some(fields) = value.as_object_mut() {
        if let Some(Value::Number(n)) = fields.get("id") {
            let id = n.to_string();
            fields.insert("id".to_string(), Value::String(id));
        }
    }
}

/// Text fields that are missing or not text become empty.
fn repair_text(value: &mut Value, names: &[&str]) {
    let Some(fields) = value.as_object_mut() else {
        return;
    };
    for name in names {
        let text = match fields.get(*name) {
            Some(Value::String(_)) => continue,
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        fields.insert(name.to_string(), Value::String(text));
    }
}

impl Record for Drive {
    const FAMILY: Family = Family::Drives;

    fn id(&self) -> &str {
        &self.id
    }

    fn repair(value: &mut Value) {
        repair_id(value);
        repair_status(value, DriveStatus::Draft);
        if let Some(fields) = value.as_object_mut() {
            if !fields.get("applicants").is_some_and(Value::is_u64) {
                fields.insert("applicants".to_string(), Value::from(0u32));
            }
        }
    }
}

impl Record for Applicant {
    const FAMILY: Family = Family::Applicants;

    fn id(&self) -> &str {
        &self.id
    }

    fn default_sequence() -> Vec<Self> {
        Applicant::seed()
    }

    fn persist_default() -> bool {
        true
    }

    fn repair(value: &mut Value) {
        repair_id(value);
        repair_status(value, ApplicantStatus::Applied);
        repair_text(value, &["name", "branch"]);
        if let Some(fields) = value.as_object_mut() {
            let cgpa = match fields.get("cgpa") {
                Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
                Some(Value::String(s)) => parse_cgpa(s),
                _ => 0.0,
            };
            fields.insert("cgpa".to_string(), Value::from(cgpa));
        }
    }
}

impl Record for ResultRow {
    const FAMILY: Family = Family::Results;

    fn id(&self) -> &str {
        &self.id
    }

    fn repair(value: &mut Value) {
        repair_id(value);
        repair_status(value, ResultStatus::Selected);
        repair_text(value, &["name"]);
    }
}

impl Record for AnnouncementPost {
    const FAMILY: Family = Family::Announcements;

    fn id(&self) -> &str {
        &self.id
    }

    fn repair(value: &mut Value) {
        repair_id(value);
    }
}

struct Loaded<T> {
    records: Vec<T>,
    /// False when some stored text could not be read back.
    intact: bool,
}

/// CRUD over one family's sequences in persistent storage.
pub struct RecordStore<'a, T: Record> {
    storage: &'a Storage,
    _record: PhantomData<T>,
}

impl<'a, T: Record> RecordStore<'a, T> {
    pub fn new(storage: &'a Storage) -> Self {
        Self {
            storage,
            _record: PhantomData,
        }
    }

    pub fn key(&self, drive_id: Option<&str>) -> String {
        T::FAMILY.scope_key(drive_id)
    }

    pub fn load(&self, scope_key: &str) -> Vec<T> {
        self.read(scope_key).records
    }

    fn read(&self, scope_key: &str) -> Loaded<T> {
        let Some(text) = self.storage.get(Scope::Persistent, scope_key) else {
            let defaults = T::default_sequence();
            if T::persist_default() {
                tracing::debug!(key = scope_key, rows = defaults.len(), "Seeding default records");
                self.write(scope_key, &defaults);
            }
            return Loaded {
                records: defaults,
                intact: true,
            };
        };

        match codec::decode_each(&text, T::repair) {
            Ok(decoded) => {
                if decoded.skipped > 0 {
                    tracing::warn!(
                        key = scope_key,
                        skipped = decoded.skipped,
                        "Some stored records are unreadable"
                    );
                }
                Loaded {
                    intact: decoded.skipped == 0,
                    records: decoded.records,
                }
            }
            Err(e) => {
                tracing::warn!(key = scope_key, error = %e, "Stored records unreadable, using defaults");
                Loaded {
                    records: T::default_sequence(),
                    intact: false,
                }
            }
        }
    }

    /// Replaces the whole sequence. Returns false when the write did not
    /// persist, including when the stored sequence holds records that could not
    /// be read: those are never overwritten by a routine save.
    pub fn save_all(&self, scope_key: &str, records: &[T]) -> bool {
        if !self.stored_intact(scope_key) {
            tracing::warn!(key = scope_key, "Refusing to overwrite unreadable stored records");
            return false;
        }
        self.write(scope_key, records)
    }

    fn stored_intact(&self, scope_key: &str) -> bool {
        match self.storage.get(Scope::Persistent, scope_key) {
            None => true,
            Some(text) => codec::decode_each::<T>(&text, T::repair)
                .map(|decoded| decoded.skipped == 0)
                .unwrap_or(false),
        }
    }

    /// Replaces the whole sequence unconditionally, for explicit imports.
    pub fn replace_all(&self, scope_key: &str, records: &[T]) -> bool {
        self.write(scope_key, records)
    }

    fn write(&self, scope_key: &str, records: &[T]) -> bool {
        match codec::encode(records) {
            Ok(text) => self.storage.set(Scope::Persistent, scope_key, &text),
            Err(e) => {
                tracing::warn!(key = scope_key, error = %e, "Failed to encode records");
                false
            }
        }
    }

    /// Replaces the record with the same id, or appends it. The returned
    /// sequence is authoritative even if persisting it failed.
    pub fn upsert_one(&self, scope_key: &str, record: T) -> Vec<T> {
        let mut records = self.load(scope_key);
        match records.iter_mut().find(|r| r.id() == record.id()) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        self.save_all(scope_key, &records);
        records
    }

    /// Removes several sequences. Each removal is independent; returns how many
    /// succeeded.
    pub fn delete_all(&self, scope_keys: &[String]) -> usize {
        scope_keys
            .iter()
            .filter(|key| self.storage.remove(Scope::Persistent, key))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApplicantStatus, ResultStatus};
    use crate::storage::MemoryBackend;

    fn result(id: &str, name: &str, status: ResultStatus) -> ResultRow {
        ResultRow {
            id: id.to_string(),
            name: name.to_string(),
            status,
        }
    }

    #[test]
    fn test_scope_keys() {
        assert_eq!(Family::Drives.scope_key(None), "tpo_drives");
        assert_eq!(Family::Drives.scope_key(Some("9")), "tpo_drives");
        assert_eq!(Family::Applicants.scope_key(Some("1")), "tpo_applicants_1");
        assert_eq!(Family::Results.scope_key(Some("1")), "tpo_results_1");
        assert_eq!(
            Family::Announcements.scope_key(Some("42")),
            "tpo_announcements_42"
        );
        assert_ne!(
            Family::Applicants.scope_key(Some("1")),
            Family::Applicants.scope_key(Some("2"))
        );
    }

    #[test]
    fn test_applicants_seed_on_first_load() {
        let storage = Storage::in_memory();
        let store: RecordStore<Applicant> = RecordStore::new(&storage);
        let key = store.key(Some("1"));

        let loaded = store.load(&key);
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].id, "s1");
        assert!(storage.get(Scope::Persistent, &key).is_some());
    }

    #[test]
    fn test_results_default_to_empty_and_do_not_persist() {
        let storage = Storage::in_memory();
        let store: RecordStore<ResultRow> = RecordStore::new(&storage);
        let key = store.key(Some("1"));

        assert!(store.load(&key).is_empty());
        assert!(storage.get(Scope::Persistent, &key).is_none());
    }

    #[test]
    fn test_corrupt_sequence_falls_back_to_default() {
        let storage = Storage::in_memory();
        storage.set(Scope::Persistent, "tpo_results_1", "[{\"id\":");
        storage.set(Scope::Persistent, "tpo_applicants_1", "[{\"id\":\"x\",\"status\":\"Hired\"");

        let results: RecordStore<ResultRow> = RecordStore::new(&storage);
        assert!(results.load("tpo_results_1").is_empty());

        let applicants: RecordStore<Applicant> = RecordStore::new(&storage);
        let loaded = applicants.load("tpo_applicants_1");
        assert_eq!(loaded, Applicant::seed());
        // a routine save does not replace the corrupt text with the seed
        assert!(!applicants.save_all("tpo_applicants_1", &loaded));
        assert!(
            storage
                .get(Scope::Persistent, "tpo_applicants_1")
                .unwrap()
                .contains("Hired")
        );
        // an explicit replacement does
        assert!(applicants.replace_all("tpo_applicants_1", &loaded));
        assert_eq!(applicants.load("tpo_applicants_1"), Applicant::seed());
    }

    #[test]
    fn test_unknown_status_is_repaired_not_dropped() {
        let storage = Storage::in_memory();
        storage.set(
            Scope::Persistent,
            "tpo_applicants_1",
            r#"[{"id":"a1","name":"Neha","branch":"IT","cgpa":9.1,"status":"Selected"},
               {"id":"a2","name":"Kabir","branch":"ME","cgpa":"7.4","status":"Pending"},
               {"id":"a3","status":"shortlisted"}]"#,
        );
        let store: RecordStore<Applicant> = RecordStore::new(&storage);

        let loaded = store.load("tpo_applicants_1");
        assert_eq!(
            loaded.iter().map(|a| a.id.as_str()).collect::<Vec<_>>(),
            vec!["a1", "a2", "a3"]
        );
        assert_eq!(loaded[1].status, ApplicantStatus::Applied);
        assert_eq!(loaded[1].cgpa, 7.4);
        assert_eq!(loaded[2].status, ApplicantStatus::Shortlisted);
        assert_eq!(loaded[2].name, "");

        let mut neha = loaded[0].clone();
        neha.status = ApplicantStatus::Rejected;
        let after = store.upsert_one("tpo_applicants_1", neha);
        assert_eq!(after.len(), 3);
        assert_eq!(store.load("tpo_applicants_1"), after);
    }

    #[test]
    fn test_unreadable_record_blocks_routine_save() {
        let storage = Storage::in_memory();
        let stored = r#"[{"id":"r1","name":"Aarav","status":"Selected"},{"id":1700000000000,"name":"Priya"},{"name":"no id"}]"#;
        storage.set(Scope::Persistent, "tpo_results_1", stored);
        let store: RecordStore<ResultRow> = RecordStore::new(&storage);

        let loaded = store.load("tpo_results_1");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].id, "1700000000000");
        assert_eq!(loaded[1].status, ResultStatus::Selected);
        let after = store.upsert_one("tpo_results_1", result("r2", "Priya", ResultStatus::Rejected));
        assert_eq!(after.len(), 3);
        assert_eq!(
            storage.get(Scope::Persistent, "tpo_results_1").as_deref(),
            Some(stored)
        );

        assert!(store.replace_all("tpo_results_1", &after));
        assert_eq!(store.load("tpo_results_1"), after);
    }

    #[test]
    fn test_upsert_replaces_or_appends() {
        let storage = Storage::in_memory();
        let store: RecordStore<ResultRow> = RecordStore::new(&storage);
        let key = store.key(Some("1"));

        store.save_all(
            &key,
            &[
                result("r1", "Aarav", ResultStatus::Selected),
                result("r2", "Priya", ResultStatus::Rejected),
            ],
        );
        let after = store.upsert_one(&key, result("r1", "Aarav", ResultStatus::Waitlisted));
        assert_eq!(after.len(), 2);
        assert_eq!(after[0].status, ResultStatus::Waitlisted);
        assert_eq!(after[1].id, "r2");

        let after = store.upsert_one(&key, result("r3", "Rahul", ResultStatus::Selected));
        assert_eq!(
            after.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["r1", "r2", "r3"]
        );
        assert_eq!(store.load(&key), after);
    }

    #[test]
    fn test_upsert_returns_memory_copy_when_storage_fails() {
        let backend = MemoryBackend::new();
        backend.set_disabled(true);
        let storage = Storage::new(Box::new(backend), Box::new(MemoryBackend::new()));
        let store: RecordStore<Applicant> = RecordStore::new(&storage);

        let rows = store.upsert_one(
            "tpo_applicants_1",
            Applicant::new("s9", "Neha", "IT", 9.1, ApplicantStatus::Selected),
        );
        // seed plus the new row, even though nothing was written
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[3].id, "s9");
        assert!(!store.save_all("tpo_applicants_1", &rows));
    }

    #[test]
    fn test_delete_all_counts_successes() {
        let storage = Storage::in_memory();
        let store: RecordStore<ResultRow> = RecordStore::new(&storage);
        store.save_all("tpo_results_1", &[result("r1", "A", ResultStatus::Selected)]);

        let removed = store.delete_all(&["tpo_results_1".to_string(), "tpo_results_2".to_string()]);
        assert_eq!(removed, 2);
        assert!(store.load("tpo_results_1").is_empty());
    }
}
