use anyhow::{anyhow, bail, Context, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::codec::{self, CsvRecord};
use crate::models::{
    random_id, AnnouncementPost, Applicant, ApplicantStatus, ApplicationMarker, Attachment, Drive,
    DrivePatch, DriveStatus, NewDrive, ResultRow, ResultStatus,
};
use crate::storage::{Scope, Storage};
use crate::store::{Family, Record, RecordStore};
use crate::views::{self, Application};

const APPLIED_KEY: &str = "appliedCompanies";

/// Outcome of a student pressing "apply".
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied(DateTime<Utc>),
    AlreadyApplied(DateTime<Utc>),
    NotOpen(DriveStatus),
}

/// What a cascading drive deletion actually managed to remove.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteReport {
    pub drive: Drive,
    pub list_persisted: bool,
    pub children_removed: usize,
    pub children_failed: usize,
}

/// Every operation the portal offers, on top of one storage adapter.
pub struct Portal<'a> {
    storage: &'a Storage,
}

impl<'a> Portal<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    fn store<T: Record>(&self) -> RecordStore<'a, T> {
        RecordStore::new(self.storage)
    }

    // --- Drives ---

    pub fn drives(&self) -> Vec<Drive> {
        let store = self.store::<Drive>();
        store.load(&store.key(None))
    }

    pub fn drive(&self, id: &str) -> Option<Drive> {
        self.drives().into_iter().find(|d| d.id == id)
    }

    pub fn create_drive(&self, new_drive: NewDrive, now: DateTime<Utc>) -> Drive {
        let store = self.store::<Drive>();
        let key = store.key(None);
        let mut drives = store.load(&key);
        let drive = new_drive.into_drive(time_id(&drives, now));
        drives.push(drive.clone());
        if !store.save_all(&key, &drives) {
            tracing::warn!(drive_id = %drive.id, "New drive kept in memory only");
        }
        tracing::info!(drive_id = %drive.id, company = %drive.company_name, "Drive created");
        drive
    }

    pub fn update_drive(&self, id: &str, patch: DrivePatch) -> Option<Drive> {
        let current = self.drive(id)?;
        let updated = patch.apply(&current);
        let store = self.store::<Drive>();
        store.upsert_one(&store.key(None), updated.clone());
        Some(updated)
    }

    pub fn set_drive_status(&self, id: &str, status: DriveStatus) -> Option<Drive> {
        self.update_drive(
            id,
            DrivePatch {
                status: Some(status),
                ..Default::default()
            },
        )
    }

    /// Removes the drive and its applicant, result and announcement sequences.
    /// Each removal is attempted on its own; failures are reported, not undone.
    pub fn delete_drive(&self, id: &str) -> Option<DeleteReport> {
        let store = self.store::<Drive>();
        let key = store.key(None);
        let drives = store.load(&key);
        let drive = drives.iter().find(|d| d.id == id)?.clone();

        let remaining: Vec<Drive> = drives.into_iter().filter(|d| d.id != id).collect();
        let list_persisted = store.save_all(&key, &remaining);

        let child_keys: Vec<String> = [Family::Applicants, Family::Results, Family::Announcements]
            .iter()
            .map(|family| family.scope_key(Some(id)))
            .collect();
        let children_removed = store.delete_all(&child_keys);
        let children_failed = child_keys.len() - children_removed;

        if children_failed > 0 || !list_persisted {
            tracing::warn!(
                drive_id = id,
                list_persisted,
                children_failed,
                "Drive deletion only partly persisted"
            );
        } else {
            tracing::info!(drive_id = id, "Drive deleted with its related records");
        }

        Some(DeleteReport {
            drive,
            list_persisted,
            children_removed,
            children_failed,
        })
    }

    // --- Applicants ---

    pub fn applicants(&self, drive_id: &str) -> Vec<Applicant> {
        let store = self.store::<Applicant>();
        store.load(&store.key(Some(drive_id)))
    }

    /// `None` when no applicant has that id.
    pub fn set_applicant_status(
        &self,
        drive_id: &str,
        applicant_id: &str,
        status: ApplicantStatus,
    ) -> Option<Vec<Applicant>> {
        let store = self.store::<Applicant>();
        let key = store.key(Some(drive_id));
        let mut applicant = store.load(&key).into_iter().find(|a| a.id == applicant_id)?;
        applicant.status = status;
        Some(store.upsert_one(&key, applicant))
    }

    pub fn bulk_applicant_status(&self, drive_id: &str, status: ApplicantStatus) -> Vec<Applicant> {
        let store = self.store::<Applicant>();
        let key = store.key(Some(drive_id));
        let updated = views::bulk_status(&store.load(&key), status);
        store.save_all(&key, &updated);
        updated
    }

    /// Replaces the drive's applicants with the rows of a CSV file.
    pub fn import_applicants_csv(&self, drive_id: &str, text: &str) -> Result<Vec<Applicant>> {
        let mut rows: Vec<Applicant> = codec::csv_decode(text)?
            .iter()
            .map(Applicant::from_csv_row)
            .collect();
        dedupe_ids(&mut rows, |a, id| a.id = id);

        let store = self.store::<Applicant>();
        store.replace_all(&store.key(Some(drive_id)), &rows);
        tracing::info!(drive_id, rows = rows.len(), "Applicants imported");
        Ok(rows)
    }

    pub fn export_applicants_csv(&self, drive_id: &str) -> Result<String> {
        codec::csv_encode(&self.applicants(drive_id))
    }

    // --- Results ---

    pub fn results(&self, drive_id: &str) -> Vec<ResultRow> {
        let store = self.store::<ResultRow>();
        store.load(&store.key(Some(drive_id)))
    }

    pub fn set_result_status(
        &self,
        drive_id: &str,
        result_id: &str,
        status: ResultStatus,
    ) -> Option<Vec<ResultRow>> {
        let store = self.store::<ResultRow>();
        let key = store.key(Some(drive_id));
        let mut row = store.load(&key).into_iter().find(|r| r.id == result_id)?;
        row.status = status;
        Some(store.upsert_one(&key, row))
    }

    pub fn import_results_csv(&self, drive_id: &str, text: &str) -> Result<Vec<ResultRow>> {
        let mut rows: Vec<ResultRow> = codec::csv_decode(text)?
            .iter()
            .map(ResultRow::from_csv_row)
            .collect();
        dedupe_ids(&mut rows, |r, id| r.id = id);

        let store = self.store::<ResultRow>();
        store.replace_all(&store.key(Some(drive_id)), &rows);
        tracing::info!(drive_id, rows = rows.len(), "Results imported");
        Ok(rows)
    }

    pub fn export_results_csv(&self, drive_id: &str) -> Result<String> {
        codec::csv_encode(&self.results(drive_id))
    }

    // --- Announcements ---

    pub fn announcements(&self, drive_id: &str) -> Vec<AnnouncementPost> {
        let store = self.store::<AnnouncementPost>();
        store.load(&store.key(Some(drive_id)))
    }

    /// Prepends a post. Needs text, an attachment, or both.
    pub fn post_announcement(
        &self,
        drive_id: &str,
        text: &str,
        attachment: Option<Attachment>,
        now: DateTime<Utc>,
    ) -> Result<AnnouncementPost> {
        let text = text.trim();
        if text.is_empty() && attachment.is_none() {
            bail!("An announcement needs text or an attachment");
        }

        let store = self.store::<AnnouncementPost>();
        let key = store.key(Some(drive_id));
        let existing = store.load(&key);

        let (file_name, file_data_url) = match attachment {
            Some(a) => (Some(a.file_name), Some(a.data_url)),
            None => (None, None),
        };
        let post = AnnouncementPost {
            id: time_id(&existing, now),
            text: text.to_string(),
            file_name,
            file_data_url,
            created_at: now,
        };

        let mut posts = Vec::with_capacity(existing.len() + 1);
        posts.push(post.clone());
        posts.extend(existing);
        store.save_all(&key, &posts);
        Ok(post)
    }

    // --- Application markers (session scope) ---

    fn applied_map(&self) -> BTreeMap<String, DateTime<Utc>> {
        let Some(text) = self.storage.get(Scope::Session, APPLIED_KEY) else {
            return BTreeMap::new();
        };
        serde_json::from_str(&text).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Application markers unreadable");
            BTreeMap::new()
        })
    }

    pub fn application_marker(&self, drive_id: &str) -> ApplicationMarker {
        ApplicationMarker {
            drive_id: drive_id.to_string(),
            applied_at: self.applied_map().get(drive_id).copied(),
        }
    }

    /// Records that the student applied. Only open drives accept applications,
    /// and a second apply keeps the first timestamp.
    pub fn mark_applied(&self, drive_id: &str, now: DateTime<Utc>) -> Result<ApplyOutcome> {
        let drive = self
            .drive(drive_id)
            .ok_or_else(|| anyhow!("Drive #{} not found", drive_id))?;

        let mut applied = self.applied_map();
        if let Some(at) = applied.get(drive_id) {
            return Ok(ApplyOutcome::AlreadyApplied(*at));
        }
        if drive.status != DriveStatus::Open {
            return Ok(ApplyOutcome::NotOpen(drive.status));
        }

        applied.insert(drive_id.to_string(), now);
        let text = serde_json::to_string(&applied).context("Failed to encode application markers")?;
        if !self.storage.set(Scope::Session, APPLIED_KEY, &text) {
            tracing::warn!(drive_id, "Application marker kept in memory only");
        }
        Ok(ApplyOutcome::Applied(now))
    }

    pub fn applications(&self) -> Vec<Application> {
        views::applications(&self.drives(), &self.applied_map())
    }
}

/// Milliseconds since the epoch, bumped until no record in `existing` uses it.
fn time_id<T: Record>(existing: &[T], now: DateTime<Utc>) -> String {
    let taken: HashSet<&str> = existing.iter().map(|r| r.id()).collect();
    let mut millis = now.timestamp_millis();
    while taken.contains(millis.to_string().as_str()) {
        millis += 1;
    }
    millis.to_string()
}

/// Gives repeated ids a fresh random one so ids stay unique within a sequence.
fn dedupe_ids<T: Record>(rows: &mut [T], set_id: impl Fn(&mut T, String)) {
    let mut seen = HashSet::new();
    for row in rows.iter_mut() {
        if !seen.insert(row.id().to_string()) {
            let mut fresh = random_id();
            while seen.contains(&fresh) {
                fresh = random_id();
            }
            tracing::debug!(duplicate = row.id(), replacement = %fresh, "Reassigned duplicate id");
            seen.insert(fresh.clone());
            set_id(row, fresh);
        }
    }
}

// --- File boundary ---

/// `{family}_{companyName}.csv`, with characters that cannot appear in a
/// file name replaced by `_` so the file always lands in the chosen directory.
pub fn export_file_name(family: Family, company_name: &str) -> String {
    let company: String = company_name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    format!("{}_{}.csv", family.name(), company)
}

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| allowed.iter().any(|a| ext.eq_ignore_ascii_case(a)))
        .unwrap_or(false)
}

pub fn read_csv_file(path: &Path) -> Result<String> {
    if !has_extension(path, &["csv"]) {
        bail!("Only .csv files can be imported: {}", path.display());
    }
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read CSV file: {}", path.display()))
}

/// Reads a `.pdf` or `.txt` file into a base64 data URI.
pub fn load_attachment(path: &Path) -> Result<Attachment> {
    if !has_extension(path, &["pdf", "txt"]) {
        bail!("Attachments must be .pdf or .txt files: {}", path.display());
    }
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read attachment: {}", path.display()))?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("Attachment path has no file name: {}", path.display()))?
        .to_string();

    Ok(Attachment {
        file_name,
        data_url: format!(
            "data:{};base64,{}",
            mime.essence_str(),
            base64::engine::general_purpose::STANDARD.encode(bytes)
        ),
    })
}

/// Header line expected by an import, for help output.
pub fn csv_headers<T: CsvRecord>() -> String {
    T::HEADERS.join(",")
}
