use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::models::{
    AnnouncementPost, Applicant, ApplicantStatus, Drive, DriveStatus, ResultRow, ResultStatus,
    StatusValue, UnknownStatus,
};

// --- Record capabilities used by the views ---

pub trait Searchable {
    /// Text fields a search query is matched against.
    fn search_fields(&self) -> Vec<&str>;
}

pub trait HasStatus: Clone {
    type Status: StatusValue;

    fn status(&self) -> Self::Status;
    fn with_status(&self, status: Self::Status) -> Self;
}

pub trait Dated {
    fn date(&self) -> NaiveDate;
}

impl Searchable for Drive {
    fn search_fields(&self) -> Vec<&str> {
        vec![self.company_name.as_str(), self.role.as_str()]
    }
}

impl Searchable for Applicant {
    fn search_fields(&self) -> Vec<&str> {
        vec![self.name.as_str(), self.branch.as_str()]
    }
}

impl Searchable for ResultRow {
    fn search_fields(&self) -> Vec<&str> {
        vec![self.name.as_str(), self.id.as_str()]
    }
}

impl Searchable for AnnouncementPost {
    fn search_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.text.as_str()];
        fields.extend(self.file_name.as_deref());
        fields
    }
}

impl HasStatus for Drive {
    type Status = DriveStatus;

    fn status(&self) -> DriveStatus {
        self.status
    }

    fn with_status(&self, status: DriveStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

impl HasStatus for Applicant {
    type Status = ApplicantStatus;

    fn status(&self) -> ApplicantStatus {
        self.status
    }

    fn with_status(&self, status: ApplicantStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

impl HasStatus for ResultRow {
    type Status = ResultStatus;

    fn status(&self) -> ResultStatus {
        self.status
    }

    fn with_status(&self, status: ResultStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

impl Dated for Drive {
    fn date(&self) -> NaiveDate {
        self.deadline
    }
}

impl Dated for AnnouncementPost {
    fn date(&self) -> NaiveDate {
        self.created_at.date_naive()
    }
}

// --- Filters ---

/// Case-insensitive substring match on any search field. An empty query keeps
/// everything.
pub fn search<T: Searchable + Clone>(records: &[T], query: &str) -> Vec<T> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return records.to_vec();
    }
    records
        .iter()
        .filter(|r| {
            r.search_fields()
                .iter()
                .any(|field| field.to_lowercase().contains(&needle))
        })
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatusFilter<S> {
    All,
    Only(S),
}

impl<S: StatusValue> FromStr for StatusFilter<S> {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(StatusFilter::All);
        }
        S::ALL
            .iter()
            .copied()
            .find(|status| status.to_string().eq_ignore_ascii_case(s.trim()))
            .map(StatusFilter::Only)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

pub fn filter_status<T: HasStatus>(records: &[T], filter: StatusFilter<T::Status>) -> Vec<T> {
    match filter {
        StatusFilter::All => records.to_vec(),
        StatusFilter::Only(wanted) => records
            .iter()
            .filter(|r| r.status() == wanted)
            .cloned()
            .collect(),
    }
}

/// Sets every record's status, leaving all other fields and the order alone.
pub fn bulk_status<T: HasStatus>(records: &[T], status: T::Status) -> Vec<T> {
    records.iter().map(|r| r.with_status(status)).collect()
}

// --- Ordering ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "asc" | "date-asc" | "ascending" => Ok(SortDirection::Ascending),
            "desc" | "date-desc" | "descending" => Ok(SortDirection::Descending),
            other => Err(format!("unknown sort direction '{}' (use asc or desc)", other)),
        }
    }
}

/// Stable sort by date; equal dates keep their original order in both directions.
pub fn sort_by_date<T: Dated + Clone>(records: &[T], direction: SortDirection) -> Vec<T> {
    let mut sorted = records.to_vec();
    match direction {
        SortDirection::Ascending => sorted.sort_by(|a, b| a.date().cmp(&b.date())),
        SortDirection::Descending => sorted.sort_by(|a, b| b.date().cmp(&a.date())),
    }
    sorted
}

/// Records dated today or later, soonest first, at most `limit` of them.
pub fn upcoming<T: Dated + Clone>(records: &[T], today: NaiveDate, limit: usize) -> Vec<T> {
    let pending: Vec<T> = records
        .iter()
        .filter(|r| r.date() >= today)
        .cloned()
        .collect();
    let mut sorted = sort_by_date(&pending, SortDirection::Ascending);
    sorted.truncate(limit);
    sorted
}

// --- Aggregates ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveOverview {
    pub open_drives: usize,
    pub total_applicants: u64,
    pub total_drives: usize,
}

pub fn overview(drives: &[Drive]) -> DriveOverview {
    DriveOverview {
        open_drives: drives
            .iter()
            .filter(|d| d.status == DriveStatus::Open)
            .count(),
        total_applicants: drives.iter().map(|d| u64::from(d.applicant_count)).sum(),
        total_drives: drives.len(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Application {
    pub drive: Drive,
    pub applied_at: DateTime<Utc>,
}

/// The student's applications this session, newest first. Markers for drives
/// that no longer exist are skipped.
pub fn applications(drives: &[Drive], markers: &BTreeMap<String, DateTime<Utc>>) -> Vec<Application> {
    let mut applied: Vec<Application> = drives
        .iter()
        .filter_map(|drive| {
            markers.get(&drive.id).map(|at| Application {
                drive: drive.clone(),
                applied_at: *at,
            })
        })
        .collect();
    applied.sort_by(|a, b| b.applied_at.cmp(&a.applied_at));
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Record;
    use chrono::TimeZone;

    fn drive(id: &str, company: &str, role: &str, deadline: &str, status: DriveStatus) -> Drive {
        Drive {
            id: id.to_string(),
            company_name: company.to_string(),
            role: role.to_string(),
            package: "10 LPA".to_string(),
            deadline: NaiveDate::parse_from_str(deadline, "%Y-%m-%d").unwrap(),
            status,
            applicant_count: 10,
            description: None,
            requirements: None,
        }
    }

    fn sample_drives() -> Vec<Drive> {
        vec![
            drive("1", "Google", "Software Engineer", "2024-01-15", DriveStatus::Open),
            drive("2", "Microsoft", "Product Manager", "2024-01-20", DriveStatus::Open),
            drive("3", "Amazon", "Data Scientist", "2024-01-10", DriveStatus::Closed),
            drive("4", "TCS", "Software Engineer", "2024-01-15", DriveStatus::Draft),
        ]
    }

    fn ids<T: Record>(records: &[T]) -> Vec<&str> {
        records.iter().map(|r| r.id()).collect()
    }

    #[test]
    fn test_search_matches_any_field_case_insensitive() {
        let drives = sample_drives();
        assert_eq!(ids(&search(&drives, "GOOGLE")), vec!["1"]);
        assert_eq!(ids(&search(&drives, "software")), vec!["1", "4"]);
        assert_eq!(ids(&search(&drives, "data sci")), vec!["3"]);
        assert!(search(&drives, "netflix").is_empty());
    }

    #[test]
    fn test_empty_search_returns_everything() {
        let drives = sample_drives();
        assert_eq!(search(&drives, ""), drives);
        assert_eq!(search(&drives, "   "), drives);
    }

    #[test]
    fn test_status_filter_all_is_identity() {
        let drives = sample_drives();
        assert_eq!(filter_status(&drives, StatusFilter::All), drives);

        let open = filter_status(&drives, StatusFilter::Only(DriveStatus::Open));
        assert_eq!(ids(&open), vec!["1", "2"]);
    }

    #[test]
    fn test_status_filter_parse() {
        let all: StatusFilter<ApplicantStatus> = "all".parse().unwrap();
        assert_eq!(all, StatusFilter::All);
        let only: StatusFilter<ApplicantStatus> = "selected".parse().unwrap();
        assert_eq!(only, StatusFilter::Only(ApplicantStatus::Selected));
        assert!("hired".parse::<StatusFilter<ApplicantStatus>>().is_err());
    }

    #[test]
    fn test_bulk_status_only_touches_status() {
        let applicants = vec![Applicant::new("s1", "Aarav Sharma", "CSE", 8.2, ApplicantStatus::Applied)];
        let updated = bulk_status(&applicants, ApplicantStatus::Shortlisted);
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].id, "s1");
        assert_eq!(updated[0].status, ApplicantStatus::Shortlisted);
        assert_eq!(updated[0].cgpa, 8.2);
        assert_eq!(updated[0].name, "Aarav Sharma");
    }

    #[test]
    fn test_bulk_status_every_target() {
        let applicants = Applicant::seed();
        for status in ApplicantStatus::ALL {
            let updated = bulk_status(&applicants, *status);
            for (before, after) in applicants.iter().zip(&updated) {
                assert_eq!(after.status, *status);
                assert_eq!(after.with_status(before.status), *before);
            }
        }
    }

    #[test]
    fn test_sort_by_date_is_stable() {
        let drives = sample_drives();
        let asc = sort_by_date(&drives, SortDirection::Ascending);
        assert_eq!(ids(&asc), vec!["3", "1", "4", "2"]);

        let desc = sort_by_date(&drives, SortDirection::Descending);
        assert_eq!(ids(&desc), vec!["2", "1", "4", "3"]);
    }

    #[test]
    fn test_upcoming_excludes_past_and_truncates() {
        let drives = sample_drives();
        let today = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();

        let next = upcoming(&drives, today, 2);
        assert_eq!(ids(&next), vec!["1", "4"]);
        assert!(next.iter().all(|d| d.deadline >= today));

        let all_upcoming = upcoming(&drives, today, 10);
        assert_eq!(ids(&all_upcoming), vec!["1", "4", "2"]);

        let later = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        assert!(upcoming(&drives, later, 3).is_empty());
    }

    #[test]
    fn test_announcement_dates_use_calendar_day() {
        let post = AnnouncementPost {
            id: "1".to_string(),
            text: "Interview schedule".to_string(),
            file_name: Some("schedule.pdf".to_string()),
            file_data_url: None,
            created_at: Utc.with_ymd_and_hms(2024, 1, 15, 23, 59, 0).unwrap(),
        };
        let today = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(upcoming(&[post.clone()], today, 1).len(), 1);
        assert_eq!(search(&[post], "SCHEDULE.PDF").len(), 1);
    }

    #[test]
    fn test_overview_counts() {
        let stats = overview(&sample_drives());
        assert_eq!(stats.open_drives, 2);
        assert_eq!(stats.total_applicants, 40);
        assert_eq!(stats.total_drives, 4);
    }

    #[test]
    fn test_applications_newest_first() {
        let drives = sample_drives();
        let mut markers = BTreeMap::new();
        markers.insert("1".to_string(), Utc.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap());
        markers.insert("2".to_string(), Utc.with_ymd_and_hms(2024, 1, 6, 9, 0, 0).unwrap());
        markers.insert("gone".to_string(), Utc.with_ymd_and_hms(2024, 1, 7, 9, 0, 0).unwrap());

        let applied = applications(&drives, &markers);
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0].drive.id, "2");
        assert_eq!(applied[1].drive.id, "1");
    }
}
