use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::codec::CsvRow;

/// Closed set of values a status column may hold.
pub trait StatusValue: Copy + PartialEq + fmt::Display + FromStr + 'static {
    const ALL: &'static [Self];
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown status '{}'", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

fn parse_status<S: StatusValue>(s: &str) -> Result<S, UnknownStatus> {
    let wanted = s.trim();
    S::ALL
        .iter()
        .copied()
        .find(|status| status.to_string().eq_ignore_ascii_case(wanted))
        .ok_or_else(|| UnknownStatus(s.to_string()))
}

// --- Drive ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriveStatus {
    #[serde(alias = "active")]
    Open,
    Closed,
    #[serde(alias = "upcoming")]
    Draft,
}

impl StatusValue for DriveStatus {
    const ALL: &'static [Self] = &[DriveStatus::Open, DriveStatus::Closed, DriveStatus::Draft];
}

impl fmt::Display for DriveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DriveStatus::Open => "open",
            DriveStatus::Closed => "closed",
            DriveStatus::Draft => "draft",
        })
    }
}

impl FromStr for DriveStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(DriveStatus::Open),
            "upcoming" => Ok(DriveStatus::Draft),
            _ => parse_status(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Drive {
    pub id: String,
    pub company_name: String,
    pub role: String,
    pub package: String,
    pub deadline: NaiveDate,
    pub status: DriveStatus,
    #[serde(rename = "applicants", default)]
    pub applicant_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,
}

/// Fields an officer fills in when creating a drive; the id is assigned on insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDrive {
    pub company_name: String,
    pub role: String,
    pub package: String,
    pub deadline: NaiveDate,
    pub status: DriveStatus,
    pub description: Option<String>,
    pub requirements: Option<String>,
}

impl NewDrive {
    pub fn into_drive(self, id: String) -> Drive {
        Drive {
            id,
            company_name: self.company_name,
            role: self.role,
            package: self.package,
            deadline: self.deadline,
            status: self.status,
            applicant_count: 0,
            description: self.description,
            requirements: self.requirements,
        }
    }
}

/// Partial update; `None` leaves the field as it is.
#[derive(Debug, Clone, Default)]
pub struct DrivePatch {
    pub company_name: Option<String>,
    pub role: Option<String>,
    pub package: Option<String>,
    pub deadline: Option<NaiveDate>,
    pub status: Option<DriveStatus>,
    pub applicant_count: Option<u32>,
    pub description: Option<String>,
    pub requirements: Option<String>,
}

impl DrivePatch {
    pub fn apply(self, drive: &Drive) -> Drive {
        Drive {
            id: drive.id.clone(),
            company_name: self.company_name.unwrap_or_else(|| drive.company_name.clone()),
            role: self.role.unwrap_or_else(|| drive.role.clone()),
            package: self.package.unwrap_or_else(|| drive.package.clone()),
            deadline: self.deadline.unwrap_or(drive.deadline),
            status: self.status.unwrap_or(drive.status),
            applicant_count: self.applicant_count.unwrap_or(drive.applicant_count),
            description: self.description.or_else(|| drive.description.clone()),
            requirements: self.requirements.or_else(|| drive.requirements.clone()),
        }
    }
}

// --- Applicant ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplicantStatus {
    Applied,
    Shortlisted,
    Selected,
    Rejected,
}

impl StatusValue for ApplicantStatus {
    const ALL: &'static [Self] = &[
        ApplicantStatus::Applied,
        ApplicantStatus::Shortlisted,
        ApplicantStatus::Selected,
        ApplicantStatus::Rejected,
    ];
}

impl fmt::Display for ApplicantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ApplicantStatus::Applied => "Applied",
            ApplicantStatus::Shortlisted => "Shortlisted",
            ApplicantStatus::Selected => "Selected",
            ApplicantStatus::Rejected => "Rejected",
        })
    }
}

impl FromStr for ApplicantStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_status(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Applicant {
    pub id: String,
    pub name: String,
    pub branch: String,
    pub cgpa: f64,
    pub status: ApplicantStatus,
}

impl Applicant {
    /// Sample rows shown for a drive that has never had applicants stored.
    pub fn seed() -> Vec<Applicant> {
        vec![
            Applicant::new("s1", "Aarav Sharma", "CSE", 8.2, ApplicantStatus::Applied),
            Applicant::new("s2", "Priya Verma", "ECE", 7.6, ApplicantStatus::Shortlisted),
            Applicant::new("s3", "Rahul Mehta", "EEE", 6.9, ApplicantStatus::Applied),
        ]
    }

    pub fn new(id: &str, name: &str, branch: &str, cgpa: f64, status: ApplicantStatus) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            branch: branch.to_string(),
            cgpa,
            status,
        }
    }

    /// Coerces one imported CSV row. Never fails: missing text becomes empty,
    /// a bad CGPA becomes 0 and an unknown status becomes `Applied`.
    pub fn from_csv_row(row: &CsvRow) -> Self {
        Self {
            id: csv_id(row),
            name: csv_field(row, "name").to_string(),
            branch: csv_field(row, "branch").to_string(),
            cgpa: parse_cgpa(csv_field(row, "cgpa")),
            status: csv_field(row, "status")
                .parse()
                .unwrap_or(ApplicantStatus::Applied),
        }
    }
}

pub fn parse_cgpa(raw: &str) -> f64 {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

// --- Result row ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultStatus {
    Selected,
    Rejected,
    Waitlisted,
}

impl StatusValue for ResultStatus {
    const ALL: &'static [Self] = &[
        ResultStatus::Selected,
        ResultStatus::Rejected,
        ResultStatus::Waitlisted,
    ];
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResultStatus::Selected => "Selected",
            ResultStatus::Rejected => "Rejected",
            ResultStatus::Waitlisted => "Waitlisted",
        })
    }
}

impl FromStr for ResultStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_status(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub id: String,
    pub name: String,
    pub status: ResultStatus,
}

impl ResultRow {
    pub fn from_csv_row(row: &CsvRow) -> Self {
        Self {
            id: csv_id(row),
            name: csv_field(row, "name").to_string(),
            status: csv_field(row, "status")
                .parse()
                .unwrap_or(ResultStatus::Selected),
        }
    }
}

// --- Announcement ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncementPost {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_data_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A file attached to an announcement, already inlined as a data URI.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub file_name: String,
    pub data_url: String,
}

// --- Application marker ---

/// Whether the current student applied to a drive during this session.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationMarker {
    pub drive_id: String,
    pub applied_at: Option<DateTime<Utc>>,
}

impl ApplicationMarker {
    pub fn applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

// --- CSV helpers ---

fn csv_field<'a>(row: &'a CsvRow, name: &str) -> &'a str {
    row.get(name).map(|v| v.trim()).unwrap_or("")
}

fn csv_id(row: &CsvRow) -> String {
    let id = csv_field(row, "id");
    if id.is_empty() {
        random_id()
    } else {
        id.to_string()
    }
}

pub fn random_id() -> String {
    rand::thread_rng()
        .gen_range(1_000_000_000u64..10_000_000_000u64)
        .to_string()
}
