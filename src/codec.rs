use anyhow::{anyhow, Context, Result};
use csv::{QuoteStyle, ReaderBuilder, Terminator, Trim, WriterBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::models::{Applicant, ResultRow};

/// One decoded CSV line: header name -> raw cell text.
pub type CsvRow = HashMap<String, String>;

// --- JSON (internal representation) ---

pub fn encode<T: Serialize>(records: &[T]) -> Result<String> {
    serde_json::to_string(records).context("Failed to encode records")
}

/// Records read back from one stored sequence. `skipped` counts entries that
/// could not be read even after repair.
#[derive(Debug)]
pub struct Decoded<T> {
    pub records: Vec<T>,
    pub skipped: usize,
}

/// Decodes a JSON array one entry at a time. An entry that does not fit `T`
/// is passed through `repair` and tried once more; if it still does not fit it
/// is skipped, leaving its neighbours intact. Text that is not a JSON array at
/// all is an error.
pub fn decode_each<T: DeserializeOwned>(text: &str, repair: impl Fn(&mut Value)) -> Result<Decoded<T>> {
    let values: Vec<Value> = serde_json::from_str(text).context("Failed to decode records")?;

    let mut records = Vec::with_capacity(values.len());
    let mut skipped = 0;
    for (index, mut value) in values.into_iter().enumerate() {
        if let Ok(record) = <T as Deserialize>::deserialize(&value) {
            records.push(record);
            continue;
        }
        repair(&mut value);
        match <T as Deserialize>::deserialize(&value) {
            Ok(record) => {
                tracing::debug!(index, "Repaired stored record");
                records.push(record);
            }
            Err(e) => {
                tracing::warn!(index, error = %e, "Skipping unreadable stored record");
                skipped += 1;
            }
        }
    }
    Ok(Decoded { records, skipped })
}

// --- CSV ---

/// A record family with a fixed CSV column layout.
pub trait CsvRecord {
    const HEADERS: &'static [&'static str];

    fn csv_values(&self) -> Vec<String>;
}

impl CsvRecord for Applicant {
    const HEADERS: &'static [&'static str] = &["id", "name", "branch", "cgpa", "status"];

    fn csv_values(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.name.clone(),
            self.branch.clone(),
            self.cgpa.to_string(),
            self.status.to_string(),
        ]
    }
}

impl CsvRecord for ResultRow {
    const HEADERS: &'static [&'static str] = &["id", "name", "status"];

    fn csv_values(&self) -> Vec<String> {
        vec![self.id.clone(), self.name.clone(), self.status.to_string()]
    }
}

/// Header line of bare field names, then one line per record with every value
/// quoted. An empty sequence encodes to an empty file.
pub fn csv_encode<T: CsvRecord>(records: &[T]) -> Result<String> {
    if records.is_empty() {
        return Ok(String::new());
    }

    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .quote_style(QuoteStyle::Always)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    for record in records {
        writer
            .write_record(record.csv_values())
            .context("Failed to write CSV row")?;
    }
    let body = writer
        .into_inner()
        .map_err(|e| anyhow!("Failed to flush CSV writer: {}", e))?;

    let mut out = T::HEADERS.join(",");
    out.push('\n');
    out.push_str(&String::from_utf8(body).context("CSV output is not UTF-8")?);
    // no trailing newline after the last row
    if out.ends_with('\n') {
        out.pop();
    }
    Ok(out)
}

/// Maps every data line positionally onto the header line. Blank lines are
/// skipped, cells are trimmed and unquoted, short rows are padded with empty
/// strings and extra cells are dropped. No types are inferred.
pub fn csv_decode(text: &str) -> Result<Vec<CsvRow>> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV header line")?
        .iter()
        .map(|h| unquote(h).to_string())
        .collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Ok(Vec::new());
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.context("Failed to read CSV row")?;
        if record.iter().all(|cell| cell.is_empty()) {
            continue;
        }
        let row: CsvRow = headers
            .iter()
            .enumerate()
            .map(|(i, header)| {
                let cell = record.get(i).map(unquote).unwrap_or("");
                (header.clone(), cell.to_string())
            })
            .collect();
        rows.push(row);
    }

    Ok(rows)
}

/// Strips one pair of wrapping quotes left behind when a quoted cell was
/// padded with spaces and therefore parsed as unquoted text.
fn unquote(cell: &str) -> &str {
    let cell = cell.trim();
    if cell.len() >= 2 && cell.starts_with('"') && cell.ends_with('"') {
        &cell[1..cell.len() - 1]
    } else {
        cell
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApplicantStatus, ResultStatus};

    #[test]
    fn test_json_roundtrip_preserves_order() {
        let applicants = vec![
            Applicant::new("s2", "Priya Verma", "ECE", 7.6, ApplicantStatus::Shortlisted),
            Applicant::new("s1", "Aarav Sharma", "CSE", 8.2, ApplicantStatus::Applied),
        ];
        let text = encode(&applicants).unwrap();
        let decoded: Decoded<Applicant> = decode_each(&text, |_| {}).unwrap();
        assert_eq!(decoded.records, applicants);
        assert_eq!(decoded.skipped, 0);
    }

    #[test]
    fn test_decode_corrupt_text_fails() {
        assert!(decode_each::<Applicant>("{not json", |_| {}).is_err());
        assert!(decode_each::<Applicant>("", |_| {}).is_err());
        assert!(decode_each::<Applicant>("{\"id\":\"s1\"}", |_| {}).is_err());
    }

    #[test]
    fn test_decode_each_keeps_readable_neighbours() {
        let text = r#"[
            {"id":"r1","name":"Aarav","status":"Selected"},
            {"id":"r2","name":"Priya","status":"Pending"},
            {"name":"no id","status":"Selected"}
        ]"#;

        let strict: Decoded<ResultRow> = decode_each(text, |_| {}).unwrap();
        assert_eq!(strict.records.len(), 1);
        assert_eq!(strict.skipped, 2);

        let repaired: Decoded<ResultRow> = decode_each(text, |value| {
            value["status"] = Value::String("Waitlisted".to_string());
        })
        .unwrap();
        assert_eq!(repaired.records.len(), 2);
        assert_eq!(repaired.records[1].id, "r2");
        assert_eq!(repaired.records[1].status, ResultStatus::Waitlisted);
        // missing id cannot be repaired by fixing the status
        assert_eq!(repaired.skipped, 1);
    }

    #[test]
    fn test_csv_encode_layout() {
        let rows = vec![
            ResultRow {
                id: "r1".to_string(),
                name: "Aarav \"AJ\" Sharma".to_string(),
                status: ResultStatus::Selected,
            },
            ResultRow {
                id: "r2".to_string(),
                name: "Priya".to_string(),
                status: ResultStatus::Waitlisted,
            },
        ];
        let csv = csv_encode(&rows).unwrap();
        assert_eq!(
            csv,
            "id,name,status\n\"r1\",\"Aarav \"\"AJ\"\" Sharma\",\"Selected\"\n\"r2\",\"Priya\",\"Waitlisted\""
        );
    }

    #[test]
    fn test_csv_encode_empty_is_empty_file() {
        let rows: Vec<ResultRow> = Vec::new();
        assert_eq!(csv_encode(&rows).unwrap(), "");
        assert!(csv_decode("").unwrap().is_empty());
    }

    #[test]
    fn test_csv_decode_maps_headers() {
        let text = "\"id\", \"name\" ,status\r\n\r\n\"r1\",\"Aarav\",\"Selected\"\n\nr2 , Priya , Rejected\n";
        let rows = csv_decode(text).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], "r1");
        assert_eq!(rows[0]["name"], "Aarav");
        assert_eq!(rows[1]["name"], "Priya");
        assert_eq!(rows[1]["status"], "Rejected");
    }

    #[test]
    fn test_csv_decode_ragged_rows() {
        let text = "id,name,branch,cgpa,status\ns1,Aarav\ns2,Priya,ECE,7.6,Shortlisted,extra";
        let rows = csv_decode(text).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["branch"], "");
        assert_eq!(rows[0]["cgpa"], "");
        assert_eq!(rows[0]["status"], "");
        assert_eq!(rows[1].len(), 5);
        assert_eq!(rows[1]["status"], "Shortlisted");
    }

    #[test]
    fn test_csv_decode_handles_quoted_commas() {
        let text = "id,name,status\n\"r1\",\"Sharma, Aarav\",\"Selected\"";
        let rows = csv_decode(text).unwrap();
        assert_eq!(rows[0]["name"], "Sharma, Aarav");
    }

    #[test]
    fn test_csv_roundtrip_applicants() {
        let applicants = vec![
            Applicant::new("s1", "Aarav Sharma", "CSE", 8.2, ApplicantStatus::Applied),
            Applicant::new("s2", "Priya Verma", "ECE", 7.0, ApplicantStatus::Rejected),
        ];
        let rows = csv_decode(&csv_encode(&applicants).unwrap()).unwrap();
        let decoded: Vec<Applicant> = rows.iter().map(Applicant::from_csv_row).collect();
        assert_eq!(decoded, applicants);
    }
}
