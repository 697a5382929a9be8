//! Plain-text record summary and CSV rendering.

use super::ExportRenderer;
use crate::models::PatientRecord;

/// Renders a labelled plain-text summary per record and a quoted CSV for
/// record lists.
#[derive(Debug, Clone, Default)]
pub struct PlainTextRenderer;

impl PlainTextRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl ExportRenderer for PlainTextRenderer {
    fn render_record(&self, record: &PatientRecord) -> Vec<u8> {
        let mut out = String::new();
        out.push_str("Patient Medical Record\n");
        out.push_str("======================\n\n");

        push_field(&mut out, "Patient ID", Some(&record.patient_external_id));
        push_field(
            &mut out,
            "Name",
            Some(&format!("{} {}", record.first_name, record.last_name)),
        );
        push_field(&mut out, "Date of Birth", record.date_of_birth.as_deref());
        push_field(&mut out, "Gender", record.gender.as_deref());
        push_field(&mut out, "Diagnosis", record.diagnosis.as_deref());
        push_field(&mut out, "Treatment Plan", record.treatment_plan.as_deref());
        push_field(&mut out, "Notes", record.notes.as_deref());
        push_field(&mut out, "Sync Status", Some(record.sync_status.as_str()));

        out.push_str(&format!(
            "\nGenerated: {}\n",
            chrono::Utc::now().to_rfc3339()
        ));
        out.into_bytes()
    }

    fn render_csv(&self, records: &[PatientRecord]) -> String {
        let mut csv = String::new();
        csv.push_str(
            "patient_id,first_name,last_name,date_of_birth,gender,diagnosis,sync_status\n",
        );

        for record in records {
            csv.push_str(&format!(
                "{},{},{},{},{},{},{}\n",
                escape_csv(&record.patient_external_id),
                escape_csv(&record.first_name),
                escape_csv(&record.last_name),
                escape_csv(record.date_of_birth.as_deref().unwrap_or("")),
                escape_csv(record.gender.as_deref().unwrap_or("")),
                escape_csv(record.diagnosis.as_deref().unwrap_or("")),
                record.sync_status.as_str(),
            ));
        }
        csv
    }
}

fn push_field(out: &mut String, label: &str, value: Option<&str>) {
    let value = match value {
        Some(v) if !v.is_empty() => v,
        _ => "Not provided",
    };
    out.push_str(&format!("{}: {}\n", label, value));
}

/// Escape a string for CSV output.
fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
