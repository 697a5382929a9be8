//! Export rendering for patient records.

mod text;

pub use text::*;

use crate::models::PatientRecord;

/// Pure formatting collaborator; no business logic lives here.
pub trait ExportRenderer {
    /// Render a printable single-record summary.
    fn render_record(&self, record: &PatientRecord) -> Vec<u8>;

    /// Render all records as CSV.
    fn render_csv(&self, records: &[PatientRecord]) -> String;
}
