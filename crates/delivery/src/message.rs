//! Report mail composition.

use chrono::{DateTime, Utc};

use reportworks_queue::JobEnvelope;
use reportworks_reports::BuiltReport;

/// A composed transactional mail ready for the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportMail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub attachment_name: String,
    pub attachment: Vec<u8>,
}

/// Deterministic, filesystem-safe attachment filename:
/// whitespace runs become `-`, unsafe characters are dropped, the ISO
/// creation date and the fixed extension are appended.
pub fn attachment_filename(report_name: &str, created_at: DateTime<Utc>) -> String {
    let stem: String = report_name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect();
    let stem = if stem.is_empty() { "report" } else { &stem };
    format!(
        "{stem}-{}.{}",
        created_at.format("%Y-%m-%d"),
        BuiltReport::FILE_EXTENSION
    )
}

/// Compose the delivery mail for a finished job.
pub fn compose_report_mail(envelope: &JobEnvelope, report: &BuiltReport) -> ReportMail {
    let subject = format!("{} report", envelope.report_name);
    let html_body = format!(
        "<p>Your <strong>{}</strong> report is ready.</p>\
         <p>{} record(s) are included in the attached spreadsheet.</p>",
        envelope.report_name, report.rows
    );

    ReportMail {
        to: envelope.email_to.clone(),
        subject,
        html_body,
        attachment_name: attachment_filename(&envelope.report_name, envelope.created_at),
        attachment: report.bytes.clone(),
    }
}
