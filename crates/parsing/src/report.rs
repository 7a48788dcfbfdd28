use std::time::Duration;

use crate::{FileParsingReport, ParsingError, ParsingReport, ParsingReportEntry};

/// Reduce a parser's raw output into the user-facing report.
///
/// Errors and warnings are grouped by reason independently and then emitted
/// through the same `errors` list, errors first. A reason present in both
/// lists therefore yields two entries.
pub fn create_parsing_report(
    file_report: &FileParsingReport,
    duration: Duration,
    destination_path: Option<String>,
) -> ParsingReport {
    let mut errors = group_by_reason(&file_report.errors);
    errors.extend(group_by_reason(&file_report.warnings));

    ParsingReport {
        successful_lines_count: file_report.successful_lines_count,
        duration,
        errors,
        destination_path,
    }
}

/// One entry per distinct reason, in first-seen order.
pub fn group_by_reason(items: &[ParsingError]) -> Vec<ParsingReportEntry> {
    let mut out: Vec<ParsingReportEntry> = Vec::new();
    for item in items {
        match out.iter_mut().find(|e| e.error == item.reason) {
            Some(entry) => entry.count += 1,
            None => out.push(ParsingReportEntry { error: item.reason, count: 1 }),
        }
    }
    out
}
