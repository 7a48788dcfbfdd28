use std::collections::HashSet;
use std::io::BufRead;

use chrono::{DateTime, NaiveDateTime};
use thiserror::Error;

use crate::{FileParsingReport, ParsingError, ParsingErrorReason};

pub const MAX_ID_LEN: usize = 450;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("IO error at line {line}: {source}")]
    Io {
        line: u64,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ParseError>;

/// Turns a raw input file into per-line errors and warnings.
pub trait FileParser: Send + Sync {
    fn parse(&self, input: &mut dyn BufRead) -> Result<FileParsingReport>;
}

/// Usage events: `userId,itemId,timestamp[,weight]`, one per line.
///
/// A `(userId, itemId)` pair seen earlier in the file is reported as a
/// `DuplicateItemId` warning and the line is skipped.
#[derive(Clone, Debug, Default)]
pub struct UsageFileParser;

impl UsageFileParser {
    pub fn new() -> Self {
        Self
    }
}

impl FileParser for UsageFileParser {
    fn parse(&self, input: &mut dyn BufRead) -> Result<FileParsingReport> {
        let mut report = FileParsingReport::default();
        let mut seen = HashSet::<(String, String)>::new();

        for (i, line) in input.lines().enumerate() {
            let line_no = i as u64 + 1;
            let line = line.map_err(|source| ParseError::Io { line: line_no, source })?;

            if line.trim().is_empty() {
                report.warnings.push(ParsingError::new(line_no, None, ParsingErrorReason::EmptyLine));
                continue;
            }

            let (user_id, item_id) = match parse_usage_line(&line) {
                Ok(ids) => ids,
                Err(reason) => {
                    report.errors.push(ParsingError::new(line_no, Some(&line), reason));
                    continue;
                }
            };

            if !seen.insert((user_id.to_string(), item_id.to_string())) {
                report
                    .warnings
                    .push(ParsingError::new(line_no, Some(&line), ParsingErrorReason::DuplicateItemId));
                continue;
            }

            report.successful_lines_count += 1;
        }

        Ok(report)
    }
}

/// Validates one usage line and returns its `(userId, itemId)` pair.
fn parse_usage_line(line: &str) -> std::result::Result<(&str, &str), ParsingErrorReason> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 3 && fields.len() != 4 {
        return Err(ParsingErrorReason::MalformedLine);
    }

    let user_id = fields[0];
    if !is_valid_id(user_id) {
        return Err(ParsingErrorReason::BadUserIdFormat);
    }
    let item_id = fields[1];
    if !is_valid_id(item_id) {
        return Err(ParsingErrorReason::BadItemIdFormat);
    }

    if parse_timestamp(fields[2]).is_none() {
        return Err(ParsingErrorReason::BadTimestampFormat);
    }

    if let Some(raw) = fields.get(3) {
        if !raw.parse::<f64>().is_ok_and(f64::is_finite) {
            return Err(ParsingErrorReason::BadWeightFormat);
        }
    }

    Ok((user_id, item_id))
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.naive_utc());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(text: &str) -> FileParsingReport {
        UsageFileParser::new().parse(&mut Cursor::new(text.as_bytes())).unwrap()
    }

    fn reasons(items: &[ParsingError]) -> Vec<ParsingErrorReason> {
        items.iter().map(|e| e.reason).collect()
    }

    #[test]
    fn test_valid_lines_counted() {
        let r = parse("u1,i1,2024-01-01T10:00:00\nu1,i2,2024-01-01T10:00:00Z,2.5\n");
        assert_eq!(r.successful_lines_count, 2);
        assert!(r.errors.is_empty());
        assert!(r.warnings.is_empty());
    }

    #[test]
    fn test_bad_fields_classified() {
        let r = parse(concat!(
            "u1,i1,yesterday\n",
            "u1,i2,2024-01-01T10:00:00,heavy\n",
            "u 1,i3,2024-01-01T10:00:00\n",
            "u1,,2024-01-01T10:00:00\n",
            "u1\n",
        ));

        assert_eq!(r.successful_lines_count, 0);
        assert_eq!(
            reasons(&r.errors),
            vec![
                ParsingErrorReason::BadTimestampFormat,
                ParsingErrorReason::BadWeightFormat,
                ParsingErrorReason::BadUserIdFormat,
                ParsingErrorReason::BadItemIdFormat,
                ParsingErrorReason::MalformedLine,
            ]
        );
        assert_eq!(r.errors[0].line_number, 1);
        assert_eq!(r.errors[0].line_content.as_deref(), Some("u1,i1,yesterday"));
    }

    #[test]
    fn test_duplicate_pair_is_warning() {
        let r = parse(concat!(
            "u1,i1,2024-01-01T10:00:00\n",
            "u1,i1,2024-01-02T10:00:00\n",
            "u2,i1,2024-01-02T10:00:00\n",
        ));

        assert_eq!(r.successful_lines_count, 2);
        assert_eq!(reasons(&r.warnings), vec![ParsingErrorReason::DuplicateItemId]);
        assert_eq!(r.warnings[0].line_number, 2);
    }

    #[test]
    fn test_blank_line_is_warning() {
        let r = parse("u1,i1,2024-01-01T10:00:00\n\n");
        assert_eq!(r.successful_lines_count, 1);
        assert_eq!(reasons(&r.warnings), vec![ParsingErrorReason::EmptyLine]);
    }

    #[test]
    fn test_id_too_long() {
        let long = "a".repeat(MAX_ID_LEN + 1);
        let r = parse(&format!("{long},i1,2024-01-01T10:00:00\n"));
        assert_eq!(reasons(&r.errors), vec![ParsingErrorReason::BadUserIdFormat]);
    }

    #[test]
    fn test_non_finite_weight_rejected() {
        assert_eq!(
            parse_usage_line("u1,i1,2024-01-01T10:00:00,NaN"),
            Err(ParsingErrorReason::BadWeightFormat)
        );
    }
}
