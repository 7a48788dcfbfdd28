use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ParsingErrorReason {
    BadTimestampFormat,
    BadWeightFormat,
    DuplicateItemId,
    BadUserIdFormat,
    BadItemIdFormat,
    MalformedLine,
    EmptyLine,
}

/// One problem found on one line of an input file.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParsingError {
    pub line_content: Option<String>,
    pub line_number: u64,
    pub reason: ParsingErrorReason,
}

impl ParsingError {
    pub fn new(line_number: u64, line_content: Option<&str>, reason: ParsingErrorReason) -> Self {
        Self {
            line_content: line_content.map(str::to_string),
            line_number,
            reason,
        }
    }
}

/// Raw parser output, before grouping.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileParsingReport {
    pub successful_lines_count: u64,
    pub errors: Vec<ParsingError>,
    pub warnings: Vec<ParsingError>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParsingReportEntry {
    pub error: ParsingErrorReason,
    pub count: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParsingReport {
    pub successful_lines_count: u64,
    pub duration: Duration,
    /// Grouped errors followed by grouped warnings.
    pub errors: Vec<ParsingReportEntry>,
    pub destination_path: Option<String>,
}
