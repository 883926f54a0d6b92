use crate::models::EventRecord;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while reading a record file
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("IO error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Line {line}: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },
}

/// Read event records from a JSON-lines file
pub struct JsonlReader {
    file_path: PathBuf,
}

impl JsonlReader {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        JsonlReader {
            file_path: file_path.as_ref().to_path_buf(),
        }
    }

    /// Read every record in the file.
    ///
    /// Blank lines are skipped. The first malformed line aborts the read so
    /// that a partially broken file is never half-published.
    pub fn read_records(&self) -> Result<Vec<EventRecord>, ReadError> {
        let file = File::open(&self.file_path).map_err(|source| ReadError::Io {
            path: self.file_path.clone(),
            source,
        })?;
        Self::parse(BufReader::new(file), &self.file_path)
    }

    fn parse<R: BufRead>(reader: R, path: &Path) -> Result<Vec<EventRecord>, ReadError> {
        let mut records = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| ReadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let record = serde_json::from_str(trimmed).map_err(|source| ReadError::Parse {
                line: idx + 1,
                source,
            })?;
            records.push(record);
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const LINE: &str = r#"{"id":"a","timestamp":"2024-05-01T10:00:00Z","serviceName":"auth-service","logLevel":"WARN","eventType":"login_failed","sourceIp":"66.66.66.66","responseTimeMs":15}"#;

    #[test]
    fn test_reads_records_and_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", LINE).unwrap();
        writeln!(file).unwrap();
        writeln!(file, "{}", LINE.replace("\"a\"", "\"b\"")).unwrap();

        let records = JsonlReader::new(file.path()).read_records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].id, "b");
        assert_eq!(records[0].source_ip, "66.66.66.66");
    }

    #[test]
    fn test_reports_bad_line_number() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", LINE).unwrap();
        writeln!(file, "{{broken").unwrap();

        match JsonlReader::new(file.path()).read_records() {
            Err(ReadError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {:?}", other.map(|r| r.len())),
        }
    }

    #[test]
    fn test_missing_file() {
        let result = JsonlReader::new("/nonexistent/records.jsonl").read_records();
        assert!(matches!(result, Err(ReadError::Io { .. })));
    }
}
