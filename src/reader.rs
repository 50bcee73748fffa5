//! Log file reader - turns CSV, JSON and NDJSON files into log records

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::error::{AppError, Result};
use crate::models::{FileType, LogRecord};

/// On-disk layout of a log file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    /// Line-delimited objects, or a single top-level array
    Json,
    Ndjson,
}

impl FileFormat {
    /// Guess the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(FileFormat::Csv),
            "json" => Some(FileFormat::Json),
            "ndjson" | "jsonl" => Some(FileFormat::Ndjson),
            _ => None,
        }
    }
}

impl TryFrom<FileType> for FileFormat {
    type Error = AppError;

    fn try_from(file_type: FileType) -> Result<Self> {
        match file_type {
            FileType::Csv => Ok(FileFormat::Csv),
            FileType::Json => Ok(FileFormat::Json),
            FileType::Ndjson => Ok(FileFormat::Ndjson),
            FileType::Txt => Err(AppError::Validation(
                "Plain text files cannot be read as structured logs".into(),
            )),
        }
    }
}

/// Lazy, single-pass sequence of records read from one file.
///
/// Re-open the file to read it again.
pub struct LogRecords {
    path: PathBuf,
    source: Source,
}

enum Source {
    Empty,
    Lines {
        lines: io::Lines<BufReader<File>>,
        line_no: usize,
    },
    Array(std::vec::IntoIter<Value>, usize),
    Csv {
        rows: csv::StringRecordsIntoIter<File>,
        headers: csv::StringRecord,
    },
}

/// Open `path` for reading in the given format.
///
/// A missing file yields an empty sequence: no file means no data for that type.
pub fn open(path: &Path, format: FileFormat) -> Result<LogRecords> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(LogRecords {
                path: path.to_path_buf(),
                source: Source::Empty,
            })
        }
        Err(e) => return Err(read_error(path, e)),
    };

    let source = match format {
        FileFormat::Csv => csv_source(path, file)?,
        FileFormat::Ndjson => {
            let mut reader = BufReader::new(file);
            let (_, skipped) = skip_whitespace(&mut reader).map_err(|e| read_error(path, e))?;
            Source::Lines {
                lines: reader.lines(),
                line_no: skipped,
            }
        }
        FileFormat::Json => {
            let mut reader = BufReader::new(file);
            let (first, skipped) =
                skip_whitespace(&mut reader).map_err(|e| read_error(path, e))?;
            if first == Some(b'[') {
                let values: Vec<Value> = serde_json::from_reader(reader).map_err(|e| {
                    AppError::Parse(format!("{}: {}", path.display(), e))
                })?;
                Source::Array(values.into_iter(), 0)
            } else {
                Source::Lines {
                    lines: reader.lines(),
                    line_no: skipped,
                }
            }
        }
    };

    Ok(LogRecords {
        path: path.to_path_buf(),
        source,
    })
}

/// Read every record of a file, failing on the first malformed entry
pub fn read_all(path: &Path, format: FileFormat) -> Result<Vec<LogRecord>> {
    open(path, format)?.collect()
}

impl Iterator for LogRecords {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = &self.path;
        match &mut self.source {
            Source::Empty => None,
            Source::Lines { lines, line_no } => loop {
                let line = lines.next()?;
                *line_no += 1;
                let line = match line {
                    Ok(l) => l,
                    Err(e) => return Some(Err(read_error(path, e))),
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                return Some(
                    serde_json::from_str::<Value>(trimmed)
                        .map_err(|e| {
                            AppError::Parse(format!("{} line {}: {}", path.display(), line_no, e))
                        })
                        .and_then(|v| into_record(v, path, *line_no)),
                );
            },
            Source::Array(values, index) => {
                let value = values.next()?;
                *index += 1;
                Some(into_record(value, path, *index))
            }
            Source::Csv { rows, headers } => {
                let row = rows.next()?;
                Some(
                    row.map(|row| csv_record(headers, &row))
                        .map_err(|e| AppError::Parse(format!("{}: {}", path.display(), e))),
                )
            }
        }
    }
}

fn csv_source(path: &Path, file: File) -> Result<Source> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(file);
    let headers = reader
        .headers()
        .map_err(|e| AppError::Parse(format!("{}: {}", path.display(), e)))?
        .clone();
    Ok(Source::Csv {
        rows: reader.into_records(),
        headers,
    })
}

/// Columns beyond the header row are named by position (`_5`, `_6`, ...)
fn csv_record(headers: &csv::StringRecord, row: &csv::StringRecord) -> LogRecord {
    let mut fields = Map::new();
    for (i, value) in row.iter().enumerate() {
        let name = match headers.get(i) {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => format!("_{}", i),
        };
        fields.insert(name, Value::String(value.to_string()));
    }
    LogRecord::new(fields)
}

fn into_record(value: Value, path: &Path, position: usize) -> Result<LogRecord> {
    match value {
        Value::Object(map) => Ok(LogRecord::new(map)),
        other => Err(AppError::Parse(format!(
            "{} entry {}: expected a JSON object, found {}",
            path.display(),
            position,
            kind_of(&other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Consume leading whitespace and report the first significant byte plus
/// how many newlines were skipped.
fn skip_whitespace(reader: &mut BufReader<File>) -> io::Result<(Option<u8>, usize)> {
    let mut newlines = 0;
    loop {
        let (consumed, first) = {
            let buf = reader.fill_buf()?;
            if buf.is_empty() {
                return Ok((None, newlines));
            }
            match buf.iter().position(|b| !b.is_ascii_whitespace()) {
                Some(pos) => (pos, Some(buf[pos])),
                None => (buf.len(), None),
            }
        };
        {
            let buf = reader.fill_buf()?;
            newlines += buf[..consumed].iter().filter(|&&b| b == b'\n').count();
        }
        reader.consume(consumed);
        if first.is_some() {
            return Ok((first, newlines));
        }
    }
}

fn read_error(path: &Path, err: io::Error) -> AppError {
    AppError::Internal(format!("failed to read {}: {}", path.display(), err))
}
