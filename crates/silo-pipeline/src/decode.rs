//! Format decoders: CSV (users) and NDJSON (articles, comments).
//!
//! Both decoders are streaming — one row in memory at a time. Row
//! numbers are 1-based physical lines from the start of the payload;
//! the CSV header is row 1, so the first data row is row 2.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::marker::PhantomData;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use silo_model::{User, ValidationError};

use crate::error::PipelineError;

/// One decoded physical row: either a typed record with its row number
/// or a row-level decode failure that skips the record.
pub(crate) enum Decoded<T> {
    Record { row: u64, record: T },
    Invalid(ValidationError),
}

/// CSV decoder for users.
///
/// The first row is a header and builds a column-name → index map;
/// missing columns are tolerated (empty cells map to zero values) and
/// unknown columns are ignored.
pub(crate) struct CsvUserDecoder {
    reader: csv::Reader<BufReader<File>>,
    columns: HashMap<String, usize>,
    row: u64,
}

impl CsvUserDecoder {
    pub(crate) fn open(path: &Path) -> Result<Self, PipelineError> {
        let file = File::open(path)?;
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(BufReader::new(file));
        let columns = reader
            .headers()?
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim().to_ascii_lowercase(), i))
            .collect();
        Ok(Self {
            reader,
            columns,
            row: 1,
        })
    }

    fn field<'r>(&self, record: &'r csv::StringRecord, name: &str) -> &'r str {
        self.columns
            .get(name)
            .and_then(|&i| record.get(i))
            .unwrap_or("")
            .trim()
    }

    pub(crate) fn next_row(&mut self) -> Option<Result<Decoded<User>, PipelineError>> {
        let mut record = csv::StringRecord::new();
        match self.reader.read_record(&mut record) {
            Ok(false) => None,
            Ok(true) => {
                self.row += 1;
                Some(Ok(self.decode(&record)))
            }
            Err(e) => {
                // Malformed CSV (bad quoting, invalid UTF-8): skip the
                // row, keep reading.
                self.row += 1;
                Some(Ok(Decoded::Invalid(ValidationError::new(
                    self.row,
                    "parsing",
                    "",
                    e.to_string(),
                ))))
            }
        }
    }

    fn decode(&self, record: &csv::StringRecord) -> Decoded<User> {
        let row = self.row;

        let id_raw = self.field(record, "id");
        let id = if id_raw.is_empty() {
            Uuid::nil()
        } else {
            match Uuid::parse_str(id_raw) {
                Ok(id) => id,
                Err(e) => {
                    return Decoded::Invalid(ValidationError::new(
                        row,
                        "parsing",
                        id_raw,
                        format!("invalid id: {}", e),
                    ))
                }
            }
        };

        let active_raw = self.field(record, "active");
        let active = if active_raw.is_empty() {
            false
        } else {
            match active_raw.parse::<bool>() {
                Ok(v) => v,
                Err(_) => {
                    return Decoded::Invalid(ValidationError::new(
                        row,
                        "parsing",
                        active_raw,
                        "invalid boolean, expected true or false",
                    ))
                }
            }
        };

        let created_at = match parse_timestamp(self.field(record, "created_at")) {
            Ok(ts) => ts,
            Err(value) => {
                return Decoded::Invalid(ValidationError::new(
                    row,
                    "parsing",
                    value,
                    "invalid created_at, expected RFC-3339",
                ))
            }
        };
        let updated_at = match parse_timestamp(self.field(record, "updated_at")) {
            Ok(ts) => ts,
            Err(value) => {
                return Decoded::Invalid(ValidationError::new(
                    row,
                    "parsing",
                    value,
                    "invalid updated_at, expected RFC-3339",
                ))
            }
        };

        Decoded::Record {
            row,
            record: User {
                id,
                email: self.field(record, "email").to_string(),
                name: self.field(record, "name").to_string(),
                role: self.field(record, "role").to_string(),
                active,
                created_at,
                updated_at,
            },
        }
    }
}

fn parse_timestamp(raw: &str) -> Result<Option<DateTime<Utc>>, String> {
    if raw.is_empty() {
        return Ok(None);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| Some(ts.with_timezone(&Utc)))
        .map_err(|_| raw.to_string())
}

/// NDJSON decoder: one JSON object per line, blank lines skipped, a
/// malformed line becomes a row-level "json" error.
pub(crate) struct NdjsonDecoder<T> {
    lines: Lines<BufReader<File>>,
    row: u64,
    _kind: PhantomData<T>,
}

impl<T: DeserializeOwned> NdjsonDecoder<T> {
    pub(crate) fn open(path: &Path) -> Result<Self, PipelineError> {
        let file = File::open(path)?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            row: 0,
            _kind: PhantomData,
        })
    }

    pub(crate) fn next_row(&mut self) -> Option<Result<Decoded<T>, PipelineError>> {
        loop {
            let line = match self.lines.next() {
                None => return None,
                Some(Ok(line)) => line,
                Some(Err(e)) => return Some(Err(e.into())),
            };
            self.row += 1;
            if line.trim().is_empty() {
                continue;
            }
            return Some(Ok(match serde_json::from_str::<T>(&line) {
                Ok(record) => Decoded::Record {
                    row: self.row,
                    record,
                },
                Err(e) => Decoded::Invalid(ValidationError::new(
                    self.row,
                    "json",
                    line.trim(),
                    e.to_string(),
                )),
            }));
        }
    }
}
