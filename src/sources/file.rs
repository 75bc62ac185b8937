// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! File source reader
//!
//! Reads newline-delimited JSON or CSV files matched by a glob pattern.
//! Files are consumed in lexicographic path order, so new files must sort
//! after the ones already landed (date- or sequence-prefixed names do).
//! Offsets count records, never CSV header rows.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Component, Path, PathBuf};

use super::{RecordIter, SourceReader};
use crate::errors::{LiveflowError, LiveflowResult};
use crate::pipeline::Row;

/// Record layout of the files behind a source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Header row, then one record per row
    Csv,
}

impl SourceFormat {
    /// Guess the format from a path or glob pattern
    pub fn infer(pattern: &str) -> Self {
        if pattern.to_ascii_lowercase().ends_with(".csv") {
            Self::Csv
        } else {
            Self::Json
        }
    }
}

#[derive(Debug, Clone)]
struct SourceFiles {
    pattern: String,
    format: SourceFormat,
}

/// Reader for landing directories of NDJSON or CSV files
#[derive(Debug, Clone, Default)]
pub struct FileSource {
    /// Source name → files
    sources: HashMap<String, SourceFiles>,
    /// Base directory for relative patterns
    base_dir: PathBuf,
}

impl FileSource {
    /// Create a reader resolving relative patterns against `base_dir`
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            sources: HashMap::new(),
            base_dir,
        }
    }

    /// Register a source pattern, inferring the format from its extension
    pub fn with_source(self, name: impl Into<String>, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let format = SourceFormat::infer(&pattern);
        self.with_source_format(name, pattern, format)
    }

    /// Register a source pattern with an explicit format
    pub fn with_source_format(
        mut self,
        name: impl Into<String>,
        pattern: impl Into<String>,
        format: SourceFormat,
    ) -> Self {
        self.sources.insert(
            name.into(),
            SourceFiles {
                pattern: pattern.into(),
                format,
            },
        );
        self
    }

    fn files(&self, source: &str) -> LiveflowResult<&SourceFiles> {
        self.sources.get(source).ok_or_else(|| LiveflowError::SourceRead {
            source_name: source.to_string(),
            message: "no path configured for this source".into(),
        })
    }

    fn pattern(&self, source: &str) -> LiveflowResult<String> {
        let pattern = &self.files(source)?.pattern;

        Ok(if Path::new(pattern).is_absolute() {
            pattern.clone()
        } else {
            self.base_dir.join(pattern).to_string_lossy().to_string()
        })
    }

    /// Patterns this reader watches, resolved against the base directory
    pub fn watch_roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<_> = self
            .sources
            .keys()
            .filter_map(|name| self.pattern(name).ok())
            .map(|p| literal_prefix(&p))
            .collect();
        roots.sort();
        roots.dedup();
        roots
    }
}

/// Leading path components that contain no glob metacharacters
fn literal_prefix(pattern: &str) -> PathBuf {
    let mut prefix = PathBuf::new();
    for component in Path::new(pattern).components() {
        if let Component::Normal(part) = component {
            if part.to_string_lossy().contains(['*', '?', '[', '{']) {
                break;
            }
        }
        prefix.push(component);
    }
    prefix
}

/// Resolve a glob pattern to files, sorted for a stable read order
pub fn resolve_pattern(pattern: &str) -> LiveflowResult<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = glob::glob(pattern)?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// Lazily parse one NDJSON file
fn read_ndjson(source: String, path: PathBuf) -> RecordIter {
    let file = match File::open(&path) {
        Ok(f) => f,
        Err(e) => {
            return Box::new(std::iter::once(Err(LiveflowError::SourceRead {
                source_name: source,
                message: format!("{}: {}", path.display(), e),
            })))
        }
    };

    let records = BufReader::new(file)
        .lines()
        .enumerate()
        .filter(|(_, line)| line.as_ref().map_or(true, |l| !l.trim().is_empty()))
        .map(move |(n, line)| {
            let fail = |message: String| LiveflowError::SourceRead {
                source_name: source.clone(),
                message: format!("{}:{}: {}", path.display(), n + 1, message),
            };
            let line = line.map_err(|e| fail(e.to_string()))?;
            match serde_json::from_str::<serde_json::Value>(&line) {
                Ok(serde_json::Value::Object(row)) => Ok(row),
                Ok(_) => Err(fail("record is not a JSON object".into())),
                Err(e) => Err(fail(e.to_string())),
            }
        });

    Box::new(records)
}

/// Typed value of a CSV cell: empty is null, numbers and booleans are parsed
fn csv_cell(raw: &str) -> Value {
    let s = raw.trim();
    if s.is_empty() {
        return Value::Null;
    }

    // Keep zero-padded identifiers such as "007" as text
    let padded = s.len() > 1 && s.starts_with('0') && !s.starts_with("0.");
    if !padded {
        if let Ok(i) = s.parse::<i64>() {
            return Value::from(i);
        }
        if let Some(n) = s.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            return Value::Number(n);
        }
    }

    match s {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::from(s.to_string()),
    }
}

/// Lazily parse one CSV file; the header row names the columns
fn read_csv(source: String, path: PathBuf) -> RecordIter {
    let fail = |source: &str, path: &Path, line: Option<u64>, message: String| {
        let location = match line {
            Some(line) => format!("{}:{}", path.display(), line),
            None => path.display().to_string(),
        };
        LiveflowError::SourceRead {
            source_name: source.to_string(),
            message: format!("{}: {}", location, message),
        }
    };

    let mut reader = match csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_path(&path)
    {
        Ok(reader) => reader,
        Err(e) => return Box::new(std::iter::once(Err(fail(&source, &path, None, e.to_string())))),
    };

    let headers = match reader.headers() {
        Ok(headers) => headers.clone(),
        Err(e) => return Box::new(std::iter::once(Err(fail(&source, &path, None, e.to_string())))),
    };

    let records = reader.into_records().map(move |record| {
        let record = record.map_err(|e| {
            let line = e.position().map(|p| p.line());
            fail(&source, &path, line, e.to_string())
        })?;
        Ok(headers
            .iter()
            .zip(record.iter())
            .map(|(column, cell)| (column.to_string(), csv_cell(cell)))
            .collect::<Row>())
    });

    Box::new(records)
}

#[async_trait]
impl SourceReader for FileSource {
    async fn check_available(&self, source: &str) -> LiveflowResult<bool> {
        let Ok(pattern) = self.pattern(source) else {
            return Ok(false);
        };

        glob::Pattern::new(&pattern)?;
        Ok(literal_prefix(&pattern).exists())
    }

    async fn open(&self, source: &str, offset: u64) -> LiveflowResult<RecordIter> {
        let pattern = self.pattern(source)?;
        let format = self.files(source)?.format;
        let files = resolve_pattern(&pattern)?;

        tracing::debug!(
            source = %source,
            files = files.len(),
            ?format,
            offset,
            "opening file source"
        );

        let name = source.to_string();
        let records = files
            .into_iter()
            .flat_map(move |path| match format {
                SourceFormat::Json => read_ndjson(name.clone(), path),
                SourceFormat::Csv => read_csv(name.clone(), path),
            })
            .skip(offset as usize);

        Ok(Box::new(records))
    }
}

/// Write rows as newline-delimited JSON
pub(crate) fn write_ndjson(path: &Path, rows: &[Row]) -> std::io::Result<()> {
    let mut out = String::new();
    for row in rows {
        out.push_str(&serde_json::Value::Object(row.clone()).to_string());
        out.push('\n');
    }
    std::fs::write(path, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn row(v: serde_json::Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    fn ids(iter: RecordIter) -> Vec<i64> {
        iter.map(|r| r.unwrap()["id"].as_i64().unwrap()).collect()
    }

    #[tokio::test]
    async fn test_reads_files_in_order_from_offset() {
        let temp_dir = TempDir::new().unwrap();
        write_ndjson(
            &temp_dir.path().join("001.json"),
            &[row(json!({"id": 1})), row(json!({"id": 2}))],
        )
        .unwrap();
        write_ndjson(&temp_dir.path().join("002.json"), &[row(json!({"id": 3}))]).unwrap();

        let source = FileSource::new(temp_dir.path().to_path_buf()).with_source("raw", "*.json");

        assert_eq!(ids(source.open("raw", 0).await.unwrap()), vec![1, 2, 3]);
        assert_eq!(ids(source.open("raw", 2).await.unwrap()), vec![3]);
        assert!(ids(source.open("raw", 3).await.unwrap()).is_empty());
    }

    #[tokio::test]
    async fn test_blank_lines_skipped_and_bad_lines_reported() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.json"), "{\"id\": 1}\n\n[1, 2]\n").unwrap();

        let source = FileSource::new(temp_dir.path().to_path_buf()).with_source("raw", "*.json");
        let records: Vec<_> = source.open("raw", 0).await.unwrap().collect();

        assert_eq!(records.len(), 2);
        assert!(records[0].is_ok());
        match &records[1] {
            Err(LiveflowError::SourceRead { message, .. }) => assert!(message.contains(":3:")),
            other => panic!("expected source error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_availability() {
        let temp_dir = TempDir::new().unwrap();
        let source = FileSource::new(temp_dir.path().to_path_buf())
            .with_source("landing", "landing/*.json")
            .with_source("empty", "*.json");

        assert!(!source.check_available("landing").await.unwrap());
        assert!(source.check_available("empty").await.unwrap());
        assert!(!source.check_available("unknown").await.unwrap());

        std::fs::create_dir(temp_dir.path().join("landing")).unwrap();
        assert!(source.check_available("landing").await.unwrap());
    }

    #[tokio::test]
    async fn test_csv_files_resume_from_offset() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("001.csv"),
            "id,name,score,active,zip\n1,Ada,9.5,true,02139\n2,,10,false,60601\n",
        )
        .unwrap();
        std::fs::write(temp_dir.path().join("002.csv"), "id,name,score,active,zip\n3,Linus,7,true,90001\n").unwrap();

        let source = FileSource::new(temp_dir.path().to_path_buf()).with_source("customers", "*.csv");
        let rows: Vec<Row> = source
            .open("customers", 0)
            .await
            .unwrap()
            .map(Result::unwrap)
            .collect();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["id"], json!(1));
        assert_eq!(rows[0]["name"], json!("Ada"));
        assert_eq!(rows[0]["score"], json!(9.5));
        assert_eq!(rows[0]["active"], json!(true));
        assert_eq!(rows[0]["zip"], json!("02139"));
        assert_eq!(rows[1]["name"], serde_json::Value::Null);

        // Header rows never count towards the offset
        assert_eq!(ids(source.open("customers", 2).await.unwrap()), vec![3]);
        assert!(ids(source.open("customers", 3).await.unwrap()).is_empty());
    }

    #[tokio::test]
    async fn test_header_only_csv_yields_nothing() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("empty.csv"), "id,name\n").unwrap();

        let source = FileSource::new(temp_dir.path().to_path_buf()).with_source("raw", "*.csv");
        assert_eq!(source.open("raw", 0).await.unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_ragged_csv_row_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.csv"), "id,name\n1,Ada\n2\n").unwrap();

        let source = FileSource::new(temp_dir.path().to_path_buf()).with_source("raw", "*.csv");
        let records: Vec<_> = source.open("raw", 0).await.unwrap().collect();

        assert_eq!(records.len(), 2);
        assert!(records[0].is_ok());
        assert!(matches!(records[1], Err(LiveflowError::SourceRead { .. })));
    }

    #[tokio::test]
    async fn test_explicit_format_overrides_extension() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.txt"), "id\n7\n").unwrap();

        let source = FileSource::new(temp_dir.path().to_path_buf()).with_source_format(
            "raw",
            "*.txt",
            SourceFormat::Csv,
        );
        assert_eq!(ids(source.open("raw", 0).await.unwrap()), vec![7]);
    }

    #[test]
    fn test_format_inferred_from_extension() {
        assert_eq!(SourceFormat::infer("data/customers/*.CSV"), SourceFormat::Csv);
        assert_eq!(SourceFormat::infer("data/sales/*.json"), SourceFormat::Json);
        assert_eq!(SourceFormat::infer("data/sales/*"), SourceFormat::Json);
    }

    #[test]
    fn test_literal_prefix() {
        assert_eq!(
            literal_prefix("/data/sales/2024-*/part-*.json"),
            PathBuf::from("/data/sales")
        );
        assert_eq!(literal_prefix("data/file.json"), PathBuf::from("data/file.json"));
    }
}
