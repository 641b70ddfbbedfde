//! CSV output sink and the matching reader.
//!
//! Rows are written and flushed one at a time, so whatever was written
//! before a crash is on disk.
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use crate::{Error, Result};

/// A record with a fixed column schema
pub trait CsvRecord {
    fn header() -> &'static [&'static str];
    /// Values in header order
    fn fields(&self) -> Vec<String>;
}

/// A record that can be read back from a CSV row
pub trait FromCsvRow: Sized {
    fn from_row(row: &CsvRow) -> Result<Self>;
}

/// Where collected records go
///
/// Collectors only ever append, in order.
#[async_trait]
pub trait RecordSink<R: Send + 'static>: Send {
    async fn write(&mut self, record: R) -> Result<()>;
}

/// In-memory sink, mostly for tests and small batches
#[async_trait]
impl<R: Send + 'static> RecordSink<R> for Vec<R> {
    async fn write(&mut self, record: R) -> Result<()> {
        self.push(record);
        Ok(())
    }
}

/// Appends records of one type as CSV rows
pub struct CsvSink<W: Write, R> {
    writer: W,
    rows_written: usize,
    _record: PhantomData<fn(&R)>,
}

impl<W: Write, R: CsvRecord> CsvSink<W, R> {
    /// Start a fresh file: header first
    pub fn new(mut writer: W) -> Result<Self> {
        write_line(&mut writer, R::header().iter().copied())?;
        writer.flush()?;
        Ok(Self::without_header(writer))
    }

    /// Continue an existing file that already has its header
    pub fn without_header(writer: W) -> Self {
        Self {
            writer,
            rows_written: 0,
            _record: PhantomData,
        }
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_record(&mut self, record: &R) -> Result<()> {
        let fields = record.fields();
        write_line(&mut self.writer, fields.iter().map(String::as_str))?;
        self.writer.flush()?;
        self.rows_written += 1;
        Ok(())
    }
}

impl<R: CsvRecord> CsvSink<BufWriter<File>, R> {
    /// Create (or truncate) a CSV file
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        ensure_parent(path)?;
        let file = File::create(path)?;
        Self::new(BufWriter::new(file))
    }

    /// Open a CSV file for appending, writing the header only if it is empty
    ///
    /// This is how an interrupted run picks up where it stopped.
    pub fn append<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        ensure_parent(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let is_empty = file.metadata()?.len() == 0;
        let writer = BufWriter::new(file);

        if is_empty {
            Self::new(writer)
        } else {
            Ok(Self::without_header(writer))
        }
    }
}

#[async_trait]
impl<W, R> RecordSink<R> for CsvSink<W, R>
where
    W: Write + Send,
    R: CsvRecord + Send + 'static,
{
    async fn write(&mut self, record: R) -> Result<()> {
        self.write_record(&record)
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn write_line<'a, W: Write>(writer: &mut W, fields: impl Iterator<Item = &'a str>) -> Result<()> {
    let line = fields.map(escape_csv).collect::<Vec<_>>().join(",");
    writeln!(writer, "{}", line)?;
    Ok(())
}

/// Escape CSV special characters
/// Life's too short for a CSV crate when this is all it takes
pub fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// One data row, addressable by column name
#[derive(Debug, Clone)]
pub struct CsvRow {
    columns: Arc<[String]>,
    values: Vec<String>,
    line: usize,
}

impl CsvRow {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
            .map(String::as_str)
    }

    pub fn required(&self, column: &str) -> Result<&str> {
        self.get(column).ok_or_else(|| Error::CsvError {
            line: self.line,
            message: format!("missing column {:?}", column),
        })
    }
}

/// Reads RFC 4180 style CSV: quoted fields may hold commas, quotes and newlines
pub struct CsvReader<B: BufRead> {
    reader: B,
    columns: Arc<[String]>,
    line: usize,
}

impl CsvReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<B: BufRead> CsvReader<B> {
    /// Reads the header row straight away
    pub fn new(reader: B) -> Result<Self> {
        let mut csv = Self {
            reader,
            columns: Arc::from(Vec::new()),
            line: 0,
        };
        let header = csv.read_record()?.ok_or(Error::CsvError {
            line: 1,
            message: "missing header row".into(),
        })?;
        csv.columns = header.into_iter().map(|c| c.trim().to_string()).collect();
        Ok(csv)
    }

    /// Typed view over the remaining rows
    pub fn records<T: FromCsvRow>(self) -> impl Iterator<Item = Result<T>> {
        self.map(|row| row.and_then(|row| T::from_row(&row)))
    }

    fn read_record(&mut self) -> Result<Option<Vec<String>>> {
        let mut fields = Vec::new();
        let mut field = String::new();
        let mut in_quotes = false;
        let mut started = false;
        let mut buf = String::new();

        loop {
            buf.clear();
            if self.reader.read_line(&mut buf)? == 0 {
                if in_quotes {
                    return Err(Error::CsvError {
                        line: self.line,
                        message: "unterminated quoted field".into(),
                    });
                }
                if !started {
                    return Ok(None);
                }
                fields.push(field);
                return Ok(Some(fields));
            }
            self.line += 1;
            started = true;

            let mut chars = buf.chars().peekable();
            while let Some(c) = chars.next() {
                if in_quotes {
                    match c {
                        '"' if chars.peek() == Some(&'"') => {
                            chars.next();
                            field.push('"');
                        }
                        '"' => in_quotes = false,
                        _ => field.push(c),
                    }
                    continue;
                }

                match c {
                    '"' => in_quotes = true,
                    ',' => fields.push(std::mem::take(&mut field)),
                    '\r' if chars.peek() == Some(&'\n') => {}
                    '\n' => {
                        fields.push(std::mem::take(&mut field));
                        return Ok(Some(fields));
                    }
                    _ => field.push(c),
                }
            }
            // quoted newline: keep reading the record from the next line
        }
    }
}

impl<B: BufRead> Iterator for CsvReader<B> {
    type Item = Result<CsvRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.read_record() {
                Ok(Some(values)) => {
                    // blank line
                    if values.len() == 1 && values[0].is_empty() {
                        continue;
                    }
                    return Some(Ok(CsvRow {
                        columns: Arc::clone(&self.columns),
                        values,
                        line: self.line,
                    }));
                }
                Ok(None) => return None,
                Err(err) => return Some(Err(err)),
            }
        }
    }
}
