//! Source file reading
//!
//! Source files are `;`-delimited with `"` quoting, nominally UTF-8 but with
//! stray invalid sequences and embedded NUL bytes. Every consumer (bulk copy,
//! fallback loader, record counter) reads through the same [`Sanitizer`] so
//! they agree on what a record is.

use cnpj_common::{CnpjError, Result};
use csv::{ByteRecord, StringRecord};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::classify::{classify, ClassCounts};

pub const DELIMITER: u8 = b';';
pub const QUOTE: u8 = b'"';

const READ_CHUNK_BYTES: usize = 64 * 1024;
const REPLACEMENT: &str = "\u{FFFD}";

/// Streaming NUL stripper and lossy UTF-8 repair
///
/// An incomplete multi-byte sequence at the end of a chunk is held back and
/// completed by the next chunk, so repair does not depend on chunk size.
#[derive(Debug, Default)]
pub struct Sanitizer {
    pending: Vec<u8>,
    replaced: u64,
}

impl Sanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sanitize `chunk`, appending clean UTF-8 to `out`
    pub fn push(&mut self, chunk: &[u8], out: &mut Vec<u8>) {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend(chunk.iter().copied().filter(|b| *b != 0));

        let mut input = &buf[..];
        loop {
            match std::str::from_utf8(input) {
                Ok(valid) => {
                    out.extend_from_slice(valid.as_bytes());
                    break;
                },
                Err(e) => {
                    let good = e.valid_up_to();
                    out.extend_from_slice(&input[..good]);
                    match e.error_len() {
                        Some(bad) => {
                            out.extend_from_slice(REPLACEMENT.as_bytes());
                            self.replaced += 1;
                            input = &input[good + bad..];
                        },
                        None => {
                            self.pending = input[good..].to_vec();
                            break;
                        },
                    }
                },
            }
        }
    }

    /// Flush a dangling partial sequence at end of input
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        if !self.pending.is_empty() {
            self.pending.clear();
            out.extend_from_slice(REPLACEMENT.as_bytes());
            self.replaced += 1;
        }
    }

    /// Invalid sequences replaced so far
    pub fn replaced(&self) -> u64 {
        self.replaced
    }
}

/// [`Read`] adapter applying a [`Sanitizer`]
pub struct SanitizedRead<R> {
    inner: R,
    sanitizer: Sanitizer,
    raw: Vec<u8>,
    out: Vec<u8>,
    pos: usize,
    eof: bool,
}

impl<R: Read> SanitizedRead<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            sanitizer: Sanitizer::new(),
            raw: vec![0; READ_CHUNK_BYTES],
            out: Vec::with_capacity(READ_CHUNK_BYTES),
            pos: 0,
            eof: false,
        }
    }

    pub fn replaced(&self) -> u64 {
        self.sanitizer.replaced()
    }
}

impl<R: Read> Read for SanitizedRead<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.out.len() {
            if self.eof {
                return Ok(0);
            }
            self.out.clear();
            self.pos = 0;
            let n = self.inner.read(&mut self.raw)?;
            if n == 0 {
                self.eof = true;
                self.sanitizer.finish(&mut self.out);
            } else {
                self.sanitizer.push(&self.raw[..n], &mut self.out);
            }
        }

        let n = buf.len().min(self.out.len() - self.pos);
        buf[..n].copy_from_slice(&self.out[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Quote-aware record reader over a sanitized source file
///
/// Blank lines are not records. Field counts are not enforced; callers
/// classify and repair.
pub struct RecordReader {
    path: PathBuf,
    inner: csv::Reader<SanitizedRead<File>>,
    record: StringRecord,
    bytes: ByteRecord,
}

impl RecordReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| CnpjError::io(&path, e))?;
        Ok(Self::from_reader(path, file))
    }

    fn from_reader(path: PathBuf, file: File) -> Self {
        let inner = csv::ReaderBuilder::new()
            .delimiter(DELIMITER)
            .quote(QUOTE)
            .double_quote(true)
            .has_headers(false)
            .flexible(true)
            .from_reader(SanitizedRead::new(file));

        Self {
            path,
            inner,
            record: StringRecord::new(),
            bytes: ByteRecord::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next record's fields, `None` at end of file
    pub fn next_fields(&mut self) -> Result<Option<Vec<String>>> {
        let more = self
            .inner
            .read_record(&mut self.record)
            .map_err(|e| CnpjError::parse(&self.path, e.to_string()))?;
        Ok(more.then(|| self.record.iter().map(str::to_string).collect()))
    }

    /// Next record's field count without materializing the fields
    pub fn next_field_count(&mut self) -> Result<Option<usize>> {
        let more = self
            .inner
            .read_byte_record(&mut self.bytes)
            .map_err(|e| CnpjError::parse(&self.path, e.to_string()))?;
        Ok(more.then(|| self.bytes.len()))
    }

    /// Invalid UTF-8 sequences replaced so far
    pub fn replaced_sequences(&self) -> u64 {
        self.inner.get_ref().replaced()
    }
}

/// Logical records in a file (quote-aware, so embedded newlines in quoted
/// fields do not inflate the count)
pub fn count_records(path: impl AsRef<Path>) -> Result<u64> {
    let mut reader = RecordReader::open(path)?;
    let mut count = 0;
    while reader.next_field_count()?.is_some() {
        count += 1;
    }
    Ok(count)
}

/// Records of a file grouped by row class against `expected` fields
pub fn scan_classes(path: impl AsRef<Path>, expected: usize) -> Result<ClassCounts> {
    let mut reader = RecordReader::open(path)?;
    let mut counts = ClassCounts::default();
    while let Some(fields) = reader.next_field_count()? {
        counts.record(classify(fields, expected));
    }
    Ok(counts)
}
