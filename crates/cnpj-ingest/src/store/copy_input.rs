//! COPY input encoding
//!
//! Raw source bytes never reach COPY. Each record is parsed by the same
//! [`RecordReader`] the fallback loader and the record counter use, then
//! written back with every field quoted. PostgreSQL's CSV parser reads that
//! form back field for field: a `"` inside a field is doubled instead of
//! opening a quoted section, and a line holding only `\.` becomes `"\."`,
//! which is data rather than the end-of-copy marker.

use cnpj_common::CnpjError;
use csv::{QuoteStyle, Terminator, WriterBuilder};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::debug;

use super::CopyError;
use crate::reader::{RecordReader, DELIMITER, QUOTE};
use crate::schema::TableSpec;

/// Parsed records re-serialized into COPY input chunks
pub struct CopyEncoder {
    reader: RecordReader,
    width: usize,
    chunk_bytes: usize,
    records: u64,
    exhausted: bool,
}

impl CopyEncoder {
    pub fn open(spec: &TableSpec, path: &Path, chunk_bytes: usize) -> Result<Self, CopyError> {
        Ok(Self {
            reader: RecordReader::open(path)?,
            width: spec.width(),
            chunk_bytes: chunk_bytes.max(1),
            records: 0,
            exhausted: false,
        })
    }

    /// Records encoded so far
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn replaced_sequences(&self) -> u64 {
        self.reader.replaced_sequences()
    }

    /// Next chunk of at least `chunk_bytes` (except the last), `None` once
    /// the file is exhausted
    ///
    /// Chunks always end on a record boundary. A record whose field count
    /// differs from the table width is structural, as it is for COPY.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, CopyError> {
        if self.exhausted {
            return Ok(None);
        }

        let mut writer = WriterBuilder::new()
            .delimiter(DELIMITER)
            .quote(QUOTE)
            .quote_style(QuoteStyle::Always)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(Vec::with_capacity(self.chunk_bytes));
        let mut pending = 0;

        while pending < self.chunk_bytes {
            let Some(fields) = self.reader.next_fields()? else {
                self.exhausted = true;
                break;
            };
            self.records += 1;

            if fields.len() != self.width {
                return Err(CopyError::Structural(format!(
                    "record {} of {} has {} fields, expected {}",
                    self.records,
                    self.reader.path().display(),
                    fields.len(),
                    self.width
                )));
            }

            // Quotes and delimiters, close enough for sizing
            pending += fields.iter().map(|f| f.len() + 3).sum::<usize>();
            writer
                .write_record(&fields)
                .map_err(|e| CnpjError::parse(self.reader.path(), e.to_string()))?;
        }

        let chunk = writer
            .into_inner()
            .map_err(|e| CnpjError::io(self.reader.path(), e.into_error()))?;

        Ok((!chunk.is_empty()).then_some(chunk))
    }
}

/// Encode `path` on a blocking thread, handing chunks to `tx`
///
/// Returns the number of records encoded. Stops early, without error, when
/// the receiving side is gone.
pub fn stream_copy_input(
    spec: &TableSpec,
    path: &Path,
    chunk_bytes: usize,
    tx: mpsc::Sender<Vec<u8>>,
) -> Result<u64, CopyError> {
    let mut encoder = CopyEncoder::open(spec, path, chunk_bytes)?;

    while let Some(chunk) = encoder.next_chunk()? {
        if tx.blocking_send(chunk).is_err() {
            break;
        }
    }

    if encoder.replaced_sequences() > 0 {
        debug!(
            table = %spec.name(),
            file = %path.display(),
            replaced = encoder.replaced_sequences(),
            "Replaced invalid UTF-8 sequences"
        );
    }

    Ok(encoder.records())
}

/// Parse encoded COPY input back into records, with COPY's strict CSV rules
pub fn decode_copy_input(chunk: &[u8]) -> csv::Result<Vec<Vec<String>>> {
    csv::ReaderBuilder::new()
        .delimiter(DELIMITER)
        .quote(QUOTE)
        .has_headers(false)
        .from_reader(chunk)
        .records()
        .map(|record| record.map(|r| r.iter().map(str::to_string).collect()))
        .collect()
}
