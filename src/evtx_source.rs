use crate::err::{ConvertError, Result};
use crate::record::DecodedRecord;
use crate::xml_decoder::decode_event_xml;

use evtx::{EvtxParser, ParserSettings};
use jiff::Timestamp;
use log::{debug, warn};
use std::path::{Path, PathBuf};

/// Every decodable record of one source, in container order.
///
/// Both passes of [`crate::Timeline::build`] read this buffer; the container is never re-read.
#[derive(Debug, Clone, Default)]
pub struct MaterializedBatch {
    pub records: Vec<DecodedRecord>,
    /// Records that the container or the XML decoder could not make sense of.
    pub skipped_records: usize,
}

/// An `.evtx` file on disk.
#[derive(Debug, Clone)]
pub struct EvtxSource {
    path: PathBuf,
    validate_checksums: bool,
}

impl EvtxSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        EvtxSource {
            path: path.into(),
            validate_checksums: false,
        }
    }

    /// When set, chunks with invalid checksums are not parsed.
    pub fn validate_checksums(mut self, validate_checksums: bool) -> Self {
        self.validate_checksums = validate_checksums;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decodes the whole container into memory.
    ///
    /// Fails only when the container itself cannot be opened; individual broken records are
    /// logged, counted and skipped.
    pub fn materialize(&self) -> Result<MaterializedBatch> {
        let parser = EvtxParser::from_path(&self.path).map_err(|source| {
            ConvertError::SourceUnreadable {
                path: self.path.clone(),
                source,
            }
        })?;

        let settings = ParserSettings::new().validate_checksums(self.validate_checksums);
        // One source is always decoded on a single thread, parallelism happens across sources.
        #[cfg(feature = "multithreading")]
        let settings = settings.num_threads(1);
        let mut parser = parser.with_configuration(settings);

        let mut batch = MaterializedBatch::default();

        for (i, record) in parser.records().enumerate() {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        "{}: failed to read record #{}: {}",
                        self.path.display(),
                        i,
                        e
                    );
                    batch.skipped_records += 1;
                    continue;
                }
            };

            let fallback_time = Timestamp::from_millisecond(record.timestamp.timestamp_millis())
                .unwrap_or(Timestamp::UNIX_EPOCH);

            match decode_event_xml(&record.data, fallback_time) {
                Ok(decoded) => {
                    let decoded = match decoded.record_id {
                        Some(_) => decoded,
                        None => decoded.with_record_id(record.event_record_id),
                    };
                    batch.records.push(decoded);
                }
                Err(e) => {
                    warn!(
                        "{}: failed to decode record {}: {}",
                        self.path.display(),
                        record.event_record_id,
                        e
                    );
                    batch.skipped_records += 1;
                }
            }
        }

        debug!(
            "{}: materialized {} records ({} skipped)",
            self.path.display(),
            batch.records.len(),
            batch.skipped_records
        );

        Ok(batch)
    }
}
