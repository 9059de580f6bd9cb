#![deny(unused_must_use)]
#![forbid(unsafe_code)]
//! Flattens Windows XML Event Log (EVTX) files into time-sorted CSV timelines.
//!
//! Every source becomes one table. Its columns are the union of all attribute names seen across
//! the source's records, so heterogeneous events share a single dense layout:
//!
//! ```text
//! EpochTime,TimeCreated,Message,<System fields...>,<EventData fields...>,unlabeled1,...
//! ```
//!
//! ```no_run
//! use evtx_timeline::{Converter, ConverterSettings};
//!
//! let converter = Converter::new(ConverterSettings::new().output_dir("out"));
//! let report = converter.convert_source("Security.evtx").unwrap();
//! println!("{} rows written to {}", report.records, report.output.display());
//! ```

pub use converter::{Converter, ConverterSettings, DEFAULT_FILE_PREFIX, SourceReport};
pub use csv_output::write_timeline;
pub use evtx_source::{EvtxSource, MaterializedBatch};
pub use flatten::{FlattenedRow, Row, UNLABELED_PREFIX, flatten_record};
pub use record::{DecodedRecord, HeaderField, PayloadItem, RESERVED_AUDIT_FIELD};
pub use schema::{EPOCH_TIME_COLUMN, FIXED_COLUMNS, MESSAGE_COLUMN, Schema, TIME_CREATED_COLUMN};
pub use timeline::Timeline;
pub use xml_decoder::decode_event_xml;

pub mod err;
pub mod utils;

mod converter;
mod csv_output;
mod evtx_source;
mod flatten;
mod record;
mod schema;
mod timeline;
mod xml_decoder;

#[cfg(test)]
use std::sync::Once;
#[cfg(test)]
static LOGGER_INIT: Once = Once::new();

// Rust runs the tests concurrently, so unless we synchronize logging access
// it will crash when attempting to run `cargo test` with some logging facilities.
#[cfg(test)]
pub fn ensure_env_logger_initialized() {
    use std::io::Write;

    LOGGER_INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .format(|buf, record| writeln!(buf, "[{}] - {}", record.level(), record.args()))
            .init();
    });
}
