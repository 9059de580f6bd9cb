use crate::timeline::Timeline;

use std::io::Write;

/// Serializes a [`Timeline`]: one header line with the schema's columns, then one line per row.
///
/// Quoting and line terminators are left to the `csv` crate.
pub fn write_timeline<W: Write>(timeline: &Timeline, target: W, delimiter: u8) -> csv::Result<W> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .from_writer(target);

    writer.write_record(timeline.schema().iter())?;
    for cells in timeline.projected_rows() {
        writer.write_record(&cells)?;
    }

    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}
