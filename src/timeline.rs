use crate::flatten::{Row, flatten_record};
use crate::record::DecodedRecord;
use crate::schema::Schema;

use log::debug;

/// All rows of one source, sorted by `EpochTime`, plus the final schema.
#[derive(Debug, Clone)]
pub struct Timeline {
    schema: Schema,
    rows: Vec<Row>,
}

impl Timeline {
    /// Runs both passes over an already materialized batch.
    ///
    /// Pass one discovers the header and named payload columns, pass two flattens every record and
    /// commits the synthesized `unlabeledN` columns. Rows are then stable-sorted, so records sharing
    /// a timestamp keep their input order.
    pub fn build(records: &[DecodedRecord]) -> Self {
        let mut schema = Schema::discover(records);
        let mut rows = Vec::with_capacity(records.len());

        for record in records {
            let flattened = flatten_record(record);
            for name in &flattened.synthesized {
                schema.insert(name);
            }
            rows.push(flattened.row);
        }

        rows.sort_by_key(Row::epoch_millis);

        debug!(
            "built timeline with {} rows and {} columns",
            rows.len(),
            schema.len()
        );

        Timeline { schema, rows }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Each row projected onto the schema's column order, unset cells as `""`.
    pub fn projected_rows(&self) -> impl Iterator<Item = Vec<&str>> + '_ {
        self.rows.iter().map(move |row| {
            self.schema
                .iter()
                .map(|column| row.get(column).unwrap_or_default())
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PayloadItem;
    use jiff::Timestamp;
    use pretty_assertions::assert_eq;

    fn at(ts: &str) -> DecodedRecord {
        DecodedRecord::new(ts.parse::<Timestamp>().unwrap())
    }

    #[test]
    fn test_rows_are_sorted_by_epoch_time() {
        let records = vec![
            at("2024-01-01T00:00:02Z").with_message("third"),
            at("2024-01-01T00:00:00Z").with_message("first"),
            at("2024-01-01T00:00:01Z").with_message("second"),
        ];

        let timeline = Timeline::build(&records);
        let messages: Vec<&str> = timeline
            .rows()
            .iter()
            .map(|r| r.get("Message").unwrap())
            .collect();

        assert_eq!(messages, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_sort_is_stable_for_equal_timestamps() {
        let records = vec![
            at("2024-01-01T00:00:01Z").with_message("late"),
            at("2024-01-01T00:00:00.000Z").with_message("a"),
            at("2024-01-01T00:00:00.0004Z").with_message("b"),
            at("2024-01-01T00:00:00Z").with_message("c"),
        ];

        let timeline = Timeline::build(&records);
        let messages: Vec<&str> = timeline
            .rows()
            .iter()
            .map(|r| r.get("Message").unwrap())
            .collect();

        // .0004 truncates to the same millisecond as the others.
        assert_eq!(messages, vec!["a", "b", "c", "late"]);
    }

    #[test]
    fn test_synthesized_columns_are_appended_after_discovered_ones() {
        let records = vec![
            at("2024-01-01T00:00:00Z")
                .with_payload(PayloadItem::unnamed("<Data>x</Data>"))
                .with_payload(PayloadItem::named("Named", "n")),
            at("2024-01-01T00:00:01Z")
                .with_payload(PayloadItem::unnamed("<Data>y</Data>"))
                .with_payload(PayloadItem::unnamed("<Data>z</Data>")),
        ];

        let timeline = Timeline::build(&records);

        assert_eq!(
            timeline.schema().columns(),
            &[
                "EpochTime",
                "TimeCreated",
                "Message",
                "Named",
                "unlabeled1",
                "unlabeled2",
            ]
        );
    }

    #[test]
    fn test_projection_fills_missing_cells_with_empty_strings() {
        let records = vec![
            at("2024-01-01T00:00:00Z").with_header("A", "1"),
            at("2024-01-01T00:00:01Z").with_header("B", "2"),
        ];

        let timeline = Timeline::build(&records);
        let projected: Vec<Vec<&str>> = timeline.projected_rows().collect();

        assert_eq!(
            projected,
            vec![
                vec!["1704067200000", "2024-01-01 00:00:00.000", "", "1", ""],
                vec!["1704067201000", "2024-01-01 00:00:01.000", "", "", "2"],
            ]
        );

        for (row, cells) in timeline.rows().iter().zip(&projected) {
            assert!(row.len() <= timeline.schema().len());
            assert_eq!(cells.len(), timeline.schema().len());
        }
    }

    #[test]
    fn test_empty_batch() {
        let timeline = Timeline::build(&[]);
        assert!(timeline.is_empty());
        assert_eq!(timeline.schema().len(), 3);
    }
}
