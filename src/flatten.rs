use crate::record::{DecodedRecord, PayloadItem, is_reserved_field};
use crate::schema::{EPOCH_TIME_COLUMN, MESSAGE_COLUMN, TIME_CREATED_COLUMN, is_fixed_column};
use crate::utils::escape::{escape_line_breaks, first_line};
use crate::utils::time::{epoch_millis, format_timestamp};

use hashbrown::HashMap as FastMap;

/// Prefix of the names synthesized for unnamed payload items (`unlabeled1`, `unlabeled2`, ...).
pub const UNLABELED_PREFIX: &str = "unlabeled";

/// A sparse row: column name -> already normalized text.
///
/// Columns the record did not supply are simply absent.
#[derive(Debug, Clone)]
pub struct Row {
    epoch_millis: i64,
    values: FastMap<String, String, ahash::RandomState>,
}

impl Row {
    fn new(epoch_millis: i64) -> Self {
        Row {
            epoch_millis,
            values: FastMap::with_hasher(ahash::RandomState::new()),
        }
    }

    /// Sort key, same value as the `EpochTime` cell.
    pub fn epoch_millis(&self) -> i64 {
        self.epoch_millis
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    /// Number of populated cells.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sets `column`, replacing any previous value.
    fn assign(&mut self, column: String, value: String) {
        self.values.insert(column, value);
    }
}

/// Output of flattening a single record.
#[derive(Debug, Clone)]
pub struct FlattenedRow {
    pub row: Row,
    /// Names synthesized for this record's unnamed payload items, in encounter order.
    /// The caller merges them into the schema.
    pub synthesized: Vec<String>,
}

/// Pass two: turns one record into a sparse [`Row`].
///
/// Never fails, a missing section just leaves its columns unset.
pub fn flatten_record(record: &DecodedRecord) -> FlattenedRow {
    let millis = epoch_millis(record.time_created);
    let mut row = Row::new(millis);

    row.assign(EPOCH_TIME_COLUMN.to_owned(), millis.to_string());
    row.assign(
        TIME_CREATED_COLUMN.to_owned(),
        format_timestamp(record.time_created),
    );
    row.assign(MESSAGE_COLUMN.to_owned(), first_line(&record.message));

    for field in &record.header {
        if is_reserved_field(&field.name) || is_fixed_column(&field.name) {
            continue;
        }
        if field.value.is_empty() {
            continue;
        }
        row.assign(
            field.name.clone(),
            escape_line_breaks(&field.value).into_owned(),
        );
    }

    // Resets with every record, unlike the schema's column order.
    let mut unlabeled_ordinal = 0_usize;
    let mut synthesized = Vec::new();

    for item in &record.payload {
        match item {
            PayloadItem::Named { name, value } => {
                if row.contains(name) {
                    continue;
                }
                row.assign(name.clone(), escape_line_breaks(value).into_owned());
            }
            PayloadItem::Unnamed { markup } => {
                let name = loop {
                    unlabeled_ordinal += 1;
                    let candidate = format!("{UNLABELED_PREFIX}{unlabeled_ordinal}");
                    if !row.contains(&candidate) {
                        break candidate;
                    }
                };
                row.assign(name.clone(), escape_line_breaks(markup).into_owned());
                synthesized.push(name);
            }
        }
    }

    FlattenedRow { row, synthesized }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RESERVED_AUDIT_FIELD;
    use jiff::Timestamp;
    use pretty_assertions::assert_eq;

    fn at(ts: &str) -> DecodedRecord {
        DecodedRecord::new(ts.parse::<Timestamp>().unwrap())
    }

    #[test]
    fn test_fixed_columns() {
        let flat = flatten_record(
            &at("2024-01-01T00:00:00.500Z").with_message("Error occurred\r\nAt line 5"),
        );

        assert_eq!(flat.row.epoch_millis(), 1_704_067_200_500);
        assert_eq!(flat.row.get("EpochTime"), Some("1704067200500"));
        assert_eq!(flat.row.get("TimeCreated"), Some("2024-01-01 00:00:00.500"));
        assert_eq!(flat.row.get("Message"), Some("Error occurred"));
        assert!(flat.synthesized.is_empty());
    }

    #[test]
    fn test_header_values_are_escaped_and_empty_ones_skipped() {
        let flat = flatten_record(
            &at("2024-01-01T00:00:00Z")
                .with_header("Computer", "a\nb")
                .with_header("Keywords", "")
                .with_header(RESERVED_AUDIT_FIELD, "<UserData>x</UserData>"),
        );

        assert_eq!(flat.row.get("Computer"), Some("a\\nb"));
        assert_eq!(flat.row.get("Keywords"), None);
        assert_eq!(flat.row.get(RESERVED_AUDIT_FIELD), None);
        assert_eq!(flat.row.len(), 4);
    }

    #[test]
    fn test_header_cannot_override_fixed_columns() {
        let flat = flatten_record(
            &at("2024-01-01T00:00:00Z")
                .with_message("real")
                .with_header("Message", "shadow"),
        );

        assert_eq!(flat.row.get("Message"), Some("real"));
    }

    #[test]
    fn test_duplicate_payload_names_first_wins() {
        let flat = flatten_record(
            &at("2024-01-01T00:00:00Z")
                .with_payload(PayloadItem::named("Param", "first"))
                .with_payload(PayloadItem::named("Param", "second")),
        );

        assert_eq!(flat.row.get("Param"), Some("first"));
    }

    #[test]
    fn test_payload_does_not_override_header() {
        let flat = flatten_record(
            &at("2024-01-01T00:00:00Z")
                .with_header("Computer", "from-header")
                .with_payload(PayloadItem::named("Computer", "from-payload")),
        );

        assert_eq!(flat.row.get("Computer"), Some("from-header"));
    }

    #[test]
    fn test_empty_named_payload_is_stored_as_empty_string() {
        let flat = flatten_record(
            &at("2024-01-01T00:00:00Z").with_payload(PayloadItem::named("Empty", "")),
        );

        assert_eq!(flat.row.get("Empty"), Some(""));
    }

    #[test]
    fn test_unnamed_numbering_is_scoped_per_record() {
        let three = flatten_record(
            &at("2024-01-01T00:00:00Z")
                .with_payload(PayloadItem::unnamed("<Data>a</Data>"))
                .with_payload(PayloadItem::unnamed("<Data>b</Data>"))
                .with_payload(PayloadItem::unnamed("<Data>c</Data>")),
        );
        let one = flatten_record(
            &at("2024-01-01T00:00:01Z").with_payload(PayloadItem::unnamed("<Data>z</Data>")),
        );

        assert_eq!(
            three.synthesized,
            vec!["unlabeled1", "unlabeled2", "unlabeled3"]
        );
        assert_eq!(three.row.get("unlabeled1"), Some("<Data>a</Data>"));
        assert_eq!(three.row.get("unlabeled3"), Some("<Data>c</Data>"));

        assert_eq!(one.synthesized, vec!["unlabeled1"]);
        assert_eq!(one.row.get("unlabeled1"), Some("<Data>z</Data>"));
    }

    #[test]
    fn test_unnamed_skips_ordinals_taken_by_named_items() {
        let flat = flatten_record(
            &at("2024-01-01T00:00:00Z")
                .with_payload(PayloadItem::named("unlabeled1", "named"))
                .with_payload(PayloadItem::unnamed("<Data>raw</Data>")),
        );

        assert_eq!(flat.row.get("unlabeled1"), Some("named"));
        assert_eq!(flat.row.get("unlabeled2"), Some("<Data>raw</Data>"));
        assert_eq!(flat.synthesized, vec!["unlabeled2"]);
    }

    #[test]
    fn test_unnamed_markup_is_escaped() {
        let flat = flatten_record(
            &at("2024-01-01T00:00:00Z").with_payload(PayloadItem::unnamed("<Data>a\r\nb</Data>")),
        );

        assert_eq!(flat.row.get("unlabeled1"), Some("<Data>a\\nb</Data>"));
    }
}
