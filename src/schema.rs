//! Column discovery for a single source.
//!
//! A [`Schema`] is an ordered set of column names. It always starts with the three fixed
//! columns, followed by every header and named payload field in the order they are first seen
//! across the whole batch. Names synthesized for unnamed payload items are committed later, by
//! the flattening pass, through [`Schema::insert`].

use crate::record::{DecodedRecord, is_reserved_field};

use hashbrown::HashSet as FastSet;
use log::trace;

pub const EPOCH_TIME_COLUMN: &str = "EpochTime";
pub const TIME_CREATED_COLUMN: &str = "TimeCreated";
pub const MESSAGE_COLUMN: &str = "Message";

/// The columns every table starts with, in order.
pub const FIXED_COLUMNS: [&str; 3] = [EPOCH_TIME_COLUMN, TIME_CREATED_COLUMN, MESSAGE_COLUMN];

#[inline]
pub fn is_fixed_column(name: &str) -> bool {
    FIXED_COLUMNS.contains(&name)
}

#[derive(Debug, Clone)]
pub struct Schema {
    columns: Vec<String>,
    seen: FastSet<String, ahash::RandomState>,
}

impl Default for Schema {
    fn default() -> Self {
        Schema::new()
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
    }
}

impl Eq for Schema {}

impl Schema {
    /// A schema holding only the fixed columns.
    pub fn new() -> Self {
        let mut schema = Schema {
            columns: Vec::with_capacity(FIXED_COLUMNS.len()),
            seen: FastSet::with_hasher(ahash::RandomState::new()),
        };

        for column in FIXED_COLUMNS {
            schema.insert(column);
        }

        schema
    }

    /// Pass one: merge header and named payload field names of every record, in record order.
    ///
    /// Unnamed payload items are left for the flattening pass.
    pub fn discover(records: &[DecodedRecord]) -> Self {
        let mut schema = Schema::new();

        for record in records {
            for field in record.header_fields() {
                schema.insert(&field.name);
            }

            for name in record.payload_names() {
                schema.insert(name);
            }
        }

        trace!(
            "discovered {} columns over {} records",
            schema.len(),
            records.len()
        );

        schema
    }

    /// Appends `name` if it was not seen before. Returns `true` when the column is new.
    ///
    /// The reserved audit field is never admitted.
    pub fn insert(&mut self, name: &str) -> bool {
        if is_reserved_field(name) || self.seen.contains(name) {
            return false;
        }

        self.seen.insert(name.to_owned());
        self.columns.push(name.to_owned());
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.seen.contains(name)
    }

    /// Columns in output order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Always `false`, the fixed columns are always present.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}
