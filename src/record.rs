use jiff::Timestamp;

/// Header name under which the decoder keeps the raw audit payload (`<UserData>` markup).
///
/// It is never a column and never a value.
pub const RESERVED_AUDIT_FIELD: &str = "UserData";

#[inline]
pub fn is_reserved_field(name: &str) -> bool {
    name == RESERVED_AUDIT_FIELD
}

/// A `(name, value)` pair from the fixed-shape `System` section of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
}

impl HeaderField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        HeaderField {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One item of the variable-shape payload section (`EventData`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem {
    /// `<Data Name="name">value</Data>`
    Named { name: String, value: String },
    /// `<Data>...</Data>` without a name, kept as the raw element markup.
    Unnamed { markup: String },
}

impl PayloadItem {
    pub fn named(name: impl Into<String>, value: impl Into<String>) -> Self {
        PayloadItem::Named {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn unnamed(markup: impl Into<String>) -> Self {
        PayloadItem::Unnamed {
            markup: markup.into(),
        }
    }
}

/// A single decoded event, produced once per raw entry and read by both the schema discovery
/// and the flattening passes.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    /// Container record number, when the decoder knows it.
    pub record_id: Option<u64>,
    pub time_created: Timestamp,
    pub message: String,
    pub header: Vec<HeaderField>,
    pub payload: Vec<PayloadItem>,
}

impl DecodedRecord {
    pub fn new(time_created: Timestamp) -> Self {
        DecodedRecord {
            record_id: None,
            time_created,
            message: String::new(),
            header: Vec::new(),
            payload: Vec::new(),
        }
    }

    pub fn with_record_id(mut self, record_id: u64) -> Self {
        self.record_id = Some(record_id);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.header.push(HeaderField::new(name, value));
        self
    }

    pub fn with_payload(mut self, item: PayloadItem) -> Self {
        self.payload.push(item);
        self
    }

    /// Header fields eligible to become columns, in record order.
    pub fn header_fields(&self) -> impl Iterator<Item = &HeaderField> {
        self.header.iter().filter(|f| !is_reserved_field(&f.name))
    }

    /// Raw markup stored under [`RESERVED_AUDIT_FIELD`], if any.
    pub fn audit_payload(&self) -> Option<&str> {
        self.header
            .iter()
            .find(|f| is_reserved_field(&f.name))
            .map(|f| f.value.as_str())
    }

    /// Names of the `Named` payload items, in record order (duplicates included).
    pub fn payload_names(&self) -> impl Iterator<Item = &str> {
        self.payload.iter().filter_map(|item| match item {
            PayloadItem::Named { name, .. } => Some(name.as_str()),
            PayloadItem::Unnamed { .. } => None,
        })
    }
}
