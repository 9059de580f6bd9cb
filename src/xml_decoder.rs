//! Maps the XML rendering of one EVTX record onto a [`DecodedRecord`].
//!
//! Layout handled (namespaces are ignored, only local names matter):
//!
//! ```text
//! <Event>
//!   <System>            -> header fields: `<E>text</E>` as (E, text), `<E a="v"/>` as (Ea, v)
//!   <EventData>
//!     <Data Name="n">   -> PayloadItem::Named
//!     <Data>            -> PayloadItem::Unnamed (raw element markup)
//!     <Binary>          -> PayloadItem::Named("Binary", text)
//!   <UserData>          -> reserved header field, raw markup
//!   <RenderingInfo>
//!     <Message>         -> message
//!   <Other>             -> header field (Other, text)
//! </Event>
//! ```

use crate::err::{DecodeError, DecodeResult};
use crate::record::{DecodedRecord, HeaderField, PayloadItem, RESERVED_AUDIT_FIELD};
use crate::utils::time::parse_system_time;

use jiff::Timestamp;
use log::trace;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    System,
    EventData,
    UserData,
    RenderingInfo,
    Other,
}

impl Section {
    fn from_name(name: &str) -> Self {
        match name {
            "System" => Section::System,
            "EventData" => Section::EventData,
            "UserData" => Section::UserData,
            "RenderingInfo" => Section::RenderingInfo,
            _ => Section::Other,
        }
    }
}

/// What the currently open element is collected into once it closes.
#[derive(Debug)]
enum Capture {
    Header {
        name: String,
        attributes: Vec<HeaderField>,
    },
    Named {
        name: String,
    },
    Unnamed {
        start: usize,
    },
    AuditPayload {
        start: usize,
    },
    Message,
    TopLevel {
        name: String,
    },
    /// An element of a section we do not flatten (e.g. the rest of `RenderingInfo`).
    Ignored,
}

#[derive(Debug)]
struct OpenCapture {
    depth: usize,
    capture: Capture,
    text: String,
}

#[derive(Debug, Default)]
struct RecordBuilder {
    time_created: Option<Timestamp>,
    record_id: Option<u64>,
    message: Option<String>,
    header: Vec<HeaderField>,
    payload: Vec<PayloadItem>,
}

impl RecordBuilder {
    fn push_header(&mut self, name: String, value: String) {
        if name == "EventRecordID" && self.record_id.is_none() {
            self.record_id = value.trim().parse().ok();
        }
        self.header.push(HeaderField { name, value });
    }

    fn push_system_element(&mut self, name: String, text: &str, attributes: Vec<HeaderField>) {
        let text = text.trim();
        // `<Provider Name=".."/>` contributes its attributes only.
        if !text.is_empty() || attributes.is_empty() {
            self.push_header(name, text.to_owned());
        }

        for attribute in attributes {
            if attribute.name == "TimeCreatedSystemTime" && self.time_created.is_none() {
                self.time_created = parse_system_time(&attribute.value);
            }
            self.push_header(attribute.name, attribute.value);
        }
    }

    fn build(self, fallback_time: Timestamp) -> DecodedRecord {
        let time_created = match self.time_created {
            Some(ts) => ts,
            None => {
                trace!("record has no usable `SystemTime`, using container timestamp");
                fallback_time
            }
        };

        DecodedRecord {
            record_id: self.record_id,
            time_created,
            message: self.message.unwrap_or_default(),
            header: self.header,
            payload: self.payload,
        }
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// Attributes of `e` as `(ElementAttribute, value)` header fields.
fn prefixed_attributes(element: &str, e: &BytesStart<'_>) -> quick_xml::Result<Vec<HeaderField>> {
    let mut fields = Vec::new();
    for attribute in e.attributes() {
        let attribute = attribute?;
        // `xmlns` declarations are not data.
        if attribute.key.as_ref().starts_with(b"xmlns") {
            continue;
        }
        let key = attribute.key.local_name();
        fields.push(HeaderField::new(
            format!("{element}{}", String::from_utf8_lossy(key.as_ref())),
            attribute.unescape_value()?.into_owned(),
        ));
    }
    Ok(fields)
}

/// The `Name` attribute of a `<Data>` element, `None` when missing or empty.
fn data_name(e: &BytesStart<'_>) -> quick_xml::Result<Option<String>> {
    for attribute in e.attributes() {
        let attribute = attribute?;
        if attribute.key.local_name().as_ref() == b"Name" {
            let value = attribute.unescape_value()?;
            if value.is_empty() {
                return Ok(None);
            }
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// Decodes one rendered event.
///
/// `fallback_time` is used when `System/TimeCreated/@SystemTime` is missing or unparsable,
/// typically the timestamp of the container record header.
pub fn decode_event_xml(xml: &str, fallback_time: Timestamp) -> DecodeResult<DecodedRecord> {
    let mut reader = Reader::from_str(xml);
    let mut builder = RecordBuilder::default();

    let mut depth = 0_usize;
    let mut section: Option<Section> = None;
    let mut open: Option<OpenCapture> = None;
    let mut saw_root = false;

    loop {
        let before = reader.buffer_position() as usize;
        let event = reader.read_event().map_err(|source| DecodeError::Xml {
            position: reader.buffer_position() as u64,
            source,
        })?;
        let after = reader.buffer_position() as usize;

        let xml_err = |source: quick_xml::Error| DecodeError::Xml {
            position: before as u64,
            source,
        };

        match event {
            Event::Start(ref e) => {
                depth += 1;
                let name = local_name(e);

                if open.is_some() {
                    continue;
                }

                match depth {
                    1 => {
                        if name != "Event" {
                            return Err(DecodeError::MissingEventRoot);
                        }
                        saw_root = true;
                    }
                    2 => {
                        let s = Section::from_name(&name);
                        section = Some(s);
                        match s {
                            Section::UserData => {
                                open = Some(OpenCapture {
                                    depth,
                                    capture: Capture::AuditPayload { start: before },
                                    text: String::new(),
                                })
                            }
                            Section::Other => {
                                open = Some(OpenCapture {
                                    depth,
                                    capture: Capture::TopLevel { name },
                                    text: String::new(),
                                })
                            }
                            _ => {}
                        }
                    }
                    3 => {
                        let capture = match section {
                            Some(Section::System) => Capture::Header {
                                attributes: prefixed_attributes(&name, e).map_err(xml_err)?,
                                name,
                            },
                            Some(Section::EventData) if name == "Data" => {
                                match data_name(e).map_err(xml_err)? {
                                    Some(name) => Capture::Named { name },
                                    None => Capture::Unnamed { start: before },
                                }
                            }
                            Some(Section::EventData) => Capture::Named { name },
                            Some(Section::RenderingInfo) if name == "Message" => Capture::Message,
                            _ => Capture::Ignored,
                        };
                        open = Some(OpenCapture {
                            depth,
                            capture,
                            text: String::new(),
                        });
                    }
                    _ => {}
                }
            }
            Event::Empty(ref e) => {
                let element_depth = depth + 1;
                if open.is_some() {
                    continue;
                }
                let name = local_name(e);

                match element_depth {
                    1 => {
                        if name != "Event" {
                            return Err(DecodeError::MissingEventRoot);
                        }
                        saw_root = true;
                    }
                    2 => match Section::from_name(&name) {
                        Section::UserData => builder.push_header(
                            RESERVED_AUDIT_FIELD.to_owned(),
                            xml[before..after].trim().to_owned(),
                        ),
                        Section::Other => builder.push_header(name, String::new()),
                        _ => {}
                    },
                    3 => match section {
                        Some(Section::System) => {
                            let attributes = prefixed_attributes(&name, e).map_err(xml_err)?;
                            builder.push_system_element(name, "", attributes);
                        }
                        Some(Section::EventData) if name == "Data" => {
                            match data_name(e).map_err(xml_err)? {
                                Some(name) => builder.payload.push(PayloadItem::named(name, "")),
                                None => builder
                                    .payload
                                    .push(PayloadItem::unnamed(xml[before..after].trim())),
                            }
                        }
                        Some(Section::EventData) => {
                            builder.payload.push(PayloadItem::named(name, ""))
                        }
                        Some(Section::RenderingInfo) if name == "Message" => {
                            builder.message = Some(String::new())
                        }
                        _ => {}
                    },
                    _ => {}
                }
            }
            Event::Text(ref t) => {
                if let Some(current) = open.as_mut() {
                    let text = t.unescape().map_err(xml_err)?;
                    if let Capture::TopLevel { .. } = current.capture {
                        let text = text.trim();
                        if !text.is_empty() {
                            if !current.text.is_empty() {
                                current.text.push(' ');
                            }
                            current.text.push_str(text);
                        }
                    } else {
                        current.text.push_str(&text);
                    }
                }
            }
            Event::CData(ref c) => {
                if let Some(current) = open.as_mut() {
                    current.text.push_str(&String::from_utf8_lossy(c));
                }
            }
            Event::End(_) => {
                if open.as_ref().is_some_and(|o| o.depth == depth) {
                    if let Some(finished) = open.take() {
                        finish_capture(&mut builder, finished, xml, after);
                    }
                }
                if depth == 2 {
                    section = None;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(DecodeError::MissingEventRoot);
    }

    Ok(builder.build(fallback_time))
}

fn finish_capture(builder: &mut RecordBuilder, finished: OpenCapture, xml: &str, end: usize) {
    let OpenCapture { capture, text, .. } = finished;

    match capture {
        Capture::Header { name, attributes } => {
            builder.push_system_element(name, &text, attributes)
        }
        Capture::Named { name } => builder.payload.push(PayloadItem::Named { name, value: text }),
        Capture::Unnamed { start } => builder
            .payload
            .push(PayloadItem::unnamed(xml[start..end].trim())),
        Capture::AuditPayload { start } => {
            builder.push_header(RESERVED_AUDIT_FIELD.to_owned(), xml[start..end].trim().to_owned())
        }
        Capture::Message => builder.message = Some(text),
        Capture::TopLevel { name } => builder.push_header(name, text),
        Capture::Ignored => {}
    }
}
