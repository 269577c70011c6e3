//! Parsed event documents delivered to observers.

use crate::constants::EVENT_BEGIN_MARKER;
use crate::error::{Error, Result};
use crate::headers::HeaderName;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An unsolicited event block, parsed into headers plus an optional body.
///
/// Documents arrive in one of two shapes and both end up here:
///
/// - XML: `<event><headers><Event-Name>…</Event-Name>…</headers><body>…</body></event>`
/// - plain: `Key: value` lines with percent-encoded values, a blank line,
///   then an optional inner body
///
/// Header keys are unique; arrival order is irrelevant. Documents are
/// ephemeral — the dispatcher hands them to the observer registry and
/// drops them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventDocument {
    headers: HashMap<String, String>,
    body: Option<String>,
}

impl EventDocument {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an accumulated event block, sniffing the format.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim_start().starts_with(EVENT_BEGIN_MARKER) {
            Self::from_xml(raw)
        } else {
            Ok(Self::from_plain(raw))
        }
    }

    /// Parse the plain serialization: percent-encoded `Key: value` lines,
    /// then an optional inner body after the first blank line.
    pub fn from_plain(raw: &str) -> Self {
        let (header_section, inner_body) = match raw.find("\n\n") {
            Some(pos) => (&raw[..pos], Some(&raw[pos + 2..])),
            None => (raw, None),
        };

        let mut doc = Self::new();
        for line in header_section.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(colon_pos) = line.find(':') {
                let key = line[..colon_pos].trim().to_string();
                let raw_value = line[colon_pos + 1..].trim();
                let value = percent_decode_str(raw_value)
                    .decode_utf8()
                    .map(|s| s.into_owned())
                    .unwrap_or_else(|_| raw_value.to_string());
                doc.set_header(key, value);
            }
        }

        if let Some(inner) = inner_body {
            if !inner.is_empty() {
                doc.body = Some(inner.to_string());
            }
        }

        doc
    }

    /// Parse the XML serialization with a streaming reader.
    pub fn from_xml(raw: &str) -> Result<Self> {
        use quick_xml::events::Event as XmlEvent;
        use quick_xml::Reader;

        let mut reader = Reader::from_str(raw);
        let mut doc = Self::new();
        let mut in_headers = false;
        let mut in_body = false;
        let mut current_tag: Option<String> = None;

        loop {
            match reader.read_event() {
                Ok(XmlEvent::Start(ref e)) => {
                    let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    match tag.as_str() {
                        "headers" => in_headers = true,
                        "body" => in_body = true,
                        _ if in_headers => current_tag = Some(tag),
                        _ => {}
                    }
                }
                Ok(XmlEvent::End(ref e)) => {
                    let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    match tag.as_str() {
                        "headers" => in_headers = false,
                        "body" => in_body = false,
                        _ if in_headers => current_tag = None,
                        _ => {}
                    }
                }
                Ok(XmlEvent::Text(ref e)) => {
                    let text = e
                        .unescape()
                        .map_err(|e| Error::MalformedRecord {
                            detail: format!("bad XML text in event document: {}", e),
                        })?
                        .to_string();
                    if in_body {
                        doc.body = Some(text);
                    } else if let Some(ref tag) = current_tag {
                        doc.set_header(tag.clone(), text);
                    }
                }
                Ok(XmlEvent::Eof) => break,
                Err(e) => {
                    return Err(Error::MalformedRecord {
                        detail: format!("unparseable XML event document: {}", e),
                    })
                }
                _ => {}
            }
        }

        Ok(doc)
    }

    /// Look up a header by name.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers.get(name.as_ref()).map(|s| s.as_str())
    }

    /// All headers as a map.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Set or overwrite a header.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    /// Document body, if any.
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Set the document body.
    pub fn set_body(&mut self, body: String) {
        self.body = Some(body);
    }

    /// `Event-Name` header; the observer registry dispatches on this.
    pub fn event_name(&self) -> Option<&str> {
        self.header(HeaderName::EventName)
    }

    /// `Speech-Type` header from detection events (`begin-speaking`,
    /// `detected-speech`, …).
    pub fn speech_type(&self) -> Option<&str> {
        self.header(HeaderName::SpeechType)
    }

    /// `Job-UUID` header correlating a background job with its completion
    /// event.
    pub fn job_uuid(&self) -> Option<&str> {
        self.header(HeaderName::JobUuid)
    }

    /// Extract the text of one named element from an XML-formatted body.
    ///
    /// Speech detection events carry an XML result document in the body;
    /// this pulls a single field (e.g. `input`) out of it without
    /// modelling the whole grammar. Returns `None` when there is no body
    /// or the element is absent.
    pub fn xml_body_text(&self, element: &str) -> Option<String> {
        xml_element_text(self.body()?, element)
    }
}

/// Text content of the first `<element>` in `xml`, if present.
pub fn xml_element_text(xml: &str, element: &str) -> Option<String> {
    use quick_xml::events::Event as XmlEvent;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    let mut inside = false;
    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(ref e)) if e.name().as_ref() == element.as_bytes() => {
                inside = true;
            }
            Ok(XmlEvent::End(ref e)) if e.name().as_ref() == element.as_bytes() => {
                // Empty element: <input></input>
                return Some(String::new());
            }
            Ok(XmlEvent::Text(ref e)) if inside => {
                return e.unescape().ok().map(|s| s.to_string());
            }
            Ok(XmlEvent::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}
