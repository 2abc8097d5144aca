// Generic XML element tree with uniform naming.
//
// Publications arrive with camelCase element and attribute names, optional
// namespace prefixes, and elements that occur once in one delivery and many
// times in the next. This module flattens all of that away: names are
// decamelized, prefixes dropped, and every child element lives in a sequence
// keyed by its name, so one `<lane>` and five `<lane>`s read the same way.
use crate::error::IngestError;
use fxhash::FxHashMap;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

#[derive(Clone, Debug, Default)]
pub struct Element {
    name: String,
    attributes: FxHashMap<String, String>,
    text: String,
    children: FxHashMap<String, Vec<Element>>,
}

impl Element {
    fn open(start: &BytesStart) -> Result<Self, IngestError> {
        let name = decamelize(&String::from_utf8_lossy(start.local_name().as_ref()));
        let mut attributes = FxHashMap::default();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|e| malformed(&name, e))?;
            if attribute.key.as_ref().starts_with(b"xmlns") {
                continue;
            }
            let key = decamelize(&String::from_utf8_lossy(
                attribute.key.local_name().as_ref(),
            ));
            let value = attribute
                .unescape_value()
                .map_err(|e| malformed(&name, e))?
                .into_owned();
            attributes.insert(key, value);
        }
        Ok(Self {
            name,
            attributes,
            ..Default::default()
        })
    }

    fn push_child(&mut self, child: Element) {
        self.children
            .entry(child.name.clone())
            .or_default()
            .push(child);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|v| v.as_str())
    }

    /// Character content with surrounding whitespace removed.
    pub fn text(&self) -> &str {
        self.text.trim()
    }

    /// First child with this name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children(name).first()
    }

    /// All children with this name, in document order. Absent children give an
    /// empty slice and a single child a one-element slice.
    pub fn children(&self, name: &str) -> &[Element] {
        self.children.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(Element::text)
    }
}

fn malformed(context: &str, err: impl std::fmt::Display) -> IngestError {
    IngestError::MalformedInput(format!("{context}: {err}"))
}

/// Parse a complete document and return its root element.
pub fn parse_document(xml: &str) -> Result<Element, IngestError> {
    let mut reader = Reader::from_str(xml.trim());
    reader.trim_text(true);
    reader.check_end_names(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    let attach = |element: Element, stack: &mut Vec<Element>, root: &mut Option<Element>| {
        match stack.last_mut() {
            Some(parent) => {
                parent.push_child(element);
                Ok(())
            }
            None if root.is_none() => {
                *root = Some(element);
                Ok(())
            }
            None => Err(IngestError::MalformedInput(format!(
                "second root element <{}>",
                element.name
            ))),
        }
    };

    loop {
        let position = reader.buffer_position();
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                if stack.is_empty() && root.is_some() {
                    return Err(IngestError::MalformedInput(
                        "content after the root element".to_string(),
                    ));
                }
                stack.push(Element::open(&start)?);
            }
            Ok(Event::Empty(start)) => {
                let element = Element::open(&start)?;
                attach(element, &mut stack, &mut root)?;
            }
            Ok(Event::End(_)) => {
                let element = stack.pop().ok_or_else(|| {
                    IngestError::MalformedInput(format!("unexpected closing tag at {position}"))
                })?;
                attach(element, &mut stack, &mut root)?;
            }
            Ok(Event::Text(text)) => {
                let content = text
                    .unescape()
                    .map_err(|e| malformed(&format!("text at {position}"), e))?;
                stack
                    .last_mut()
                    .ok_or_else(|| {
                        IngestError::MalformedInput(format!("text outside root at {position}"))
                    })?
                    .text
                    .push_str(&content);
            }
            Ok(Event::CData(data)) => {
                let content = String::from_utf8(data.into_inner().into_owned())
                    .map_err(|e| malformed(&format!("cdata at {position}"), e))?;
                stack
                    .last_mut()
                    .ok_or_else(|| {
                        IngestError::MalformedInput(format!("cdata outside root at {position}"))
                    })?
                    .text
                    .push_str(&content);
            }
            Ok(Event::Eof) => break,
            // Declarations, comments, processing instructions, doctype
            Ok(_) => {}
            Err(e) => return Err(malformed(&format!("at {position}"), e)),
        }
    }

    if let Some(open) = stack.last() {
        return Err(IngestError::MalformedInput(format!(
            "unclosed element <{}>",
            open.name
        )));
    }
    root.ok_or_else(|| IngestError::MalformedInput("document has no root element".to_string()))
}

/// `measurementSiteReference` -> `measurement_site_reference`,
/// `IDValue` -> `id_value`. Names that are already snake case pass through.
pub fn decamelize(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let after_word = prev.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit());
            let ends_acronym = prev.is_some_and(|p| p.is_uppercase())
                && next.is_some_and(|n| n.is_lowercase());
            if after_word || ends_acronym {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else if c == '-' {
            out.push('_');
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn decamelizes_names() {
        assert_eq!(decamelize("measurementSiteReference"), "measurement_site_reference");
        assert_eq!(decamelize("AmsterdamTravelTimes"), "amsterdam_travel_times");
        assert_eq!(decamelize("numberOfInputValuesUsed"), "number_of_input_values_used");
        assert_eq!(decamelize("IDValue"), "id_value");
        assert_eq!(decamelize("lane1"), "lane1");
        assert_eq!(decamelize("already_snake"), "already_snake");
    }

    #[test]
    fn single_and_repeated_children_read_the_same() {
        let one = parse_document(r#"<location><lane specificLane="lane1"/></location>"#).unwrap();
        let two = parse_document(
            r#"<location><lane specificLane="lane1"/><lane specificLane="lane2"/></location>"#,
        )
        .unwrap();
        assert_eq!(one.children("lane").len(), 1);
        assert_eq!(two.children("lane").len(), 2);
        assert_eq!(one.children("lane")[0].attribute("specific_lane"), Some("lane1"));
        assert!(one.children("camera").is_empty());
    }

    #[test]
    fn strips_namespaces_and_keeps_text() {
        let root = parse_document(
            r#"<?xml version="1.0" encoding="UTF-8"?>
            <ns:payloadPublication xmlns:ns="urn:x" xmlns:xsi="urn:y" xsi:type="TravelTime">
                <!-- comment -->
                <ns:publicationTime> 2020-01-01T00:00:00Z </ns:publicationTime>
                <ns:note><![CDATA[a < b]]></ns:note>
                <ns:escaped>a &amp; b</ns:escaped>
            </ns:payloadPublication>"#,
        )
        .unwrap();
        assert_eq!(root.name(), "payload_publication");
        assert_eq!(root.attribute("type"), Some("TravelTime"));
        assert_eq!(root.child_text("publication_time"), Some("2020-01-01T00:00:00Z"));
        assert_eq!(root.child_text("note"), Some("a < b"));
        assert_eq!(root.child_text("escaped"), Some("a & b"));
    }

    #[test]
    fn rejects_broken_documents() {
        for xml in [
            "<wrongly>formatted</xml>",
            "<open><inner></inner>",
            "",
            "just text",
            "<a/><b/>",
        ] {
            let err = parse_document(xml).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedInput, "{xml:?} gave {err}");
        }
    }
}
