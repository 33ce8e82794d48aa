use crate::binxml::name::BinXmlName;
use crate::binxml::value::BinXmlValue;
use crate::err::{SerializationError, SerializationResult};
use crate::model::XmlElement;
use crate::ParserSettings;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::fmt::Display;
use std::io::Write;

/// Visitor over an assembled record tree. Implementations project the
/// element stream into a concrete output form (XML text, JSON, an owned
/// tree).
pub trait BinXmlOutput {
    fn visit_start_of_stream(&mut self) -> SerializationResult<()>;
    fn visit_open_start_element(&mut self, element: &XmlElement<'_>) -> SerializationResult<()>;
    fn visit_close_element(&mut self) -> SerializationResult<()>;
    fn visit_characters(&mut self, value: &BinXmlValue<'_>) -> SerializationResult<()>;
    fn visit_entity_reference(&mut self, name: &BinXmlName) -> SerializationResult<()>;
    fn visit_end_of_stream(&mut self) -> SerializationResult<()>;
}

fn xml_error(error: impl Display) -> SerializationError {
    SerializationError::XmlOutputError {
        message: error.to_string(),
    }
}

/// Adapter between the assembled record model and a `quick-xml` writer.
pub struct XmlOutput<W: Write> {
    writer: Writer<W>,
    open_elements: Vec<String>,
    eof_reached: bool,
}

impl<W: Write> XmlOutput<W> {
    pub fn with_writer(target: W, settings: &ParserSettings) -> Self {
        let writer = if settings.should_indent() {
            Writer::new_with_indent(target, b' ', 2)
        } else {
            Writer::new(target)
        };

        XmlOutput {
            writer,
            open_elements: Vec::new(),
            eof_reached: false,
        }
    }

    pub fn into_writer(self) -> SerializationResult<W> {
        if self.eof_reached {
            Ok(self.writer.into_inner())
        } else {
            Err(xml_error(
                "tried to return the writer before EOF was reached, output is incomplete",
            ))
        }
    }
}

impl<W: Write> BinXmlOutput for XmlOutput<W> {
    fn visit_start_of_stream(&mut self) -> SerializationResult<()> {
        if self.eof_reached {
            return Err(xml_error("start of stream after EOF"));
        }
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(xml_error)
    }

    fn visit_open_start_element(&mut self, element: &XmlElement<'_>) -> SerializationResult<()> {
        if self.eof_reached {
            return Err(xml_error("open element after EOF"));
        }

        let name = element.name.as_str();
        let mut start = BytesStart::new(name);
        for attribute in &element.attributes {
            start.push_attribute((
                attribute.name.as_str(),
                attribute.value.as_cow_str().as_ref(),
            ));
        }

        self.open_elements.push(name.to_string());
        self.writer
            .write_event(Event::Start(start))
            .map_err(xml_error)
    }

    fn visit_close_element(&mut self) -> SerializationResult<()> {
        let name = self
            .open_elements
            .pop()
            .ok_or_else(|| xml_error("close element without a matching open element"))?;

        self.writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(xml_error)
    }

    fn visit_characters(&mut self, value: &BinXmlValue<'_>) -> SerializationResult<()> {
        self.writer
            .write_event(Event::Text(BytesText::new(&value.as_cow_str())))
            .map_err(xml_error)
    }

    fn visit_entity_reference(&mut self, name: &BinXmlName) -> SerializationResult<()> {
        // Entities pass through unexpanded; the reader of the XML text
        // resolves them.
        let entity = format!("&{};", name.as_str());
        self.writer
            .write_event(Event::Text(BytesText::from_escaped(entity)))
            .map_err(xml_error)
    }

    fn visit_end_of_stream(&mut self) -> SerializationResult<()> {
        if !self.open_elements.is_empty() {
            return Err(xml_error("EOF reached before all elements were closed"));
        }
        self.eof_reached = true;
        Ok(())
    }
}
