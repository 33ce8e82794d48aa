use crate::binxml::name::BinXmlName;
use crate::binxml::value::BinXmlValue;
use crate::err::{SerializationError, SerializationResult};

use log::warn;
use std::rc::Rc;

/// An assembled element: name plus its ordered attributes, handed to
/// [`crate::xml_output::BinXmlOutput`] visitors.
#[derive(Debug, PartialEq, Clone)]
pub struct XmlElement<'a> {
    pub name: Rc<BinXmlName>,
    pub attributes: Vec<XmlAttribute<'a>>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct XmlAttribute<'a> {
    pub name: Rc<BinXmlName>,
    pub value: BinXmlValue<'a>,
}

/// Accumulates an element while its attribute tokens stream in.
#[derive(Debug)]
pub(crate) struct XmlElementBuilder<'a> {
    name: Rc<BinXmlName>,
    attributes: Vec<XmlAttribute<'a>>,
    current_attribute_name: Option<Rc<BinXmlName>>,
}

impl<'a> XmlElementBuilder<'a> {
    pub fn new(name: Rc<BinXmlName>) -> Self {
        XmlElementBuilder {
            name,
            attributes: Vec::new(),
            current_attribute_name: None,
        }
    }

    pub fn attribute_name(&mut self, name: Rc<BinXmlName>) {
        if let Some(previous) = self.current_attribute_name.replace(name) {
            warn!("attribute `{previous}` has no value, dropping it");
        }
    }

    /// True when an attribute name is waiting for its value.
    pub fn expecting_value(&self) -> bool {
        self.current_attribute_name.is_some()
    }

    pub fn attribute_value(&mut self, value: BinXmlValue<'a>) -> SerializationResult<()> {
        // A value with no preceding attribute name is ignored, which is
        // consistent with what windows does.
        let Some(name) = self.current_attribute_name.take() else {
            return Ok(());
        };

        self.attributes.push(XmlAttribute { name, value });
        Ok(())
    }

    pub fn finish(mut self) -> SerializationResult<XmlElement<'a>> {
        if let Some(dangling) = self.current_attribute_name.take() {
            warn!("attribute `{dangling}` has no value at element close, dropping it");
        }

        if self.name.as_str().is_empty() {
            return Err(SerializationError::RecordStructureError {
                message: "element name must not be empty",
            });
        }

        Ok(XmlElement {
            name: self.name,
            attributes: self.attributes,
        })
    }
}
