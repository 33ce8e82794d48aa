use crate::binxml::assemble::resolve_entity;
use crate::binxml::name::BinXmlName;
use crate::binxml::value::BinXmlValue;
use crate::err::{SerializationError, SerializationResult};
use crate::model::XmlElement;
use crate::xml_output::BinXmlOutput;

use serde::Serialize;

/// An owned, ordered projection of a decoded record.
///
/// Interleaving of child elements and text is preserved, and names are
/// carried verbatim, so two structurally distinct records never project to
/// the same tree. This is the form used by round-trip and idempotence
/// tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct XmlTree {
    pub roots: Vec<XmlContent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum XmlContent {
    Element(XmlNode),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct XmlNode {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlContent>,
}

impl XmlNode {
    /// Finds a direct child element by name.
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find_map(|content| match content {
            XmlContent::Element(node) if node.name == name => Some(node),
            _ => None,
        })
    }

    /// Concatenated text content of this node.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|content| match content {
                XmlContent::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(attribute, _)| attribute == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Visitor building an [`XmlTree`].
#[derive(Debug, Default)]
pub struct TreeOutput {
    roots: Vec<XmlContent>,
    open: Vec<XmlNode>,
}

impl TreeOutput {
    pub fn new() -> Self {
        TreeOutput::default()
    }

    pub fn into_tree(self) -> SerializationResult<XmlTree> {
        if !self.open.is_empty() {
            return Err(SerializationError::RecordStructureError {
                message: "EOF reached before all elements were closed",
            });
        }
        Ok(XmlTree { roots: self.roots })
    }

    fn push_content(&mut self, content: XmlContent) {
        match self.open.last_mut() {
            Some(parent) => parent.children.push(content),
            None => self.roots.push(content),
        }
    }
}

impl BinXmlOutput for TreeOutput {
    fn visit_start_of_stream(&mut self) -> SerializationResult<()> {
        Ok(())
    }

    fn visit_open_start_element(&mut self, element: &XmlElement<'_>) -> SerializationResult<()> {
        self.open.push(XmlNode {
            name: element.name.as_str().to_string(),
            attributes: element
                .attributes
                .iter()
                .map(|attribute| {
                    (
                        attribute.name.as_str().to_string(),
                        attribute.value.as_cow_str().into_owned(),
                    )
                })
                .collect(),
            children: Vec::new(),
        });
        Ok(())
    }

    fn visit_close_element(&mut self) -> SerializationResult<()> {
        let node = self
            .open
            .pop()
            .ok_or(SerializationError::RecordStructureError {
                message: "close element without a matching open element",
            })?;
        self.push_content(XmlContent::Element(node));
        Ok(())
    }

    fn visit_characters(&mut self, value: &BinXmlValue<'_>) -> SerializationResult<()> {
        self.push_content(XmlContent::Text(value.as_cow_str().into_owned()));
        Ok(())
    }

    fn visit_entity_reference(&mut self, name: &BinXmlName) -> SerializationResult<()> {
        self.push_content(XmlContent::Text(resolve_entity(name).into_owned()));
        Ok(())
    }

    fn visit_end_of_stream(&mut self) -> SerializationResult<()> {
        Ok(())
    }
}
