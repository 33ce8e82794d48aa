use crate::binxml::name::BinXmlName;
use crate::binxml::value::{BinXmlValue, BinXmlValueType};
use crate::ChunkOffset;

use std::fmt::{self, Formatter};
use std::rc::Rc;

use winstructs::guid::Guid;

/// One decoded binxml token. Values may borrow from the chunk data (`'a`);
/// names are shared via the per-chunk string cache.
#[derive(Debug, PartialEq, Clone)]
pub enum BinXmlToken<'a> {
    FragmentHeader(BinXmlFragmentHeader),
    TemplateInstance(BinXmlTemplateInstance<'a>),
    OpenStartElement(BinXmlOpenStartElement),
    Attribute(BinXmlAttribute),
    CloseStartElement,
    CloseEmptyElement,
    CloseElement,
    Value(BinXmlValue<'a>),
    EntityRef(BinXmlEntityReference),
    Substitution(BinXmlSubstitutionDescriptor),
    EndOfStream,
}

/// Fragment header at the start of a binxml stream.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BinXmlFragmentHeader {
    pub major_version: u8,
    pub minor_version: u8,
    pub flags: u8,
}

/// Open-start element token payload.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BinXmlOpenStartElement {
    pub data_size: u32,
    pub name: Rc<BinXmlName>,
    pub has_attributes: bool,
}

/// Attribute token payload; the value follows as a separate `Value` token.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BinXmlAttribute {
    pub name: Rc<BinXmlName>,
}

/// Entity reference token payload (`&name;`).
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BinXmlEntityReference {
    pub name: Rc<BinXmlName>,
}

/// A parsed template definition: a skeleton token stream with substitution
/// placeholders, cached per chunk and shared between its instances.
#[derive(Debug, PartialEq, Clone)]
pub struct BinXmlTemplateDefinition<'a> {
    pub guid: Guid,
    pub data_size: u32,
    pub tokens: Vec<BinXmlToken<'a>>,
}

impl fmt::Display for BinXmlTemplateDefinition<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<template {guid}, {size} bytes, {tokens} tokens>",
            guid = self.guid,
            size = self.data_size,
            tokens = self.tokens.len()
        )
    }
}

/// A template instance: a reference to a (possibly shared) definition plus
/// the positional substitution values filling its slots.
#[derive(Debug, PartialEq, Clone)]
pub struct BinXmlTemplateInstance<'a> {
    pub template_id: u32,
    pub definition_offset: ChunkOffset,
    pub definition: Rc<BinXmlTemplateDefinition<'a>>,
    pub substitutions: Vec<BinXmlValue<'a>>,
}

/// Placeholder inside a template definition.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BinXmlSubstitutionDescriptor {
    /// Zero-based slot index into the instance's substitution array.
    pub substitution_index: u16,
    pub value_type: BinXmlValueType,
    /// Conditional substitutions are omitted from output when their value
    /// is null.
    pub optional: bool,
}

/// One entry of a template instance's value descriptor table.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BinXmlValueDescriptor {
    pub size: u16,
    pub raw_type: u8,
    pub value_type: Option<BinXmlValueType>,
}
