/// A raw binxml token byte, before its payload is read.
///
/// The high bit (0x40) of element/attribute/value tokens flags "more data
/// follows" (attributes on an element, further attributes in a list); it
/// is folded into the variant metadata here.
#[derive(Debug, PartialOrd, PartialEq, Eq)]
pub enum BinXmlRawToken {
    EndOfStream,
    OpenStartElement(OpenStartElementTokenMeta),
    CloseStartElement,
    CloseEmptyElement,
    CloseElement,
    Value,
    Attribute(AttributeTokenMeta),
    CDataSection,
    CharReference,
    EntityReference,
    ProcessingInstructionTarget,
    ProcessingInstructionData,
    TemplateInstance,
    NormalSubstitution,
    ConditionalSubstitution,
    StartOfStream,
}

#[derive(Debug, PartialOrd, PartialEq, Eq)]
pub struct OpenStartElementTokenMeta {
    pub has_attributes: bool,
}

#[derive(Debug, PartialOrd, PartialEq, Eq)]
pub struct AttributeTokenMeta {
    pub more_attributes_expected: bool,
}

impl BinXmlRawToken {
    pub fn from_u8(byte: u8) -> Option<BinXmlRawToken> {
        match byte {
            0x00 => Some(BinXmlRawToken::EndOfStream),
            // <Event>
            0x01 => Some(BinXmlRawToken::OpenStartElement(
                OpenStartElementTokenMeta {
                    has_attributes: false,
                },
            )),
            0x41 => Some(BinXmlRawToken::OpenStartElement(
                OpenStartElementTokenMeta {
                    has_attributes: true,
                },
            )),
            // Terminates the attribute list
            0x02 => Some(BinXmlRawToken::CloseStartElement),
            0x03 => Some(BinXmlRawToken::CloseEmptyElement),
            // </Event>
            0x04 => Some(BinXmlRawToken::CloseElement),
            0x05 | 0x45 => Some(BinXmlRawToken::Value),
            0x06 => Some(BinXmlRawToken::Attribute(AttributeTokenMeta {
                more_attributes_expected: false,
            })),
            0x46 => Some(BinXmlRawToken::Attribute(AttributeTokenMeta {
                more_attributes_expected: true,
            })),
            0x07 | 0x47 => Some(BinXmlRawToken::CDataSection),
            0x08 | 0x48 => Some(BinXmlRawToken::CharReference),
            0x09 | 0x49 => Some(BinXmlRawToken::EntityReference),
            0x0a => Some(BinXmlRawToken::ProcessingInstructionTarget),
            0x0b => Some(BinXmlRawToken::ProcessingInstructionData),
            0x0c => Some(BinXmlRawToken::TemplateInstance),
            0x0d => Some(BinXmlRawToken::NormalSubstitution),
            0x0e => Some(BinXmlRawToken::ConditionalSubstitution),
            0x0f => Some(BinXmlRawToken::StartOfStream),
            _ => None,
        }
    }
}
