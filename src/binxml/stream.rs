use crate::binxml::model::BinXmlToken;
use crate::binxml::raw::BinXmlRawToken;
use crate::binxml::tokens::{
    read_attribute, read_entity_ref, read_fragment_header, read_open_start_element,
    read_substitution_descriptor, read_template_instance,
};
use crate::binxml::value::BinXmlValue;
use crate::chunk::EvtxChunk;
use crate::cursor::BinCursor;
use crate::err::{DeserializationError, DeserializationResult};

use encoding::EncodingRef;
use log::trace;

/// Tokenizes one binxml fragment.
///
/// Reading stops at an `EndOfStream` token, after `data_size` bytes when a
/// limit is given, or at the end of the buffer. Template definitions and
/// nested fragments referenced from the stream may populate the chunk's
/// caches as a side effect.
pub fn read_fragment<'a>(
    cursor: &mut BinCursor<'a>,
    chunk: Option<&EvtxChunk<'a>>,
    ansi_codec: EncodingRef,
    data_size: Option<u32>,
) -> DeserializationResult<Vec<BinXmlToken<'a>>> {
    let start = cursor.pos();
    let mut tokens = Vec::new();

    loop {
        if let Some(limit) = data_size {
            if cursor.pos() - start >= limit as usize {
                break;
            }
        }
        if cursor.remaining() == 0 {
            break;
        }

        let offset = cursor.position();
        let byte = cursor.u8("binxml token")?;
        let raw_token = BinXmlRawToken::from_u8(byte)
            .ok_or(DeserializationError::InvalidToken { value: byte, offset })?;

        trace!("{raw_token:?} at offset {offset}");

        match raw_token {
            BinXmlRawToken::EndOfStream => {
                tokens.push(BinXmlToken::EndOfStream);
                // A byte-limited stream may hold several fragments back to
                // back (the limit is the real boundary); an unbounded one
                // ends at its first EOF marker.
                if data_size.is_none() {
                    break;
                }
            }
            BinXmlRawToken::StartOfStream => {
                tokens.push(BinXmlToken::FragmentHeader(read_fragment_header(cursor)?));
            }
            BinXmlRawToken::OpenStartElement(meta) => {
                tokens.push(BinXmlToken::OpenStartElement(read_open_start_element(
                    cursor,
                    chunk,
                    meta.has_attributes,
                )?));
            }
            BinXmlRawToken::CloseStartElement => tokens.push(BinXmlToken::CloseStartElement),
            BinXmlRawToken::CloseEmptyElement => tokens.push(BinXmlToken::CloseEmptyElement),
            BinXmlRawToken::CloseElement => tokens.push(BinXmlToken::CloseElement),
            BinXmlRawToken::Value => tokens.push(BinXmlToken::Value(
                BinXmlValue::from_binxml_stream(cursor, chunk, ansi_codec)?,
            )),
            BinXmlRawToken::Attribute(_meta) => {
                tokens.push(BinXmlToken::Attribute(read_attribute(cursor, chunk)?));
            }
            BinXmlRawToken::EntityReference => {
                tokens.push(BinXmlToken::EntityRef(read_entity_ref(cursor, chunk)?));
            }
            BinXmlRawToken::TemplateInstance => {
                tokens.push(BinXmlToken::TemplateInstance(read_template_instance(
                    cursor, chunk, ansi_codec,
                )?));
            }
            BinXmlRawToken::NormalSubstitution => tokens.push(BinXmlToken::Substitution(
                read_substitution_descriptor(cursor, false)?,
            )),
            BinXmlRawToken::ConditionalSubstitution => tokens.push(BinXmlToken::Substitution(
                read_substitution_descriptor(cursor, true)?,
            )),
            BinXmlRawToken::CDataSection => {
                return Err(DeserializationError::UnimplementedToken {
                    name: "CDataSection",
                    offset,
                });
            }
            BinXmlRawToken::CharReference => {
                return Err(DeserializationError::UnimplementedToken {
                    name: "CharReference",
                    offset,
                });
            }
            BinXmlRawToken::ProcessingInstructionTarget => {
                return Err(DeserializationError::UnimplementedToken {
                    name: "ProcessingInstructionTarget",
                    offset,
                });
            }
            BinXmlRawToken::ProcessingInstructionData => {
                return Err(DeserializationError::UnimplementedToken {
                    name: "ProcessingInstructionData",
                    offset,
                });
            }
        }
    }

    Ok(tokens)
}
