use crate::binxml::model::{
    BinXmlAttribute, BinXmlEntityReference, BinXmlFragmentHeader, BinXmlOpenStartElement,
    BinXmlSubstitutionDescriptor, BinXmlTemplateDefinition, BinXmlTemplateInstance,
    BinXmlValueDescriptor,
};
use crate::binxml::name::BinXmlName;
use crate::binxml::stream::read_fragment;
use crate::binxml::value::{BinXmlValue, BinXmlValueType};
use crate::chunk::EvtxChunk;
use crate::cursor::BinCursor;
use crate::err::{DeserializationError, DeserializationResult};
use crate::ChunkOffset;

use encoding::EncodingRef;
use log::{trace, warn};
use std::rc::Rc;

/// Upper bound on template-in-template nesting. Real logs nest two or
/// three levels; the bound exists to keep reference cycles in corrupted
/// chunks from recursing forever.
const MAX_TEMPLATE_NESTING: u32 = 8;

pub(crate) fn read_fragment_header(
    cursor: &mut BinCursor<'_>,
) -> DeserializationResult<BinXmlFragmentHeader> {
    let major_version = cursor.u8("fragment major version")?;
    let minor_version = cursor.u8("fragment minor version")?;
    let flags = cursor.u8("fragment flags")?;

    Ok(BinXmlFragmentHeader {
        major_version,
        minor_version,
        flags,
    })
}

/// Resolves a name reference: the name either lives inline at the cursor
/// position (first sighting), in the chunk string cache, or elsewhere in
/// the chunk (side-read without disturbing the stream position).
///
/// Newly seen names are appended to the cache, so repeated references are
/// decoded once per chunk.
pub(crate) fn read_name<'a>(
    cursor: &mut BinCursor<'a>,
    chunk: Option<&EvtxChunk<'a>>,
) -> DeserializationResult<Rc<BinXmlName>> {
    let name_offset: ChunkOffset = cursor.u32("name offset")?;

    let cached = chunk.and_then(|c| c.string_cache().borrow().get(name_offset));
    let inline = name_offset as usize == cursor.pos();

    if let Some(name) = cached {
        if inline {
            // The cached copy was parsed from exactly these bytes.
            cursor.skip(name.data_size() as usize, "cached inline name")?;
        }
        return Ok(name);
    }

    let name = if inline {
        let (_, name) = BinXmlName::from_cursor(cursor)?;
        Rc::new(name)
    } else {
        let buf = chunk.map_or_else(|| cursor.buf(), |c| c.data());
        let mut side_cursor = BinCursor::with_pos(buf, name_offset as usize)?;
        let (_, name) = BinXmlName::from_cursor(&mut side_cursor)?;
        Rc::new(name)
    };

    if let Some(c) = chunk {
        c.string_cache()
            .borrow_mut()
            .insert(name_offset, Rc::clone(&name));
    }

    Ok(name)
}

pub(crate) fn read_open_start_element<'a>(
    cursor: &mut BinCursor<'a>,
    chunk: Option<&EvtxChunk<'a>>,
    has_attributes: bool,
) -> DeserializationResult<BinXmlOpenStartElement> {
    // Dependency identifier, only meaningful inside template definitions.
    let _dependency_id = cursor.u16("element dependency id")?;
    let data_size = cursor.u32("element data size")?;
    let name = read_name(cursor, chunk)?;

    let _attribute_list_data_size = if has_attributes {
        cursor.u32("attribute list size")?
    } else {
        0
    };

    Ok(BinXmlOpenStartElement {
        data_size,
        name,
        has_attributes,
    })
}

pub(crate) fn read_attribute<'a>(
    cursor: &mut BinCursor<'a>,
    chunk: Option<&EvtxChunk<'a>>,
) -> DeserializationResult<BinXmlAttribute> {
    let name = read_name(cursor, chunk)?;
    Ok(BinXmlAttribute { name })
}

pub(crate) fn read_entity_ref<'a>(
    cursor: &mut BinCursor<'a>,
    chunk: Option<&EvtxChunk<'a>>,
) -> DeserializationResult<BinXmlEntityReference> {
    let name = read_name(cursor, chunk)?;
    Ok(BinXmlEntityReference { name })
}

pub(crate) fn read_substitution_descriptor(
    cursor: &mut BinCursor<'_>,
    optional: bool,
) -> DeserializationResult<BinXmlSubstitutionDescriptor> {
    let substitution_index = cursor.u16("substitution index")?;
    let value_type_token = cursor.u8("substitution value type")?;
    let value_type = BinXmlValueType::from_u8(value_type_token).ok_or(
        DeserializationError::InvalidValueVariant {
            value: value_type_token,
            offset: cursor.position(),
        },
    )?;

    Ok(BinXmlSubstitutionDescriptor {
        substitution_index,
        value_type,
        optional,
    })
}

/// Reads a template definition at the cursor position: its header (next
/// bucket pointer, GUID, data size) followed by the skeleton token stream.
pub(crate) fn read_template_definition<'a>(
    cursor: &mut BinCursor<'a>,
    chunk: Option<&EvtxChunk<'a>>,
    ansi_codec: EncodingRef,
) -> DeserializationResult<(ChunkOffset, BinXmlTemplateDefinition<'a>)> {
    let next_template_offset = cursor.u32("next template offset")?;
    let guid = cursor.guid()?;
    let data_size = cursor.u32("template definition data size")?;

    // Data size covers the fragment header, the element tree and the end
    // of stream token, but not the 24 definition header bytes above.
    let tokens = read_fragment(cursor, chunk, ansi_codec, Some(data_size))?;

    Ok((
        next_template_offset,
        BinXmlTemplateDefinition {
            guid,
            data_size,
            tokens,
        },
    ))
}

/// Reads a template instance: resolves its definition (resident, cached,
/// or side-read) and decodes the substitution value array.
pub(crate) fn read_template_instance<'a>(
    cursor: &mut BinCursor<'a>,
    chunk: Option<&EvtxChunk<'a>>,
    ansi_codec: EncodingRef,
) -> DeserializationResult<BinXmlTemplateInstance<'a>> {
    trace!("TemplateInstance at {}", cursor.position());

    let _unknown = cursor.u8("template instance header")?;
    let template_id = cursor.u32("template id")?;
    let definition_offset: ChunkOffset = cursor.u32("template definition offset")?;

    if let Some(c) = chunk {
        if c.template_nesting_depth() > MAX_TEMPLATE_NESTING {
            return Err(DeserializationError::TemplateNestingLimit {
                offset: cursor.position(),
            });
        }
    }

    let cached = chunk.and_then(|c| c.template_cache().borrow().get(definition_offset));

    let definition = match cached {
        Some(definition) => {
            if definition_offset as usize == cursor.pos() {
                // Resident copy of an already-cached definition: skip it.
                cursor.skip(
                    24 + definition.data_size as usize,
                    "cached resident template definition",
                )?;
            }
            trace!("got cached template from offset {definition_offset}");
            definition
        }
        None => {
            let guard = chunk.map(|c| c.enter_template());

            let definition = if definition_offset as usize == cursor.pos() {
                let (_, definition) = read_template_definition(cursor, chunk, ansi_codec)?;
                Rc::new(definition)
            } else {
                trace!("template definition is out-of-line at offset {definition_offset}");
                let buf = chunk.map_or_else(|| cursor.buf(), |c| c.data());
                let mut side_cursor = BinCursor::with_pos(buf, definition_offset as usize)?;
                let (_, definition) =
                    read_template_definition(&mut side_cursor, chunk, ansi_codec)?;
                Rc::new(definition)
            };

            drop(guard);

            if let Some(c) = chunk {
                c.template_cache()
                    .borrow_mut()
                    .insert(definition_offset, Rc::clone(&definition));
            }

            definition
        }
    };

    let substitutions = read_substitution_array(cursor, chunk, ansi_codec)?;

    Ok(BinXmlTemplateInstance {
        template_id,
        definition_offset,
        definition,
        substitutions,
    })
}

fn read_substitution_array<'a>(
    cursor: &mut BinCursor<'a>,
    chunk: Option<&EvtxChunk<'a>>,
    ansi_codec: EncodingRef,
) -> DeserializationResult<Vec<BinXmlValue<'a>>> {
    let count = cursor.u32("substitution count")?;

    let mut descriptors = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let size = cursor.u16("value descriptor size")?;
        let raw_type = cursor.u8("value descriptor type")?;
        let _padding = cursor.u8("value descriptor padding")?;

        descriptors.push(BinXmlValueDescriptor {
            size,
            raw_type,
            value_type: BinXmlValueType::from_u8(raw_type),
        });
    }

    trace!("{descriptors:?}");

    let mut substitutions = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        let start = cursor.pos();
        let declared = usize::from(descriptor.size);

        let value = match &descriptor.value_type {
            // Null substitutions may still carry payload bytes (deleted
            // values); the declared size covers them.
            Some(BinXmlValueType::Null) => BinXmlValue::Null,
            Some(value_type) => BinXmlValue::deserialize_value_type(
                value_type,
                cursor,
                chunk,
                Some(descriptor.size),
                ansi_codec,
            )?,
            None => {
                warn!(
                    "unknown substitution value type {:#04x} at offset {}, keeping raw bytes",
                    descriptor.raw_type,
                    cursor.position()
                );
                BinXmlValue::Raw(cursor.take_bytes(declared, "unknown substitution value")?)
            }
        };

        let consumed = cursor.pos() - start;
        if consumed != declared {
            if !matches!(value, BinXmlValue::Null) {
                warn!(
                    "substitution value consumed {consumed} byte(s) but declared {declared}, \
                     repositioning to the declared boundary"
                );
            }
            cursor.seek(start + declared, "substitution value boundary")?;
        }

        substitutions.push(value);
    }

    Ok(substitutions)
}
