use crate::binxml::name::BinXmlName;
use crate::cursor::BinCursor;
use crate::ChunkOffset;

use hashbrown::HashMap;
use log::debug;
use std::rc::Rc;

/// Per-chunk cache of element/attribute names, keyed by chunk offset.
///
/// Seeded from the 64-bucket offset table in the chunk header and extended
/// lazily as inline names are first seen during decoding. Append-only for
/// the chunk's lifetime; never shared across chunks.
#[derive(Debug, Default)]
pub struct StringCache(HashMap<ChunkOffset, Rc<BinXmlName>, ahash::RandomState>);

impl StringCache {
    /// Walks the header's bucket chains. Unreadable entries are skipped
    /// rather than failing the chunk - the table is only a cache, and the
    /// decoder can re-read any name from its inline definition.
    pub(crate) fn seeded(data: &[u8], offsets: &[ChunkOffset]) -> Self {
        let mut cache: HashMap<ChunkOffset, Rc<BinXmlName>, ahash::RandomState> =
            HashMap::default();

        for &bucket in offsets.iter().filter(|&&offset| offset > 0) {
            let mut next = Some(bucket);

            while let Some(offset) = next {
                // Revisiting an offset means the chain loops.
                if cache.contains_key(&offset) {
                    break;
                }

                let mut cursor = match BinCursor::with_pos(data, offset as usize) {
                    Ok(cursor) => cursor,
                    Err(e) => {
                        debug!("string table offset {offset} is out of range: {e}");
                        break;
                    }
                };

                match BinXmlName::from_cursor(&mut cursor) {
                    Ok((link, name)) => {
                        cache.insert(offset, Rc::new(name));
                        next = link.next_string;
                    }
                    Err(e) => {
                        debug!("string table entry at {offset} is unreadable: {e}");
                        break;
                    }
                }
            }
        }

        StringCache(cache)
    }

    pub(crate) fn get(&self, offset: ChunkOffset) -> Option<Rc<BinXmlName>> {
        self.0.get(&offset).cloned()
    }

    pub(crate) fn insert(&mut self, offset: ChunkOffset, name: Rc<BinXmlName>) {
        self.0.entry(offset).or_insert(name);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
