use crate::binxml::model::BinXmlTemplateDefinition;
use crate::ChunkOffset;

use hashbrown::HashMap;
use std::rc::Rc;

pub type CachedTemplate<'chunk> = Rc<BinXmlTemplateDefinition<'chunk>>;

/// Per-chunk cache of template definitions, keyed by the definition's
/// chunk offset.
///
/// Populated lazily: the first instance referencing a definition parses it
/// (resident or out-of-line) and inserts it here; later instances share
/// the parsed definition. Append-only for the chunk's lifetime.
#[derive(Debug, Default)]
pub struct TemplateCache<'chunk>(HashMap<ChunkOffset, CachedTemplate<'chunk>, ahash::RandomState>);

impl<'chunk> TemplateCache<'chunk> {
    pub fn new() -> Self {
        TemplateCache(HashMap::default())
    }

    pub(crate) fn get(&self, offset: ChunkOffset) -> Option<CachedTemplate<'chunk>> {
        self.0.get(&offset).cloned()
    }

    pub(crate) fn insert(&mut self, offset: ChunkOffset, definition: CachedTemplate<'chunk>) {
        self.0.entry(offset).or_insert(definition);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
