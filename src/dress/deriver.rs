//! Deterministic attribute derivation: seed chunks to word-pack selections.

use anyhow::anyhow;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Attribute, CHUNK_LEN, SLOTS, Seed, STRIDE_LEN};
use crate::errors::GenerationError;
use crate::wordbank::WordbankCache;

/// Record a pack degrades to when series filtering leaves nothing.
pub const SENTINEL_KEY: &str = "plain";

/// Walks a seed and selects one record per configured slot.
pub struct AttributeDeriver {
    wordbank: Arc<WordbankCache>,
}

impl AttributeDeriver {
    pub fn new(wordbank: Arc<WordbankCache>) -> Self {
        Self { wordbank }
    }

    /// Derive one attribute per slot, capped at the slot list.
    ///
    /// The seed is walked in 8-hex strides; each stride yields a 6-hex
    /// sub-chunk and, room permitting, a second sub-chunk offset by 4. A
    /// seed too short for every slot yields fewer attributes rather than
    /// reading past its end.
    ///
    /// `filters` maps pack names to substring lists; a filtered pack with no
    /// surviving records degrades to a single sentinel record.
    pub fn derive(
        &self,
        seed: &Seed,
        filters: &BTreeMap<String, Vec<String>>,
    ) -> Result<Vec<Attribute>, GenerationError> {
        let mut attributes = Vec::with_capacity(SLOTS.len());
        for (i, slot) in SLOTS.iter().enumerate() {
            // Two sub-chunks per stride: the stride start and 4 past it.
            let start = (i / 2) * STRIDE_LEN + (i % 2) * (STRIDE_LEN / 2);
            let Some(chunk) = seed.chunk(start, CHUNK_LEN) else {
                break;
            };
            let value = u32::from_str_radix(chunk, 16)
                .map_err(|e| GenerationError::Other(anyhow!("seed chunk {chunk:?}: {e}")))?;
            let factor = f64::from(value) / f64::from(1u32 << 24);

            let database = self.wordbank.get_database(slot.database)?;
            let needles = filters
                .get(slot.database)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let survivors = database.filtered(needles);
            let (item_count, selected_index, selected) = if survivors.is_empty() {
                (1, 0, SENTINEL_KEY.to_string())
            } else {
                let index = selector(survivors.len(), factor);
                (survivors.len(), index, survivors[index].key.clone())
            };

            attributes.push(Attribute {
                database: slot.database.to_string(),
                name: slot.name.to_string(),
                chunk: chunk.to_string(),
                value,
                factor,
                item_count,
                selected_index,
                selected,
            });
        }
        Ok(attributes)
    }
}

/// `floor(count * factor)`, clamped inside the record list.
fn selector(count: usize, factor: f64) -> usize {
    (((count as f64) * factor) as usize).min(count.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const ADDRESS: &str = "0x71c7656ec7ab88b098defb751b7401b5f6d8976f";

    fn make_deriver() -> (AttributeDeriver, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let wordbank = Arc::new(WordbankCache::new(dir.path()));
        (AttributeDeriver::new(wordbank), dir)
    }

    #[test]
    fn test_derivation_fills_every_slot() {
        let (deriver, _dir) = make_deriver();
        let seed = Seed::derive(ADDRESS).unwrap();
        let attrs = deriver.derive(&seed, &BTreeMap::new()).unwrap();
        assert_eq!(attrs.len(), SLOTS.len());
        for (attr, slot) in attrs.iter().zip(SLOTS) {
            assert_eq!(attr.name, slot.name);
            assert_eq!(attr.database, slot.database);
            assert_eq!(attr.chunk.len(), CHUNK_LEN);
            assert!(attr.factor < 1.0);
            assert!(attr.selected_index < attr.item_count);
        }
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let (deriver, _dir) = make_deriver();
        let seed = Seed::derive(ADDRESS).unwrap();
        let first = deriver.derive(&seed, &BTreeMap::new()).unwrap();
        let second = deriver.derive(&seed, &BTreeMap::new()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_chunks_overlap_by_stride_halves() {
        let (deriver, _dir) = make_deriver();
        let seed = Seed::derive(ADDRESS).unwrap();
        let attrs = deriver.derive(&seed, &BTreeMap::new()).unwrap();
        assert_eq!(attrs[0].chunk, seed.chunk(0, 6).unwrap());
        assert_eq!(attrs[1].chunk, seed.chunk(4, 6).unwrap());
        assert_eq!(attrs[2].chunk, seed.chunk(8, 6).unwrap());
        assert_eq!(attrs[14].chunk, seed.chunk(56, 6).unwrap());
    }

    #[test]
    fn test_short_seed_stops_at_boundary_instead_of_panicking() {
        let (deriver, _dir) = make_deriver();
        // 20 hex chars: chunks at 0, 4, 8 and 12 fit; the next one at 16
        // would read past the end.
        let seed = Seed::raw("0123456789abcdef0123");
        let attrs = deriver.derive(&seed, &BTreeMap::new()).unwrap();
        assert_eq!(attrs.len(), 4);
    }

    #[test]
    fn test_filter_narrows_selection_pool() {
        let (deriver, _dir) = make_deriver();
        let seed = Seed::derive(ADDRESS).unwrap();
        let mut filters = BTreeMap::new();
        filters.insert("colors".to_string(), vec!["crimson".to_string()]);
        let attrs = deriver.derive(&seed, &filters).unwrap();
        for attr in attrs.iter().filter(|a| a.database == "colors") {
            assert_eq!(attr.item_count, 1);
            assert_eq!(attr.selected, "crimson");
        }
    }

    #[test]
    fn test_filter_with_no_survivors_degrades_to_sentinel() {
        let (deriver, _dir) = make_deriver();
        let seed = Seed::derive(ADDRESS).unwrap();
        let mut filters = BTreeMap::new();
        filters.insert("nouns".to_string(), vec!["zzz-no-such-word".to_string()]);
        let attrs = deriver.derive(&seed, &filters).unwrap();
        let subject = attrs.iter().find(|a| a.database == "nouns").unwrap();
        assert_eq!(subject.selected, SENTINEL_KEY);
        assert_eq!(subject.item_count, 1);
        assert_eq!(subject.selected_index, 0);
    }

    #[test]
    fn test_selector_never_reaches_count() {
        assert_eq!(selector(10, 0.0), 0);
        assert_eq!(selector(10, 0.9999999), 9);
        assert_eq!(selector(1, 0.5), 0);
        assert_eq!(selector(48, 16_777_215.0 / 16_777_216.0), 47);
    }
}
