//! Text tokenization, vocabulary selection and the per-row token index.
//!
//! Tokens are split on a fixed character class (not locale-dependent) and
//! lowercased before any vocabulary lookup. The vocabulary keeps the tokens
//! whose document frequency reaches `min_df`, capped at `vocab_size` by
//! descending frequency with lexicographic tie-breaks, so fits are
//! deterministic.

use crate::containers::Column;
use crate::error::Result;
use crate::pool::{Pool, PoolRef};
use std::collections::HashMap;

/// The exact separator set. `\x0B` is vertical tab, `\x0C` form feed.
pub const TOKEN_SEPARATORS: &[char] = &[
    '\t', '\x0B', '\n', '\r', '\x0C', ' ', '"', ';', '[', ']', '\\', '\'',
];

/// Splits on [`TOKEN_SEPARATORS`] and lowercases. Empty tokens are dropped.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(TOKEN_SEPARATORS)
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// The token set of one text column, selected at fit time.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Vocabulary {
    tokens: Vec<String>,
    #[serde(skip)]
    lookup: HashMap<String, u32>,
}

impl Vocabulary {
    /// Builds the vocabulary over the documents of one column.
    pub fn build<'a>(
        documents: impl Iterator<Item = &'a str>,
        min_df: usize,
        vocab_size: usize,
    ) -> Vocabulary {
        let mut document_frequency: HashMap<String, usize> = HashMap::new();
        for doc in documents {
            let mut seen: Vec<String> = tokenize(doc).collect();
            seen.sort_unstable();
            seen.dedup();
            for token in seen {
                *document_frequency.entry(token).or_insert(0) += 1;
            }
        }

        let mut selected: Vec<(String, usize)> = document_frequency
            .into_iter()
            .filter(|&(_, df)| df >= min_df)
            .collect();
        selected.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        selected.truncate(vocab_size);

        let tokens: Vec<String> = selected.into_iter().map(|(t, _)| t).collect();
        let lookup = tokens
            .iter()
            .enumerate()
            .map(|(ix, t)| (t.clone(), ix as u32))
            .collect();
        Vocabulary { tokens, lookup }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn token(&self, ix: u32) -> &str {
        &self.tokens[ix as usize]
    }

    pub fn id(&self, token: &str) -> Option<u32> {
        self.lookup.get(token).copied()
    }

    /// Rebuilds the lookup table after deserialization.
    pub fn rebuild_lookup(&mut self) {
        self.lookup = self
            .tokens
            .iter()
            .enumerate()
            .map(|(ix, t)| (t.clone(), ix as u32))
            .collect();
    }
}

/// Per-row sorted token-id lists for one text column, stored as offsets
/// into one flat in-memory buffer. Shared read-only across transform
/// shards.
#[derive(Debug, Clone)]
pub struct TokenIndex {
    offsets: Vec<usize>,
    flat: Vec<u32>,
}

impl TokenIndex {
    /// Builds the index in memory.
    pub fn build(column: &Column<String>, vocabulary: &Vocabulary) -> TokenIndex {
        let (offsets, flat) = collect_token_ids(column, vocabulary);
        TokenIndex { offsets, flat }
    }

    pub fn nrows(&self) -> usize {
        self.offsets.len() - 1
    }

    /// The sorted token ids of one row.
    pub fn row(&self, ix: usize) -> &[u32] {
        &self.flat[self.offsets[ix]..self.offsets[ix + 1]]
    }

    pub fn contains(&self, ix: usize, token_id: u32) -> bool {
        self.row(ix).binary_search(&token_id).is_ok()
    }
}

/// The pool-backed variant, used while the index is being built during the
/// single-threaded part of a fit or transform. The pool is confined to that
/// thread; `to_memory` materializes the index for shard-parallel reads and
/// drops the pool together with its backing file.
pub struct PooledTokenIndex {
    offsets: Vec<usize>,
    pool: Pool,
    block: PoolRef<u32>,
}

impl PooledTokenIndex {
    pub fn build(
        column: &Column<String>,
        vocabulary: &Vocabulary,
        mut pool: Pool,
    ) -> Result<PooledTokenIndex> {
        let (offsets, flat) = collect_token_ids(column, vocabulary);
        let block = pool.allocate::<u32>(flat.len().max(1))?;
        pool.slice_mut(&block)[..flat.len()].copy_from_slice(&flat);
        Ok(PooledTokenIndex {
            offsets,
            pool,
            block,
        })
    }

    pub fn contains(&self, ix: usize, token_id: u32) -> bool {
        let row = &self.pool.slice(&self.block)[self.offsets[ix]..self.offsets[ix + 1]];
        row.binary_search(&token_id).is_ok()
    }

    pub fn to_memory(self) -> TokenIndex {
        let used = *self.offsets.last().unwrap_or(&0);
        let flat = self.pool.slice(&self.block)[..used].to_vec();
        TokenIndex {
            offsets: self.offsets,
            flat,
        }
    }
}

fn collect_token_ids(column: &Column<String>, vocabulary: &Vocabulary) -> (Vec<usize>, Vec<u32>) {
    let mut offsets = Vec::with_capacity(column.len() + 1);
    let mut flat: Vec<u32> = Vec::new();
    offsets.push(0);
    for row in column.iter() {
        let mut ids: Vec<u32> = tokenize(row).filter_map(|t| vocabulary.id(&t)).collect();
        ids.sort_unstable();
        ids.dedup();
        flat.extend_from_slice(&ids);
        offsets.push(flat.len());
    }
    (offsets, flat)
}
