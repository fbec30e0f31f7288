use crate::key::Symbol;
use smallvec::SmallVec;

/// Sorted set of `(key, value)` tag pairs. Keys are unique; a later value for
/// the same key wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagSet {
    // most series carry fewer than four tags
    pairs: SmallVec<[(Symbol, Symbol); 4]>,
}

impl TagSet {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Symbol, Symbol)>) -> Self {
        let mut out: SmallVec<[(Symbol, Symbol); 4]> = SmallVec::new();
        for (key, value) in pairs {
            match out.binary_search_by(|(k, _)| k.cmp(&key)) {
                Ok(idx) => out[idx].1 = value,
                Err(idx) => out.insert(idx, (key, value)),
            }
        }
        Self { pairs: out }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Symbol, Symbol)> + '_ {
        self.pairs.iter().copied()
    }

    pub fn get(&self, key: Symbol) -> Option<Symbol> {
        self.pairs
            .binary_search_by(|(k, _)| k.cmp(&key))
            .ok()
            .map(|idx| self.pairs[idx].1)
    }

    /// True when every pair of `filter` is present in `self`.
    pub fn contains_all(&self, filter: &TagSet) -> bool {
        filter.iter().all(|(k, v)| self.get(k) == Some(v))
    }
}
