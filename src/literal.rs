//! The literal pool: an append-only list of literal records scoped to a
//! single function's parse, plus the status-flag bitset spec.md §3 defines.
//!
//! Grounded on the corpus's string/identifier interner (`intern.rs`'s
//! `StringId`/`InternerBuilder`), generalized from "one process-wide table of
//! deduplicated strings" to "one append-only, per-function table of typed
//! literal records with a status bitset and a two-purpose `prop` field,"
//! which is what spec.md §3 actually requires.

use bitflags::bitflags;

bitflags! {
    /// Status flags on a literal record (spec.md §3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StatusFlags: u8 {
        /// A binding (`var`, function argument, function name).
        const VAR = 1 << 0;
        /// This identifier cannot be stored in a register.
        const NO_REG_STORE = 1 << 1;
        /// Initialized with a value.
        const INITIALIZED = 1 << 2;
        /// Is a function argument.
        const FUNCTION_ARGUMENT = 1 << 3;
        /// Referenced by a descendant function but not locally.
        const UNUSED_IDENT = 1 << 4;
        /// Value bytes alias the source buffer; this record does not own them.
        const SOURCE_PTR = 1 << 5;
    }
}

/// The literal's type tag (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LiteralType {
    Ident,
    String,
    Number,
    Function,
    Regexp,
    /// Tombstone left behind by pool deduplication/hoisting (spec.md §4.3).
    Unused,
}

/// The literal's value payload.
///
/// `Ident`/`String` borrow-or-own their bytes depending on
/// [`StatusFlags::SOURCE_PTR`]; `Number` and `Function`/`Regexp` hold an
/// opaque handle (a parsed `f64`, or an index into a side table of compiled
/// function bodies / regexp patterns owned by the caller).
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Bytes(Vec<u8>),
    Number(f64),
    /// Index into an out-of-band table of nested `CompiledCode`s or regexp
    /// patterns; which table depends on the record's `LiteralType`.
    Handle(u32),
    None,
}

/// A single literal pool record (spec.md §3).
#[derive(Debug, Clone)]
pub struct LiteralRecord {
    pub kind: LiteralType,
    pub flags: StatusFlags,
    pub value: LiteralValue,
    /// Two-purpose field: during parsing, `length` in bytes for
    /// identifier/string records; after indexing, the assigned dense
    /// `index`. We keep both as named accessors over one `u32` to mirror the
    /// C union without `unsafe`.
    prop: u32,
    /// Set once post-indexing has assigned a dense slot.
    indexed: bool,
}

impl LiteralRecord {
    #[must_use]
    pub fn new_ident(name: Vec<u8>, flags: StatusFlags) -> Self {
        let len = name.len();
        Self {
            kind: LiteralType::Ident,
            flags,
            value: LiteralValue::Bytes(name),
            prop: u32::try_from(len).unwrap_or(u32::MAX),
            indexed: false,
        }
    }

    #[must_use]
    pub fn new_string(bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        Self {
            kind: LiteralType::String,
            flags: StatusFlags::empty(),
            value: LiteralValue::Bytes(bytes),
            prop: u32::try_from(len).unwrap_or(u32::MAX),
            indexed: false,
        }
    }

    #[must_use]
    pub fn new_number(value: f64) -> Self {
        Self {
            kind: LiteralType::Number,
            flags: StatusFlags::empty(),
            value: LiteralValue::Number(value),
            prop: 0,
            indexed: false,
        }
    }

    #[must_use]
    pub fn new_function(handle: u32) -> Self {
        Self {
            kind: LiteralType::Function,
            flags: StatusFlags::empty(),
            value: LiteralValue::Handle(handle),
            prop: 0,
            indexed: false,
        }
    }

    #[must_use]
    pub fn new_regexp(handle: u32) -> Self {
        Self {
            kind: LiteralType::Regexp,
            flags: StatusFlags::empty(),
            value: LiteralValue::Handle(handle),
            prop: 0,
            indexed: false,
        }
    }

    /// `length` while the record is still unindexed (parse-time meaning of
    /// `prop`).
    #[must_use]
    pub fn length(&self) -> u16 {
        debug_assert!(!self.indexed, "length() read after indexing");
        u16::try_from(self.prop).unwrap_or(u16::MAX)
    }

    /// Dense `index` assigned by the classifier, or for a tombstone, the
    /// redirect to its superseding record (spec.md §3, §4.3).
    #[must_use]
    pub fn index(&self) -> u16 {
        debug_assert!(self.indexed, "index() read before indexing");
        u16::try_from(self.prop).unwrap_or(u16::MAX)
    }

    pub fn set_index(&mut self, index: u16) {
        self.prop = u32::from(index);
        self.indexed = true;
    }

    /// Byte-wise identifier comparison, used by hoisting to avoid duplicate
    /// parent pool entries (spec.md §4.3).
    #[must_use]
    pub fn ident_bytes(&self) -> Option<&[u8]> {
        match (&self.kind, &self.value) {
            (LiteralType::Ident, LiteralValue::Bytes(b)) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_var(&self) -> bool {
        self.flags.contains(StatusFlags::VAR)
    }

    /// Turns this record into an `Unused` tombstone whose `index` now
    /// redirects to `superseded_by` (spec.md §3, §4.3).
    pub fn make_tombstone(&mut self, superseded_by: u16) {
        self.kind = LiteralType::Unused;
        self.value = LiteralValue::None;
        self.prop = u32::from(superseded_by);
        self.indexed = true;
    }
}

/// Append-only literal pool, scoped to a single function's parse
/// (spec.md §3).
#[derive(Debug, Default)]
pub struct LiteralPool {
    records: Vec<LiteralRecord>,
}

/// Maximum literal pool entries per function before a
/// [`crate::error::ErrorKind::LiteralLimitReached`] is raised (spec.md §4.3).
pub const MAX_LITERALS_PER_FUNCTION: usize = 32767;

impl LiteralPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Appends a record, returning its position in the pool (the order
    /// classification will later traverse in). Fails once the function-local
    /// limit is hit.
    pub fn push(&mut self, record: LiteralRecord) -> crate::error::Result<usize> {
        if self.records.len() >= MAX_LITERALS_PER_FUNCTION {
            return Err(crate::error::ParseError::new(crate::error::ErrorKind::LiteralLimitReached, 0, 0));
        }
        log::trace!("literal pool growing to {} entries ({:?})", self.records.len() + 1, record.kind);
        self.records.push(record);
        Ok(self.records.len() - 1)
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> &LiteralRecord {
        &self.records[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut LiteralRecord {
        &mut self.records[idx]
    }

    /// Finds an existing `Ident` binding by byte-wise name comparison
    /// (spec.md §4.3 "at most one parent pool entry per identifier name").
    #[must_use]
    pub fn find_ident(&self, name: &[u8]) -> Option<usize> {
        self.records
            .iter()
            .position(|r| r.kind == LiteralType::Ident && r.ident_bytes() == Some(name))
    }

    /// Iterates records in insertion (source) order — the traversal order
    /// classification relies on (spec.md §4.2).
    pub fn iter(&self) -> impl Iterator<Item = &LiteralRecord> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut LiteralRecord> {
        self.records.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tombstone_redirect_round_trips() {
        let mut pool = LiteralPool::new();
        let a = pool.push(LiteralRecord::new_ident(b"a".to_vec(), StatusFlags::VAR)).unwrap();
        let b = pool.push(LiteralRecord::new_ident(b"b".to_vec(), StatusFlags::VAR)).unwrap();
        pool.get_mut(a).make_tombstone(u16::try_from(b).unwrap());
        assert_eq!(pool.get(a).kind, LiteralType::Unused);
        assert_eq!(pool.get(a).index(), u16::try_from(b).unwrap());
    }

    #[test]
    fn find_ident_is_byte_wise() {
        let mut pool = LiteralPool::new();
        pool.push(LiteralRecord::new_ident(b"foo".to_vec(), StatusFlags::VAR)).unwrap();
        assert!(pool.find_ident(b"foo").is_some());
        assert!(pool.find_ident(b"bar").is_none());
    }

    #[test]
    fn pool_rejects_past_limit() {
        let mut pool = LiteralPool::new();
        for i in 0..MAX_LITERALS_PER_FUNCTION {
            pool.push(LiteralRecord::new_number(i as f64)).unwrap();
        }
        let err = pool.push(LiteralRecord::new_number(0.0)).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::LiteralLimitReached);
    }
}
