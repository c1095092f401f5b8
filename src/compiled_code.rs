//! The compiled-code header and final on-disk layout (spec.md §3, §6).
//!
//! The source represents the two header widths as a C union that differs
//! only in field width. The idiomatic Rust rendition of "two variants differ
//! only in field width" is an enum over two plain structs, which is what
//! `CompiledCodeHeader` below is — no `unsafe`, no type punning.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CompiledCodeFlags: u16 {
        const FUNCTION = 1 << 0;
        const UINT16_ARGUMENTS = 1 << 1;
        const FULL_LITERAL_ENCODING = 1 << 2;
        const STRICT_MODE = 1 << 3;
        const ARGUMENTS_NEEDED = 1 << 4;
        const LEXICAL_ENV_NOT_NEEDED = 1 << 5;
        const ARROW_FUNCTION = 1 << 6;
        const CONSTRUCTOR = 1 << 7;
        const REST_PARAMETER = 1 << 8;
    }
}

/// The narrow (8-bit field) or wide (16-bit field) compiled-code header
/// (spec.md §3). Narrow is chosen whenever every field fits in a `u8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompiledCodeHeader {
    Narrow(HeaderFields<u8>),
    Wide(HeaderFields<u16>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderFields<T> {
    pub stack_limit: T,
    pub argument_end: T,
    pub register_end: T,
    pub ident_end: T,
    pub const_literal_end: T,
    pub literal_end: T,
    pub status_flags: CompiledCodeFlags,
}

impl CompiledCodeHeader {
    /// Picks narrow vs wide based on whether every field fits in a `u8`,
    /// matching spec.md §3's "two variants differ only in field width."
    #[must_use]
    pub fn new(
        stack_limit: u16,
        argument_end: u16,
        register_end: u16,
        ident_end: u16,
        const_literal_end: u16,
        literal_end: u16,
        status_flags: CompiledCodeFlags,
    ) -> Self {
        let all = [stack_limit, argument_end, register_end, ident_end, const_literal_end, literal_end];
        if all.iter().all(|&v| v <= u16::from(u8::MAX)) {
            CompiledCodeHeader::Narrow(HeaderFields {
                stack_limit: stack_limit as u8,
                argument_end: argument_end as u8,
                register_end: register_end as u8,
                ident_end: ident_end as u8,
                const_literal_end: const_literal_end as u8,
                literal_end: literal_end as u8,
                status_flags,
            })
        } else {
            CompiledCodeHeader::Wide(HeaderFields {
                stack_limit,
                argument_end,
                register_end,
                ident_end,
                const_literal_end,
                literal_end,
                status_flags,
            })
        }
    }

    #[must_use]
    pub fn literal_end(&self) -> u16 {
        match self {
            CompiledCodeHeader::Narrow(h) => u16::from(h.literal_end),
            CompiledCodeHeader::Wide(h) => h.literal_end,
        }
    }

    #[must_use]
    pub fn register_end(&self) -> u16 {
        match self {
            CompiledCodeHeader::Narrow(h) => u16::from(h.register_end),
            CompiledCodeHeader::Wide(h) => h.register_end,
        }
    }

    #[must_use]
    pub fn argument_end(&self) -> u16 {
        match self {
            CompiledCodeHeader::Narrow(h) => u16::from(h.argument_end),
            CompiledCodeHeader::Wide(h) => h.argument_end,
        }
    }

    #[must_use]
    pub fn ident_end(&self) -> u16 {
        match self {
            CompiledCodeHeader::Narrow(h) => u16::from(h.ident_end),
            CompiledCodeHeader::Wide(h) => h.ident_end,
        }
    }

    #[must_use]
    pub fn const_literal_end(&self) -> u16 {
        match self {
            CompiledCodeHeader::Narrow(h) => u16::from(h.const_literal_end),
            CompiledCodeHeader::Wide(h) => h.const_literal_end,
        }
    }

    #[must_use]
    pub fn status_flags(&self) -> CompiledCodeFlags {
        match self {
            CompiledCodeHeader::Narrow(h) => h.status_flags,
            CompiledCodeHeader::Wide(h) => h.status_flags,
        }
    }

    #[must_use]
    pub fn is_wide(&self) -> bool {
        matches!(self, CompiledCodeHeader::Wide(_))
    }
}

/// The final product of a compile: header, literal value table, compact
/// byte code, and (optionally) the argument-name table used to construct a
/// runtime `arguments` object in non-strict mode (spec.md §3, §6).
#[derive(Debug, Clone)]
pub struct CompiledCode {
    pub header: CompiledCodeHeader,
    /// Entries `[register_end, literal_end)` of the literal pool, in
    /// classified index order.
    pub literal_values: Vec<crate::literal::LiteralValue>,
    pub bytecode: Vec<u8>,
    /// Present only when `ARGUMENTS_NEEDED` is set and the function is
    /// non-strict; entry `i` is `None` for a positional argument shadowed by
    /// a later same-named argument (spec.md §9's `char_p == NULL` case).
    pub argument_names: Option<Vec<Option<Vec<u8>>>>,
    /// Bodies of functions declared/expressed within this one, looked up by
    /// the `Handle` carried in a `Function`-typed literal value.
    pub nested_functions: Vec<CompiledCode>,
    /// Raw regexp source text, looked up by the `Handle` carried in a
    /// `Regexp`-typed literal value.
    pub regexp_patterns: Vec<Vec<u8>>,
}

impl CompiledCode {
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytecode.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytecode.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn narrow_header_chosen_when_everything_fits_u8() {
        let h = CompiledCodeHeader::new(4, 2, 2, 2, 3, 3, CompiledCodeFlags::FUNCTION);
        assert!(!h.is_wide());
        assert_eq!(h.literal_end(), 3);
    }

    #[test]
    fn wide_header_chosen_past_u8_range() {
        let h = CompiledCodeHeader::new(4, 2, 2, 2, 3, 300, CompiledCodeFlags::FUNCTION);
        assert!(h.is_wide());
        assert_eq!(h.literal_end(), 300);
    }
}
