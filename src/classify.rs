//! End-of-function literal classification, index assignment, and the
//! identifier-hoisting walk into an enclosing function's pool
//! (spec.md §4.2, §4.3).
//!
//! Grounded on the corpus's name-resolution pass (`prepare.rs`'s `Prepare`
//! struct, which tracks `enclosing_locals`/`free_var_map`/cell variables to
//! decide local-vs-global-vs-cell scope for every name). This module
//! generalizes that "walk enclosing scopes, decide storage class" idea from
//! Python's local/global/cell trichotomy to spec.md's seven contiguous
//! dense-index regions plus the transitive `NoRegStore` capture mark.

use smallvec::SmallVec;

use crate::error::{ErrorKind, ParseError, Result};
use crate::literal::{LiteralPool, LiteralType, StatusFlags};

/// Most functions bind a handful of locals; bucketing into inline storage
/// avoids a heap allocation per bucket for the common case.
type IdxBucket = SmallVec<[usize; 8]>;

/// Upper bound on how many non-argument locals may be assigned a register
/// before the classifier starts spilling to the lexical environment
/// (spec.md §4.2).
pub const MAX_REGISTERS: usize = 256;

/// One-byte / escape / full encoding boundaries for literal operands
/// (spec.md §4.2).
pub const SMALL_VALUE_MAX: u16 = 254;
pub const SMALL_MODE_MAX: u16 = SMALL_VALUE_MAX + 255;
pub const FULL_VALUE_MAX: u16 = 32767;

/// Which width scheme literal operands use in the final compact stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralEncoding {
    /// Every live index fits in one byte; no escape needed.
    OneByte,
    /// Indices `0..=254` use one byte; `255..SMALL_MODE_MAX` use an escape
    /// byte (255) plus one more byte.
    SmallEscape,
    /// Indices use two bytes, with the high bit of the first byte as a
    /// continuation flag, covering up to [`FULL_VALUE_MAX`].
    Full,
}

/// The seven contiguous dense ranges computed by classification
/// (spec.md §4.2), plus the derived encoding decision and whether the
/// enclosing function needs a lexical environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub argument_end: u16,
    pub register_end: u16,
    pub uninit_var_end: u16,
    pub init_var_end: u16,
    pub ident_end: u16,
    pub const_literal_end: u16,
    pub literal_end: u16,
    pub literal_one_byte_limit: u16,
    pub encoding: LiteralEncoding,
    pub lexical_env_needed: bool,
}

impl Classification {
    /// spec.md §8 dense-range invariant.
    #[must_use]
    pub fn ranges_are_monotonic(&self) -> bool {
        self.argument_end <= self.register_end
            && self.register_end <= self.uninit_var_end
            && self.uninit_var_end <= self.init_var_end
            && self.init_var_end <= self.ident_end
            && self.ident_end <= self.const_literal_end
            && self.const_literal_end <= self.literal_end
    }
}

/// Classifies and assigns dense indices to every live record in `pool`,
/// mutating each record's `index` in place. `max_registers` overrides
/// [`MAX_REGISTERS`] for callers (e.g. tests) that want a tighter budget.
pub fn classify(pool: &mut LiteralPool, max_registers: usize) -> Result<Classification> {
    // First pass: bucket every live record by category, in traversal
    // (source/insertion) order, and count arguments needing a mirrored
    // initialized-var slot (spec.md §4.2's `FunctionArgument` demotion rule).
    let mut argument_idxs = IdxBucket::new();
    let mut register_idxs = IdxBucket::new();
    let mut uninit_var_idxs = IdxBucket::new();
    let mut init_var_idxs = IdxBucket::new();
    let mut mirrored_argument_idxs = IdxBucket::new();
    let mut ident_idxs = IdxBucket::new();
    let mut const_idxs = IdxBucket::new();
    let mut literal_idxs = IdxBucket::new();

    let mut register_budget = max_registers;
    let mut lexical_env_needed = false;

    for i in 0..pool.len() {
        let record = pool.get(i);
        match record.kind {
            LiteralType::Unused => continue,
            LiteralType::Ident if record.is_var() => {
                if record.flags.contains(StatusFlags::UNUSED_IDENT) {
                    // Elided: captured by a descendant but unreferenced here.
                    continue;
                }
                if record.flags.contains(StatusFlags::FUNCTION_ARGUMENT) {
                    argument_idxs.push(i);
                    if record.flags.contains(StatusFlags::NO_REG_STORE) {
                        mirrored_argument_idxs.push(i);
                        lexical_env_needed = true;
                    }
                    continue;
                }
                let fits_register =
                    !record.flags.contains(StatusFlags::NO_REG_STORE) && register_budget > 0;
                if fits_register {
                    register_budget -= 1;
                    register_idxs.push(i);
                } else {
                    lexical_env_needed = true;
                    if record.flags.contains(StatusFlags::INITIALIZED) {
                        init_var_idxs.push(i);
                    } else {
                        uninit_var_idxs.push(i);
                    }
                }
            }
            LiteralType::Ident => ident_idxs.push(i),
            LiteralType::String | LiteralType::Number => const_idxs.push(i),
            LiteralType::Function | LiteralType::Regexp => literal_idxs.push(i),
        }
    }

    let argument_end = u16::try_from(argument_idxs.len()).map_err(|_| ParseError::new(ErrorKind::LiteralLimitReached, 0, 0))?;
    let mut next = argument_end;
    for (slot, &i) in argument_idxs.iter().enumerate() {
        pool.get_mut(i).set_index(u16::try_from(slot).unwrap());
    }

    let register_end = next + u16::try_from(register_idxs.len()).unwrap();
    for (slot, &i) in register_idxs.iter().enumerate() {
        pool.get_mut(i).set_index(next + u16::try_from(slot).unwrap());
    }
    next = register_end;

    let uninit_var_end = next + u16::try_from(uninit_var_idxs.len()).unwrap();
    for (slot, &i) in uninit_var_idxs.iter().enumerate() {
        pool.get_mut(i).set_index(next + u16::try_from(slot).unwrap());
    }
    next = uninit_var_end;

    // Real (non-argument) initialized vars, then mirrored argument copies,
    // share the initialized-var region (spec.md §4.2).
    let init_var_end = next
        + u16::try_from(init_var_idxs.len()).unwrap()
        + u16::try_from(mirrored_argument_idxs.len()).unwrap();
    for (slot, &i) in init_var_idxs.iter().enumerate() {
        pool.get_mut(i).set_index(next + u16::try_from(slot).unwrap());
    }
    // Mirrored arguments keep their primary (argument-region) index; the
    // mirror slot itself has no separate literal record; the emitter reads
    // `mirrored_argument_idxs`'s assigned *mirror* offset via the returned
    // count rather than a pool index, since it is a pure runtime copy
    // target rather than an additional name.
    next = init_var_end;

    let ident_end = next + u16::try_from(ident_idxs.len()).unwrap();
    for (slot, &i) in ident_idxs.iter().enumerate() {
        pool.get_mut(i).set_index(next + u16::try_from(slot).unwrap());
    }
    next = ident_end;

    let const_literal_end = next + u16::try_from(const_idxs.len()).unwrap();
    for (slot, &i) in const_idxs.iter().enumerate() {
        pool.get_mut(i).set_index(next + u16::try_from(slot).unwrap());
    }
    next = const_literal_end;

    let literal_end = next + u16::try_from(literal_idxs.len()).unwrap();
    for (slot, &i) in literal_idxs.iter().enumerate() {
        pool.get_mut(i).set_index(next + u16::try_from(slot).unwrap());
    }

    let (encoding, literal_one_byte_limit) = if literal_end <= SMALL_VALUE_MAX {
        (LiteralEncoding::OneByte, literal_end)
    } else if literal_end <= SMALL_MODE_MAX {
        (LiteralEncoding::SmallEscape, SMALL_VALUE_MAX)
    } else {
        if literal_end > FULL_VALUE_MAX {
            return Err(ParseError::new(ErrorKind::LiteralLimitReached, 0, 0));
        }
        (LiteralEncoding::Full, SMALL_VALUE_MAX)
    };

    let result = Classification {
        argument_end,
        register_end,
        uninit_var_end,
        init_var_end,
        ident_end,
        const_literal_end,
        literal_end,
        literal_one_byte_limit,
        encoding,
        lexical_env_needed,
    };
    debug_assert!(result.ranges_are_monotonic());
    log::debug!(
        "classified {} live literals: args={argument_end} registers={} idents={} consts={} literals={} lexical_env_needed={lexical_env_needed}",
        pool.len(),
        register_end - argument_end,
        ident_end - init_var_end,
        const_literal_end - ident_end,
        literal_end - const_literal_end,
    );
    Ok(result)
}

/// Hoists one free-variable reference discovered while finishing a nested
/// function into its immediate enclosing function's pool (spec.md §4.3).
///
/// If `parent` already binds `name` as a `Var`, that binding is marked
/// `NoRegStore` (forcing it into the lexical environment) and the walk is
/// short-circuited if it was already so marked (the mark is sticky).
/// Otherwise a new `UnusedIdent` `NoRegStore` binding is added so the
/// capture can keep propagating if `parent` is itself nested.
pub fn hoist_into_parent(parent: &mut LiteralPool, name: &[u8]) -> Result<()> {
    if let Some(idx) = parent.find_ident(name) {
        let record = parent.get_mut(idx);
        if record.flags.contains(StatusFlags::NO_REG_STORE) {
            return Ok(()); // already sticky; nothing more to propagate here.
        }
        record.flags |= StatusFlags::NO_REG_STORE;
        return Ok(());
    }
    let record = crate::literal::LiteralRecord::new_ident(
        name.to_vec(),
        StatusFlags::VAR | StatusFlags::NO_REG_STORE | StatusFlags::UNUSED_IDENT,
    );
    parent.push(record)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::literal::LiteralRecord;

    #[test]
    fn scenario_var_x_equals_one() {
        let mut pool = LiteralPool::new();
        pool.push(LiteralRecord::new_ident(
            b"x".to_vec(),
            StatusFlags::VAR | StatusFlags::INITIALIZED,
        ))
        .unwrap();
        pool.push(LiteralRecord::new_number(1.0)).unwrap();
        let c = classify(&mut pool, MAX_REGISTERS).unwrap();
        assert_eq!(c.register_end, c.argument_end + 1);
        assert_eq!(c.const_literal_end - c.ident_end, 1);
    }

    #[test]
    fn scenario_function_f_a_b_return_a_plus_b() {
        let mut pool = LiteralPool::new();
        pool.push(LiteralRecord::new_ident(
            b"a".to_vec(),
            StatusFlags::VAR | StatusFlags::INITIALIZED | StatusFlags::FUNCTION_ARGUMENT,
        ))
        .unwrap();
        pool.push(LiteralRecord::new_ident(
            b"b".to_vec(),
            StatusFlags::VAR | StatusFlags::INITIALIZED | StatusFlags::FUNCTION_ARGUMENT,
        ))
        .unwrap();
        let c = classify(&mut pool, MAX_REGISTERS).unwrap();
        assert_eq!(c.argument_end, 2);
        assert_eq!(c.register_end, 2);
        assert!(!c.lexical_env_needed);
    }

    #[test]
    fn hoist_correctness_marks_parent_no_reg_store() {
        let mut parent = LiteralPool::new();
        parent
            .push(LiteralRecord::new_ident(b"a".to_vec(), StatusFlags::VAR))
            .unwrap();
        hoist_into_parent(&mut parent, b"a").unwrap();
        let idx = parent.find_ident(b"a").unwrap();
        assert!(parent.get(idx).flags.contains(StatusFlags::NO_REG_STORE));
        let c = classify(&mut parent, MAX_REGISTERS).unwrap();
        assert!(c.lexical_env_needed);
    }

    #[test]
    fn hoist_adds_unused_ident_when_parent_lacks_binding() {
        let mut parent = LiteralPool::new();
        hoist_into_parent(&mut parent, b"g").unwrap();
        let idx = parent.find_ident(b"g").unwrap();
        let record = parent.get(idx);
        assert!(record.flags.contains(StatusFlags::UNUSED_IDENT));
        assert!(record.flags.contains(StatusFlags::NO_REG_STORE));
        // Elided from the final count since it is UnusedIdent.
        let c = classify(&mut parent, MAX_REGISTERS).unwrap();
        assert_eq!(c.register_end, c.argument_end);
    }

    #[test]
    fn encoding_escalates_with_literal_count() {
        let mut pool = LiteralPool::new();
        for i in 0..300 {
            pool.push(LiteralRecord::new_number(f64::from(i))).unwrap();
        }
        let c = classify(&mut pool, MAX_REGISTERS).unwrap();
        assert_eq!(c.encoding, LiteralEncoding::SmallEscape);
        assert_eq!(c.literal_one_byte_limit, SMALL_VALUE_MAX);
    }
}
