//! The parser context: owns the current function's emitter and literal
//! pool, the current token, and the stack of saved outer contexts that lets
//! nested function declarations suspend and resume the outer parse without
//! heap churn (spec.md §3). Loop control-flow scratch state (`break`/
//! `continue` targets) lives on the driver in [`crate::parser`] instead,
//! since unlike the emitter/pool it must support properly nested loops
//! within one function body.
//!
//! Grounded on the corpus's `Prepare` struct (`prepare.rs`), which threads a
//! similar bundle of per-scope state (`name_map`, `enclosing_locals`,
//! `global_name_map`) through nested function preparation. This module
//! generalizes that to own the emitter/pool pair directly and to make
//! "suspend the outer parse" an explicit push/pop of a `FunctionState`
//! rather than a recursive call that keeps the outer `Prepare` alive on the
//! Rust call stack — matching spec.md's explicit "saved context stack"
//! data model instead of implicit recursion.

use crate::classify::{self, Classification};
use crate::emitter::Emitter;
use crate::error::{ErrorKind, ParseError, Result};
use crate::literal::LiteralPool;
use crate::token::Token;

/// Per-function parsing state: the paged stream being built, its literal
/// pool, and the handful of counters/scratch stacks the driver needs while
/// compiling one function body (spec.md §3 "saved context stack" node).
#[derive(Debug, Default)]
pub struct FunctionState {
    pub emitter: Emitter,
    pub pool: LiteralPool,
    pub current_stack_depth: u32,
    pub max_stack_depth: u32,
    pub strict_mode: bool,
    pub is_function: bool,
    pub is_arrow: bool,
    pub uses_arguments_object: bool,
    /// Function bodies compiled while this function was current, indexed by
    /// the `Handle` stored in this function's own literal pool for each
    /// `Function`-typed record (spec.md §4.5's nested-function table).
    pub nested_functions: Vec<crate::compiled_code::CompiledCode>,
    /// Raw regexp source text, indexed the same way for `Regexp`-typed
    /// literal records.
    pub regexp_patterns: Vec<Vec<u8>>,
}

impl FunctionState {
    #[must_use]
    pub fn new(is_function: bool, strict_mode: bool) -> Self {
        Self {
            is_function,
            strict_mode,
            ..Self::default()
        }
    }
}

/// Owns everything a single top-level parse needs, including the chain of
/// suspended outer [`FunctionState`]s for nested function bodies
/// (spec.md §3 "Lifecycle").
pub struct ParserContext {
    current: FunctionState,
    saved: Vec<FunctionState>,
    pub current_token: Token,
    /// Upper bound on `current_stack_depth`, enforced by
    /// [`ParserContext::adjust_stack`] (spec.md §7's `StackLimitReached`).
    pub max_stack_limit: u32,
}

impl ParserContext {
    #[must_use]
    pub fn new(token: Token, is_function: bool, strict_mode: bool) -> Self {
        Self {
            current: FunctionState::new(is_function, strict_mode),
            saved: Vec::new(),
            current_token: token,
            max_stack_limit: 1024,
        }
    }

    #[must_use]
    pub fn current(&self) -> &FunctionState {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut FunctionState {
        &mut self.current
    }

    /// Depth of the saved-context chain; 0 at the top-level script.
    #[must_use]
    pub fn nesting_depth(&self) -> usize {
        self.saved.len()
    }

    /// Suspends the current function's state and starts a fresh one for a
    /// nested function declaration/expression.
    pub fn enter_function(&mut self, strict_mode: bool) {
        let fresh = FunctionState::new(true, strict_mode);
        let outer = std::mem::replace(&mut self.current, fresh);
        self.saved.push(outer);
    }

    /// Finishes the innermost function, restoring the enclosing
    /// [`FunctionState`]. Returns the finished function's state so the
    /// caller can classify it and hoist any unresolved free identifiers
    /// into the now-current (parent) pool before discarding the rest.
    ///
    /// # Panics
    /// Panics if called with no suspended outer context, which would be a
    /// driver bug (calling this at the top level).
    pub fn leave_function(&mut self) -> FunctionState {
        let parent = self.saved.pop().expect("leave_function called at top level");
        std::mem::replace(&mut self.current, parent)
    }

    /// Adjusts the tracked expression-stack depth, raising
    /// `StackLimitReached` if the limit is exceeded (spec.md §7).
    pub fn adjust_stack(&mut self, delta: i32) -> Result<()> {
        let new_depth = i64::from(self.current.current_stack_depth) + i64::from(delta);
        if new_depth < 0 || new_depth > i64::from(self.max_stack_limit) {
            return Err(self.fail(ErrorKind::StackLimitReached));
        }
        let new_depth = u32::try_from(new_depth).unwrap();
        self.current.current_stack_depth = new_depth;
        self.current.max_stack_depth = self.current.max_stack_depth.max(new_depth);
        Ok(())
    }

    /// Builds a [`ParseError`] at the current token's source position. This
    /// is the crate's non-local-exit primitive (spec.md §4.6): the caller
    /// propagates the returned `Err` with `?`, and every `FunctionState`
    /// still owned by `self.saved`/`self.current` is freed by ordinary
    /// `Drop` once `self` goes out of scope, which is the safe-Rust
    /// equivalent of walking the saved-context chain to free each level's
    /// stream and pool by hand.
    #[must_use]
    pub fn fail(&self, kind: ErrorKind) -> ParseError {
        ParseError::new(kind, self.current_token.line, self.current_token.column)
    }

    /// Classifies the finished function's pool in place and hoists any
    /// identifier that is a free reference (or an already-hoisted
    /// pass-through) into the parent's pool, per spec.md §4.3. Must be
    /// called on a [`FunctionState`] returned by [`Self::leave_function`],
    /// *before* the parent pool it hoists into is itself classified.
    pub fn classify_and_hoist(&mut self, mut finished: FunctionState, max_registers: usize) -> Result<(FunctionState, Classification)> {
        let names_to_hoist: Vec<Vec<u8>> = finished
            .pool
            .iter()
            .filter(|r| {
                (r.kind == crate::literal::LiteralType::Ident && !r.is_var())
                    || (r.kind == crate::literal::LiteralType::Ident
                        && r.is_var()
                        && r.flags.contains(crate::literal::StatusFlags::UNUSED_IDENT))
            })
            .filter_map(|r| r.ident_bytes().map(<[u8]>::to_vec))
            .collect();
        let classification = classify::classify(&mut finished.pool, max_registers)?;
        for name in &names_to_hoist {
            classify::hoist_into_parent(&mut self.current.pool, name)?;
        }
        Ok((finished, classification))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn dummy_token() -> Token {
        Token::eof(1, 1)
    }

    #[test]
    fn enter_and_leave_function_restores_outer_state() {
        let mut ctx = ParserContext::new(dummy_token(), false, false);
        ctx.current_mut().emitter.emit(crate::opcode::Opcode::Nop);
        ctx.enter_function(false);
        assert_eq!(ctx.current().emitter.current_offset(), 0);
        ctx.current_mut().emitter.emit(crate::opcode::Opcode::Pop);
        let finished = ctx.leave_function();
        assert_eq!(finished.emitter.current_offset(), 1);
        assert_eq!(ctx.current().emitter.current_offset(), 1);
    }

    #[test]
    fn stack_overflow_is_detected() {
        let mut ctx = ParserContext::new(dummy_token(), false, false);
        ctx.max_stack_limit = 2;
        ctx.adjust_stack(1).unwrap();
        ctx.adjust_stack(1).unwrap();
        let err = ctx.adjust_stack(1).unwrap_err();
        assert_eq!(err.kind, ErrorKind::StackLimitReached);
    }

    #[test]
    fn classify_and_hoist_marks_free_identifier_in_parent() {
        let mut ctx = ParserContext::new(dummy_token(), false, false);
        ctx.current_mut()
            .pool
            .push(crate::literal::LiteralRecord::new_ident(
                b"a".to_vec(),
                crate::literal::StatusFlags::VAR,
            ))
            .unwrap();
        ctx.enter_function(false);
        ctx.current_mut()
            .pool
            .push(crate::literal::LiteralRecord::new_ident(
                b"a".to_vec(),
                crate::literal::StatusFlags::empty(),
            ))
            .unwrap();
        let finished = ctx.leave_function();
        let (_, classification) = ctx.classify_and_hoist(finished, classify::MAX_REGISTERS).unwrap();
        assert!(classification.ranges_are_monotonic());
        let idx = ctx.current().pool.find_ident(b"a").unwrap();
        assert!(ctx.current().pool.get(idx).flags.contains(crate::literal::StatusFlags::NO_REG_STORE));
    }
}
