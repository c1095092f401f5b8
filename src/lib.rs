//! A single-pass bytecode compiler for a small embeddable ECMAScript
//! (ES5-era) engine.
//!
//! The pipeline (spec.md §3):
//!
//! 1. [`lexer`] scans UTF-8 source into [`token`]s, disambiguating `/` as
//!    division or the start of a regexp literal from parser-supplied context.
//! 2. [`parser`] recursive-descends over those tokens, building each
//!    function's [`literal`] pool and emitting variable-width bytecode into a
//!    paged [`page_stream`] via its [`emitter`].
//! 3. [`classify`] partitions a finished function's literal pool into
//!    argument/register/ident/constant ranges and picks a literal-index
//!    encoding width, matching spec.md §4.3's boundary layout.
//! 4. [`postprocess`] walks the paged stream once more, narrowing branch
//!    operands and literal-index operands to their classified widths and
//!    flattening pages into one contiguous buffer (spec.md §4.4).
//!
//! [`compiled_code`] is the final product type; [`opcode`] and [`context`]
//! are shared vocabulary the other modules build on. [`builtins`] is the
//! auxiliary lazy built-in property instantiator (spec.md §4.5) — a
//! standalone data structure an embedding runtime can use to materialize
//! `Math.PI`-style properties on demand, independent of the compiler
//! pipeline above since this crate stops at bytecode and does not include a
//! virtual machine or heap.
//!
//! Grounded on the corpus's crate root (`lib.rs`), which re-exports its
//! pipeline stages the same way: module declarations plus a handful of
//! top-level convenience functions, no prelude, no glob re-exports.

pub mod builtins;
pub mod classify;
pub mod compiled_code;
pub mod context;
pub mod emitter;
pub mod error;
pub mod lexer;
pub mod literal;
pub mod opcode;
pub mod page_stream;
pub mod parser;
pub mod postprocess;
pub mod token;

pub use compiled_code::{CompiledCode, CompiledCodeFlags, CompiledCodeHeader};
pub use error::{ErrorKind, ParseError, Result};

/// Compiles a complete top-level program, equivalent to the source handed to
/// a `<script>` tag (spec.md §8).
pub fn compile(source: &str) -> Result<CompiledCode> {
    parser::compile(source)
}

/// Compiles a single function body given its parameter names, equivalent to
/// the source handed to `new Function(...)` (spec.md §6).
pub fn compile_function(params: &[&str], body_source: &str) -> Result<CompiledCode> {
    parser::compile_function(params, body_source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn compiles_a_trivial_program_through_the_public_entry_point() {
        let code = compile("var x = 1;").unwrap();
        assert!(!code.is_empty());
    }

    #[test]
    fn reports_a_parse_error_through_the_public_error_type() {
        let err = compile("break;").unwrap_err();
        assert_eq!(err.kind, ErrorKind::IllegalBreakOrContinue);
    }

    #[test]
    fn compiles_a_standalone_function_body_with_named_parameters() {
        let code = compile_function(&["a", "b"], "return a + b;").unwrap();
        assert_eq!(code.header.argument_end(), 2);
        assert!(code.header.status_flags().contains(CompiledCodeFlags::FUNCTION));
    }
}
