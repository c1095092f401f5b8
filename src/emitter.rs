//! The code emitter: appends opcodes and their operands to a
//! [`PagedStream`] using a maximal encoding, so the post-processor can only
//! shrink (spec.md §4.1).
//!
//! Grounded on the corpus's `CodeBuilder::emit*`/`emit_jump`/`patch_jump`
//! family (`bytecode/builder.rs`), generalized from "emit into a flat
//! `Vec<u8>` at final width" to "emit into a paged stream at *maximal*
//! width," since this engine's literal/branch operands are not known-final
//! until the classifier and post-processor have run.

use crate::opcode::Opcode;
use crate::page_stream::PagedStream;

/// A literal operand is always emitted as a 16-bit placeholder during
/// parsing (spec.md §4.4): the classifier's final index may not be known
/// yet, and the post-processor is what narrows it to its final width.
const LITERAL_PLACEHOLDER_WIDTH: usize = 2;

/// A forward-jump label: the byte offset of the opcode and of its operand,
/// so [`Emitter::patch_jump`] can compute the distance once the target is
/// known.
#[derive(Debug, Clone, Copy)]
pub struct JumpLabel {
    opcode_offset: usize,
    operand_offset: usize,
    width: u8,
}

/// The compiler's emitter: owns the paged stream for one function's parse.
#[derive(Debug, Default)]
pub struct Emitter {
    stream: PagedStream,
}

impl Emitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn stream(&self) -> &PagedStream {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut PagedStream {
        &mut self.stream
    }

    #[must_use]
    pub fn current_offset(&self) -> usize {
        self.stream.current_offset()
    }

    /// Emits a no-operand instruction.
    pub fn emit(&mut self, op: Opcode) {
        self.stream.append(op as u8);
    }

    /// Emits an instruction with a single byte operand.
    pub fn emit_byte_arg(&mut self, op: Opcode, operand: u8) {
        self.stream.append(op as u8);
        self.stream.append(operand);
    }

    /// Emits an instruction with a literal operand at maximal (16-bit)
    /// width; the post-processor narrows it later (spec.md §4.4).
    pub fn emit_literal_arg(&mut self, op: Opcode, literal_idx: u16) {
        self.stream.append(op as u8);
        self.stream.append_slice(&literal_idx.to_be_bytes());
    }

    /// Emits an instruction with two literal operands at maximal width.
    pub fn emit_two_literal_args(&mut self, op: Opcode, first: u16, second: u16) {
        self.stream.append(op as u8);
        self.stream.append_slice(&first.to_be_bytes());
        self.stream.append_slice(&second.to_be_bytes());
    }

    /// Emits a branch instruction with a maximal-width placeholder distance,
    /// returning a label to patch once the target is known
    /// (`set_branch_to_current_position` in spec.md §6 terms).
    pub fn emit_jump(&mut self, op: Opcode) -> JumpLabel {
        let width = op.branch_width().expect("emit_jump called with non-branch opcode");
        let opcode_offset = self.stream.current_offset();
        self.stream.append(op as u8);
        let operand_offset = self.stream.current_offset();
        self.stream.write_branch_placeholder(opcode_offset, width);
        JumpLabel {
            opcode_offset,
            operand_offset,
            width,
        }
    }

    /// Patches a forward jump to point at the current position. This is the
    /// `set_branch_to_current_position` helper of spec.md §6: the distance
    /// is relative to the byte just after the (maximal-width) operand.
    pub fn patch_jump(&mut self, label: JumpLabel) {
        let target = self.stream.current_offset();
        let from = label.operand_offset + usize::from(label.width);
        let distance = i32::try_from(target).unwrap() - i32::try_from(from).unwrap();
        self.stream.patch_branch(label.operand_offset, label.width, distance);
    }

    /// Emits a backward jump to an already-known target offset.
    pub fn emit_jump_to(&mut self, op: Opcode, target: usize) {
        let label = self.emit_jump(op);
        let from = label.operand_offset + usize::from(label.width);
        let distance = i32::try_from(target).unwrap() - i32::try_from(from).unwrap();
        self.stream.patch_branch(label.operand_offset, label.width, distance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn forward_jump_patches_to_current_position() {
        let mut e = Emitter::new();
        let label = e.emit_jump(Opcode::Jump3);
        e.emit(Opcode::Nop);
        e.emit(Opcode::Nop);
        e.patch_jump(label);
        e.emit(Opcode::ReturnValue);
        assert_eq!(e.current_offset(), 1 + 3 + 1 + 1 + 1);
    }

    #[test]
    fn literal_args_emit_maximal_width() {
        let mut e = Emitter::new();
        e.emit_literal_arg(Opcode::PushLiteral, 5);
        assert_eq!(e.current_offset(), 1 + LITERAL_PLACEHOLDER_WIDTH);
    }
}
