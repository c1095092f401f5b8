//! The post-processing compaction pass (spec.md §4.4): narrows every
//! operand from its parse-time maximal encoding down to its final width,
//! elides degenerate forward jumps, and recomputes every branch distance
//! against the now-compacted layout.
//!
//! Grounded on `parser_post_processing`/`parse_update_branches` in the
//! original engine's single-pass parser
//! (`examples/original_source/jerry-core/parser/js/new-parser/src/js-parser.c`),
//! which walks the paged stream once to narrow literals and mark degenerate
//! jumps, then a second time to copy bytes into the final buffer while
//! reusing each page's spare bytes as a running "bytes retained so far"
//! counter, then a third time to recompute branch distances from that
//! counter. This module keeps the same *shape* of algorithm — decide which
//! bytes survive, then recompute distances against the survivors — but
//! collapses it to one decision pass plus one arithmetic pass:
//!
//! - The source's per-page, per-byte counter exists only to fit inside the
//!   byte it overwrites (so recomputation needs no extra allocation). A
//!   `Vec<Page>` here has no such pressure, so the counter is a plain
//!   `Vec<u32>` prefix sum over "was this original byte retained," global
//!   rather than reset every page. Reusing stream bytes for it would need
//!   unsafe reinterpretation for no externally observable benefit — the
//!   final byte code is identical either way.
//! - The source measures a branch's distance from the *opcode byte*, which
//!   makes its degenerate-jump constant `branch_width + 1`. This crate's
//!   [`crate::emitter::Emitter`] measures distance from *after* the operand
//!   instead (`target - (operand_offset + width)`, spec.md §4.1), which
//!   makes the equivalent constant exactly `0` — "jumps to whatever comes
//!   right after it" is the same no-op either convention names with a
//!   different number.

use crate::classify::{Classification, LiteralEncoding, SMALL_VALUE_MAX};
use crate::emitter::Emitter;
use crate::literal::{LiteralPool, LiteralType};
use crate::opcode::{OpFlags, Opcode};
use crate::page_stream::PagedStream;

/// High bit of a two-byte "full" literal encoding's first byte, marking it
/// as a continuation rather than a one-byte index (spec.md §4.2). Distinct
/// from [`crate::page_stream::BRANCH_MARKER`] even though the bit pattern
/// coincides — the two never apply to the same byte.
const LITERAL_CONTINUATION_BIT: u8 = 0x80;

/// A non-degenerate branch instruction discovered by the forward pass,
/// carried forward to the recompute step once every byte's fate (retained
/// or dropped) is known.
struct BranchSite {
    /// Original offset of the branch operand's first byte.
    operand_offset: usize,
    width: usize,
    /// Original offset the operand resolves to once re-expanded relative
    /// to `operand_offset + width` (spec.md §4.1's distance convention).
    target_orig_offset: usize,
}

/// Resolves a raw (pre-classification) literal pool position through at
/// most one tombstone redirect, returning the live record's final
/// classified index (spec.md §4.3: "literal references to the old
/// (uninitialized) literal must be redirected to the new instance").
fn resolve_final_index(pool: &LiteralPool, raw_position: u16) -> u16 {
    let record = pool.get(raw_position as usize);
    if record.kind == LiteralType::Unused {
        let redirected = pool.get(record.index() as usize);
        debug_assert_ne!(redirected.kind, LiteralType::Unused, "tombstone chains are never more than one deep");
        redirected.index()
    } else {
        record.index()
    }
}

/// Encodes a classified literal index that does not fit in one byte, per
/// the width scheme [`Classification::encoding`] selected for this function
/// (spec.md §4.2).
fn encode_wide_literal(final_index: u16, classification: &Classification) -> (u8, u8) {
    match classification.encoding {
        LiteralEncoding::OneByte => {
            unreachable!("OneByte encoding never has an index past literal_one_byte_limit")
        }
        LiteralEncoding::SmallEscape => {
            let escape = u8::try_from(SMALL_VALUE_MAX + 1).unwrap();
            let remainder = final_index - (SMALL_VALUE_MAX + 1);
            (escape, u8::try_from(remainder).expect("SmallEscape remainder fits a byte"))
        }
        LiteralEncoding::Full => {
            let hi = u8::try_from(final_index >> 8).unwrap() | LITERAL_CONTINUATION_BIT;
            let lo = u8::try_from(final_index & 0xFF).unwrap();
            (hi, lo)
        }
    }
}

/// Reads a `width`-byte (1-3) big-endian two's-complement branch operand,
/// sign-extended to `i32`.
fn read_branch_distance(stream: &PagedStream, operand_offset: usize, width: usize) -> i32 {
    let mut bytes = [0u8; 4];
    let sign_byte = if stream.get(operand_offset) & 0x80 != 0 { 0xFF } else { 0x00 };
    bytes[..4 - width].fill(sign_byte);
    for i in 0..width {
        bytes[4 - width + i] = stream.get(operand_offset + i);
    }
    i32::from_be_bytes(bytes)
}

fn write_branch_distance(out: &mut [u8], start: usize, width: usize, value: i32) {
    let bytes = value.to_be_bytes();
    let from = bytes.len() - width;
    out[start..start + width].copy_from_slice(&bytes[from..]);
}

/// The forward decision pass (spec.md §4.4): narrows literal operands in
/// place, detects degenerate forward jumps, and records which original
/// bytes survive into the final stream.
fn decide(stream: &mut PagedStream, pool: &LiteralPool, classification: &Classification) -> (Vec<bool>, Vec<BranchSite>, Opcode) {
    let total_len = stream.len();
    log::trace!("post-processing walk over {total_len} raw bytes across {} page(s)", stream.page_count());
    let mut retained = vec![true; total_len];
    let mut branch_sites = Vec::new();
    let mut offset = 0usize;
    let mut last_opcode = Opcode::Nop;

    while offset < total_len {
        let instr_start = offset;
        let opcode = Opcode::from_byte(stream.get(offset)).expect("invalid opcode byte in stream");
        last_opcode = opcode;
        let flags = opcode.flags();
        offset += 1;

        let literal_arg_count =
            usize::from(flags.contains(OpFlags::HAS_LITERAL_ARG)) + usize::from(flags.contains(OpFlags::HAS_LITERAL_ARG2));
        for _ in 0..literal_arg_count {
            let hi = stream.get(offset);
            let lo = stream.get(offset + 1);
            let raw_position = (u16::from(hi) << 8) | u16::from(lo);
            let final_index = resolve_final_index(pool, raw_position);

            if final_index <= classification.literal_one_byte_limit {
                stream.set(offset, u8::try_from(final_index).unwrap());
                retained[offset + 1] = false;
            } else {
                let (hi_out, lo_out) = encode_wide_literal(final_index, classification);
                stream.set(offset, hi_out);
                stream.set(offset + 1, lo_out);
            }
            offset += 2;
        }

        if flags.contains(OpFlags::HAS_BYTE_ARG) {
            offset += 1;
        }

        if flags.contains(OpFlags::HAS_BRANCH_ARG) {
            let width = opcode.branch_width().expect("HAS_BRANCH_ARG opcode without a declared width") as usize;
            let operand_offset = offset;
            let distance = read_branch_distance(stream, operand_offset, width);
            let operand_end = operand_offset + width;

            // spec.md §4.4 degenerate-jump elision: an unconditional forward
            // jump whose distance is zero lands on the very next
            // instruction and can only be a parser artifact, never
            // meaningful control flow, so the whole instruction is dropped.
            let is_degenerate = opcode.is_widest_forward_jump() && distance == 0;
            if is_degenerate {
                stream.set(instr_start, Opcode::JumpForward1 as u8);
                for i in instr_start..operand_end {
                    retained[i] = false;
                }
            } else {
                let target_orig_offset = (operand_end as i64 + i64::from(distance)) as usize;
                branch_sites.push(BranchSite {
                    operand_offset,
                    width,
                    target_orig_offset,
                });
            }
            offset = operand_end;
        }
    }

    (retained, branch_sites, last_opcode)
}

/// Runs the full compaction pass over `emitter`'s stream and returns the
/// final compact byte code (spec.md §4.4). `pool` must already have been
/// classified (every live record indexed, spec.md §4.2) and `classification`
/// holds the literal encoding this function settled on.
#[must_use]
pub fn compact(emitter: &mut Emitter, pool: &LiteralPool, classification: &Classification) -> Vec<u8> {
    let stream = emitter.stream_mut();
    let total_len = stream.len();
    let (retained, branch_sites, last_opcode) = decide(stream, pool, classification);

    // Prefix sum: `copied_before[i]` is both the count of retained bytes in
    // `0..i` and, whenever byte `i` is itself retained, its final output
    // offset (spec.md §4.4's recompute-from-survivor-count step).
    let mut copied_before = vec![0u32; total_len + 1];
    for i in 0..total_len {
        copied_before[i + 1] = copied_before[i] + u32::from(retained[i]);
    }

    let mut out = Vec::with_capacity(copied_before[total_len] as usize + 1);
    for i in 0..total_len {
        if retained[i] {
            out.push(stream.get(i));
        }
    }

    for site in &branch_sites {
        let operand_final_start = copied_before[site.operand_offset] as usize;
        let operand_final_end = operand_final_start + site.width;
        let target_final = copied_before[site.target_orig_offset] as usize;
        let new_distance = i32::try_from(target_final).unwrap() - i32::try_from(operand_final_end).unwrap();
        write_branch_distance(&mut out, operand_final_start, site.width, new_distance);
    }

    if !matches!(last_opcode, Opcode::ReturnValue | Opcode::ReturnWithBlock) {
        out.push(Opcode::ReturnWithBlock as u8);
    }

    log::trace!("compacted {total_len} bytes down to {} across {} branch site(s)", out.len(), branch_sites.len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::classify::{self, MAX_REGISTERS};
    use crate::literal::{LiteralRecord, StatusFlags};

    #[test]
    fn appends_implicit_return_when_stream_lacks_one() {
        let mut pool = LiteralPool::new();
        let lit = pool.push(LiteralRecord::new_number(1.0)).unwrap();
        let classification = classify::classify(&mut pool, MAX_REGISTERS).unwrap();

        let mut emitter = Emitter::new();
        emitter.emit_literal_arg(Opcode::PushLiteral, u16::try_from(lit).unwrap());
        emitter.emit(Opcode::Pop);

        let out = compact(&mut emitter, &pool, &classification);
        assert_eq!(out.last(), Some(&(Opcode::ReturnWithBlock as u8)));
    }

    #[test]
    fn does_not_duplicate_an_existing_trailing_return() {
        let mut pool = LiteralPool::new();
        let classification = classify::classify(&mut pool, MAX_REGISTERS).unwrap();

        let mut emitter = Emitter::new();
        emitter.emit(Opcode::ReturnWithBlock);

        let out = compact(&mut emitter, &pool, &classification);
        assert_eq!(out, vec![Opcode::ReturnWithBlock as u8]);
    }

    #[test]
    fn narrows_literal_operand_to_one_byte() {
        let mut pool = LiteralPool::new();
        let lit = pool.push(LiteralRecord::new_number(1.0)).unwrap();
        let classification = classify::classify(&mut pool, MAX_REGISTERS).unwrap();

        let mut emitter = Emitter::new();
        emitter.emit_literal_arg(Opcode::PushLiteral, u16::try_from(lit).unwrap());
        emitter.emit(Opcode::ReturnValue);

        let out = compact(&mut emitter, &pool, &classification);
        // PushLiteral + one narrowed index byte + ReturnValue.
        assert_eq!(out, vec![Opcode::PushLiteral as u8, pool.get(lit).index() as u8, Opcode::ReturnValue as u8]);
    }

    #[test]
    fn elides_degenerate_forward_jump_to_the_next_instruction() {
        let mut pool = LiteralPool::new();
        let classification = classify::classify(&mut pool, MAX_REGISTERS).unwrap();

        let mut emitter = Emitter::new();
        let label = emitter.emit_jump(Opcode::Jump3);
        emitter.patch_jump(label); // distance 0: jumps straight past itself
        emitter.emit(Opcode::ReturnValue);

        let out = compact(&mut emitter, &pool, &classification);
        assert_eq!(out, vec![Opcode::ReturnValue as u8]);
    }

    #[test]
    fn recomputes_forward_branch_distance_after_a_literal_shrinks() {
        let mut pool = LiteralPool::new();
        let lit = pool.push(LiteralRecord::new_number(1.0)).unwrap();
        let classification = classify::classify(&mut pool, MAX_REGISTERS).unwrap();

        let mut emitter = Emitter::new();
        let label = emitter.emit_jump(Opcode::JumpIfFalse3);
        emitter.emit_literal_arg(Opcode::PushLiteral, u16::try_from(lit).unwrap());
        emitter.patch_jump(label);
        emitter.emit(Opcode::ReturnValue);

        let out = compact(&mut emitter, &pool, &classification);
        // JumpIfFalse3(1) + 3-byte operand + PushLiteral(1) + 1-byte index + ReturnValue(1) = 7 bytes.
        assert_eq!(out.len(), 7);
        let distance = i32::from(out[1]) << 16 | i32::from(out[2]) << 8 | i32::from(out[3]);
        // From just after the 3-byte operand (offset 4) to the ReturnValue at the end (offset 6).
        assert_eq!(distance, 2);
    }

    #[test]
    fn recomputes_backward_branch_distance() {
        let mut pool = LiteralPool::new();
        let classification = classify::classify(&mut pool, MAX_REGISTERS).unwrap();

        let mut emitter = Emitter::new();
        let loop_start = emitter.current_offset();
        emitter.emit(Opcode::Nop);
        emitter.emit_jump_to(Opcode::Jump1, loop_start);
        emitter.emit(Opcode::ReturnValue);

        let out = compact(&mut emitter, &pool, &classification);
        assert_eq!(out, vec![Opcode::Nop as u8, Opcode::Jump1 as u8, 0xFDu8, Opcode::ReturnValue as u8]);
    }

    #[test]
    fn resolves_a_literal_operand_through_one_tombstone_redirect() {
        // A stale byte-code reference to a literal that was later merged
        // into another record (spec.md §4.3) must follow the redirect to
        // the surviving record's final classified index.
        let mut pool = LiteralPool::new();
        let old = pool
            .push(LiteralRecord::new_ident(b"x".to_vec(), StatusFlags::VAR))
            .unwrap();
        let new = pool
            .push(LiteralRecord::new_ident(b"x".to_vec(), StatusFlags::VAR | StatusFlags::INITIALIZED))
            .unwrap();
        pool.get_mut(old).make_tombstone(u16::try_from(new).unwrap());
        let classification = classify::classify(&mut pool, MAX_REGISTERS).unwrap();
        let _ = classification;

        let resolved = resolve_final_index(&pool, u16::try_from(old).unwrap());
        assert_eq!(resolved, pool.get(new).index());
    }
}
