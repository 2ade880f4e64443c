//! Template-driven peephole rewrites over the linear IR.

use crate::ir::{Instruction, LInstructions, TemplateSlot};
use crate::opcode::{opcodes, Opcode};
use tracing::debug;

pub const MAX_PASSES: usize = 5;

/// A rewrite rule: immutable data registered in `RULES`; the driver iterates
/// the registry in registration order and never hard-codes an order itself.
pub struct PeepholeRule {
    pub name: &'static str,
    /// Terminal rules are only sound on a finished script (they reason about
    /// the script's end or its overall failure), so the inliner skips them
    /// when optimizing a sequence that is still growing.
    pub terminal: bool,
    pub apply: fn(&mut LInstructions),
}

pub static RULES: &[PeepholeRule] = &[
    PeepholeRule {
        name: "merge_op_and_verify",
        terminal: false,
        apply: merge_op_and_verify,
    },
    PeepholeRule {
        name: "fold_repeated_drops",
        terminal: false,
        apply: fold_repeated_drops,
    },
    PeepholeRule {
        name: "simplify_stack_ops",
        terminal: false,
        apply: simplify_stack_ops,
    },
    PeepholeRule {
        name: "shortcut_ops",
        terminal: false,
        apply: shortcut_ops,
    },
    PeepholeRule {
        name: "remove_null_ops",
        terminal: false,
        apply: remove_null_ops,
    },
    PeepholeRule {
        name: "elide_dup_before_checksig",
        terminal: true,
        apply: elide_dup_before_checksig,
    },
    PeepholeRule {
        name: "fuse_hashes",
        terminal: false,
        apply: fuse_hashes,
    },
    PeepholeRule {
        name: "strip_trailing_verify",
        terminal: true,
        apply: strip_trailing_verify,
    },
    PeepholeRule {
        name: "promote_return",
        terminal: true,
        apply: promote_return,
    },
];

fn op(opcode: Opcode) -> TemplateSlot {
    Some(Instruction::Op(opcode))
}

fn int(n: i64) -> TemplateSlot {
    Some(Instruction::SmallInt(n))
}

/// A literal-push slot; under non-strict matching the data is ignored.
fn push() -> TemplateSlot {
    Some(Instruction::Push(Vec::new()))
}

/// Merge opcodes with their fused verify form,
/// e.g. OP_EQUAL OP_VERIFY -> OP_EQUALVERIFY.
fn merge_op_and_verify(instructions: &mut LInstructions) {
    for &fused in Opcode::ALL {
        let Some(base) = fused.verify_base() else {
            continue;
        };
        instructions.replace_template(&[op(base), op(opcodes::OP_VERIFY)], true, |_| {
            vec![Instruction::Op(fused)]
        });
    }
}

/// OP_DROP OP_DROP -> OP_2DROP
fn fold_repeated_drops(instructions: &mut LInstructions) {
    instructions.replace_template(&[op(opcodes::OP_DROP), op(opcodes::OP_DROP)], true, |_| {
        vec![Instruction::Op(opcodes::OP_2DROP)]
    });
}

/// Rewrite roll/pick sequences to their dedicated stack opcodes.
fn simplify_stack_ops(instructions: &mut LInstructions) {
    // Longest templates first; the two-element forms would otherwise
    // pre-empt the cancellations.
    instructions.replace_template(
        &[int(1), op(opcodes::OP_ROLL), int(1), op(opcodes::OP_ROLL)],
        true,
        |_| vec![],
    );
    instructions.replace_template(
        &[int(1), op(opcodes::OP_ROLL), op(opcodes::OP_DROP)],
        true,
        |_| vec![Instruction::Op(opcodes::OP_NIP)],
    );
    instructions.replace_template(&[int(1), op(opcodes::OP_PICK)], true, |_| {
        vec![Instruction::Op(opcodes::OP_OVER)]
    });
    instructions.replace_template(&[int(0), op(opcodes::OP_PICK)], true, |_| {
        vec![Instruction::Op(opcodes::OP_DUP)]
    });
    instructions.replace_template(&[int(0), op(opcodes::OP_ROLL)], true, |_| vec![]);
    instructions.replace_template(&[int(1), op(opcodes::OP_ROLL)], true, |_| {
        vec![Instruction::Op(opcodes::OP_SWAP)]
    });
}

/// Replace operations on the constants 1 and 2 with their shortcut opcodes.
///
/// These templates run non-strict so that any push matches the operand slot;
/// each callback inspects the copied window and leaves it unchanged unless
/// the concrete small int is the one the rewrite is about.
fn shortcut_ops(instructions: &mut LInstructions) {
    instructions.replace_template(&[int(2), op(opcodes::OP_DIV)], false, |window| {
        if window[0] == Instruction::SmallInt(2) {
            vec![Instruction::Op(opcodes::OP_2DIV)]
        } else {
            window
        }
    });
    instructions.replace_template(&[int(1), op(opcodes::OP_SUB)], false, |window| {
        if window[0] == Instruction::SmallInt(1) {
            vec![Instruction::Op(opcodes::OP_1SUB)]
        } else {
            window
        }
    });
    instructions.replace_template(&[int(1), op(opcodes::OP_NEGATE)], false, |window| {
        if window[0] == Instruction::SmallInt(1) {
            vec![Instruction::Op(opcodes::OP_1NEGATE)]
        } else {
            window
        }
    });

    // push-any + OP_1 + OP_ADD -> push-any OP_1ADD, for both operand orders
    // and both push kinds; the surviving push is re-emitted unchanged.
    instructions.replace_template(&[push(), int(1), op(opcodes::OP_ADD)], false, |mut window| {
        if window[1] == Instruction::SmallInt(1) {
            vec![window.swap_remove(0), Instruction::Op(opcodes::OP_1ADD)]
        } else {
            window
        }
    });
    instructions.replace_template(&[int(1), push(), op(opcodes::OP_ADD)], false, |mut window| {
        if window[0] == Instruction::SmallInt(1) {
            vec![window.swap_remove(1), Instruction::Op(opcodes::OP_1ADD)]
        } else {
            window
        }
    });
    instructions.replace_template(&[int(1), int(1), op(opcodes::OP_ADD)], false, |mut window| {
        if window[1] == Instruction::SmallInt(1) {
            vec![window.swap_remove(0), Instruction::Op(opcodes::OP_1ADD)]
        } else if window[0] == Instruction::SmallInt(1) {
            vec![window.swap_remove(1), Instruction::Op(opcodes::OP_1ADD)]
        } else {
            window
        }
    });

    // likewise for push-any + OP_2 + OP_MUL -> push-any OP_2MUL
    instructions.replace_template(&[push(), int(2), op(opcodes::OP_MUL)], false, |mut window| {
        if window[1] == Instruction::SmallInt(2) {
            vec![window.swap_remove(0), Instruction::Op(opcodes::OP_2MUL)]
        } else {
            window
        }
    });
    instructions.replace_template(&[int(2), push(), op(opcodes::OP_MUL)], false, |mut window| {
        if window[0] == Instruction::SmallInt(2) {
            vec![window.swap_remove(1), Instruction::Op(opcodes::OP_2MUL)]
        } else {
            window
        }
    });
    instructions.replace_template(&[int(2), int(2), op(opcodes::OP_MUL)], false, |mut window| {
        if window[1] == Instruction::SmallInt(2) {
            vec![window.swap_remove(0), Instruction::Op(opcodes::OP_2MUL)]
        } else if window[0] == Instruction::SmallInt(2) {
            vec![window.swap_remove(1), Instruction::Op(opcodes::OP_2MUL)]
        } else {
            window
        }
    });
}

/// Remove arithmetic that cannot change the operand.
fn remove_null_ops(instructions: &mut LInstructions) {
    instructions.replace_template(&[int(0), op(opcodes::OP_SUB)], true, |_| vec![]);

    instructions.replace_template(&[None, int(0), op(opcodes::OP_ADD)], true, |mut window| {
        window.truncate(1);
        window
    });
    instructions.replace_template(&[int(0), None, op(opcodes::OP_ADD)], true, |mut window| {
        vec![window.swap_remove(1)]
    });
}

/// OP_DUP <x> OP_CHECKSIG -> <x> OP_CHECKSIG; the copy kept for later use is
/// unneeded when the script ends at the signature check.
fn elide_dup_before_checksig(instructions: &mut LInstructions) {
    instructions.replace_template(
        &[op(opcodes::OP_DUP), None, op(opcodes::OP_CHECKSIG)],
        true,
        |mut window| {
            window.remove(0);
            window
        },
    );
}

/// OP_SHA256 OP_SHA256 -> OP_HASH256; OP_SHA256 OP_RIPEMD160 -> OP_HASH160
fn fuse_hashes(instructions: &mut LInstructions) {
    instructions.replace_template(&[op(opcodes::OP_SHA256), op(opcodes::OP_SHA256)], true, |_| {
        vec![Instruction::Op(opcodes::OP_HASH256)]
    });
    instructions.replace_template(
        &[op(opcodes::OP_SHA256), op(opcodes::OP_RIPEMD160)],
        true,
        |_| vec![Instruction::Op(opcodes::OP_HASH160)],
    );
}

/// A trailing OP_VERIFY is redundant: a truthy final value is already
/// required for the script to pass.
fn strip_trailing_verify(instructions: &mut LInstructions) {
    while instructions.last() == Some(&Instruction::Op(opcodes::OP_VERIFY)) {
        instructions.pop();
    }
}

/// Move OP_RETURN to the head of the script: a script that reaches
/// OP_RETURN anywhere always fails, so fail first.
fn promote_return(instructions: &mut LInstructions) {
    let ret = Instruction::Op(opcodes::OP_RETURN);
    let occurrences = instructions.find_occurrences(&ret);
    if occurrences.is_empty() || occurrences == [0] {
        return;
    }

    for &i in occurrences.iter().rev() {
        instructions.remove(i);
    }
    instructions.insert(0, ret);
}

/// Runs the rule registry to a fixpoint, keyed on the serialized form.
#[derive(Debug, Clone, Copy)]
pub struct PeepholeOptimizer {
    pub enabled: bool,
    pub max_passes: usize,
}

impl Default for PeepholeOptimizer {
    fn default() -> Self {
        Self {
            enabled: true,
            max_passes: MAX_PASSES,
        }
    }
}

impl PeepholeOptimizer {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }

    /// Optimize a complete script with the full rule set.
    pub fn optimize(&self, instructions: &mut LInstructions) {
        self.run(instructions, false);
    }

    /// Optimize a sequence that is still being built; terminal rules are
    /// skipped because the script's end is not final yet.
    pub fn optimize_partial(&self, instructions: &mut LInstructions) {
        self.run(instructions, true);
    }

    fn run(&self, instructions: &mut LInstructions, partial: bool) {
        if !self.enabled {
            return;
        }

        for pass in 0..=self.max_passes {
            let before = instructions.to_string();
            for rule in RULES {
                if partial && rule.terminal {
                    continue;
                }
                (rule.apply)(instructions);
            }
            let changed = instructions.to_string() != before;
            debug!(pass, changed, partial, "peephole pass");
            if !changed {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm;

    fn optimized(source: &str) -> String {
        let mut lir = asm::parse(source).unwrap();
        PeepholeOptimizer::default().optimize(&mut lir);
        lir.to_string()
    }

    #[test]
    fn test_hash_fusion() {
        assert_eq!(optimized("OP_SHA256 OP_SHA256"), "[OP_HASH256]");
        assert_eq!(optimized("OP_SHA256 OP_RIPEMD160"), "[OP_HASH160]");
    }

    #[test]
    fn test_roll_cancellation_before_nip() {
        assert_eq!(
            optimized("OP_1 OP_ROLL OP_1 OP_ROLL OP_DROP"),
            "[OP_DROP]"
        );
    }

    #[test]
    fn test_add_one_shortcut_and_trailing_verify() {
        assert_eq!(
            optimized("0x01 0x02 OP_1 OP_ADD OP_VERIFY"),
            "[Push(0x02), OP_1ADD]"
        );
    }

    #[test]
    fn test_verify_fusion() {
        assert_eq!(optimized("OP_EQUAL OP_VERIFY"), "[OP_EQUALVERIFY]");
        assert_eq!(optimized("OP_NUMEQUAL OP_VERIFY"), "[OP_NUMEQUALVERIFY]");
        assert_eq!(optimized("OP_CHECKSIG OP_VERIFY"), "[OP_CHECKSIGVERIFY]");
    }

    #[test]
    fn test_dup_checksig_elision() {
        assert_eq!(
            optimized("OP_DUP 0x04deadbeef OP_CHECKSIG"),
            "[Push(0xdeadbeef), OP_CHECKSIG]"
        );
    }

    #[test]
    fn test_return_promotion() {
        assert_eq!(optimized("OP_1 OP_RETURN OP_2"), "[OP_RETURN, OP_1, OP_2]");
        // already canonical
        assert_eq!(optimized("OP_RETURN OP_1"), "[OP_RETURN, OP_1]");
        // several occurrences collapse to one at the head
        assert_eq!(
            optimized("OP_RETURN OP_1 OP_RETURN"),
            "[OP_RETURN, OP_1]"
        );
    }

    #[test]
    fn test_repeated_drops() {
        assert_eq!(optimized("OP_DROP OP_DROP"), "[OP_2DROP]");
        assert_eq!(
            optimized("OP_DROP OP_DROP OP_DROP OP_DROP"),
            "[OP_2DROP, OP_2DROP]"
        );
    }

    #[test]
    fn test_stack_op_rewrites() {
        assert_eq!(optimized("OP_1 OP_PICK"), "[OP_OVER]");
        assert_eq!(optimized("OP_1 OP_ROLL OP_DROP"), "[OP_NIP]");
        assert_eq!(optimized("OP_0 OP_PICK"), "[OP_DUP]");
        assert_eq!(optimized("OP_0 OP_ROLL"), "[]");
        assert_eq!(optimized("OP_1 OP_ROLL"), "[OP_SWAP]");
    }

    #[test]
    fn test_shortcut_ops() {
        assert_eq!(optimized("OP_2 OP_DIV"), "[OP_2DIV]");
        assert_eq!(optimized("OP_1 OP_SUB"), "[OP_1SUB]");
        assert_eq!(optimized("OP_1 OP_NEGATE"), "[OP_1NEGATE]");
        assert_eq!(optimized("OP_1 OP_5 OP_ADD"), "[OP_5, OP_1ADD]");
        assert_eq!(
            optimized("0x04deadbeef OP_2 OP_MUL"),
            "[Push(0xdeadbeef), OP_2MUL]"
        );
        assert_eq!(optimized("OP_2 OP_7 OP_MUL"), "[OP_7, OP_2MUL]");
    }

    #[test]
    fn test_shortcut_guard_leaves_other_constants_alone() {
        // non-strict matching admits these windows; the callbacks must not
        // rewrite them
        assert_eq!(optimized("OP_5 OP_DIV"), "[OP_5, OP_DIV]");
        assert_eq!(optimized("OP_3 OP_SUB"), "[OP_3, OP_SUB]");
        assert_eq!(optimized("OP_4 OP_NEGATE"), "[OP_4, OP_NEGATE]");
        assert_eq!(optimized("OP_3 OP_4 OP_ADD"), "[OP_3, OP_4, OP_ADD]");
        assert_eq!(optimized("OP_3 OP_4 OP_MUL"), "[OP_3, OP_4, OP_MUL]");
    }

    #[test]
    fn test_null_op_removal() {
        assert_eq!(optimized("OP_0 OP_SUB"), "[]");
        assert_eq!(optimized("OP_9 OP_0 OP_ADD"), "[OP_9]");
        assert_eq!(optimized("OP_0 OP_9 OP_ADD"), "[OP_9]");
        assert_eq!(optimized("0x01 0xab OP_0 OP_ADD"), "[Push(0xab)]");
    }

    #[test]
    fn test_trailing_verify_stripping() {
        assert_eq!(optimized("OP_ADD OP_VERIFY"), "[OP_ADD]");
        assert_eq!(optimized("OP_ADD OP_VERIFY OP_VERIFY"), "[OP_ADD]");
    }

    #[test]
    fn test_fixpoint_idempotence() {
        let sources = [
            "OP_SHA256 OP_SHA256",
            "OP_1 OP_ROLL OP_1 OP_ROLL OP_DROP",
            "0x01 0x02 OP_1 OP_ADD OP_VERIFY",
            "OP_EQUAL OP_VERIFY",
            "OP_DUP 0x04deadbeef OP_CHECKSIG",
            "OP_1 OP_RETURN OP_2",
            "OP_DROP OP_DROP OP_DROP",
            "OP_DUP OP_DUP OP_2 OP_MUL OP_0 OP_ADD OP_EQUAL OP_VERIFY",
            "OP_1 OP_1 OP_ADD OP_1 OP_ADD OP_1 OP_ADD",
        ];

        let optimizer = PeepholeOptimizer::default();
        for source in sources {
            let mut once = asm::parse(source).unwrap();
            optimizer.optimize(&mut once);
            let mut twice = once.clone();
            optimizer.optimize(&mut twice);
            assert_eq!(once, twice, "source = {source}");
        }
    }

    #[test]
    fn test_disabled_optimizer_is_inert() {
        let mut lir = asm::parse("OP_SHA256 OP_SHA256").unwrap();
        PeepholeOptimizer::new(false).optimize(&mut lir);
        assert_eq!(lir.to_string(), "[OP_SHA256, OP_SHA256]");
    }

    #[test]
    fn test_partial_mode_keeps_terminal_rewrites_off() {
        let optimizer = PeepholeOptimizer::default();

        let mut lir = asm::parse("OP_EQUAL OP_VERIFY OP_VERIFY").unwrap();
        optimizer.optimize_partial(&mut lir);
        // fusion still fires, the trailing verify survives
        assert_eq!(lir.to_string(), "[OP_EQUALVERIFY, OP_VERIFY]");

        let mut lir = asm::parse("OP_1 OP_RETURN OP_2").unwrap();
        optimizer.optimize_partial(&mut lir);
        assert_eq!(lir.to_string(), "[OP_1, OP_RETURN, OP_2]");
    }
}
