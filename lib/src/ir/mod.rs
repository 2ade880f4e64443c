pub mod convert;
pub mod structural;

use crate::error::{Error, Result};
use crate::opcode::Opcode;
use core::fmt;
use core::ops::Deref;

/// Standard Bitcoin Script limit on a single data push.
pub const MAX_PUSH_SIZE: usize = 520;

/// One element of the linear IR.
///
/// Instructions are plain values; cloning one is a deep copy, so slices
/// handed to rule callbacks can never alias the live sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// A literal data push, at most `MAX_PUSH_SIZE` bytes.
    Push(Vec<u8>),
    /// A one-byte integer push; the value is in {-1, 0, 1..16}.
    SmallInt(i64),
    /// Any non-push opcode.
    Op(Opcode),
    /// A nested script, emitted as a single push of its serialized bytes.
    Script(LInstructions),
}

impl Instruction {
    /// A checked literal push.
    pub fn push(data: Vec<u8>) -> Result<Self> {
        if data.len() > MAX_PUSH_SIZE {
            return Err(Error::PushTooLarge(data.len()));
        }
        Ok(Self::Push(data))
    }

    /// The canonical push of an integer: a small-int opcode when the value
    /// has one, otherwise a minimal script number push.
    pub fn int(n: i64) -> Self {
        if Opcode::small_int(n).is_some() {
            Self::SmallInt(n)
        } else {
            Self::Push(convert::encode_int(n))
        }
    }

}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push(data) => write!(f, "Push(0x{})", hex::encode(data)),
            Self::SmallInt(n) => match Opcode::small_int(*n) {
                Some(op) => write!(f, "{op}"),
                None => write!(f, "SmallInt({n})"),
            },
            Self::Op(op) => write!(f, "{op}"),
            Self::Script(body) => write!(f, "Script({body})"),
        }
    }
}

/// A template position: None is a wildcard, otherwise the slot must match
/// the script instruction under the rules of `matches_template`.
pub type TemplateSlot = Option<Instruction>;

/// The linear IR: an ordered, mutable sequence of instructions.
///
/// The Display form doubles as the fixpoint key of the peephole driver: two
/// sequences are the same iff their serializations are equal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LInstructions(Vec<Instruction>);

impl LInstructions {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, instr: Instruction) {
        self.0.push(instr);
    }

    pub fn pop(&mut self) -> Option<Instruction> {
        self.0.pop()
    }

    pub fn insert(&mut self, index: usize, instr: Instruction) {
        self.0.insert(index, instr);
    }

    pub fn remove(&mut self, index: usize) -> Instruction {
        self.0.remove(index)
    }

    /// Deep copy of the instructions in [start, end).
    pub fn copy_slice(&self, start: usize, end: usize) -> Vec<Instruction> {
        self.0[start..end].to_vec()
    }

    /// Replace the instructions in [start, end) with `values`, in place.
    pub fn replace_slice(&mut self, start: usize, end: usize, values: Vec<Instruction>) {
        self.0.splice(start..end, values);
    }

    /// Whether a window matching `template` starts at `index`.
    ///
    /// A None slot matches any instruction. In strict mode every other slot
    /// must be value-equal to the script instruction. Non-strict mode also
    /// matches any two small-int pushes and any two literal pushes, which is
    /// what lets shortcut rules fire for arbitrary push operands.
    pub fn matches_template(
        &self,
        template: &[TemplateSlot],
        index: usize,
        strict: bool,
    ) -> bool {
        for (j, slot) in template.iter().enumerate() {
            let Some(want) = slot else { continue };
            let got = &self.0[index + j];

            let equal = want == got
                || (!strict
                    && matches!(
                        (want, got),
                        (Instruction::SmallInt(_), Instruction::SmallInt(_))
                            | (Instruction::Push(_), Instruction::Push(_))
                    ));
            if !equal {
                return false;
            }
        }

        true
    }

    /// Scan left to right; wherever `template` matches, hand a deep copy of
    /// the window to `callback` and splice its return value in. Scanning
    /// resumes past the replacement, so a rule never rewrites its own output
    /// within one scan; cascades happen across driver passes.
    pub fn replace_template<F>(&mut self, template: &[TemplateSlot], strict: bool, mut callback: F)
    where
        F: FnMut(Vec<Instruction>) -> Vec<Instruction>,
    {
        let mut idx = 0;
        while idx < self.len() {
            if idx + template.len() <= self.len() && self.matches_template(template, idx, strict) {
                let end = idx + template.len();
                let replacement = callback(self.copy_slice(idx, end));
                let advance = replacement.len();
                self.replace_slice(idx, end, replacement);
                idx += advance;
            } else {
                idx += 1;
            }
        }
    }

    /// Indices of every strict occurrence of `instr`.
    pub fn find_occurrences(&self, instr: &Instruction) -> Vec<usize> {
        let template = [Some(instr.clone())];
        (0..self.len())
            .filter(|&i| self.matches_template(&template, i, true))
            .collect()
    }
}

impl Deref for LInstructions {
    type Target = [Instruction];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<Instruction>> for LInstructions {
    fn from(instructions: Vec<Instruction>) -> Self {
        Self(instructions)
    }
}

impl FromIterator<Instruction> for LInstructions {
    fn from_iter<T: IntoIterator<Item = Instruction>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for LInstructions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        let mut first = true;
        for instr in &self.0 {
            if first {
                first = false;
            } else {
                write!(f, ", ")?;
            }
            write!(f, "{instr}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::opcodes::*;

    fn ops(instructions: &[Instruction]) -> LInstructions {
        instructions.to_vec().into()
    }

    #[test]
    fn test_display() {
        let lir = ops(&[
            Instruction::Op(OP_RETURN),
            Instruction::SmallInt(1),
            Instruction::SmallInt(-1),
            Instruction::Push(vec![0xde, 0xad, 0xbe, 0xef]),
        ]);
        assert_eq!(
            lir.to_string(),
            "[OP_RETURN, OP_1, OP_1NEGATE, Push(0xdeadbeef)]"
        );

        let nested = ops(&[Instruction::Script(ops(&[Instruction::Op(OP_DUP)]))]);
        assert_eq!(nested.to_string(), "[Script([OP_DUP])]");
    }

    #[test]
    fn test_strict_matching_is_exact() {
        let lir = ops(&[
            Instruction::SmallInt(1),
            Instruction::Op(OP_ROLL),
            Instruction::Push(vec![0x02]),
        ]);

        assert!(lir.matches_template(
            &[Some(Instruction::SmallInt(1)), Some(Instruction::Op(OP_ROLL))],
            0,
            true,
        ));
        assert!(!lir.matches_template(
            &[Some(Instruction::SmallInt(2)), Some(Instruction::Op(OP_ROLL))],
            0,
            true,
        ));
        assert!(!lir.matches_template(&[Some(Instruction::Push(vec![0x03]))], 2, true));

        // wildcards match anything, in either mode
        assert!(lir.matches_template(&[None, Some(Instruction::Op(OP_ROLL)), None], 0, true));
    }

    #[test]
    fn test_non_strict_matches_by_push_kind() {
        let lir = ops(&[
            Instruction::SmallInt(5),
            Instruction::Push(vec![0xab]),
            Instruction::Op(OP_ADD),
        ]);

        // any small int matches a small-int slot, any push a push slot
        assert!(lir.matches_template(&[Some(Instruction::SmallInt(1))], 0, false));
        assert!(lir.matches_template(&[Some(Instruction::Push(Vec::new()))], 1, false));

        // kinds do not cross over
        assert!(!lir.matches_template(&[Some(Instruction::Push(Vec::new()))], 0, false));
        assert!(!lir.matches_template(&[Some(Instruction::SmallInt(1))], 1, false));

        // opcodes still match exactly
        assert!(lir.matches_template(&[Some(Instruction::Op(OP_ADD))], 2, false));
        assert!(!lir.matches_template(&[Some(Instruction::Op(OP_SUB))], 2, false));
    }

    #[test]
    fn test_replace_template_resumes_past_replacement() {
        // two overlapping candidate windows; only the first rewrite fires
        // in a single scan
        let mut lir = ops(&[
            Instruction::Op(OP_DROP),
            Instruction::Op(OP_DROP),
            Instruction::Op(OP_DROP),
        ]);
        lir.replace_template(
            &[Some(Instruction::Op(OP_DROP)), Some(Instruction::Op(OP_DROP))],
            true,
            |_| vec![Instruction::Op(OP_2DROP)],
        );
        assert_eq!(lir.to_string(), "[OP_2DROP, OP_DROP]");
    }

    #[test]
    fn test_replace_template_empty_replacement() {
        let mut lir = ops(&[
            Instruction::SmallInt(0),
            Instruction::Op(OP_ROLL),
            Instruction::SmallInt(0),
            Instruction::Op(OP_ROLL),
        ]);
        lir.replace_template(
            &[Some(Instruction::SmallInt(0)), Some(Instruction::Op(OP_ROLL))],
            true,
            |_| vec![],
        );
        assert_eq!(lir.to_string(), "[]");
    }

    #[test]
    fn test_callback_gets_deep_copy() {
        let mut lir = ops(&[Instruction::Push(vec![0x01]), Instruction::Op(OP_DROP)]);
        lir.replace_template(&[Some(Instruction::Push(vec![0x01]))], true, |mut window| {
            // mutating the copy must not corrupt the sequence being scanned
            if let Instruction::Push(data) = &mut window[0] {
                data.clear();
            }
            vec![Instruction::Push(vec![0x01])]
        });
        assert_eq!(lir.to_string(), "[Push(0x01), OP_DROP]");
    }

    #[test]
    fn test_find_occurrences() {
        let lir = ops(&[
            Instruction::Op(OP_RETURN),
            Instruction::SmallInt(1),
            Instruction::Op(OP_RETURN),
        ]);
        assert_eq!(lir.find_occurrences(&Instruction::Op(OP_RETURN)), vec![0, 2]);
        assert_eq!(lir.find_occurrences(&Instruction::Op(OP_DROP)), Vec::<usize>::new());
    }

    #[test]
    fn test_push_size_limit() {
        assert!(Instruction::push(vec![0; MAX_PUSH_SIZE]).is_ok());
        assert_eq!(
            Instruction::push(vec![0; MAX_PUSH_SIZE + 1]),
            Err(Error::PushTooLarge(MAX_PUSH_SIZE + 1))
        );
    }

    #[test]
    fn test_int_classification() {
        assert_eq!(Instruction::int(0), Instruction::SmallInt(0));
        assert_eq!(Instruction::int(-1), Instruction::SmallInt(-1));
        assert_eq!(Instruction::int(16), Instruction::SmallInt(16));
        assert_eq!(Instruction::int(17), Instruction::Push(vec![0x11]));
        assert_eq!(Instruction::int(-2), Instruction::Push(vec![0x82]));
    }
}
