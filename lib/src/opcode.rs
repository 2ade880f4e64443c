use core::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Opcode {
    pub code: u8,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "OP_UNKNOWN(0x{:02x})", self.code),
        }
    }
}

macro_rules! opcodes {
    ($($k:ident: $v:literal),* $(,)?) => {
        /// A constant for every opcode in the registry.
        pub mod opcodes {
            use super::Opcode;

            $(
                pub const $k: Opcode = Opcode { code: $v };
            )*
        }

        impl Opcode {
            /// Every registered opcode, in table order.
            pub const ALL: &'static [Opcode] = &[$(Opcode { code: $v },)*];

            pub fn name(self) -> Option<&'static str> {
                match self.code {
                    $(
                        $v => Some(stringify!($k)),
                    )*
                    _ => None,
                }
            }

            fn from_name_exact_unprefixed(name_bytes: &[u8]) -> Option<Self> {
                $(
                    if name_bytes == &stringify!($k).as_bytes()[3..] {
                        return Some(Opcode { code: $v });
                    }
                )*
                None
            }
        }
    };
}

// Opcode names mapped to their byte, in Bitcoin Core's script.h order.
// Aliases (OP_FALSE, OP_TRUE, OP_NOP2/3, OP_CLTV, OP_CSV) are handled in
// `from_name` so that `ALL` and `from_code` stay one-to-one.
opcodes! {
    // push value
    OP_0: 0x00,
    OP_PUSHDATA1: 0x4c,
    OP_PUSHDATA2: 0x4d,
    OP_PUSHDATA4: 0x4e,
    OP_1NEGATE: 0x4f,
    OP_RESERVED: 0x50,
    OP_1: 0x51,
    OP_2: 0x52,
    OP_3: 0x53,
    OP_4: 0x54,
    OP_5: 0x55,
    OP_6: 0x56,
    OP_7: 0x57,
    OP_8: 0x58,
    OP_9: 0x59,
    OP_10: 0x5a,
    OP_11: 0x5b,
    OP_12: 0x5c,
    OP_13: 0x5d,
    OP_14: 0x5e,
    OP_15: 0x5f,
    OP_16: 0x60,

    // control
    OP_NOP: 0x61,
    OP_VER: 0x62,
    OP_IF: 0x63,
    OP_NOTIF: 0x64,
    OP_VERIF: 0x65,
    OP_VERNOTIF: 0x66,
    OP_ELSE: 0x67,
    OP_ENDIF: 0x68,
    OP_VERIFY: 0x69,
    OP_RETURN: 0x6a,

    // stack ops
    OP_TOALTSTACK: 0x6b,
    OP_FROMALTSTACK: 0x6c,
    OP_2DROP: 0x6d,
    OP_2DUP: 0x6e,
    OP_3DUP: 0x6f,
    OP_2OVER: 0x70,
    OP_2ROT: 0x71,
    OP_2SWAP: 0x72,
    OP_IFDUP: 0x73,
    OP_DEPTH: 0x74,
    OP_DROP: 0x75,
    OP_DUP: 0x76,
    OP_NIP: 0x77,
    OP_OVER: 0x78,
    OP_PICK: 0x79,
    OP_ROLL: 0x7a,
    OP_ROT: 0x7b,
    OP_SWAP: 0x7c,
    OP_TUCK: 0x7d,

    // splice ops
    OP_CAT: 0x7e,
    OP_SUBSTR: 0x7f,
    OP_LEFT: 0x80,
    OP_RIGHT: 0x81,
    OP_SIZE: 0x82,

    // bit logic
    OP_INVERT: 0x83,
    OP_AND: 0x84,
    OP_OR: 0x85,
    OP_XOR: 0x86,
    OP_EQUAL: 0x87,
    OP_EQUALVERIFY: 0x88,
    OP_RESERVED1: 0x89,
    OP_RESERVED2: 0x8a,

    // numeric
    OP_1ADD: 0x8b,
    OP_1SUB: 0x8c,
    OP_2MUL: 0x8d,
    OP_2DIV: 0x8e,
    OP_NEGATE: 0x8f,
    OP_ABS: 0x90,
    OP_NOT: 0x91,
    OP_0NOTEQUAL: 0x92,

    OP_ADD: 0x93,
    OP_SUB: 0x94,
    OP_MUL: 0x95,
    OP_DIV: 0x96,
    OP_MOD: 0x97,
    OP_LSHIFT: 0x98,
    OP_RSHIFT: 0x99,

    OP_BOOLAND: 0x9a,
    OP_BOOLOR: 0x9b,
    OP_NUMEQUAL: 0x9c,
    OP_NUMEQUALVERIFY: 0x9d,
    OP_NUMNOTEQUAL: 0x9e,
    OP_LESSTHAN: 0x9f,
    OP_GREATERTHAN: 0xa0,
    OP_LESSTHANOREQUAL: 0xa1,
    OP_GREATERTHANOREQUAL: 0xa2,
    OP_MIN: 0xa3,
    OP_MAX: 0xa4,

    OP_WITHIN: 0xa5,

    // crypto
    OP_RIPEMD160: 0xa6,
    OP_SHA1: 0xa7,
    OP_SHA256: 0xa8,
    OP_HASH160: 0xa9,
    OP_HASH256: 0xaa,
    OP_CODESEPARATOR: 0xab,
    OP_CHECKSIG: 0xac,
    OP_CHECKSIGVERIFY: 0xad,
    OP_CHECKMULTISIG: 0xae,
    OP_CHECKMULTISIGVERIFY: 0xaf,

    // expansion
    OP_NOP1: 0xb0,
    OP_CHECKLOCKTIMEVERIFY: 0xb1,
    OP_CHECKSEQUENCEVERIFY: 0xb2,
    OP_NOP4: 0xb3,
    OP_NOP5: 0xb4,
    OP_NOP6: 0xb5,
    OP_NOP7: 0xb6,
    OP_NOP8: 0xb7,
    OP_NOP9: 0xb8,
    OP_NOP10: 0xb9,

    // Opcode added by BIP 342 (Tapscript)
    OP_CHECKSIGADD: 0xba,

    OP_INVALIDOPCODE: 0xff,
}

/// Arity class of an opcode, used by the template matcher and the lowering
/// pass to classify instructions without name inspection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpcodeKind {
    Nullary,
    SmallIntPush,
    PushLiteral,
    VerifyPaired,
    PairsWithVerify,
    ControlFlow,
}

impl Opcode {
    /// Case-insensitive lookup; the `OP_` prefix is optional and the
    /// `FALSE`/`TRUE`/`NOP2`/`NOP3`/`CLTV`/`CSV` aliases are accepted.
    pub fn from_name(name: &str) -> Option<Self> {
        let mut buf = name.as_bytes().to_vec();
        buf.make_ascii_uppercase();
        let bare = buf.strip_prefix(b"OP_").unwrap_or(&buf);

        match bare {
            b"FALSE" => return Some(opcodes::OP_0),
            b"TRUE" => return Some(opcodes::OP_1),
            b"CLTV" | b"NOP2" => return Some(opcodes::OP_CHECKLOCKTIMEVERIFY),
            b"CSV" | b"NOP3" => return Some(opcodes::OP_CHECKSEQUENCEVERIFY),
            _ => {}
        }

        Self::from_name_exact_unprefixed(bare)
    }

    pub fn from_code(code: u8) -> Option<Self> {
        let op = Opcode { code };
        op.name().map(|_| op)
    }

    /// The one-byte push opcode for n in {-1, 0, 1..16}.
    pub fn small_int(n: i64) -> Option<Self> {
        Some(match n {
            -1 => opcodes::OP_1NEGATE,
            0 => opcodes::OP_0,
            1..=16 => Opcode {
                code: 0x50 + n as u8,
            },
            _ => return None,
        })
    }

    /// The integer pushed by a small-int opcode.
    pub fn small_int_value(self) -> Option<i64> {
        Some(match self.code {
            0x00 => 0,
            0x4f => -1,
            0x51..=0x60 => (self.code - 0x50) as i64,
            _ => return None,
        })
    }

    /// Length of the size field following OP_PUSHDATA(1|2|4).
    pub fn pushdata_length(self) -> Option<usize> {
        Some(match self {
            opcodes::OP_PUSHDATA1 => 1,
            opcodes::OP_PUSHDATA2 => 2,
            opcodes::OP_PUSHDATA4 => 4,
            _ => return None,
        })
    }

    /// The base opcode of a fused verify form, e.g. OP_EQUALVERIFY -> OP_EQUAL.
    pub fn verify_base(self) -> Option<Self> {
        Some(match self {
            opcodes::OP_EQUALVERIFY => opcodes::OP_EQUAL,
            opcodes::OP_NUMEQUALVERIFY => opcodes::OP_NUMEQUAL,
            opcodes::OP_CHECKSIGVERIFY => opcodes::OP_CHECKSIG,
            opcodes::OP_CHECKMULTISIGVERIFY => opcodes::OP_CHECKMULTISIG,
            _ => return None,
        })
    }

    /// The fused verify form of an opcode, e.g. OP_EQUAL -> OP_EQUALVERIFY.
    pub fn verify_variant(self) -> Option<Self> {
        Some(match self {
            opcodes::OP_EQUAL => opcodes::OP_EQUALVERIFY,
            opcodes::OP_NUMEQUAL => opcodes::OP_NUMEQUALVERIFY,
            opcodes::OP_CHECKSIG => opcodes::OP_CHECKSIGVERIFY,
            opcodes::OP_CHECKMULTISIG => opcodes::OP_CHECKMULTISIGVERIFY,
            _ => return None,
        })
    }

    pub fn kind(self) -> OpcodeKind {
        if self.small_int_value().is_some() {
            OpcodeKind::SmallIntPush
        } else if self.code <= 0x4e {
            OpcodeKind::PushLiteral
        } else if self.verify_base().is_some() {
            OpcodeKind::VerifyPaired
        } else if self.verify_variant().is_some() {
            OpcodeKind::PairsWithVerify
        } else if matches!(
            self,
            opcodes::OP_NOP
                | opcodes::OP_VER
                | opcodes::OP_IF
                | opcodes::OP_NOTIF
                | opcodes::OP_VERIF
                | opcodes::OP_VERNOTIF
                | opcodes::OP_ELSE
                | opcodes::OP_ENDIF
                | opcodes::OP_VERIFY
                | opcodes::OP_RETURN
        ) {
            OpcodeKind::ControlFlow
        } else {
            OpcodeKind::Nullary
        }
    }
}
