//! Serialization between the linear IR and Bitcoin Script bytes.

use crate::error::{Error, Result};
use crate::ir::structural::SourceLoc;
use crate::ir::{Instruction, LInstructions, MAX_PUSH_SIZE};
use crate::opcode::{opcodes, Opcode};

pub fn serialize(instructions: &LInstructions) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for instr in instructions.iter() {
        serialize_instruction(instr, &mut out)?;
    }
    Ok(out)
}

fn serialize_instruction(instr: &Instruction, out: &mut Vec<u8>) -> Result<()> {
    match instr {
        Instruction::SmallInt(n) => {
            let op = Opcode::small_int(*n)
                .ok_or_else(|| Error::Invariant(format!("small int {n} out of range")))?;
            out.push(op.code);
        }
        Instruction::Op(op) => out.push(op.code),
        Instruction::Push(data) => push_data(data, out)?,
        Instruction::Script(body) => {
            // an inner script is a single push of its serialized bytes
            let inner = serialize(body)?;
            push_data(&inner, out)?;
        }
    }
    Ok(())
}

/// Minimal push encoding: the empty push is OP_0, 1..75 bytes use
/// OP_PUSHBYTES_n, larger pushes OP_PUSHDATA1/2.
fn push_data(data: &[u8], out: &mut Vec<u8>) -> Result<()> {
    match data.len() {
        0 => out.push(opcodes::OP_0.code),
        len @ 1..=75 => {
            out.push(len as u8);
            out.extend_from_slice(data);
        }
        len @ 76..=255 => {
            out.push(opcodes::OP_PUSHDATA1.code);
            out.push(len as u8);
            out.extend_from_slice(data);
        }
        len @ 256..=MAX_PUSH_SIZE => {
            out.push(opcodes::OP_PUSHDATA2.code);
            out.extend_from_slice(&(len as u16).to_le_bytes());
            out.extend_from_slice(data);
        }
        len => return Err(Error::PushTooLarge(len)),
    }
    Ok(())
}

pub fn parse(bytes: &[u8]) -> Result<LInstructions> {
    let mut instructions = LInstructions::new();

    let mut offset = 0;
    while offset < bytes.len() {
        let b = bytes[offset];
        offset += 1;

        let op = Opcode { code: b };
        if let Some(n) = op.small_int_value() {
            instructions.push(Instruction::SmallInt(n));
        } else if (1..=75).contains(&b) {
            let data = take(bytes, &mut offset, b as usize)?;
            instructions.push(Instruction::Push(data.to_vec()));
        } else if let Some(n) = op.pushdata_length() {
            let size = take(bytes, &mut offset, n)?;
            let mut buf = [0u8; 4];
            buf[..size.len()].copy_from_slice(size);
            let len = u32::from_le_bytes(buf) as usize;
            let data = take(bytes, &mut offset, len)?;
            instructions.push(Instruction::push(data.to_vec())?);
        } else if op.name().is_some() {
            instructions.push(Instruction::Op(op));
        } else {
            return Err(Error::UnknownOpcode(format!("0x{b:02x}")));
        }
    }

    Ok(instructions)
}

fn take<'a>(bytes: &'a [u8], offset: &mut usize, n: usize) -> Result<&'a [u8]> {
    let Some(data) = bytes.get(*offset..*offset + n) else {
        return Err(Error::parse(
            format!(
                "unexpected end of script: {n} bytes expected, {} remain",
                bytes.len() - *offset
            ),
            SourceLoc::new(1, *offset as u32),
        ));
    };
    *offset += n;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::opcodes::*;

    fn lir(instructions: &[Instruction]) -> LInstructions {
        instructions.to_vec().into()
    }

    #[test]
    fn test_serialize_p2pkh_shape() {
        let script = lir(&[
            Instruction::Op(OP_DUP),
            Instruction::Op(OP_HASH160),
            Instruction::Push(vec![0xa9, 0x14, 0xf0]),
            Instruction::Op(OP_EQUALVERIFY),
            Instruction::Op(OP_CHECKSIG),
        ]);
        assert_eq!(hex::encode(serialize(&script).unwrap()), "76a903a914f088ac");
    }

    #[test]
    fn test_serialize_small_ints() {
        let script = lir(&[
            Instruction::SmallInt(0),
            Instruction::SmallInt(-1),
            Instruction::SmallInt(1),
            Instruction::SmallInt(16),
        ]);
        assert_eq!(serialize(&script).unwrap(), vec![0x00, 0x4f, 0x51, 0x60]);
    }

    #[test]
    fn test_pushdata_encodings() {
        let script = lir(&[Instruction::Push(vec![0xaa; 100])]);
        let bytes = serialize(&script).unwrap();
        assert_eq!(&bytes[..2], &[0x4c, 100]);
        assert_eq!(parse(&bytes).unwrap(), script);

        let script = lir(&[Instruction::Push(vec![0xbb; 300])]);
        let bytes = serialize(&script).unwrap();
        assert_eq!(&bytes[..3], &[0x4d, 0x2c, 0x01]);
        assert_eq!(parse(&bytes).unwrap(), script);
    }

    #[test]
    fn test_oversized_push_rejected() {
        let script = lir(&[Instruction::Script(lir(&[Instruction::Push(vec![
            0;
            MAX_PUSH_SIZE
        ])]))]);
        // the wrapped inner script no longer fits in one push
        assert!(matches!(
            serialize(&script).unwrap_err(),
            Error::PushTooLarge(_)
        ));
    }

    #[test]
    fn test_round_trip_exact() {
        let scripts = [
            lir(&[
                Instruction::SmallInt(1),
                Instruction::Push(vec![0x05]),
                Instruction::Op(OP_ADD),
                Instruction::Op(OP_VERIFY),
            ]),
            lir(&[Instruction::Op(OP_RETURN), Instruction::Push(vec![0xaa; 76])]),
            lir(&[Instruction::SmallInt(-1), Instruction::Op(OP_NEGATE)]),
        ];
        for script in scripts {
            let bytes = serialize(&script).unwrap();
            assert_eq!(parse(&bytes).unwrap(), script);
        }
    }

    #[test]
    fn test_inner_script_parses_back_as_push() {
        let script = lir(&[Instruction::Script(lir(&[
            Instruction::SmallInt(1),
            Instruction::Op(OP_CHECKSIG),
        ]))]);
        let bytes = serialize(&script).unwrap();
        assert_eq!(bytes, vec![0x02, 0x51, 0xac]);
        assert_eq!(
            parse(&bytes).unwrap(),
            lir(&[Instruction::Push(vec![0x51, 0xac])])
        );
    }

    #[test]
    fn test_unknown_byte() {
        assert_eq!(
            parse(&[0xbb]).unwrap_err(),
            Error::UnknownOpcode("0xbb".into())
        );
    }

    #[test]
    fn test_truncated_push() {
        assert!(matches!(parse(&[0x05, 0x01]).unwrap_err(), Error::Parse { .. }));
        assert!(matches!(parse(&[0x4c]).unwrap_err(), Error::Parse { .. }));
    }
}
