//! The ASM front end and text emitter.
//!
//! Input is whitespace-separated tokens: opcode names (the `OP_` prefix is
//! optional), decimal integers, and `0x`-prefixed hex literals. Hex literals
//! are raw script bytes; a run of consecutive hex tokens is decoded as one
//! fragment, so `0x01 0x02` is the one-byte push of `0x02`.

use crate::bytes;
use crate::error::{Error, Result};
use crate::ir::structural::SourceLoc;
use crate::ir::{Instruction, LInstructions};
use crate::opcode::Opcode;
use core::num::IntErrorKind;

fn tokenize(source: &str) -> Vec<(&str, SourceLoc)> {
    let mut tokens = Vec::new();
    for (line_no, line) in source.lines().enumerate() {
        let bytes = line.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i].is_ascii_whitespace() {
                i += 1;
                continue;
            }
            let start = i;
            while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            tokens.push((
                &line[start..i],
                SourceLoc::new(line_no as u32 + 1, start as u32 + 1),
            ));
        }
    }
    tokens
}

fn hex_digits(token: &str) -> Option<&str> {
    token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
}

pub fn parse(source: &str) -> Result<LInstructions> {
    let tokens = tokenize(source);
    let mut instructions = LInstructions::new();

    let mut i = 0;
    while i < tokens.len() {
        let (token, loc) = tokens[i];

        if hex_digits(token).is_some() {
            let mut raw = Vec::new();
            while let Some(&(token, token_loc)) = tokens.get(i) {
                let Some(digits) = hex_digits(token) else {
                    break;
                };
                let decoded = hex::decode(digits)
                    .map_err(|err| Error::parse(format!("bad hex literal: {err}"), token_loc))?;
                raw.extend(decoded);
                i += 1;
            }
            let fragment = bytes::parse(&raw)
                .map_err(|err| Error::parse(format!("bad hex script fragment: {err}"), loc))?;
            for instr in fragment.iter() {
                instructions.push(instr.clone());
            }
            continue;
        }

        match token.parse::<i64>() {
            Ok(n) => {
                if !(-0x7fffffff..=0x7fffffff).contains(&n) {
                    return Err(Error::parse(format!("integer {n} out of range"), loc));
                }
                instructions.push(Instruction::int(n));
            }
            Err(err)
                if matches!(
                    err.kind(),
                    IntErrorKind::PosOverflow | IntErrorKind::NegOverflow
                ) =>
            {
                return Err(Error::parse(format!("integer `{token}` out of range"), loc));
            }
            Err(_) => {
                let Some(op) = Opcode::from_name(token) else {
                    return Err(Error::UnknownOpcode(token.to_string()));
                };
                if op.pushdata_length().is_some() {
                    return Err(Error::parse(
                        "explicit OP_PUSHDATA is not allowed in asm",
                        loc,
                    ));
                }
                match op.small_int_value() {
                    Some(n) => instructions.push(Instruction::SmallInt(n)),
                    None => instructions.push(Instruction::Op(op)),
                }
            }
        }
        i += 1;
    }

    Ok(instructions)
}

/// Emit ASM text: a literal push becomes a length token and a data token,
/// both `0x`-prefixed lowercase hex; opcodes and small ints emit their name
/// with the `OP_` prefix stripped; inner scripts emit their body inline.
pub fn emit(instructions: &LInstructions) -> String {
    let mut tokens = Vec::new();
    collect_tokens(instructions, &mut tokens);
    tokens.join(" ")
}

fn collect_tokens(instructions: &LInstructions, tokens: &mut Vec<String>) {
    for instr in instructions.iter() {
        match instr {
            Instruction::Push(data) => {
                if data.is_empty() {
                    tokens.push("0x00".into());
                } else {
                    tokens.push(format_hex_len(data.len()));
                    tokens.push(format!("0x{}", hex::encode(data)));
                }
            }
            Instruction::SmallInt(n) => tokens.push(
                Opcode::small_int(*n)
                    .and_then(Opcode::name)
                    .map(|name| name[3..].to_string())
                    .unwrap_or_else(|| n.to_string()),
            ),
            Instruction::Op(op) => tokens.push(match op.name() {
                Some(name) => name[3..].to_string(),
                None => format!("0x{:02x}", op.code),
            }),
            Instruction::Script(body) => collect_tokens(body, tokens),
        }
    }
}

fn format_hex_len(len: usize) -> String {
    if len <= 0xff {
        format!("0x{len:02x}")
    } else {
        format!("0x{len:04x}")
    }
}
