//! A Bitcoin Script compiler: ASM and TxScript sources are lowered to a
//! linear IR, peephole-optimized, and emitted as ASM text or script bytes.

pub mod asm;
pub mod bytes;
mod error;
pub mod ir;
mod lower;
mod opcode;
pub mod optimizer;
mod symbols;
pub mod txscript;

pub use crate::error::{Error, Result};
pub use crate::ir::structural::SourceLoc;
pub use crate::ir::{Instruction, LInstructions, MAX_PUSH_SIZE};
pub use crate::lower::contextualize;
pub use crate::opcode::{opcodes, Opcode, OpcodeKind};
pub use crate::optimizer::{PeepholeOptimizer, MAX_PASSES};
pub use crate::symbols::{Definition, DefinitionKind, SymbolTable};

#[derive(Debug, Clone, Copy)]
pub struct CompileOptions {
    pub optimize: bool,
    /// Run the optimizer over the growing sequence after each inline, so
    /// later inlines see simplified operands.
    pub inline_optimize: bool,
    pub max_passes: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            optimize: true,
            inline_optimize: true,
            max_passes: MAX_PASSES,
        }
    }
}

impl CompileOptions {
    fn optimizer(&self) -> PeepholeOptimizer {
        PeepholeOptimizer {
            enabled: self.optimize,
            max_passes: self.max_passes,
        }
    }
}

/// Compile ASM source to optimized linear IR.
pub fn compile_asm(source: &str, options: &CompileOptions) -> Result<LInstructions> {
    let mut instructions = asm::parse(source)?;
    options.optimizer().optimize(&mut instructions);
    Ok(instructions)
}

/// Compile TxScript source to optimized linear IR.
pub fn compile_txscript(source: &str, options: &CompileOptions) -> Result<LInstructions> {
    let script = txscript::parse(source)?;
    let mut symbols = SymbolTable::new();
    let optimizer = options.optimizer();
    let mut instructions = contextualize(
        &script,
        &mut symbols,
        optimizer,
        options.optimize && options.inline_optimize,
    )?;
    optimizer.optimize(&mut instructions);
    Ok(instructions)
}
