//! Lowering of the structural IR into the linear IR.
//!
//! Every expression nets exactly one stack value. Calls to parameterized
//! definitions are inlined at the call site: arguments are evaluated left to
//! right, then the body runs against a shadow model of the stack in which
//! each parameter occupies the slot its argument left. Parameter references
//! become `<depth> OP_PICK` (copying uses) or `<depth> OP_ROLL` (the final,
//! consuming use); the peephole rules fold these into the dedicated stack
//! opcodes afterwards.

use crate::error::{Error, Result};
use crate::ir::structural::{Expr, ExprKind, Literal, Script, SourceLoc, Stmt, StmtKind};
use crate::ir::{Instruction, LInstructions};
use crate::opcode::{opcodes, Opcode};
use crate::optimizer::PeepholeOptimizer;
use crate::symbols::{Definition, DefinitionKind, SymbolTable};
use tracing::{debug, trace};

/// Builtin functions mapped to their opcode and arity.
fn builtin(name: &str) -> Option<(Opcode, usize)> {
    Some(match name {
        "min" => (opcodes::OP_MIN, 2),
        "max" => (opcodes::OP_MAX, 2),
        "abs" => (opcodes::OP_ABS, 1),
        "size" => (opcodes::OP_SIZE, 1),
        "within" => (opcodes::OP_WITHIN, 3),
        "ripemd160" => (opcodes::OP_RIPEMD160, 1),
        "sha1" => (opcodes::OP_SHA1, 1),
        "sha256" => (opcodes::OP_SHA256, 1),
        "hash160" => (opcodes::OP_HASH160, 1),
        "hash256" => (opcodes::OP_HASH256, 1),
        "checksig" => (opcodes::OP_CHECKSIG, 2),
        _ => return None,
    })
}

/// One logical stack entry of the shadow model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Temp,
    Param { frame: usize, index: usize },
}

struct ParamState {
    index: usize,
    uses_left: usize,
}

struct Frame {
    id: usize,
    params: Vec<(String, ParamState)>,
}

/// Lower a parsed script against a symbol table.
///
/// When `interleave` is set, the peephole optimizer (terminal rules
/// excluded) runs over the growing sequence after every completed top-level
/// expansion, so later inlines see already-simplified operands.
pub fn contextualize(
    script: &Script,
    symbols: &mut SymbolTable,
    optimizer: PeepholeOptimizer,
    interleave: bool,
) -> Result<LInstructions> {
    let mut cx = Contextualizer::new(symbols, optimizer, interleave);
    cx.lower_stmts(&script.body)?;
    Ok(cx.out)
}

struct Contextualizer<'a> {
    symbols: &'a mut SymbolTable,
    optimizer: PeepholeOptimizer,
    interleave: bool,
    out: LInstructions,
    shadow: Vec<Slot>,
    frames: Vec<Frame>,
    /// Names of the definitions currently being expanded; a repeat is a
    /// cycle.
    expansion: Vec<String>,
    next_frame: usize,
}

impl<'a> Contextualizer<'a> {
    fn new(symbols: &'a mut SymbolTable, optimizer: PeepholeOptimizer, interleave: bool) -> Self {
        Self {
            symbols,
            optimizer,
            interleave,
            out: LInstructions::new(),
            shadow: Vec::new(),
            frames: Vec::new(),
            expansion: Vec::new(),
            next_frame: 0,
        }
    }

    fn emit(&mut self, instr: Instruction) {
        self.out.push(instr);
    }

    fn emit_op(&mut self, op: Opcode) {
        self.out.push(Instruction::Op(op));
    }

    fn pop_values(&mut self, n: usize) {
        for _ in 0..n {
            self.shadow.pop();
        }
    }

    fn lower_stmts(&mut self, stmts: &[Stmt]) -> Result<()> {
        for stmt in stmts {
            self.lower_stmt(stmt)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.lower_expr(expr)?;
            }
            StmtKind::Assign {
                name,
                params,
                value,
            } => {
                trace!(name, "binding definition");
                self.symbols
                    .define(name.clone(), Definition::new(params.clone(), value.clone()));
            }
            StmtKind::Verify(expr) => {
                self.lower_expr(expr)?;
                self.emit_op(opcodes::OP_VERIFY);
                self.pop_values(1);
            }
            StmtKind::Return(expr) => {
                if let Some(expr) = expr {
                    self.lower_expr(expr)?;
                }
                self.emit_op(opcodes::OP_RETURN);
            }
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                self.lower_expr(cond)?;
                self.emit_op(opcodes::OP_IF);
                self.pop_values(1);

                let before = self.shadow.clone();
                self.lower_stmts(then_body)?;
                let after_then = core::mem::replace(&mut self.shadow, before);
                if !else_body.is_empty() {
                    self.emit_op(opcodes::OP_ELSE);
                    self.lower_stmts(else_body)?;
                }
                // branches are assumed to leave compatible stacks
                self.shadow = after_then;
                self.emit_op(opcodes::OP_ENDIF);
            }
        }
        Ok(())
    }

    fn lower_expr(&mut self, expr: &Expr) -> Result<()> {
        match &expr.kind {
            ExprKind::Literal(Literal::Int(n)) => {
                self.emit(Instruction::int(*n));
                self.shadow.push(Slot::Temp);
            }
            ExprKind::Literal(Literal::Bytes(data)) => {
                let instr = Instruction::push(data.clone())?;
                self.emit(instr);
                self.shadow.push(Slot::Temp);
            }
            ExprKind::Symbol(name) => self.lower_symbol(name, expr.loc)?,
            ExprKind::InnerScript(stmts) => {
                let body = self.lower_inner(stmts)?;
                self.emit(Instruction::Script(body));
                self.shadow.push(Slot::Temp);
            }
            ExprKind::Unary(op, arg) => {
                self.lower_expr(arg)?;
                self.emit_op(op.opcode());
                self.pop_values(1);
                self.shadow.push(Slot::Temp);
            }
            ExprKind::Binary(op, left, right) => {
                self.lower_expr(left)?;
                self.lower_expr(right)?;
                self.emit_op(op.opcode());
                self.pop_values(2);
                self.shadow.push(Slot::Temp);
            }
            ExprKind::Call(callee, args) => self.lower_call(callee, args, expr.loc)?,
        }
        Ok(())
    }

    fn lower_symbol(&mut self, name: &str, loc: SourceLoc) -> Result<()> {
        if self.lower_param(name)? {
            return Ok(());
        }

        let Some(definition) = self.symbols.lookup(name).cloned() else {
            return Err(Error::UndefinedSymbol {
                name: name.to_string(),
                loc,
            });
        };
        if !definition.params.is_empty() {
            return Err(Error::Arity {
                callee: name.to_string(),
                expected: definition.params.len(),
                got: 0,
                loc,
            });
        }

        self.expand(name, &definition, &[])
    }

    fn lower_call(&mut self, callee: &str, args: &[Expr], loc: SourceLoc) -> Result<()> {
        if let Some((op, arity)) = builtin(callee) {
            if args.len() != arity {
                return Err(Error::Arity {
                    callee: callee.to_string(),
                    expected: arity,
                    got: args.len(),
                    loc,
                });
            }
            for arg in args {
                self.lower_expr(arg)?;
            }
            self.emit_op(op);
            self.pop_values(args.len());
            self.shadow.push(Slot::Temp);
            return Ok(());
        }

        let Some(definition) = self.symbols.lookup(callee).cloned() else {
            return Err(Error::UndefinedSymbol {
                name: callee.to_string(),
                loc,
            });
        };
        if definition.params.len() != args.len() {
            return Err(Error::Arity {
                callee: callee.to_string(),
                expected: definition.params.len(),
                got: args.len(),
                loc,
            });
        }

        self.expand(callee, &definition, args)
    }

    /// Splice a definition in at its use site.
    fn expand(&mut self, name: &str, definition: &Definition, args: &[Expr]) -> Result<()> {
        if self.expansion.iter().any(|active| active == name) {
            return Err(Error::RecursiveDefinition(name.to_string()));
        }

        match definition.kind {
            DefinitionKind::InnerScript => {
                let ExprKind::InnerScript(stmts) = &definition.body.kind else {
                    return Err(Error::Invariant(format!(
                        "inner-script definition `{name}` has no script body"
                    )));
                };
                self.expansion.push(name.to_string());
                let result = self.lower_inner(stmts);
                self.expansion.pop();
                self.emit(Instruction::Script(result?));
                self.shadow.push(Slot::Temp);
            }
            DefinitionKind::Constant | DefinitionKind::ExprMacro => {
                for arg in args {
                    self.lower_expr(arg)?;
                }
                let frame = self.begin_frame(&definition.params, &definition.body)?;
                self.expansion.push(name.to_string());
                let result = self.lower_expr(&definition.body);
                self.expansion.pop();
                result?;
                self.end_frame(frame)?;
            }
        }

        debug!(symbol = name, "inlined definition");
        if self.interleave && self.frames.is_empty() && self.expansion.is_empty() {
            self.optimizer.optimize_partial(&mut self.out);
        }
        Ok(())
    }

    /// Emit a parameter reference of the innermost inline frame; false when
    /// the name is not one of its parameters.
    fn lower_param(&mut self, name: &str) -> Result<bool> {
        let Some(frame) = self.frames.last_mut() else {
            return Ok(false);
        };
        let frame_id = frame.id;
        let (index, consuming) = {
            let Some((_, state)) = frame.params.iter_mut().find(|(param, _)| param == name)
            else {
                return Ok(false);
            };
            let consuming = state.uses_left <= 1;
            if state.uses_left > 0 {
                state.uses_left -= 1;
            }
            (state.index, consuming)
        };

        let slot = Slot::Param {
            frame: frame_id,
            index,
        };
        let Some(pos) = self.shadow.iter().rposition(|s| *s == slot) else {
            return Err(Error::Invariant(format!(
                "parameter `{name}` vanished from the stack model"
            )));
        };
        let depth = self.shadow.len() - 1 - pos;

        self.emit(Instruction::int(depth as i64));
        if consuming {
            self.emit_op(opcodes::OP_ROLL);
            self.shadow.remove(pos);
        } else {
            self.emit_op(opcodes::OP_PICK);
        }
        self.shadow.push(Slot::Temp);
        Ok(true)
    }

    /// Rebind the top `params.len()` shadow slots, left by the lowered
    /// arguments, as the callee's parameters.
    fn begin_frame(&mut self, params: &[String], body: &Expr) -> Result<usize> {
        let id = self.next_frame;
        self.next_frame += 1;

        if self.shadow.len() < params.len() {
            return Err(Error::Invariant(
                "inline arguments missing from the stack model".into(),
            ));
        }

        let base = self.shadow.len() - params.len();
        let mut states = Vec::with_capacity(params.len());
        for (index, param) in params.iter().enumerate() {
            self.shadow[base + index] = Slot::Param { frame: id, index };
            states.push((
                param.clone(),
                ParamState {
                    index,
                    uses_left: count_uses(body, param),
                },
            ));
        }
        self.frames.push(Frame { id, params: states });
        Ok(id)
    }

    /// Drop parameters the body never consumed, keeping its result on top.
    fn end_frame(&mut self, id: usize) -> Result<()> {
        let Some(frame) = self.frames.pop() else {
            return Err(Error::Invariant("inline frame stack underflow".into()));
        };
        debug_assert_eq!(frame.id, id);

        loop {
            let Some(pos) = self
                .shadow
                .iter()
                .rposition(|slot| matches!(slot, Slot::Param { frame, .. } if *frame == id))
            else {
                break;
            };
            let depth = self.shadow.len() - 1 - pos;
            self.emit(Instruction::int(depth as i64));
            self.emit_op(opcodes::OP_ROLL);
            self.emit_op(opcodes::OP_DROP);
            self.shadow.remove(pos);
        }
        Ok(())
    }

    /// Lower a nested script in its own scope with a fresh stack model; the
    /// body of a finished inner script is optimized as a complete script.
    fn lower_inner(&mut self, stmts: &[Stmt]) -> Result<LInstructions> {
        self.symbols.enter_scope();
        let result = {
            let mut inner = Contextualizer::new(&mut *self.symbols, self.optimizer, self.interleave);
            inner.expansion = self.expansion.clone();
            inner.lower_stmts(stmts).map(|()| inner.out)
        };
        self.symbols.exit_scope();

        let mut body = result?;
        self.optimizer.optimize(&mut body);
        Ok(body)
    }
}

/// Number of references to `name` in an expression. Nested inner scripts do
/// not count: they lower with their own stack and cannot address an
/// enclosing frame's parameters.
fn count_uses(expr: &Expr, name: &str) -> usize {
    match &expr.kind {
        ExprKind::Literal(_) | ExprKind::InnerScript(_) => 0,
        ExprKind::Symbol(symbol) => (symbol == name) as usize,
        ExprKind::Unary(_, arg) => count_uses(arg, name),
        ExprKind::Binary(_, left, right) => count_uses(left, name) + count_uses(right, name),
        ExprKind::Call(_, args) => args.iter().map(|arg| count_uses(arg, name)).sum(),
    }
}
