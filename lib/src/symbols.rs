use crate::ir::structural::{Expr, ExprKind, Literal};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionKind {
    /// A reusable expression, spliced in at every use site.
    ExprMacro,
    /// A nested script; uses become inner-script instructions.
    InnerScript,
    /// A plain literal.
    Constant,
}

#[derive(Debug, Clone)]
pub struct Definition {
    pub kind: DefinitionKind,
    pub params: Vec<String>,
    pub body: Expr,
}

impl Definition {
    /// Classify a definition from its parameters and body.
    pub fn new(params: Vec<String>, body: Expr) -> Self {
        let kind = match &body.kind {
            ExprKind::InnerScript(_) if params.is_empty() => DefinitionKind::InnerScript,
            ExprKind::Literal(Literal::Int(_) | Literal::Bytes(_)) if params.is_empty() => {
                DefinitionKind::Constant
            }
            _ => DefinitionKind::ExprMacro,
        };
        Self { kind, params, body }
    }
}

/// Lexically scoped symbol definitions. Inner scripts open a new scope;
/// lookups walk from the innermost scope outward.
#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<HashMap<String, Definition>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
        }
    }

    pub fn enter_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn exit_scope(&mut self) {
        debug_assert!(self.scopes.len() > 1);
        self.scopes.pop();
    }

    pub fn define(&mut self, name: String, definition: Definition) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, definition);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Definition> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
