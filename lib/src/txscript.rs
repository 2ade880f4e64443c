//! The TxScript front end: a small C-like expression language.
//!
//! Statements end with `;` and `#` starts a line comment. Definitions are
//! written `name = expr;` or `name(a, b) = expr;`; inner scripts are brace
//! blocks in expression position.

use crate::error::{Error, Result};
use crate::ir::structural::{
    BinaryOp, Expr, ExprKind, Literal, Script, SourceLoc, Stmt, StmtKind, UnaryOp,
};
use core::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Int(i64),
    Hex(Vec<u8>),
    Ident(String),
    And,
    Or,
    Not,
    Verify,
    Return,
    If,
    Else,
    Semi,
    Comma,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Assign,
    Eq,
    Lt,
    Gt,
    Le,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "`{n}`"),
            Self::Hex(data) => write!(f, "`0x{}`", hex::encode(data)),
            Self::Ident(name) => write!(f, "`{name}`"),
            Self::And => f.write_str("`and`"),
            Self::Or => f.write_str("`or`"),
            Self::Not => f.write_str("`not`"),
            Self::Verify => f.write_str("`verify`"),
            Self::Return => f.write_str("`return`"),
            Self::If => f.write_str("`if`"),
            Self::Else => f.write_str("`else`"),
            Self::Semi => f.write_str("`;`"),
            Self::Comma => f.write_str("`,`"),
            Self::LParen => f.write_str("`(`"),
            Self::RParen => f.write_str("`)`"),
            Self::LBrace => f.write_str("`{`"),
            Self::RBrace => f.write_str("`}`"),
            Self::Assign => f.write_str("`=`"),
            Self::Eq => f.write_str("`==`"),
            Self::Lt => f.write_str("`<`"),
            Self::Gt => f.write_str("`>`"),
            Self::Le => f.write_str("`<=`"),
            Self::Ge => f.write_str("`>=`"),
            Self::Plus => f.write_str("`+`"),
            Self::Minus => f.write_str("`-`"),
            Self::Star => f.write_str("`*`"),
            Self::Slash => f.write_str("`/`"),
            Self::Percent => f.write_str("`%`"),
            Self::Bang => f.write_str("`!`"),
        }
    }
}

fn lex(source: &str) -> Result<Vec<(Tok, SourceLoc)>> {
    let mut tokens = Vec::new();

    for (line_no, line) in source.lines().enumerate() {
        let bytes = line.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            let loc = SourceLoc::new(line_no as u32 + 1, i as u32 + 1);

            match b {
                b'#' => break,
                _ if b.is_ascii_whitespace() => i += 1,
                b';' => {
                    tokens.push((Tok::Semi, loc));
                    i += 1;
                }
                b',' => {
                    tokens.push((Tok::Comma, loc));
                    i += 1;
                }
                b'(' => {
                    tokens.push((Tok::LParen, loc));
                    i += 1;
                }
                b')' => {
                    tokens.push((Tok::RParen, loc));
                    i += 1;
                }
                b'{' => {
                    tokens.push((Tok::LBrace, loc));
                    i += 1;
                }
                b'}' => {
                    tokens.push((Tok::RBrace, loc));
                    i += 1;
                }
                b'+' => {
                    tokens.push((Tok::Plus, loc));
                    i += 1;
                }
                b'-' => {
                    tokens.push((Tok::Minus, loc));
                    i += 1;
                }
                b'*' => {
                    tokens.push((Tok::Star, loc));
                    i += 1;
                }
                b'/' => {
                    tokens.push((Tok::Slash, loc));
                    i += 1;
                }
                b'%' => {
                    tokens.push((Tok::Percent, loc));
                    i += 1;
                }
                b'!' => {
                    tokens.push((Tok::Bang, loc));
                    i += 1;
                }
                b'=' => {
                    if bytes.get(i + 1) == Some(&b'=') {
                        tokens.push((Tok::Eq, loc));
                        i += 2;
                    } else {
                        tokens.push((Tok::Assign, loc));
                        i += 1;
                    }
                }
                b'<' => {
                    if bytes.get(i + 1) == Some(&b'=') {
                        tokens.push((Tok::Le, loc));
                        i += 2;
                    } else {
                        tokens.push((Tok::Lt, loc));
                        i += 1;
                    }
                }
                b'>' => {
                    if bytes.get(i + 1) == Some(&b'=') {
                        tokens.push((Tok::Ge, loc));
                        i += 2;
                    } else {
                        tokens.push((Tok::Gt, loc));
                        i += 1;
                    }
                }
                b'0'..=b'9' => {
                    if b == b'0' && matches!(bytes.get(i + 1), Some(b'x') | Some(b'X')) {
                        let start = i + 2;
                        let mut end = start;
                        while end < bytes.len() && bytes[end].is_ascii_hexdigit() {
                            end += 1;
                        }
                        let data = hex::decode(&line[start..end])
                            .map_err(|err| Error::parse(format!("bad hex literal: {err}"), loc))?;
                        tokens.push((Tok::Hex(data), loc));
                        i = end;
                    } else {
                        let start = i;
                        while i < bytes.len() && bytes[i].is_ascii_digit() {
                            i += 1;
                        }
                        let n = line[start..i].parse::<i64>().map_err(|err| {
                            Error::parse(format!("bad integer literal: {err}"), loc)
                        })?;
                        tokens.push((Tok::Int(n), loc));
                    }
                }
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                    let start = i;
                    while i < bytes.len()
                        && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_')
                    {
                        i += 1;
                    }
                    let tok = match &line[start..i] {
                        "and" => Tok::And,
                        "or" => Tok::Or,
                        "not" => Tok::Not,
                        "verify" => Tok::Verify,
                        "return" => Tok::Return,
                        "if" => Tok::If,
                        "else" => Tok::Else,
                        name => Tok::Ident(name.to_string()),
                    };
                    tokens.push((tok, loc));
                }
                _ => {
                    return Err(Error::parse(
                        format!("unexpected character `{}`", b as char),
                        loc,
                    ));
                }
            }
        }
    }

    Ok(tokens)
}

pub fn parse(source: &str) -> Result<Script> {
    let tokens = lex(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let body = parser.stmts(false)?;
    Ok(Script { body })
}

struct Parser {
    tokens: Vec<(Tok, SourceLoc)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|(tok, _)| tok)
    }

    fn loc(&self) -> SourceLoc {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|&(_, loc)| loc)
            .unwrap_or_default()
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn next_tok(&mut self) -> Result<Tok> {
        let loc = self.loc();
        let Some((tok, _)) = self.tokens.get(self.pos) else {
            return Err(Error::parse("unexpected end of input", loc));
        };
        let tok = tok.clone();
        self.pos += 1;
        Ok(tok)
    }

    fn expect(&mut self, want: Tok) -> Result<()> {
        let loc = self.loc();
        match self.tokens.get(self.pos) {
            Some((tok, _)) if *tok == want => {
                self.pos += 1;
                Ok(())
            }
            Some((tok, _)) => Err(Error::parse(format!("expected {want}, found {tok}"), loc)),
            None => Err(Error::parse(format!("expected {want}"), loc)),
        }
    }

    fn ident(&mut self) -> Result<String> {
        let loc = self.loc();
        match self.next_tok()? {
            Tok::Ident(name) => Ok(name),
            tok => Err(Error::parse(format!("expected a name, found {tok}"), loc)),
        }
    }

    fn stmts(&mut self, in_braces: bool) -> Result<Vec<Stmt>> {
        let mut out = Vec::new();
        loop {
            match self.peek() {
                Some(Tok::RBrace) if in_braces => break,
                Some(_) => out.push(self.stmt()?),
                None if in_braces => {
                    return Err(Error::parse("unclosed `{`", self.loc()));
                }
                None => break,
            }
        }
        Ok(out)
    }

    fn stmt(&mut self) -> Result<Stmt> {
        let loc = self.loc();
        match self.peek() {
            Some(Tok::Verify) => {
                self.advance();
                let expr = self.expr()?;
                self.expect(Tok::Semi)?;
                Ok(Stmt {
                    kind: StmtKind::Verify(expr),
                    loc,
                })
            }
            Some(Tok::Return) => {
                self.advance();
                let expr = if matches!(self.peek(), Some(Tok::Semi)) {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect(Tok::Semi)?;
                Ok(Stmt {
                    kind: StmtKind::Return(expr),
                    loc,
                })
            }
            Some(Tok::If) => self.if_stmt(loc),
            Some(Tok::Ident(_)) if self.is_assignment() => self.assignment(loc),
            _ => {
                let expr = self.expr()?;
                self.expect(Tok::Semi)?;
                Ok(Stmt {
                    kind: StmtKind::Expr(expr),
                    loc,
                })
            }
        }
    }

    fn if_stmt(&mut self, loc: SourceLoc) -> Result<Stmt> {
        self.advance();
        self.expect(Tok::LParen)?;
        let cond = self.expr()?;
        self.expect(Tok::RParen)?;
        self.expect(Tok::LBrace)?;
        let then_body = self.stmts(true)?;
        self.expect(Tok::RBrace)?;

        let else_body = if matches!(self.peek(), Some(Tok::Else)) {
            self.advance();
            self.expect(Tok::LBrace)?;
            let body = self.stmts(true)?;
            self.expect(Tok::RBrace)?;
            body
        } else {
            Vec::new()
        };

        Ok(Stmt {
            kind: StmtKind::If {
                cond,
                then_body,
                else_body,
            },
            loc,
        })
    }

    /// Whether the statement at the cursor is `name = …` or `name(…) = …`.
    fn is_assignment(&self) -> bool {
        match self.tokens.get(self.pos + 1).map(|(tok, _)| tok) {
            Some(Tok::Assign) => true,
            Some(Tok::LParen) => {
                let mut depth = 0usize;
                let mut i = self.pos + 1;
                while let Some((tok, _)) = self.tokens.get(i) {
                    match tok {
                        Tok::LParen => depth += 1,
                        Tok::RParen => {
                            depth -= 1;
                            if depth == 0 {
                                return matches!(
                                    self.tokens.get(i + 1).map(|(tok, _)| tok),
                                    Some(Tok::Assign)
                                );
                            }
                        }
                        _ => {}
                    }
                    i += 1;
                }
                false
            }
            _ => false,
        }
    }

    fn assignment(&mut self, loc: SourceLoc) -> Result<Stmt> {
        let name = self.ident()?;
        let params = if matches!(self.peek(), Some(Tok::LParen)) {
            self.advance();
            let mut params = Vec::new();
            if !matches!(self.peek(), Some(Tok::RParen)) {
                loop {
                    params.push(self.ident()?);
                    if matches!(self.peek(), Some(Tok::Comma)) {
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
            self.expect(Tok::RParen)?;
            params
        } else {
            Vec::new()
        };
        self.expect(Tok::Assign)?;
        let value = self.expr()?;
        self.expect(Tok::Semi)?;
        Ok(Stmt {
            kind: StmtKind::Assign {
                name,
                params,
                value,
            },
            loc,
        })
    }

    fn expr(&mut self) -> Result<Expr> {
        self.or_expr()
    }

    // `or` and `and` chains nest to the right
    fn or_expr(&mut self) -> Result<Expr> {
        let left = self.and_expr()?;
        if matches!(self.peek(), Some(Tok::Or)) {
            let loc = self.loc();
            self.advance();
            let right = self.or_expr()?;
            return Ok(binary(BinaryOp::BoolOr, left, right, loc));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let left = self.cmp_expr()?;
        if matches!(self.peek(), Some(Tok::And)) {
            let loc = self.loc();
            self.advance();
            let right = self.and_expr()?;
            return Ok(binary(BinaryOp::BoolAnd, left, right, loc));
        }
        Ok(left)
    }

    fn cmp_expr(&mut self) -> Result<Expr> {
        let left = self.add_expr()?;
        let op = match self.peek() {
            Some(Tok::Eq) => BinaryOp::Equal,
            Some(Tok::Lt) => BinaryOp::Less,
            Some(Tok::Gt) => BinaryOp::Greater,
            Some(Tok::Le) => BinaryOp::LessEq,
            Some(Tok::Ge) => BinaryOp::GreaterEq,
            _ => return Ok(left),
        };
        let loc = self.loc();
        self.advance();
        let right = self.add_expr()?;
        Ok(binary(op, left, right, loc))
    }

    fn add_expr(&mut self) -> Result<Expr> {
        let mut left = self.mul_expr()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => BinaryOp::Add,
                Some(Tok::Minus) => BinaryOp::Sub,
                _ => break,
            };
            let loc = self.loc();
            self.advance();
            let right = self.mul_expr()?;
            left = binary(op, left, right, loc);
        }
        Ok(left)
    }

    fn mul_expr(&mut self) -> Result<Expr> {
        let mut left = self.unary_expr()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => BinaryOp::Mul,
                Some(Tok::Slash) => BinaryOp::Div,
                Some(Tok::Percent) => BinaryOp::Mod,
                _ => break,
            };
            let loc = self.loc();
            self.advance();
            let right = self.unary_expr()?;
            left = binary(op, left, right, loc);
        }
        Ok(left)
    }

    fn unary_expr(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Tok::Minus) => {
                let loc = self.loc();
                self.advance();
                let arg = self.unary_expr()?;
                if let ExprKind::Literal(Literal::Int(n)) = arg.kind {
                    return Ok(Expr {
                        kind: ExprKind::Literal(Literal::Int(-n)),
                        loc,
                    });
                }
                Ok(Expr {
                    kind: ExprKind::Unary(UnaryOp::Negate, Box::new(arg)),
                    loc,
                })
            }
            Some(Tok::Bang | Tok::Not) => {
                let loc = self.loc();
                self.advance();
                let arg = self.unary_expr()?;
                Ok(Expr {
                    kind: ExprKind::Unary(UnaryOp::Not, Box::new(arg)),
                    loc,
                })
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        let loc = self.loc();
        match self.next_tok()? {
            Tok::Int(n) => Ok(Expr {
                kind: ExprKind::Literal(Literal::Int(n)),
                loc,
            }),
            Tok::Hex(data) => Ok(Expr {
                kind: ExprKind::Literal(Literal::Bytes(data)),
                loc,
            }),
            Tok::Ident(name) => {
                if matches!(self.peek(), Some(Tok::LParen)) {
                    self.advance();
                    let mut args = Vec::new();
                    if !matches!(self.peek(), Some(Tok::RParen)) {
                        loop {
                            args.push(self.expr()?);
                            if matches!(self.peek(), Some(Tok::Comma)) {
                                self.advance();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(Tok::RParen)?;
                    Ok(Expr {
                        kind: ExprKind::Call(name, args),
                        loc,
                    })
                } else {
                    Ok(Expr {
                        kind: ExprKind::Symbol(name),
                        loc,
                    })
                }
            }
            Tok::LParen => {
                let expr = self.expr()?;
                self.expect(Tok::RParen)?;
                Ok(expr)
            }
            Tok::LBrace => {
                let body = self.stmts(true)?;
                self.expect(Tok::RBrace)?;
                Ok(Expr {
                    kind: ExprKind::InnerScript(body),
                    loc,
                })
            }
            tok => Err(Error::parse(format!("unexpected {tok}"), loc)),
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr, loc: SourceLoc) -> Expr {
    Expr {
        kind: ExprKind::Binary(op, Box::new(left), Box::new(right)),
        loc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::contextualize;
    use crate::optimizer::PeepholeOptimizer;
    use crate::symbols::SymbolTable;

    fn lowered(source: &str) -> String {
        let script = parse(source).unwrap();
        let mut symbols = SymbolTable::new();
        let lir = contextualize(
            &script,
            &mut symbols,
            PeepholeOptimizer::new(false),
            false,
        )
        .unwrap();
        lir.to_string()
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(lowered("5 + 2;"), "[OP_5, OP_2, OP_ADD]");
        assert_eq!(lowered("5 - 2;"), "[OP_5, OP_2, OP_SUB]");
        assert_eq!(lowered("5 * 2;"), "[OP_5, OP_2, OP_MUL]");
        assert_eq!(lowered("5 / 2;"), "[OP_5, OP_2, OP_DIV]");
        assert_eq!(lowered("5 % 2;"), "[OP_5, OP_2, OP_MOD]");
    }

    #[test]
    fn test_functions() {
        assert_eq!(lowered("min(1, 2);"), "[OP_1, OP_2, OP_MIN]");
        assert_eq!(lowered("max(1, 2);"), "[OP_1, OP_2, OP_MAX]");
        assert_eq!(
            lowered("verify max(1, 2) == 2;"),
            "[OP_1, OP_2, OP_MAX, OP_2, OP_EQUAL, OP_VERIFY]"
        );
    }

    #[test]
    fn test_boolops_nest_right() {
        assert_eq!(lowered("5 or 2;"), "[OP_5, OP_2, OP_BOOLOR]");
        assert_eq!(
            lowered("5 or 2 or 8;"),
            "[OP_5, OP_2, OP_8, OP_BOOLOR, OP_BOOLOR]"
        );
        assert_eq!(lowered("5 and 2;"), "[OP_5, OP_2, OP_BOOLAND]");
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(lowered("1 < 2;"), "[OP_1, OP_2, OP_LESSTHAN]");
        assert_eq!(lowered("1 >= 2;"), "[OP_1, OP_2, OP_GREATERTHANOREQUAL]");
        assert_eq!(lowered("min(1, 2) == 1;"), "[OP_1, OP_2, OP_MIN, OP_1, OP_EQUAL]");
    }

    #[test]
    fn test_precedence_and_parens() {
        assert_eq!(lowered("1 + 2 * 3;"), "[OP_1, OP_2, OP_3, OP_MUL, OP_ADD]");
        assert_eq!(lowered("(1 + 2) * 3;"), "[OP_1, OP_2, OP_ADD, OP_3, OP_MUL]");
    }

    #[test]
    fn test_unary() {
        assert_eq!(lowered("-5;"), "[Push(0x85)]");
        assert_eq!(lowered("-(1 + 2);"), "[OP_1, OP_2, OP_ADD, OP_NEGATE]");
        assert_eq!(lowered("not 1;"), "[OP_1, OP_NOT]");
        assert_eq!(lowered("!1;"), "[OP_1, OP_NOT]");
    }

    #[test]
    fn test_hex_literal() {
        assert_eq!(lowered("0x0203;"), "[Push(0x0203)]");
    }

    #[test]
    fn test_compound_statements() {
        assert_eq!(
            lowered("1 + 2; 3 + 4;"),
            "[OP_1, OP_2, OP_ADD, OP_3, OP_4, OP_ADD]"
        );
        assert_eq!(lowered("min(1, 2); 100;"), "[OP_1, OP_2, OP_MIN, Push(0x64)]");
    }

    #[test]
    fn test_comment() {
        assert_eq!(
            lowered("1 + 2;\n# a comment line\n3 + 4;"),
            "[OP_1, OP_2, OP_ADD, OP_3, OP_4, OP_ADD]"
        );
    }

    #[test]
    fn test_assignment_and_use() {
        assert_eq!(lowered("x = 5; x + 1;"), "[OP_5, OP_1, OP_ADD]");
    }

    #[test]
    fn test_parameterized_definition() {
        assert_eq!(
            lowered("f(a, b) = a + b; f(1, 2);"),
            "[OP_1, OP_2, OP_1, OP_ROLL, OP_1, OP_ROLL, OP_ADD]"
        );
    }

    #[test]
    fn test_if_else() {
        assert_eq!(
            lowered("if (1) { 2; } else { 3; }"),
            "[OP_1, OP_IF, OP_2, OP_ELSE, OP_3, OP_ENDIF]"
        );
        assert_eq!(lowered("if (1) { 2; }"), "[OP_1, OP_IF, OP_2, OP_ENDIF]");
    }

    #[test]
    fn test_return() {
        assert_eq!(lowered("return 5;"), "[OP_5, OP_RETURN]");
        assert_eq!(lowered("return;"), "[OP_RETURN]");
    }

    #[test]
    fn test_inner_script() {
        assert_eq!(lowered("s = { 1; }; s;"), "[Script([OP_1])]");
    }

    #[test]
    fn test_missing_semicolon() {
        assert!(matches!(
            parse("1 + 2").unwrap_err(),
            Error::Parse { .. }
        ));
    }

    #[test]
    fn test_unexpected_character() {
        let Error::Parse { loc, .. } = parse("1 @ 2;").unwrap_err() else {
            panic!("expected a parse error");
        };
        assert_eq!((loc.line, loc.column), (1, 3));
    }

    #[test]
    fn test_unclosed_brace() {
        assert!(matches!(
            parse("s = { 1; ").unwrap_err(),
            Error::Parse { .. }
        ));
    }

    #[test]
    fn test_odd_hex_literal() {
        assert!(matches!(parse("0x123;").unwrap_err(), Error::Parse { .. }));
    }

    #[test]
    fn test_trailing_semicolon_only_statements() {
        assert_eq!(lowered("1 + 2; 3 + 4;"), lowered("1 + 2;\n3 + 4;"));
    }
}
