/* Recursive descent parser over the token stream */

use crate::synth::ast::*;
use crate::synth::lexer::{Spanned, Token};
use crate::synth::SynthError;

const PRIMITIVES: &[&str] = &["boolean", "byte", "char", "short", "int", "long", "float", "double"];

const METHOD_MODIFIERS: &[&str] = &["public", "protected", "private", "static", "final", "synchronized"];

// Operators that may follow a complete expression but are outside the accepted grammar.
const REJECTED_OPERATORS: &[(&str, &str)] = &[
    ("=", "assignment"),
    ("+=", "compound assignment"),
    ("-=", "compound assignment"),
    ("*=", "compound assignment"),
    ("/=", "compound assignment"),
    ("%=", "compound assignment"),
    ("&=", "compound assignment"),
    ("|=", "compound assignment"),
    ("^=", "compound assignment"),
    ("<<=", "compound assignment"),
    (">>=", "compound assignment"),
    (">>>=", "compound assignment"),
    ("++", "increment operator"),
    ("--", "decrement operator"),
    ("-", "arithmetic operator '-'"),
    ("*", "arithmetic operator '*'"),
    ("/", "arithmetic operator '/'"),
    ("%", "arithmetic operator '%'"),
    ("&", "bitwise operator '&'"),
    ("|", "bitwise operator '|'"),
    ("^", "bitwise operator '^'"),
    ("<<", "shift operator"),
    (">>", "shift operator"),
    (">>>", "shift operator"),
    ("?", "conditional expression"),
    ("[", "array access"),
    ("->", "lambda expression"),
    ("::", "method reference"),
];

pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Spanned>) -> Parser {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|s| &s.token)
    }

    fn line(&self) -> usize {
        match self.tokens.get(self.pos).or_else(|| self.tokens.last()) {
            Some(s) => s.line,
            None => 1,
        }
    }

    fn is_symbol(&self, s: &str) -> bool {
        matches!(self.peek(), Some(Token::Symbol(x)) if *x == s)
    }

    fn is_keyword(&self, k: &str) -> bool {
        matches!(self.peek(), Some(Token::Keyword(x)) if *x == k)
    }

    fn eat_symbol(&mut self, s: &str) -> bool {
        if self.is_symbol(s) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, k: &str) -> bool {
        if self.is_keyword(k) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, s: &str) -> Result<(), SynthError> {
        if self.eat_symbol(s) {
            Ok(())
        } else {
            Err(SynthError::syntax(self.line(), &format!("'{}' expected{}", s, self.found())))
        }
    }

    fn expect_ident(&mut self) -> Result<String, SynthError> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(SynthError::syntax(self.line(), &format!("<identifier> expected{}", self.found()))),
        }
    }

    fn found(&self) -> String {
        match self.peek() {
            None => ", reached end of input".to_string(),
            Some(Token::Ident(n)) => format!(", found {}", n),
            Some(Token::Keyword(k)) => format!(", found {}", k),
            Some(Token::Symbol(s)) => format!(", found '{}'", s),
            Some(_) => ", found a literal".to_string(),
        }
    }

    fn unsupported(&self, construct: &str) -> SynthError {
        SynthError::unsupported(self.line(), construct)
    }

    pub fn parse_method(&mut self) -> Result<MethodDecl, SynthError> {
        let line = self.line();
        let mut modifiers = vec![];
        loop {
            match self.peek() {
                Some(Token::Keyword(k)) if METHOD_MODIFIERS.contains(k) => {
                    modifiers.push(*k);
                    self.pos += 1;
                }
                Some(Token::Keyword(k @ ("abstract" | "native" | "strictfp" | "default" | "transient" | "volatile"))) => {
                    return Err(self.unsupported(&format!("modifier {}", k)));
                }
                Some(Token::Symbol("@")) => return Err(self.unsupported("annotation")),
                _ => break,
            }
        }
        if self.is_symbol("<") {
            return Err(self.unsupported("generic method"));
        }
        let return_type = self.parse_type(true)?;
        let name = self.expect_ident()?;
        self.expect_symbol("(")?;
        let mut params = vec![];
        if !self.eat_symbol(")") {
            loop {
                params.push(self.parse_param()?);
                if self.eat_symbol(")") {
                    break;
                }
                self.expect_symbol(",")?;
            }
        }
        if self.is_keyword("throws") {
            return Err(self.unsupported("throws clause"));
        }
        let body = self.parse_block()?;
        if self.peek().is_some() {
            return Err(SynthError::syntax(self.line(), "unexpected input after the method body"));
        }
        Ok(MethodDecl { modifiers, return_type, name, params, body, line })
    }

    fn parse_param(&mut self) -> Result<Param, SynthError> {
        if self.is_symbol("@") {
            return Err(self.unsupported("annotation"));
        }
        self.eat_keyword("final");
        let line = self.line();
        let ty = self.parse_type(false)?;
        if self.is_symbol("...") {
            return Err(self.unsupported("variable arity parameter"));
        }
        let name = self.expect_ident()?;
        Ok(Param { ty, name, line })
    }

    fn parse_type(&mut self, allow_void: bool) -> Result<TypeName, SynthError> {
        let line = self.line();
        let name = match self.peek() {
            Some(Token::Keyword(k)) if PRIMITIVES.contains(k) => k.to_string(),
            Some(Token::Keyword("void")) if allow_void => "void".to_string(),
            Some(Token::Ident(_)) => {
                let mut name = self.expect_ident()?;
                while self.is_symbol(".") && matches!(self.peek_at(1), Some(Token::Ident(_))) {
                    self.pos += 1;
                    name.push('.');
                    name.push_str(&self.expect_ident()?);
                }
                if self.is_symbol("<") {
                    return Err(self.unsupported("generic type"));
                }
                return self.parse_dims(name, line);
            }
            _ => return Err(SynthError::syntax(line, &format!("<type> expected{}", self.found()))),
        };
        self.pos += 1;
        self.parse_dims(name, line)
    }

    fn parse_dims(&mut self, name: String, line: usize) -> Result<TypeName, SynthError> {
        let mut dims = 0;
        while self.is_symbol("[") && matches!(self.peek_at(1), Some(Token::Symbol("]"))) {
            self.pos += 2;
            dims += 1;
        }
        if dims > 0 && name == "void" {
            return Err(SynthError::syntax(line, "'void' type not allowed here"));
        }
        Ok(TypeName { name, dims, line })
    }

    fn parse_block(&mut self) -> Result<Block, SynthError> {
        self.expect_symbol("{")?;
        let mut stmts = vec![];
        loop {
            if self.is_symbol("}") {
                let end_line = self.line();
                self.pos += 1;
                return Ok(Block { stmts, end_line });
            }
            if self.peek().is_none() {
                return Err(SynthError::syntax(self.line(), "reached end of input while parsing"));
            }
            stmts.push(self.parse_statement()?);
        }
    }

    /// Whether the tokens at the cursor read as `Type name`, i.e. a local variable declaration.
    fn looks_like_declaration(&self) -> bool {
        let mut n = 0;
        match self.peek_at(n) {
            Some(Token::Keyword(k)) if PRIMITIVES.contains(k) => n += 1,
            Some(Token::Ident(_)) => {
                n += 1;
                while matches!(self.peek_at(n), Some(Token::Symbol("."))) && matches!(self.peek_at(n + 1), Some(Token::Ident(_))) {
                    n += 2;
                }
                if matches!(self.peek_at(n), Some(Token::Symbol("<"))) {
                    // `List<String> x` and `a < b` are indistinguishable here; both are rejected
                    return true;
                }
            }
            _ => return false,
        }
        while matches!(self.peek_at(n), Some(Token::Symbol("["))) && matches!(self.peek_at(n + 1), Some(Token::Symbol("]"))) {
            n += 2;
        }
        matches!(self.peek_at(n), Some(Token::Ident(_)))
    }

    fn parse_statement(&mut self) -> Result<Stmt, SynthError> {
        let line = self.line();
        match self.peek() {
            Some(Token::Symbol("{")) => return Ok(Stmt::Block(self.parse_block()?)),
            Some(Token::Symbol(";")) => return Err(self.unsupported("empty statement")),
            Some(Token::Symbol("@")) => return Err(self.unsupported("annotation")),
            Some(Token::Keyword("if")) => {
                self.pos += 1;
                self.expect_symbol("(")?;
                let cond = self.parse_expr()?;
                self.expect_symbol(")")?;
                let then = Box::new(self.parse_statement()?);
                let otherwise = if self.eat_keyword("else") {
                    Some(Box::new(self.parse_statement()?))
                } else {
                    None
                };
                return Ok(Stmt::If { cond, then, otherwise, line });
            }
            Some(Token::Keyword("return")) => {
                self.pos += 1;
                let value = if self.is_symbol(";") { None } else { Some(self.parse_expr()?) };
                self.expect_symbol(";")?;
                return Ok(Stmt::Return { value, line });
            }
            Some(Token::Keyword("final")) => {
                self.pos += 1;
                return self.parse_local(line);
            }
            Some(Token::Keyword(
                k @ ("while" | "for" | "do" | "try" | "throw" | "switch" | "break" | "continue" | "synchronized"
                | "assert" | "class" | "interface" | "enum" | "goto" | "const" | "catch" | "finally" | "case"
                | "default"),
            )) => {
                return Err(self.unsupported(&format!("{} statement", k)));
            }
            Some(Token::Keyword("else")) => return Err(SynthError::syntax(line, "'else' without 'if'")),
            _ => {}
        }
        if self.looks_like_declaration() {
            return self.parse_local(line);
        }
        let expr = self.parse_expr()?;
        self.expect_symbol(";")?;
        match expr.kind {
            ExprKind::Call { .. } => Ok(Stmt::Call { expr, line }),
            _ => Err(SynthError::syntax(line, "not a statement")),
        }
    }

    fn parse_local(&mut self, line: usize) -> Result<Stmt, SynthError> {
        let ty = self.parse_type(false)?;
        let name = self.expect_ident()?;
        if self.is_symbol(";") || self.is_symbol(",") {
            return Err(self.unsupported("local variable without initializer"));
        }
        if self.is_symbol("[") {
            return Err(self.unsupported("array declarator after variable name"));
        }
        self.expect_symbol("=")?;
        let init = self.parse_expr()?;
        if self.is_symbol(",") {
            return Err(self.unsupported("multiple variable declarators"));
        }
        self.expect_symbol(";")?;
        Ok(Stmt::Local { ty, name, init, line })
    }

    pub fn parse_expr(&mut self) -> Result<Expr, SynthError> {
        let expr = self.parse_or()?;
        if let Some(Token::Symbol(s)) = self.peek() {
            if let Some((_, construct)) = REJECTED_OPERATORS.iter().find(|(op, _)| op == s) {
                return Err(self.unsupported(construct));
            }
        }
        if self.is_keyword("instanceof") {
            return Err(self.unsupported("instanceof operator"));
        }
        Ok(expr)
    }

    fn parse_binary(
        &mut self,
        ops: &[(&str, BinaryOp)],
        next: fn(&mut Parser) -> Result<Expr, SynthError>,
    ) -> Result<Expr, SynthError> {
        let mut lhs = next(self)?;
        'outer: loop {
            for (symbol, op) in ops {
                if self.is_symbol(symbol) {
                    let line = self.line();
                    self.pos += 1;
                    let rhs = next(self)?;
                    lhs = Expr::new(ExprKind::Binary { op: *op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, line);
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn parse_or(&mut self) -> Result<Expr, SynthError> {
        self.parse_binary(&[("||", BinaryOp::Or)], Parser::parse_and)
    }

    fn parse_and(&mut self) -> Result<Expr, SynthError> {
        self.parse_binary(&[("&&", BinaryOp::And)], Parser::parse_equality)
    }

    fn parse_equality(&mut self) -> Result<Expr, SynthError> {
        self.parse_binary(&[("==", BinaryOp::Eq), ("!=", BinaryOp::Ne)], Parser::parse_relational)
    }

    fn parse_relational(&mut self) -> Result<Expr, SynthError> {
        self.parse_binary(
            &[("<=", BinaryOp::Le), (">=", BinaryOp::Ge), ("<", BinaryOp::Lt), (">", BinaryOp::Gt)],
            Parser::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<Expr, SynthError> {
        self.parse_binary(&[("+", BinaryOp::Add)], Parser::parse_unary)
    }

    fn parse_unary(&mut self) -> Result<Expr, SynthError> {
        let line = self.line();
        match self.peek() {
            Some(Token::Symbol("!")) => {
                self.pos += 1;
                let operand = self.parse_unary()?;
                Ok(Expr::new(ExprKind::Not(Box::new(operand)), line))
            }
            Some(Token::Symbol("-")) => match self.peek_at(1) {
                Some(Token::Int(v)) => {
                    let v = -*v;
                    self.pos += 2;
                    Ok(Expr::new(ExprKind::Literal(Literal::Int(v as i32)), line))
                }
                Some(Token::Long(v)) => {
                    let v = v.wrapping_neg();
                    self.pos += 2;
                    Ok(Expr::new(ExprKind::Literal(Literal::Long(v)), line))
                }
                _ => Err(self.unsupported("arithmetic negation")),
            },
            Some(Token::Symbol("+")) => Err(self.unsupported("unary plus")),
            Some(Token::Symbol("~")) => Err(self.unsupported("bitwise complement")),
            Some(Token::Symbol("++")) => Err(self.unsupported("increment operator")),
            Some(Token::Symbol("--")) => Err(self.unsupported("decrement operator")),
            Some(Token::Symbol("(")) if self.looks_like_cast() => {
                self.pos += 1;
                let ty = self.parse_type(false)?;
                self.expect_symbol(")")?;
                let operand = self.parse_unary()?;
                Ok(Expr::new(ExprKind::Cast { ty, expr: Box::new(operand) }, line))
            }
            _ => self.parse_postfix(),
        }
    }

    /// At a `(`: decides between a cast and a parenthesized expression.
    fn looks_like_cast(&self) -> bool {
        let mut n = 1;
        match self.peek_at(n) {
            Some(Token::Keyword(k)) if PRIMITIVES.contains(k) => return true,
            Some(Token::Ident(_)) => n += 1,
            _ => return false,
        }
        while matches!(self.peek_at(n), Some(Token::Symbol("."))) && matches!(self.peek_at(n + 1), Some(Token::Ident(_))) {
            n += 2;
        }
        while matches!(self.peek_at(n), Some(Token::Symbol("["))) && matches!(self.peek_at(n + 1), Some(Token::Symbol("]"))) {
            n += 2;
        }
        if !matches!(self.peek_at(n), Some(Token::Symbol(")"))) {
            return false;
        }
        matches!(
            self.peek_at(n + 1),
            Some(Token::Ident(_))
                | Some(Token::Int(_))
                | Some(Token::Long(_))
                | Some(Token::Char(_))
                | Some(Token::Str(_))
                | Some(Token::Float(_))
                | Some(Token::Keyword("this" | "true" | "false" | "null" | "new" | "super"))
                | Some(Token::Symbol("(" | "!"))
        )
    }

    fn parse_postfix(&mut self) -> Result<Expr, SynthError> {
        let mut expr = self.parse_primary()?;
        while self.is_symbol(".") {
            let line = self.line();
            self.pos += 1;
            match self.peek() {
                Some(Token::Ident(_)) => {}
                Some(Token::Keyword("new")) => return Err(self.unsupported("inner class creation")),
                Some(Token::Keyword("class")) => return Err(self.unsupported("class literal")),
                Some(Token::Keyword("this")) => return Err(self.unsupported("qualified this")),
                Some(Token::Keyword("super")) => return Err(self.unsupported("qualified super")),
                Some(Token::Symbol("<")) => return Err(self.unsupported("explicit type arguments")),
                _ => return Err(SynthError::syntax(self.line(), &format!("<identifier> expected{}", self.found()))),
            }
            let name = self.expect_ident()?;
            expr = if self.is_symbol("(") {
                let args = self.parse_args()?;
                Expr::new(ExprKind::Call { target: Some(Box::new(expr)), name, args }, line)
            } else {
                Expr::new(ExprKind::Field { target: Box::new(expr), name }, line)
            };
        }
        Ok(expr)
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, SynthError> {
        self.expect_symbol("(")?;
        let mut args = vec![];
        if self.eat_symbol(")") {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if self.eat_symbol(")") {
                return Ok(args);
            }
            self.expect_symbol(",")?;
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, SynthError> {
        let line = self.line();
        let literal = |l| Ok(Expr::new(ExprKind::Literal(l), line));
        let token = match self.peek() {
            Some(t) => t.clone(),
            None => return Err(SynthError::syntax(line, "reached end of input while parsing")),
        };
        match token {
            Token::Int(v) => {
                self.pos += 1;
                if v > i32::MAX as i64 {
                    return Err(SynthError::syntax(line, "integer number too large"));
                }
                literal(Literal::Int(v as i32))
            }
            Token::Long(v) => {
                self.pos += 1;
                if v == i64::MIN {
                    return Err(SynthError::syntax(line, "integer number too large"));
                }
                literal(Literal::Long(v))
            }
            Token::Char(c) => {
                self.pos += 1;
                literal(Literal::Char(c))
            }
            Token::Str(s) => {
                self.pos += 1;
                literal(Literal::Str(s))
            }
            Token::Float(_) => Err(self.unsupported("floating point literal")),
            Token::Keyword("true") => {
                self.pos += 1;
                literal(Literal::Bool(true))
            }
            Token::Keyword("false") => {
                self.pos += 1;
                literal(Literal::Bool(false))
            }
            Token::Keyword("null") => {
                self.pos += 1;
                literal(Literal::Null)
            }
            Token::Keyword("this") => {
                self.pos += 1;
                if self.is_symbol("(") {
                    return Err(self.unsupported("constructor invocation"));
                }
                Ok(Expr::new(ExprKind::This, line))
            }
            Token::Keyword("super") => Err(self.unsupported("super reference")),
            Token::Keyword("new") => Err(self.unsupported("object creation")),
            Token::Keyword("switch") => Err(self.unsupported("switch expression")),
            Token::Keyword(k) if PRIMITIVES.contains(&k) => Err(self.unsupported("class literal")),
            Token::Ident(name) => {
                self.pos += 1;
                if self.is_symbol("(") {
                    let args = self.parse_args()?;
                    Ok(Expr::new(ExprKind::Call { target: None, name, args }, line))
                } else {
                    Ok(Expr::new(ExprKind::Name(name), line))
                }
            }
            Token::Symbol("(") => {
                self.pos += 1;
                let expr = self.parse_expr()?;
                self.expect_symbol(")")?;
                Ok(expr)
            }
            Token::Symbol("{") => Err(self.unsupported("array initializer")),
            _ => Err(SynthError::syntax(line, &format!("illegal start of expression{}", self.found()))),
        }
    }
}

/// Parses a complete method declaration.
pub fn parse_method(tokens: Vec<Spanned>) -> Result<MethodDecl, SynthError> {
    Parser::new(tokens).parse_method()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::lexer::tokenize;

    fn method(source: &str) -> Result<MethodDecl, SynthError> {
        parse_method(tokenize(source)?)
    }

    fn body_expr(expr: &str) -> Result<Expr, SynthError> {
        let m = method(&format!("Object f() {{ return {}; }}", expr))?;
        match &m.body.stmts[0] {
            Stmt::Return { value: Some(e), .. } => Ok(e.clone()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn method_header() {
        let m = method("public final java.lang.String name(final int a, String[] b) { return null; }").unwrap();
        assert_eq!(m.modifiers, vec!["public", "final"]);
        assert_eq!(m.return_type.name, "java.lang.String");
        assert_eq!(m.params.len(), 2);
        assert_eq!(m.params[1].ty, TypeName { name: "String".into(), dims: 1, line: 1 });
    }

    #[test]
    fn precedence() {
        let e = body_expr("a || b && c == d").unwrap();
        match e.kind {
            ExprKind::Binary { op: BinaryOp::Or, rhs, .. } => {
                assert!(matches!(rhs.kind, ExprKind::Binary { op: BinaryOp::And, .. }))
            }
            other => panic!("unexpected {:?}", other),
        }
        let e = body_expr("\"a\" + 1 + x.y()").unwrap();
        match e.kind {
            ExprKind::Binary { op: BinaryOp::Add, lhs, .. } => {
                assert!(matches!(lhs.kind, ExprKind::Binary { op: BinaryOp::Add, .. }))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn casts_and_parentheses() {
        let e = body_expr("(CharSequence) readField(node, \"value\")").unwrap();
        assert!(matches!(e.kind, ExprKind::Cast { .. }));
        let e = body_expr("(a) + b").unwrap();
        assert!(matches!(e.kind, ExprKind::Binary { .. }));
        let e = body_expr("(int) 'c'").unwrap();
        assert!(matches!(e.kind, ExprKind::Cast { .. }));
        assert_eq!(body_expr("-2147483648").unwrap().kind, ExprKind::Literal(Literal::Int(i32::MIN)));
    }

    #[test]
    fn dotted_chains() {
        let e = body_expr("android.os.Build.MANUFACTURER.contains(\"x\")").unwrap();
        match e.kind {
            ExprKind::Call { target: Some(target), name, args } => {
                assert_eq!(name, "contains");
                assert_eq!(args.len(), 1);
                assert_eq!(target.dotted_name().as_deref(), Some("android.os.Build.MANUFACTURER"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn statements() {
        let m = method("void f() { int x = 1; if (x == 1) { g(); } else return; { h(); } }").unwrap();
        assert_eq!(m.body.stmts.len(), 3);
        assert!(matches!(m.body.stmts[1], Stmt::If { otherwise: Some(_), .. }));
    }

    #[test]
    fn unsupported_constructs() {
        let cases = [
            "void f() { while (true) { } }",
            "void f() { for (;;) { } }",
            "void f() { x = 1; }",
            "void f() { x++; }",
            "void f() { Object o = new Object(); }",
            "void f() { int x = a * 2; }",
            "void f() { int x = a ? 1 : 2; }",
            "void f() { int x = a[0]; }",
            "void f() { try { g(); } catch (Exception e) { } }",
            "void f() { throw e; }",
            "void f() throws Exception { }",
            "void f() { java.util.List<String> l = g(); }",
            "void f() { double d = 1.5; }",
            "void f() { int x; }",
            "abstract void f();",
        ];
        for case in cases {
            match method(case) {
                Err(SynthError::Unsupported { .. }) => {}
                other => panic!("{}: unexpected {:?}", case, other),
            }
        }
    }

    #[test]
    fn syntax_errors() {
        let cases = ["void f() { g() }", "void f() { 1; }", "void f() {", "void f() { return 2147483648; }", "void f() {} x"];
        for case in cases {
            match method(case) {
                Err(SynthError::Syntax { .. }) => {}
                other => panic!("{}: unexpected {:?}", case, other),
            }
        }
    }
}
