/* Syntax tree of a synthesized method */

/// A type as written in source: a primitive keyword, `void`, or a possibly dotted name,
/// followed by `dims` pairs of brackets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeName {
    pub name: String,
    pub dims: usize,
    pub line: usize,
}

impl TypeName {
    pub fn is_void(&self) -> bool {
        self.name == "void" && self.dims == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub ty: TypeName,
    pub name: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDecl {
    pub modifiers: Vec<&'static str>,
    pub return_type: TypeName,
    pub name: String,
    pub params: Vec<Param>,
    pub body: Block,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    /// Line of the closing brace.
    pub end_line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    Local { ty: TypeName, name: String, init: Expr, line: usize },
    If { cond: Expr, then: Box<Stmt>, otherwise: Option<Box<Stmt>>, line: usize },
    Return { value: Option<Expr>, line: usize },
    Call { expr: Expr, line: usize },
    Block(Block),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Int(i32),
    Long(i64),
    Bool(bool),
    Char(u16),
    Str(String),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprKind {
    Literal(Literal),
    This,
    /// A bare identifier: a local, a field of the enclosing class, a class or a package prefix.
    Name(String),
    Field { target: Box<Expr>, name: String },
    Call { target: Option<Box<Expr>>, name: String, args: Vec<Expr> },
    Not(Box<Expr>),
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Cast { ty: TypeName, expr: Box<Expr> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: usize,
}

impl Expr {
    pub fn new(kind: ExprKind, line: usize) -> Expr {
        Expr { kind, line }
    }

    /// Reassembles a chain of bare names and field accesses (`android.os.Build`) into its
    /// dotted form.
    pub fn dotted_name(&self) -> Option<String> {
        match &self.kind {
            ExprKind::Name(n) => Some(n.clone()),
            ExprKind::Field { target, name } => target.dotted_name().map(|t| format!("{t}.{name}")),
            _ => None,
        }
    }
}
