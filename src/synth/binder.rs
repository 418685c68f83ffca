/* Name resolution and type checking: syntax tree in, typed tree out */

use crate::class::{AccessFlags, FieldType, InvokeKind, MethodDescriptor};
use crate::classpath::{ClassDescriptor, ResolvedMethod, Resolver};
use crate::synth::ast::{BinaryOp, Block, Expr, ExprKind, Literal, MethodDecl, Stmt, TypeName};
use crate::synth::SynthError;
use std::rc::Rc;

const OBJECT: &str = "java/lang/Object";
const STRING: &str = "java/lang/String";

/// Name of the intrinsic that reads a possibly private field through reflection.
pub const READ_FIELD: &str = "readField";

/// Static type of a bound expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    Void,
    Null,
    Of(FieldType),
}

impl ValueType {
    fn describe(&self) -> String {
        match self {
            ValueType::Void => "void".to_string(),
            ValueType::Null => "<null>".to_string(),
            ValueType::Of(t) => t.java_name(),
        }
    }

    fn field_type(&self) -> Option<&FieldType> {
        match self {
            ValueType::Of(t) => Some(t),
            _ => None,
        }
    }

    fn is_string(&self) -> bool {
        matches!(self, ValueType::Of(t) if t.is_string())
    }

    fn is_boolean(&self) -> bool {
        matches!(self, ValueType::Of(FieldType::Boolean))
    }

    /// Primitive and usable in arithmetic or ordering comparisons.
    fn is_numeric(&self) -> bool {
        matches!(self, ValueType::Of(t) if !t.is_reference() && *t != FieldType::Boolean)
    }

    fn is_reference(&self) -> bool {
        match self {
            ValueType::Null => true,
            ValueType::Of(t) => t.is_reference(),
            ValueType::Void => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub kind: InvokeKind,
    /// Evaluated and then discarded when `kind` is static.
    pub receiver: Option<TExpr>,
    pub owner: String,
    pub interface_owner: bool,
    pub name: String,
    pub descriptor: MethodDescriptor,
    pub args: Vec<TExpr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TExpr {
    /// Any `int`-like constant, booleans and chars included.
    Int(i32),
    Long(i64),
    Str(String),
    Null,
    Local { slot: u16, ty: FieldType },
    GetField { receiver: Box<TExpr>, owner: String, name: String, ty: FieldType },
    GetStatic { owner: String, name: String, ty: FieldType },
    Invoke(Box<Invocation>),
    CheckCast { class: String, expr: Box<TExpr> },
    Widen { from: FieldType, to: FieldType, expr: Box<TExpr> },
    Add { ty: FieldType, lhs: Box<TExpr>, rhs: Box<TExpr> },
    /// String concatenation; each part carries the parameter type of the `append` that takes it.
    Concat(Vec<(TExpr, FieldType)>),
    /// A boolean computed by control flow.
    Condition(Box<Cond>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn from_op(op: BinaryOp) -> Option<Comparison> {
        Some(match op {
            BinaryOp::Eq => Comparison::Eq,
            BinaryOp::Ne => Comparison::Ne,
            BinaryOp::Lt => Comparison::Lt,
            BinaryOp::Le => Comparison::Le,
            BinaryOp::Gt => Comparison::Gt,
            BinaryOp::Ge => Comparison::Ge,
            _ => return None,
        })
    }

    pub fn negate(self) -> Comparison {
        match self {
            Comparison::Eq => Comparison::Ne,
            Comparison::Ne => Comparison::Eq,
            Comparison::Lt => Comparison::Ge,
            Comparison::Le => Comparison::Gt,
            Comparison::Gt => Comparison::Le,
            Comparison::Ge => Comparison::Lt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cond {
    Const(bool),
    /// A `boolean` value, true when non-zero.
    Value(TExpr),
    Not(Box<Cond>),
    And(Box<Cond>, Box<Cond>),
    Or(Box<Cond>, Box<Cond>),
    ICmp(Comparison, TExpr, TExpr),
    LCmp(Comparison, TExpr, TExpr),
    RefEq { equal: bool, lhs: TExpr, rhs: TExpr },
    NullCheck { is_null: bool, expr: TExpr },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TStmt {
    Store { slot: u16, ty: FieldType, value: TExpr },
    /// `slot = (cast) target.getClass().getDeclaredField(field)` made accessible and read,
    /// leaving `null` in the slot if anything throws.
    ReadField { slot: u16, ty: FieldType, target: TExpr, field: String, cast: Option<String> },
    If { cond: Cond, then: Vec<TStmt>, otherwise: Option<Vec<TStmt>> },
    Return(Option<(TExpr, FieldType)>),
    /// An expression evaluated for its side effects; a value it leaves is popped.
    Discard { expr: TExpr, has_value: bool },
    Block(Vec<TStmt>),
}

/// A fully bound method, ready for code generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundMethod {
    pub access_flags: AccessFlags,
    pub name: String,
    pub descriptor: MethodDescriptor,
    pub body: Vec<TStmt>,
    /// The body can complete normally, which only a `void` method may do.
    pub falls_through: bool,
}

impl BoundMethod {
    pub fn is_static(&self) -> bool {
        self.access_flags.is_static()
    }
}

#[derive(Debug, Clone)]
struct Typed {
    expr: TExpr,
    ty: ValueType,
}

impl Typed {
    fn new(expr: TExpr, ty: ValueType) -> Typed {
        Typed { expr, ty }
    }

    fn of(expr: TExpr, ty: FieldType) -> Typed {
        Typed { expr, ty: ValueType::Of(ty) }
    }
}

/// What a name (or a dotted chain of names) turned out to denote.
enum Target {
    Value(Typed),
    Class(String),
    /// Internal form, `android/os`.
    Package(String),
}

struct LocalVar {
    name: String,
    slot: u16,
    ty: FieldType,
}

struct Scope {
    vars: Vec<LocalVar>,
    first_slot: u16,
}

struct Binder<'a> {
    resolver: &'a mut Resolver,
    imports: &'a [String],
    this_class: Rc<ClassDescriptor>,
    is_static: bool,
    return_type: Option<FieldType>,
    scopes: Vec<Scope>,
    next_slot: u16,
}

/// Resolves every name in `decl` and checks its types, in the context of `this_class`.
pub fn bind_method(
    decl: &MethodDecl,
    this_class: Rc<ClassDescriptor>,
    resolver: &mut Resolver,
    imports: &[String],
) -> Result<BoundMethod, SynthError> {
    let mut access_flags = AccessFlags::empty();
    for m in &decl.modifiers {
        let flag = AccessFlags::from_modifier(m)
            .ok_or_else(|| SynthError::unsupported(decl.line, &format!("modifier {}", m)))?;
        if access_flags.contains(flag) {
            return Err(SynthError::syntax(decl.line, &format!("repeated modifier {}", m)));
        }
        access_flags |= flag;
    }
    let visibility = access_flags & (AccessFlags::PUBLIC | AccessFlags::PROTECTED | AccessFlags::PRIVATE);
    if visibility.bits().count_ones() > 1 {
        return Err(SynthError::syntax(decl.line, "illegal combination of modifiers"));
    }

    let is_static = access_flags.is_static();
    let mut binder = Binder {
        resolver,
        imports,
        this_class,
        is_static,
        return_type: None,
        scopes: vec![Scope { vars: vec![], first_slot: 0 }],
        next_slot: if is_static { 0 } else { 1 },
    };

    if !decl.return_type.is_void() {
        binder.return_type = Some(binder.resolve_type(&decl.return_type)?);
    }
    let mut params = vec![];
    for p in &decl.params {
        let ty = binder.resolve_type(&p.ty)?;
        binder.declare(&p.name, ty.clone(), p.line)?;
        params.push(ty);
    }
    let descriptor = MethodDescriptor { params, ret: binder.return_type.clone() };

    let (body, falls_through) = binder.bind_block(&decl.body)?;
    if falls_through && binder.return_type.is_some() {
        return Err(SynthError::syntax(decl.body.end_line, "missing return statement"));
    }

    Ok(BoundMethod { access_flags, name: decl.name.clone(), descriptor, body, falls_through })
}

impl<'a> Binder<'a> {
    fn this_name(&self) -> &str {
        &self.this_class.name
    }

    fn this_expr(&self, line: usize) -> Result<Typed, SynthError> {
        if self.is_static {
            return Err(SynthError::type_error(line, "non-static variable this cannot be referenced from a static context"));
        }
        let ty = FieldType::object(self.this_name());
        Ok(Typed::of(TExpr::Local { slot: 0, ty: ty.clone() }, ty))
    }

    // -- scopes

    fn enter_scope(&mut self) {
        self.scopes.push(Scope { vars: vec![], first_slot: self.next_slot });
    }

    fn exit_scope(&mut self) {
        if let Some(scope) = self.scopes.pop() {
            self.next_slot = scope.first_slot;
        }
    }

    fn lookup_local(&self, name: &str) -> Option<&LocalVar> {
        self.scopes.iter().rev().flat_map(|s| s.vars.iter()).find(|v| v.name == name)
    }

    fn declare(&mut self, name: &str, ty: FieldType, line: usize) -> Result<u16, SynthError> {
        if self.lookup_local(name).is_some() {
            return Err(SynthError::type_error(line, &format!("variable {} is already defined in method", name)));
        }
        let slot = self.next_slot;
        self.next_slot = slot
            .checked_add(ty.slots())
            .ok_or_else(|| SynthError::type_error(line, "too many local variables"))?;
        if let Some(scope) = self.scopes.last_mut() {
            scope.vars.push(LocalVar { name: name.to_string(), slot, ty });
        }
        Ok(slot)
    }

    // -- class and type names

    /// Tries `a/b/C`, then `a/b$C`, then `a$b$C`: a dotted name may end in nested classes.
    fn resolve_dotted_class(&mut self, dotted: &str) -> Result<Option<String>, SynthError> {
        let mut internal = dotted.replace('.', "/");
        loop {
            if self.resolver.try_resolve(&internal)?.is_some() {
                return Ok(Some(internal));
            }
            match internal.rfind('/') {
                Some(ix) => internal.replace_range(ix..ix + 1, "$"),
                None => return Ok(None),
            }
        }
    }

    /// Finds the class a simple name refers to: the enclosing class or one of its member
    /// classes, a single-class import, the enclosing package, an imported package, `java.lang`.
    fn lookup_class(&mut self, name: &str) -> Result<Option<String>, SynthError> {
        let this = self.this_class.name.clone();
        let simple = this.rsplit(['/', '$']).next().unwrap_or(&this);
        if simple == name {
            return Ok(Some(this));
        }
        let member = format!("{}${}", this, name);
        if self.resolver.try_resolve(&member)?.is_some() {
            return Ok(Some(member));
        }

        let imports = self.imports;
        for import in imports.iter().filter(|i| !i.ends_with(".*")) {
            if import.rsplit('.').next() == Some(name) {
                return match self.resolve_dotted_class(import)? {
                    Some(class) => Ok(Some(class)),
                    None => Err(crate::classpath::ResolveError::NotFound(import.replace('.', "/")).into()),
                };
            }
        }

        let own = match self.this_class.package() {
            "" => name.to_string(),
            package => format!("{}/{}", package, name),
        };
        if self.resolver.try_resolve(&own)?.is_some() {
            return Ok(Some(own));
        }

        for import in imports {
            let package = import.strip_suffix(".*").unwrap_or(import);
            if let Some(class) = self.resolve_dotted_class(&format!("{}.{}", package, name))? {
                return Ok(Some(class));
            }
        }

        let lang = format!("java/lang/{}", name);
        if self.resolver.try_resolve(&lang)?.is_some() {
            return Ok(Some(lang));
        }
        Ok(None)
    }

    fn class_type_name(&mut self, dotted: &str, line: usize) -> Result<String, SynthError> {
        let mut segments = dotted.split('.');
        let first = segments.next().unwrap_or_default();
        if let Some(mut class) = self.lookup_class(first)? {
            for nested in segments {
                class = format!("{}${}", class, nested);
                if self.resolver.try_resolve(&class)?.is_none() {
                    return Err(SynthError::type_error(line, &format!("cannot find symbol: class {}", dotted)));
                }
            }
            return Ok(class);
        }
        if dotted.contains('.') {
            if let Some(class) = self.resolve_dotted_class(dotted)? {
                return Ok(class);
            }
        }
        Err(SynthError::type_error(line, &format!("cannot find symbol: class {}", dotted)))
    }

    fn resolve_type(&mut self, ty: &TypeName) -> Result<FieldType, SynthError> {
        let mut t = match ty.name.as_str() {
            "boolean" => FieldType::Boolean,
            "byte" => FieldType::Byte,
            "char" => FieldType::Char,
            "short" => FieldType::Short,
            "int" => FieldType::Int,
            "long" => FieldType::Long,
            "float" => FieldType::Float,
            "double" => FieldType::Double,
            "void" => return Err(SynthError::syntax(ty.line, "'void' type not allowed here")),
            name => FieldType::Object(self.class_type_name(name, ty.line)?),
        };
        for _ in 0..ty.dims {
            t = FieldType::Array(Box::new(t));
        }
        Ok(t)
    }

    // -- statements

    /// Binds a block in its own scope. The flag is whether it can complete normally.
    fn bind_block(&mut self, block: &Block) -> Result<(Vec<TStmt>, bool), SynthError> {
        self.enter_scope();
        let result = self.bind_statements(&block.stmts);
        self.exit_scope();
        result
    }

    fn bind_statements(&mut self, stmts: &[Stmt]) -> Result<(Vec<TStmt>, bool), SynthError> {
        let mut bound = vec![];
        let mut completes = true;
        for stmt in stmts {
            if !completes {
                return Err(SynthError::syntax(stmt_line(stmt), "unreachable statement"));
            }
            let (s, c) = self.bind_statement(stmt)?;
            bound.push(s);
            completes = c;
        }
        Ok((bound, completes))
    }

    /// The branch of an `if` is a scope of its own even when it is not a block.
    fn bind_branch(&mut self, stmt: &Stmt) -> Result<(Vec<TStmt>, bool), SynthError> {
        match stmt {
            Stmt::Block(block) => self.bind_block(block),
            Stmt::Local { line, .. } => Err(SynthError::syntax(*line, "variable declaration not allowed here")),
            other => {
                self.enter_scope();
                let result = self.bind_statement(other);
                self.exit_scope();
                let (s, c) = result?;
                Ok((vec![s], c))
            }
        }
    }

    fn bind_statement(&mut self, stmt: &Stmt) -> Result<(TStmt, bool), SynthError> {
        match stmt {
            Stmt::Local { ty, name, init, line } => {
                let declared = self.resolve_type(ty)?;
                if let Some(read) = read_field_call(init) {
                    let s = self.bind_read_field(&declared, name, read, *line)?;
                    return Ok((s, true));
                }
                let value = self.bind_value(init)?;
                let value = self.assign(value, &declared, init.line)?;
                let slot = self.declare(name, declared.clone(), *line)?;
                Ok((TStmt::Store { slot, ty: declared, value }, true))
            }
            Stmt::If { cond, then, otherwise, .. } => {
                let cond = self.bind_cond(cond)?;
                let (then, then_completes) = self.bind_branch(then)?;
                let (otherwise, completes) = match otherwise {
                    Some(o) => {
                        let (o, c) = self.bind_branch(o)?;
                        (Some(o), then_completes || c)
                    }
                    None => (None, true),
                };
                Ok((TStmt::If { cond, then, otherwise }, completes))
            }
            Stmt::Return { value, line } => {
                let ret = self.return_type.clone();
                let bound = match (value, ret) {
                    (None, None) => None,
                    (Some(_), None) => {
                        return Err(SynthError::type_error(*line, "incompatible types: unexpected return value"))
                    }
                    (None, Some(_)) => return Err(SynthError::type_error(*line, "missing return value")),
                    (Some(v), Some(t)) => {
                        let value = self.bind_value(v)?;
                        Some((self.assign(value, &t, v.line)?, t))
                    }
                };
                Ok((TStmt::Return(bound), false))
            }
            Stmt::Call { expr, .. } => {
                if let ExprKind::Call { target: None, name, .. } = &expr.kind {
                    if name == READ_FIELD {
                        return Err(read_field_misplaced(expr.line));
                    }
                }
                let value = self.bind_value(expr)?;
                let has_value = value.ty != ValueType::Void;
                Ok((TStmt::Discard { expr: value.expr, has_value }, true))
            }
            Stmt::Block(block) => {
                let (stmts, completes) = self.bind_block(block)?;
                Ok((TStmt::Block(stmts), completes))
            }
        }
    }

    fn bind_read_field(
        &mut self,
        declared: &FieldType,
        name: &str,
        (cast, args, line): (Option<&TypeName>, &[Expr], usize),
        decl_line: usize,
    ) -> Result<TStmt, SynthError> {
        if args.len() != 2 {
            return Err(SynthError::type_error(line, "readField takes an object and a field name"));
        }
        let target = self.bind_value(&args[0])?;
        if !matches!(target.ty, ValueType::Of(ref t) if t.is_reference()) {
            return Err(SynthError::type_error(
                args[0].line,
                &format!("readField cannot read from a value of type {}", target.ty.describe()),
            ));
        }
        let field = match &args[1].kind {
            ExprKind::Literal(Literal::Str(s)) => s.clone(),
            _ => return Err(SynthError::type_error(args[1].line, "readField expects a string literal field name")),
        };
        if !declared.is_reference() {
            return Err(SynthError::type_error(
                decl_line,
                &format!("incompatible types: Object cannot be converted to {}", declared.java_name()),
            ));
        }

        let produced = match cast {
            Some(c) => {
                let t = self.resolve_type(c)?;
                if !t.is_reference() {
                    return Err(SynthError::unsupported(c.line, "unboxing conversion"));
                }
                t
            }
            None => FieldType::object(OBJECT),
        };
        if !self.resolver.is_assignable(&produced, declared)? {
            return Err(SynthError::type_error(
                decl_line,
                &format!("incompatible types: {} cannot be converted to {}", produced.java_name(), declared.java_name()),
            ));
        }

        self.require_method(OBJECT, "getClass", "()Ljava/lang/Class;", line)?;
        self.require_method("java/lang/Class", "getDeclaredField", "(Ljava/lang/String;)Ljava/lang/reflect/Field;", line)?;
        self.require_method("java/lang/reflect/Field", "setAccessible", "(Z)V", line)?;
        self.require_method("java/lang/reflect/Field", "get", "(Ljava/lang/Object;)Ljava/lang/Object;", line)?;
        self.resolver.resolve("java/lang/Exception")?;

        let slot = self.declare(name, declared.clone(), decl_line)?;
        let cast = match produced {
            FieldType::Object(ref c) if c == OBJECT => None,
            other => other.class_name(),
        };
        Ok(TStmt::ReadField { slot, ty: declared.clone(), target: target.expr, field, cast })
    }

    fn require_method(&mut self, owner: &str, name: &str, descriptor: &str, line: usize) -> Result<(), SynthError> {
        let found = self.resolver.find_methods(owner, name)?;
        if found.iter().any(|m| m.method.descriptor == descriptor) {
            Ok(())
        } else {
            Err(SynthError::type_error(
                line,
                &format!("cannot find symbol: method {}{} in {}", name, descriptor, owner.replace('/', ".")),
            ))
        }
    }

    // -- conversions

    /// Assignment conversion of `value` to `to`: identity, widening, or narrowing of an int
    /// constant that fits.
    fn assign(&mut self, value: Typed, to: &FieldType, line: usize) -> Result<TExpr, SynthError> {
        let from = match value.ty {
            ValueType::Void => return Err(SynthError::type_error(line, "'void' type not allowed here")),
            ValueType::Null if to.is_reference() => return Ok(TExpr::Null),
            ValueType::Null => {
                return Err(SynthError::type_error(
                    line,
                    &format!("incompatible types: <null> cannot be converted to {}", to.java_name()),
                ))
            }
            ValueType::Of(t) => t,
        };
        if from == *to {
            return Ok(value.expr);
        }
        if let TExpr::Int(v) = value.expr {
            let fits = match to {
                FieldType::Byte => i8::try_from(v).is_ok(),
                FieldType::Short => i16::try_from(v).is_ok(),
                FieldType::Char => u16::try_from(v).is_ok(),
                _ => false,
            };
            if fits && from.is_int_like() && from != FieldType::Boolean {
                return Ok(TExpr::Int(v));
            }
        }
        if self.resolver.is_assignable(&from, to)? {
            return Ok(widen(value.expr, &from, to));
        }
        let message = if !from.is_reference() && !to.is_reference() && from != FieldType::Boolean && *to != FieldType::Boolean {
            format!("incompatible types: possible lossy conversion from {} to {}", from.java_name(), to.java_name())
        } else {
            format!("incompatible types: {} cannot be converted to {}", from.java_name(), to.java_name())
        };
        Err(SynthError::type_error(line, &message))
    }

    fn accepts(&mut self, arg: &ValueType, param: &FieldType) -> Result<bool, SynthError> {
        Ok(match arg {
            ValueType::Void => false,
            ValueType::Null => param.is_reference(),
            ValueType::Of(t) => self.resolver.is_assignable(t, param)?,
        })
    }

    // -- expressions

    fn bind_value(&mut self, expr: &Expr) -> Result<Typed, SynthError> {
        match self.classify(expr)? {
            Target::Value(v) => Ok(v),
            Target::Class(_) | Target::Package(_) => Err(SynthError::type_error(
                expr.line,
                &format!("cannot find symbol: variable {}", expr.dotted_name().unwrap_or_default()),
            )),
        }
    }

    fn classify(&mut self, expr: &Expr) -> Result<Target, SynthError> {
        let line = expr.line;
        match &expr.kind {
            ExprKind::Name(name) => {
                if let Some(local) = self.lookup_local(name) {
                    let ty = local.ty.clone();
                    return Ok(Target::Value(Typed::of(TExpr::Local { slot: local.slot, ty: ty.clone() }, ty)));
                }
                let this = self.this_name().to_string();
                if let Some(found) = self.resolver.find_field(&this, name)? {
                    let ty = FieldType::from_descriptor(&found.field.descriptor)?;
                    if found.field.access_flags.is_static() {
                        return Ok(Target::Value(Typed::of(
                            TExpr::GetStatic { owner: this, name: name.clone(), ty: ty.clone() },
                            ty,
                        )));
                    }
                    if self.is_static {
                        return Err(SynthError::type_error(
                            line,
                            &format!("non-static variable {} cannot be referenced from a static context", name),
                        ));
                    }
                    let receiver = self.this_expr(line)?.expr;
                    return Ok(Target::Value(Typed::of(
                        TExpr::GetField { receiver: Box::new(receiver), owner: this, name: name.clone(), ty: ty.clone() },
                        ty,
                    )));
                }
                match self.lookup_class(name)? {
                    Some(class) => Ok(Target::Class(class)),
                    None => Ok(Target::Package(name.clone())),
                }
            }
            ExprKind::Field { target, name } => match self.classify(target)? {
                Target::Value(v) => Ok(Target::Value(self.instance_field(v, name, line)?)),
                Target::Class(class) => self.static_member(&class, name, line),
                Target::Package(package) => {
                    let candidate = format!("{}/{}", package, name);
                    if self.resolver.try_resolve(&candidate)?.is_some() {
                        Ok(Target::Class(candidate))
                    } else {
                        Ok(Target::Package(candidate))
                    }
                }
            },
            _ => Ok(Target::Value(self.bind_expr(expr)?)),
        }
    }

    fn instance_field(&mut self, value: Typed, name: &str, line: usize) -> Result<Typed, SynthError> {
        let class = match &value.ty {
            ValueType::Of(FieldType::Object(c)) => c.clone(),
            ValueType::Of(FieldType::Array(_)) if name == "length" => {
                return Err(SynthError::unsupported(line, "array length"))
            }
            other => {
                return Err(SynthError::type_error(line, &format!("{} cannot be dereferenced", other.describe())))
            }
        };
        match self.resolver.find_field(&class, name)? {
            Some(found) if found.field.access_flags.is_static() => {
                Err(SynthError::unsupported(line, "static field accessed through an instance"))
            }
            Some(found) => {
                let ty = FieldType::from_descriptor(&found.field.descriptor)?;
                Ok(Typed::of(
                    TExpr::GetField { receiver: Box::new(value.expr), owner: class, name: name.to_string(), ty: ty.clone() },
                    ty,
                ))
            }
            None => Err(SynthError::type_error(
                line,
                &format!("cannot find symbol: variable {} in {}", name, class.replace('/', ".")),
            )),
        }
    }

    fn static_member(&mut self, class: &str, name: &str, line: usize) -> Result<Target, SynthError> {
        if let Some(found) = self.resolver.find_field(class, name)? {
            if !found.field.access_flags.is_static() {
                return Err(SynthError::type_error(
                    line,
                    &format!("non-static variable {} cannot be referenced from a static context", name),
                ));
            }
            let ty = FieldType::from_descriptor(&found.field.descriptor)?;
            return Ok(Target::Value(Typed::of(
                TExpr::GetStatic { owner: class.to_string(), name: name.to_string(), ty: ty.clone() },
                ty,
            )));
        }
        let nested = format!("{}${}", class, name);
        if self.resolver.try_resolve(&nested)?.is_some() {
            return Ok(Target::Class(nested));
        }
        Err(SynthError::type_error(
            line,
            &format!("cannot find symbol: variable {} in {}", name, class.replace('/', ".")),
        ))
    }

    fn bind_expr(&mut self, expr: &Expr) -> Result<Typed, SynthError> {
        let line = expr.line;
        match &expr.kind {
            ExprKind::Literal(literal) => Ok(match literal {
                Literal::Int(v) => Typed::of(TExpr::Int(*v), FieldType::Int),
                Literal::Long(v) => Typed::of(TExpr::Long(*v), FieldType::Long),
                Literal::Bool(b) => Typed::of(TExpr::Int(*b as i32), FieldType::Boolean),
                Literal::Char(c) => Typed::of(TExpr::Int(*c as i32), FieldType::Char),
                Literal::Str(s) => Typed::of(TExpr::Str(s.clone()), FieldType::object(STRING)),
                Literal::Null => Typed::new(TExpr::Null, ValueType::Null),
            }),
            ExprKind::This => self.this_expr(line),
            ExprKind::Name(_) | ExprKind::Field { .. } => self.bind_value(expr),
            ExprKind::Call { target, name, args } => self.bind_call(target.as_deref(), name, args, line),
            ExprKind::Not(_) | ExprKind::Binary { op: BinaryOp::Or | BinaryOp::And, .. } => {
                let cond = self.bind_cond(expr)?;
                Ok(Typed::of(TExpr::Condition(Box::new(cond)), FieldType::Boolean))
            }
            ExprKind::Binary { op: BinaryOp::Add, lhs, rhs } => self.bind_add(lhs, rhs, line),
            ExprKind::Binary { .. } => {
                let cond = self.bind_cond(expr)?;
                Ok(Typed::of(TExpr::Condition(Box::new(cond)), FieldType::Boolean))
            }
            ExprKind::Cast { ty, expr: inner } => self.bind_cast(ty, inner, line),
        }
    }

    fn bind_add(&mut self, lhs: &Expr, rhs: &Expr, line: usize) -> Result<Typed, SynthError> {
        let l = self.bind_value(lhs)?;
        let r = self.bind_value(rhs)?;
        if l.ty == ValueType::Void || r.ty == ValueType::Void {
            return Err(SynthError::type_error(line, "'void' type not allowed here"));
        }
        if l.ty.is_string() || r.ty.is_string() {
            self.resolver.resolve("java/lang/StringBuilder")?;
            let mut parts = match l.expr {
                TExpr::Concat(parts) => parts,
                expr => vec![(expr, append_type(&l.ty))],
            };
            match r.expr {
                TExpr::Concat(more) => parts.extend(more),
                expr => parts.push((expr, append_type(&r.ty))),
            }
            return Ok(Typed::of(TExpr::Concat(parts), FieldType::object(STRING)));
        }
        let (lt, rt) = match (l.ty.field_type(), r.ty.field_type()) {
            (Some(a), Some(b)) if l.ty.is_numeric() && r.ty.is_numeric() => (a.clone(), b.clone()),
            _ => {
                return Err(SynthError::type_error(
                    line,
                    &format!("bad operand types for binary operator '+': {} and {}", l.ty.describe(), r.ty.describe()),
                ))
            }
        };
        let ty = match binary_promotion(&lt, &rt) {
            Some(t) => t,
            None => return Err(SynthError::unsupported(line, "floating point arithmetic")),
        };
        Ok(Typed::of(
            TExpr::Add {
                ty: ty.clone(),
                lhs: Box::new(widen(l.expr, &lt, &ty)),
                rhs: Box::new(widen(r.expr, &rt, &ty)),
            },
            ty,
        ))
    }

    fn bind_cast(&mut self, ty: &TypeName, inner: &Expr, line: usize) -> Result<Typed, SynthError> {
        if read_field_call_expr(inner).is_some() {
            return Err(read_field_misplaced(line));
        }
        let to = self.resolve_type(ty)?;
        let value = self.bind_value(inner)?;
        let from = match &value.ty {
            ValueType::Void => return Err(SynthError::type_error(line, "'void' type not allowed here")),
            ValueType::Null if to.is_reference() => return Ok(Typed::of(TExpr::Null, to)),
            ValueType::Null => {
                return Err(SynthError::type_error(
                    line,
                    &format!("incompatible types: <null> cannot be converted to {}", to.java_name()),
                ))
            }
            ValueType::Of(t) => t.clone(),
        };
        match (from.is_reference(), to.is_reference()) {
            (true, true) => {
                if self.resolver.is_assignable(&from, &to)? {
                    Ok(Typed::of(value.expr, to))
                } else {
                    let class = to.class_name().unwrap_or_default();
                    Ok(Typed::of(TExpr::CheckCast { class, expr: Box::new(value.expr) }, to))
                }
            }
            (false, false) => {
                if from == to || self.resolver.is_assignable(&from, &to)? {
                    Ok(Typed::of(widen(value.expr, &from, &to), to))
                } else if from == FieldType::Boolean || to == FieldType::Boolean {
                    Err(SynthError::type_error(
                        line,
                        &format!("incompatible types: {} cannot be converted to {}", from.java_name(), to.java_name()),
                    ))
                } else {
                    Err(SynthError::unsupported(line, "narrowing primitive conversion"))
                }
            }
            (true, false) => Err(SynthError::unsupported(line, "unboxing conversion")),
            (false, true) => Err(SynthError::unsupported(line, "boxing conversion")),
        }
    }

    fn bind_cond(&mut self, expr: &Expr) -> Result<Cond, SynthError> {
        let line = expr.line;
        match &expr.kind {
            ExprKind::Literal(Literal::Bool(b)) => Ok(Cond::Const(*b)),
            ExprKind::Not(inner) => Ok(Cond::Not(Box::new(self.bind_cond(inner)?))),
            ExprKind::Binary { op: BinaryOp::And, lhs, rhs } => {
                Ok(Cond::And(Box::new(self.bind_cond(lhs)?), Box::new(self.bind_cond(rhs)?)))
            }
            ExprKind::Binary { op: BinaryOp::Or, lhs, rhs } => {
                Ok(Cond::Or(Box::new(self.bind_cond(lhs)?), Box::new(self.bind_cond(rhs)?)))
            }
            ExprKind::Binary { op, lhs, rhs } if *op != BinaryOp::Add => {
                let cmp = Comparison::from_op(*op).ok_or_else(|| SynthError::unsupported(line, op.symbol()))?;
                let l = self.bind_value(lhs)?;
                let r = self.bind_value(rhs)?;
                self.comparison(cmp, *op, l, r, line)
            }
            _ => {
                let value = self.bind_value(expr)?;
                if value.ty.is_boolean() {
                    Ok(Cond::Value(value.expr))
                } else {
                    Err(SynthError::type_error(
                        line,
                        &format!("incompatible types: {} cannot be converted to boolean", value.ty.describe()),
                    ))
                }
            }
        }
    }

    fn comparison(&mut self, cmp: Comparison, op: BinaryOp, l: Typed, r: Typed, line: usize) -> Result<Cond, SynthError> {
        let equality = matches!(cmp, Comparison::Eq | Comparison::Ne);
        let bad = |l: &Typed, r: &Typed| {
            SynthError::type_error(
                line,
                &format!(
                    "bad operand types for binary operator '{}': {} and {}",
                    op.symbol(),
                    l.ty.describe(),
                    r.ty.describe()
                ),
            )
        };

        if l.ty.is_boolean() && r.ty.is_boolean() {
            if !equality {
                return Err(bad(&l, &r));
            }
            return Ok(Cond::ICmp(cmp, l.expr, r.expr));
        }
        if l.ty.is_numeric() && r.ty.is_numeric() {
            let (lt, rt) = match (l.ty.field_type(), r.ty.field_type()) {
                (Some(a), Some(b)) => (a.clone(), b.clone()),
                _ => return Err(bad(&l, &r)),
            };
            return match binary_promotion(&lt, &rt) {
                Some(FieldType::Long) => Ok(Cond::LCmp(
                    cmp,
                    widen(l.expr, &lt, &FieldType::Long),
                    widen(r.expr, &rt, &FieldType::Long),
                )),
                Some(_) => Ok(Cond::ICmp(cmp, l.expr, r.expr)),
                None => Err(SynthError::unsupported(line, "floating point comparison")),
            };
        }
        if l.ty.is_reference() && r.ty.is_reference() {
            if !equality {
                return Err(bad(&l, &r));
            }
            let equal = cmp == Comparison::Eq;
            return Ok(match (&l.ty, &r.ty) {
                (ValueType::Null, ValueType::Null) => Cond::Const(equal),
                (ValueType::Null, _) => Cond::NullCheck { is_null: equal, expr: r.expr },
                (_, ValueType::Null) => Cond::NullCheck { is_null: equal, expr: l.expr },
                (ValueType::Of(a), ValueType::Of(b)) => {
                    let (a, b) = (a.clone(), b.clone());
                    if !self.resolver.is_assignable(&a, &b)? && !self.resolver.is_assignable(&b, &a)? && !is_interface_pair(self, &a, &b)? {
                        return Err(SynthError::type_error(
                            line,
                            &format!("incomparable types: {} and {}", a.java_name(), b.java_name()),
                        ));
                    }
                    Cond::RefEq { equal, lhs: l.expr, rhs: r.expr }
                }
                _ => return Err(bad(&l, &r)),
            });
        }
        if equality && ((l.ty.is_reference() && r.ty.is_numeric()) || (l.ty.is_numeric() && r.ty.is_reference())) {
            return Err(SynthError::unsupported(line, "unboxing conversion"));
        }
        Err(bad(&l, &r))
    }

    // -- method calls

    fn bind_call(&mut self, target: Option<&Expr>, name: &str, args: &[Expr], line: usize) -> Result<Typed, SynthError> {
        if target.is_none() && name == READ_FIELD {
            return Err(read_field_misplaced(line));
        }
        let mut bound_args = vec![];
        for a in args {
            bound_args.push(self.bind_value(a)?);
        }

        let this = self.this_name().to_string();
        let (class, receiver, static_only) = match target {
            None => (this.clone(), None, false),
            Some(t) => match self.classify(t)? {
                Target::Value(v) => {
                    let class = match &v.ty {
                        ValueType::Of(FieldType::Object(c)) => c.clone(),
                        ValueType::Of(FieldType::Array(_)) => OBJECT.to_string(),
                        other => {
                            return Err(SynthError::type_error(line, &format!("{} cannot be dereferenced", other.describe())))
                        }
                    };
                    (class, Some(v), false)
                }
                Target::Class(c) => (c, None, true),
                Target::Package(p) => {
                    return Err(SynthError::type_error(
                        line,
                        &format!("cannot find symbol: {}", p.replace('/', ".")),
                    ))
                }
            },
        };

        let candidates = self.resolver.find_methods(&class, name)?;
        if candidates.is_empty() {
            return Err(SynthError::type_error(
                line,
                &format!("cannot find symbol: method {} in {}", name, class.replace('/', ".")),
            ));
        }
        let (chosen, descriptor) = self.select_overload(candidates, &bound_args, name, line)?;
        let is_static = chosen.method.access_flags.is_static();

        let mut converted = vec![];
        for (arg, param) in bound_args.into_iter().zip(&descriptor.params) {
            converted.push(match arg.ty.field_type() {
                Some(from) if !from.is_reference() => widen(arg.expr, from, param),
                _ => arg.expr,
            });
        }

        let owner_class = self.resolver.resolve(&class)?;
        let (kind, receiver, owner, interface_owner) = if is_static {
            (InvokeKind::Static, receiver.map(|r| r.expr), class.clone(), owner_class.is_interface())
        } else {
            if static_only {
                return Err(SynthError::type_error(
                    line,
                    &format!("non-static method {}{} cannot be referenced from a static context", name, descriptor.descriptor()),
                ));
            }
            let receiver = match receiver {
                Some(r) => r.expr,
                None => {
                    if self.is_static {
                        return Err(SynthError::type_error(
                            line,
                            &format!("non-static method {}{} cannot be referenced from a static context", name, descriptor.descriptor()),
                        ));
                    }
                    self.this_expr(line)?.expr
                }
            };
            if chosen.method.access_flags.is_private() && chosen.owner.name == this && class == this {
                (InvokeKind::Special, Some(receiver), class.clone(), owner_class.is_interface())
            } else if owner_class.is_interface() && chosen.owner.name == OBJECT {
                (InvokeKind::Virtual, Some(receiver), OBJECT.to_string(), false)
            } else if owner_class.is_interface() {
                (InvokeKind::Interface, Some(receiver), class.clone(), true)
            } else {
                (InvokeKind::Virtual, Some(receiver), class.clone(), false)
            }
        };

        let ret = match &descriptor.ret {
            Some(t) => ValueType::Of(t.clone()),
            None => ValueType::Void,
        };
        let invocation = Invocation {
            kind,
            receiver,
            owner,
            interface_owner,
            name: name.to_string(),
            descriptor,
            args: converted,
        };
        Ok(Typed::new(TExpr::Invoke(Box::new(invocation)), ret))
    }

    /// Picks the most specific applicable method, as a Java compiler does for calls that need
    /// neither boxing nor varargs.
    fn select_overload(
        &mut self,
        candidates: Vec<ResolvedMethod>,
        args: &[Typed],
        name: &str,
        line: usize,
    ) -> Result<(ResolvedMethod, MethodDescriptor), SynthError> {
        let mut applicable = vec![];
        for candidate in candidates {
            let descriptor = MethodDescriptor::from_descriptor(&candidate.method.descriptor)?;
            if descriptor.params.len() != args.len() {
                continue;
            }
            let mut ok = true;
            for (arg, param) in args.iter().zip(&descriptor.params) {
                if !self.accepts(&arg.ty, param)? {
                    ok = false;
                    break;
                }
            }
            if ok {
                applicable.push((candidate, descriptor));
            }
        }

        let mut most_specific = vec![];
        for (i, (_, d)) in applicable.iter().enumerate() {
            let mut maximal = true;
            for (j, (_, other)) in applicable.iter().enumerate() {
                if i != j && !self.more_specific(d, other)? {
                    maximal = false;
                    break;
                }
            }
            if maximal {
                most_specific.push(i);
            }
        }

        match most_specific.as_slice() {
            [i] => Ok(applicable.swap_remove(*i)),
            [] if applicable.is_empty() => {
                let types: Vec<String> = args.iter().map(|a| a.ty.describe()).collect();
                Err(SynthError::type_error(
                    line,
                    &format!("no suitable method found for {}({})", name, types.join(",")),
                ))
            }
            _ => Err(SynthError::type_error(line, &format!("reference to {} is ambiguous", name))),
        }
    }

    fn more_specific(&mut self, a: &MethodDescriptor, b: &MethodDescriptor) -> Result<bool, SynthError> {
        for (pa, pb) in a.params.iter().zip(&b.params) {
            if !self.resolver.is_assignable(pa, pb)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn is_interface_pair(binder: &mut Binder, a: &FieldType, b: &FieldType) -> Result<bool, SynthError> {
    // a cast between a non-final class and an interface can succeed, so such references compare
    let interface = |binder: &mut Binder, t: &FieldType| -> Result<bool, SynthError> {
        match t {
            FieldType::Object(c) => Ok(binder.resolver.resolve(c)?.is_interface()),
            _ => Ok(false),
        }
    };
    Ok(interface(binder, a)? || interface(binder, b)?)
}

fn widen(expr: TExpr, from: &FieldType, to: &FieldType) -> TExpr {
    if from == to || to.is_reference() || (from.is_int_like() && to.is_int_like()) {
        return expr;
    }
    TExpr::Widen { from: from.clone(), to: to.clone(), expr: Box::new(expr) }
}

/// The type both operands of a numeric operator are promoted to, `None` for floating point.
fn binary_promotion(a: &FieldType, b: &FieldType) -> Option<FieldType> {
    match (a, b) {
        (FieldType::Float | FieldType::Double, _) | (_, FieldType::Float | FieldType::Double) => None,
        (FieldType::Long, _) | (_, FieldType::Long) => Some(FieldType::Long),
        _ => Some(FieldType::Int),
    }
}

/// Parameter type of the `StringBuilder.append` overload used for a value of type `t`.
fn append_type(t: &ValueType) -> FieldType {
    match t {
        ValueType::Of(t) if t.is_string() => FieldType::object(STRING),
        ValueType::Of(FieldType::Boolean) => FieldType::Boolean,
        ValueType::Of(FieldType::Char) => FieldType::Char,
        ValueType::Of(FieldType::Long) => FieldType::Long,
        ValueType::Of(FieldType::Float) => FieldType::Float,
        ValueType::Of(FieldType::Double) => FieldType::Double,
        ValueType::Of(t) if t.is_int_like() => FieldType::Int,
        _ => FieldType::object(OBJECT),
    }
}

fn read_field_misplaced(line: usize) -> SynthError {
    SynthError::unsupported(line, "readField outside a local variable initializer")
}

fn read_field_call_expr(expr: &Expr) -> Option<&[Expr]> {
    match &expr.kind {
        ExprKind::Call { target: None, name, args } if name == READ_FIELD => Some(args),
        _ => None,
    }
}

/// Recognises `readField(..)` or `(T) readField(..)` as a whole initializer.
fn read_field_call(init: &Expr) -> Option<(Option<&TypeName>, &[Expr], usize)> {
    match &init.kind {
        ExprKind::Cast { ty, expr } => read_field_call_expr(expr).map(|args| (Some(ty), args, expr.line)),
        _ => read_field_call_expr(init).map(|args| (None, args, init.line)),
    }
}

fn stmt_line(stmt: &Stmt) -> usize {
    match stmt {
        Stmt::Local { line, .. } | Stmt::If { line, .. } | Stmt::Return { line, .. } | Stmt::Call { line, .. } => *line,
        Stmt::Block(block) => block.stmts.first().map(stmt_line).unwrap_or(block.end_line),
    }
}
