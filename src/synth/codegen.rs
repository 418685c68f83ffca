/* Lowers a bound method onto a CodeBuilder */

use crate::class::opcodes::*;
use crate::class::{ClassError, CodeAttribute, CodeBuilder, ConstantPool, FieldType, InvokeKind, Label, MethodDescriptor};
use crate::synth::binder::{BoundMethod, Comparison, Cond, Invocation, TExpr, TStmt};

const STRING_BUILDER: &str = "java/lang/StringBuilder";

struct Codegen<'a> {
    pool: &'a mut ConstantPool,
    code: CodeBuilder,
}

/// Generates the `Code` attribute of `method` as a member of `this_class`.
///
/// Statements the builder reports as unreachable (after a constant condition has already
/// decided a branch) are skipped rather than emitted.
pub fn generate(
    method: &BoundMethod,
    this_class: &str,
    pool: &mut ConstantPool,
    major_version: u16,
) -> Result<CodeAttribute, ClassError> {
    let this = if method.is_static() { None } else { Some(this_class) };
    let mut gen = Codegen { pool, code: CodeBuilder::new(this, &method.descriptor.params) };
    gen.statements(&method.body)?;
    if gen.code.is_reachable() {
        if !method.falls_through || method.descriptor.ret.is_some() {
            fail!("method {} can complete without returning a value", method.name);
        }
        gen.code.return_value(None)?;
    }
    let Codegen { pool, code } = gen;
    code.finish(pool, major_version)
}

fn method(params: Vec<FieldType>, ret: Option<FieldType>) -> MethodDescriptor {
    MethodDescriptor { params, ret }
}

impl<'a> Codegen<'a> {
    fn statements(&mut self, stmts: &[TStmt]) -> Result<(), ClassError> {
        let locals = self.code.locals_len();
        for stmt in stmts {
            if !self.code.is_reachable() {
                break;
            }
            self.statement(stmt)?;
        }
        self.code.truncate_locals(locals);
        Ok(())
    }

    fn statement(&mut self, stmt: &TStmt) -> Result<(), ClassError> {
        match stmt {
            TStmt::Store { slot, ty, value } => {
                self.expr(value)?;
                self.code.store(*slot, ty)
            }
            TStmt::ReadField { slot, ty, target, field, cast } => self.read_field(*slot, ty, target, field, cast.as_deref()),
            TStmt::If { cond, then, otherwise } => {
                let otherwise_label = self.code.new_label();
                let end = self.code.new_label();
                self.jump_unless(cond, otherwise_label)?;
                if self.code.is_reachable() {
                    self.statements(then)?;
                }
                match otherwise {
                    Some(stmts) => {
                        if self.code.is_reachable() {
                            self.code.goto(end)?;
                        }
                        self.code.place(otherwise_label)?;
                        if self.code.is_reachable() {
                            self.statements(stmts)?;
                        }
                        self.code.place(end)
                    }
                    None => self.code.place(otherwise_label),
                }
            }
            TStmt::Return(value) => match value {
                Some((expr, ty)) => {
                    self.expr(expr)?;
                    self.code.return_value(Some(ty))
                }
                None => self.code.return_value(None),
            },
            TStmt::Discard { expr, has_value } => {
                self.expr(expr)?;
                if *has_value {
                    self.code.pop_value()?;
                }
                Ok(())
            }
            TStmt::Block(stmts) => self.statements(stmts),
        }
    }

    /// The local is `null` first, so it holds `null` if the reflective read throws.
    fn read_field(
        &mut self,
        slot: u16,
        ty: &FieldType,
        target: &TExpr,
        field: &str,
        cast: Option<&str>,
    ) -> Result<(), ClassError> {
        let object = FieldType::object("java/lang/Object");
        let class = FieldType::object("java/lang/Class");
        let reflected = FieldType::object("java/lang/reflect/Field");

        self.code.aconst_null()?;
        self.code.store(slot, ty)?;
        self.expr(target)?;

        let start = self.code.new_label();
        let end = self.code.new_label();
        let handler = self.code.new_label();
        let after = self.code.new_label();
        self.code.place(start)?;
        self.code.add_handler(self.pool, start, end, handler, Some("java/lang/Exception"))?;

        self.code.dup()?;
        self.code
            .invoke(self.pool, InvokeKind::Virtual, "java/lang/Object", "getClass", &method(vec![], Some(class)), false)?;
        self.code.ldc_string(self.pool, field)?;
        self.code.invoke(
            self.pool,
            InvokeKind::Virtual,
            "java/lang/Class",
            "getDeclaredField",
            &method(vec![FieldType::object("java/lang/String")], Some(reflected)),
            false,
        )?;
        self.code.dup()?;
        self.code.iconst(self.pool, 1)?;
        self.code.invoke(
            self.pool,
            InvokeKind::Virtual,
            "java/lang/reflect/Field",
            "setAccessible",
            &method(vec![FieldType::Boolean], None),
            false,
        )?;
        self.code.swap()?;
        self.code.invoke(
            self.pool,
            InvokeKind::Virtual,
            "java/lang/reflect/Field",
            "get",
            &method(vec![object.clone()], Some(object)),
            false,
        )?;
        if let Some(c) = cast {
            self.code.checkcast(self.pool, c)?;
        }
        self.code.store(slot, ty)?;
        self.code.place(end)?;
        self.code.goto(after)?;

        self.code.place(handler)?;
        self.code.pop_value()?;
        self.code.place(after)
    }

    fn expr(&mut self, expr: &TExpr) -> Result<(), ClassError> {
        match expr {
            TExpr::Int(v) => self.code.iconst(self.pool, *v),
            TExpr::Long(v) => self.code.lconst(self.pool, *v),
            TExpr::Str(s) => self.code.ldc_string(self.pool, s),
            TExpr::Null => self.code.aconst_null(),
            TExpr::Local { slot, ty } => self.code.load(*slot, ty),
            TExpr::GetField { receiver, owner, name, ty } => {
                self.expr(receiver)?;
                self.code.get_field(self.pool, owner, name, ty)
            }
            TExpr::GetStatic { owner, name, ty } => self.code.get_static(self.pool, owner, name, ty),
            TExpr::Invoke(invocation) => self.invoke(invocation),
            TExpr::CheckCast { class, expr } => {
                self.expr(expr)?;
                self.code.checkcast(self.pool, class)
            }
            TExpr::Widen { from, to, expr } => {
                self.expr(expr)?;
                self.code.widen(from, to)
            }
            TExpr::Add { ty, lhs, rhs } => {
                self.expr(lhs)?;
                self.expr(rhs)?;
                self.code.add(ty)
            }
            TExpr::Concat(parts) => self.concat(parts),
            TExpr::Condition(cond) => self.materialize(cond),
        }
    }

    fn invoke(&mut self, call: &Invocation) -> Result<(), ClassError> {
        if let Some(receiver) = &call.receiver {
            self.expr(receiver)?;
            if call.kind == InvokeKind::Static {
                self.code.pop_value()?;
            }
        }
        for arg in &call.args {
            self.expr(arg)?;
        }
        self.code
            .invoke(self.pool, call.kind, &call.owner, &call.name, &call.descriptor, call.interface_owner)
    }

    fn concat(&mut self, parts: &[(TExpr, FieldType)]) -> Result<(), ClassError> {
        let builder = FieldType::object(STRING_BUILDER);
        self.code.new_object(self.pool, STRING_BUILDER)?;
        self.code.dup()?;
        self.code.invoke(self.pool, InvokeKind::Special, STRING_BUILDER, "<init>", &method(vec![], None), false)?;
        for (part, ty) in parts {
            self.expr(part)?;
            self.code.invoke(
                self.pool,
                InvokeKind::Virtual,
                STRING_BUILDER,
                "append",
                &method(vec![ty.clone()], Some(builder.clone())),
                false,
            )?;
        }
        self.code.invoke(
            self.pool,
            InvokeKind::Virtual,
            STRING_BUILDER,
            "toString",
            &method(vec![], Some(FieldType::object("java/lang/String"))),
            false,
        )
    }

    /// Pushes 1 or 0 for a condition used as a `boolean` value.
    fn materialize(&mut self, cond: &Cond) -> Result<(), ClassError> {
        let otherwise = self.code.new_label();
        let end = self.code.new_label();
        self.jump_unless(cond, otherwise)?;
        if self.code.is_reachable() {
            self.code.iconst(self.pool, 1)?;
            self.code.goto(end)?;
        }
        self.code.place(otherwise)?;
        if self.code.is_reachable() {
            self.code.iconst(self.pool, 0)?;
        }
        self.code.place(end)
    }

    fn jump_unless(&mut self, cond: &Cond, target: Label) -> Result<(), ClassError> {
        self.jump_if(cond, false, target)
    }

    /// Jumps to `target` when `cond` evaluates to `when`, falls through otherwise.
    fn jump_if(&mut self, cond: &Cond, when: bool, target: Label) -> Result<(), ClassError> {
        if !self.code.is_reachable() {
            return Ok(());
        }
        match cond {
            Cond::Const(v) => {
                if *v == when {
                    self.code.goto(target)?;
                }
                Ok(())
            }
            Cond::Value(expr) => {
                self.expr(expr)?;
                self.code.branch(if when { IFNE } else { IFEQ }, target)
            }
            Cond::Not(inner) => self.jump_if(inner, !when, target),
            Cond::And(a, b) => {
                if when {
                    let skip = self.code.new_label();
                    self.jump_if(a, false, skip)?;
                    self.jump_if(b, true, target)?;
                    self.code.place(skip)
                } else {
                    self.jump_if(a, false, target)?;
                    self.jump_if(b, false, target)
                }
            }
            Cond::Or(a, b) => {
                if when {
                    self.jump_if(a, true, target)?;
                    self.jump_if(b, true, target)
                } else {
                    let skip = self.code.new_label();
                    self.jump_if(a, true, skip)?;
                    self.jump_if(b, false, target)?;
                    self.code.place(skip)
                }
            }
            Cond::ICmp(cmp, lhs, rhs) => {
                let cmp = if when { *cmp } else { cmp.negate() };
                match (lhs, rhs) {
                    (l, TExpr::Int(0)) => {
                        self.expr(l)?;
                        self.code.branch(zero_branch(cmp), target)
                    }
                    (l, r) => {
                        self.expr(l)?;
                        self.expr(r)?;
                        self.code.branch(int_branch(cmp), target)
                    }
                }
            }
            Cond::LCmp(cmp, lhs, rhs) => {
                let cmp = if when { *cmp } else { cmp.negate() };
                self.expr(lhs)?;
                self.expr(rhs)?;
                self.code.lcmp()?;
                self.code.branch(zero_branch(cmp), target)
            }
            Cond::RefEq { equal, lhs, rhs } => {
                self.expr(lhs)?;
                self.expr(rhs)?;
                self.code.branch(if *equal == when { IF_ACMPEQ } else { IF_ACMPNE }, target)
            }
            Cond::NullCheck { is_null, expr } => {
                self.expr(expr)?;
                self.code.branch(if *is_null == when { IFNULL } else { IFNONNULL }, target)
            }
        }
    }
}

fn zero_branch(cmp: Comparison) -> u8 {
    match cmp {
        Comparison::Eq => IFEQ,
        Comparison::Ne => IFNE,
        Comparison::Lt => IFLT,
        Comparison::Le => IFLE,
        Comparison::Gt => IFGT,
        Comparison::Ge => IFGE,
    }
}

fn int_branch(cmp: Comparison) -> u8 {
    match cmp {
        Comparison::Eq => IF_ICMPEQ,
        Comparison::Ne => IF_ICMPNE,
        Comparison::Lt => IF_ICMPLT,
        Comparison::Le => IF_ICMPLE,
        Comparison::Gt => IF_ICMPGT,
        Comparison::Ge => IF_ICMPGE,
    }
}
