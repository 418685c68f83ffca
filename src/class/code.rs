/* Bytecode assembly with branch fix-ups and StackMapTable generation */

use crate::class::class_file::{Attribute, CodeAttribute, ExceptionHandler};
use crate::class::constant_pool::ConstantPool;
use crate::class::descriptor::{FieldType, MethodDescriptor};
use crate::class::error::ClassError;
use crate::class::opcodes::*;
use crate::class::{count_u2, write_u1, write_u2};

/// Class file versions from this one on are verified by type checking and need a StackMapTable.
pub const STACK_MAP_MAJOR_VERSION: u16 = 50;

/// A verification type as it appears in a stack map frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    /// A class by internal name, or an array by descriptor.
    Object(String),
    /// The result of the `new` instruction at this code offset, before its constructor runs.
    Uninitialized(u16),
}

impl VerificationType {
    pub fn from_field_type(t: &FieldType) -> VerificationType {
        match t {
            FieldType::Long => VerificationType::Long,
            FieldType::Double => VerificationType::Double,
            FieldType::Float => VerificationType::Float,
            t if t.is_int_like() => VerificationType::Integer,
            // reference types always have a class name
            t => VerificationType::Object(t.class_name().unwrap_or_default()),
        }
    }

    fn is_wide(&self) -> bool {
        matches!(self, VerificationType::Long | VerificationType::Double)
    }

    fn write(&self, bytes: &mut Vec<u8>, pool: &mut ConstantPool) -> Result<usize, ClassError> {
        Ok(match self {
            VerificationType::Top => write_u1(bytes, 0),
            VerificationType::Integer => write_u1(bytes, 1),
            VerificationType::Float => write_u1(bytes, 2),
            VerificationType::Double => write_u1(bytes, 3),
            VerificationType::Long => write_u1(bytes, 4),
            VerificationType::Null => write_u1(bytes, 5),
            VerificationType::UninitializedThis => write_u1(bytes, 6),
            VerificationType::Object(name) => {
                let index = pool.class_index(name)?;
                write_u1(bytes, 7) + write_u2(bytes, index)
            }
            VerificationType::Uninitialized(offset) => write_u1(bytes, 8) + write_u2(bytes, *offset),
        })
    }
}

/// How a method is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeKind {
    Virtual,
    Special,
    Static,
    Interface,
}

impl InvokeKind {
    fn opcode(self) -> u8 {
        match self {
            InvokeKind::Virtual => INVOKEVIRTUAL,
            InvokeKind::Special => INVOKESPECIAL,
            InvokeKind::Static => INVOKESTATIC,
            InvokeKind::Interface => INVOKEINTERFACE,
        }
    }
}

/// A position in the code that jumps and exception handlers can refer to before it is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Frame {
    locals: Vec<VerificationType>,
    stack: Vec<VerificationType>,
}

#[derive(Debug)]
struct LabelState {
    position: Option<usize>,
    locals_len: usize,
    frame: Option<Frame>,
    targeted: bool,
}

#[derive(Debug)]
struct Fixup {
    instruction: usize,
    operand: usize,
    label: Label,
}

#[derive(Debug)]
struct PendingHandler {
    start: Label,
    end: Label,
    handler: Label,
    catch_type: u16,
}

/// Assembles a method body.
///
/// The builder tracks the verification type of every local slot and operand stack entry as
/// instructions are emitted. A label remembers how many local slots were live when it was
/// created; the frame recorded for it when it is first jumped to (or placed, or registered as a
/// handler) only keeps those, so locals declared in a nested block do not leak into the frame
/// at the block's exit.
#[derive(Debug)]
pub struct CodeBuilder {
    code: Vec<u8>,
    locals: Vec<VerificationType>,
    stack: Vec<VerificationType>,
    stack_slots: u16,
    max_stack: u16,
    max_locals: u16,
    reachable: bool,
    labels: Vec<LabelState>,
    fixups: Vec<Fixup>,
    handlers: Vec<PendingHandler>,
}

impl CodeBuilder {
    /// Starts a method body. `this_class` is `None` for static methods.
    pub fn new(this_class: Option<&str>, params: &[FieldType]) -> CodeBuilder {
        let mut locals = vec![];
        if let Some(name) = this_class {
            locals.push(VerificationType::Object(name.to_string()));
        }
        for p in params {
            let t = VerificationType::from_field_type(p);
            let wide = t.is_wide();
            locals.push(t);
            if wide {
                locals.push(VerificationType::Top);
            }
        }
        let max_locals = locals.len() as u16;
        CodeBuilder {
            code: vec![],
            locals,
            stack: vec![],
            stack_slots: 0,
            max_stack: 0,
            max_locals,
            reachable: true,
            labels: vec![],
            fixups: vec![],
            handlers: vec![],
        }
    }

    pub fn offset(&self) -> usize {
        self.code.len()
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn locals_len(&self) -> usize {
        self.locals.len()
    }

    /// Reserves the next local slot(s) for a value of type `t`; it reads as Top until stored.
    pub fn allocate_local(&mut self, t: &FieldType) -> Result<u16, ClassError> {
        let slot = self.locals.len();
        for _ in 0..t.slots() {
            self.locals.push(VerificationType::Top);
        }
        if self.locals.len() > u16::MAX as usize {
            fail!("too many local variables");
        }
        self.max_locals = self.max_locals.max(self.locals.len() as u16);
        Ok(slot as u16)
    }

    /// Drops locals beyond `len`, at the end of a block scope.
    pub fn truncate_locals(&mut self, len: usize) {
        self.locals.truncate(len);
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(LabelState {
            position: None,
            locals_len: self.locals.len(),
            frame: None,
            targeted: false,
        });
        Label(self.labels.len() - 1)
    }

    fn current_frame(&self, locals_len: usize) -> Frame {
        let mut locals = self.locals.clone();
        locals.truncate(locals_len);
        Frame { locals, stack: self.stack.clone() }
    }

    fn record_frame(&mut self, label: Label, frame: Frame) -> Result<(), ClassError> {
        let state = &mut self.labels[label.0];
        state.targeted = true;
        if let Some(existing) = &state.frame {
            if existing.stack.len() != frame.stack.len() {
                fail!("inconsistent stack depth at label {}", label.0);
            }
        } else {
            state.frame = Some(frame);
        }
        Ok(())
    }

    /// Binds `label` to the current offset.
    pub fn place(&mut self, label: Label) -> Result<(), ClassError> {
        let locals_len = self.labels[label.0].locals_len;
        if self.labels[label.0].position.is_some() {
            fail!("label {} placed twice", label.0);
        }
        self.labels[label.0].position = Some(self.code.len());
        if self.reachable {
            self.locals.truncate(locals_len);
            let frame = self.current_frame(locals_len);
            match self.labels[label.0].frame.clone() {
                Some(existing) => {
                    if existing.stack.len() != frame.stack.len() {
                        fail!("inconsistent stack depth at label {}", label.0);
                    }
                    self.restore(existing);
                }
                None => self.labels[label.0].frame = Some(frame),
            }
        } else if let Some(frame) = self.labels[label.0].frame.clone() {
            self.restore(frame);
            self.reachable = true;
        }
        Ok(())
    }

    fn restore(&mut self, frame: Frame) {
        self.stack_slots = frame.stack.iter().map(|t| if t.is_wide() { 2 } else { 1 }).sum();
        self.locals = frame.locals;
        self.stack = frame.stack;
    }

    fn emit(&mut self, bytes: &[u8]) -> Result<usize, ClassError> {
        if !self.reachable {
            fail!("unreachable code at offset {}", self.code.len());
        }
        let offset = self.code.len();
        self.code.extend_from_slice(bytes);
        Ok(offset)
    }

    fn push(&mut self, t: VerificationType) {
        self.stack_slots += if t.is_wide() { 2 } else { 1 };
        self.max_stack = self.max_stack.max(self.stack_slots);
        self.stack.push(t);
    }

    fn pop(&mut self) -> Result<VerificationType, ClassError> {
        match self.stack.pop() {
            Some(t) => {
                self.stack_slots -= if t.is_wide() { 2 } else { 1 };
                Ok(t)
            }
            None => fail!("operand stack underflow at offset {}", self.code.len()),
        }
    }

    fn cp_instruction(&mut self, opcode: u8, index: u16) -> Result<usize, ClassError> {
        let [hi, lo] = index.to_be_bytes();
        self.emit(&[opcode, hi, lo])
    }

    pub fn aconst_null(&mut self) -> Result<(), ClassError> {
        self.emit(&[ACONST_NULL])?;
        self.push(VerificationType::Null);
        Ok(())
    }

    pub fn iconst(&mut self, pool: &mut ConstantPool, value: i32) -> Result<(), ClassError> {
        match value {
            -1..=5 => {
                self.emit(&[(ICONST_0 as i32 + value) as u8])?;
            }
            -128..=127 => {
                self.emit(&[BIPUSH, value as i8 as u8])?;
            }
            -32768..=32767 => {
                let [hi, lo] = (value as i16).to_be_bytes();
                self.emit(&[SIPUSH, hi, lo])?;
            }
            _ => {
                let index = pool.integer_index(value)?;
                self.ldc_index(index)?;
            }
        }
        self.push(VerificationType::Integer);
        Ok(())
    }

    pub fn lconst(&mut self, pool: &mut ConstantPool, value: i64) -> Result<(), ClassError> {
        match value {
            0 => {
                self.emit(&[LCONST_0])?;
            }
            1 => {
                self.emit(&[LCONST_1])?;
            }
            _ => {
                let index = pool.long_index(value)?;
                self.cp_instruction(LDC2_W, index)?;
            }
        }
        self.push(VerificationType::Long);
        Ok(())
    }

    fn ldc_index(&mut self, index: u16) -> Result<(), ClassError> {
        if index <= 0xff {
            self.emit(&[LDC, index as u8])?;
        } else {
            self.cp_instruction(LDC_W, index)?;
        }
        Ok(())
    }

    pub fn ldc_string(&mut self, pool: &mut ConstantPool, value: &str) -> Result<(), ClassError> {
        let index = pool.string_index(value)?;
        self.ldc_index(index)?;
        self.push(VerificationType::Object("java/lang/String".to_string()));
        Ok(())
    }

    pub fn ldc_class(&mut self, pool: &mut ConstantPool, name: &str) -> Result<(), ClassError> {
        let index = pool.class_index(name)?;
        self.ldc_index(index)?;
        self.push(VerificationType::Object("java/lang/Class".to_string()));
        Ok(())
    }

    fn local_instruction(&mut self, base: u8, slot: u16) -> Result<(), ClassError> {
        if slot <= 0xff {
            self.emit(&[base, slot as u8])?;
        } else {
            let [hi, lo] = slot.to_be_bytes();
            self.emit(&[WIDE, base, hi, lo])?;
        }
        Ok(())
    }

    pub fn load(&mut self, slot: u16, t: &FieldType) -> Result<(), ClassError> {
        let base = match t {
            FieldType::Long => LLOAD,
            FieldType::Double => DLOAD,
            FieldType::Float => FLOAD,
            t if t.is_int_like() => ILOAD,
            _ => ALOAD,
        };
        self.local_instruction(base, slot)?;
        let vt = match self.locals.get(slot as usize) {
            Some(VerificationType::Top) | None => fail!("load of unassigned local {}", slot),
            Some(vt) => vt.clone(),
        };
        self.push(vt);
        Ok(())
    }

    /// Stores the top of stack into `slot`; the slot takes the declared type `t`.
    pub fn store(&mut self, slot: u16, t: &FieldType) -> Result<(), ClassError> {
        let base = match t {
            FieldType::Long => LSTORE,
            FieldType::Double => DSTORE,
            FieldType::Float => FSTORE,
            t if t.is_int_like() => ISTORE,
            _ => ASTORE,
        };
        self.local_instruction(base, slot)?;
        self.pop()?;
        let slot = slot as usize;
        let needed = slot + t.slots() as usize;
        while self.locals.len() < needed {
            self.locals.push(VerificationType::Top);
        }
        self.max_locals = self.max_locals.max(self.locals.len() as u16);
        self.locals[slot] = VerificationType::from_field_type(t);
        if t.slots() == 2 {
            self.locals[slot + 1] = VerificationType::Top;
        }
        Ok(())
    }

    pub fn get_field(&mut self, pool: &mut ConstantPool, owner: &str, name: &str, t: &FieldType) -> Result<(), ClassError> {
        let index = pool.field_ref_index(owner, name, &t.descriptor())?;
        self.cp_instruction(GETFIELD, index)?;
        self.pop()?;
        self.push(VerificationType::from_field_type(t));
        Ok(())
    }

    pub fn get_static(&mut self, pool: &mut ConstantPool, owner: &str, name: &str, t: &FieldType) -> Result<(), ClassError> {
        let index = pool.field_ref_index(owner, name, &t.descriptor())?;
        self.cp_instruction(GETSTATIC, index)?;
        self.push(VerificationType::from_field_type(t));
        Ok(())
    }

    pub fn invoke(
        &mut self,
        pool: &mut ConstantPool,
        kind: InvokeKind,
        owner: &str,
        name: &str,
        descriptor: &MethodDescriptor,
        interface_owner: bool,
    ) -> Result<(), ClassError> {
        let desc = descriptor.descriptor();
        let index = pool.method_ref_index(owner, name, &desc, interface_owner || kind == InvokeKind::Interface)?;
        if kind == InvokeKind::Interface {
            let [hi, lo] = index.to_be_bytes();
            let count = descriptor.param_slots() + 1;
            if count > 255 {
                fail!("too many arguments for {}", name);
            }
            self.emit(&[INVOKEINTERFACE, hi, lo, count as u8, 0])?;
        } else {
            self.cp_instruction(kind.opcode(), index)?;
        }
        for _ in &descriptor.params {
            self.pop()?;
        }
        if kind != InvokeKind::Static {
            let receiver = self.pop()?;
            if name == "<init>" {
                let initialized = VerificationType::Object(owner.to_string());
                if let VerificationType::Uninitialized(_) | VerificationType::UninitializedThis = receiver {
                    for t in self.stack.iter_mut().chain(self.locals.iter_mut()) {
                        if *t == receiver {
                            *t = initialized.clone();
                        }
                    }
                }
            }
        }
        if let Some(ret) = &descriptor.ret {
            self.push(VerificationType::from_field_type(ret));
        }
        Ok(())
    }

    pub fn new_object(&mut self, pool: &mut ConstantPool, class: &str) -> Result<(), ClassError> {
        let index = pool.class_index(class)?;
        let offset = self.cp_instruction(NEW, index)?;
        self.push(VerificationType::Uninitialized(offset as u16));
        Ok(())
    }

    pub fn checkcast(&mut self, pool: &mut ConstantPool, class: &str) -> Result<(), ClassError> {
        let index = pool.class_index(class)?;
        self.cp_instruction(CHECKCAST, index)?;
        self.pop()?;
        self.push(VerificationType::Object(class.to_string()));
        Ok(())
    }

    pub fn instance_of(&mut self, pool: &mut ConstantPool, class: &str) -> Result<(), ClassError> {
        let index = pool.class_index(class)?;
        self.cp_instruction(INSTANCEOF, index)?;
        self.pop()?;
        self.push(VerificationType::Integer);
        Ok(())
    }

    pub fn dup(&mut self) -> Result<(), ClassError> {
        self.emit(&[DUP])?;
        let top = self.pop()?;
        if top.is_wide() {
            fail!("dup of a two-slot value");
        }
        self.push(top.clone());
        self.push(top);
        Ok(())
    }

    /// Discards the top value, whatever its width.
    pub fn pop_value(&mut self) -> Result<(), ClassError> {
        let wide = match self.stack.last() {
            Some(t) => t.is_wide(),
            None => fail!("operand stack underflow at offset {}", self.code.len()),
        };
        self.emit(&[if wide { POP2 } else { POP }])?;
        self.pop()?;
        Ok(())
    }

    pub fn swap(&mut self) -> Result<(), ClassError> {
        self.emit(&[SWAP])?;
        let a = self.pop()?;
        let b = self.pop()?;
        if a.is_wide() || b.is_wide() {
            fail!("swap of a two-slot value");
        }
        self.push(a);
        self.push(b);
        Ok(())
    }

    pub fn lcmp(&mut self) -> Result<(), ClassError> {
        self.emit(&[LCMP])?;
        self.pop()?;
        self.pop()?;
        self.push(VerificationType::Integer);
        Ok(())
    }

    /// Adds the two `int` (or two `long`) values on top of the stack.
    pub fn add(&mut self, t: &FieldType) -> Result<(), ClassError> {
        let (opcode, result) = match t {
            FieldType::Long => (LADD, VerificationType::Long),
            t if t.is_int_like() => (IADD, VerificationType::Integer),
            _ => fail!("cannot add values of type {}", t),
        };
        self.emit(&[opcode])?;
        self.pop()?;
        self.pop()?;
        self.push(result);
        Ok(())
    }

    /// Widening primitive conversion of the top of stack.
    pub fn widen(&mut self, from: &FieldType, to: &FieldType) -> Result<(), ClassError> {
        let opcode = match (from, to) {
            (f, t) if f == t => return Ok(()),
            (f, t) if f.is_int_like() && t.is_int_like() => return Ok(()),
            (f, FieldType::Long) if f.is_int_like() => I2L,
            (f, FieldType::Float) if f.is_int_like() => I2F,
            (f, FieldType::Double) if f.is_int_like() => I2D,
            (FieldType::Long, FieldType::Float) => L2F,
            (FieldType::Long, FieldType::Double) => L2D,
            (FieldType::Float, FieldType::Double) => F2D,
            _ => fail!("no widening conversion from {} to {}", from, to),
        };
        self.emit(&[opcode])?;
        self.pop()?;
        self.push(VerificationType::from_field_type(to));
        Ok(())
    }

    fn jump(&mut self, opcode: u8, label: Label) -> Result<(), ClassError> {
        let instruction = self.emit(&[opcode, 0, 0])?;
        self.fixups.push(Fixup { instruction, operand: instruction + 1, label });
        let frame = self.current_frame(self.labels[label.0].locals_len);
        self.record_frame(label, frame)
    }

    /// Emits a conditional jump. Its operands are popped before the frame at `label` is recorded.
    pub fn branch(&mut self, opcode: u8, label: Label) -> Result<(), ClassError> {
        let operands = match opcode {
            IFEQ..=IFLE | IFNULL | IFNONNULL => 1,
            IF_ICMPEQ..=IF_ACMPNE => 2,
            _ => fail!("opcode 0x{:02x} is not a conditional branch", opcode),
        };
        if !self.reachable {
            fail!("unreachable code at offset {}", self.code.len());
        }
        for _ in 0..operands {
            self.pop()?;
        }
        self.jump(opcode, label)
    }

    pub fn goto(&mut self, label: Label) -> Result<(), ClassError> {
        self.jump(GOTO, label)?;
        self.reachable = false;
        Ok(())
    }

    /// Returns the top of stack (or nothing, for `None`).
    pub fn return_value(&mut self, t: Option<&FieldType>) -> Result<(), ClassError> {
        let opcode = match t {
            None => RETURN,
            Some(FieldType::Long) => LRETURN,
            Some(FieldType::Double) => DRETURN,
            Some(FieldType::Float) => FRETURN,
            Some(t) if t.is_int_like() => IRETURN,
            Some(_) => ARETURN,
        };
        self.emit(&[opcode])?;
        if t.is_some() {
            self.pop()?;
        }
        self.reachable = false;
        self.stack.clear();
        self.stack_slots = 0;
        Ok(())
    }

    /// Registers `handler` for exceptions of `catch_type` (any throwable for `None`) raised
    /// between `start` and `end`. Call this right after placing `start`: the handler's frame is
    /// the current locals with the caught exception as the only stack entry.
    pub fn add_handler(
        &mut self,
        pool: &mut ConstantPool,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&str>,
    ) -> Result<(), ClassError> {
        let catch_index = match catch_type {
            Some(name) => pool.class_index(name)?,
            None => 0,
        };
        let mut frame = self.current_frame(self.labels[handler.0].locals_len);
        frame.stack = vec![VerificationType::Object(catch_type.unwrap_or("java/lang/Throwable").to_string())];
        self.record_frame(handler, frame)?;
        self.handlers.push(PendingHandler { start, end, handler, catch_type: catch_index });
        Ok(())
    }

    fn position(&self, label: Label) -> Result<usize, ClassError> {
        match self.labels[label.0].position {
            Some(p) => Ok(p),
            None => fail!("label {} was never placed", label.0),
        }
    }

    /// Resolves jumps and builds the `Code` attribute, with a StackMapTable when `major_version`
    /// requires one.
    pub fn finish(mut self, pool: &mut ConstantPool, major_version: u16) -> Result<CodeAttribute, ClassError> {
        if self.reachable {
            fail!("control reaches the end of the method");
        }
        if self.code.is_empty() || self.code.len() > 65535 {
            fail!("invalid code length {}", self.code.len());
        }

        for fixup in &self.fixups {
            let target = self.position(fixup.label)? as i64;
            let delta = target - fixup.instruction as i64;
            let delta = i16::try_from(delta).map_err(|_| ClassError::invalid("branch offset out of range"))?;
            let [hi, lo] = delta.to_be_bytes();
            self.code[fixup.operand] = hi;
            self.code[fixup.operand + 1] = lo;
        }

        let mut exception_table = vec![];
        for h in &self.handlers {
            let start_pc = self.position(h.start)? as u16;
            let end_pc = self.position(h.end)? as u16;
            if end_pc <= start_pc {
                fail!("empty exception handler range");
            }
            exception_table.push(ExceptionHandler {
                start_pc,
                end_pc,
                handler_pc: self.position(h.handler)? as u16,
                catch_type: h.catch_type,
            });
        }

        let mut frames: Vec<(usize, &Frame)> = vec![];
        for state in &self.labels {
            if let (true, Some(position), Some(frame)) = (state.targeted, state.position, &state.frame) {
                if position >= self.code.len() {
                    fail!("jump target {} is past the end of the code", position);
                }
                frames.push((position, frame));
            }
        }
        frames.sort_by_key(|(position, _)| *position);
        frames.dedup_by_key(|(position, _)| *position);

        let mut attributes = vec![];
        if major_version >= STACK_MAP_MAJOR_VERSION && !frames.is_empty() {
            let mut info = vec![];
            write_u2(&mut info, count_u2(frames.len(), "stack map frames")?);
            let mut previous: Option<usize> = None;
            for (position, frame) in &frames {
                let delta = match previous {
                    None => *position,
                    Some(p) => position - p - 1,
                };
                previous = Some(*position);
                write_u1(&mut info, 255);
                write_u2(&mut info, delta as u16);
                write_frame_types(&mut info, pool, &frame.locals, true)?;
                write_frame_types(&mut info, pool, &frame.stack, false)?;
            }
            attributes.push(Attribute::Raw { name_index: pool.utf8_index("StackMapTable")?, info });
        }

        Ok(CodeAttribute {
            name_index: pool.utf8_index("Code")?,
            max_stack: self.max_stack,
            max_locals: self.max_locals,
            code: self.code,
            exception_table,
            attributes,
        })
    }
}

/// Writes a verification type list. In the locals list a long or double stands for two slots,
/// so the Top that follows it is implied and skipped.
fn write_frame_types(
    bytes: &mut Vec<u8>,
    pool: &mut ConstantPool,
    types: &[VerificationType],
    locals: bool,
) -> Result<(), ClassError> {
    let mut entries = vec![];
    let mut i = 0;
    while i < types.len() {
        entries.push(&types[i]);
        i += if locals && types[i].is_wide() { 2 } else { 1 };
    }
    write_u2(bytes, count_u2(entries.len(), "frame entries")?);
    for t in entries {
        t.write(bytes, pool)?;
    }
    Ok(())
}
