//! Builder for synthesized method bodies.
//!
//! [`MethodGenerator`] appends instructions to a body that is being synthesized from
//! scratch (entry points, redirectors, hooks plumbing) and keeps track of labels,
//! locals and exception handlers. It knows the method's own descriptor, so loading
//! `this`, individual arguments or all arguments boxed into an `Object[]` are one call
//! each.
//!
//! # Example
//!
//! ```rust,no_run
//! use shadowbox::assembly::{generator::MethodGenerator, opcodes::INVOKESTATIC};
//!
//! // static int twice(int x) { return Math.addExact(x, x); }
//! let mut gen = MethodGenerator::new("(I)I", true)?;
//! gen.load_args();
//! gen.load_arg(0);
//! gen.invoke(INVOKESTATIC, "java/lang/Math", "addExact", "(II)I");
//! gen.return_value();
//! let code = gen.finish();
//! # Ok::<(), shadowbox::Error>(())
//! ```

use crate::{
    assembly::{
        instruction::{Code, ExceptionHandler, Instruction, Label, LdcConstant},
        opcodes::*,
    },
    classfile::descriptor::{FieldType, MethodDescriptor, ReturnType},
    Result,
};

/// `java/lang/Object`
pub const OBJECT: &str = "java/lang/Object";
/// `java/lang/Number`
pub const NUMBER: &str = "java/lang/Number";
/// `java/lang/Throwable`
pub const THROWABLE: &str = "java/lang/Throwable";

/// Long-form load opcode for a value of type `ty`.
#[must_use]
pub fn load_opcode(ty: &FieldType) -> u8 {
    match ty {
        FieldType::Long => LLOAD,
        FieldType::Float => FLOAD,
        FieldType::Double => DLOAD,
        FieldType::Object(_) | FieldType::Array(_) => ALOAD,
        _ => ILOAD,
    }
}

/// Long-form store opcode for a value of type `ty`.
#[must_use]
pub fn store_opcode(ty: &FieldType) -> u8 {
    match ty {
        FieldType::Long => LSTORE,
        FieldType::Float => FSTORE,
        FieldType::Double => DSTORE,
        FieldType::Object(_) | FieldType::Array(_) => ASTORE,
        _ => ISTORE,
    }
}

/// Return opcode for a method returning `ret`.
#[must_use]
pub fn return_opcode(ret: &ReturnType) -> u8 {
    match ret {
        ReturnType::Void => RETURN,
        ReturnType::Value(FieldType::Long) => LRETURN,
        ReturnType::Value(FieldType::Float) => FRETURN,
        ReturnType::Value(FieldType::Double) => DRETURN,
        ReturnType::Value(FieldType::Object(_) | FieldType::Array(_)) => ARETURN,
        ReturnType::Value(_) => IRETURN,
    }
}

/// Instruction pushing the default (zero) value of `ty`.
#[must_use]
pub fn default_value(ty: &FieldType) -> Instruction {
    Instruction::op(match ty {
        FieldType::Long => LCONST_0,
        FieldType::Float => FCONST_0,
        FieldType::Double => DCONST_0,
        FieldType::Object(_) | FieldType::Array(_) => ACONST_NULL,
        _ => ICONST_0,
    })
}

/// Appends instructions for a method body being synthesized.
#[derive(Debug)]
pub struct MethodGenerator {
    descriptor: MethodDescriptor,
    is_static: bool,
    instructions: Vec<Instruction>,
    handlers: Vec<ExceptionHandler>,
    next_label: u32,
    next_local: u16,
}

impl MethodGenerator {
    /// Starts an empty body for a method with the given descriptor.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the descriptor does not parse.
    pub fn new(descriptor: &str, is_static: bool) -> Result<Self> {
        let descriptor = MethodDescriptor::parse(descriptor)?;
        let next_local = descriptor.args_size() + u16::from(!is_static);
        Ok(MethodGenerator {
            descriptor,
            is_static,
            instructions: Vec::new(),
            handlers: Vec::new(),
            next_label: 0,
            next_local,
        })
    }

    /// Continues label allocation at `base`, for code that will be spliced into a body
    /// whose labels are below `base`.
    #[must_use]
    pub fn with_label_base(mut self, base: u32) -> Self {
        self.next_label = self.next_label.max(base);
        self
    }

    /// Starts local allocation at `first`, for code that follows locals already in use.
    #[must_use]
    pub fn with_first_local(mut self, first: u16) -> Self {
        self.next_local = self.next_local.max(first);
        self
    }

    /// The parsed descriptor of the method being generated.
    #[must_use]
    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    /// Returns `true` for static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// Appends an instruction.
    pub fn emit(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Appends a list of instructions.
    pub fn emit_all(&mut self, instructions: impl IntoIterator<Item = Instruction>) {
        self.instructions.extend(instructions);
    }

    /// Appends an operand-less opcode.
    pub fn op(&mut self, opcode: u8) {
        self.emit(Instruction::op(opcode));
    }

    /// Allocates a fresh label.
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Places `label` at the current position.
    pub fn mark(&mut self, label: Label) {
        self.emit(Instruction::Label(label));
    }

    /// Emits a branch to `target`.
    pub fn jump(&mut self, opcode: u8, target: Label) {
        self.emit(Instruction::Jump { opcode, target });
    }

    /// Allocates a local variable slot (two for `long`/`double`).
    pub fn new_local(&mut self, ty: &FieldType) -> u16 {
        let index = self.next_local;
        self.next_local += ty.size();
        index
    }

    /// Loads local `index` of type `ty`.
    pub fn load_local(&mut self, ty: &FieldType, index: u16) {
        self.emit(Instruction::var(load_opcode(ty), index));
    }

    /// Stores the top of stack into local `index` of type `ty`.
    pub fn store_local(&mut self, ty: &FieldType, index: u16) {
        self.emit(Instruction::var(store_opcode(ty), index));
    }

    /// Loads `this`.
    pub fn load_this(&mut self) {
        self.emit(Instruction::var(ALOAD, 0));
    }

    /// Loads `this`, or `null` in a static method.
    pub fn load_this_or_null(&mut self) {
        if self.is_static {
            self.op(ACONST_NULL);
        } else {
            self.load_this();
        }
    }

    fn arg_slot(&self, arg: usize) -> u16 {
        let receiver = u16::from(!self.is_static);
        receiver
            + self.descriptor.params[..arg]
                .iter()
                .map(FieldType::size)
                .sum::<u16>()
    }

    /// Loads argument `arg` (zero-based, not counting `this`).
    ///
    /// # Panics
    /// Panics if `arg` is not a parameter index of the descriptor.
    pub fn load_arg(&mut self, arg: usize) {
        let ty = self.descriptor.params[arg].clone();
        let slot = self.arg_slot(arg);
        self.load_local(&ty, slot);
    }

    /// Loads every argument in order.
    pub fn load_args(&mut self) {
        for arg in 0..self.descriptor.params.len() {
            self.load_arg(arg);
        }
    }

    /// Builds an `Object[]` holding every argument, primitives boxed.
    pub fn load_arg_array(&mut self) {
        let count = self.descriptor.params.len();
        self.emit(Instruction::push_int(count as i32));
        self.emit(Instruction::type_insn(ANEWARRAY, OBJECT));
        for arg in 0..count {
            self.op(DUP);
            self.emit(Instruction::push_int(arg as i32));
            self.load_arg(arg);
            let ty = self.descriptor.params[arg].clone();
            self.box_value(&ty);
            self.op(AASTORE);
        }
    }

    /// Boxes the primitive on top of the stack into its wrapper; references are left as
    /// they are.
    ///
    /// The wrapper is allocated first and then moved under the value
    /// (`new W; dup_x1; swap` or `new W; dup_x2; dup_x2; pop` for two-slot values) so
    /// the constructor sees `W, W, value`.
    pub fn box_value(&mut self, ty: &FieldType) {
        let Some(wrapper) = ty.wrapper_class() else {
            return;
        };
        self.emit(Instruction::type_insn(NEW, wrapper));
        if ty.size() == 2 {
            self.op(DUP_X2);
            self.op(DUP_X2);
            self.op(POP);
        } else {
            self.op(DUP_X1);
            self.op(SWAP);
        }
        self.invoke(INVOKESPECIAL, wrapper, "<init>", &format!("({ty})V"));
    }

    /// Converts the `Object` on top of the stack to `ty`, expecting exactly the wrapper
    /// type for primitives.
    pub fn unbox_exact(&mut self, ty: &FieldType) {
        match (ty.wrapper_class(), ty.unbox_method()) {
            (Some(wrapper), Some(method)) => {
                self.emit(Instruction::type_insn(CHECKCAST, wrapper));
                self.invoke(INVOKEVIRTUAL, wrapper, method, &format!("(){ty}"));
            }
            _ => self.check_cast(ty),
        }
    }

    /// Converts the `Object` on top of the stack to `ty`, accepting any `Number` for
    /// numeric primitives.
    pub fn unbox_number(&mut self, ty: &FieldType) {
        let Some(method) = ty.unbox_method() else {
            self.check_cast(ty);
            return;
        };
        let owner = match ty {
            FieldType::Boolean => "java/lang/Boolean",
            FieldType::Char => "java/lang/Character",
            _ => NUMBER,
        };
        self.emit(Instruction::type_insn(CHECKCAST, owner));
        self.invoke(INVOKEVIRTUAL, owner, method, &format!("(){ty}"));
    }

    /// Like [`MethodGenerator::unbox_number`], but a `null` becomes the default value of
    /// a primitive `ty`.
    pub fn unbox_or_default(&mut self, ty: &FieldType) {
        if !ty.is_primitive() {
            self.check_cast(ty);
            return;
        }
        let present = self.new_label();
        let done = self.new_label();
        self.op(DUP);
        self.jump(IFNONNULL, present);
        self.op(POP);
        self.emit(default_value(ty));
        self.jump(GOTO, done);
        self.mark(present);
        self.unbox_number(ty);
        self.mark(done);
    }

    fn check_cast(&mut self, ty: &FieldType) {
        if *ty != FieldType::Object(OBJECT.to_string()) {
            self.emit(Instruction::type_insn(CHECKCAST, ty.internal_name()));
        }
    }

    /// Pushes the default value of the method's return type (nothing for `void`).
    pub fn push_default_return(&mut self) {
        if let Some(ty) = self.descriptor.ret.value().cloned() {
            self.emit(default_value(&ty));
        }
    }

    /// Returns from the method with the value on top of the stack.
    pub fn return_value(&mut self) {
        let opcode = return_opcode(&self.descriptor.ret);
        self.op(opcode);
    }

    /// Emits a method invocation (`interface` follows from `INVOKEINTERFACE`).
    pub fn invoke(&mut self, opcode: u8, owner: &str, name: &str, descriptor: &str) {
        self.emit(Instruction::method(opcode, owner, name, descriptor));
    }

    /// Emits a field access.
    pub fn field(&mut self, opcode: u8, owner: &str, name: &str, descriptor: &str) {
        self.emit(Instruction::field(opcode, owner, name, descriptor));
    }

    /// Pushes a string constant.
    pub fn push_string(&mut self, value: &str) {
        self.emit(Instruction::Ldc(LdcConstant::String(value.to_string())));
    }

    /// Pushes a `Class` constant.
    pub fn push_class(&mut self, internal_name: &str) {
        self.emit(Instruction::Ldc(LdcConstant::Class(internal_name.to_string())));
    }

    /// Pushes an `int` constant in its shortest form.
    pub fn push_int(&mut self, value: i32) {
        self.emit(Instruction::push_int(value));
    }

    /// Registers a handler for `catch_type` (`None` catches everything) over
    /// `start..end`.
    pub fn try_catch(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&str>,
    ) {
        self.handlers.push(ExceptionHandler {
            start,
            end,
            handler,
            catch_type: catch_type.map(str::to_string),
        });
    }

    /// The next label id that would be handed out.
    #[must_use]
    pub fn next_label(&self) -> u32 {
        self.next_label
    }

    /// The next local slot that would be handed out.
    #[must_use]
    pub fn next_local(&self) -> u16 {
        self.next_local
    }

    /// Takes the generated instructions and handlers without building a [`Code`], for
    /// splicing into another body.
    #[must_use]
    pub fn into_parts(self) -> (Vec<Instruction>, Vec<ExceptionHandler>) {
        (self.instructions, self.handlers)
    }

    /// Finishes the body.
    #[must_use]
    pub fn finish(self) -> Code {
        let next_label = self.next_label;
        let max_locals = self.next_local;
        let mut code = Code::from_parts(self.instructions, self.handlers, next_label);
        code.max_locals = max_locals;
        code
    }
}
