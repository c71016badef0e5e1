//! Constructor rewriting.
//!
//! A constructor cannot hand its body to a substitute before the object exists, so the
//! super/self-constructor call is cut out of the body first. The call and the argument
//! setup leading up to it (the *prologue*) stay in a new public `<init>`; everything
//! after it moves to a private alias that dispatch may run or skip:
//!
//! ```text
//! <init>(args)                        new public constructor
//!     <prologue>                      this.super(...)
//!     this.$$shadow$init()
//!     <dispatch entry>  ───────────►  $$shadow$$Widget$__constructor__(args)
//!                                         <rest of the original body>
//! __constructor__(args)               private redirector to the alias
//! ```

use std::collections::BTreeSet;

use crate::{
    assembly::{
        opcodes::{ALOAD, ATHROW, INVOKESPECIAL, INVOKEVIRTUAL, NEW, RETURN},
        Code, ExceptionHandler, Instruction, Label, MethodGenerator,
    },
    classfile::{MethodAccess, MethodInfo},
    dispatch::{MethodSignature, CONSTRUCTOR_NAME},
    transform::{
        methods::{declaration_attributes, emit_entry},
        names::{alias_name, INIT_METHOD},
        Rewrite,
    },
    Result,
};

/// The part of a constructor that stays in `<init>`.
#[derive(Debug, Default)]
pub(crate) struct Prologue {
    pub instructions: Vec<Instruction>,
    pub handlers: Vec<ExceptionHandler>,
}

/// Cuts the prologue out of `code`, leaving the rest of the body in place.
///
/// The prologue runs from the last `this` load before the constructor call through the
/// call itself: the first `invokespecial <init>` on `class` or `super_class` that does not
/// initialize a pending `new` of the same type. A body that throws unconditionally before
/// any such call is replaced by a bare `return` and gets an empty prologue.
///
/// # Errors
/// Returns [`crate::Error::StructuralViolation`] if there is no constructor call, if a
/// label is needed on both sides of the cut, or if an exception handler spans it.
pub(crate) fn split_prologue(
    code: &mut Code,
    class: &str,
    super_class: Option<&str>,
    location: &str,
) -> Result<Prologue> {
    let mut start = 0;
    let mut pending: Vec<&str> = Vec::new();
    let mut branched = false;
    let mut cut = Cut::Missing;

    for (position, instruction) in code.instructions.iter().enumerate() {
        match instruction {
            Instruction::Var { opcode: ALOAD, index: 0 } => start = position,
            Instruction::Type {
                opcode: NEW,
                class: created,
            } => pending.push(created.as_str()),
            Instruction::Method {
                opcode: INVOKESPECIAL,
                owner,
                name,
                ..
            } if name == "<init>" => {
                if let Some(index) = pending.iter().rposition(|new| *new == owner.as_str()) {
                    pending.remove(index);
                } else if owner == class || Some(owner.as_str()) == super_class {
                    cut = Cut::At(start, position);
                    break;
                }
            }
            Instruction::Op(ATHROW) if !branched => {
                cut = Cut::Throws;
                break;
            }
            other => branched |= !other.targets().is_empty(),
        }
    }

    let (start, end) = match cut {
        Cut::At(start, end) => (start, end),
        Cut::Throws => {
            code.instructions = vec![Instruction::op(RETURN)];
            code.handlers.clear();
            return Ok(Prologue::default());
        }
        Cut::Missing => {
            return Err(structural_error!(
                class,
                location,
                "no call to a super or self constructor"
            ))
        }
    };

    let instructions: Vec<Instruction> = code.instructions.drain(start..=end).collect();
    let defined = defined_labels(&instructions);

    let mut handlers = Vec::new();
    let mut remaining = Vec::new();
    for handler in std::mem::take(&mut code.handlers) {
        let inside = [handler.start, handler.end, handler.handler]
            .iter()
            .filter(|label| defined.contains(*label))
            .count();
        match inside {
            0 => remaining.push(handler),
            3 => handlers.push(handler),
            _ => {
                return Err(structural_error!(
                    class,
                    location,
                    "exception handler spans the super constructor call"
                ))
            }
        }
    }
    code.handlers = remaining;

    let prologue_targets = instructions.iter().flat_map(Instruction::targets);
    let body_targets = code
        .instructions
        .iter()
        .flat_map(Instruction::targets)
        .chain(
            code.handlers
                .iter()
                .flat_map(|h| [h.start, h.end, h.handler]),
        );
    let shared = prologue_targets
        .filter(|label| !defined.contains(label))
        .chain(body_targets.filter(|label| defined.contains(label)))
        .next();
    if let Some(Label(id)) = shared {
        return Err(structural_error!(
            class,
            location,
            "label {} is needed on both sides of the super constructor call",
            id
        ));
    }

    Ok(Prologue {
        instructions,
        handlers,
    })
}

enum Cut {
    At(usize, usize),
    Throws,
    Missing,
}

fn defined_labels(instructions: &[Instruction]) -> BTreeSet<Label> {
    instructions
        .iter()
        .filter_map(|instruction| match instruction {
            Instruction::Label(label) => Some(*label),
            _ => None,
        })
        .collect()
}

/// Rewrites one constructor into its alias, the `__constructor__` redirector and a new
/// public `<init>`.
///
/// With `stubs`, the original body is first replaced by `super()` and `return`.
///
/// # Errors
/// Returns [`crate::Error::StructuralViolation`] if the constructor has no body or its
/// prologue cannot be split off.
pub(crate) fn instrument_constructor(
    rewrite: &mut Rewrite<'_>,
    mut method: MethodInfo,
    stubs: bool,
) -> Result<[MethodInfo; 3]> {
    let location = format!("{}{}", method.name, method.descriptor);
    let access = method.access;
    let descriptor = method.descriptor.clone();

    let mut code = match method.take_code() {
        Some(_) if stubs => {
            let mut gen = MethodGenerator::new(&descriptor, false)?;
            gen.load_this();
            gen.invoke(INVOKESPECIAL, rewrite.super_class()?, "<init>", "()V");
            gen.op(RETURN);
            gen.finish()
        }
        Some(code) => code,
        None => {
            return Err(structural_error!(
                &rewrite.class,
                &location,
                "constructor has no decoded body"
            ))
        }
    };
    let first_local = code.max_locals;
    let prologue = split_prologue(
        &mut code,
        &rewrite.class,
        rewrite.super_class.as_deref(),
        &location,
    )?;

    let alias = alias_name(&rewrite.class, CONSTRUCTOR_NAME);
    let label_base = code.next_label();
    method.name.clone_from(&alias);
    method.access = access.into_private();
    method.set_code(code);

    let redirector_access = access
        .difference(MethodAccess::NATIVE | MethodAccess::ABSTRACT | MethodAccess::FINAL)
        .into_private();
    let mut gen = MethodGenerator::new(&descriptor, false)?;
    gen.load_this();
    gen.load_args();
    gen.invoke(INVOKESPECIAL, &rewrite.class, &alias, &descriptor);
    gen.op(RETURN);
    let mut redirector =
        MethodInfo::with_code(redirector_access, CONSTRUCTOR_NAME, &descriptor, gen.finish());
    redirector.attributes.extend(declaration_attributes(&method));

    let mut gen = MethodGenerator::new(&descriptor, false)?
        .with_label_base(label_base)
        .with_first_local(first_local);
    gen.emit_all(prologue.instructions);
    for handler in &prologue.handlers {
        gen.try_catch(
            handler.start,
            handler.end,
            handler.handler,
            handler.catch_type.as_deref(),
        );
    }
    gen.load_this();
    gen.invoke(INVOKEVIRTUAL, &rewrite.class, INIT_METHOD, "()V");
    let signature = MethodSignature::new(&rewrite.class, CONSTRUCTOR_NAME, &descriptor);
    emit_entry(rewrite, &mut gen, &signature, &alias)?;

    let mut constructor =
        MethodInfo::with_code(access.into_public(), "<init>", &descriptor, gen.finish());
    constructor.attributes.extend(declaration_attributes(&method));

    Ok([method, redirector, constructor])
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::{
        assembly::opcodes::*,
        policy::Policy,
        transform::strategy::{CallSites, Strategy},
        Error,
    };

    const WIDGET: &str = "pkg/a/Widget";
    const BASE: &str = "pkg/a/Base";

    fn body(build: impl FnOnce(&mut MethodGenerator)) -> Code {
        let mut gen = MethodGenerator::new("(I)V", false).unwrap();
        build(&mut gen);
        gen.finish()
    }

    fn split(code: &mut Code) -> Result<Prologue> {
        split_prologue(code, WIDGET, Some(BASE), "<init>(I)V")
    }

    #[test]
    fn test_prologue_is_this_load_through_super_call() {
        let mut code = body(|gen| {
            gen.emit(Instruction::LineNumber(10));
            gen.load_this();
            gen.load_arg(0);
            gen.invoke(INVOKESPECIAL, BASE, "<init>", "(I)V");
            gen.load_this();
            gen.load_arg(0);
            gen.field(PUTFIELD, WIDGET, "size", "I");
            gen.op(RETURN);
        });

        let prologue = split(&mut code).unwrap();
        assert_eq!(prologue.instructions.len(), 3);
        assert_eq!(prologue.instructions[0], Instruction::var(ALOAD, 0));
        assert_eq!(code.instructions[0], Instruction::LineNumber(10));
        assert_eq!(code.len(), 4);
    }

    #[test]
    fn test_pending_new_of_super_type_is_skipped() {
        // super(new Base())
        let mut code = body(|gen| {
            gen.load_this();
            gen.emit(Instruction::type_insn(NEW, BASE));
            gen.op(DUP);
            gen.invoke(INVOKESPECIAL, BASE, "<init>", "()V");
            gen.invoke(INVOKESPECIAL, BASE, "<init>", "(Lpkg/a/Base;)V");
            gen.op(RETURN);
        });

        let prologue = split(&mut code).unwrap();
        assert_eq!(prologue.instructions.len(), 5);
        assert_eq!(code.instructions, vec![Instruction::op(RETURN)]);
    }

    #[test]
    fn test_self_constructor_call() {
        let mut code = body(|gen| {
            gen.load_this();
            gen.invoke(INVOKESPECIAL, WIDGET, "<init>", "()V");
            gen.op(RETURN);
        });
        assert_eq!(split(&mut code).unwrap().instructions.len(), 2);
    }

    #[test]
    fn test_unconditional_throw_empties_body() {
        let mut code = body(|gen| {
            gen.emit(Instruction::type_insn(NEW, "java/lang/RuntimeException"));
            gen.op(DUP);
            gen.invoke(INVOKESPECIAL, "java/lang/RuntimeException", "<init>", "()V");
            gen.op(ATHROW);
        });

        let prologue = split(&mut code).unwrap();
        assert!(prologue.instructions.is_empty());
        assert_eq!(code.instructions, vec![Instruction::op(RETURN)]);
    }

    #[test]
    fn test_missing_super_call_is_structural() {
        let mut code = body(|gen| {
            gen.load_arg(0);
            gen.op(POP);
            gen.op(RETURN);
        });
        let expected = "pkg/a/Widget.<init>(I)V";
        assert!(matches!(
            split(&mut code),
            Err(Error::StructuralViolation { location, .. }) if location == expected
        ));
    }

    #[test]
    fn test_label_shared_across_cut_is_structural() {
        // super(flag ? 1 : 0) where the join label sits after the call
        let mut code = body(|gen| {
            let zero = gen.new_label();
            let after = gen.new_label();
            gen.load_this();
            gen.load_arg(0);
            gen.jump(IFEQ, zero);
            gen.op(ICONST_1);
            gen.invoke(INVOKESPECIAL, BASE, "<init>", "(I)V");
            gen.mark(zero);
            gen.jump(GOTO, after);
            gen.mark(after);
            gen.op(RETURN);
        });
        assert!(matches!(
            split(&mut code),
            Err(Error::StructuralViolation { .. })
        ));
    }

    #[test]
    fn test_branches_inside_prologue_move_with_it() {
        let mut code = body(|gen| {
            let zero = gen.new_label();
            let call = gen.new_label();
            gen.load_this();
            gen.load_arg(0);
            gen.jump(IFEQ, zero);
            gen.op(ICONST_1);
            gen.jump(GOTO, call);
            gen.mark(zero);
            gen.op(ICONST_0);
            gen.mark(call);
            gen.invoke(INVOKESPECIAL, BASE, "<init>", "(I)V");
            gen.op(RETURN);
        });

        let prologue = split(&mut code).unwrap();
        assert_eq!(defined_labels(&prologue.instructions).len(), 2);
        assert_eq!(code.instructions, vec![Instruction::op(RETURN)]);
    }

    #[test]
    fn test_constructor_becomes_three_methods() {
        let ids = AtomicU32::new(0);
        let policy = Policy::default();
        let mut rewrite = Rewrite {
            class: WIDGET.to_string(),
            super_class: Some(BASE.to_string()),
            policy: &policy,
            strategy: Strategy::FixedCallSite.call_sites(),
            sites: CallSites::new(&ids),
        };
        let code = body(|gen| {
            gen.load_this();
            gen.invoke(INVOKESPECIAL, BASE, "<init>", "()V");
            gen.op(RETURN);
        });
        let method = MethodInfo::with_code(MethodAccess::PROTECTED, "<init>", "(I)V", code);

        let [alias, redirector, constructor] =
            instrument_constructor(&mut rewrite, method, false).unwrap();
        assert_eq!(alias.name, "$$shadow$$pkg_a_Widget$__constructor__");
        assert!(alias.access.contains(MethodAccess::PRIVATE));
        assert_eq!(redirector.name, "__constructor__");
        assert_eq!(redirector.access, MethodAccess::PRIVATE);
        assert_eq!(constructor.access, MethodAccess::PUBLIC);

        let instructions = &constructor.code().unwrap().instructions;
        assert_eq!(
            instructions[3],
            Instruction::method(INVOKEVIRTUAL, WIDGET, INIT_METHOD, "()V")
        );
        assert_eq!(
            instructions[4],
            Instruction::Ldc(crate::assembly::LdcConstant::String(
                "pkg/a/Widget/__constructor__(I)V".to_string()
            ))
        );
    }

    #[test]
    fn test_stub_constructor_body_is_replaced() {
        let ids = AtomicU32::new(0);
        let policy = Policy::default();
        let mut rewrite = Rewrite {
            class: WIDGET.to_string(),
            super_class: Some(BASE.to_string()),
            policy: &policy,
            strategy: Strategy::DynamicallyLinked.call_sites(),
            sites: CallSites::new(&ids),
        };
        let code = body(|gen| {
            gen.emit(Instruction::type_insn(NEW, "java/lang/RuntimeException"));
            gen.op(DUP);
            gen.push_string("Stub!");
            gen.invoke(
                INVOKESPECIAL,
                "java/lang/RuntimeException",
                "<init>",
                "(Ljava/lang/String;)V",
            );
            gen.op(ATHROW);
        });
        let method = MethodInfo::with_code(MethodAccess::PUBLIC, "<init>", "(I)V", code);

        let [alias, _, constructor] = instrument_constructor(&mut rewrite, method, true).unwrap();
        assert_eq!(alias.code().unwrap().instructions, vec![Instruction::op(RETURN)]);
        assert_eq!(
            constructor.code().unwrap().instructions[1],
            Instruction::method(INVOKESPECIAL, BASE, "<init>", "()V")
        );
        assert_eq!(rewrite.sites.len(), 1);
    }
}
