use crate::{
    assembly::{generator::OBJECT, opcodes::*, Code, Instruction, MethodGenerator},
    classfile::descriptor::{MethodDescriptor, ReturnType},
    dispatch::MethodSignature,
    transform::Rewrite,
    Result,
};

const GREGORIAN_CALENDAR: &str = "java/util/GregorianCalendar";

/// Rewrites the call sites of one body in place.
///
/// Calls to intercepted methods become a single hook invocation; the boolean
/// `GregorianCalendar` constructor, which the host cannot provide, is turned into the
/// `(int, int, int)` one.
///
/// # Errors
/// Returns [`crate::Error::StructuralViolation`] naming the descriptor of an intercepted
/// call whose signature cannot be packed or unpacked.
pub(crate) fn rewrite_body(
    rewrite: &mut Rewrite<'_>,
    code: &mut Code,
    location: &str,
) -> Result<()> {
    let original = std::mem::take(&mut code.instructions);
    let mut rewritten = Vec::with_capacity(original.len());
    let mut next_label = code.next_label();

    for instruction in original {
        match &instruction {
            Instruction::Method {
                opcode: INVOKESPECIAL,
                owner,
                name,
                descriptor,
                interface,
            } if owner == GREGORIAN_CALENDAR && name == "<init>" && descriptor == "(Z)V" => {
                rewritten.push(Instruction::op(POP));
                rewritten.extend(std::iter::repeat(Instruction::op(ICONST_0)).take(3));
                rewritten.push(Instruction::Method {
                    opcode: INVOKESPECIAL,
                    owner: owner.clone(),
                    name: name.clone(),
                    descriptor: "(III)V".to_string(),
                    interface: *interface,
                });
            }
            Instruction::Method {
                opcode,
                owner,
                name,
                descriptor,
                ..
            } if rewrite.policy.should_intercept(owner, name) => {
                let target = MethodSignature::new(owner, name, descriptor);
                let is_static = *opcode == INVOKESTATIC;
                let gen = intercept_call(rewrite, &target, is_static, next_label, location)?;
                next_label = gen.next_label();
                let (instructions, _) = gen.into_parts();
                rewritten.extend(instructions);
            }
            _ => rewritten.push(instruction),
        }
    }

    code.instructions = rewritten;
    code.reserve_labels(next_label);
    Ok(())
}

/// Emits the replacement of one intercepted call.
///
/// The arguments already on the stack are packed into an `Object[]` from the last to the
/// first, boxing primitives; a static call gets `null` as its receiver. After the hook
/// the `Object` result is converted back to the call's return type.
fn intercept_call(
    rewrite: &mut Rewrite<'_>,
    target: &MethodSignature,
    is_static: bool,
    label_base: u32,
    location: &str,
) -> Result<MethodGenerator> {
    let descriptor = MethodDescriptor::parse(&target.descriptor).map_err(|_| {
        structural_error!(
            &rewrite.class,
            location,
            "cannot intercept {}: unsupported descriptor {}",
            target,
            target.descriptor
        )
    })?;
    let mut gen = MethodGenerator::new(&target.descriptor, is_static)?.with_label_base(label_base);

    gen.push_int(descriptor.params.len() as i32);
    gen.emit(Instruction::type_insn(ANEWARRAY, OBJECT));
    for (index, param) in descriptor.params.iter().enumerate().rev() {
        if param.size() == 2 {
            // value(2), array -> array, array, value(2)
            gen.op(DUP_X2);
            gen.op(DUP_X2);
            gen.op(POP);
            gen.box_value(param);
            gen.push_int(index as i32);
            gen.op(SWAP);
        } else {
            // value, array -> array, array, index, value
            gen.op(DUP_X1);
            gen.op(SWAP);
            gen.push_int(index as i32);
            gen.op(SWAP);
            gen.box_value(param);
        }
        gen.op(AASTORE);
    }
    if is_static {
        gen.op(ACONST_NULL);
        gen.op(SWAP);
    }

    let caller = rewrite.class.clone();
    rewrite
        .strategy
        .emit_intercept(&mut gen, target, &caller, &mut rewrite.sites);

    match &descriptor.ret {
        ReturnType::Void => gen.op(POP),
        ReturnType::Value(ty) => gen.unbox_number(ty),
    }
    Ok(gen)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::{
        assembly::stack::max_stack,
        policy::Policy,
        transform::strategy::{CallSites, Strategy},
        Error,
    };

    fn policy() -> Policy {
        Policy::builder()
            .intercept_method("java.lang.System", "nanoTime")
            .intercept_method("pkg.a.Store", "*")
            .build()
    }

    fn rewrite_with<'a>(policy: &'a Policy, ids: &'a AtomicU32, strategy: Strategy) -> Rewrite<'a> {
        Rewrite {
            class: "pkg/a/Widget".to_string(),
            super_class: Some("java/lang/Object".to_string()),
            policy,
            strategy: strategy.call_sites(),
            sites: CallSites::new(ids),
        }
    }

    fn hooks(code: &Code) -> Vec<&str> {
        code.instructions
            .iter()
            .filter_map(|insn| match insn {
                Instruction::Method { owner, name, .. }
                    if owner == crate::transform::names::HOOKS =>
                {
                    Some(name.as_str())
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_static_call_is_replaced() {
        let policy = policy();
        let ids = AtomicU32::new(0);
        let mut rewrite = rewrite_with(&policy, &ids, Strategy::FixedCallSite);
        let mut gen = MethodGenerator::new("()J", true).unwrap();
        gen.invoke(INVOKESTATIC, "java/lang/System", "nanoTime", "()J");
        gen.return_value();
        let mut code = gen.finish();

        rewrite_body(&mut rewrite, &mut code, "now()J").unwrap();
        assert_eq!(hooks(&code), vec!["intercept"]);
        assert!(!code.instructions.iter().any(|insn| matches!(
            insn,
            Instruction::Method { name, .. } if name == "nanoTime"
        )));
        assert!(code.instructions.contains(&Instruction::op(ACONST_NULL)));
        assert_eq!(max_stack(&code.instructions, &code.handlers).unwrap(), 5);
    }

    #[test]
    fn test_mixed_width_arguments_balance() {
        let policy = policy();
        let ids = AtomicU32::new(0);
        let mut rewrite = rewrite_with(&policy, &ids, Strategy::DynamicallyLinked);
        let mut gen = MethodGenerator::new("(Lpkg/a/Store;JI)Ljava/lang/String;", true).unwrap();
        gen.load_arg(0);
        gen.load_arg(1);
        gen.load_arg(2);
        gen.invoke(INVOKEVIRTUAL, "pkg/a/Store", "get", "(JI)Ljava/lang/String;");
        gen.return_value();
        let mut code = gen.finish();

        rewrite_body(&mut rewrite, &mut code, "read").unwrap();
        assert_eq!(hooks(&code), vec!["linkedIntercept"]);
        assert!(code
            .instructions
            .contains(&Instruction::type_insn(CHECKCAST, "java/lang/String")));
        assert!(max_stack(&code.instructions, &code.handlers).is_ok());
        assert_eq!(rewrite.sites.len(), 1);
    }

    #[test]
    fn test_void_and_primitive_results_unpack() {
        let policy = policy();
        let ids = AtomicU32::new(0);
        let mut rewrite = rewrite_with(&policy, &ids, Strategy::FixedCallSite);
        let mut gen = MethodGenerator::new("(Lpkg/a/Store;)Z", true).unwrap();
        gen.load_arg(0);
        gen.invoke(INVOKEVIRTUAL, "pkg/a/Store", "clear", "()V");
        gen.load_arg(0);
        gen.invoke(INVOKEVIRTUAL, "pkg/a/Store", "isEmpty", "()Z");
        gen.return_value();
        let mut code = gen.finish();

        rewrite_body(&mut rewrite, &mut code, "check").unwrap();
        assert_eq!(hooks(&code), vec!["intercept", "intercept"]);
        assert!(code.instructions.contains(&Instruction::method(
            INVOKEVIRTUAL,
            "java/lang/Boolean",
            "booleanValue",
            "()Z"
        )));
    }

    #[test]
    fn test_constructors_are_never_intercepted() {
        let policy = policy();
        let ids = AtomicU32::new(0);
        let mut rewrite = rewrite_with(&policy, &ids, Strategy::FixedCallSite);
        let mut gen = MethodGenerator::new("()V", true).unwrap();
        gen.emit(Instruction::type_insn(NEW, "pkg/a/Store"));
        gen.op(DUP);
        gen.invoke(INVOKESPECIAL, "pkg/a/Store", "<init>", "()V");
        gen.op(POP);
        gen.op(RETURN);
        let mut code = gen.finish();
        let before = code.clone();

        rewrite_body(&mut rewrite, &mut code, "make").unwrap();
        assert_eq!(code, before);
    }

    #[test]
    fn test_gregorian_calendar_boolean_constructor() {
        let policy = Policy::default();
        let ids = AtomicU32::new(0);
        let mut rewrite = rewrite_with(&policy, &ids, Strategy::FixedCallSite);
        let mut gen = MethodGenerator::new("()V", true).unwrap();
        gen.emit(Instruction::type_insn(NEW, GREGORIAN_CALENDAR));
        gen.op(DUP);
        gen.op(ICONST_1);
        gen.invoke(INVOKESPECIAL, GREGORIAN_CALENDAR, "<init>", "(Z)V");
        gen.op(POP);
        gen.op(RETURN);
        let mut code = gen.finish();

        rewrite_body(&mut rewrite, &mut code, "calendar").unwrap();
        assert_eq!(
            code.instructions[3..8].to_vec(),
            vec![
                Instruction::op(POP),
                Instruction::op(ICONST_0),
                Instruction::op(ICONST_0),
                Instruction::op(ICONST_0),
                Instruction::method(INVOKESPECIAL, GREGORIAN_CALENDAR, "<init>", "(III)V"),
            ]
        );
    }

    #[test]
    fn test_unparsable_descriptor_is_structural() {
        let policy = policy();
        let ids = AtomicU32::new(0);
        let mut rewrite = rewrite_with(&policy, &ids, Strategy::FixedCallSite);
        let mut code = Code::from_parts(
            vec![Instruction::method(INVOKESTATIC, "pkg/a/Store", "odd", "(Q)V")],
            Vec::new(),
            0,
        );
        let error = rewrite_body(&mut rewrite, &mut code, "odd").unwrap_err();
        assert!(matches!(
            error,
            Error::StructuralViolation { message, .. } if message.contains("(Q)V")
        ));
    }
}
