//! Method-level rewrites: the dispatch entry, aliases and delegators, and the members
//! every instrumented class gains.

use crate::{
    assembly::{generator::THROWABLE, opcodes::*, MethodGenerator},
    classfile::{
        attribute::{Attribute, EXCEPTIONS, SIGNATURE},
        descriptor::{FieldType, ReturnType},
        MethodAccess, MethodInfo,
    },
    dispatch::{MethodSignature, STATIC_INITIALIZER_NAME},
    transform::{
        names::{
            alias_name, CLASS_INITIALIZING, CLEAN_STACK_TRACE, CONTEXT_DESCRIPTOR, CONTEXT_FIELD,
            GET_DATA_METHOD, HOOKS, INITIALIZING, INIT_METHOD, OBJECT_DESCRIPTOR, PLAN_RUN,
            PLAN_TYPE, SHADOW_DATA_FIELD,
        },
        Rewrite,
    },
    Result,
};

/// `equals`, `hashCode` and `toString`: overridden with a dispatching delegator when a
/// class inherits them.
pub(crate) const OBJECT_METHODS: [(&str, &str); 3] = [
    ("equals", "(Ljava/lang/Object;)Z"),
    ("hashCode", "()I"),
    ("toString", "()Ljava/lang/String;"),
];

/// Emits the body of a rewritten entry point.
///
/// ```text
///     plan = <lookup>
///     if plan == null goto direct
///     try { result = plan.run(this | null, args) } catch (Throwable t) { goto clean }
///     return unbox(result)
/// clean:
///     throw Hooks.cleanStackTrace(t, ctx)
/// direct:
///     try { return alias(args) } catch (Throwable t) { goto clean }
/// ```
///
/// Every path performs exactly one lookup, and the alias is only ever reached through
/// `direct`.
pub(crate) fn emit_entry(
    rewrite: &mut Rewrite<'_>,
    gen: &mut MethodGenerator,
    signature: &MethodSignature,
    alias: &str,
) -> Result<()> {
    let plan_type = FieldType::from_internal_name(PLAN_TYPE)?;
    let plan = gen.new_local(&plan_type);

    rewrite.strategy.emit_plan_lookup(gen, signature, &mut rewrite.sites);
    gen.store_local(&plan_type, plan);
    gen.load_local(&plan_type, plan);
    let direct = gen.new_label();
    gen.jump(IFNULL, direct);

    let plan_start = gen.new_label();
    let plan_end = gen.new_label();
    let clean = gen.new_label();
    gen.mark(plan_start);
    gen.load_local(&plan_type, plan);
    gen.load_this_or_null();
    gen.load_arg_array();
    gen.invoke(INVOKEINTERFACE, PLAN_TYPE, PLAN_RUN.0, PLAN_RUN.1);
    gen.mark(plan_end);
    match gen.descriptor().ret.clone() {
        ReturnType::Void => gen.op(POP),
        ReturnType::Value(ty) => gen.unbox_or_default(&ty),
    }
    gen.return_value();

    gen.mark(clean);
    gen.field(GETSTATIC, &rewrite.class, CONTEXT_FIELD, CONTEXT_DESCRIPTOR);
    gen.invoke(INVOKESTATIC, HOOKS, CLEAN_STACK_TRACE.0, CLEAN_STACK_TRACE.1);
    gen.op(ATHROW);

    let direct_start = gen.new_label();
    let direct_end = gen.new_label();
    gen.mark(direct);
    gen.mark(direct_start);
    let opcode = if gen.is_static() {
        INVOKESTATIC
    } else {
        gen.load_this();
        INVOKESPECIAL
    };
    gen.load_args();
    let descriptor = gen.descriptor().to_string();
    gen.invoke(opcode, &rewrite.class, alias, &descriptor);
    gen.mark(direct_end);
    gen.return_value();

    gen.try_catch(plan_start, plan_end, clean, Some(THROWABLE));
    gen.try_catch(direct_start, direct_end, clean, Some(THROWABLE));
    Ok(())
}

/// `Exceptions` and `Signature`, the attributes a generated twin of a method carries.
pub(crate) fn declaration_attributes(method: &MethodInfo) -> Vec<Attribute> {
    method
        .attributes
        .iter()
        .filter(|attribute| matches!(attribute.name(), EXCEPTIONS | SIGNATURE))
        .cloned()
        .collect()
}

/// Splits an ordinary method into its private final alias, which keeps the body, and a
/// delegator under the original name whose body is the dispatch entry.
///
/// Native methods lose the modifier and get a body returning the default value.
pub(crate) fn instrument_normal_method(
    rewrite: &mut Rewrite<'_>,
    mut method: MethodInfo,
) -> Result<[MethodInfo; 2]> {
    let access = method.access;
    let name = method.name.clone();

    if method.is_native() {
        method.access.remove(MethodAccess::NATIVE);
        let mut gen = MethodGenerator::new(&method.descriptor, method.is_static())?;
        gen.push_default_return();
        gen.return_value();
        method.set_code(gen.finish());
    }
    let alias = alias_name(&rewrite.class, &name);
    method.access = (method.access | MethodAccess::FINAL).into_private();
    method.name.clone_from(&alias);

    let mut delegator = MethodInfo::new(
        access.difference(MethodAccess::NATIVE | MethodAccess::ABSTRACT | MethodAccess::FINAL),
        &name,
        &method.descriptor,
    );
    delegator.attributes = method
        .attributes
        .iter()
        .filter(|attribute| !attribute.is_code())
        .cloned()
        .collect();

    let mut gen = MethodGenerator::new(&delegator.descriptor, delegator.is_static())?;
    let signature = MethodSignature::new(&rewrite.class, &name, &delegator.descriptor);
    emit_entry(rewrite, &mut gen, &signature, &alias)?;
    delegator.set_code(gen.finish());

    Ok([method, delegator])
}

/// Renames `<clinit>` to the static-initializer alias and adds a `<clinit>` that reports
/// the initialization before running it.
pub(crate) fn instrument_static_initializer(
    rewrite: &Rewrite<'_>,
    mut method: MethodInfo,
) -> Result<[MethodInfo; 2]> {
    method.name = STATIC_INITIALIZER_NAME.to_string();

    let mut gen = MethodGenerator::new("()V", true)?;
    gen.push_class(&rewrite.class);
    gen.field(GETSTATIC, &rewrite.class, CONTEXT_FIELD, CONTEXT_DESCRIPTOR);
    gen.invoke(INVOKESTATIC, HOOKS, CLASS_INITIALIZING.0, CLASS_INITIALIZING.1);
    gen.invoke(INVOKESTATIC, &rewrite.class, STATIC_INITIALIZER_NAME, "()V");
    gen.op(RETURN);

    let notifier = MethodInfo::with_code(MethodAccess::STATIC, "<clinit>", "()V", gen.finish());
    Ok([method, notifier])
}

/// `public <init>() { super(); $$shadow$init(); }`
pub(crate) fn no_arg_constructor(rewrite: &Rewrite<'_>) -> Result<MethodInfo> {
    let super_class = rewrite.super_class()?;
    let mut gen = MethodGenerator::new("()V", false)?;
    gen.load_this();
    gen.invoke(INVOKESPECIAL, super_class, "<init>", "()V");
    gen.load_this();
    gen.invoke(INVOKEVIRTUAL, &rewrite.class, INIT_METHOD, "()V");
    gen.op(RETURN);
    Ok(MethodInfo::with_code(MethodAccess::PUBLIC, "<init>", "()V", gen.finish()))
}

/// A public override of an inherited method that calls the superclass implementation.
pub(crate) fn inherited_method(
    rewrite: &Rewrite<'_>,
    name: &str,
    descriptor: &str,
) -> Result<MethodInfo> {
    let super_class = rewrite.super_class()?;
    let mut gen = MethodGenerator::new(descriptor, false)?;
    gen.load_this();
    gen.load_args();
    gen.invoke(INVOKESPECIAL, super_class, name, descriptor);
    gen.return_value();
    Ok(MethodInfo::with_code(MethodAccess::PUBLIC, name, descriptor, gen.finish()))
}

/// `protected $$shadow$init()`: fills the dispatch slot through the `initializing` hook
/// unless it is already set.
pub(crate) fn init_method(rewrite: &Rewrite<'_>) -> Result<MethodInfo> {
    let class = rewrite.class.as_str();
    let mut gen = MethodGenerator::new("()V", false)?;
    let done = gen.new_label();
    gen.load_this();
    gen.field(GETFIELD, class, SHADOW_DATA_FIELD, OBJECT_DESCRIPTOR);
    gen.jump(IFNONNULL, done);
    gen.load_this();
    gen.load_this();
    gen.field(GETSTATIC, class, CONTEXT_FIELD, CONTEXT_DESCRIPTOR);
    gen.invoke(INVOKESTATIC, HOOKS, INITIALIZING.0, INITIALIZING.1);
    gen.field(PUTFIELD, class, SHADOW_DATA_FIELD, OBJECT_DESCRIPTOR);
    gen.mark(done);
    gen.op(RETURN);
    Ok(MethodInfo::with_code(MethodAccess::PROTECTED, INIT_METHOD, "()V", gen.finish()))
}

/// `public Object $$shadow$getData()`
pub(crate) fn get_data_method(rewrite: &Rewrite<'_>) -> Result<MethodInfo> {
    let descriptor = format!("(){OBJECT_DESCRIPTOR}");
    let mut gen = MethodGenerator::new(&descriptor, false)?;
    gen.load_this();
    gen.field(GETFIELD, &rewrite.class, SHADOW_DATA_FIELD, OBJECT_DESCRIPTOR);
    gen.op(ARETURN);
    Ok(MethodInfo::with_code(
        MethodAccess::PUBLIC,
        GET_DATA_METHOD,
        &descriptor,
        gen.finish(),
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::{
        assembly::{stack::max_stack, Instruction},
        policy::Policy,
        transform::strategy::{CallSites, Strategy},
    };

    fn rewrite<'a>(ids: &'a AtomicU32, policy: &'a Policy, linked: bool) -> Rewrite<'a> {
        Rewrite {
            class: "pkg/a/Widget".to_string(),
            super_class: Some("java/lang/Object".to_string()),
            policy,
            strategy: if linked {
                Strategy::DynamicallyLinked
            } else {
                Strategy::FixedCallSite
            }
            .call_sites(),
            sites: CallSites::new(ids),
        }
    }

    fn hook_calls(method: &MethodInfo, hook: &str) -> usize {
        method
            .code()
            .unwrap()
            .instructions
            .iter()
            .filter(|insn| {
                matches!(
                    insn,
                    Instruction::Method { owner, name, .. } if owner == HOOKS && name == hook
                )
            })
            .count()
    }

    fn size_method() -> MethodInfo {
        let mut gen = MethodGenerator::new("(J)I", false).unwrap();
        gen.emit(Instruction::push_int(3));
        gen.return_value();
        MethodInfo::with_code(
            MethodAccess::PUBLIC | MethodAccess::FINAL,
            "size",
            "(J)I",
            gen.finish(),
        )
    }

    #[test]
    fn test_normal_method_split() {
        let ids = AtomicU32::new(0);
        let policy = Policy::default();
        let mut rewrite = rewrite(&ids, &policy, false);
        let [alias, delegator] = instrument_normal_method(&mut rewrite, size_method()).unwrap();

        assert_eq!(alias.name, "$$shadow$$pkg_a_Widget$size");
        assert!(alias.access.contains(MethodAccess::PRIVATE | MethodAccess::FINAL));
        assert!(!alias.access.contains(MethodAccess::PUBLIC));

        assert_eq!(delegator.name, "size");
        assert_eq!(delegator.access, MethodAccess::PUBLIC);
        assert_eq!(hook_calls(&delegator, "methodInvoked"), 1);

        let code = delegator.code().unwrap();
        assert_eq!(code.handlers.len(), 2);
        assert!(code.instructions.iter().any(|insn| matches!(
            insn,
            Instruction::Method { opcode: INVOKESPECIAL, name, .. } if *name == alias.name
        )));
        // this, long argument, plan
        assert_eq!(code.max_locals, 4);
        assert!(max_stack(&code.instructions, &code.handlers).is_ok());
    }

    #[test]
    fn test_native_method_gets_default_body() {
        let ids = AtomicU32::new(0);
        let policy = Policy::default();
        let mut rewrite = rewrite(&ids, &policy, true);
        let native = MethodInfo::new(
            MethodAccess::PUBLIC | MethodAccess::STATIC | MethodAccess::NATIVE,
            "load",
            "()D",
        );
        let [alias, delegator] = instrument_normal_method(&mut rewrite, native).unwrap();

        assert!(!alias.is_native());
        assert_eq!(
            alias.code().unwrap().instructions,
            vec![Instruction::op(DCONST_0), Instruction::op(DRETURN)]
        );
        assert!(!delegator.is_native());
        assert_eq!(hook_calls(&delegator, "linkedMethodInvoked"), 1);
        assert_eq!(rewrite.sites.len(), 1);
    }

    #[test]
    fn test_delegator_keeps_declaration_attributes() {
        let ids = AtomicU32::new(0);
        let policy = Policy::default();
        let mut rewrite = rewrite(&ids, &policy, false);
        let mut method = size_method();
        method.attributes.push(Attribute::Raw {
            name: EXCEPTIONS.to_string(),
            info: vec![0, 0],
        });
        let [_, delegator] = instrument_normal_method(&mut rewrite, method).unwrap();
        assert_eq!(declaration_attributes(&delegator).len(), 1);
    }

    #[test]
    fn test_static_initializer_reports_then_runs() {
        let ids = AtomicU32::new(0);
        let policy = Policy::default();
        let rewrite = rewrite(&ids, &policy, false);
        let clinit = MethodInfo::with_code(
            MethodAccess::STATIC,
            "<clinit>",
            "()V",
            MethodGenerator::new("()V", true).unwrap().finish(),
        );
        let [alias, notifier] = instrument_static_initializer(&rewrite, clinit).unwrap();
        assert_eq!(alias.name, "__staticInitializer__");
        assert_eq!(notifier.name, "<clinit>");
        assert_eq!(hook_calls(&notifier, "classInitializing"), 1);
    }

    #[test]
    fn test_init_method_checks_slot_first() {
        let ids = AtomicU32::new(0);
        let policy = Policy::default();
        let rewrite = rewrite(&ids, &policy, false);
        let init = init_method(&rewrite).unwrap();
        assert_eq!(init.access, MethodAccess::PROTECTED);
        let code = init.code().unwrap();
        assert!(matches!(code.instructions[2], Instruction::Jump { opcode: IFNONNULL, .. }));
        assert_eq!(max_stack(&code.instructions, &code.handlers).unwrap(), 3);
    }
}
