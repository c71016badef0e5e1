use std::{
    collections::BTreeSet,
    sync::{atomic::AtomicU32, Arc},
};

use tracing::{debug, instrument};

use crate::{
    classfile::{
        binary_name, ClassAccess, ClassFile, FieldAccess, FieldInfo, MethodInfo, ReadDepth,
    },
    dispatch::CallSite,
    policy::{ClassDescriptor, Policy},
    transform::{
        ancestry::ClassIndex,
        constructor::instrument_constructor,
        intercept::rewrite_body,
        methods::{
            get_data_method, inherited_method, init_method, instrument_normal_method,
            instrument_static_initializer, no_arg_constructor, OBJECT_METHODS,
        },
        names::{CONTEXT_DESCRIPTOR, CONTEXT_FIELD, MARKER, OBJECT_DESCRIPTOR, SHADOW_DATA_FIELD},
        strategy::{CallSiteStrategy, CallSites, Strategy},
        translate::translate_types,
    },
    Result,
};

/// The class being rewritten and where its call sites go.
pub(crate) struct Rewrite<'a> {
    pub class: String,
    pub super_class: Option<String>,
    pub policy: &'a Policy,
    pub strategy: &'a dyn CallSiteStrategy,
    pub sites: CallSites<'a>,
}

impl Rewrite<'_> {
    pub fn super_class(&self) -> Result<&str> {
        self.super_class.as_deref().ok_or_else(|| {
            structural_error!(&self.class, "", "an instrumented class needs a superclass")
        })
    }
}

/// Output of [`ClassTransformer::transform`].
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    /// Binary name of the class, after name translation
    pub name: String,
    /// The class file to define
    pub bytes: Vec<u8>,
    /// `false` if only name translation was applied
    pub instrumented: bool,
    /// Call sites emitted by [`Strategy::DynamicallyLinked`]; empty otherwise
    pub call_sites: Vec<CallSite>,
}

/// Rewrites class files for one namespace.
///
/// Acquired classes that the policy does not instrument only get their type references
/// translated; instrumented classes are rewritten so that every method, constructor and
/// static initializer reaches the dispatch runtime first. Output is deterministic for
/// identical input bytes, policy and call-site counter state.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::{atomic::AtomicU32, Arc};
/// use shadowbox::{
///     policy::Policy,
///     sandbox::MemorySupplier,
///     transform::{ClassIndex, ClassTransformer, Strategy},
/// };
///
/// let supplier = Arc::new(MemorySupplier::default());
/// let transformer = ClassTransformer::new(
///     Policy::builder().instrument_package("pkg.a.").build(),
///     Strategy::FixedCallSite,
///     Arc::new(ClassIndex::new(supplier)),
///     Arc::new(AtomicU32::new(0)),
/// );
///
/// let bytes = std::fs::read("classes/pkg/a/Widget.class")?;
/// let transformed = transformer.transform(&bytes)?;
/// assert!(transformed.instrumented);
/// # Ok::<(), shadowbox::Error>(())
/// ```
#[derive(Debug)]
pub struct ClassTransformer {
    policy: Policy,
    strategy: Strategy,
    index: Arc<ClassIndex>,
    ids: Arc<AtomicU32>,
}

impl ClassTransformer {
    /// Creates a transformer drawing linked call-site ids from `ids`.
    #[must_use]
    pub fn new(
        policy: Policy,
        strategy: Strategy,
        index: Arc<ClassIndex>,
        ids: Arc<AtomicU32>,
    ) -> ClassTransformer {
        ClassTransformer {
            policy,
            strategy,
            index,
            ids,
        }
    }

    /// The policy classes are rewritten under.
    #[must_use]
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// The call-site strategy of rewritten code.
    #[must_use]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// The ancestor index consulted for inherited methods.
    #[must_use]
    pub fn index(&self) -> &Arc<ClassIndex> {
        &self.index
    }

    /// Rewrites one class file.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] for unreadable input and
    /// [`Error::StructuralViolation`] when the class breaks an assumption of the
    /// rewrite; neither is worth retrying.
    #[instrument(level = "debug", skip_all, fields(strategy = %self.strategy))]
    pub fn transform(&self, bytes: &[u8]) -> Result<Transformed> {
        let mut class = ClassFile::parse(bytes, ReadDepth::Headers)?;
        let translated = translate_types(&mut class, self.policy.class_name_translations())?;
        let descriptor = ClassDescriptor::from_class(&class)?;

        if !self.policy.should_instrument(&descriptor) {
            debug!(class = %descriptor.binary_name, translated, "not instrumented");
            let bytes = if translated {
                class.to_bytes()?
            } else {
                bytes.to_vec()
            };
            return Ok(Transformed {
                name: descriptor.binary_name,
                bytes,
                instrumented: false,
                call_sites: Vec::new(),
            });
        }

        class.decode_bodies()?;
        let stubs = self.policy.contains_stubs(&descriptor.binary_name);
        let mut rewrite = Rewrite {
            class: class.this_class.clone(),
            super_class: class.super_class.clone(),
            policy: &self.policy,
            strategy: self.strategy.call_sites(),
            sites: CallSites::new(&self.ids),
        };
        instrument(&mut class, &mut rewrite, &self.index, stubs)?;
        let call_sites = rewrite.sites.into_sites();

        debug!(
            class = %descriptor.binary_name,
            methods = class.methods.len(),
            call_sites = call_sites.len(),
            "instrumented"
        );
        let hierarchy = self
            .index
            .hierarchy_for(&rewrite.class, rewrite.super_class.as_deref());
        let bytes = class.to_bytes_with(&hierarchy)?;
        Ok(Transformed {
            name: binary_name(&class.this_class),
            bytes,
            instrumented: true,
            call_sites,
        })
    }
}

/// Rewrites a class with decoded bodies in place.
pub(crate) fn instrument(
    class: &mut ClassFile,
    rewrite: &mut Rewrite<'_>,
    index: &ClassIndex,
    stubs: bool,
) -> Result<()> {
    class.access = class.access.union(ClassAccess::PUBLIC).difference(ClassAccess::FINAL);
    if !class.interfaces.iter().any(|interface| interface == MARKER) {
        class.interfaces.push(MARKER.to_string());
    }

    let declared: BTreeSet<String> = class
        .methods
        .iter()
        .map(|method| format!("{}{}", method.name, method.descriptor))
        .collect();
    let has_static_initializer = declared.contains("<clinit>()V");

    let mut methods: Vec<MethodInfo> = Vec::with_capacity(class.methods.len() * 2 + 6);
    for mut method in std::mem::take(&mut class.methods) {
        let location = format!("{}{}", method.name, method.descriptor);
        if let Some(code) = method.code_mut() {
            rewrite_body(rewrite, code, &location)?;
        }

        match method.name.as_str() {
            "<clinit>" => methods.extend(instrument_static_initializer(rewrite, method)?),
            "<init>" => methods.extend(instrument_constructor(rewrite, method, stubs)?),
            _ if method.is_synthetic() || method.is_abstract() => methods.push(method),
            _ => methods.extend(instrument_normal_method(rewrite, method)?),
        }
    }

    if !declared.contains("<init>()V") {
        methods.push(no_arg_constructor(rewrite)?);
    }

    let super_class = rewrite.super_class()?.to_string();
    for (name, descriptor) in OBJECT_METHODS {
        if declared.contains(&format!("{name}{descriptor}"))
            || index.overrides_final(&super_class, name, descriptor)
        {
            continue;
        }
        let inherited = inherited_method(rewrite, name, descriptor)?;
        methods.extend(instrument_normal_method(rewrite, inherited)?);
    }

    methods.push(init_method(rewrite)?);
    methods.push(get_data_method(rewrite)?);
    class.methods = methods;

    if has_static_initializer {
        for field in class
            .fields
            .iter_mut()
            .filter(|field| field.access.contains(FieldAccess::STATIC))
        {
            field.access.remove(FieldAccess::FINAL);
        }
    }
    class.fields.push(FieldInfo::new(
        FieldAccess::PUBLIC,
        SHADOW_DATA_FIELD,
        OBJECT_DESCRIPTOR,
    ));
    class.fields.push(FieldInfo::new(
        FieldAccess::PUBLIC | FieldAccess::STATIC,
        CONTEXT_FIELD,
        CONTEXT_DESCRIPTOR,
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{opcodes::*, Instruction},
        classfile::{
            attribute::{Attribute, CODE},
            MethodAccess,
        },
        sandbox::MemorySupplier,
        test::{frame_coverage, parse_code, widget_class, ClassBuilder},
        transform::names::{GET_DATA_METHOD, INIT_METHOD},
    };

    fn transformer(policy: Policy, strategy: Strategy) -> ClassTransformer {
        ClassTransformer::new(
            policy,
            strategy,
            Arc::new(ClassIndex::new(Arc::new(MemorySupplier::default()))),
            Arc::new(AtomicU32::new(0)),
        )
    }

    fn instrumenting() -> Policy {
        Policy::builder().instrument_package("pkg.a.").build()
    }

    fn names(class: &ClassFile) -> Vec<String> {
        class
            .methods
            .iter()
            .map(|method| format!("{}{}", method.name, method.descriptor))
            .collect()
    }

    #[test]
    fn test_widget_is_instrumented() {
        let transformed = transformer(instrumenting(), Strategy::FixedCallSite)
            .transform(&widget_class())
            .unwrap();
        assert!(transformed.instrumented);
        assert_eq!(transformed.name, "pkg.a.Widget");
        assert!(transformed.call_sites.is_empty());

        let class = parse_code(&transformed.bytes);
        assert!(class.access.contains(ClassAccess::PUBLIC));
        assert!(!class.access.contains(ClassAccess::FINAL));
        assert!(class.interfaces.iter().any(|name| name == MARKER));
        assert!(class.field(SHADOW_DATA_FIELD).is_some());
        assert!(class
            .field(CONTEXT_FIELD)
            .unwrap()
            .access
            .contains(FieldAccess::STATIC));

        let methods = names(&class);
        for expected in [
            "size()I",
            "$$shadow$$pkg_a_Widget$size()I",
            "twice(J)J",
            "$$shadow$$pkg_a_Widget$twice(J)J",
            "<init>()V",
            "<init>(I)V",
            "__constructor__()V",
            "__constructor__(I)V",
            "<clinit>()V",
            "__staticInitializer__()V",
            "equals(Ljava/lang/Object;)Z",
            "hashCode()I",
            "toString()Ljava/lang/String;",
        ] {
            assert!(
                methods.iter().any(|name| name == expected),
                "missing {expected} in {methods:?}"
            );
        }
        assert!(class.method(INIT_METHOD, "()V").is_some());
        assert!(class.method(GET_DATA_METHOD, "()Ljava/lang/Object;").is_some());
        assert_eq!(
            class.method("size", "()I").unwrap().access,
            MethodAccess::PUBLIC
        );
        assert!(class
            .method("$$shadow$$pkg_a_Widget$size", "()I")
            .unwrap()
            .access
            .contains(MethodAccess::PRIVATE));
    }

    #[test]
    fn test_declared_object_methods_are_not_duplicated() {
        let bytes = ClassBuilder::new("pkg/a/Named")
            .default_constructor()
            .method("toString", "()Ljava/lang/String;", |gen| {
                gen.push_string("named");
                gen.return_value();
            })
            .build();
        let transformed = transformer(instrumenting(), Strategy::FixedCallSite)
            .transform(&bytes)
            .unwrap();
        let methods = names(&parse_code(&transformed.bytes));
        assert_eq!(
            methods
                .iter()
                .filter(|name| *name == "toString()Ljava/lang/String;")
                .count(),
            1
        );
        assert_eq!(
            methods
                .iter()
                .filter(|name| name.starts_with("<init>()V"))
                .count(),
            1
        );
    }

    #[test]
    fn test_enum_final_methods_are_not_inherited() {
        let bytes = ClassBuilder::new("pkg/a/Color")
            .extends("java/lang/Enum")
            .constructor("(Ljava/lang/String;I)V", |gen| {
                gen.load_this();
                gen.load_arg(0);
                gen.load_arg(1);
                gen.invoke(INVOKESPECIAL, "java/lang/Enum", "<init>", "(Ljava/lang/String;I)V");
                gen.op(RETURN);
            })
            .build();
        let transformed = transformer(instrumenting(), Strategy::FixedCallSite)
            .transform(&bytes)
            .unwrap();
        let methods = names(&parse_code(&transformed.bytes));
        assert!(!methods.iter().any(|name| name == "hashCode()I"));
        assert!(!methods.iter().any(|name| name == "equals(Ljava/lang/Object;)Z"));
        assert!(methods.iter().any(|name| name == "toString()Ljava/lang/String;"));
    }

    #[test]
    fn test_static_finals_lose_final_only_with_initializer() {
        let mut with_init = ClassBuilder::new("pkg/a/Constants")
            .default_constructor()
            .static_init(|gen| gen.op(RETURN))
            .class_file();
        with_init.fields.push(FieldInfo::new(
            FieldAccess::PUBLIC | FieldAccess::STATIC | FieldAccess::FINAL,
            "LIMIT",
            "I",
        ));
        let mut without_init = ClassBuilder::new("pkg/a/Plain")
            .default_constructor()
            .class_file();
        without_init.fields.push(FieldInfo::new(
            FieldAccess::PUBLIC | FieldAccess::STATIC | FieldAccess::FINAL,
            "LIMIT",
            "I",
        ));

        let transformer = transformer(instrumenting(), Strategy::FixedCallSite);
        let stripped = transformer.transform(&with_init.to_bytes().unwrap()).unwrap();
        let kept = transformer.transform(&without_init.to_bytes().unwrap()).unwrap();
        assert!(!parse_code(&stripped.bytes)
            .field("LIMIT")
            .unwrap()
            .access
            .contains(FieldAccess::FINAL));
        assert!(parse_code(&kept.bytes)
            .field("LIMIT")
            .unwrap()
            .access
            .contains(FieldAccess::FINAL));
    }

    #[test]
    fn test_uninstrumented_class_passes_through() {
        let bytes = widget_class();
        let transformed = transformer(Policy::default(), Strategy::FixedCallSite)
            .transform(&bytes)
            .unwrap();
        assert!(!transformed.instrumented);
        assert_eq!(transformed.bytes, bytes);
    }

    #[test]
    fn test_uninstrumented_class_is_still_translated() {
        let bytes = ClassBuilder::new("pkg/b/User")
            .default_constructor()
            .static_method("make", "()Lpkg/old/Thing;", |gen| {
                gen.op(ACONST_NULL);
                gen.return_value();
            })
            .build();
        let policy = Policy::builder()
            .translate_class_name("pkg.old.Thing", "pkg.new.Thing")
            .build();
        let transformed = transformer(policy, Strategy::FixedCallSite)
            .transform(&bytes)
            .unwrap();
        assert!(!transformed.instrumented);
        let class = parse_code(&transformed.bytes);
        assert!(class.method("make", "()Lpkg/new/Thing;").is_some());
    }

    #[test]
    fn test_linked_strategy_reports_call_sites() {
        let transformer = transformer(instrumenting(), Strategy::DynamicallyLinked);
        let first = transformer.transform(&widget_class()).unwrap();
        assert!(!first.call_sites.is_empty());
        let second = transformer.transform(&widget_class()).unwrap();
        let first_max = first.call_sites.iter().map(|site| site.id).max().unwrap();
        assert!(second.call_sites.iter().all(|site| site.id > first_max));

        let class = parse_code(&first.bytes);
        let body = class.method("size", "()I").unwrap().code().unwrap();
        assert!(body.instructions.iter().any(|insn| matches!(
            insn,
            Instruction::Method { name, .. } if name == "linkedMethodInvoked"
        )));
    }

    #[test]
    fn test_output_is_deterministic() {
        let first = transformer(instrumenting(), Strategy::FixedCallSite)
            .transform(&widget_class())
            .unwrap();
        let second = transformer(instrumenting(), Strategy::FixedCallSite)
            .transform(&widget_class())
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_rewritten_bodies_carry_frames() {
        let transformed = transformer(instrumenting(), Strategy::FixedCallSite)
            .transform(&widget_class())
            .unwrap();
        let class = ClassFile::parse(&transformed.bytes, ReadDepth::Headers).unwrap();

        let mut framed = 0;
        for method in &class.methods {
            for attribute in &method.attributes {
                let Attribute::Raw { name, info } = attribute else {
                    continue;
                };
                if name != CODE {
                    continue;
                }
                let (required, described) = frame_coverage(info, &class.constant_pool);
                assert!(
                    required.is_subset(&described),
                    "{}{}: {:?} not covered by {:?}",
                    method.name,
                    method.descriptor,
                    required,
                    described
                );
                framed += usize::from(!required.is_empty());
            }
        }
        // every entry point branches to its direct path and has a cleaning handler
        assert!(framed >= 5);
    }

    #[test]
    fn test_interface_is_left_alone() {
        let bytes = ClassBuilder::new("pkg/a/Shape")
            .access(ClassAccess::PUBLIC | ClassAccess::INTERFACE | ClassAccess::ABSTRACT)
            .bodyless_method(
                MethodAccess::PUBLIC | MethodAccess::ABSTRACT,
                "area",
                "()D",
            )
            .build();
        let transformed = transformer(instrumenting(), Strategy::FixedCallSite)
            .transform(&bytes)
            .unwrap();
        assert!(!transformed.instrumented);
    }

    #[test]
    fn test_garbage_is_malformed() {
        let error = transformer(instrumenting(), Strategy::FixedCallSite)
            .transform(&[0xCA, 0xFE])
            .unwrap_err();
        assert!(matches!(error, crate::Error::Malformed { .. } | crate::Error::OutOfBounds));
    }

    #[test]
    fn test_constructor_without_super_call_fails() {
        let bytes = ClassBuilder::new("pkg/a/Broken")
            .constructor("()V", |gen| gen.op(RETURN))
            .build();
        let error = transformer(instrumenting(), Strategy::FixedCallSite)
            .transform(&bytes)
            .unwrap_err();
        assert!(matches!(error, crate::Error::StructuralViolation { .. }));
    }
}
