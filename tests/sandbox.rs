//! Integration tests for sandboxes: acquisition precedence, shadow-map replacement under
//! both strategies, exception cleaning and the dump directory.

mod common;

use std::{
    fs,
    sync::{atomic::Ordering, Arc},
};

use shadowbox::{dispatch::StackFrame, prelude::*, transform::alias_name};

fn policy() -> Policy {
    Policy::builder()
        .instrument_package("pkg.a.")
        .exclude_from_instrumentation("pkg.a.Skip")
        .exclude_package_from_acquisition("java.")
        .build()
}

fn catalog() -> Arc<MemoryCatalog> {
    Arc::new(
        MemoryCatalog::new()
            .with_instances("SmallShadow", |_| {
                Arc::new(FnSubstitute::new("SmallShadow").method("size", "()I", |_, _, _| {
                    Ok(Value::Int(1))
                })) as Arc<dyn Substitute>
            })
            .with_instances("LargeShadow", |_| {
                Arc::new(
                    FnSubstitute::new("LargeShadow")
                        .method("size", "()I", |_, _, _| Ok(Value::Int(100)))
                        .throwing(
                            "fail",
                            "()V",
                            Throwable::new("java.io.IOException", Some("disk gone"))
                                .with_frame(StackFrame::new(
                                    "shadows.LargeShadow",
                                    "fail",
                                    None,
                                    12,
                                ))
                                .with_frame(StackFrame::new(
                                    "org.shadowbox.internal.Plan",
                                    "run",
                                    None,
                                    -1,
                                ))
                                .with_frame(StackFrame::new(
                                    "pkg.a.Widget",
                                    &alias_name("pkg/a/Widget", "fail"),
                                    Some("Widget.java"),
                                    30,
                                )),
                        ),
                ) as Arc<dyn Substitute>
            }),
    )
}

fn sandbox(config: SandboxConfig, shadow: &str) -> Sandbox {
    let sandbox = Sandbox::new(policy(), common::system(), config);
    let map = ShadowMap::builder()
        .add(ShadowInfo::new("pkg.a.Widget", shadow))
        .build();
    let runtime = ShadowDispatcher::new(map, catalog(), Interceptors::new());
    sandbox.configure(Arc::new(runtime), policy()).unwrap();
    sandbox
}

fn size(sandbox: &Sandbox, instance: &Instance) -> Value {
    sandbox
        .context()
        .invoke(
            &MethodSignature::new("pkg/a/Widget", "size", "()I"),
            false,
            Some(instance),
            &[],
            |_| Ok(Value::Int(-1)),
        )
        .unwrap()
}

#[test]
fn test_acquisition_scenario() {
    let sandbox = sandbox(SandboxConfig::portable(), "SmallShadow");

    let widget = sandbox.acquire("pkg.a.Widget").unwrap();
    assert!(widget.is_instrumented());
    assert_eq!(widget.namespace(), sandbox.name());

    let skip = sandbox.acquire("pkg.a.Skip").unwrap();
    assert!(!skip.is_instrumented());
    assert_eq!(skip.namespace(), sandbox.name());

    let other = sandbox.acquire("pkg.b.Other").unwrap();
    assert!(!other.is_instrumented());

    let thread = sandbox.acquire("java.lang.Thread").unwrap();
    assert_eq!(thread.namespace(), shadowbox::sandbox::SYSTEM_NAMESPACE);
}

#[test]
fn test_allow_list_beats_package_exclusion() {
    let policy = Policy::builder()
        .exclude_package_from_acquisition("org.shadowbox.")
        .build();
    assert!(policy.should_acquire("org.shadowbox.internal.Hooks"));
    assert!(!policy.should_acquire("org.shadowbox.Other"));
}

#[test]
fn test_replacement_reaches_subtypes_under_both_strategies() {
    for config in [SandboxConfig::portable(), SandboxConfig::linked()] {
        let sandbox = sandbox(config, "SmallShadow");
        let gadget = sandbox.instantiate("pkg.a.Gadget").unwrap();
        assert_eq!(size(&sandbox, &gadget), Value::Int(1));

        let map = ShadowMap::builder()
            .add(ShadowInfo::new("pkg.a.Widget", "LargeShadow"))
            .build();
        sandbox.replace_shadow_map(map).unwrap();
        assert_eq!(size(&sandbox, &gadget), Value::Int(100));

        sandbox.replace_shadow_map(ShadowMap::empty()).unwrap();
        assert_eq!(size(&sandbox, &gadget), Value::Int(-1));
    }
}

#[test]
fn test_linked_entry_sites_follow_replacement() {
    let sandbox = sandbox(SandboxConfig::linked(), "SmallShadow");
    let widget = sandbox.instantiate("pkg.a.Widget").unwrap();
    let table = Arc::clone(sandbox.context().call_sites());
    let id = (0..table.id_source().load(Ordering::Relaxed))
        .find(|id| {
            table.site(*id).is_some_and(|site| {
                site.signature().name == "size" && site.declaring_type() == "pkg/a/Widget"
            })
        })
        .unwrap();

    let call = |sandbox: &Sandbox| {
        sandbox
            .context()
            .invoke_linked(id, Some(&widget), &[], |_| Ok(Value::Int(-1)))
            .unwrap()
    };
    assert_eq!(call(&sandbox), Value::Int(1));
    assert!(table.is_memoized(id));

    sandbox
        .replace_shadow_map(
            ShadowMap::builder()
                .add(ShadowInfo::new("pkg.a.Widget", "LargeShadow"))
                .build(),
        )
        .unwrap();
    assert!(!table.is_memoized(id));
    assert_eq!(call(&sandbox), Value::Int(100));
}

#[test]
fn test_substitute_exception_is_cleaned() {
    let sandbox = sandbox(SandboxConfig::portable(), "LargeShadow");
    let widget = sandbox.instantiate("pkg.a.Widget").unwrap();
    let error = sandbox
        .context()
        .invoke(
            &MethodSignature::new("pkg/a/Widget", "fail", "()V"),
            false,
            Some(&widget),
            &[],
            |_| Ok(Value::Void),
        )
        .unwrap_err();

    let thrown = error.throwable().unwrap();
    assert_eq!(thrown.class_name, "java.io.IOException");
    assert_eq!(thrown.message.as_deref(), Some("disk gone"));
    let methods: Vec<&str> = thrown
        .stack_trace
        .iter()
        .map(|frame| frame.method_name.as_str())
        .collect();
    assert_eq!(methods, vec!["fail", "fail"]);
    assert!(!thrown
        .stack_trace
        .iter()
        .any(|frame| frame.class_name.starts_with("org.shadowbox.internal.")));
}

#[test]
fn test_parallel_acquisition_and_dump() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = sandbox(
        SandboxConfig::linked().with_dump_dir(dir.path()),
        "SmallShadow",
    );
    let classes = sandbox
        .acquire_all(&["pkg.a.Widget", "pkg.a.Gadget", "pkg.a.Skip", "pkg.b.Other"])
        .unwrap();
    assert_eq!(classes.len(), 4);
    assert_eq!(sandbox.loader().len(), 4);

    let dumped = fs::read(dir.path().join("pkg/a/Gadget.class")).unwrap();
    assert_eq!(dumped, classes[1].bytes());
}

#[test]
fn test_missing_class_is_not_found() {
    let sandbox = sandbox(SandboxConfig::portable(), "SmallShadow");
    assert!(matches!(
        sandbox.acquire("pkg.a.Missing"),
        Err(Error::NotFound(name)) if name == "pkg.a.Missing"
    ));
}

#[test]
fn test_directory_supplier_sandbox() {
    let dir = tempfile::tempdir().unwrap();
    for (name, bytes) in common::classes() {
        let path = dir.path().join(format!("{}.class", name.replace('.', "/")));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }
    let supplier = CompositeSupplier::new()
        .with(Arc::new(MemorySupplier::default()))
        .with(Arc::new(DirectorySupplier::new(dir.path()).unwrap()));
    let system = Arc::new(SystemNamespace::new(Arc::new(supplier)));
    let sandbox = Sandbox::new(policy(), system, SandboxConfig::portable());

    assert!(sandbox.acquire("pkg.a.Widget").unwrap().is_instrumented());
    assert!(matches!(
        sandbox.instantiate("pkg.a.Widget"),
        Err(Error::NotConfigured(_))
    ));
}
