use std::fmt;

/// Prefix of the direct alias a rewritten method body is moved to.
pub const SHADOW_PREFIX: &str = "$$shadow$$";

/// Class-name prefixes of frames that belong to dispatch plumbing rather than user code.
pub const DISPATCH_FRAME_PREFIXES: [&str; 4] = [
    "org.shadowbox.internal.",
    "sun.reflect.",
    "java.lang.reflect.",
    "jdk.internal.reflect.",
];

/// One stack trace element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Binary name of the class
    pub class_name: String,
    /// Method name
    pub method_name: String,
    /// Source file, when known
    pub file_name: Option<String>,
    /// Line number; negative when unknown (`-2` marks native frames)
    pub line: i32,
}

impl StackFrame {
    /// Creates a frame.
    #[must_use]
    pub fn new(class_name: &str, method_name: &str, file_name: Option<&str>, line: i32) -> Self {
        StackFrame {
            class_name: class_name.to_string(),
            method_name: method_name.to_string(),
            file_name: file_name.map(str::to_string),
            line,
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}(", self.class_name, self.method_name)?;
        match (&self.file_name, self.line) {
            (_, -2) => write!(f, "Native Method)"),
            (Some(file), line) if line >= 0 => write!(f, "{file}:{line})"),
            (Some(file), _) => write!(f, "{file})"),
            (None, _) => write!(f, "Unknown Source)"),
        }
    }
}

/// A JVM throwable raised by original or substitute code.
///
/// Carries everything a host needs to re-raise it: the binary class name, the message,
/// the stack trace and the cause chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Throwable {
    /// Binary name of the throwable's class (`java.io.IOException`)
    pub class_name: String,
    /// Detail message
    pub message: Option<String>,
    /// Stack trace, innermost frame first
    pub stack_trace: Vec<StackFrame>,
    /// The cause, if any
    pub cause: Option<Box<Throwable>>,
}

impl Throwable {
    /// Creates a throwable without a stack trace.
    #[must_use]
    pub fn new(class_name: &str, message: Option<&str>) -> Throwable {
        Throwable {
            class_name: class_name.to_string(),
            message: message.map(str::to_string),
            stack_trace: Vec::new(),
            cause: None,
        }
    }

    /// `java.lang.RuntimeException`
    #[must_use]
    pub fn runtime(message: &str) -> Throwable {
        Throwable::new("java.lang.RuntimeException", Some(message))
    }

    /// `java.lang.UnsupportedOperationException`
    #[must_use]
    pub fn unsupported_operation(message: &str) -> Throwable {
        Throwable::new("java.lang.UnsupportedOperationException", Some(message))
    }

    /// `java.lang.ClassCastException`
    #[must_use]
    pub fn class_cast(message: &str) -> Throwable {
        Throwable::new("java.lang.ClassCastException", Some(message))
    }

    /// `java.lang.IllegalStateException`
    #[must_use]
    pub fn illegal_state(message: &str) -> Throwable {
        Throwable::new("java.lang.IllegalStateException", Some(message))
    }

    /// Appends a frame to the stack trace.
    #[must_use]
    pub fn with_frame(mut self, frame: StackFrame) -> Throwable {
        self.stack_trace.push(frame);
        self
    }

    /// Sets the cause.
    #[must_use]
    pub fn with_cause(mut self, cause: Throwable) -> Throwable {
        self.cause = Some(Box::new(cause));
        self
    }
}

impl fmt::Display for Throwable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.class_name, message),
            None => write!(f, "{}", self.class_name),
        }
    }
}

impl std::error::Error for Throwable {}

/// Removes dispatch frames from a throwable's stack trace.
///
/// Frames of dispatch plumbing ([`DISPATCH_FRAME_PREFIXES`]) are dropped, a frame that
/// repeats the previous kept frame's class, method and file with an unknown line is
/// collapsed into it, and frames of direct aliases (`$$shadow$$pkg_Widget$size`) are
/// renamed back to the original method (`size`). Class, message and cause are untouched.
#[must_use]
pub fn clean_stack_trace(mut throwable: Throwable) -> Throwable {
    let mut kept: Vec<StackFrame> = Vec::with_capacity(throwable.stack_trace.len());

    for mut frame in throwable.stack_trace.drain(..) {
        if let Some(previous) = kept.last() {
            if frame.line < 0
                && frame.file_name.is_some()
                && frame.file_name == previous.file_name
                && frame.class_name == previous.class_name
                && strip_alias(&frame.method_name) == previous.method_name
            {
                continue;
            }
        }

        if DISPATCH_FRAME_PREFIXES
            .iter()
            .any(|prefix| frame.class_name.starts_with(prefix))
        {
            continue;
        }

        frame.method_name = strip_alias(&frame.method_name).to_string();
        kept.push(frame);
    }

    throwable.stack_trace = kept;
    throwable
}

/// `$$shadow$$pkg_Widget$size` to `size`; other names are returned unchanged.
#[must_use]
pub fn strip_alias(method_name: &str) -> &str {
    let Some(rest) = method_name.strip_prefix(SHADOW_PREFIX) else {
        return method_name;
    };
    match rest.find('$') {
        Some(dollar) => &rest[dollar + 1..],
        None => method_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(class: &str, method: &str, line: i32) -> StackFrame {
        StackFrame::new(class, method, Some("Widget.java"), line)
    }

    #[test]
    fn test_strip_alias() {
        assert_eq!(strip_alias("$$shadow$$pkg_a_Widget$size"), "size");
        assert_eq!(strip_alias("$$shadow$$pkg_a_Widget$__constructor__"), "__constructor__");
        assert_eq!(strip_alias("size"), "size");
        assert_eq!(strip_alias("$$shadow$$broken"), "$$shadow$$broken");
    }

    #[test]
    fn test_clean_removes_dispatch_frames() {
        let thrown = Throwable::new("java.io.IOException", Some("disk gone"))
            .with_frame(frame("pkg.a.Widget", "$$shadow$$pkg_a_Widget$save", 42))
            .with_frame(frame("org.shadowbox.internal.Plan", "run", 10))
            .with_frame(frame("jdk.internal.reflect.NativeMethodAccessorImpl", "invoke0", -2))
            .with_frame(frame("java.lang.reflect.Method", "invoke", 498))
            .with_frame(frame("pkg.a.Widget", "save", 12))
            .with_frame(frame("pkg.a.Caller", "run", 7));

        let cleaned = clean_stack_trace(thrown.clone());
        assert_eq!(cleaned.class_name, thrown.class_name);
        assert_eq!(cleaned.message, thrown.message);
        let methods: Vec<_> = cleaned
            .stack_trace
            .iter()
            .map(|f| format!("{}.{}", f.class_name, f.method_name))
            .collect();
        assert_eq!(
            methods,
            vec!["pkg.a.Widget.save", "pkg.a.Widget.save", "pkg.a.Caller.run"]
        );
    }

    #[test]
    fn test_clean_collapses_repeated_unknown_lines() {
        let thrown = Throwable::runtime("boom")
            .with_frame(frame("pkg.a.Widget", "save", 12))
            .with_frame(frame("pkg.a.Widget", "$$shadow$$pkg_a_Widget$save", -1))
            .with_frame(StackFrame::new("pkg.a.Widget", "save", None, -1))
            .with_frame(frame("pkg.a.Widget", "save", 13));

        let cleaned = clean_stack_trace(thrown);
        let lines: Vec<_> = cleaned.stack_trace.iter().map(|f| f.line).collect();
        assert_eq!(lines, vec![12, -1, 13]);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Throwable::illegal_state("closed").to_string(),
            "java.lang.IllegalStateException: closed"
        );
        assert_eq!(
            frame("pkg.a.Widget", "save", 3).to_string(),
            "pkg.a.Widget.save(Widget.java:3)"
        );
    }
}
