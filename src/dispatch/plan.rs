use std::{fmt, sync::Arc};

use crate::{
    dispatch::{Instance, MethodSignature, Value},
    shadow::{ShadowInfo, Substitute},
    Result,
};

/// What a shadow map says about a method's declaring type, independent of the receiver.
///
/// This is the cacheable half of a plan lookup: the dynamically linked strategy memoizes
/// it per call site until the declaring type's mapping changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The declaring type is not shadowed
    Original,
    /// The declaring type is shadowed as described
    Shadowed(ShadowInfo),
}

/// A substitute bound to the receiver it runs for.
#[derive(Clone)]
pub struct BoundSubstitute {
    substitute: Arc<dyn Substitute>,
    instance: Option<Instance>,
}

impl BoundSubstitute {
    /// Binds `substitute` to `instance` (`None` for static methods).
    #[must_use]
    pub fn new(substitute: Arc<dyn Substitute>, instance: Option<Instance>) -> BoundSubstitute {
        BoundSubstitute {
            substitute,
            instance,
        }
    }

    /// The substitute.
    #[must_use]
    pub fn substitute(&self) -> &Arc<dyn Substitute> {
        &self.substitute
    }

    /// The receiver, `None` for static methods.
    #[must_use]
    pub fn instance(&self) -> Option<&Instance> {
        self.instance.as_ref()
    }

    /// Runs the substitute's implementation of `signature`.
    ///
    /// # Errors
    /// Propagates the substitute's error, usually [`crate::Error::Thrown`].
    pub fn run(&self, signature: &MethodSignature, args: &[Value]) -> Result<Value> {
        self.substitute
            .invoke(signature, self.instance.as_ref(), args)
    }
}

impl fmt::Debug for BoundSubstitute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundSubstitute")
            .field("substitute", &self.substitute.name())
            .field("instance", &self.instance)
            .finish()
    }
}

/// The decision for one call.
#[derive(Debug, Clone)]
pub enum Plan {
    /// Run the original method body
    RunOriginal,
    /// Run a substitute instead of the original body
    RunSubstitute(BoundSubstitute),
    /// Skip the body and return the default value of the return type
    NoOp,
}

impl Plan {
    /// Executes the plan.
    ///
    /// `original` runs the original body and is only called for [`Plan::RunOriginal`].
    ///
    /// # Errors
    /// Propagates errors of the substitute or of `original`, and [`crate::Error::Malformed`]
    /// for an invalid descriptor in `signature`.
    pub fn run<F>(&self, signature: &MethodSignature, args: &[Value], original: F) -> Result<Value>
    where
        F: FnOnce(&[Value]) -> Result<Value>,
    {
        match self {
            Plan::RunOriginal => original(args),
            Plan::RunSubstitute(bound) => bound.run(signature, args),
            Plan::NoOp => Ok(Value::default_for(&signature.return_type()?)),
        }
    }

    /// Returns `true` for [`Plan::RunOriginal`].
    #[must_use]
    pub fn is_original(&self) -> bool {
        matches!(self, Plan::RunOriginal)
    }

    /// Returns `true` for [`Plan::RunSubstitute`].
    #[must_use]
    pub fn is_substitute(&self) -> bool {
        matches!(self, Plan::RunSubstitute(_))
    }

    /// Returns `true` for [`Plan::NoOp`].
    #[must_use]
    pub fn is_no_op(&self) -> bool {
        matches!(self, Plan::NoOp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shadow::FnSubstitute;

    #[test]
    fn test_plan_run() {
        let sig = MethodSignature::new("pkg/a/Widget", "size", "()I");

        let original = Plan::RunOriginal
            .run(&sig, &[], |_| Ok(Value::Int(1)))
            .unwrap();
        assert_eq!(original, Value::Int(1));

        let noop = Plan::NoOp
            .run(&sig, &[], |_| panic!("original must not run"))
            .unwrap();
        assert_eq!(noop, Value::Int(0));

        let shadow = FnSubstitute::new("WidgetShadow").method("size", "()I", |_, _, _| {
            Ok(Value::Int(9))
        });
        let plan = Plan::RunSubstitute(BoundSubstitute::new(Arc::new(shadow), None));
        assert!(plan.is_substitute());
        let substituted = plan
            .run(&sig, &[], |_| panic!("original must not run"))
            .unwrap();
        assert_eq!(substituted, Value::Int(9));
    }
}
