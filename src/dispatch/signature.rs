use std::fmt;

use crate::{
    classfile::descriptor::{MethodDescriptor, ReturnType},
    policy::MethodRef,
    Result,
};

/// Name of the redirector every rewritten constructor dispatches under.
pub const CONSTRUCTOR_NAME: &str = "__constructor__";

/// Name the original static initializer is moved to.
pub const STATIC_INITIALIZER_NAME: &str = "__staticInitializer__";

/// A fully qualified method as it appears in generated dispatch calls:
/// `owner/name(descriptor)`, for example `pkg/a/Widget/size()I`.
///
/// The owner is an internal name. Constructors are addressed by
/// [`CONSTRUCTOR_NAME`] rather than `<init>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodSignature {
    /// Internal name of the declaring type
    pub owner: String,
    /// Method name
    pub name: String,
    /// Method descriptor, `(I)V`
    pub descriptor: String,
}

impl MethodSignature {
    /// Creates a signature from its parts.
    #[must_use]
    pub fn new(owner: &str, name: &str, descriptor: &str) -> MethodSignature {
        MethodSignature {
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }

    /// Parses `owner/name(descriptor)`.
    ///
    /// ```rust
    /// use shadowbox::dispatch::MethodSignature;
    ///
    /// let sig = MethodSignature::parse("pkg/a/Widget/resize(IJ)V")?;
    /// assert_eq!(sig.owner, "pkg/a/Widget");
    /// assert_eq!(sig.name, "resize");
    /// assert_eq!(sig.descriptor, "(IJ)V");
    /// # Ok::<(), shadowbox::Error>(())
    /// ```
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if there is no descriptor or no owner.
    pub fn parse(signature: &str) -> Result<MethodSignature> {
        let Some(paren) = signature.find('(') else {
            return Err(malformed_error!("Method signature without descriptor - {}", signature));
        };
        let (qualified, descriptor) = signature.split_at(paren);
        let Some((owner, name)) = qualified.rsplit_once('/') else {
            return Err(malformed_error!("Method signature without owner - {}", signature));
        };
        if owner.is_empty() || name.is_empty() {
            return Err(malformed_error!("Incomplete method signature - {}", signature));
        }

        Ok(MethodSignature::new(owner, name, descriptor))
    }

    /// Returns `true` for the constructor redirector.
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR_NAME
    }

    /// The descriptor, parsed.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an invalid descriptor.
    pub fn method_descriptor(&self) -> Result<MethodDescriptor> {
        MethodDescriptor::parse(&self.descriptor)
    }

    /// The return type of the method.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an invalid descriptor.
    pub fn return_type(&self) -> Result<ReturnType> {
        Ok(self.method_descriptor()?.ret)
    }

    /// The descriptor-agnostic reference used for interceptor lookup.
    #[must_use]
    pub fn method_ref(&self) -> MethodRef {
        MethodRef::new(&self.owner, &self.name)
    }

    /// Returns `true` if this is `owner.name` with any descriptor.
    #[must_use]
    pub fn matches(&self, owner: &str, name: &str) -> bool {
        self.method_ref().matches(&crate::classfile::internal_name(owner), name)
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}{}", self.owner, self.name, self.descriptor)
    }
}
