use std::fmt;

use crate::classfile::internal_name;

/// Matches every method of a type in a [`MethodRef`].
pub const WILDCARD: &str = "*";

/// A method identified by its owning type and name, descriptor-agnostic.
///
/// The owner is kept as an internal name; dotted owners are normalized on construction.
/// A name of [`WILDCARD`] stands for every method of the owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodRef {
    /// Internal name of the owning type
    pub owner: String,
    /// Method name or [`WILDCARD`]
    pub name: String,
}

impl MethodRef {
    /// Creates a reference, normalizing `owner` to internal form.
    ///
    /// ```rust
    /// use shadowbox::policy::MethodRef;
    ///
    /// let by_binary = MethodRef::new("java.lang.System", "nanoTime");
    /// let by_internal = MethodRef::new("java/lang/System", "nanoTime");
    /// assert_eq!(by_binary, by_internal);
    /// ```
    #[must_use]
    pub fn new(owner: &str, name: &str) -> MethodRef {
        MethodRef {
            owner: internal_name(owner),
            name: name.to_string(),
        }
    }

    /// A reference to every method of `owner`.
    #[must_use]
    pub fn wildcard(owner: &str) -> MethodRef {
        MethodRef::new(owner, WILDCARD)
    }

    /// Returns `true` if this reference stands for every method of its owner.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.name == WILDCARD
    }

    /// Returns `true` if a call to `owner.name` is covered by this reference.
    #[must_use]
    pub fn matches(&self, owner: &str, name: &str) -> bool {
        self.owner == owner && (self.is_wildcard() || self.name == name)
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.name)
    }
}
