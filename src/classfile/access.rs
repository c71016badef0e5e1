//! Access and property flags for classes, fields and methods.
//!
//! The class-file format packs modifiers into a `u16`. Some bit values are reused with a
//! different meaning depending on where they appear (`0x0020` is `ACC_SUPER` on classes and
//! `ACC_SYNCHRONIZED` on methods, `0x0040` is `ACC_VOLATILE` on fields and `ACC_BRIDGE` on
//! methods), so each location gets its own flag type.
//!
//! Flags are parsed with `from_bits_retain` so that bits this crate does not model survive a
//! read/write cycle unchanged.

use bitflags::bitflags;

bitflags! {
    /// Modifiers of a class or interface (`ClassFile.access_flags`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClassAccess: u16 {
        /// Declared public
        const PUBLIC = 0x0001;
        /// Declared final; no subclasses allowed
        const FINAL = 0x0010;
        /// Treat superclass methods specially when invoked by invokespecial
        const SUPER = 0x0020;
        /// Is an interface, not a class
        const INTERFACE = 0x0200;
        /// Declared abstract; must not be instantiated
        const ABSTRACT = 0x0400;
        /// Declared synthetic; not present in the source code
        const SYNTHETIC = 0x1000;
        /// Declared as an annotation interface
        const ANNOTATION = 0x2000;
        /// Declared as an enum class
        const ENUM = 0x4000;
        /// Is a module, not a class or interface
        const MODULE = 0x8000;
    }
}

bitflags! {
    /// Modifiers of a field (`field_info.access_flags`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FieldAccess: u16 {
        /// Declared public
        const PUBLIC = 0x0001;
        /// Declared private
        const PRIVATE = 0x0002;
        /// Declared protected
        const PROTECTED = 0x0004;
        /// Declared static
        const STATIC = 0x0008;
        /// Declared final; never directly assigned after construction
        const FINAL = 0x0010;
        /// Declared volatile; cannot be cached
        const VOLATILE = 0x0040;
        /// Declared transient; not written or read by a persistent object manager
        const TRANSIENT = 0x0080;
        /// Declared synthetic; not present in the source code
        const SYNTHETIC = 0x1000;
        /// Declared as an element of an enum class
        const ENUM = 0x4000;
    }
}

bitflags! {
    /// Modifiers of a method (`method_info.access_flags`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodAccess: u16 {
        /// Declared public
        const PUBLIC = 0x0001;
        /// Declared private
        const PRIVATE = 0x0002;
        /// Declared protected
        const PROTECTED = 0x0004;
        /// Declared static
        const STATIC = 0x0008;
        /// Declared final; must not be overridden
        const FINAL = 0x0010;
        /// Declared synchronized
        const SYNCHRONIZED = 0x0020;
        /// A bridge method, generated by the compiler
        const BRIDGE = 0x0040;
        /// Declared with variable number of arguments
        const VARARGS = 0x0080;
        /// Declared native; implemented outside the JVM
        const NATIVE = 0x0100;
        /// Declared abstract; no implementation is provided
        const ABSTRACT = 0x0400;
        /// In a class file whose major version is at least 46 and at most 60: declared strictfp
        const STRICT = 0x0800;
        /// Declared synthetic; not present in the source code
        const SYNTHETIC = 0x1000;
    }
}

impl MethodAccess {
    /// The three visibility bits; at most one of them is set on a well-formed method.
    pub const VISIBILITY: MethodAccess = MethodAccess::PUBLIC
        .union(MethodAccess::PRIVATE)
        .union(MethodAccess::PROTECTED);

    /// Returns these flags with the visibility replaced by `PRIVATE`.
    #[must_use]
    pub fn into_private(self) -> MethodAccess {
        self.difference(MethodAccess::VISIBILITY)
            .union(MethodAccess::PRIVATE)
    }

    /// Returns these flags with the visibility replaced by `PUBLIC`.
    #[must_use]
    pub fn into_public(self) -> MethodAccess {
        self.difference(MethodAccess::VISIBILITY)
            .union(MethodAccess::PUBLIC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_bits_are_retained() {
        let flags = ClassAccess::from_bits_retain(0x0021 | 0x0100);
        assert!(flags.contains(ClassAccess::PUBLIC | ClassAccess::SUPER));
        assert_eq!(flags.bits(), 0x0121);
    }

    #[test]
    fn test_visibility_rewrites() {
        let flags = MethodAccess::PROTECTED | MethodAccess::FINAL | MethodAccess::STATIC;

        let private = flags.into_private();
        assert!(private.contains(MethodAccess::PRIVATE));
        assert!(!private.contains(MethodAccess::PROTECTED));
        assert!(private.contains(MethodAccess::STATIC | MethodAccess::FINAL));

        let public = private.into_public();
        assert_eq!(public & MethodAccess::VISIBILITY, MethodAccess::PUBLIC);
    }
}
