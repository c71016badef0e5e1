//! The class-file constant pool.
//!
//! [`ConstantPool`] stores entries exactly as they appear in the file (1-based, with the
//! slot after every `Long`/`Double` unusable) and keeps an index of their contents so new
//! references can be interned without duplicating existing entries.
//!
//! The pool is append-only while a class is being rewritten: existing indices never move,
//! so attributes that are carried through as raw bytes (annotations, generic signatures,
//! inner-class tables, bootstrap methods) stay valid. Class-name translation is the one
//! in-place edit: [`ConstantPool::remap_types`] re-points `Class`, `NameAndType` and
//! `MethodType` entries at freshly interned strings.

use rustc_hash::FxHashMap;

use crate::{
    classfile::descriptor::{
        remap_class_name, remap_field_descriptor, remap_method_descriptor, NameMapper,
    },
    file::{io::write_be, parser::Parser},
    Result,
};

/// Constant pool tag values.
pub mod tag {
    /// `CONSTANT_Utf8`
    pub const UTF8: u8 = 1;
    /// `CONSTANT_Integer`
    pub const INTEGER: u8 = 3;
    /// `CONSTANT_Float`
    pub const FLOAT: u8 = 4;
    /// `CONSTANT_Long`
    pub const LONG: u8 = 5;
    /// `CONSTANT_Double`
    pub const DOUBLE: u8 = 6;
    /// `CONSTANT_Class`
    pub const CLASS: u8 = 7;
    /// `CONSTANT_String`
    pub const STRING: u8 = 8;
    /// `CONSTANT_Fieldref`
    pub const FIELD_REF: u8 = 9;
    /// `CONSTANT_Methodref`
    pub const METHOD_REF: u8 = 10;
    /// `CONSTANT_InterfaceMethodref`
    pub const INTERFACE_METHOD_REF: u8 = 11;
    /// `CONSTANT_NameAndType`
    pub const NAME_AND_TYPE: u8 = 12;
    /// `CONSTANT_MethodHandle`
    pub const METHOD_HANDLE: u8 = 15;
    /// `CONSTANT_MethodType`
    pub const METHOD_TYPE: u8 = 16;
    /// `CONSTANT_Dynamic`
    pub const DYNAMIC: u8 = 17;
    /// `CONSTANT_InvokeDynamic`
    pub const INVOKE_DYNAMIC: u8 = 18;
    /// `CONSTANT_Module`
    pub const MODULE: u8 = 19;
    /// `CONSTANT_Package`
    pub const PACKAGE: u8 = 20;
}

/// One constant pool entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Index 0 and the second slot of `Long`/`Double` entries
    Unusable,
    /// Text decoded from modified UTF-8
    Utf8(String),
    /// Modified UTF-8 bytes that do not form valid Unicode (unpaired surrogates); kept verbatim
    Utf8Raw(Vec<u8>),
    /// `int` literal
    Integer(i32),
    /// `float` literal
    Float(f32),
    /// `long` literal
    Long(i64),
    /// `double` literal
    Double(f64),
    /// Class or array type; `name` points at a `Utf8` internal name
    Class {
        /// Index of the name
        name: u16,
    },
    /// String literal
    String {
        /// Index of the `Utf8` value
        value: u16,
    },
    /// Field reference
    FieldRef {
        /// Index of the owning `Class`
        class: u16,
        /// Index of the `NameAndType`
        name_and_type: u16,
    },
    /// Method reference on a class
    MethodRef {
        /// Index of the owning `Class`
        class: u16,
        /// Index of the `NameAndType`
        name_and_type: u16,
    },
    /// Method reference on an interface
    InterfaceMethodRef {
        /// Index of the owning `Class`
        class: u16,
        /// Index of the `NameAndType`
        name_and_type: u16,
    },
    /// Member name and descriptor
    NameAndType {
        /// Index of the `Utf8` name
        name: u16,
        /// Index of the `Utf8` descriptor
        descriptor: u16,
    },
    /// Method handle
    MethodHandle {
        /// Reference kind (1..=9)
        kind: u8,
        /// Index of the referenced member
        reference: u16,
    },
    /// Method type
    MethodType {
        /// Index of the `Utf8` method descriptor
        descriptor: u16,
    },
    /// Dynamically computed constant
    Dynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap: u16,
        /// Index of the `NameAndType`
        name_and_type: u16,
    },
    /// Dynamically computed call site
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap: u16,
        /// Index of the `NameAndType`
        name_and_type: u16,
    },
    /// Module name
    Module {
        /// Index of the `Utf8` name
        name: u16,
    },
    /// Package name
    Package {
        /// Index of the `Utf8` name
        name: u16,
    },
}

impl Constant {
    /// Returns `true` for the two-slot `Long` and `Double` entries.
    #[must_use]
    pub fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }

    fn key(&self) -> Option<ConstantKey> {
        Some(match self {
            Constant::Unusable => return None,
            Constant::Utf8(text) => ConstantKey::Utf8(text.clone()),
            Constant::Utf8Raw(bytes) => ConstantKey::Utf8Raw(bytes.clone()),
            Constant::Integer(value) => ConstantKey::Integer(*value),
            Constant::Float(value) => ConstantKey::Float(value.to_bits()),
            Constant::Long(value) => ConstantKey::Long(*value),
            Constant::Double(value) => ConstantKey::Double(value.to_bits()),
            Constant::Class { name } => ConstantKey::Ref(tag::CLASS, *name, 0),
            Constant::String { value } => ConstantKey::Ref(tag::STRING, *value, 0),
            Constant::FieldRef {
                class,
                name_and_type,
            } => ConstantKey::Ref(tag::FIELD_REF, *class, *name_and_type),
            Constant::MethodRef {
                class,
                name_and_type,
            } => ConstantKey::Ref(tag::METHOD_REF, *class, *name_and_type),
            Constant::InterfaceMethodRef {
                class,
                name_and_type,
            } => ConstantKey::Ref(tag::INTERFACE_METHOD_REF, *class, *name_and_type),
            Constant::NameAndType { name, descriptor } => {
                ConstantKey::Ref(tag::NAME_AND_TYPE, *name, *descriptor)
            }
            Constant::MethodHandle { kind, reference } => {
                ConstantKey::Ref(tag::METHOD_HANDLE, u16::from(*kind), *reference)
            }
            Constant::MethodType { descriptor } => {
                ConstantKey::Ref(tag::METHOD_TYPE, *descriptor, 0)
            }
            Constant::Dynamic {
                bootstrap,
                name_and_type,
            } => ConstantKey::Ref(tag::DYNAMIC, *bootstrap, *name_and_type),
            Constant::InvokeDynamic {
                bootstrap,
                name_and_type,
            } => ConstantKey::Ref(tag::INVOKE_DYNAMIC, *bootstrap, *name_and_type),
            Constant::Module { name } => ConstantKey::Ref(tag::MODULE, *name, 0),
            Constant::Package { name } => ConstantKey::Ref(tag::PACKAGE, *name, 0),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstantKey {
    Utf8(String),
    Utf8Raw(Vec<u8>),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Ref(u8, u16, u16),
}

/// A resolved field or method reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef<'a> {
    /// Internal name of the owning class (or array descriptor)
    pub owner: &'a str,
    /// Member name
    pub name: &'a str,
    /// Member descriptor
    pub descriptor: &'a str,
    /// `true` for `InterfaceMethodref` entries
    pub interface: bool,
}

/// The constant pool of one class file.
#[derive(Debug, Clone)]
pub struct ConstantPool {
    entries: Vec<Constant>,
    index: FxHashMap<ConstantKey, u16>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    /// The largest `constant_pool_count` the format can express.
    pub const MAX_COUNT: usize = u16::MAX as usize;

    /// Creates an empty pool (only the unusable entry 0).
    #[must_use]
    pub fn new() -> Self {
        ConstantPool {
            entries: vec![Constant::Unusable],
            index: FxHashMap::default(),
        }
    }

    /// Parses a pool from the cursor, which must sit on `constant_pool_count`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for unknown tags or truncated entries.
    pub fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        let count = usize::from(parser.read_be::<u16>()?);
        if count == 0 {
            return Err(malformed_error!("constant_pool_count must be at least 1"));
        }

        let mut pool = ConstantPool::new();
        while pool.entries.len() < count {
            let tag = parser.read_be::<u8>()?;
            let constant = match tag {
                tag::UTF8 => {
                    let len = usize::from(parser.read_be::<u16>()?);
                    let bytes = parser.read_bytes(len)?;
                    match decode_modified_utf8(bytes) {
                        Some(text) => Constant::Utf8(text),
                        None => Constant::Utf8Raw(bytes.to_vec()),
                    }
                }
                tag::INTEGER => Constant::Integer(parser.read_be()?),
                tag::FLOAT => Constant::Float(parser.read_be()?),
                tag::LONG => Constant::Long(parser.read_be()?),
                tag::DOUBLE => Constant::Double(parser.read_be()?),
                tag::CLASS => Constant::Class {
                    name: parser.read_be()?,
                },
                tag::STRING => Constant::String {
                    value: parser.read_be()?,
                },
                tag::FIELD_REF => Constant::FieldRef {
                    class: parser.read_be()?,
                    name_and_type: parser.read_be()?,
                },
                tag::METHOD_REF => Constant::MethodRef {
                    class: parser.read_be()?,
                    name_and_type: parser.read_be()?,
                },
                tag::INTERFACE_METHOD_REF => Constant::InterfaceMethodRef {
                    class: parser.read_be()?,
                    name_and_type: parser.read_be()?,
                },
                tag::NAME_AND_TYPE => Constant::NameAndType {
                    name: parser.read_be()?,
                    descriptor: parser.read_be()?,
                },
                tag::METHOD_HANDLE => Constant::MethodHandle {
                    kind: parser.read_be()?,
                    reference: parser.read_be()?,
                },
                tag::METHOD_TYPE => Constant::MethodType {
                    descriptor: parser.read_be()?,
                },
                tag::DYNAMIC => Constant::Dynamic {
                    bootstrap: parser.read_be()?,
                    name_and_type: parser.read_be()?,
                },
                tag::INVOKE_DYNAMIC => Constant::InvokeDynamic {
                    bootstrap: parser.read_be()?,
                    name_and_type: parser.read_be()?,
                },
                tag::MODULE => Constant::Module {
                    name: parser.read_be()?,
                },
                tag::PACKAGE => Constant::Package {
                    name: parser.read_be()?,
                },
                other => {
                    return Err(malformed_error!(
                        "unknown constant pool tag {} at entry {}",
                        other,
                        pool.entries.len()
                    ))
                }
            };

            let wide = constant.is_wide();
            pool.append(constant)?;
            if wide {
                pool.entries.push(Constant::Unusable);
            }
        }

        if pool.entries.len() != count {
            return Err(malformed_error!(
                "wide constant overruns constant_pool_count {}",
                count
            ));
        }

        Ok(pool)
    }

    /// Number of slots including the unusable entry 0 (the file's `constant_pool_count`).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the pool holds no usable entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Returns the entry at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for index 0, unusable slots and out-of-range indices.
    pub fn get(&self, index: u16) -> Result<&Constant> {
        match self.entries.get(usize::from(index)) {
            Some(Constant::Unusable) | None => Err(malformed_error!(
                "invalid constant pool index {} (pool has {} slots)",
                index,
                self.entries.len()
            )),
            Some(constant) => Ok(constant),
        }
    }

    /// Resolves a `Utf8` entry.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the entry is not textual `Utf8`.
    pub fn utf8(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            Constant::Utf8(text) => Ok(text),
            other => Err(malformed_error!(
                "constant {} is not a Utf8 entry: {:?}",
                index,
                other
            )),
        }
    }

    /// Resolves a `Class` entry to its internal name.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the entry is not a `Class`.
    pub fn class_name(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            Constant::Class { name } => self.utf8(*name),
            other => Err(malformed_error!(
                "constant {} is not a Class entry: {:?}",
                index,
                other
            )),
        }
    }

    /// Resolves a `NameAndType` entry to `(name, descriptor)`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the entry is not a `NameAndType`.
    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str)> {
        match self.get(index)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            other => Err(malformed_error!(
                "constant {} is not a NameAndType entry: {:?}",
                index,
                other
            )),
        }
    }

    /// Resolves a `Fieldref`, `Methodref` or `InterfaceMethodref` entry.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for any other entry kind.
    pub fn member_ref(&self, index: u16) -> Result<MemberRef<'_>> {
        let (class, name_and_type, interface) = match self.get(index)? {
            Constant::FieldRef {
                class,
                name_and_type,
            }
            | Constant::MethodRef {
                class,
                name_and_type,
            } => (*class, *name_and_type, false),
            Constant::InterfaceMethodRef {
                class,
                name_and_type,
            } => (*class, *name_and_type, true),
            other => {
                return Err(malformed_error!(
                    "constant {} is not a member reference: {:?}",
                    index,
                    other
                ))
            }
        };

        let (name, descriptor) = self.name_and_type(name_and_type)?;
        Ok(MemberRef {
            owner: self.class_name(class)?,
            name,
            descriptor,
            interface,
        })
    }

    /// Resolves an `InvokeDynamic` entry to `(name, descriptor)`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the entry is not an `InvokeDynamic`.
    pub fn invoke_dynamic(&self, index: u16) -> Result<(&str, &str)> {
        match self.get(index)? {
            Constant::InvokeDynamic { name_and_type, .. } => self.name_and_type(*name_and_type),
            other => Err(malformed_error!(
                "constant {} is not an InvokeDynamic entry: {:?}",
                index,
                other
            )),
        }
    }

    fn append(&mut self, constant: Constant) -> Result<u16> {
        let slots = if constant.is_wide() { 2 } else { 1 };
        if self.entries.len() + slots > Self::MAX_COUNT {
            return Err(pool_overflow(self.entries.len() + slots));
        }

        let Ok(index) = u16::try_from(self.entries.len()) else {
            return Err(pool_overflow(self.entries.len()));
        };
        if let Some(key) = constant.key() {
            self.index.entry(key).or_insert(index);
        }
        self.entries.push(constant);
        Ok(index)
    }

    /// Returns the index of an entry equal to `constant`, appending it if there is none.
    ///
    /// # Errors
    /// Returns [`crate::Error::StructuralViolation`] if the pool is full.
    pub fn intern(&mut self, constant: Constant) -> Result<u16> {
        if let Some(key) = constant.key() {
            if let Some(index) = self.index.get(&key) {
                return Ok(*index);
            }
        }

        let wide = constant.is_wide();
        let index = self.append(constant)?;
        if wide {
            self.entries.push(Constant::Unusable);
        }
        Ok(index)
    }

    /// Interns a `Utf8` entry.
    ///
    /// # Errors
    /// Returns [`crate::Error::StructuralViolation`] if the pool is full.
    pub fn utf8_index(&mut self, text: &str) -> Result<u16> {
        self.intern(Constant::Utf8(text.to_string()))
    }

    /// Interns a `Class` entry for an internal name or array descriptor.
    ///
    /// # Errors
    /// Returns [`crate::Error::StructuralViolation`] if the pool is full.
    pub fn class_index(&mut self, internal_name: &str) -> Result<u16> {
        let name = self.utf8_index(internal_name)?;
        self.intern(Constant::Class { name })
    }

    /// Interns a `String` literal.
    ///
    /// # Errors
    /// Returns [`crate::Error::StructuralViolation`] if the pool is full.
    pub fn string_index(&mut self, value: &str) -> Result<u16> {
        let value = self.utf8_index(value)?;
        self.intern(Constant::String { value })
    }

    /// Interns a `NameAndType` entry.
    ///
    /// # Errors
    /// Returns [`crate::Error::StructuralViolation`] if the pool is full.
    pub fn name_and_type_index(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let name = self.utf8_index(name)?;
        let descriptor = self.utf8_index(descriptor)?;
        self.intern(Constant::NameAndType { name, descriptor })
    }

    /// Interns a `Fieldref`.
    ///
    /// # Errors
    /// Returns [`crate::Error::StructuralViolation`] if the pool is full.
    pub fn field_ref_index(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class = self.class_index(owner)?;
        let name_and_type = self.name_and_type_index(name, descriptor)?;
        self.intern(Constant::FieldRef {
            class,
            name_and_type,
        })
    }

    /// Interns a `Methodref` or, when `interface` is set, an `InterfaceMethodref`.
    ///
    /// # Errors
    /// Returns [`crate::Error::StructuralViolation`] if the pool is full.
    pub fn method_ref_index(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        interface: bool,
    ) -> Result<u16> {
        let class = self.class_index(owner)?;
        let name_and_type = self.name_and_type_index(name, descriptor)?;
        if interface {
            self.intern(Constant::InterfaceMethodRef {
                class,
                name_and_type,
            })
        } else {
            self.intern(Constant::MethodRef {
                class,
                name_and_type,
            })
        }
    }

    /// Interns a `MethodType` entry.
    ///
    /// # Errors
    /// Returns [`crate::Error::StructuralViolation`] if the pool is full.
    pub fn method_type_index(&mut self, descriptor: &str) -> Result<u16> {
        let descriptor = self.utf8_index(descriptor)?;
        self.intern(Constant::MethodType { descriptor })
    }

    /// Rewrites every class reference in the pool through `mapper`.
    ///
    /// `Class` entries, `NameAndType` descriptors and `MethodType` descriptors whose text
    /// changes are re-pointed at newly interned `Utf8` entries; the original strings stay in
    /// place for any other user. Returns `true` if any entry changed.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for unparsable descriptors and
    /// [`crate::Error::StructuralViolation`] if the pool overflows.
    pub fn remap_types(&mut self, mapper: &dyn NameMapper) -> Result<bool> {
        let original_len = self.entries.len();
        let mut changed = false;

        for slot in 1..original_len {
            let Ok(index) = u16::try_from(slot) else {
                break;
            };

            let replacement = match &self.entries[slot] {
                Constant::Class { name } => {
                    let current = self.utf8(*name)?;
                    remap_class_name(current, mapper)
                        .map(|mapped| (mapped, RemapTarget::Class))
                }
                Constant::NameAndType { name, descriptor } => {
                    let current = self.utf8(*descriptor)?;
                    let mapped = if current.starts_with('(') {
                        remap_method_descriptor(current, mapper)?
                    } else {
                        remap_field_descriptor(current, mapper)?
                    };
                    mapped.map(|mapped| (mapped, RemapTarget::NameAndType(*name)))
                }
                Constant::MethodType { descriptor } => {
                    let current = self.utf8(*descriptor)?;
                    remap_method_descriptor(current, mapper)?
                        .map(|mapped| (mapped, RemapTarget::MethodType))
                }
                _ => None,
            };

            if let Some((text, target)) = replacement {
                let utf8 = self.utf8_index(&text)?;
                self.entries[usize::from(index)] = match target {
                    RemapTarget::Class => Constant::Class { name: utf8 },
                    RemapTarget::NameAndType(name) => Constant::NameAndType {
                        name,
                        descriptor: utf8,
                    },
                    RemapTarget::MethodType => Constant::MethodType { descriptor: utf8 },
                };
                changed = true;
            }
        }

        if changed {
            self.rebuild_index();
        }
        Ok(changed)
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (slot, constant) in self.entries.iter().enumerate() {
            let (Some(key), Ok(index)) = (constant.key(), u16::try_from(slot)) else {
                continue;
            };
            self.index.entry(key).or_insert(index);
        }
    }

    /// Appends `constant_pool_count` and all entries to `out`.
    ///
    /// # Errors
    /// Returns [`crate::Error::StructuralViolation`] if the pool holds more than 65535
    /// slots or a `Utf8` entry exceeds 65535 bytes.
    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let Ok(count) = u16::try_from(self.entries.len()) else {
            return Err(pool_overflow(self.entries.len()));
        };
        write_be(out, count);

        for constant in &self.entries {
            match constant {
                Constant::Unusable => {}
                Constant::Utf8(text) => {
                    let bytes = encode_modified_utf8(text);
                    write_utf8_bytes(out, &bytes)?;
                }
                Constant::Utf8Raw(bytes) => write_utf8_bytes(out, bytes)?,
                Constant::Integer(value) => {
                    write_be(out, tag::INTEGER);
                    write_be(out, *value);
                }
                Constant::Float(value) => {
                    write_be(out, tag::FLOAT);
                    write_be(out, *value);
                }
                Constant::Long(value) => {
                    write_be(out, tag::LONG);
                    write_be(out, *value);
                }
                Constant::Double(value) => {
                    write_be(out, tag::DOUBLE);
                    write_be(out, *value);
                }
                Constant::Class { name } => write_ref(out, tag::CLASS, &[*name]),
                Constant::String { value } => write_ref(out, tag::STRING, &[*value]),
                Constant::FieldRef {
                    class,
                    name_and_type,
                } => write_ref(out, tag::FIELD_REF, &[*class, *name_and_type]),
                Constant::MethodRef {
                    class,
                    name_and_type,
                } => write_ref(out, tag::METHOD_REF, &[*class, *name_and_type]),
                Constant::InterfaceMethodRef {
                    class,
                    name_and_type,
                } => write_ref(out, tag::INTERFACE_METHOD_REF, &[*class, *name_and_type]),
                Constant::NameAndType { name, descriptor } => {
                    write_ref(out, tag::NAME_AND_TYPE, &[*name, *descriptor]);
                }
                Constant::MethodHandle { kind, reference } => {
                    write_be(out, tag::METHOD_HANDLE);
                    write_be(out, *kind);
                    write_be(out, *reference);
                }
                Constant::MethodType { descriptor } => {
                    write_ref(out, tag::METHOD_TYPE, &[*descriptor]);
                }
                Constant::Dynamic {
                    bootstrap,
                    name_and_type,
                } => write_ref(out, tag::DYNAMIC, &[*bootstrap, *name_and_type]),
                Constant::InvokeDynamic {
                    bootstrap,
                    name_and_type,
                } => write_ref(out, tag::INVOKE_DYNAMIC, &[*bootstrap, *name_and_type]),
                Constant::Module { name } => write_ref(out, tag::MODULE, &[*name]),
                Constant::Package { name } => write_ref(out, tag::PACKAGE, &[*name]),
            }
        }
        Ok(())
    }
}

enum RemapTarget {
    Class,
    NameAndType(u16),
    MethodType,
}

fn write_ref(out: &mut Vec<u8>, tag: u8, indices: &[u16]) {
    write_be(out, tag);
    for index in indices {
        write_be(out, *index);
    }
}

fn pool_overflow(slots: usize) -> crate::Error {
    structural_error!(
        "constant pool",
        "",
        "{slots} slots exceed the limit of {}",
        ConstantPool::MAX_COUNT - 1
    )
}

fn write_utf8_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    let Ok(len) = u16::try_from(bytes.len()) else {
        return Err(crate::Error::StructuralViolation {
            location: "constant pool".to_string(),
            message: format!("Utf8 constant of {} bytes exceeds 65535", bytes.len()),
        });
    };
    write_be(out, tag::UTF8);
    write_be(out, len);
    out.extend_from_slice(bytes);
    Ok(())
}

/// Decodes the JVM's modified UTF-8.
///
/// Returns `None` when the bytes are not well-formed or encode unpaired surrogates, which
/// Java strings may contain but Rust strings cannot.
#[must_use]
pub fn decode_modified_utf8(bytes: &[u8]) -> Option<String> {
    if bytes.iter().all(|b| *b != 0 && *b < 0x80) {
        return std::str::from_utf8(bytes).ok().map(str::to_string);
    }

    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = u16::from(bytes[i]);
        if b0 & 0x80 == 0 {
            units.push(b0);
            i += 1;
        } else if b0 & 0xE0 == 0xC0 {
            let b1 = u16::from(*bytes.get(i + 1)?);
            if b1 & 0xC0 != 0x80 {
                return None;
            }
            units.push(((b0 & 0x1F) << 6) | (b1 & 0x3F));
            i += 2;
        } else if b0 & 0xF0 == 0xE0 {
            let b1 = u16::from(*bytes.get(i + 1)?);
            let b2 = u16::from(*bytes.get(i + 2)?);
            if b1 & 0xC0 != 0x80 || b2 & 0xC0 != 0x80 {
                return None;
            }
            units.push(((b0 & 0x0F) << 12) | ((b1 & 0x3F) << 6) | (b2 & 0x3F));
            i += 3;
        } else {
            return None;
        }
    }

    String::from_utf16(&units).ok()
}

/// Encodes text as the JVM's modified UTF-8 (NUL as `C0 80`, supplementary characters as
/// surrogate pairs).
#[must_use]
pub fn encode_modified_utf8(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for unit in text.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_intern_deduplicates() {
        let mut pool = ConstantPool::new();
        let a = pool.class_index("java/lang/Object").unwrap();
        let b = pool.class_index("java/lang/Object").unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.class_name(a).unwrap(), "java/lang/Object");
        // entry 0, the Utf8 and the Class
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_pool_overflow_is_structural() {
        let mut pool = ConstantPool::new();
        for value in 1..ConstantPool::MAX_COUNT as i32 {
            pool.intern(Constant::Integer(value)).unwrap();
        }
        assert_eq!(pool.len(), ConstantPool::MAX_COUNT);
        assert!(matches!(
            pool.intern(Constant::Integer(-1)),
            Err(crate::Error::StructuralViolation { .. })
        ));
        pool.write(&mut Vec::new()).unwrap();

        pool.entries.push(Constant::Integer(-1));
        assert!(matches!(
            pool.write(&mut Vec::new()),
            Err(crate::Error::StructuralViolation { .. })
        ));
    }

    #[test]
    fn test_wide_constants_take_two_slots() {
        let mut pool = ConstantPool::new();
        let long = pool.intern(Constant::Long(7)).unwrap();
        let next = pool.utf8_index("x").unwrap();
        assert_eq!(long, 1);
        assert_eq!(next, 3);
        assert!(pool.get(2).is_err());
    }

    #[test]
    fn test_write_then_parse() {
        let mut pool = ConstantPool::new();
        let method = pool.method_ref_index("pkg/Foo", "bar", "(IJ)V", false).unwrap();
        pool.intern(Constant::Double(2.5)).unwrap();
        pool.string_index("h\u{e9}llo\u{0}").unwrap();

        let mut out = Vec::new();
        pool.write(&mut out).unwrap();

        let mut parser = Parser::new(&out);
        let parsed = ConstantPool::parse(&mut parser).unwrap();
        assert_eq!(parsed.len(), pool.len());
        assert!(!parser.has_more_data());
        assert_eq!(parsed.entries, pool.entries);

        let member = parsed.member_ref(method).unwrap();
        assert_eq!(
            (member.owner, member.name, member.descriptor, member.interface),
            ("pkg/Foo", "bar", "(IJ)V", false)
        );
    }

    #[test]
    fn test_modified_utf8_nul_and_supplementary() {
        let text = "a\u{0}\u{1F600}";
        let encoded = encode_modified_utf8(text);
        assert_eq!(&encoded[..3], &[b'a', 0xC0, 0x80]);
        // surrogate pair: two three-byte sequences
        assert_eq!(encoded.len(), 3 + 6);
        assert_eq!(decode_modified_utf8(&encoded).as_deref(), Some(text));
    }

    #[test]
    fn test_lone_surrogate_is_kept_raw() {
        let bytes = vec![0xED, 0xA0, 0x80];
        assert_eq!(decode_modified_utf8(&bytes), None);

        let mut out = Vec::new();
        write_be(&mut out, 2u16);
        out.push(tag::UTF8);
        write_be(&mut out, 3u16);
        out.extend_from_slice(&bytes);

        let pool = ConstantPool::parse(&mut Parser::new(&out)).unwrap();
        assert_eq!(pool.get(1).unwrap(), &Constant::Utf8Raw(bytes));
    }

    #[test]
    fn test_remap_types_rewrites_classes_and_descriptors() {
        let mut pool = ConstantPool::new();
        let class = pool.class_index("old/Type").unwrap();
        let array = pool.class_index("[Lold/Type;").unwrap();
        let field = pool.field_ref_index("pkg/Owner", "f", "[[Lold/Type;").unwrap();
        let untouched = pool.class_index("pkg/Owner").unwrap();

        let mut mapping = BTreeMap::new();
        mapping.insert("old/Type".to_string(), "new/Type".to_string());
        assert!(pool.remap_types(&mapping).unwrap());

        assert_eq!(pool.class_name(class).unwrap(), "new/Type");
        assert_eq!(pool.class_name(array).unwrap(), "[Lnew/Type;");
        assert_eq!(pool.member_ref(field).unwrap().descriptor, "[[Lnew/Type;");
        assert_eq!(pool.class_name(untouched).unwrap(), "pkg/Owner");
        assert_eq!(pool.class_index("new/Type").unwrap(), class);
    }
}
