use std::{collections::BTreeSet, fmt, sync::Arc};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::{
    assembly::frames::Hierarchy,
    classfile::{binary_name, ClassAccess, ClassFile, MethodAccess, ReadDepth},
    sandbox::ByteSupplier,
    Error, Result,
};

/// What the transformer needs to know about an ancestor class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSummary {
    /// Internal name
    pub name: String,
    /// Internal name of the superclass, `None` for `java/lang/Object`
    pub super_class: Option<String>,
    /// Internal names of the direct superinterfaces
    pub interfaces: Vec<String>,
    /// Class modifiers
    pub access: ClassAccess,
    /// `name + descriptor` of every final method declared by the class
    pub final_methods: BTreeSet<String>,
}

impl ClassSummary {
    /// Summarizes a parsed class.
    #[must_use]
    pub fn from_class(class: &ClassFile) -> ClassSummary {
        ClassSummary {
            name: class.this_class.clone(),
            super_class: class.super_class.clone(),
            interfaces: class.interfaces.clone(),
            access: class.access,
            final_methods: class
                .methods
                .iter()
                .filter(|method| method.access.contains(MethodAccess::FINAL))
                .map(|method| format!("{}{}", method.name, method.descriptor))
                .collect(),
        }
    }

    /// Returns `true` if the class declares `name` + `descriptor` final.
    #[must_use]
    pub fn declares_final(&self, name: &str, descriptor: &str) -> bool {
        self.final_methods.contains(&format!("{name}{descriptor}"))
    }
}

/// Per-loader cache of [`ClassSummary`]s, fetched through the loader's byte supplier on
/// first use.
///
/// `java/lang/Object` and `java/lang/Enum` are seeded, so the common roots of every
/// hierarchy never need their bytes.
pub struct ClassIndex {
    supplier: Arc<dyn ByteSupplier>,
    summaries: DashMap<String, Arc<ClassSummary>>,
}

impl ClassIndex {
    /// A seeded index reading missing classes from `supplier`.
    #[must_use]
    pub fn new(supplier: Arc<dyn ByteSupplier>) -> ClassIndex {
        let index = ClassIndex {
            supplier,
            summaries: DashMap::new(),
        };
        index.record(ClassSummary {
            name: "java/lang/Object".to_string(),
            super_class: None,
            interfaces: Vec::new(),
            access: ClassAccess::PUBLIC | ClassAccess::SUPER,
            final_methods: [
                "getClass()Ljava/lang/Class;",
                "notify()V",
                "notifyAll()V",
                "wait()V",
                "wait(J)V",
                "wait(JI)V",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        });
        index.record(ClassSummary {
            name: "java/lang/Enum".to_string(),
            super_class: Some("java/lang/Object".to_string()),
            interfaces: vec![
                "java/lang/Comparable".to_string(),
                "java/io/Serializable".to_string(),
            ],
            access: ClassAccess::PUBLIC | ClassAccess::SUPER | ClassAccess::ABSTRACT,
            final_methods: [
                "equals(Ljava/lang/Object;)Z",
                "hashCode()I",
                "name()Ljava/lang/String;",
                "ordinal()I",
                "compareTo(Ljava/lang/Enum;)I",
                "getDeclaringClass()Ljava/lang/Class;",
                "clone()Ljava/lang/Object;",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        });
        index
    }

    /// Adds or replaces a summary.
    pub fn record(&self, summary: ClassSummary) {
        self.summaries.insert(summary.name.clone(), Arc::new(summary));
    }

    /// The summary of `class` (internal name), fetched and parsed on a miss.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the supplier has no bytes for the class and
    /// [`Error::Malformed`] if they do not parse.
    pub fn summary(&self, class: &str) -> Result<Arc<ClassSummary>> {
        if let Some(summary) = self.summaries.get(class) {
            return Ok(Arc::clone(summary.value()));
        }
        let bytes = self.supplier.original_bytes(&binary_name(class))?;
        let parsed = ClassFile::parse(&bytes, ReadDepth::Headers)?;
        let summary = Arc::new(ClassSummary::from_class(&parsed));
        self.summaries
            .entry(class.to_string())
            .or_insert_with(|| Arc::clone(&summary));
        Ok(summary)
    }

    /// Returns `true` if `class` or one of its superclasses declares `name` +
    /// `descriptor` final.
    ///
    /// An ancestor whose bytes are unavailable ends the walk with a warning: the classes
    /// above it are not consulted and the method counts as overridable.
    #[must_use]
    pub fn overrides_final(&self, class: &str, name: &str, descriptor: &str) -> bool {
        let mut current = Some(class.to_string());
        while let Some(ancestor) = current {
            let summary = match self.summary(&ancestor) {
                Ok(summary) => summary,
                Err(error) => {
                    warn!(
                        class = %ancestor,
                        %error,
                        "ancestor unavailable, assuming {}{} is not final",
                        name,
                        descriptor
                    );
                    return false;
                }
            };
            if summary.declares_final(name, descriptor) {
                return true;
            }
            current = summary.super_class.clone();
        }
        false
    }

    /// The superclasses of `class`, nearest first, ending at `java/lang/Object`.
    ///
    /// # Errors
    /// Returns the error of the first ancestor that cannot be summarized.
    pub fn superclasses(&self, class: &str) -> Result<Vec<String>> {
        let mut chain = Vec::new();
        let mut current = self.summary(class)?.super_class.clone();
        while let Some(name) = current {
            if chain.contains(&name) || name == class {
                return Err(Error::Error(format!("circular superclass chain at {name}")));
            }
            current = self.summary(&name)?.super_class.clone();
            chain.push(name);
        }
        Ok(chain)
    }

    /// A [`Hierarchy`] over this index for writing `class`, whose superclass is given
    /// rather than looked up, since the class being written may not be indexed.
    #[must_use]
    pub fn hierarchy_for<'a>(
        &'a self,
        class: &'a str,
        super_class: Option<&'a str>,
    ) -> IndexHierarchy<'a> {
        IndexHierarchy {
            index: self,
            class,
            super_class,
        }
    }

    /// Number of cached summaries, seeds included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    /// Always `false`: the seeds are never removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }
}

/// Superclass lookups for stack-map frames, backed by a [`ClassIndex`].
///
/// Ancestors whose bytes are unavailable make the class unknown, so merges involving it
/// widen to `java/lang/Object`.
#[derive(Debug)]
pub struct IndexHierarchy<'a> {
    index: &'a ClassIndex,
    class: &'a str,
    super_class: Option<&'a str>,
}

impl Hierarchy for IndexHierarchy<'_> {
    fn superclasses(&self, class: &str) -> Option<Vec<String>> {
        let chain = if class == self.class {
            match self.super_class {
                None => return Some(Vec::new()),
                Some(parent) => self.index.superclasses(parent).map(|above| {
                    std::iter::once(parent.to_string()).chain(above).collect()
                }),
            }
        } else {
            self.index.superclasses(class)
        };
        match chain {
            Ok(chain) => Some(chain),
            Err(error) => {
                debug!(%class, %error, "superclasses unavailable for frame merge");
                None
            }
        }
    }

    fn is_interface(&self, class: &str) -> bool {
        class != self.class
            && self
                .index
                .summary(class)
                .is_ok_and(|summary| summary.access.contains(ClassAccess::INTERFACE))
    }
}

impl fmt::Debug for ClassIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassIndex")
            .field("summaries", &self.summaries.len())
            .finish_non_exhaustive()
    }
}
