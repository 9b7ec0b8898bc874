use std::cmp::Ordering;
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{ComposeError, Result};

lazy_static! {
    // so the path syntax does not have to be recompiled on every parse
    static ref WHOLE_PATH: Regex = Regex::new(
        r"^/$|^(/[A-Za-z_][A-Za-z0-9_]*(\{[A-Za-z_][A-Za-z0-9_]*=[A-Za-z0-9_.\-]+\})*)+$"
    )
    .unwrap();
    static ref COMPONENT: Regex = Regex::new(
        r"/(?P<prim>[A-Za-z_][A-Za-z0-9_]*)|\{(?P<set>[A-Za-z_][A-Za-z0-9_]*)=(?P<sel>[A-Za-z0-9_.\-]+)\}"
    )
    .unwrap();
}

// ------------- PathComponent -------------
/// One step in a namespace path: either a named entry or a variant
/// selection applied to the entry before it.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum PathComponent {
    Prim(String),
    Variant { set: String, selection: String },
}

impl PathComponent {
    pub fn is_variant(&self) -> bool {
        matches!(self, PathComponent::Variant { .. })
    }
}

impl fmt::Display for PathComponent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PathComponent::Prim(name) => write!(f, "/{name}"),
            PathComponent::Variant { set, selection } => write!(f, "{{{set}={selection}}}"),
        }
    }
}

// ------------- PrimPath -------------
/// An absolute namespace path such as `/Root/Child{lod=high}/Leaf`.
/// The empty component list is the absolute root `/`.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct PrimPath {
    components: Vec<PathComponent>,
}

impl PrimPath {
    pub fn absolute_root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Parses the textual form. Only absolute paths are valid.
    pub fn parse(text: &str) -> Result<Self> {
        if !WHOLE_PATH.is_match(text) {
            return Err(ComposeError::Path(text.to_owned()));
        }
        let mut components = Vec::new();
        for captures in COMPONENT.captures_iter(text) {
            if let Some(prim) = captures.name("prim") {
                components.push(PathComponent::Prim(prim.as_str().to_owned()));
            } else {
                components.push(PathComponent::Variant {
                    set: captures["set"].to_owned(),
                    selection: captures["sel"].to_owned(),
                });
            }
        }
        Ok(Self { components })
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> &[PathComponent] {
        &self.components
    }

    /// The name of the last prim component, if any.
    pub fn name(&self) -> Option<&str> {
        self.components.iter().rev().find_map(|c| match c {
            PathComponent::Prim(name) => Some(name.as_str()),
            PathComponent::Variant { .. } => None,
        })
    }

    pub fn last_component(&self) -> Option<&PathComponent> {
        self.components.last()
    }

    pub fn parent(&self) -> Option<PrimPath> {
        if self.components.is_empty() {
            return None;
        }
        let mut components = self.components.clone();
        components.pop();
        Some(Self { components })
    }

    pub fn child(&self, name: &str) -> PrimPath {
        self.appended(PathComponent::Prim(name.to_owned()))
    }

    pub fn with_variant(&self, set: &str, selection: &str) -> PrimPath {
        self.appended(PathComponent::Variant {
            set: set.to_owned(),
            selection: selection.to_owned(),
        })
    }

    pub fn appended(&self, component: PathComponent) -> PrimPath {
        let mut components = self.components.clone();
        components.push(component);
        Self { components }
    }

    pub fn has_prefix(&self, prefix: &PrimPath) -> bool {
        self.components.len() >= prefix.components.len()
            && self.components[..prefix.components.len()] == prefix.components[..]
    }

    /// Rewrites a `prefix` of this path to `replacement`, the substitution
    /// every composition arc is built from. `None` when the path lies
    /// outside the prefix, which callers treat as "not translatable".
    pub fn replace_prefix(&self, prefix: &PrimPath, replacement: &PrimPath) -> Option<PrimPath> {
        if !self.has_prefix(prefix) {
            return None;
        }
        let mut components = replacement.components.clone();
        components.extend_from_slice(&self.components[prefix.components.len()..]);
        Some(Self { components })
    }

    /// The same path with every variant-selection component removed.
    pub fn stripped_of_variants(&self) -> PrimPath {
        Self {
            components: self
                .components
                .iter()
                .filter(|c| !c.is_variant())
                .cloned()
                .collect(),
        }
    }

    pub fn contains_variants(&self) -> bool {
        self.components.iter().any(PathComponent::is_variant)
    }

    pub fn depth(&self) -> usize {
        self.components.len()
    }
}

impl fmt::Display for PrimPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.components.is_empty() {
            return write!(f, "/");
        }
        for component in &self.components {
            write!(f, "{component}")?;
        }
        Ok(())
    }
}

impl Ord for PrimPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.components.cmp(&other.components)
    }
}

impl PartialOrd for PrimPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Shorthand used throughout the tests and docs.
pub fn prim_path(text: &str) -> Result<PrimPath> {
    PrimPath::parse(text)
}
