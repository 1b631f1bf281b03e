use core::fmt;
use core::ops::{Bound, RangeBounds};
use core::str::FromStr;
use std::collections::HashMap;

use crate::stream::parse;

/// Element IDs are kept exactly as the vint codec decodes them, i.e. with the
/// length-marker bit cleared.
pub type ElementId = u64;

pub const EBML_ID: ElementId = 0x0A45_DFA3;
pub const CRC32_ID: ElementId = 0x43;
pub const VOID_ID: ElementId = 0x6C;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Int,
    UInt,
    Float,
    String,
    Date,
    Binary,
    Container,
}

impl ElementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::UInt => "uint",
            Self::Float => "float",
            Self::String => "string",
            Self::Date => "date",
            Self::Binary => "binary",
            Self::Container => "container",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("unknown element type '{0}'")]
pub struct UnknownElementType(pub String);

impl FromStr for ElementType {
    type Err = UnknownElementType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match &s.to_ascii_lowercase()[..] {
            "int" => Ok(Self::Int),
            "uint" => Ok(Self::UInt),
            "float" => Ok(Self::Float),
            "string" => Ok(Self::String),
            "date" => Ok(Self::Date),
            "binary" => Ok(Self::Binary),
            "container" => Ok(Self::Container),
            _ => Err(UnknownElementType(s.to_string())),
        }
    }
}

/// How many times a child may appear under its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    ZeroOrOne,
    ZeroOrMore,
    ExactlyOne,
    OneOrMore,
}

impl Default for Cardinality {
    fn default() -> Self {
        Self::ExactlyOne
    }
}

impl Cardinality {
    pub fn min_occurs(&self) -> usize {
        match self {
            Self::ZeroOrOne | Self::ZeroOrMore => 0,
            Self::ExactlyOne | Self::OneOrMore => 1,
        }
    }

    pub fn max_occurs(&self) -> Option<usize> {
        match self {
            Self::ZeroOrOne | Self::ExactlyOne => Some(1),
            Self::ZeroOrMore | Self::OneOrMore => None,
        }
    }

    pub fn admits(&self, count: usize) -> bool {
        count >= self.min_occurs() && self.max_occurs().map_or(true, |max| count <= max)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interval<T> {
    pub start: Bound<T>,
    pub end: Bound<T>,
}

impl<T> Interval<T> {
    pub fn new(start: Bound<T>, end: Bound<T>) -> Self {
        Self { start, end }
    }
}

impl<T: Clone> Interval<T> {
    pub fn exactly(value: T) -> Self {
        Self::new(Bound::Included(value.clone()), Bound::Included(value))
    }
}

impl<T> RangeBounds<T> for Interval<T> {
    fn start_bound(&self) -> Bound<&T> {
        match &self.start {
            Bound::Included(v) => Bound::Included(v),
            Bound::Excluded(v) => Bound::Excluded(v),
            Bound::Unbounded => Bound::Unbounded,
        }
    }

    fn end_bound(&self) -> Bound<&T> {
        match &self.end {
            Bound::Included(v) => Bound::Included(v),
            Bound::Excluded(v) => Bound::Excluded(v),
            Bound::Unbounded => Bound::Unbounded,
        }
    }
}

/// Allowed values of an element; a value is admitted if any interval contains it.
///
/// Strings and binaries use the unsigned form, constraining each character
/// (or byte) code.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeParam {
    Int(Vec<Interval<i64>>),
    UInt(Vec<Interval<u64>>),
    Float(Vec<Interval<f64>>),
}

impl RangeParam {
    pub fn admits_int(&self, value: i64) -> bool {
        match self {
            Self::Int(intervals) => intervals.iter().any(|i| i.contains(&value)),
            Self::UInt(intervals) => {
                value >= 0 && intervals.iter().any(|i| i.contains(&(value as u64)))
            }
            Self::Float(intervals) => intervals.iter().any(|i| i.contains(&(value as f64))),
        }
    }

    pub fn admits_uint(&self, value: u64) -> bool {
        match self {
            Self::Int(intervals) => {
                value <= i64::MAX as u64 && intervals.iter().any(|i| i.contains(&(value as i64)))
            }
            Self::UInt(intervals) => intervals.iter().any(|i| i.contains(&value)),
            Self::Float(intervals) => intervals.iter().any(|i| i.contains(&(value as f64))),
        }
    }

    pub fn admits_float(&self, value: f64) -> bool {
        match self {
            Self::Float(intervals) => intervals.iter().any(|i| i.contains(&value)),
            _ => false,
        }
    }

    pub fn admits_str(&self, value: &str) -> bool {
        value.chars().all(|c| self.admits_uint(u64::from(u32::from(c))))
    }

    pub fn admits_bytes(&self, value: &[u8]) -> bool {
        value.iter().all(|&b| self.admits_uint(u64::from(b)))
    }
}

/// One node of a compiled schema.
///
/// `children` is `Some` exactly when the element is a container, even if the
/// container declares no children.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementDef {
    pub id: ElementId,
    pub element_type: ElementType,
    pub name: String,
    pub children: Option<Vec<ElementDef>>,
    pub default: Option<Vec<u8>>,
    /// Fixed payload size in bytes; 0 means variable.
    pub size: u64,
    pub cardinality: Cardinality,
    pub range: Option<RangeParam>,
}

impl ElementDef {
    pub fn new(id: ElementId, element_type: ElementType, name: impl Into<String>) -> Self {
        Self {
            id,
            element_type,
            name: name.into(),
            children: match element_type {
                ElementType::Container => Some(Vec::new()),
                _ => None,
            },
            default: None,
            size: 0,
            cardinality: Cardinality::default(),
            range: None,
        }
    }

    pub fn is_container(&self) -> bool {
        self.element_type == ElementType::Container
    }

    pub fn children(&self) -> &[ElementDef] {
        self.children.as_deref().unwrap_or(&[])
    }

    pub fn child(&self, id: ElementId) -> Option<&ElementDef> {
        self.children().iter().find(|child| child.id == id)
    }

    pub fn default_uint(&self) -> Option<u64> {
        let bytes = self.default.as_deref()?;
        parse::uint(bytes, bytes.len()).ok().map(|(_, v)| v)
    }

    pub fn default_int(&self) -> Option<i64> {
        let bytes = self.default.as_deref()?;
        parse::int(bytes, bytes.len()).ok().map(|(_, v)| v)
    }

    pub fn default_float(&self) -> Option<f64> {
        let bytes = self.default.as_deref()?;
        parse::float(bytes, bytes.len()).ok().map(|(_, v)| v)
    }

    pub fn default_string(&self) -> Option<String> {
        let bytes = self.default.as_deref()?;
        let (_, bytes) = parse::string(bytes, bytes.len()).ok()?;
        String::from_utf8(bytes.to_vec()).ok()
    }
}

/**
A compiled EDTD schema.

Definitions are indexed by ID in a single flat map shared by every nesting
depth, so two elements with the same ID at different depths collide: the one
compiled last wins. Type aliases are indexed by lowercased name.
**/
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Edtd {
    pub(crate) elements: HashMap<ElementId, ElementDef>,
    pub(crate) types: HashMap<String, ElementDef>,
}

impl Edtd {
    pub fn definition_for_id(&self, id: ElementId) -> Option<&ElementDef> {
        self.elements.get(&id)
    }

    pub fn definition_for_type_name(&self, name: &str) -> Option<&ElementDef> {
        self.types.get(&name.to_lowercase())
    }

    pub fn definition_for_name(&self, name: &str) -> Option<&ElementDef> {
        self.elements.values().find(|def| def.name == name)
    }

    pub fn elements(&self) -> impl Iterator<Item = &ElementDef> {
        self.elements.values()
    }

    pub fn types(&self) -> impl Iterator<Item = (&str, &ElementDef)> {
        self.types.iter().map(|(name, def)| (&name[..], def))
    }
}
