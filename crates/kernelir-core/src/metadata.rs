use crate::values::{Constant, FuncId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Metadata kinds an instruction can carry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetadataKind {
    /// The loaded location does not change for the duration of the function.
    InvariantLoad,
    /// Type-based alias class of the accessed location.
    Tbaa,
    AliasScope,
    NoAlias,
    NonNull,
    Range,
    Other(String),
}

impl MetadataKind {
    pub fn name(&self) -> &str {
        match self {
            MetadataKind::InvariantLoad => "invariant.load",
            MetadataKind::Tbaa => "tbaa",
            MetadataKind::AliasScope => "alias.scope",
            MetadataKind::NoAlias => "noalias",
            MetadataKind::NonNull => "nonnull",
            MetadataKind::Range => "range",
            MetadataKind::Other(name) => name,
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "invariant.load" => MetadataKind::InvariantLoad,
            "tbaa" => MetadataKind::Tbaa,
            "alias.scope" => MetadataKind::AliasScope,
            "noalias" => MetadataKind::NoAlias,
            "nonnull" => MetadataKind::NonNull,
            "range" => MetadataKind::Range,
            other => MetadataKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for MetadataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MdNode(pub Vec<MdOperand>);

impl MdNode {
    pub fn new(operands: Vec<MdOperand>) -> Self {
        Self(operands)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self(vec![MdOperand::String(s.into())])
    }

    pub fn operands(&self) -> &[MdOperand] {
        &self.0
    }

    pub fn push(&mut self, operand: MdOperand) {
        self.0.push(operand);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MdOperand {
    String(String),
    Const(Constant),
    Function(FuncId),
    Node(MdNode),
}

impl MdOperand {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MdOperand::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<FuncId> {
        match self {
            MdOperand::Function(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_const(&self) -> Option<&Constant> {
        match self {
            MdOperand::Const(c) => Some(c),
            _ => None,
        }
    }
}
