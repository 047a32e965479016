use crate::block::{BasicBlock, BlockId};
use crate::types::{FunctionType, Type};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Linkage {
    External,
    Internal,
}

impl Linkage {
    pub fn is_internal(self) -> bool {
        self == Linkage::Internal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FnAttr {
    AlwaysInline,
    NoInline,
    ReadNone,
    ReadOnly,
    NoReturn,
    NoUnwind,
}

impl FnAttr {
    pub const ALL: [FnAttr; 6] = [
        FnAttr::AlwaysInline,
        FnAttr::NoInline,
        FnAttr::ReadNone,
        FnAttr::ReadOnly,
        FnAttr::NoReturn,
        FnAttr::NoUnwind,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FnAttr::AlwaysInline => "alwaysinline",
            FnAttr::NoInline => "noinline",
            FnAttr::ReadNone => "readnone",
            FnAttr::ReadOnly => "readonly",
            FnAttr::NoReturn => "noreturn",
            FnAttr::NoUnwind => "nounwind",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.name() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ParamAttr {
    NoAlias,
    NoCapture,
    NonNull,
    ReadOnly,
    ByVal,
    Dereferenceable(u64),
    Align(u32),
}

impl std::fmt::Display for ParamAttr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamAttr::NoAlias => write!(f, "noalias"),
            ParamAttr::NoCapture => write!(f, "nocapture"),
            ParamAttr::NonNull => write!(f, "nonnull"),
            ParamAttr::ReadOnly => write!(f, "readonly"),
            ParamAttr::ByVal => write!(f, "byval"),
            ParamAttr::Dereferenceable(n) => write!(f, "dereferenceable({})", n),
            ParamAttr::Align(n) => write!(f, "align {}", n),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub ty: FunctionType,
    pub linkage: Linkage,
    pub attributes: BTreeSet<FnAttr>,
    pub param_attributes: Vec<BTreeSet<ParamAttr>>,
    /// `None` for declarations.
    pub body: Option<FunctionBody>,
}

impl Function {
    pub fn declaration(name: impl Into<String>, ty: FunctionType) -> Self {
        let param_attributes = vec![BTreeSet::new(); ty.params.len()];
        Self {
            name: name.into(),
            ty,
            linkage: Linkage::External,
            attributes: BTreeSet::new(),
            param_attributes,
            body: None,
        }
    }

    pub fn definition(name: impl Into<String>, ty: FunctionType) -> Self {
        let mut function = Self::declaration(name, ty);
        function.body = Some(FunctionBody::new());
        function
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_declaration(&self) -> bool {
        self.body.is_none()
    }

    pub fn params(&self) -> &[Type] {
        &self.ty.params
    }

    pub fn return_type(&self) -> &Type {
        &self.ty.ret
    }

    pub fn has_attr(&self, attr: FnAttr) -> bool {
        self.attributes.contains(&attr)
    }

    pub fn param_attrs(&self, index: usize) -> Option<&BTreeSet<ParamAttr>> {
        self.param_attributes.get(index)
    }

    pub fn add_param_attr(&mut self, index: usize, attr: ParamAttr) {
        if self.param_attributes.len() <= index {
            self.param_attributes.resize(index + 1, BTreeSet::new());
        }
        self.param_attributes[index].insert(attr);
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        self.body.as_ref().map(|b| b.entry_block)
    }

    /// Does not read or write memory visible to the caller.
    pub fn is_pure(&self) -> bool {
        self.has_attr(FnAttr::ReadNone)
    }

    pub fn only_reads_memory(&self) -> bool {
        self.has_attr(FnAttr::ReadNone) || self.has_attr(FnAttr::ReadOnly)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionBody {
    pub entry_block: BlockId,
    #[serde(with = "indexmap::map::serde_seq")]
    pub blocks: IndexMap<BlockId, BasicBlock>,
    next_block_id: u32,
}

impl FunctionBody {
    pub fn new() -> Self {
        let entry_block = BlockId(0);
        let mut blocks = IndexMap::new();
        blocks.insert(entry_block, BasicBlock::new(entry_block));

        Self {
            entry_block,
            blocks,
            next_block_id: 1,
        }
    }

    pub fn create_block(&mut self) -> BlockId {
        let id = BlockId(self.next_block_id);
        self.next_block_id += 1;
        self.blocks.insert(id, BasicBlock::new(id));
        id
    }

    pub fn get_block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(&id)
    }

    pub fn get_block_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(&id)
    }

    pub fn entry_block(&self) -> BlockId {
        self.entry_block
    }

    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks.keys().copied().collect()
    }
}

impl Default for FunctionBody {
    fn default() -> Self {
        Self::new()
    }
}
