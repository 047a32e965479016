use crate::block::BlockId;
use crate::metadata::{MdNode, MetadataKind};
use crate::types::Type;
use crate::values::{FuncId, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
    FAdd,
    FSub,
    FMul,
    FDiv,
}

impl BinOp {
    pub const ALL: [BinOp; 17] = [
        BinOp::Add,
        BinOp::Sub,
        BinOp::Mul,
        BinOp::UDiv,
        BinOp::SDiv,
        BinOp::URem,
        BinOp::SRem,
        BinOp::And,
        BinOp::Or,
        BinOp::Xor,
        BinOp::Shl,
        BinOp::LShr,
        BinOp::AShr,
        BinOp::FAdd,
        BinOp::FSub,
        BinOp::FMul,
        BinOp::FDiv,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::UDiv => "udiv",
            BinOp::SDiv => "sdiv",
            BinOp::URem => "urem",
            BinOp::SRem => "srem",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::Shl => "shl",
            BinOp::LShr => "lshr",
            BinOp::AShr => "ashr",
            BinOp::FAdd => "fadd",
            BinOp::FSub => "fsub",
            BinOp::FMul => "fmul",
            BinOp::FDiv => "fdiv",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.name() == name)
    }

    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Mul | BinOp::And | BinOp::Or | BinOp::Xor | BinOp::FAdd | BinOp::FMul
        )
    }

    /// Integer division and remainder trap on a zero divisor.
    pub fn can_trap(self) -> bool {
        matches!(self, BinOp::UDiv | BinOp::SDiv | BinOp::URem | BinOp::SRem)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    BitCast,
    AddrSpaceCast,
    PtrToInt,
    IntToPtr,
    FPToSI,
    SIToFP,
}

impl CastOp {
    pub const ALL: [CastOp; 9] = [
        CastOp::Trunc,
        CastOp::ZExt,
        CastOp::SExt,
        CastOp::BitCast,
        CastOp::AddrSpaceCast,
        CastOp::PtrToInt,
        CastOp::IntToPtr,
        CastOp::FPToSI,
        CastOp::SIToFP,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CastOp::Trunc => "trunc",
            CastOp::ZExt => "zext",
            CastOp::SExt => "sext",
            CastOp::BitCast => "bitcast",
            CastOp::AddrSpaceCast => "addrspacecast",
            CastOp::PtrToInt => "ptrtoint",
            CastOp::IntToPtr => "inttoptr",
            CastOp::FPToSI => "fptosi",
            CastOp::SIToFP => "sitofp",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.name() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntPredicate {
    Eq,
    Ne,
    Ugt,
    Uge,
    Ult,
    Ule,
    Sgt,
    Sge,
    Slt,
    Sle,
}

impl IntPredicate {
    pub const ALL: [IntPredicate; 10] = [
        IntPredicate::Eq,
        IntPredicate::Ne,
        IntPredicate::Ugt,
        IntPredicate::Uge,
        IntPredicate::Ult,
        IntPredicate::Ule,
        IntPredicate::Sgt,
        IntPredicate::Sge,
        IntPredicate::Slt,
        IntPredicate::Sle,
    ];

    pub fn name(self) -> &'static str {
        match self {
            IntPredicate::Eq => "eq",
            IntPredicate::Ne => "ne",
            IntPredicate::Ugt => "ugt",
            IntPredicate::Uge => "uge",
            IntPredicate::Ult => "ult",
            IntPredicate::Ule => "ule",
            IntPredicate::Sgt => "sgt",
            IntPredicate::Sge => "sge",
            IntPredicate::Slt => "slt",
            IntPredicate::Sle => "sle",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.name() == name)
    }

    /// Evaluates the predicate on operands given as sign-extended integers.
    /// Unsigned comparisons reinterpret them at the given width.
    pub fn evaluate(self, bits: u32, lhs: i64, rhs: i64) -> bool {
        let unsigned = |v: i64| {
            if bits >= 64 {
                v as u64
            } else {
                (v as u64) & ((1u64 << bits) - 1)
            }
        };
        match self {
            IntPredicate::Eq => lhs == rhs,
            IntPredicate::Ne => lhs != rhs,
            IntPredicate::Ugt => unsigned(lhs) > unsigned(rhs),
            IntPredicate::Uge => unsigned(lhs) >= unsigned(rhs),
            IntPredicate::Ult => unsigned(lhs) < unsigned(rhs),
            IntPredicate::Ule => unsigned(lhs) <= unsigned(rhs),
            IntPredicate::Sgt => lhs > rhs,
            IntPredicate::Sge => lhs >= rhs,
            IntPredicate::Slt => lhs < rhs,
            IntPredicate::Sle => lhs <= rhs,
        }
    }
}

/// Instruction tag. Operands live on the [`Instruction`], in the order documented per variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstKind {
    /// `[count?]`
    Alloca { allocated: Type },
    /// `[ptr]`
    Load,
    /// `[value, ptr]`
    Store,
    /// `[base, indices...]`
    GetElementPtr { source: Type },
    /// `[value]`
    Cast(CastOp),
    /// `[lhs, rhs]`
    Binary(BinOp),
    /// `[lhs, rhs]`
    ICmp(IntPredicate),
    /// `[condition, then, else]`
    Select,
    /// One incoming value operand per entry of `blocks`.
    Phi { blocks: Vec<BlockId> },
    /// `[callee, args...]`
    Call,
    Br { dest: BlockId },
    /// `[condition]`
    CondBr { then_dest: BlockId, else_dest: BlockId },
    /// `[value?]`
    Ret,
    Unreachable,
}

impl InstKind {
    pub fn opcode_name(&self) -> &'static str {
        match self {
            InstKind::Alloca { .. } => "alloca",
            InstKind::Load => "load",
            InstKind::Store => "store",
            InstKind::GetElementPtr { .. } => "getelementptr",
            InstKind::Cast(op) => op.name(),
            InstKind::Binary(op) => op.name(),
            InstKind::ICmp(_) => "icmp",
            InstKind::Select => "select",
            InstKind::Phi { .. } => "phi",
            InstKind::Call => "call",
            InstKind::Br { .. } | InstKind::CondBr { .. } => "br",
            InstKind::Ret => "ret",
            InstKind::Unreachable => "unreachable",
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Br { .. } | InstKind::CondBr { .. } | InstKind::Ret | InstKind::Unreachable
        )
    }

    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            InstKind::Br { dest } => vec![*dest],
            InstKind::CondBr {
                then_dest,
                else_dest,
            } => vec![*then_dest, *else_dest],
            _ => Vec::new(),
        }
    }

    /// Rewrites every reference to `old` among successor or phi blocks.
    pub fn replace_block(&mut self, old: BlockId, new: BlockId) -> bool {
        let mut changed = false;
        let mut swap = |b: &mut BlockId| {
            if *b == old {
                *b = new;
                changed = true;
            }
        };
        match self {
            InstKind::Br { dest } => swap(dest),
            InstKind::CondBr {
                then_dest,
                else_dest,
            } => {
                swap(then_dest);
                swap(else_dest);
            }
            InstKind::Phi { blocks } => blocks.iter_mut().for_each(swap),
            _ => {}
        }
        changed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instruction {
    pub kind: InstKind,
    pub(crate) operands: Vec<Value>,
    /// Result type; `void` for instructions that produce nothing.
    pub ty: Type,
    #[serde(with = "indexmap::map::serde_seq")]
    pub metadata: IndexMap<MetadataKind, MdNode>,
    pub(crate) parent: Option<(FuncId, BlockId)>,
}

impl Instruction {
    pub fn new(kind: InstKind, operands: Vec<Value>, ty: Type) -> Self {
        Self {
            kind,
            operands,
            ty,
            metadata: IndexMap::new(),
            parent: None,
        }
    }

    pub fn operands(&self) -> &[Value] {
        &self.operands
    }

    pub fn operand(&self, index: usize) -> Option<&Value> {
        self.operands.get(index)
    }

    pub fn parent(&self) -> Option<(FuncId, BlockId)> {
        self.parent
    }

    pub fn function(&self) -> Option<FuncId> {
        self.parent.map(|(f, _)| f)
    }

    pub fn block(&self) -> Option<BlockId> {
        self.parent.map(|(_, b)| b)
    }

    pub fn has_result(&self) -> bool {
        !self.ty.is_void()
    }

    pub fn is_terminator(&self) -> bool {
        self.kind.is_terminator()
    }

    pub fn is_phi(&self) -> bool {
        matches!(self.kind, InstKind::Phi { .. })
    }

    pub fn is_call(&self) -> bool {
        matches!(self.kind, InstKind::Call)
    }

    pub fn successors(&self) -> Vec<BlockId> {
        self.kind.successors()
    }

    pub fn callee(&self) -> Option<FuncId> {
        match self.kind {
            InstKind::Call => self.operands.first().and_then(Value::as_function),
            _ => None,
        }
    }

    pub fn call_args(&self) -> &[Value] {
        match self.kind {
            InstKind::Call if !self.operands.is_empty() => &self.operands[1..],
            _ => &[],
        }
    }

    /// Pure computations whose result depends only on their operands.
    pub fn is_pure(&self) -> bool {
        matches!(
            self.kind,
            InstKind::Binary(_)
                | InstKind::ICmp(_)
                | InstKind::Cast(_)
                | InstKind::GetElementPtr { .. }
                | InstKind::Select
        )
    }

    /// Pure and safe to execute on paths where it was not originally executed.
    pub fn is_speculatable(&self) -> bool {
        match self.kind {
            InstKind::Binary(op) => !op.can_trap(),
            _ => self.is_pure(),
        }
    }

    pub fn get_metadata(&self, kind: &MetadataKind) -> Option<&MdNode> {
        self.metadata.get(kind)
    }

    pub fn set_metadata(&mut self, kind: MetadataKind, node: MdNode) {
        self.metadata.insert(kind, node);
    }

    pub fn remove_metadata(&mut self, kind: &MetadataKind) -> Option<MdNode> {
        self.metadata.shift_remove(kind)
    }
}
