use crate::types::Type;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstId(pub u32);

impl InstId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "inst{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FuncId(pub u32);

impl FuncId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FuncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GlobalId(pub u32);

impl GlobalId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gv{}", self.0)
    }
}

/// An operand. Everything except constants is tracked in the module's use index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Inst(InstId),
    Param(FuncId, u32),
    Function(FuncId),
    Global(GlobalId),
    Const(Constant),
}

impl Value {
    pub fn int(bits: u32, value: i64) -> Self {
        Value::Const(Constant::int(bits, value))
    }

    pub fn undef(ty: Type) -> Self {
        Value::Const(Constant::Undef(ty))
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Value::Const(_))
    }

    pub fn is_tracked(&self) -> bool {
        !self.is_constant()
    }

    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            Value::Const(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_inst(&self) -> Option<InstId> {
        match self {
            Value::Inst(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<FuncId> {
        match self {
            Value::Function(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_const_int(&self) -> Option<i64> {
        self.as_constant().and_then(Constant::as_i64)
    }
}

impl From<Constant> for Value {
    fn from(c: Constant) -> Self {
        Value::Const(c)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Constant {
    /// Integers are stored zero-extended and masked to their width.
    Int { bits: u32, value: u64 },
    /// Floating point values of any width are stored as `f64` bits.
    Float { ty: Type, bits: u64 },
    Null(Type),
    Undef(Type),
    Zero(Type),
    Array { elem: Type, values: Vec<Constant> },
}

fn mask(bits: u32, value: u64) -> u64 {
    if bits >= 64 {
        value
    } else {
        value & ((1u64 << bits) - 1)
    }
}

fn sign_extend(bits: u32, value: u64) -> i64 {
    if bits == 0 {
        0
    } else if bits >= 64 {
        value as i64
    } else {
        let shift = 64 - bits;
        ((value << shift) as i64) >> shift
    }
}

impl Constant {
    pub fn int(bits: u32, value: i64) -> Self {
        Constant::Int {
            bits,
            value: mask(bits, value as u64),
        }
    }

    pub fn bool(value: bool) -> Self {
        Constant::int(1, value as i64)
    }

    pub fn double(value: f64) -> Self {
        Constant::Float {
            ty: Type::Double,
            bits: value.to_bits(),
        }
    }

    pub fn float(ty: Type, value: f64) -> Self {
        Constant::Float {
            ty,
            bits: value.to_bits(),
        }
    }

    pub fn ty(&self) -> Type {
        match self {
            Constant::Int { bits, .. } => Type::Int(*bits),
            Constant::Float { ty, .. } => ty.clone(),
            Constant::Null(ty) | Constant::Undef(ty) | Constant::Zero(ty) => ty.clone(),
            Constant::Array { elem, values } => {
                Type::Array(Box::new(elem.clone()), values.len() as u64)
            }
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Constant::Int { bits, value } => Some(sign_extend(*bits, *value)),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Constant::Int { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Constant::Float { bits, .. } => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Constant::Int { value: 0, .. } | Constant::Zero(_) | Constant::Null(_))
    }

    pub fn is_one(&self) -> bool {
        matches!(self, Constant::Int { value: 1, .. })
    }

    pub fn is_all_ones(&self) -> bool {
        match self {
            Constant::Int { bits, value } => *value == mask(*bits, u64::MAX),
            _ => false,
        }
    }

    pub fn is_undef(&self) -> bool {
        matches!(self, Constant::Undef(_))
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int { bits: 1, value } => {
                write!(f, "{}", if *value != 0 { "true" } else { "false" })
            }
            Constant::Int { bits, value } => write!(f, "{}", sign_extend(*bits, *value)),
            Constant::Float { bits, .. } => write!(f, "{:?}", f64::from_bits(*bits)),
            Constant::Null(_) => write!(f, "null"),
            Constant::Undef(_) => write!(f, "undef"),
            Constant::Zero(_) => write!(f, "zeroinitializer"),
            Constant::Array { elem, values } => {
                let values = values
                    .iter()
                    .map(|v| format!("{} {}", elem, v))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "[{}]", values)
            }
        }
    }
}
