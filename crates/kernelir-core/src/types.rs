use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct AddressSpace(pub u32);

impl AddressSpace {
    pub const GENERIC: AddressSpace = AddressSpace(0);

    pub fn is_generic(self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Void,
    Int(u32),
    Half,
    Float,
    Double,
    Pointer(Box<Type>, AddressSpace),
    Array(Box<Type>, u64),
    Struct(Vec<Type>),
    Opaque(String),
    Function(Box<FunctionType>),
}

impl Type {
    pub fn i1() -> Self {
        Type::Int(1)
    }

    pub fn i8() -> Self {
        Type::Int(8)
    }

    pub fn i32() -> Self {
        Type::Int(32)
    }

    pub fn i64() -> Self {
        Type::Int(64)
    }

    pub fn ptr(pointee: Type) -> Self {
        Type::Pointer(Box::new(pointee), AddressSpace::GENERIC)
    }

    pub fn ptr_in(pointee: Type, space: AddressSpace) -> Self {
        Type::Pointer(Box::new(pointee), space)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Int(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::Half | Type::Float | Type::Double)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(..))
    }

    pub fn int_width(&self) -> Option<u32> {
        match self {
            Type::Int(bits) => Some(*bits),
            _ => None,
        }
    }

    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Pointer(pointee, _) => Some(pointee),
            _ => None,
        }
    }

    pub fn address_space(&self) -> Option<AddressSpace> {
        match self {
            Type::Pointer(_, space) => Some(*space),
            _ => None,
        }
    }

    /// Type reached by indexing into an aggregate, as the second and later
    /// indices of a `getelementptr` do. Struct fields need a constant index.
    pub fn element_at(&self, index: Option<u64>) -> Option<&Type> {
        match self {
            Type::Array(elem, _) => Some(elem),
            Type::Struct(fields) => index.and_then(|i| fields.get(i as usize)),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionType> {
        match self {
            Type::Function(ft) => Some(ft),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int(bits) => write!(f, "i{}", bits),
            Type::Half => write!(f, "half"),
            Type::Float => write!(f, "float"),
            Type::Double => write!(f, "double"),
            Type::Pointer(pointee, space) if space.is_generic() => write!(f, "{}*", pointee),
            Type::Pointer(pointee, space) => write!(f, "{} addrspace({})*", pointee, space.0),
            Type::Array(elem, len) => write!(f, "[{} x {}]", len, elem),
            Type::Struct(fields) if fields.is_empty() => write!(f, "{{}}"),
            Type::Struct(fields) => {
                let fields = fields
                    .iter()
                    .map(|t| t.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{{ {} }}", fields)
            }
            Type::Opaque(name) => write!(f, "%{}", name),
            Type::Function(ft) => write!(f, "{}", ft),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionType {
    pub params: Vec<Type>,
    pub ret: Type,
}

impl FunctionType {
    pub fn new(params: Vec<Type>, ret: Type) -> Self {
        Self { params, ret }
    }

    pub fn void(params: Vec<Type>) -> Self {
        Self::new(params, Type::Void)
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .params
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{} ({})", self.ret, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_display() {
        assert_eq!(Type::ptr(Type::i32()).to_string(), "i32*");
        assert_eq!(
            Type::ptr_in(Type::Double, AddressSpace(1)).to_string(),
            "double addrspace(1)*"
        );
        assert_eq!(
            Type::ptr(Type::ptr(Type::Opaque("jl_value_t".into()))).to_string(),
            "%jl_value_t**"
        );
    }

    #[test]
    fn test_aggregate_display() {
        let ty = Type::Struct(vec![Type::i32(), Type::Array(Box::new(Type::i8()), 4)]);
        assert_eq!(ty.to_string(), "{ i32, [4 x i8] }");
        assert_eq!(Type::Struct(vec![]).to_string(), "{}");
    }

    #[test]
    fn test_element_at() {
        let ty = Type::Struct(vec![Type::i32(), Type::Double]);
        assert_eq!(ty.element_at(Some(1)), Some(&Type::Double));
        assert_eq!(ty.element_at(None), None);
        let arr = Type::Array(Box::new(Type::i64()), 8);
        assert_eq!(arr.element_at(None), Some(&Type::i64()));
    }
}
