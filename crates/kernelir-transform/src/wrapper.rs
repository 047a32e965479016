/*! Device entry wrappers.
 *
 * A kernel entry point has a fixed calling convention: the launcher passes plain values and
 * device pointers, nothing else. The host front end, however, may pass a small immutable value
 * by reference, which the device cannot provide. The wrapper built here takes such arguments by
 * value, spills them to a stack slot and calls the original entry with the slot's address. The
 * original is then made internal and inlined into the wrapper straight away.
 */

use crate::error::{CompileError, CompileResult};
use crate::fixup::strip_invariant_metadata;
use crate::passes::{AlwaysInliner, Verifier};
use kernelir_core::{
    FnAttr, FuncId, Function, FunctionType, InstBuilder, Linkage, Module, PassManager, Type,
    Value,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Name prefix the device launcher looks for.
pub const WRAPPER_PREFIX: &str = "ptxcall_";

/// How a source-level argument type is represented at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// No runtime representation; never appears among the IR parameters.
    Ghost,
    Bits,
    Pointer,
    /// Anything else; passed exactly as the IR says.
    Boxed,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceType {
    pub name: String,
    pub kind: SourceKind,
}

impl SourceType {
    pub fn new(name: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn ghost(name: impl Into<String>) -> Self {
        Self::new(name, SourceKind::Ghost)
    }

    pub fn bits(name: impl Into<String>) -> Self {
        Self::new(name, SourceKind::Bits)
    }

    pub fn pointer(name: impl Into<String>) -> Self {
        Self::new(name, SourceKind::Pointer)
    }

    pub fn boxed(name: impl Into<String>) -> Self {
        Self::new(name, SourceKind::Boxed)
    }

    pub fn is_ghost(&self) -> bool {
        self.kind == SourceKind::Ghost
    }

    pub fn is_bits(&self) -> bool {
        matches!(self.kind, SourceKind::Bits | SourceKind::Pointer)
    }

    pub fn is_pointer(&self) -> bool {
        self.kind == SourceKind::Pointer
    }
}

/// `julia_vadd_123` becomes `ptxcall_vadd_123`; a name without a separator is just prefixed.
pub fn wrapper_name(entry: &str) -> String {
    let rest = entry
        .char_indices()
        .skip(1)
        .find(|&(_, c)| c == '_')
        .map(|(i, _)| &entry[i + 1..])
        .unwrap_or(entry);
    format!("{}{}", WRAPPER_PREFIX, rest)
}

/// The wrapper's parameter type for one source argument and the IR parameter it feeds.
fn wrapper_param_type(source: &SourceType, expected: &Type) -> Type {
    if !source.is_bits() {
        return expected.clone();
    }
    match expected.pointee() {
        Some(pointee) if !source.is_pointer() => pointee.clone(),
        _ => expected.clone(),
    }
}

/// Builds the device entry wrapper for `entry` and inlines `entry` into it.
///
/// `arg_types` lists the source-level argument types, ghosts included. The original entry is
/// left in the module, internal and `alwaysinline`, with its pointer-derived load annotations
/// stripped.
pub fn wrap_entry(
    module: &mut Module,
    entry: FuncId,
    arg_types: &[SourceType],
) -> CompileResult<FuncId> {
    let function = module.function(entry).ok_or_else(|| CompileError::InvalidEntry {
        function: entry.to_string(),
        reason: "no such function".to_string(),
    })?;
    let entry_name = function.name.clone();
    if function.is_declaration() {
        return Err(CompileError::InvalidEntry {
            function: entry_name,
            reason: "entry point has no body".to_string(),
        });
    }
    if !function.return_type().is_void() {
        return Err(CompileError::InvalidEntry {
            reason: format!("returns {}, expected void", function.return_type()),
            function: entry_name,
        });
    }

    let sources: Vec<&SourceType> = arg_types.iter().filter(|t| !t.is_ghost()).collect();
    let expected: Vec<Type> = function.params().to_vec();
    if sources.len() != expected.len() {
        return Err(CompileError::SignatureMismatch {
            function: entry_name,
            expected: sources.len(),
            actual: expected.len(),
        });
    }

    let params: Vec<Type> = sources
        .iter()
        .zip(&expected)
        .map(|(source, ir)| wrapper_param_type(source, ir))
        .collect();
    let entry_attrs = function.param_attributes.clone();

    let name = wrapper_name(&entry_name);
    let wrapper = module.add_function(Function::definition(
        name.clone(),
        FunctionType::void(params.clone()),
    ))?;
    let block = module[wrapper]
        .entry_block()
        .ok_or_else(|| CompileError::Pass(format!("@{} was created without a body", name)))?;

    let mut builder = InstBuilder::at_end(module, wrapper, block);
    let mut args = Vec::with_capacity(params.len());
    let mut forwarded = Vec::new();
    for (index, (param_ty, expected_ty)) in params.iter().zip(&expected).enumerate() {
        let arg = Value::Param(wrapper, index as u32);
        if param_ty == expected_ty {
            args.push(arg);
            forwarded.push(index);
            continue;
        }
        if expected_ty.pointee() != Some(param_ty) {
            return Err(CompileError::WrapperInvariant {
                function: entry_name,
                index,
                expected: expected_ty.to_string(),
                actual: param_ty.to_string(),
            });
        }
        let slot = builder.alloca(param_ty.clone())?;
        builder.store(arg, slot.clone())?;
        args.push(builder.pointer_cast(slot, expected_ty.clone())?);
        debug!(entry = %entry_name, index, ty = %param_ty, "passing argument through a stack slot");
    }
    builder.call(entry, args)?;
    builder.ret(None)?;

    for index in forwarded {
        if let Some(attrs) = entry_attrs.get(index) {
            module[wrapper].param_attributes[index] = attrs.clone();
        }
    }

    let original = &mut module[entry];
    original.attributes.remove(&FnAttr::NoInline);
    original.attributes.insert(FnAttr::AlwaysInline);
    original.linkage = Linkage::Internal;

    strip_invariant_metadata(module, entry);

    let mut pm = PassManager::new();
    pm.register_pass(AlwaysInliner::only_into(wrapper));
    pm.register_pass(Verifier::functions(vec![wrapper, entry]));
    pm.run_all(module)?;

    info!(entry = %entry_name, wrapper = %name, "wrapped entry point");
    Ok(wrapper)
}
