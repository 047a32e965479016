/*! Turn kernelir modules back into text.
 *
 * The printed form is what the parser reads, so a module can be dumped between passes, diffed, and
 * loaded again. Values are renumbered per function and blocks are labelled by position, which keeps
 * the output stable across arena reuse.
 */

pub mod config;
pub mod emitter;
pub mod module_emitter;

pub use config::{EmitterConfig, IndentStyle};
pub use emitter::{EmitContext, EmitHelper, EmitResult, Emitter};
pub use module_emitter::{ModuleEmitter, SSAContext};

use kernelir_core::{FuncId, Module};

pub fn print_module(module: &Module) -> String {
    ModuleEmitter::default().emit_module_to_string(module)
}

pub fn print_function(module: &Module, func: FuncId) -> String {
    ModuleEmitter::default().emit_function_to_string(module, func)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernelir_core::{
        Constant, FnAttr, Function, FunctionType, Global, InstBuilder, Linkage, MdNode,
        MdOperand, MetadataKind, ParamAttr, Type, Value,
    };
    use pretty_assertions::assert_eq;

    #[test]
    fn test_print_function() {
        let mut module = Module::new("m");
        let mut function = Function::definition(
            "scale",
            FunctionType::new(vec![Type::ptr(Type::i32()), Type::i32()], Type::i32()),
        );
        function.linkage = Linkage::Internal;
        function.attributes.insert(FnAttr::AlwaysInline);
        function.add_param_attr(0, ParamAttr::NoAlias);
        let f = module.add_function(function).unwrap();
        let entry = module[f].entry_block().unwrap();
        let exit = module.create_block(f).unwrap();

        let mut b = InstBuilder::at_end(&mut module, f, entry);
        let loaded = b.load(Value::Param(f, 0)).unwrap();
        let product = b.mul(loaded.clone(), Value::Param(f, 1)).unwrap();
        b.br(exit).unwrap();
        b.position_at_end(f, exit);
        b.ret(Some(product)).unwrap();
        let load = loaded.as_inst().unwrap();
        module[load].set_metadata(MetadataKind::InvariantLoad, MdNode::empty());

        let expected = "\
define internal i32 @scale(i32* noalias %0, i32 %1) alwaysinline {
bb0:
  %2 = load i32, i32* %0, !invariant.load !{}
  %3 = mul i32 %2, %1
  br label %bb1
bb1:
  ret i32 %3
}
";
        assert_eq!(print_function(&module, f), expected);
    }

    #[test]
    fn test_print_module_items() {
        let mut module = Module::new("m");
        let mut global = Global::constant(
            "bytes",
            Constant::Array {
                elem: Type::i8(),
                values: vec![Constant::int(8, 1), Constant::int(8, 2)],
            },
        );
        global.linkage = Linkage::Internal;
        module.add_global(global).unwrap();
        let f = module
            .declare_function("ptx_gc_pool_alloc", FunctionType::new(vec![Type::i64()], Type::ptr(Type::i8())))
            .unwrap();
        module.add_named_metadata(
            "nvvm.annotations",
            MdNode::new(vec![
                MdOperand::Function(f),
                MdOperand::String("kernel".into()),
                MdOperand::Const(Constant::int(32, 1)),
            ]),
        );

        let expected = "\
@bytes = internal constant [2 x i8] [i8 1, i8 2]

declare i8* @ptx_gc_pool_alloc(i64)

!nvvm.annotations = !{!{@ptx_gc_pool_alloc, !\"kernel\", i32 1}}
";
        assert_eq!(print_module(&module), expected);
    }
}
