use crate::module::Module;
use crate::{IrError, Result};
use std::fs;
use std::io;
use std::path::Path;

impl Module {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| IrError::Serialization(e.to_string()))
    }

    /// Restores a module and rebuilds its use index, which is not serialized.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut module: Module =
            serde_json::from_str(json).map_err(|e| IrError::Serialization(e.to_string()))?;
        module.rebuild_uses();
        Ok(module)
    }
}

pub fn save_module(module: &Module, path: impl AsRef<Path>) -> io::Result<()> {
    let json = module
        .to_json()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    fs::write(path, json)?;
    Ok(())
}

pub fn load_module(path: impl AsRef<Path>) -> io::Result<Module> {
    let json = fs::read_to_string(path)?;
    Module::from_json(&json).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use crate::builder::InstBuilder;
    use crate::function::Function;
    use crate::metadata::{MdNode, MetadataKind};
    use crate::module::Module;
    use crate::types::{FunctionType, Type};
    use crate::values::Value;
    use crate::verify::verify_module;

    #[test]
    fn test_json_restores_use_index() {
        let mut module = Module::new("m");
        let f = module
            .add_function(Function::definition(
                "f",
                FunctionType::new(vec![Type::ptr(Type::i32())], Type::i32()),
            ))
            .unwrap();
        let entry = module[f].entry_block().unwrap();
        let mut b = InstBuilder::at_end(&mut module, f, entry);
        let load = b.load(Value::Param(f, 0)).unwrap();
        b.ret(Some(load.clone())).unwrap();
        let id = load.as_inst().unwrap();
        module[id].set_metadata(MetadataKind::Tbaa, MdNode::string("jtbaa_value"));

        let json = module.to_json().unwrap();
        let restored = Module::from_json(&json).unwrap();
        verify_module(&restored).unwrap();
        assert_eq!(restored.users(&load).len(), 1);
        assert!(restored[id].get_metadata(&MetadataKind::Tbaa).is_some());
    }
}
