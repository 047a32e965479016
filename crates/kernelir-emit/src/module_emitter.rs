use crate::config::EmitterConfig;
use crate::emitter::{EmitContext, EmitHelper, EmitResult, Emitter};
use colored::Color;
use kernelir_core::{
    BlockId, FuncId, Function, InstId, InstKind, Linkage, MdNode, MdOperand, Module, Value,
};
use std::collections::HashMap;
use std::io::Write;

/// Numbers the values of one function the way they are printed: parameters first, then every
/// instruction with a result, in layout order. Blocks are labelled by layout position.
pub struct SSAContext {
    next_value: u32,
    value_map: HashMap<Value, u32>,
    block_labels: HashMap<BlockId, usize>,
}

impl SSAContext {
    pub fn new() -> Self {
        Self {
            next_value: 0,
            value_map: HashMap::new(),
            block_labels: HashMap::new(),
        }
    }

    pub fn for_function(module: &Module, func: FuncId) -> Self {
        let mut ssa = Self::new();
        let Some(function) = module.function(func) else {
            return ssa;
        };
        for i in 0..function.params().len() {
            ssa.allocate(Value::Param(func, i as u32));
        }
        if let Some(body) = &function.body {
            for (index, (id, block)) in body.blocks.iter().enumerate() {
                ssa.block_labels.insert(*id, index);
                for &inst in &block.instructions {
                    if module[inst].has_result() {
                        ssa.allocate(Value::Inst(inst));
                    }
                }
            }
        }
        ssa
    }

    fn allocate(&mut self, value: Value) -> u32 {
        let v = self.next_value;
        self.value_map.insert(value, v);
        self.next_value += 1;
        v
    }

    pub fn number(&self, value: &Value) -> Option<u32> {
        self.value_map.get(value).copied()
    }

    pub fn label(&self, block: BlockId) -> String {
        match self.block_labels.get(&block) {
            Some(index) => format!("bb{}", index),
            None => format!("{}.missing", block),
        }
    }
}

impl Default for SSAContext {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ModuleEmitter {
    config: EmitterConfig,
}

impl ModuleEmitter {
    pub fn new(config: EmitterConfig) -> Self {
        Self { config }
    }

    pub fn emit_module_to_string(&self, module: &Module) -> String {
        let mut buffer = Vec::new();
        let mut context = EmitContext::from_config(&self.config);
        // Writing into a Vec cannot fail.
        let _ = self.emit(module, &mut buffer, &mut context);
        String::from_utf8_lossy(&buffer).into_owned()
    }

    pub fn emit_function_to_string(&self, module: &Module, func: FuncId) -> String {
        let mut buffer = Vec::new();
        let mut context = EmitContext::from_config(&self.config);
        let _ = self.emit_function(module, func, &mut buffer, &mut context);
        String::from_utf8_lossy(&buffer).into_owned()
    }

    pub fn emit_function<W: Write>(
        &self,
        module: &Module,
        func: FuncId,
        writer: &mut W,
        context: &mut EmitContext,
    ) -> EmitResult {
        let Some(function) = module.function(func) else {
            return Ok(());
        };
        let ssa = SSAContext::for_function(module, func);
        let header = self.signature(function, func, &ssa, context);

        let Some(body) = &function.body else {
            return EmitHelper::write_line(writer, context, &header);
        };

        EmitHelper::write_block(writer, context, &header, |w, c| {
            for (block_id, block) in &body.blocks {
                c.dedent();
                EmitHelper::write_line(w, c, &format!("{}:", ssa.label(*block_id)))?;
                c.indent();
                for &inst in &block.instructions {
                    let line = self.instruction(module, inst, &ssa);
                    EmitHelper::write_line(w, c, &line)?;
                }
            }
            Ok(())
        })
    }

    fn signature(
        &self,
        function: &Function,
        func: FuncId,
        ssa: &SSAContext,
        context: &EmitContext,
    ) -> String {
        let keyword = if function.is_declaration() {
            "declare"
        } else {
            "define"
        };
        let mut out = context.paint(keyword, Color::Blue);
        if function.linkage == Linkage::Internal {
            out.push_str(" internal");
        }
        out.push_str(&format!(" {} ", function.return_type()));
        out.push_str(&context.paint(&format!("@{}", symbol(&function.name)), Color::Green));

        let params = function
            .params()
            .iter()
            .enumerate()
            .map(|(i, ty)| {
                let mut param = ty.to_string();
                if let Some(attrs) = function.param_attrs(i) {
                    for attr in attrs {
                        param.push_str(&format!(" {}", attr));
                    }
                }
                if !function.is_declaration() {
                    let n = ssa.number(&Value::Param(func, i as u32)).unwrap_or(i as u32);
                    param.push_str(&format!(" %{}", n));
                }
                param
            })
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!("({})", params));

        for attr in &function.attributes {
            out.push_str(&format!(" {}", attr.name()));
        }
        out
    }

    fn value(&self, module: &Module, value: &Value, ssa: &SSAContext) -> String {
        match value {
            Value::Inst(id) => match ssa.number(value) {
                Some(n) => format!("%{}", n),
                None => format!("%{}.foreign", id),
            },
            Value::Param(..) => match ssa.number(value) {
                Some(n) => format!("%{}", n),
                None => "%param.foreign".to_string(),
            },
            Value::Function(f) => match module.function(*f) {
                Some(function) => format!("@{}", symbol(&function.name)),
                None => format!("@{}.removed", f),
            },
            Value::Global(g) => match module.global(*g) {
                Some(global) => format!("@{}", symbol(&global.name)),
                None => format!("@{}.removed", g),
            },
            Value::Const(c) => c.to_string(),
        }
    }

    fn typed(&self, module: &Module, value: &Value, ssa: &SSAContext) -> String {
        format!(
            "{} {}",
            module.value_type(value),
            self.value(module, value, ssa)
        )
    }

    pub fn instruction(&self, module: &Module, id: InstId, ssa: &SSAContext) -> String {
        let inst = &module[id];
        let ops = inst.operands();
        let v = |i: usize| self.value(module, &ops[i], ssa);
        let t = |i: usize| self.typed(module, &ops[i], ssa);

        let text = match &inst.kind {
            InstKind::Alloca { allocated } => match ops.first() {
                Some(_) => format!("alloca {}, {}", allocated, t(0)),
                None => format!("alloca {}", allocated),
            },
            InstKind::Load => format!("load {}, {}", inst.ty, t(0)),
            InstKind::Store => format!("store {}, {}", t(0), t(1)),
            InstKind::GetElementPtr { source } => {
                let indices = (1..ops.len()).map(t).collect::<Vec<_>>();
                let mut text = format!("getelementptr {}, {}", source, t(0));
                for index in indices {
                    text.push_str(&format!(", {}", index));
                }
                text
            }
            InstKind::Cast(op) => format!("{} {} to {}", op.name(), t(0), inst.ty),
            InstKind::Binary(op) => format!("{} {}, {}", op.name(), t(0), v(1)),
            InstKind::ICmp(pred) => format!("icmp {} {}, {}", pred.name(), t(0), v(1)),
            InstKind::Select => format!("select {}, {}, {}", t(0), t(1), t(2)),
            InstKind::Phi { blocks } => {
                let incoming = blocks
                    .iter()
                    .enumerate()
                    .map(|(i, b)| format!("[ {}, %{} ]", v(i), ssa.label(*b)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("phi {} {}", inst.ty, incoming)
            }
            InstKind::Call => {
                let args = (1..ops.len()).map(t).collect::<Vec<_>>().join(", ");
                format!("call {} {}({})", inst.ty, v(0), args)
            }
            InstKind::Br { dest } => format!("br label %{}", ssa.label(*dest)),
            InstKind::CondBr {
                then_dest,
                else_dest,
            } => format!(
                "br {}, label %{}, label %{}",
                t(0),
                ssa.label(*then_dest),
                ssa.label(*else_dest)
            ),
            InstKind::Ret => match ops.first() {
                Some(_) => format!("ret {}", t(0)),
                None => "ret void".to_string(),
            },
            InstKind::Unreachable => "unreachable".to_string(),
        };

        let mut line = match ssa.number(&Value::Inst(id)) {
            Some(n) => format!("%{} = {}", n, text),
            None => text,
        };
        if self.config.include_metadata {
            for (kind, node) in &inst.metadata {
                line.push_str(&format!(", !{} {}", kind, self.md_node(module, node)));
            }
        }
        line
    }

    pub fn md_node(&self, module: &Module, node: &MdNode) -> String {
        let operands = node
            .operands()
            .iter()
            .map(|op| match op {
                MdOperand::String(s) => format!("!\"{}\"", escape(s)),
                MdOperand::Const(c) => format!("{} {}", c.ty(), c),
                MdOperand::Function(f) => match module.function(*f) {
                    Some(function) => format!("@{}", symbol(&function.name)),
                    None => "i8* null".to_string(),
                },
                MdOperand::Node(inner) => self.md_node(module, inner),
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("!{{{}}}", operands)
    }

    fn global_lines(&self, module: &Module, context: &EmitContext) -> Vec<String> {
        module
            .globals()
            .map(|(_, global)| {
                let mut line = context.paint(&format!("@{}", symbol(&global.name)), Color::Green);
                line.push_str(" =");
                if global.linkage == Linkage::Internal {
                    line.push_str(" internal");
                }
                line.push_str(if global.is_constant {
                    " constant"
                } else {
                    " global"
                });
                if !global.addrspace.is_generic() {
                    line.push_str(&format!(" addrspace({})", global.addrspace.0));
                }
                line.push_str(&format!(" {}", global.ty));
                if let Some(init) = &global.initializer {
                    line.push_str(&format!(" {}", init));
                }
                line
            })
            .collect()
    }
}

/// Symbol names are printed bare when they are plain identifiers and quoted otherwise.
fn symbol(name: &str) -> String {
    let mut chars = name.chars();
    let plain = chars
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$'));
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", escape(name))
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

impl Default for ModuleEmitter {
    fn default() -> Self {
        Self::new(EmitterConfig::default())
    }
}

impl Emitter for ModuleEmitter {
    type Item = Module;

    fn emit<W: Write>(
        &self,
        module: &Module,
        writer: &mut W,
        context: &mut EmitContext,
    ) -> EmitResult {
        let globals = self.global_lines(module, context);
        for line in &globals {
            EmitHelper::write_line(writer, context, line)?;
        }

        let mut first = globals.is_empty();
        for (id, _) in module.functions() {
            if !first {
                writeln!(writer)?;
            }
            first = false;
            self.emit_function(module, id, writer, context)?;
        }

        if !module.named_metadata.is_empty() {
            writeln!(writer)?;
        }
        for (name, nodes) in &module.named_metadata {
            let nodes = nodes
                .iter()
                .map(|n| self.md_node(module, n))
                .collect::<Vec<_>>()
                .join(", ");
            EmitHelper::write_line(writer, context, &format!("!{} = !{{{}}}", name, nodes))?;
        }
        Ok(())
    }
}
