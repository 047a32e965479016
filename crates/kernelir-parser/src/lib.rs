/*! Parse text IR into a module.
 *
 * Lowering passes are easiest to exercise on hand-written IR, and dumps taken between passes are
 * only useful if they can be loaded again. This parser reads the format the emitter writes and
 * rebuilds a module with a complete use index.
 */

use kernelir_core::{
    AddressSpace, BlockId, CastOp, BinOp, Constant, FnAttr, FuncId, Function, FunctionType,
    Global, InstKind, Instruction, IntPredicate, IrError, Linkage, MdNode, MdOperand,
    MetadataKind, Module, ParamAttr, Type, Value,
};
use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Parser)]
#[grammar = "grammar.pest"]
pub struct KernelIrParser;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Syntax error: {0}")]
    Syntax(#[from] Box<pest::error::Error<Rule>>),
    #[error("Undefined value %{name} in @{function}")]
    UndefinedValue { name: String, function: String },
    #[error("Redefinition of %{name} in @{function}")]
    Redefinition { name: String, function: String },
    #[error("Undefined symbol @{0}")]
    UndefinedSymbol(String),
    #[error("Undefined block %{label} in @{function}")]
    UndefinedBlock { label: String, function: String },
    #[error("Invalid literal '{text}' for type {ty}")]
    InvalidLiteral { text: String, ty: String },
    #[error("Function @{0} has no blocks")]
    EmptyBody(String),
    #[error("Malformed {0}")]
    Malformed(&'static str),
    #[error(transparent)]
    Ir(#[from] IrError),
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Checks syntax only.
pub fn parse(input: &str) -> Result<Pairs<'_, Rule>, Box<pest::error::Error<Rule>>> {
    KernelIrParser::parse(Rule::module, input).map_err(Box::new)
}

pub fn check(input: &str) -> bool {
    parse(input).is_ok()
}

pub fn parse_module(input: &str) -> ParseResult<Module> {
    parse_module_named("module", input)
}

pub fn parse_module_named(name: &str, input: &str) -> ParseResult<Module> {
    let pairs = parse(input)?;
    ModuleReader::new(name).read(pairs)
}

pub fn parse_file<P: AsRef<Path>>(path: P) -> ParseResult<Module> {
    let name = path
        .as_ref()
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "module".to_string());
    let input = std::fs::read_to_string(path)?;
    parse_module_named(&name, &input)
}

fn next<'i>(pairs: &mut Pairs<'i, Rule>, what: &'static str) -> ParseResult<Pair<'i, Rule>> {
    pairs.next().ok_or(ParseError::Malformed(what))
}

fn unescape(s: &str) -> String {
    s.replace("\\\"", "\"").replace("\\\\", "\\")
}

fn symbol_name(pair: Pair<'_, Rule>) -> ParseResult<String> {
    // global_name -> symbol -> ident | quoted
    let symbol = next(&mut pair.into_inner(), "symbol")?;
    let inner = next(&mut symbol.into_inner(), "symbol")?;
    Ok(match inner.as_rule() {
        Rule::quoted => unescape(inner.as_str()),
        _ => inner.as_str().to_string(),
    })
}

fn inner_text(pair: Pair<'_, Rule>) -> ParseResult<String> {
    Ok(next(&mut pair.into_inner(), "name")?.as_str().to_string())
}

fn parse_int<T: std::str::FromStr>(pair: &Pair<'_, Rule>) -> ParseResult<T> {
    pair.as_str()
        .parse::<T>()
        .map_err(|_| ParseError::InvalidLiteral {
            text: pair.as_str().to_string(),
            ty: "integer".to_string(),
        })
}

pub fn parse_type(pair: Pair<'_, Rule>) -> ParseResult<Type> {
    let mut inner = pair.into_inner();
    let base = next(&mut inner, "type")?;
    let mut ty = match base.as_rule() {
        Rule::void_ty => Type::Void,
        Rule::half_ty => Type::Half,
        Rule::float_ty => Type::Float,
        Rule::double_ty => Type::Double,
        Rule::int_ty => Type::Int(base.as_str()[1..].parse().map_err(|_| {
            ParseError::InvalidLiteral {
                text: base.as_str().to_string(),
                ty: "type".to_string(),
            }
        })?),
        Rule::array_ty => {
            let mut parts = base.into_inner();
            let len = parse_int::<u64>(&next(&mut parts, "array length")?)?;
            let elem = parse_type(next(&mut parts, "array element")?)?;
            Type::Array(Box::new(elem), len)
        }
        Rule::struct_ty => Type::Struct(
            base.into_inner()
                .map(parse_type)
                .collect::<ParseResult<Vec<_>>>()?,
        ),
        Rule::opaque_ty => Type::Opaque(inner_text(base)?),
        _ => return Err(ParseError::Malformed("type")),
    };

    for suffix in inner {
        ty = match suffix.as_rule() {
            Rule::ptr_suffix => {
                let space = match suffix.into_inner().next() {
                    Some(addrspace) => parse_addrspace(addrspace)?,
                    None => AddressSpace::GENERIC,
                };
                Type::ptr_in(ty, space)
            }
            Rule::fn_suffix => {
                let params = suffix
                    .into_inner()
                    .map(parse_type)
                    .collect::<ParseResult<Vec<_>>>()?;
                Type::Function(Box::new(FunctionType::new(params, ty)))
            }
            _ => return Err(ParseError::Malformed("type suffix")),
        };
    }
    Ok(ty)
}

fn parse_addrspace(pair: Pair<'_, Rule>) -> ParseResult<AddressSpace> {
    let n = next(&mut pair.into_inner(), "address space")?;
    Ok(AddressSpace(parse_int::<u32>(&n)?))
}

/// Parses a `const_val` against the type it is annotated with.
pub fn parse_constant(pair: Pair<'_, Rule>, ty: &Type) -> ParseResult<Constant> {
    let literal = next(&mut pair.into_inner(), "constant")?;
    let text = literal.as_str();
    let invalid = || ParseError::InvalidLiteral {
        text: text.to_string(),
        ty: ty.to_string(),
    };
    Ok(match literal.as_rule() {
        Rule::number => match ty {
            Type::Int(bits) => {
                let value = text
                    .parse::<i64>()
                    .or_else(|_| text.parse::<u64>().map(|v| v as i64))
                    .map_err(|_| invalid())?;
                Constant::int(*bits, value)
            }
            t if t.is_float() => Constant::float(t.clone(), text.parse().map_err(|_| invalid())?),
            _ => return Err(invalid()),
        },
        Rule::special_float if ty.is_float() => {
            let value = match text {
                "inf" => f64::INFINITY,
                "-inf" => f64::NEG_INFINITY,
                _ => f64::NAN,
            };
            Constant::float(ty.clone(), value)
        }
        Rule::bool_lit if *ty == Type::i1() => Constant::bool(text == "true"),
        Rule::null_lit if ty.is_pointer() => Constant::Null(ty.clone()),
        Rule::undef_lit => Constant::Undef(ty.clone()),
        Rule::zero_lit => Constant::Zero(ty.clone()),
        Rule::array_lit => {
            let Type::Array(elem, len) = ty else {
                return Err(invalid());
            };
            let values = literal
                .into_inner()
                .map(parse_typed_constant)
                .collect::<ParseResult<Vec<_>>>()?;
            if values.len() as u64 != *len || values.iter().any(|v| v.ty() != **elem) {
                return Err(invalid());
            }
            Constant::Array {
                elem: (**elem).clone(),
                values,
            }
        }
        _ => return Err(invalid()),
    })
}

fn parse_typed_constant(pair: Pair<'_, Rule>) -> ParseResult<Constant> {
    let mut inner = pair.into_inner();
    let ty = parse_type(next(&mut inner, "constant type")?)?;
    parse_constant(next(&mut inner, "constant")?, &ty)
}

/// Names visible inside one function body.
struct Scope {
    function: String,
    locals: HashMap<String, Value>,
    blocks: HashMap<String, BlockId>,
}

impl Scope {
    fn block(&self, pair: &Pair<'_, Rule>) -> ParseResult<BlockId> {
        let label = pair
            .clone()
            .into_inner()
            .next()
            .map(|p| p.as_str().to_string())
            .unwrap_or_default();
        self.blocks
            .get(&label)
            .copied()
            .ok_or_else(|| ParseError::UndefinedBlock {
                label,
                function: self.function.clone(),
            })
    }
}

struct ModuleReader {
    module: Module,
}

impl ModuleReader {
    fn new(name: &str) -> Self {
        Self {
            module: Module::new(name),
        }
    }

    fn read(mut self, mut pairs: Pairs<'_, Rule>) -> ParseResult<Module> {
        let module_pair = next(&mut pairs, "module")?;
        let items: Vec<Pair<'_, Rule>> = module_pair
            .into_inner()
            .filter(|p| p.as_rule() != Rule::EOI)
            .collect();

        // Symbols first so bodies and metadata can refer to anything in the file.
        let mut bodies = Vec::new();
        for item in &items {
            match item.as_rule() {
                Rule::global_def => self.global(item.clone())?,
                Rule::declare_def | Rule::define_def => {
                    let (func, params) = self.signature(item.clone())?;
                    if item.as_rule() == Rule::define_def {
                        bodies.push((func, params, item.clone()));
                    }
                }
                _ => {}
            }
        }

        for (func, params, item) in bodies {
            self.body(func, params, item)?;
        }

        for item in items {
            if item.as_rule() == Rule::named_md {
                let mut inner = item.into_inner();
                let name = inner_text(next(&mut inner, "metadata name")?)?;
                for node in inner {
                    let node = self.md_node(node)?;
                    self.module.add_named_metadata(&name, node);
                }
            }
        }

        Ok(self.module)
    }

    fn global(&mut self, pair: Pair<'_, Rule>) -> ParseResult<()> {
        let mut name = String::new();
        let mut global = Global::new("", Type::Void);
        let mut init = None;
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::global_name => name = symbol_name(part)?,
                Rule::linkage => global.linkage = linkage(part.as_str()),
                Rule::global_kind => global.is_constant = part.as_str() == "constant",
                Rule::addrspace => global.addrspace = parse_addrspace(part)?,
                Rule::ty => global.ty = parse_type(part)?,
                Rule::const_val => init = Some(part),
                _ => {}
            }
        }
        if let Some(init) = init {
            global.initializer = Some(parse_constant(init, &global.ty)?);
        }
        global.name = name;
        self.module.add_global(global)?;
        Ok(())
    }

    /// Declares the function and returns the local names of its parameters.
    fn signature(&mut self, pair: Pair<'_, Rule>) -> ParseResult<(FuncId, Vec<String>)> {
        let is_definition = pair.as_rule() == Rule::define_def;
        let mut name = String::new();
        let mut ret = Type::Void;
        let mut link = Linkage::External;
        let mut params = Vec::new();
        let mut param_attrs = Vec::new();
        let mut param_names = Vec::new();
        let mut attrs = Vec::new();

        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::linkage => link = linkage(part.as_str()),
                Rule::ty => ret = parse_type(part)?,
                Rule::global_name => name = symbol_name(part)?,
                Rule::param | Rule::decl_param => {
                    let mut ty = None;
                    let mut set = Vec::new();
                    for p in part.into_inner() {
                        match p.as_rule() {
                            Rule::ty => ty = Some(parse_type(p)?),
                            Rule::param_attr => set.push(param_attr(p)?),
                            Rule::local => param_names.push(inner_text(p)?),
                            _ => {}
                        }
                    }
                    params.push(ty.ok_or(ParseError::Malformed("parameter"))?);
                    param_attrs.push(set);
                }
                Rule::fn_attr => {
                    if let Some(attr) = FnAttr::from_name(part.as_str()) {
                        attrs.push(attr);
                    }
                }
                _ => {}
            }
        }

        let ty = FunctionType::new(params, ret);
        let mut function = if is_definition {
            Function::definition(name, ty)
        } else {
            Function::declaration(name, ty)
        };
        function.linkage = link;
        function.attributes.extend(attrs);
        for (i, set) in param_attrs.into_iter().enumerate() {
            for attr in set {
                function.add_param_attr(i, attr);
            }
        }
        let id = self.module.add_function(function)?;
        Ok((id, param_names))
    }

    fn body(&mut self, func: FuncId, params: Vec<String>, pair: Pair<'_, Rule>) -> ParseResult<()> {
        let function_name = self.module[func].name.clone();
        let mut scope = Scope {
            function: function_name.clone(),
            locals: HashMap::new(),
            blocks: HashMap::new(),
        };
        for (i, name) in params.into_iter().enumerate() {
            if scope
                .locals
                .insert(name.clone(), Value::Param(func, i as u32))
                .is_some()
            {
                return Err(ParseError::Redefinition {
                    name,
                    function: function_name,
                });
            }
        }

        let blocks: Vec<Pair<'_, Rule>> = pair
            .into_inner()
            .filter(|p| p.as_rule() == Rule::block)
            .collect();
        if blocks.is_empty() {
            return Err(ParseError::EmptyBody(function_name));
        }

        let entry = self.module[func]
            .entry_block()
            .ok_or_else(|| ParseError::EmptyBody(function_name.clone()))?;
        let mut layout = Vec::new();
        for (i, block) in blocks.iter().enumerate() {
            let label_def = next(&mut block.clone().into_inner(), "label")?;
            let label = inner_text(label_def)?;
            let id = if i == 0 {
                entry
            } else {
                self.module.create_block(func)?
            };
            if scope.blocks.insert(label.clone(), id).is_some() {
                return Err(ParseError::Redefinition {
                    name: label,
                    function: function_name,
                });
            }
            layout.push(id);
        }

        // Instructions are created before their operands are resolved so phis can name values
        // defined further down.
        let mut pending = Vec::new();
        for (block, id) in blocks.into_iter().zip(layout) {
            for inst_pair in block.into_inner().filter(|p| p.as_rule() == Rule::instruction) {
                let mut result = None;
                let mut body = None;
                let mut metadata = Vec::new();
                for part in inst_pair.into_inner() {
                    match part.as_rule() {
                        Rule::local => result = Some(inner_text(part)?),
                        Rule::md_attachment => metadata.push(part),
                        _ => body = Some(part),
                    }
                }
                let body = body.ok_or(ParseError::Malformed("instruction"))?;
                let (kind, ty) = self.shape(body.clone(), &scope)?;
                let mut inst = Instruction::new(kind, Vec::new(), ty);
                for attachment in metadata {
                    let mut parts = attachment.into_inner();
                    let kind = inner_text(next(&mut parts, "metadata kind")?)?;
                    let node = self.md_node(next(&mut parts, "metadata node")?)?;
                    inst.set_metadata(MetadataKind::from_name(&kind), node);
                }
                let inst_id = self.module.append_inst(func, id, inst)?;
                if let Some(name) = result {
                    if scope
                        .locals
                        .insert(name.clone(), Value::Inst(inst_id))
                        .is_some()
                    {
                        return Err(ParseError::Redefinition {
                            name,
                            function: function_name,
                        });
                    }
                }
                pending.push((inst_id, body));
            }
        }

        for (inst_id, body) in pending {
            let operands = self.operands(body, &scope)?;
            self.module.set_operands(inst_id, operands);
        }
        Ok(())
    }

    fn typed_value_type(&self, pair: &Pair<'_, Rule>) -> ParseResult<Type> {
        parse_type(next(&mut pair.clone().into_inner(), "operand type")?)
    }

    fn typed_values<'i>(pair: &Pair<'i, Rule>) -> Vec<Pair<'i, Rule>> {
        pair.clone()
            .into_inner()
            .filter(|p| p.as_rule() == Rule::typed_value)
            .collect()
    }

    /// Instruction tag and result type, which only depend on the syntax.
    fn shape(&self, pair: Pair<'_, Rule>, scope: &Scope) -> ParseResult<(InstKind, Type)> {
        let rule = pair.as_rule();
        let typed = Self::typed_values(&pair);
        let mut inner = pair.into_inner();
        Ok(match rule {
            Rule::alloca_inst => {
                let allocated = parse_type(next(&mut inner, "alloca type")?)?;
                let ty = Type::ptr(allocated.clone());
                (InstKind::Alloca { allocated }, ty)
            }
            Rule::load_inst => (InstKind::Load, parse_type(next(&mut inner, "load type")?)?),
            Rule::store_inst => (InstKind::Store, Type::Void),
            Rule::gep_inst => {
                let source = parse_type(next(&mut inner, "gep type")?)?;
                let base = typed.first().ok_or(ParseError::Malformed("gep base"))?;
                let space = self
                    .typed_value_type(base)?
                    .address_space()
                    .ok_or(ParseError::Malformed("gep base pointer"))?;
                let mut current = source.clone();
                for index in typed.iter().skip(2) {
                    let mut parts = index.clone().into_inner();
                    let index_ty = parse_type(next(&mut parts, "index type")?)?;
                    let value = next(&mut parts, "index")?;
                    let constant = match next(&mut value.clone().into_inner(), "index")? {
                        c if c.as_rule() == Rule::const_val => {
                            parse_constant(c, &index_ty)?.as_i64().map(|i| i as u64)
                        }
                        _ => None,
                    };
                    current = current
                        .element_at(constant)
                        .cloned()
                        .ok_or(ParseError::Malformed("gep index"))?;
                }
                (InstKind::GetElementPtr { source }, Type::ptr_in(current, space))
            }
            Rule::cast_inst => {
                let op = next(&mut inner, "cast op")?;
                let op = CastOp::from_name(op.as_str()).ok_or(ParseError::Malformed("cast op"))?;
                let to = inner
                    .filter(|p| p.as_rule() == Rule::ty)
                    .last()
                    .ok_or(ParseError::Malformed("cast type"))?;
                (InstKind::Cast(op), parse_type(to)?)
            }
            Rule::bin_inst => {
                let op = next(&mut inner, "binary op")?;
                let op = BinOp::from_name(op.as_str()).ok_or(ParseError::Malformed("binary op"))?;
                let lhs = typed.first().ok_or(ParseError::Malformed("binary operand"))?;
                (InstKind::Binary(op), self.typed_value_type(lhs)?)
            }
            Rule::icmp_inst => {
                let pred = next(&mut inner, "predicate")?;
                let pred = IntPredicate::from_name(pred.as_str())
                    .ok_or(ParseError::Malformed("predicate"))?;
                (InstKind::ICmp(pred), Type::i1())
            }
            Rule::select_inst => {
                let then = typed.get(1).ok_or(ParseError::Malformed("select operand"))?;
                (InstKind::Select, self.typed_value_type(then)?)
            }
            Rule::phi_inst => {
                let ty = parse_type(next(&mut inner, "phi type")?)?;
                let mut blocks = Vec::new();
                for incoming in inner {
                    let label = incoming
                        .into_inner()
                        .find(|p| p.as_rule() == Rule::label_ref)
                        .ok_or(ParseError::Malformed("phi incoming"))?;
                    blocks.push(scope.block(&label)?);
                }
                (InstKind::Phi { blocks }, ty)
            }
            Rule::call_inst => (InstKind::Call, parse_type(next(&mut inner, "call type")?)?),
            Rule::br_inst => {
                let dest = scope.block(&next(&mut inner, "branch target")?)?;
                (InstKind::Br { dest }, Type::Void)
            }
            Rule::cond_br_inst => {
                let labels: Vec<_> = inner.filter(|p| p.as_rule() == Rule::label_ref).collect();
                let [then_dest, else_dest] = labels.as_slice() else {
                    return Err(ParseError::Malformed("conditional branch"));
                };
                (
                    InstKind::CondBr {
                        then_dest: scope.block(then_dest)?,
                        else_dest: scope.block(else_dest)?,
                    },
                    Type::Void,
                )
            }
            Rule::ret_inst => (InstKind::Ret, Type::Void),
            Rule::unreachable_inst => (InstKind::Unreachable, Type::Void),
            _ => return Err(ParseError::Malformed("instruction")),
        })
    }

    fn operands(&self, pair: Pair<'_, Rule>, scope: &Scope) -> ParseResult<Vec<Value>> {
        let rule = pair.as_rule();
        let typed = Self::typed_values(&pair);
        Ok(match rule {
            Rule::alloca_inst
            | Rule::load_inst
            | Rule::store_inst
            | Rule::gep_inst
            | Rule::cast_inst
            | Rule::select_inst
            | Rule::cond_br_inst
            | Rule::ret_inst => self.typed_operands(&typed, scope)?,
            Rule::bin_inst | Rule::icmp_inst => {
                let lhs = typed.first().ok_or(ParseError::Malformed("operand"))?;
                let ty = self.typed_value_type(lhs)?;
                let rhs = pair
                    .into_inner()
                    .find(|p| p.as_rule() == Rule::value)
                    .ok_or(ParseError::Malformed("operand"))?;
                vec![self.typed_value(lhs.clone(), scope)?, self.value(rhs, &ty, scope)?]
            }
            Rule::phi_inst => {
                let mut inner = pair.into_inner();
                let ty = parse_type(next(&mut inner, "phi type")?)?;
                let mut values = Vec::new();
                for incoming in inner {
                    let value = next(&mut incoming.into_inner(), "phi value")?;
                    values.push(self.value(value, &ty, scope)?);
                }
                values
            }
            Rule::call_inst => {
                let callee = pair
                    .into_inner()
                    .find(|p| p.as_rule() == Rule::global_name)
                    .ok_or(ParseError::Malformed("call"))?;
                let name = symbol_name(callee)?;
                let func = self
                    .module
                    .function_by_name(&name)
                    .ok_or(ParseError::UndefinedSymbol(name))?;
                let mut operands = vec![Value::Function(func)];
                operands.extend(self.typed_operands(&typed, scope)?);
                operands
            }
            _ => Vec::new(),
        })
    }

    fn typed_operands(&self, pairs: &[Pair<'_, Rule>], scope: &Scope) -> ParseResult<Vec<Value>> {
        pairs
            .iter()
            .map(|p| self.typed_value(p.clone(), scope))
            .collect()
    }

    fn typed_value(&self, pair: Pair<'_, Rule>, scope: &Scope) -> ParseResult<Value> {
        let mut inner = pair.into_inner();
        let ty = parse_type(next(&mut inner, "operand type")?)?;
        self.value(next(&mut inner, "operand")?, &ty, scope)
    }

    fn value(&self, pair: Pair<'_, Rule>, ty: &Type, scope: &Scope) -> ParseResult<Value> {
        let inner = next(&mut pair.into_inner(), "value")?;
        match inner.as_rule() {
            Rule::local => {
                let name = inner_text(inner)?;
                scope
                    .locals
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| ParseError::UndefinedValue {
                        name,
                        function: scope.function.clone(),
                    })
            }
            Rule::global_name => self.symbol(inner),
            Rule::const_val => Ok(Value::Const(parse_constant(inner, ty)?)),
            _ => Err(ParseError::Malformed("value")),
        }
    }

    fn symbol(&self, pair: Pair<'_, Rule>) -> ParseResult<Value> {
        let name = symbol_name(pair)?;
        if let Some(func) = self.module.function_by_name(&name) {
            Ok(Value::Function(func))
        } else if let Some(global) = self.module.global_by_name(&name) {
            Ok(Value::Global(global))
        } else {
            Err(ParseError::UndefinedSymbol(name))
        }
    }

    fn md_node(&self, pair: Pair<'_, Rule>) -> ParseResult<MdNode> {
        let mut node = MdNode::empty();
        for operand in pair.into_inner() {
            let inner = next(&mut operand.into_inner(), "metadata operand")?;
            node.push(match inner.as_rule() {
                Rule::md_string => {
                    let text = inner
                        .into_inner()
                        .next()
                        .map(|q| unescape(q.as_str()))
                        .unwrap_or_default();
                    MdOperand::String(text)
                }
                Rule::md_node => MdOperand::Node(self.md_node(inner)?),
                Rule::global_name => {
                    let name = symbol_name(inner)?;
                    let func = self
                        .module
                        .function_by_name(&name)
                        .ok_or(ParseError::UndefinedSymbol(name))?;
                    MdOperand::Function(func)
                }
                Rule::typed_const => MdOperand::Const(parse_typed_constant(inner)?),
                _ => return Err(ParseError::Malformed("metadata operand")),
            });
        }
        Ok(node)
    }
}

fn linkage(text: &str) -> Linkage {
    match text {
        "internal" => Linkage::Internal,
        _ => Linkage::External,
    }
}

fn param_attr(pair: Pair<'_, Rule>) -> ParseResult<ParamAttr> {
    let inner = next(&mut pair.into_inner(), "parameter attribute")?;
    Ok(match inner.as_rule() {
        Rule::deref_attr => {
            let n = next(&mut inner.into_inner(), "dereferenceable bytes")?;
            ParamAttr::Dereferenceable(parse_int(&n)?)
        }
        Rule::align_attr => {
            let n = next(&mut inner.into_inner(), "alignment")?;
            ParamAttr::Align(parse_int(&n)?)
        }
        _ => match inner.as_str() {
            "noalias" => ParamAttr::NoAlias,
            "nocapture" => ParamAttr::NoCapture,
            "nonnull" => ParamAttr::NonNull,
            "readonly" => ParamAttr::ReadOnly,
            "byval" => ParamAttr::ByVal,
            _ => return Err(ParseError::Malformed("parameter attribute")),
        },
    })
}
