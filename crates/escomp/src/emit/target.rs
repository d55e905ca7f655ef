//! C source emission: the last pipeline stage, turning an optimized module
//! into the two text streams a hand-written `main` links against.
//!
//! Per-block labels are only printed when something actually jumps to that
//! block; a branch or jump whose target is the block immediately following
//! it in source order is compressed to a single guarded `goto` (or dropped
//! entirely), since falling through already gets you there.

use std::fmt::Write as _;

use super::regalloc::{self, RegisterAllocation};
use crate::intern::StringId;
use crate::ir::instr::{Constant, DeclKind, EsBinaryOp, EsUnaryOp, Opcode, PropertyKeyOperand, RawBinaryOp};
use crate::ir::{BlockId, Function, Module, ValueRef};

pub struct EmittedSource {
    pub declarations: String,
    pub definitions: String,
}

#[must_use]
pub fn emit_module(module: &Module) -> EmittedSource {
    let mut declarations = String::new();
    let mut definitions = String::new();
    declarations.push_str("#include \"esr_runtime.h\"\n\n");
    definitions.push_str("#include \"esr_runtime.h\"\n\n");

    for (index, function) in module.functions.iter().enumerate() {
        let symbol = function_symbol(index, function);
        let _ = writeln!(declarations, "ESValue {symbol}(ESFrame *fp);");
        let allocation = regalloc::allocate(function);
        emit_function(&mut definitions, &symbol, function, &allocation);
    }
    declarations.push_str("\nvoid __es_data(void);\nESValue __es_main(ESFrame *fp);\n");
    definitions.push_str("\nvoid __es_data(void) {\n");
    for resource in &module.resources {
        let _ = writeln!(definitions, "    esa_intern_str({}, U\"{}\", {});", resource.id.raw(), escape_utf16(&resource.utf16), resource.utf16.len());
    }
    definitions.push_str("}\n");

    EmittedSource { declarations, definitions }
}

fn function_symbol(index: usize, function: &Function) -> String {
    if function.is_global {
        "__es_main".to_owned()
    } else {
        format!("es_fn_{index}")
    }
}

fn escape_utf16(units: &[u16]) -> String {
    String::from_utf16_lossy(units).chars().flat_map(char::escape_default).collect()
}

fn slot_name(alloc: &RegisterAllocation, value: crate::ir::ValueId) -> String {
    format!("r{}", alloc.slot(value))
}

fn emit_function(out: &mut String, symbol: &str, function: &Function, alloc: &RegisterAllocation) {
    let _ = writeln!(out, "ESValue {symbol}(ESFrame *fp) {{");
    let _ = writeln!(out, "    ESValue vp[{}];", alloc.stack_size.max(1));

    let mut value_id = 0u32;
    for (block_id, block) in function.blocks.iter().enumerate() {
        let block_id = block_id as BlockId;
        if !block.referrers.is_empty() {
            let _ = writeln!(out, "bb{block_id}:;");
        }
        for instr in &block.instructions {
            emit_instruction(out, &instr.opcode, value_id, alloc, block_id);
            value_id += 1;
        }
    }
    out.push_str("}\n\n");
}

fn falls_through(from: BlockId, to: BlockId) -> bool {
    to == from + 1
}

fn render(value: &ValueRef, alloc: &RegisterAllocation) -> String {
    match value {
        ValueRef::Instruction(id) => slot_name(alloc, *id),
        ValueRef::Slot(sid) => format!("local_{}", sid.raw()),
        ValueRef::Constant(c) => render_constant(c),
    }
}

fn render_constant(c: &Constant) -> String {
    match c {
        Constant::ArrayElement(i) => format!("arr[{i}]"),
        Constant::FramePointer => "fp".to_owned(),
        Constant::ValuePointer => "vp[0]".to_owned(),
        Constant::TypedNull(_) => "esa_null()".to_owned(),
        Constant::Boolean(b) => b.to_string(),
        Constant::Double(d) => super::printer::format_double(*d),
        Constant::StringifiedDouble(s) => s.clone(),
        Constant::InternedString(sid) => format!("esa_str({})", sid.raw()),
        Constant::TaggedValue(tag) => format!("esa_{tag}()"),
    }
}

/// Property keys cross the ABI as a single 64-bit value: the high bit marks
/// a named key (the low bits hold the interned string id), a clear high bit
/// marks an indexed key (the low 32 bits are the array index, unchanged).
fn render_key(key: &PropertyKeyOperand, alloc: &RegisterAllocation) -> String {
    match key {
        PropertyKeyOperand::Named(sid) => format!("(0x8000000000000000ULL | {}ULL)", sid.raw()),
        PropertyKeyOperand::Indexed(i) => format!("{i}ULL"),
        PropertyKeyOperand::Dynamic(v) => format!("esa_prp_key({})", render(v, alloc)),
    }
}

fn emit_instruction(
    out: &mut String,
    op: &Opcode,
    value_id: u32,
    alloc: &RegisterAllocation,
    block_id: BlockId,
) {
    let dest = slot_name(alloc, value_id);
    let v = |x: &ValueRef| render(x, alloc);
    let vs = |xs: &[ValueRef]| {
        let mut buf = String::new();
        for (i, x) in xs.iter().enumerate() {
            if i > 0 {
                buf.push_str(", ");
            }
            buf.push_str(&v(x));
        }
        buf
    };
    let k = |x: &PropertyKeyOperand| render_key(x, alloc);
    let name = |sid: &StringId| sid.raw().to_string();

    match op {
        Opcode::ArgsObjInit { extras } => {
            let _ = writeln!(out, "    ESValue {dest} = esa_args_obj_init(fp, {});", v(extras));
        }
        Opcode::ArgsObjLink { param_index, extra_slot } => {
            let _ = writeln!(out, "    esa_args_obj_link(fp, {param_index}, {extra_slot});");
        }
        Opcode::ArrayGet { array, index } => {
            let _ = writeln!(out, "    ESValue {dest} = esa_arr_get({}, {});", v(array), v(index));
        }
        Opcode::ArrayPut { array, index, value } => {
            let _ = writeln!(out, "    esa_arr_put({}, {}, {});", v(array), v(index), v(value));
        }
        Opcode::BinaryRaw { op, lhs, rhs } => {
            let sym = match op {
                RawBinaryOp::Add => "+",
                RawBinaryOp::Sub => "-",
                RawBinaryOp::Or => "||",
                RawBinaryOp::Eq => "==",
            };
            let _ = writeln!(out, "    double {dest} = {} {sym} {};", v(lhs), v(rhs));
        }
        Opcode::BinaryEs { op, lhs, rhs } => {
            let _ = writeln!(out, "    ESValue {dest} = esa_bin_{}(fp, {}, {});", es_binary_name(*op), v(lhs), v(rhs));
        }
        Opcode::UnaryEs { op, operand } => {
            let _ = writeln!(out, "    ESValue {dest} = esa_un_{}(fp, {});", es_unary_name(*op), v(operand));
        }
        Opcode::CallNormal { callee, this_val, args } => {
            let _ = writeln!(out, "    ESValue {dest} = esa_call(fp, {}, {}, (ESValue[]){{{}}}, {});", v(callee), v(this_val), vs(args), args.len());
        }
        Opcode::CallNew { callee, args } => {
            let _ = writeln!(out, "    ESValue {dest} = esa_call_new(fp, {}, (ESValue[]){{{}}}, {});", v(callee), vs(args), args.len());
        }
        Opcode::CallKeyed { object, key, args } => {
            let _ = writeln!(out, "    ESValue {dest} = esa_call_keyed(fp, {}, {}, (ESValue[]){{{}}}, {});", v(object), k(key), vs(args), args.len());
        }
        Opcode::CallKeyedSlow { object, key, args } => {
            let _ = writeln!(out, "    ESValue {dest} = esa_call_keyed_slow(fp, {}, {}, (ESValue[]){{{}}}, {});", v(object), v(key), vs(args), args.len());
        }
        Opcode::CallNamed { name: n, args } => {
            let _ = writeln!(out, "    ESValue {dest} = esa_call_named(fp, {}, (ESValue[]){{{}}}, {});", name(n), vs(args), args.len());
        }
        Opcode::ValFromDouble(x) => {
            let _ = writeln!(out, "    ESValue {dest} = esa_val_from_double({});", v(x));
        }
        Opcode::ValFromBoolean(x) => {
            let _ = writeln!(out, "    ESValue {dest} = esa_val_from_boolean({});", v(x));
        }
        Opcode::ValFromString(x) => {
            let _ = writeln!(out, "    ESValue {dest} = esa_val_from_string({});", v(x));
        }
        Opcode::ValToDouble(x) => {
            let _ = writeln!(out, "    double {dest} = esa_val_to_double({});", v(x));
        }
        Opcode::ValToBoolean(x) => {
            let _ = writeln!(out, "    bool {dest} = esa_val_to_boolean({});", v(x));
        }
        Opcode::ValToString(x) => {
            let _ = writeln!(out, "    ESStringRef {dest} = esa_val_to_string({});", v(x));
        }
        Opcode::ValIsNull(x) => {
            let _ = writeln!(out, "    bool {dest} = esa_val_is_null({});", v(x));
        }
        Opcode::ValIsUndefined(x) => {
            let _ = writeln!(out, "    bool {dest} = esa_val_is_undefined({});", v(x));
        }
        Opcode::ValIsCallable(x) => {
            let _ = writeln!(out, "    bool {dest} = esa_val_is_callable({});", v(x));
        }
        Opcode::Branch { cond, if_true, if_false } => emit_branch(out, &v(cond), *if_true, *if_false, block_id),
        Opcode::Jump { target } => {
            if !falls_through(block_id, *target) {
                let _ = writeln!(out, "    goto bb{target};");
            }
        }
        Opcode::Return { success } => {
            let _ = writeln!(out, "    return {};", if *success { "vp[0]" } else { "esa_exception_value()" });
        }
        Opcode::MemStore { dest: d, value } => {
            let _ = writeln!(out, "    {} = {};", v(d), v(value));
        }
        Opcode::ElementPointer { base, index } => {
            let _ = writeln!(out, "    ESValue *{dest} = &{}[{}];", v(base), v(index));
        }
        Opcode::StackAlloc(n) => {
            let _ = writeln!(out, "    /* stk_alloc {n} folded into frame-local vp[] */");
        }
        Opcode::StackFree(n) => {
            let _ = writeln!(out, "    /* stk_free {n} */");
        }
        Opcode::StackPush(x) => {
            let _ = writeln!(out, "    esa_stk_push({});", v(x));
        }
        Opcode::PropDefineData { object, key, value } => {
            let _ = writeln!(out, "    esa_prp_def_data({}, {}, {});", v(object), k(key), v(value));
        }
        Opcode::PropDefineAccessor { object, key, getter, setter } => {
            let g = getter.as_ref().map_or_else(|| "esa_undefined()".to_owned(), |x| v(x));
            let s = setter.as_ref().map_or_else(|| "esa_undefined()".to_owned(), |x| v(x));
            let _ = writeln!(out, "    esa_prp_def_accessor({}, {}, {g}, {s});", v(object), k(key));
        }
        Opcode::PropIteratorNew { object } => {
            let _ = writeln!(out, "    ESPropIter {dest} = esa_prp_it_new({});", v(object));
        }
        Opcode::PropIteratorNext { iterator } => {
            let _ = writeln!(out, "    bool {dest} = esa_prp_it_next(&{});", v(iterator));
        }
        Opcode::PropGet { object, key, cache } => {
            let _ = writeln!(out, "    ESValue {dest} = esa_prp_get(fp, {}, {}, {cache});", v(object), k(key));
        }
        Opcode::PropGetSlow { object, key } => {
            let _ = writeln!(out, "    ESValue {dest} = esa_prp_get_slow(fp, {}, {});", v(object), v(key));
        }
        Opcode::PropPut { object, key, cache, value } => {
            let _ = writeln!(out, "    bool {dest} = esa_prp_put(fp, {}, {}, {cache}, {});", v(object), k(key), v(value));
        }
        Opcode::PropPutSlow { object, key, value } => {
            let _ = writeln!(out, "    bool {dest} = esa_prp_put_slow(fp, {}, {}, {});", v(object), v(key), v(value));
        }
        Opcode::PropDelete { object, key, cache } => {
            let _ = writeln!(out, "    bool {dest} = esa_prp_del(fp, {}, {}, {cache});", v(object), k(key));
        }
        Opcode::PropDeleteSlow { object, key } => {
            let _ = writeln!(out, "    bool {dest} = esa_prp_del_slow(fp, {}, {});", v(object), v(key));
        }
        Opcode::CtxSetStrict(s) => {
            let _ = writeln!(out, "    esa_ctx_set_strict(fp, {s});");
        }
        Opcode::CtxEnterCatch { exception } => {
            let _ = writeln!(out, "    bool {dest} = esa_ctx_enter_catch(fp, {});", v(exception));
        }
        Opcode::CtxEnterWith { object } => {
            let _ = writeln!(out, "    bool {dest} = esa_ctx_enter_with(fp, {});", v(object));
        }
        Opcode::CtxLeave => {
            let _ = writeln!(out, "    esa_ctx_leave(fp);");
        }
        Opcode::CtxGet { name: n, cache } => {
            let _ = writeln!(out, "    bool {dest} = esa_ctx_get(fp, {}, {cache}, &vp[0]);", name(n));
        }
        Opcode::CtxPut { name: n, cache, value } => {
            let _ = writeln!(out, "    bool {dest} = esa_ctx_put(fp, {}, {cache}, {});", name(n), v(value));
        }
        Opcode::CtxDelete { name: n } => {
            let _ = writeln!(out, "    bool {dest} = esa_ctx_del(fp, {});", name(n));
        }
        Opcode::ExSaveState => {
            let _ = writeln!(out, "    ESExState {dest} = esa_ex_save_state(fp);");
        }
        Opcode::ExLoadState => {
            let _ = writeln!(out, "    esa_ex_load_state(fp);");
        }
        Opcode::ExSet(x) => {
            let _ = writeln!(out, "    esa_ex_set(fp, {});", v(x));
        }
        Opcode::ExClear => {
            let _ = writeln!(out, "    esa_ex_clear(fp);");
        }
        Opcode::Declare { kind, name: n } => {
            let _ = writeln!(out, "    bool {dest} = esa_decl_{}(fp, {});", decl_kind_name(*kind), name(n));
        }
        Opcode::Link { kind, name: n, slot } => {
            let _ = writeln!(out, "    esa_link_{}(fp, {}, &{});", decl_kind_name(*kind), name(n), v(slot));
        }
        Opcode::NewArray { elements } => {
            let parts: Vec<String> = elements.iter().map(|e| e.as_ref().map_or_else(|| "esa_hole()".to_owned(), |x| v(x))).collect();
            let _ = writeln!(out, "    ESValue {dest} = esa_new_array((ESValue[]){{{}}}, {});", parts.join(", "), elements.len());
        }
        Opcode::NewFunctionDeclaration { function_index } => {
            let _ = writeln!(out, "    ESValue {dest} = esa_new_function(fp, es_fn_{function_index});");
        }
        Opcode::NewFunctionExpression { function_index } => {
            let _ = writeln!(out, "    ESValue {dest} = esa_new_function(fp, es_fn_{function_index});");
        }
        Opcode::NewObject => {
            let _ = writeln!(out, "    ESValue {dest} = esa_new_object();");
        }
        Opcode::NewRegex { pattern, flags } => {
            let _ = writeln!(out, "    ESValue {dest} = esa_new_regex({}, {});", name(pattern), name(flags));
        }
        Opcode::MetaContextLoad { .. } | Opcode::MetaPropertyLoad { .. } => {
            unreachable!("references are expanded to ctx_*/prp_* before a module reaches emission")
        }
        Opcode::BindExtraInit { count } => {
            let _ = writeln!(out, "    ESValue *{dest} = esa_bnd_extra_init(fp, {count});");
        }
        Opcode::BindExtraPtr { hops } => {
            let _ = writeln!(out, "    esa_bnd_extra_ptr(fp, {hops});");
        }
        Opcode::InitArguments => {
            let _ = writeln!(out, "    esa_init_args(fp);");
        }
        Opcode::Phi => unreachable!("phi is never constructed by this compiler"),
    }
}

fn emit_branch(out: &mut String, cond: &str, if_true: BlockId, if_false: BlockId, block_id: BlockId) {
    if falls_through(block_id, if_true) {
        let _ = writeln!(out, "    if (!({cond})) goto bb{if_false};");
    } else if falls_through(block_id, if_false) {
        let _ = writeln!(out, "    if ({cond}) goto bb{if_true};");
    } else {
        let _ = writeln!(out, "    if ({cond}) goto bb{if_true}; else goto bb{if_false};");
    }
}

fn es_binary_name(op: EsBinaryOp) -> &'static str {
    match op {
        EsBinaryOp::Mul => "mul",
        EsBinaryOp::Div => "div",
        EsBinaryOp::Mod => "mod",
        EsBinaryOp::Add => "add",
        EsBinaryOp::Sub => "sub",
        EsBinaryOp::Shl => "shl",
        EsBinaryOp::ShrSigned => "shr_s",
        EsBinaryOp::ShrUnsigned => "shr_u",
        EsBinaryOp::Lt => "lt",
        EsBinaryOp::Gt => "gt",
        EsBinaryOp::LtEq => "lteq",
        EsBinaryOp::GtEq => "gteq",
        EsBinaryOp::In => "in",
        EsBinaryOp::Instanceof => "instanceof",
        EsBinaryOp::Eq => "eq",
        EsBinaryOp::NotEq => "neq",
        EsBinaryOp::StrictEq => "streq",
        EsBinaryOp::StrictNotEq => "strneq",
        EsBinaryOp::BitAnd => "bit_and",
        EsBinaryOp::BitXor => "bit_xor",
        EsBinaryOp::BitOr => "bit_or",
    }
}

fn es_unary_name(op: EsUnaryOp) -> &'static str {
    match op {
        EsUnaryOp::Typeof => "typeof",
        EsUnaryOp::Neg => "neg",
        EsUnaryOp::BitNot => "bit_not",
        EsUnaryOp::LogNot => "log_not",
    }
}

fn decl_kind_name(kind: DeclKind) -> &'static str {
    match kind {
        DeclKind::Function => "fun",
        DeclKind::Variable => "var",
        DeclKind::Parameter => "prm",
    }
}
