//! Human-readable IR listing: one function per block, one `%N` register per
//! non-constant value, in allocation order.

use std::fmt::Write as _;

use ahash::AHashMap;

use crate::intern::StringId;
use crate::ir::instr::{Constant, Opcode, PropertyKeyOperand};
use crate::ir::{Module, ValueRef};

#[must_use]
pub fn print_module(module: &Module) -> String {
    let strings = resource_index(module);
    let mut out = String::new();
    for (index, function) in module.functions.iter().enumerate() {
        print_function(&mut out, module, index, &strings);
    }
    out
}

fn resource_index(module: &Module) -> AHashMap<StringId, String> {
    module
        .resources
        .iter()
        .map(|r| (r.id, String::from_utf16_lossy(&r.utf16)))
        .collect()
}

fn print_function(out: &mut String, module: &Module, index: usize, strings: &AHashMap<StringId, String>) {
    let function = &module.functions[index];
    let name = function.name.and_then(|id| strings.get(&id)).map_or("<anonymous>", String::as_str);
    let _ = writeln!(out, "function @{index} {name} (params={}, global={}) {{", function.param_count, function.is_global);
    let mut value_id = 0u32;
    for (block_id, block) in function.blocks.iter().enumerate() {
        let _ = writeln!(out, "  bb{block_id}: ; referrers={:?}", sorted(&block.referrers));
        for instr in &block.instructions {
            let rendered = print_opcode(&instr.opcode, strings);
            if matches!(instr.opcode, Opcode::Jump { .. } | Opcode::Branch { .. } | Opcode::Return { .. }) {
                let _ = writeln!(out, "    {rendered}");
            } else {
                let _ = writeln!(out, "    %{value_id} = {rendered} : {:?}", instr.ty);
            }
            value_id += 1;
        }
    }
    out.push_str("}\n");
}

fn sorted(set: &ahash::AHashSet<u32>) -> Vec<u32> {
    let mut v: Vec<u32> = set.iter().copied().collect();
    v.sort_unstable();
    v
}

fn print_value(value: &ValueRef, strings: &AHashMap<StringId, String>) -> String {
    match value {
        ValueRef::Instruction(id) => format!("%{id}"),
        ValueRef::Slot(sid) => format!("${}", strings.get(sid).map_or_else(|| format!("#{}", sid.raw()), Clone::clone)),
        ValueRef::Constant(c) => print_constant(c, strings),
    }
}

fn print_constant(c: &Constant, strings: &AHashMap<StringId, String>) -> String {
    match c {
        Constant::ArrayElement(i) => format!("arr_elem[{i}]"),
        Constant::FramePointer => "fp".to_owned(),
        Constant::ValuePointer => "vp".to_owned(),
        Constant::TypedNull(ty) => format!("null<{ty:?}>"),
        Constant::Boolean(b) => b.to_string(),
        Constant::Double(d) => format_double(*d),
        Constant::StringifiedDouble(s) => s.clone(),
        Constant::InternedString(sid) => format!("{:?}", strings.get(sid).map_or_else(|| format!("#{}", sid.raw()), Clone::clone)),
        Constant::TaggedValue(tag) => (*tag).to_owned(),
    }
}

/// 16-digit scientific notation; infinities and NaN use sentinel tokens,
/// matching how the runtime's own double formatter prints them.
#[must_use]
pub fn format_double(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_owned()
    } else if d.is_infinite() {
        if d > 0.0 { "Infinity".to_owned() } else { "-Infinity".to_owned() }
    } else {
        format!("{d:.15e}")
    }
}

fn print_key(key: &PropertyKeyOperand, strings: &AHashMap<StringId, String>) -> String {
    match key {
        PropertyKeyOperand::Named(sid) => strings.get(sid).cloned().unwrap_or_else(|| format!("#{}", sid.raw())),
        PropertyKeyOperand::Indexed(i) => i.to_string(),
        PropertyKeyOperand::Dynamic(v) => print_value(v, strings),
    }
}

fn print_opcode(op: &Opcode, strings: &AHashMap<StringId, String>) -> String {
    let v = |x: &ValueRef| print_value(x, strings);
    let vs = |xs: &[ValueRef]| xs.iter().map(|x| v(x)).collect::<Vec<_>>().join(", ");
    let k = |x: &PropertyKeyOperand| print_key(x, strings);
    let name = |sid: &StringId| strings.get(sid).cloned().unwrap_or_else(|| format!("#{}", sid.raw()));
    match op {
        Opcode::ArgsObjInit { extras } => format!("args_obj_init {}", v(extras)),
        Opcode::ArgsObjLink { param_index, extra_slot } => format!("args_obj_link p{param_index} -> x{extra_slot}"),
        Opcode::ArrayGet { array, index } => format!("arr_get {}[{}]", v(array), v(index)),
        Opcode::ArrayPut { array, index, value } => format!("arr_put {}[{}] = {}", v(array), v(index), v(value)),
        Opcode::BinaryRaw { op, lhs, rhs } => format!("bin_raw.{op:?} {}, {}", v(lhs), v(rhs)),
        Opcode::BinaryEs { op, lhs, rhs } => format!("bin_es.{op:?} {}, {}", v(lhs), v(rhs)),
        Opcode::UnaryEs { op, operand } => format!("un_es.{op:?} {}", v(operand)),
        Opcode::CallNormal { callee, this_val, args } => format!("call {}({}) this={}", v(callee), vs(args), v(this_val)),
        Opcode::CallNew { callee, args } => format!("call_new {}({})", v(callee), vs(args)),
        Opcode::CallKeyed { object, key, args } => format!("call_keyed {}.{}({})", v(object), k(key), vs(args)),
        Opcode::CallKeyedSlow { object, key, args } => format!("call_keyed_slow {}[{}]({})", v(object), v(key), vs(args)),
        Opcode::CallNamed { name: n, args } => format!("call_named {}({})", name(n), vs(args)),
        Opcode::ValFromDouble(x) => format!("val_from_double {}", v(x)),
        Opcode::ValFromBoolean(x) => format!("val_from_boolean {}", v(x)),
        Opcode::ValFromString(x) => format!("val_from_string {}", v(x)),
        Opcode::ValToDouble(x) => format!("val_to_double {}", v(x)),
        Opcode::ValToBoolean(x) => format!("val_to_boolean {}", v(x)),
        Opcode::ValToString(x) => format!("val_to_string {}", v(x)),
        Opcode::ValIsNull(x) => format!("val_is_null {}", v(x)),
        Opcode::ValIsUndefined(x) => format!("val_is_undefined {}", v(x)),
        Opcode::ValIsCallable(x) => format!("val_is_callable {}", v(x)),
        Opcode::Branch { cond, if_true, if_false } => format!("branch {}, bb{if_true}, bb{if_false}", v(cond)),
        Opcode::Jump { target } => format!("jump bb{target}"),
        Opcode::Return { success } => format!("return {success}"),
        Opcode::MemStore { dest, value } => format!("mem_store {} = {}", v(dest), v(value)),
        Opcode::ElementPointer { base, index } => format!("elem_ptr {}[{}]", v(base), v(index)),
        Opcode::StackAlloc(n) => format!("stk_alloc {n}"),
        Opcode::StackFree(n) => format!("stk_free {n}"),
        Opcode::StackPush(x) => format!("stk_push {}", v(x)),
        Opcode::PropDefineData { object, key, value } => format!("prp_def_data {}.{} = {}", v(object), k(key), v(value)),
        Opcode::PropDefineAccessor { object, key, getter, setter } => {
            format!("prp_def_acc {}.{} get={:?} set={:?}", v(object), k(key), getter.as_ref().map(|g| v(g)), setter.as_ref().map(|s| v(s)))
        }
        Opcode::PropIteratorNew { object } => format!("prp_it_new {}", v(object)),
        Opcode::PropIteratorNext { iterator } => format!("prp_it_next {}", v(iterator)),
        Opcode::PropGet { object, key, cache } => format!("prp_get {}.{} #{cache}", v(object), k(key)),
        Opcode::PropGetSlow { object, key } => format!("prp_get_slow {}[{}]", v(object), v(key)),
        Opcode::PropPut { object, key, cache, value } => format!("prp_put {}.{} #{cache} = {}", v(object), k(key), v(value)),
        Opcode::PropPutSlow { object, key, value } => format!("prp_put_slow {}[{}] = {}", v(object), v(key), v(value)),
        Opcode::PropDelete { object, key, cache } => format!("prp_del {}.{} #{cache}", v(object), k(key)),
        Opcode::PropDeleteSlow { object, key } => format!("prp_del_slow {}[{}]", v(object), v(key)),
        Opcode::CtxSetStrict(s) => format!("ctx_set_strict {s}"),
        Opcode::CtxEnterCatch { exception } => format!("ctx_enter_catch {}", v(exception)),
        Opcode::CtxEnterWith { object } => format!("ctx_enter_with {}", v(object)),
        Opcode::CtxLeave => "ctx_leave".to_owned(),
        Opcode::CtxGet { name: n, cache } => format!("ctx_get {} #{cache}", name(n)),
        Opcode::CtxPut { name: n, cache, value } => format!("ctx_put {} #{cache} = {}", name(n), v(value)),
        Opcode::CtxDelete { name: n } => format!("ctx_del {}", name(n)),
        Opcode::ExSaveState => "ex_save_state".to_owned(),
        Opcode::ExLoadState => "ex_load_state".to_owned(),
        Opcode::ExSet(x) => format!("ex_set {}", v(x)),
        Opcode::ExClear => "ex_clear".to_owned(),
        Opcode::Declare { kind, name: n } => format!("decl.{kind:?} {}", name(n)),
        Opcode::Link { kind, name: n, slot } => format!("link.{kind:?} {} = {}", name(n), v(slot)),
        Opcode::NewArray { elements } => {
            format!("new_array [{}]", elements.iter().map(|e| e.as_ref().map_or_else(|| "_".to_owned(), |x| v(x))).collect::<Vec<_>>().join(", "))
        }
        Opcode::NewFunctionDeclaration { function_index } => format!("new_fn_decl @{function_index}"),
        Opcode::NewFunctionExpression { function_index } => format!("new_fn_expr @{function_index}"),
        Opcode::NewObject => "new_object".to_owned(),
        Opcode::NewRegex { pattern, flags } => format!("new_regex /{}/{}", name(pattern), name(flags)),
        Opcode::MetaContextLoad { name: n } => format!("meta_ctx_load {}", name(n)),
        Opcode::MetaPropertyLoad { object, key } => format!("meta_prp_load {}.{}", v(object), k(key)),
        Opcode::BindExtraInit { count } => format!("bnd_extra_init {count}"),
        Opcode::BindExtraPtr { hops } => format!("bnd_extra_ptr {hops}"),
        Opcode::InitArguments => "init_args".to_owned(),
        Opcode::Phi => "phi".to_owned(),
    }
}
