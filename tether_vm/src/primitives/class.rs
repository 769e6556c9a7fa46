use std::rc::Rc;

use log::trace;

use super::{PrimitiveContext, PrimitiveMessage, bool_value};
use crate::{
    Aspec, ClassKind, EvalResult, Exc, HashTable, Instance, Method, ObjRef, Object, RawValue, Sym,
    ast::{MethodDef, Node, NodeKind, Params},
    object::ExceptionData,
    span::Pos,
};

pub const MODULE: &[PrimitiveMessage] = &[
    PrimitiveMessage::new("name", Aspec::NONE, name),
    PrimitiveMessage::new("to_s", Aspec::NONE, to_s),
    PrimitiveMessage::new("inspect", Aspec::NONE, to_s),
    PrimitiveMessage::new("===", Aspec::req(1), |ctx| {
        let class = module(ctx)?;
        bool_value(ctx.state.is_a(ctx.arg(0), class))
    }),
    PrimitiveMessage::new("ancestors", Aspec::NONE, ancestors),
    PrimitiveMessage::new("include", Aspec::req(1).with(Aspec::ANY), include),
    PrimitiveMessage::new("include?", Aspec::req(1), includes),
    PrimitiveMessage::new("<", Aspec::req(1), is_descendant),
    PrimitiveMessage::new("attr_reader", Aspec::ANY, |ctx| define_accessors(ctx, true, false)),
    PrimitiveMessage::new("attr_writer", Aspec::ANY, |ctx| define_accessors(ctx, false, true)),
    PrimitiveMessage::new("attr_accessor", Aspec::ANY, |ctx| define_accessors(ctx, true, true)),
    PrimitiveMessage::new("const_get", Aspec::req(1), const_get),
    PrimitiveMessage::new("const_set", Aspec::req(2), const_set),
    PrimitiveMessage::new("const_defined?", Aspec::req(1), const_defined),
    PrimitiveMessage::new("constants", Aspec::NONE, constants),
    PrimitiveMessage::new("method_defined?", Aspec::req(1), method_defined),
    PrimitiveMessage::new("instance_methods", Aspec::opt(1), instance_methods),
    PrimitiveMessage::new("alias_method", Aspec::req(2), alias_method),
    PrimitiveMessage::new("remove_method", Aspec::ANY, remove_method),
    PrimitiveMessage::new("module_function", Aspec::ANY, module_function),
    PrimitiveMessage::new("private", Aspec::ANY, visibility),
    PrimitiveMessage::new("public", Aspec::ANY, visibility),
    PrimitiveMessage::new("protected", Aspec::ANY, visibility),
    PrimitiveMessage::new("class_eval", Aspec::BLOCK, class_eval),
    PrimitiveMessage::new("module_eval", Aspec::BLOCK, class_eval),
];

pub const CLASS: &[PrimitiveMessage] = &[
    PrimitiveMessage::new("new", Aspec::ANY, new),
    PrimitiveMessage::new("allocate", Aspec::NONE, |ctx| {
        let class = module(ctx)?;
        allocate(ctx, class)
    }),
    PrimitiveMessage::new("superclass", Aspec::NONE, superclass),
];

fn module(ctx: &mut PrimitiveContext) -> Result<ObjRef, Exc> {
    match ctx.receiver.as_object() {
        Some(obj) if ctx.state.class_kind(obj).is_some() => Ok(obj),
        _ => Err(ctx.state.type_error("class or module required")),
    }
}

fn name_args(ctx: &mut PrimitiveContext) -> Result<Vec<Sym>, Exc> {
    let mut names = Vec::with_capacity(ctx.arguments.len());
    for i in 0..ctx.arguments.len() {
        let name = ctx.name_arg(i)?;
        names.push(ctx.state.intern(&name));
    }
    Ok(names)
}

// ── Naming ────────────────────────────────────────────────────

fn name(ctx: &mut PrimitiveContext) -> EvalResult {
    let class = module(ctx)?;
    match ctx.state.class_data(class).and_then(|data| data.name.clone()) {
        Some(name) => ctx.string(&name),
        None => Ok(RawValue::Nil),
    }
}

fn to_s(ctx: &mut PrimitiveContext) -> EvalResult {
    let class = module(ctx)?;
    let name = ctx.state.class_name(class);
    ctx.string(&name)
}

fn ancestors(ctx: &mut PrimitiveContext) -> EvalResult {
    let class = module(ctx)?;
    let values = ctx.state.ancestors(class).into_iter().map(RawValue::from).collect();
    Ok(ctx.state.new_array(values))
}

// ── Mixins ────────────────────────────────────────────────────

fn include(ctx: &mut PrimitiveContext) -> EvalResult {
    let class = module(ctx)?;
    // `include A, B` searches A before B, so B goes in first.
    for i in (0..ctx.arguments.len()).rev() {
        let mixin = ctx.class_arg(i)?;
        if ctx.state.class_kind(mixin) != Some(ClassKind::Module) {
            let shown = ctx.state.class_name(mixin);
            return Err(ctx.state.type_error(format!("wrong argument type {shown} (expected Module)")));
        }
        if ctx.state.ancestors(class).contains(&mixin) {
            continue;
        }
        trace!("{} includes {}", ctx.state.class_name(class), ctx.state.class_name(mixin));
        if let Some(data) = ctx.state.class_data_mut(class) {
            data.includes.push(mixin);
        }
    }
    Ok(ctx.receiver)
}

fn includes(ctx: &mut PrimitiveContext) -> EvalResult {
    let class = module(ctx)?;
    let mixin = ctx.class_arg(0)?;
    let found = class != mixin
        && ctx.state.class_kind(mixin) == Some(ClassKind::Module)
        && ctx.state.ancestors(class).contains(&mixin);
    bool_value(found)
}

fn is_descendant(ctx: &mut PrimitiveContext) -> EvalResult {
    let class = module(ctx)?;
    let other = ctx.class_arg(0)?;
    if class == other {
        return bool_value(false);
    }
    if ctx.state.ancestors(class).contains(&other) {
        return bool_value(true);
    }
    // Unrelated classes compare as nil rather than false.
    if ctx.state.ancestors(other).contains(&class) {
        bool_value(false)
    } else {
        Ok(RawValue::Nil)
    }
}

// ── Method definition ─────────────────────────────────────────

/// Defines `name` and/or `name=` as script methods reading and writing the
/// instance variable `@name`.
fn define_accessors(ctx: &mut PrimitiveContext, reader: bool, writer: bool) -> EvalResult {
    let class = module(ctx)?;
    let names = name_args(ctx)?;
    let pos = Pos::origin();
    let value = ctx.state.intern("value");
    let mut defined = Vec::new();
    for name in names {
        if reader {
            let def = MethodDef {
                name,
                params: Params::default(),
                body: Node::new(NodeKind::IVar(name), pos),
            };
            define_script_method(ctx, class, def);
            defined.push(RawValue::Symbol(name));
        }
        if writer {
            let setter = ctx.state.intern(&format!("{}=", ctx.state.sym_name(name)));
            let def = MethodDef {
                name: setter,
                params: Params {
                    required: vec![value],
                    ..Params::default()
                },
                body: Node::new(NodeKind::IVarSet(name, Box::new(Node::new(NodeKind::Local(value), pos))), pos),
            };
            define_script_method(ctx, class, def);
            defined.push(RawValue::Symbol(setter));
        }
    }
    Ok(ctx.state.new_array(defined))
}

fn define_script_method(ctx: &mut PrimitiveContext, class: ObjRef, def: MethodDef) {
    let name = def.name;
    ctx.state.define_method_raw(
        class,
        name,
        Method::Script {
            def: Rc::new(def),
            nesting: Rc::from(vec![class]),
        },
    );
}

fn method_defined(ctx: &mut PrimitiveContext) -> EvalResult {
    let class = module(ctx)?;
    let name = ctx.name_arg(0)?;
    let found = ctx
        .state
        .symbols()
        .lookup(&name)
        .is_some_and(|mid| ctx.state.find_method(class, mid).is_some());
    bool_value(found)
}

/// Method names defined in the class itself, plus inherited ones unless
/// `false` is passed.
fn instance_methods(ctx: &mut PrimitiveContext) -> EvalResult {
    let class = module(ctx)?;
    let inherited = !matches!(ctx.arg(0), RawValue::False);
    let sources = if inherited { ctx.state.ancestors(class) } else { vec![class] };
    let mut names: Vec<Sym> = Vec::new();
    for source in sources {
        if inherited && (source == ctx.state.core.object || source == ctx.state.core.kernel) {
            continue;
        }
        let Some(data) = ctx.state.class_data(source) else {
            continue;
        };
        for &name in data.methods.keys() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names.sort_by_key(|&sym| ctx.state.sym_name(sym));
    let values = names.into_iter().map(RawValue::Symbol).collect();
    Ok(ctx.state.new_array(values))
}

fn alias_method(ctx: &mut PrimitiveContext) -> EvalResult {
    let class = module(ctx)?;
    let names = name_args(ctx)?;
    let (new_name, old_name) = (names[0], names[1]);
    let Some((method, _)) = ctx.state.find_method(class, old_name) else {
        let (old, owner) = (ctx.state.sym_name(old_name), ctx.state.class_name(class));
        return Err(ctx.state.name_error(format!("undefined method '{old}' for class '{owner}'")));
    };
    ctx.state.define_method_raw(class, new_name, method);
    Ok(RawValue::Symbol(new_name))
}

fn remove_method(ctx: &mut PrimitiveContext) -> EvalResult {
    let class = module(ctx)?;
    for name in name_args(ctx)? {
        let removed = ctx
            .state
            .class_data_mut(class)
            .and_then(|data| data.methods.remove(&name));
        if removed.is_none() {
            let (shown, owner) = (ctx.state.sym_name(name), ctx.state.class_name(class));
            return Err(ctx.state.name_error(format!("method '{shown}' not defined in {owner}")));
        }
    }
    Ok(ctx.receiver)
}

/// Copies the named instance methods onto the module's singleton class.
fn module_function(ctx: &mut PrimitiveContext) -> EvalResult {
    let class = module(ctx)?;
    let Some(meta) = ctx.state.singleton_class(class) else {
        return Ok(RawValue::Nil);
    };
    for name in name_args(ctx)? {
        if let Some((method, _)) = ctx.state.find_method(class, name) {
            ctx.state.define_method_raw(meta, name, method);
        }
    }
    Ok(RawValue::Nil)
}

// Visibility is not modelled; every method is public.
fn visibility(ctx: &mut PrimitiveContext) -> EvalResult {
    Ok(match ctx.arguments.as_slice() {
        [] => RawValue::Nil,
        [single] => *single,
        many => {
            let many = many.to_vec();
            ctx.state.new_array(many)
        }
    })
}

/// Runs the block with the class as `self` and as the target of `def`.
fn class_eval(ctx: &mut PrimitiveContext) -> EvalResult {
    let class = module(ctx)?;
    let block = ctx.block()?;
    if let Some(proc) = block.as_object() {
        ctx.state.proc_set_target_class(proc, class);
    }
    ctx.state.call_block(block, vec![class.into()], None, Some(class.into()))
}

// ── Constants ─────────────────────────────────────────────────

fn const_get(ctx: &mut PrimitiveContext) -> EvalResult {
    let class = module(ctx)?;
    let path = ctx.name_arg(0)?;
    let mut current: RawValue = class.into();
    for segment in path.split("::").filter(|s| !s.is_empty()) {
        let sym = ctx.state.intern(segment);
        let found = current
            .as_object()
            .and_then(|scope| ctx.state.const_get_inherited(scope, sym))
            .or_else(|| ctx.state.const_get(ctx.state.core.object, sym));
        current = match found {
            Some(value) => value,
            None => {
                let owner = ctx.state.class_name(class);
                return Err(ctx.state.name_error(format!("uninitialized constant {owner}::{segment}")));
            }
        };
    }
    Ok(current)
}

fn constant_name(ctx: &mut PrimitiveContext) -> Result<Sym, Exc> {
    let name = ctx.name_arg(0)?;
    if !name.starts_with(|c: char| c.is_ascii_uppercase()) {
        return Err(ctx.state.name_error(format!("wrong constant name {name}")));
    }
    Ok(ctx.state.intern(&name))
}

fn const_set(ctx: &mut PrimitiveContext) -> EvalResult {
    let class = module(ctx)?;
    let name = constant_name(ctx)?;
    let value = ctx.arg(1);
    ctx.state.const_set(class, name, value);
    Ok(value)
}

fn const_defined(ctx: &mut PrimitiveContext) -> EvalResult {
    let class = module(ctx)?;
    let name = constant_name(ctx)?;
    bool_value(ctx.state.const_get_inherited(class, name).is_some())
}

fn constants(ctx: &mut PrimitiveContext) -> EvalResult {
    let class = module(ctx)?;
    let mut names: Vec<Sym> = ctx
        .state
        .class_data(class)
        .map(|data| data.consts.keys().copied().collect())
        .unwrap_or_default();
    names.sort_by_key(|&sym| ctx.state.sym_name(sym));
    let values = names.into_iter().map(RawValue::Symbol).collect();
    Ok(ctx.state.new_array(values))
}

// ── Instantiation ─────────────────────────────────────────────

/// Creates an object of `class`, picking the storage of its nearest
/// built-in ancestor.
fn allocate(ctx: &mut PrimitiveContext, class: ObjRef) -> EvalResult {
    let core = *ctx.state.core();
    match ctx.state.class_kind(class) {
        Some(ClassKind::Class) => {}
        Some(ClassKind::Singleton) => return Err(ctx.state.type_error("can't create instance of singleton class")),
        _ => {
            let shown = ctx.state.class_name(class);
            return Err(ctx.state.type_error(format!("allocator undefined for {shown}")));
        }
    }
    let mut superclass = Some(class);
    while let Some(current) = superclass {
        let object = if current == core.exception {
            Object::Exception(ExceptionData {
                class,
                message: RawValue::Nil,
            })
        } else if current == core.string {
            Object::String(String::new())
        } else if current == core.array {
            Object::Array(Vec::new())
        } else if current == core.hash {
            Object::Hash(HashTable::new())
        } else if [core.integer, core.float, core.symbol, core.nil_class, core.true_class, core.false_class, core.proc_class, core.class, core.module]
            .contains(&current)
        {
            let shown = ctx.state.class_name(class);
            return Err(ctx.state.type_error(format!("allocator undefined for {shown}")));
        } else if current == core.object {
            Object::Instance(Instance {
                class,
                ivars: Default::default(),
            })
        } else {
            superclass = ctx.state.class_data(current).and_then(|data| data.superclass);
            continue;
        };
        return Ok(ctx.state.heap.allocate(object).into());
    }
    Ok(ctx.state.heap.allocate(Object::Instance(Instance {
        class,
        ivars: Default::default(),
    })).into())
}

/// `Class#new`. On `Class` and `Module` themselves this creates an
/// anonymous class or module, whose body is the optional block.
fn new(ctx: &mut PrimitiveContext) -> EvalResult {
    let class = module(ctx)?;
    let core = *ctx.state.core();
    if class == core.class || class == core.module {
        let created = if class == core.class {
            let superclass = match ctx.arg(0) {
                RawValue::Nil => core.object,
                _ => ctx.class_arg(0)?,
            };
            ctx.state.new_anonymous_class(superclass)
        } else {
            ctx.state.new_anonymous_module()
        };
        if let Some(block) = ctx.block
            && let Some(proc) = block.as_object()
        {
            ctx.state.proc_set_target_class(proc, created);
            ctx.state.call_block(block, vec![created.into()], None, Some(created.into()))?;
        }
        return Ok(created.into());
    }
    let object = allocate(ctx, class)?;
    let mid = ctx.state.intern("initialize");
    let args = ctx.arguments.clone();
    ctx.state.send(object, mid, args, ctx.block)?;
    Ok(object)
}

fn superclass(ctx: &mut PrimitiveContext) -> EvalResult {
    let class = module(ctx)?;
    let mut superclass = ctx.state.class_data(class).and_then(|data| data.superclass);
    // Skip singleton classes of the superclass chain.
    while let Some(current) = superclass {
        if ctx.state.class_kind(current) != Some(ClassKind::Singleton) {
            break;
        }
        superclass = ctx.state.class_data(current).and_then(|data| data.superclass);
    }
    Ok(superclass.map(RawValue::from).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use crate::State;

    fn eval_inspect(code: &str) -> String {
        let mut state = State::new();
        let value = state.load_string(code);
        if let Some(exc) = state.exc {
            panic!("{code}: {}", state.exception_message(exc));
        }
        state.inspect(value)
    }

    #[test]
    fn accessors() {
        let code = "class Point\n attr_accessor :x, :y\nend\np = Point.new\np.x = 3\np.y = p.x * 2\n[p.x, p.y, p.respond_to?(:x=)]";
        assert_eq!(eval_inspect(code), "[3, 6, true]");
    }

    #[test]
    fn naming_and_hierarchy() {
        let code = "module Outer\n class Inner\n end\nend\n[Outer::Inner.name, Outer::Inner.superclass, Integer.superclass, Outer::Inner < Object, Class.new.name]";
        assert_eq!(eval_inspect(code), "[\"Outer::Inner\", Object, Numeric, true, nil]");
    }

    #[test]
    fn mixins() {
        let code = "module Greet\n def hi\n  'hi ' + name\n end\nend\nclass P\n include Greet\n def name\n  'bob'\n end\nend\n[P.new.hi, P.include?(Greet), P.ancestors.include?(Greet), Greet === P.new]";
        assert_eq!(eval_inspect(code), "[\"hi bob\", true, true, true]");
    }

    #[test]
    fn constants() {
        let code = "class Box\nend\nBox.const_set(:SIZE, 4)\n[Box::SIZE, Box.const_get(:SIZE), Box.const_defined?(:SIZE), Object.const_get('Box::SIZE')]";
        assert_eq!(eval_inspect(code), "[4, 4, true, 4]");
    }

    #[test]
    fn aliases_and_reflection() {
        let code = "class A\n def a\n  1\n end\n alias_method :b, :a\nend\n[A.new.b, A.method_defined?(:b), A.instance_methods(false)]";
        assert_eq!(eval_inspect(code), "[1, true, [:a, :b]]");
    }

    #[test]
    fn anonymous_classes() {
        let code = "k = Class.new(StandardError) do\n def extra\n  :yes\n end\nend\nobj = k.new('m')\n[obj.extra, obj.message, obj.is_a?(StandardError)]";
        assert_eq!(eval_inspect(code), "[:yes, \"m\", true]");
    }

    #[test]
    fn builtin_subclasses_keep_storage() {
        assert_eq!(eval_inspect("class Stack < Array\nend\ns = Stack.new\ns.push(1)\ns.length"), "1");
    }

    #[test]
    fn module_functions() {
        let code = "module Util\n def twice(x)\n  x * 2\n end\n module_function :twice\nend\nUtil.twice(4)";
        assert_eq!(eval_inspect(code), "8");
    }

    #[test]
    fn no_allocator_for_immediates() {
        let mut state = State::new();
        state.load_string("Integer.new");
        let exc = state.exc.expect("TypeError");
        assert_eq!(state.exception_message(exc), "allocator undefined for Integer");
    }
}
