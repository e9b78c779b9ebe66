//! Compile-time symbol tables and runtime scopes.
//!
//! Both sides are layered chains with first-match-wins lookup. Layers
//! are shared behind [`Arc`], so the cheap composition (prepending a
//! shadow layer, as comprehension iterations do) never copies entries,
//! while [`SymbolTable::flatten`] and [`Scope::merge`] materialize a
//! single map for long-lived hot paths.

use std::fmt;
use std::sync::Arc;

use fxhash::FxHashMap;

use crate::error::{Error, EvalResult, ParseResult};
use crate::expr::Expr;
use crate::name::Name;
use crate::types::Type;
use crate::value::Value;

/// A callable bound in a scope or attached to a signature.
pub type ScopeFn = Arc<dyn Fn(&[Value]) -> EvalResult<Value> + Send + Sync>;

// =====================================================================
// Function signatures
// =====================================================================

/// What a single parameter slot accepts.
#[derive(Debug, Clone)]
pub enum Param {
    /// Exactly this type, after widening coercion.
    Typed(Type),
    /// Any numeric type.
    Numeric,
    /// Any array or tuple.
    Sequence,
    /// Any string or enum.
    Text,
    /// Anything.
    Any,
}

impl Param {
    fn accepts(&self, ty: &Type) -> bool {
        match self {
            Param::Typed(t) => t.accepts(ty),
            Param::Numeric => ty.is_numeric(),
            Param::Sequence => ty.is_sequence(),
            Param::Text => ty.is_string() || ty.is_enum(),
            Param::Any => true,
        }
    }

    fn describe(&self) -> String {
        match self {
            Param::Typed(t) => t.to_string(),
            Param::Numeric => "a number".to_string(),
            Param::Sequence => "an array or tuple".to_string(),
            Param::Text => "a string".to_string(),
            Param::Any => "any value".to_string(),
        }
    }
}

/// How a function's return type derives from its argument types.
#[derive(Debug, Clone)]
pub enum ReturnSpec {
    /// Always the same type.
    Fixed(Type),
    /// The common numeric type of all arguments.
    CommonNumeric,
    /// The type of argument `i`.
    Same(usize),
    /// The element type of sequence argument `i`; a string stays a string.
    Element(usize),
    /// The common numeric type of the elements of sequence argument `i`.
    NumericElement(usize),
}

/// Compile-time description of a callable: parameter slots, variadic
/// tail, return-type rule and an optional fold implementation used for
/// constant folding and as the default runtime behavior.
#[derive(Clone)]
pub struct FuncSignature {
    pub params: Vec<Param>,
    pub variadic: bool,
    pub ret: ReturnSpec,
    pub fold: Option<ScopeFn>,
}

impl FuncSignature {
    pub fn new(params: Vec<Param>, ret: ReturnSpec) -> FuncSignature {
        FuncSignature {
            params,
            variadic: false,
            ret,
            fold: None,
        }
    }

    pub fn variadic(mut self) -> FuncSignature {
        self.variadic = true;
        self
    }

    pub fn with_fold(
        mut self,
        fold: impl Fn(&[Value]) -> EvalResult<Value> + Send + Sync + 'static,
    ) -> FuncSignature {
        self.fold = Some(Arc::new(fold));
        self
    }

    fn param_for(&self, i: usize) -> Option<&Param> {
        if i < self.params.len() {
            self.params.get(i)
        } else if self.variadic {
            self.params.last()
        } else {
            None
        }
    }

    fn check_arity(&self, name: &Name, count: usize) -> ParseResult<()> {
        let ok = if self.variadic {
            count >= self.params.len()
        } else {
            count == self.params.len()
        };
        if ok {
            Ok(())
        } else {
            Err(Error::type_err(format!(
                "`{}` expects {}{} argument(s), found {}",
                name,
                if self.variadic { "at least " } else { "" },
                self.params.len(),
                count
            )))
        }
    }

    /// Validate argument types and compute the return type.
    pub fn return_type(&self, name: &Name, args: &[Type]) -> ParseResult<Type> {
        self.check_arity(name, args.len())?;
        for (i, arg) in args.iter().enumerate() {
            let param = self
                .param_for(i)
                .ok_or_else(|| Error::type_err(format!("`{}` has too many arguments", name)))?;
            if !param.accepts(arg) {
                return Err(Error::type_err(format!(
                    "argument {} of `{}` expects {}, found {}",
                    i + 1,
                    name,
                    param.describe(),
                    arg
                )));
            }
        }
        match &self.ret {
            ReturnSpec::Fixed(t) => Ok(t.clone()),
            ReturnSpec::CommonNumeric => Type::common_numeric(args),
            ReturnSpec::Same(i) => args.get(*i).cloned().ok_or_else(|| {
                Error::type_err(format!("`{}` is missing argument {}", name, i + 1))
            }),
            ReturnSpec::Element(i) | ReturnSpec::NumericElement(i) => {
                let arg = args.get(*i).ok_or_else(|| {
                    Error::type_err(format!("`{}` is missing argument {}", name, i + 1))
                })?;
                let elem = match arg.elem() {
                    Some(elem) => elem.clone(),
                    None if arg.is_string() || arg.is_enum() => Type::string(),
                    None => {
                        return Err(Error::type_err(format!(
                            "argument {} of `{}` expects a sequence, found {}",
                            i + 1,
                            name,
                            arg
                        )))
                    }
                };
                if matches!(self.ret, ReturnSpec::NumericElement(_)) {
                    Type::common_numeric(&[elem])
                } else {
                    Ok(elem)
                }
            }
        }
    }

    /// Coerce runtime arguments into declared parameter types.
    pub fn coerce_args(&self, name: &Name, args: Vec<Value>) -> EvalResult<Vec<Value>> {
        self.check_arity(name, args.len())?;
        let mut out = Vec::with_capacity(args.len());
        for (i, arg) in args.into_iter().enumerate() {
            match self.param_for(i) {
                Some(Param::Typed(t)) => out.push(t.coerce(arg)?),
                Some(_) => out.push(arg),
                None => {
                    return Err(Error::calculation(format!(
                        "`{}` has too many arguments",
                        name
                    )))
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Debug for FuncSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FuncSignature")
            .field("params", &self.params)
            .field("variadic", &self.variadic)
            .field("ret", &self.ret)
            .field("fold", &self.fold.as_ref().map(|_| "..."))
            .finish()
    }
}

// =====================================================================
// Compile-time symbol table
// =====================================================================

/// What the compile-time table knows about one name.
#[derive(Debug, Clone)]
pub struct SymbolInfo {
    /// Static type of the symbol (for functions, a nominal return type).
    pub ty: Type,
    /// Expression template grafted into referencing trees on resolution.
    pub template: Option<Expr>,
    /// Callable signature, present for functions.
    pub signature: Option<FuncSignature>,
}

impl SymbolInfo {
    /// A plain typed variable, bound at evaluation time.
    pub fn variable(ty: Type) -> SymbolInfo {
        SymbolInfo {
            ty,
            template: None,
            signature: None,
        }
    }

    /// A named expression: references are replaced by a deep copy.
    pub fn template(ty: Type, expr: Expr) -> SymbolInfo {
        SymbolInfo {
            ty,
            template: Some(expr),
            signature: None,
        }
    }

    /// A callable with its signature.
    pub fn function(ty: Type, signature: FuncSignature) -> SymbolInfo {
        SymbolInfo {
            ty,
            template: None,
            signature: Some(signature),
        }
    }
}

/// Layered compile-time symbol table with first-match-wins lookup.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    layers: Vec<Arc<FxHashMap<Name, SymbolInfo>>>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable {
            layers: vec![Arc::new(FxHashMap::default())],
        }
    }

    /// Register a symbol in the innermost layer. The first registration
    /// of a name wins.
    pub fn define(&mut self, name: Name, info: SymbolInfo) {
        if self.layers.is_empty() {
            self.layers.push(Arc::new(FxHashMap::default()));
        }
        Arc::make_mut(&mut self.layers[0]).entry(name).or_insert(info);
    }

    /// Innermost-first lookup.
    pub fn probe(&self, name: &Name) -> Option<&SymbolInfo> {
        self.layers.iter().find_map(|layer| layer.get(name))
    }

    pub fn lookup(&self, name: &Name) -> ParseResult<&SymbolInfo> {
        self.probe(name)
            .ok_or_else(|| Error::undefined_variable(name.clone()))
    }

    /// Compose tables in priority order; earlier tables win. Nested
    /// layer chains are flattened into one chain, not nested.
    pub fn compose(tables: &[SymbolTable]) -> SymbolTable {
        let mut layers = Vec::new();
        for table in tables {
            layers.extend(table.layers.iter().cloned());
        }
        SymbolTable { layers }
    }

    /// A cheap copy with a fresh innermost layer on top.
    pub fn shadowed(&self) -> SymbolTable {
        let mut layers = Vec::with_capacity(self.layers.len() + 1);
        layers.push(Arc::new(FxHashMap::default()));
        layers.extend(self.layers.iter().cloned());
        SymbolTable { layers }
    }

    /// Merge every layer into a single map for hot lookup paths.
    pub fn flatten(&self) -> SymbolTable {
        let mut merged = FxHashMap::default();
        for layer in self.layers.iter().rev() {
            for (name, info) in layer.iter() {
                merged.insert(name.clone(), info.clone());
            }
        }
        SymbolTable {
            layers: vec![Arc::new(merged)],
        }
    }

    /// Every visible name with its winning entry.
    pub fn entries(&self) -> FxHashMap<Name, SymbolInfo> {
        let mut merged = FxHashMap::default();
        for layer in self.layers.iter().rev() {
            for (name, info) in layer.iter() {
                merged.insert(name.clone(), info.clone());
            }
        }
        merged
    }
}

// =====================================================================
// Runtime scope
// =====================================================================

/// A value, expression or callable bound at runtime.
#[derive(Clone)]
pub enum Binding {
    Value(Value),
    /// Evaluated on demand against the scope it is looked up from.
    Expr(Arc<Expr>),
    Func(ScopeFn),
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Binding::Expr(e) => f.debug_tuple("Expr").field(&e.to_source()).finish(),
            Binding::Func(_) => f.write_str("Func(...)"),
        }
    }
}

/// Layered runtime scope with first-match-wins lookup.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    layers: Vec<Arc<FxHashMap<Name, Binding>>>,
}

impl Scope {
    pub fn new() -> Scope {
        Scope {
            layers: vec![Arc::new(FxHashMap::default())],
        }
    }

    pub fn empty() -> Scope {
        Scope::new()
    }

    /// Bind a name in the innermost layer; the first binding wins.
    pub fn bind(&mut self, name: Name, binding: Binding) {
        if self.layers.is_empty() {
            self.layers.push(Arc::new(FxHashMap::default()));
        }
        Arc::make_mut(&mut self.layers[0])
            .entry(name)
            .or_insert(binding);
    }

    pub fn bind_value(&mut self, name: Name, value: Value) {
        self.bind(name, Binding::Value(value));
    }

    pub fn bind_expr(&mut self, name: Name, expr: Expr) {
        self.bind(name, Binding::Expr(Arc::new(expr)));
    }

    pub fn bind_fn(
        &mut self,
        name: Name,
        f: impl Fn(&[Value]) -> EvalResult<Value> + Send + Sync + 'static,
    ) {
        self.bind(name, Binding::Func(Arc::new(f)));
    }

    /// Innermost-first lookup of the raw binding.
    pub fn get(&self, name: &Name) -> Option<&Binding> {
        self.layers.iter().find_map(|layer| layer.get(name))
    }

    /// Resolve a name to a value. Expression bindings evaluate lazily
    /// against this scope.
    pub fn value(&self, name: &Name) -> EvalResult<Value> {
        match self.get(name) {
            Some(Binding::Value(v)) => Ok(v.clone()),
            Some(Binding::Expr(e)) => {
                let expr = e.clone();
                expr.evaluate(self)
            }
            Some(Binding::Func(_)) => Err(Error::calculation(format!(
                "function `{}` used as a value",
                name
            ))),
            None => Err(Error::undefined_variable(name.clone())),
        }
    }

    /// Resolve a name to a callable, when its winning binding is one.
    pub fn function(&self, name: &Name) -> Option<ScopeFn> {
        match self.get(name) {
            Some(Binding::Func(f)) => Some(f.clone()),
            _ => None,
        }
    }

    /// Eagerly merge scopes into a single-layer scope; earlier scopes
    /// win. Meant for long-lived compositions.
    pub fn merge(scopes: &[Scope]) -> Scope {
        let mut merged = FxHashMap::default();
        for scope in scopes.iter().rev() {
            for layer in scope.layers.iter().rev() {
                for (name, binding) in layer.iter() {
                    merged.insert(name.clone(), binding.clone());
                }
            }
        }
        Scope {
            layers: vec![Arc::new(merged)],
        }
    }

    /// Lazily shadow this scope with one extra layer. Cheap: existing
    /// layers are shared, not copied. Meant for per-iteration loop
    /// variables.
    pub fn shadowed_with(&self, layer: FxHashMap<Name, Binding>) -> Scope {
        let mut layers = Vec::with_capacity(self.layers.len() + 1);
        layers.push(Arc::new(layer));
        layers.extend(self.layers.iter().cloned());
        Scope { layers }
    }

    /// Derive the compile-time view of this scope: value bindings become
    /// typed variables, expression bindings become templates. Callables
    /// carry no signature and are skipped.
    pub fn symbols(&self) -> SymbolTable {
        let mut table = SymbolTable::new();
        let mut seen = FxHashMap::default();
        for layer in self.layers.iter() {
            for (name, binding) in layer.iter() {
                if seen.contains_key(name) {
                    continue;
                }
                seen.insert(name.clone(), ());
                match binding {
                    Binding::Value(v) => {
                        if let Ok(ty) = Type::of_value(v) {
                            table.define(name.clone(), SymbolInfo::variable(ty));
                        }
                    }
                    Binding::Expr(e) => {
                        if let Ok(ty) = e.return_type() {
                            table.define(name.clone(), SymbolInfo::template(ty, (**e).clone()));
                        }
                    }
                    Binding::Func(_) => {}
                }
            }
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinaryOp, Expr};

    fn name(s: &str) -> Name {
        Name::new(s).unwrap()
    }

    #[test]
    fn test_first_match_wins() {
        let mut outer = Scope::new();
        outer.bind_value(name("x"), Value::Int(1));
        let mut layer = FxHashMap::default();
        layer.insert(name("x"), Binding::Value(Value::Int(2)));
        let inner = outer.shadowed_with(layer);
        assert_eq!(inner.value(&name("x")).unwrap(), Value::Int(2));
        assert_eq!(outer.value(&name("x")).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_shadowing_is_cheap_and_isolated() {
        let mut base = Scope::new();
        base.bind_value(name("a"), Value::Int(1));
        let mut layer = FxHashMap::default();
        layer.insert(name("b"), Binding::Value(Value::Int(2)));
        let shadowed = base.shadowed_with(layer);
        assert_eq!(shadowed.value(&name("a")).unwrap(), Value::Int(1));
        assert_eq!(shadowed.value(&name("b")).unwrap(), Value::Int(2));
        assert!(base.value(&name("b")).is_err());
    }

    #[test]
    fn test_merge_priority() {
        let mut a = Scope::new();
        a.bind_value(name("x"), Value::Int(1));
        let mut b = Scope::new();
        b.bind_value(name("x"), Value::Int(2));
        b.bind_value(name("y"), Value::Int(3));
        let merged = Scope::merge(&[a, b]);
        assert_eq!(merged.value(&name("x")).unwrap(), Value::Int(1));
        assert_eq!(merged.value(&name("y")).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_expr_binding_evaluates_lazily() {
        let mut scope = Scope::new();
        let two = Expr::constant(Value::Int(2));
        let three = Expr::constant(Value::Int(3));
        scope.bind_expr(name("six"), Expr::combine(BinaryOp::Mul, &two, &three));
        assert_eq!(scope.value(&name("six")).unwrap(), Value::Int(6));
    }

    #[test]
    fn test_undefined_lookup_carries_name() {
        let scope = Scope::new();
        let err = scope.value(&name("missing")).unwrap_err();
        match err.kind() {
            crate::error::ErrorKind::UndefinedVariable(n) => assert_eq!(n.as_str(), "missing"),
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_symbol_table_compose_flattens() {
        let mut a = SymbolTable::new();
        a.define(name("x"), SymbolInfo::variable(Type::int()));
        let mut b = SymbolTable::new();
        b.define(name("x"), SymbolInfo::variable(Type::float()));
        b.define(name("y"), SymbolInfo::variable(Type::bool()));
        let composed = SymbolTable::compose(&[a, b]);
        assert_eq!(composed.probe(&name("x")).unwrap().ty, Type::int());
        assert_eq!(composed.probe(&name("y")).unwrap().ty, Type::bool());
        let flat = composed.flatten();
        assert_eq!(flat.probe(&name("x")).unwrap().ty, Type::int());
    }

    #[test]
    fn test_symbol_table_shadowing() {
        let mut base = SymbolTable::new();
        base.define(name("x"), SymbolInfo::variable(Type::int()));
        let mut inner = base.shadowed();
        inner.define(name("x"), SymbolInfo::variable(Type::string()));
        assert_eq!(inner.probe(&name("x")).unwrap().ty, Type::string());
        assert_eq!(base.probe(&name("x")).unwrap().ty, Type::int());
    }

    #[test]
    fn test_signature_arity_and_types() {
        let sig = FuncSignature::new(
            vec![Param::Numeric, Param::Numeric],
            ReturnSpec::CommonNumeric,
        );
        let f = name("clamp");
        assert_eq!(
            sig.return_type(&f, &[Type::uint(), Type::int()]).unwrap(),
            Type::int()
        );
        assert_eq!(
            sig.return_type(&f, &[Type::uint(), Type::float()]).unwrap(),
            Type::float()
        );
        assert!(sig.return_type(&f, &[Type::uint()]).is_err());
        assert!(sig
            .return_type(&f, &[Type::uint(), Type::string()])
            .is_err());
    }

    #[test]
    fn test_variadic_signature() {
        let sig = FuncSignature::new(vec![Param::Numeric], ReturnSpec::CommonNumeric).variadic();
        let f = name("min");
        assert!(sig.return_type(&f, &[]).is_err());
        assert_eq!(sig.return_type(&f, &[Type::uint()]).unwrap(), Type::int());
        assert_eq!(
            sig.return_type(&f, &[Type::uint(), Type::uint(), Type::float()])
                .unwrap(),
            Type::float()
        );
    }

    #[test]
    fn test_element_return_spec() {
        let sig = FuncSignature::new(vec![Param::Sequence], ReturnSpec::Element(0));
        let f = name("first");
        assert_eq!(
            sig.return_type(&f, &[Type::array(Type::color())]).unwrap(),
            Type::color()
        );
        let sum = FuncSignature::new(vec![Param::Sequence], ReturnSpec::NumericElement(0));
        assert_eq!(
            sum.return_type(&name("sum"), &[Type::array(Type::uint())])
                .unwrap(),
            Type::int()
        );
    }

    #[test]
    fn test_scope_symbols_view() {
        let mut scope = Scope::new();
        scope.bind_value(name("width"), Value::Float(10.0));
        scope.bind_expr(name("half"), Expr::constant(Value::Float(5.0)));
        scope.bind_fn(name("f"), |_| Ok(Value::Empty));
        let table = scope.symbols();
        assert_eq!(table.probe(&name("width")).unwrap().ty, Type::float());
        assert!(table.probe(&name("half")).unwrap().template.is_some());
        assert!(table.probe(&name("f")).is_none());
    }
}
