//! Document-template expansion.
//!
//! Expansion runs in two phases. The parse phase walks a [`SourceNode`]
//! tree once, compiles every embedded expression against a layered
//! symbol table and yields a reusable [`TemplateTree`]. The evaluate
//! phase binds runtime values and materializes a fresh [`InstanceNode`]
//! snapshot, unrolling foreach loops and resolving conditional
//! collections. Both phases accumulate faults per node instead of
//! aborting, so a partially broken document still expands.

mod conditional;
mod instance;
mod source;

pub use conditional::Conditional;
pub use instance::InstanceNode;
pub use source::SourceNode;

use fxhash::FxHashMap;
use indexmap::IndexMap;

use crate::error::{Error, ParseResult, Span};
use crate::expr::Expr;
use crate::name::Name;
use crate::parser::parse_expression;
use crate::scope::{Binding, Scope, SymbolInfo, SymbolTable};
use crate::stdlib;
use crate::template::{TemplateExpr, TemplateOptions};
use crate::types::Type;
use crate::value::Value;
use crate::wrapper::BoolExpr;

/// Property keys interpreted by the engine rather than the document.
const FOREACH_KEY: &str = "foreach";
const CONDITION_KEY: &str = "condition";

// =====================================================================
// Options
// =====================================================================

/// Knobs for expansion.
#[derive(Debug, Clone, Copy)]
pub struct ExpandOptions {
    /// Drop nodes whose condition is false. With pruning off every node
    /// materializes and carries its condition result instead.
    pub prune: bool,
    /// Recognize bare `{expr}` placeholders in properties and entries.
    pub bare_braces: bool,
}

impl Default for ExpandOptions {
    fn default() -> ExpandOptions {
        ExpandOptions {
            prune: true,
            bare_braces: true,
        }
    }
}

impl ExpandOptions {
    /// Keep nodes whose condition is false, marked instead of dropped.
    pub fn no_prune() -> ExpandOptions {
        ExpandOptions {
            prune: false,
            ..ExpandOptions::default()
        }
    }
}

// =====================================================================
// Parse output
// =====================================================================

/// A foreach binding on a positional child.
#[derive(Debug, Clone)]
struct ForEachBinding {
    var: Name,
    source: Expr,
}

/// One entry of a node's list block.
#[derive(Debug, Clone)]
enum TemplateEntry {
    Const(String),
    Live(TemplateExpr),
}

/// Parse output for one source node: every piece of embedded text
/// compiled, constants folded out of the per-evaluation path.
#[derive(Debug, Clone)]
pub struct TemplateNode {
    name: String,
    span: Span,
    condition: BoolExpr,
    foreach: Option<ForEachBinding>,
    flags: Vec<String>,
    const_props: IndexMap<Name, Value>,
    live_props: IndexMap<Name, TemplateExpr>,
    entries: Vec<TemplateEntry>,
    children: Vec<TemplateNode>,
    named_children: IndexMap<Name, Conditional<TemplateNode>>,
}

/// A compiled template plus the faults its parse accumulated.
///
/// Parse once, evaluate as often as needed; evaluations are independent
/// of each other.
#[derive(Debug, Clone)]
pub struct TemplateTree {
    root: TemplateNode,
    errors: Vec<Error>,
}

impl TemplateTree {
    /// Faults found while compiling the source tree.
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// Materialize the template against a runtime scope.
    pub fn evaluate(&self, scope: &Scope, options: &ExpandOptions) -> Expansion {
        let mut errors = Vec::new();
        let root = materialize_one(&self.root, scope, options, &mut errors);
        Expansion { root, errors }
    }
}

/// One materialized tree. The root is absent when its own condition
/// pruned it.
#[derive(Debug)]
pub struct Expansion {
    pub root: Option<InstanceNode>,
    pub errors: Vec<Error>,
}

// =====================================================================
// Expander
// =====================================================================

/// Compiles source trees into reusable templates.
#[derive(Debug, Clone)]
pub struct Expander {
    symbols: SymbolTable,
}

impl Expander {
    /// An expander with the standard library in scope.
    pub fn new() -> Expander {
        Expander {
            symbols: stdlib::symbols(),
        }
    }

    /// Layers caller symbols over the standard library.
    pub fn with_symbols(symbols: &SymbolTable) -> Expander {
        Expander {
            symbols: SymbolTable::compose(&[symbols.clone(), stdlib::symbols()]),
        }
    }

    /// Compile a source tree. Broken pieces are reported and fall back
    /// to safe defaults so the rest of the document still compiles.
    pub fn parse(&self, source: &SourceNode, options: &ExpandOptions) -> TemplateTree {
        let mut errors = Vec::new();
        let template_options = TemplateOptions {
            bare_braces: options.bare_braces,
        };
        let root = parse_node(
            source,
            &self.symbols,
            NodePosition::Root,
            template_options,
            &mut errors,
        );
        TemplateTree { root, errors }
    }

    /// Parse and evaluate in one step, with a single merged report.
    pub fn expand(&self, source: &SourceNode, scope: &Scope, options: &ExpandOptions) -> Expansion {
        let tree = self.parse(source, options);
        let mut expansion = tree.evaluate(scope, options);
        let mut errors = tree.errors;
        errors.append(&mut expansion.errors);
        expansion.errors = errors;
        expansion
    }
}

impl Default for Expander {
    fn default() -> Expander {
        Expander::new()
    }
}

// =====================================================================
// Parse phase
// =====================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodePosition {
    Root,
    Positional,
    Named,
}

fn reserved<'a>(source: &'a SourceNode, key: &str) -> Option<&'a str> {
    source
        .properties
        .iter()
        .find_map(|(k, v)| k.eq_ignore_ascii_case(key).then(|| v.as_str()))
}

fn is_reserved(key: &str) -> bool {
    key.eq_ignore_ascii_case(FOREACH_KEY) || key.eq_ignore_ascii_case(CONDITION_KEY)
}

/// Parse `[$]var in expr` from a raw foreach property.
fn parse_foreach(raw: &str, symbols: &SymbolTable) -> ParseResult<(Name, Expr, Type)> {
    let text = raw.trim();
    let rest = text.strip_prefix('$').unwrap_or(text);
    let ident_len = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .count();
    if ident_len == 0 {
        return Err(Error::syntax("foreach needs a loop variable"));
    }
    let (ident, after) = rest.split_at(ident_len);
    let var = Name::new(ident)?;
    let after = after.trim_start();
    let keyword = after
        .get(..2)
        .ok_or_else(|| Error::syntax("expected `in` after the loop variable"))?;
    if !keyword.eq_ignore_ascii_case("in")
        || after[2..].starts_with(|c: char| c.is_ascii_alphanumeric())
    {
        return Err(Error::syntax("expected `in` after the loop variable"));
    }
    let source_text = after[2..].trim();
    if source_text.is_empty() {
        return Err(Error::syntax("foreach needs a source expression"));
    }
    let source = parse_expression(source_text, symbols)?;
    let ty = source.return_type()?;
    let elem = ty.elem().cloned().ok_or_else(|| {
        Error::type_err(format!(
            "foreach source must be an array or tuple, found {}",
            ty
        ))
    })?;
    Ok((var, source, elem))
}

fn parse_node(
    source: &SourceNode,
    symbols: &SymbolTable,
    position: NodePosition,
    template_options: TemplateOptions,
    errors: &mut Vec<Error>,
) -> TemplateNode {
    // One fresh layer per node: the loop variable lands first and wins
    // over a same-named definition; both shadow the ancestors.
    let mut local = symbols.shadowed();

    let mut foreach = None;
    if let Some(raw) = reserved(source, FOREACH_KEY) {
        if position == NodePosition::Positional {
            match parse_foreach(raw, symbols) {
                Ok((var, source_expr, elem)) => {
                    local.define(var.clone(), SymbolInfo::variable(elem));
                    foreach = Some(ForEachBinding {
                        var,
                        source: source_expr,
                    });
                }
                Err(err) => {
                    errors.push(err.locate(source.span, format!("foreach on `{}`", source.name)));
                }
            }
        } else {
            let place = if position == NodePosition::Root {
                "the root node"
            } else {
                "a named child"
            };
            errors.push(
                Error::processing(format!("foreach is not allowed on {}", place))
                    .locate(source.span, format!("foreach on `{}`", source.name)),
            );
        }
    }

    // The condition sees the loop variable but not this node's own
    // definitions. A broken condition falls back to true.
    let mut condition = BoolExpr::constant(true);
    if let Some(raw) = reserved(source, CONDITION_KEY) {
        match BoolExpr::parse(raw, &local) {
            Ok(parsed) => condition = parsed,
            Err(err) => {
                errors.push(err.locate(source.span, format!("condition on `{}`", source.name)));
            }
        }
    }

    // Definitions accumulate left to right, so later ones may reference
    // earlier ones. References are grafted at parse time; no runtime
    // binding is needed.
    for (key, raw) in &source.definitions {
        let context = format!("definition `{}` on `{}`", key, source.name);
        let name = match Name::new(key.as_str()) {
            Ok(name) => name,
            Err(err) => {
                errors.push(err.locate(source.span, context));
                continue;
            }
        };
        match parse_expression(raw, &local).and_then(|expr| {
            let ty = expr.return_type()?;
            Ok((ty, expr))
        }) {
            Ok((ty, expr)) => local.define(name, SymbolInfo::template(ty, expr)),
            Err(err) => errors.push(err.locate(source.span, context)),
        }
    }

    let mut const_props = IndexMap::new();
    let mut live_props = IndexMap::new();
    for (key, raw) in &source.properties {
        if is_reserved(key) {
            continue;
        }
        let context = format!("property `{}` of `{}`", key, source.name);
        let name = match Name::new(key.as_str()) {
            Ok(name) => name,
            Err(err) => {
                errors.push(err.locate(source.span, context));
                continue;
            }
        };
        match TemplateExpr::parse_with(raw, &local, template_options) {
            Ok(template) => match template.constant_value() {
                Some(value) => {
                    const_props.insert(name, value);
                }
                None => {
                    live_props.insert(name, template);
                }
            },
            Err(err) => errors.push(err.locate(source.span, context)),
        }
    }

    let mut entries = Vec::with_capacity(source.entries.len());
    for (i, raw) in source.entries.iter().enumerate() {
        match TemplateExpr::parse_with(raw, &local, template_options) {
            Ok(template) => match template.constant_value() {
                Some(value) => entries.push(TemplateEntry::Const(value.to_string())),
                None => entries.push(TemplateEntry::Live(template)),
            },
            Err(err) => {
                errors.push(err.locate(source.span, format!("entry {} of `{}`", i + 1, source.name)));
            }
        }
    }

    let mut children = Vec::with_capacity(source.children.len());
    for child in &source.children {
        children.push(parse_node(
            child,
            &local,
            NodePosition::Positional,
            template_options,
            errors,
        ));
    }

    // Repeats of one name form a conditional collection; each child's
    // own condition becomes its arm guard and is moved out so it is
    // never evaluated twice.
    let mut named_children: IndexMap<Name, Conditional<TemplateNode>> = IndexMap::new();
    for (key, child) in &source.named_children {
        let name = match Name::new(key.as_str()) {
            Ok(name) => name,
            Err(err) => {
                errors.push(err.locate(
                    child.span,
                    format!("named child `{}` of `{}`", key, source.name),
                ));
                continue;
            }
        };
        let mut parsed = parse_node(child, &local, NodePosition::Named, template_options, errors);
        let guard = std::mem::replace(&mut parsed.condition, BoolExpr::constant(true));
        named_children.entry(name).or_default().push(guard, parsed);
    }

    TemplateNode {
        name: source.name.clone(),
        span: source.span,
        condition,
        foreach,
        flags: source.flags.clone(),
        const_props,
        live_props,
        entries,
        children,
        named_children,
    }
}

// =====================================================================
// Evaluate phase
// =====================================================================

/// Gate on the node's condition and build the instance. A condition
/// that fails to evaluate is reported and counted as true, matching the
/// parse-phase fallback.
fn materialize_one(
    node: &TemplateNode,
    scope: &Scope,
    options: &ExpandOptions,
    errors: &mut Vec<Error>,
) -> Option<InstanceNode> {
    let held = match node.condition.value(scope) {
        Ok(held) => held,
        Err(err) => {
            errors.push(err.locate(node.span, format!("condition on `{}`", node.name)));
            true
        }
    };
    if !held && options.prune {
        return None;
    }
    Some(build_instance(node, scope, held, options, errors))
}

/// Unroll a positional child into zero or more instances.
fn materialize_into(
    node: &TemplateNode,
    scope: &Scope,
    options: &ExpandOptions,
    errors: &mut Vec<Error>,
    out: &mut Vec<InstanceNode>,
) {
    let binding = match &node.foreach {
        Some(binding) => binding,
        None => {
            out.extend(materialize_one(node, scope, options, errors));
            return;
        }
    };
    let source = match binding.source.evaluate(scope) {
        Ok(value) => value,
        Err(err) => {
            errors.push(err.locate(node.span, format!("foreach on `{}`", node.name)));
            return;
        }
    };
    let items = match source.items() {
        Ok(items) => items,
        Err(err) => {
            errors.push(err.locate(node.span, format!("foreach on `{}`", node.name)));
            return;
        }
    };
    for item in items {
        let mut layer = FxHashMap::default();
        layer.insert(binding.var.clone(), Binding::Value(item.clone()));
        let iteration = scope.shadowed_with(layer);
        out.extend(materialize_one(node, &iteration, options, errors));
    }
}

/// Realize properties, entries and children into a fresh snapshot. The
/// caller has already decided the condition outcome.
fn build_instance(
    node: &TemplateNode,
    scope: &Scope,
    condition: bool,
    options: &ExpandOptions,
    errors: &mut Vec<Error>,
) -> InstanceNode {
    let mut properties = node.const_props.clone();
    for (key, template) in &node.live_props {
        match template.evaluate(scope, None) {
            Ok(value) => {
                properties.insert(key.clone(), value);
            }
            Err(err) => {
                errors.push(err.locate(node.span, format!("property `{}` of `{}`", key, node.name)));
            }
        }
    }

    let mut entries = Vec::with_capacity(node.entries.len());
    for (i, entry) in node.entries.iter().enumerate() {
        match entry {
            TemplateEntry::Const(text) => entries.push(text.clone()),
            TemplateEntry::Live(template) => match template.evaluate(scope, None) {
                Ok(value) => entries.push(value.to_string()),
                Err(err) => {
                    errors.push(err.locate(node.span, format!("entry {} of `{}`", i + 1, node.name)));
                }
            },
        }
    }

    let mut children = Vec::new();
    for child in &node.children {
        materialize_into(child, scope, options, errors, &mut children);
    }

    let mut named_children = IndexMap::new();
    for (key, arms) in &node.named_children {
        let mut faults = Vec::new();
        let winner = arms.select(scope, &mut faults);
        errors.extend(
            faults
                .into_iter()
                .map(|err| err.locate(node.span, format!("condition for `{}`", key))),
        );
        match winner {
            Some(child) => {
                named_children.insert(
                    key.clone(),
                    build_instance(child, scope, true, options, errors),
                );
            }
            // A lone disabled slot survives with pruning off; competing
            // arms that all lost stay absent.
            None if !options.prune && arms.len() == 1 => {
                let (_, child) = &arms.arms()[0];
                named_children.insert(
                    key.clone(),
                    build_instance(child, scope, false, options, errors),
                );
            }
            None => {}
        }
    }

    InstanceNode {
        name: node.name.clone(),
        span: node.span,
        condition,
        flags: node.flags.clone(),
        properties,
        entries,
        children,
        named_children,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand(source: &SourceNode, scope: &Scope) -> Expansion {
        Expander::new().expand(source, scope, &ExpandOptions::default())
    }

    fn must_root(expansion: &Expansion) -> &InstanceNode {
        assert!(
            expansion.errors.is_empty(),
            "unexpected faults: {:?}",
            expansion.errors
        );
        expansion.root.as_ref().unwrap()
    }

    #[test]
    fn test_constant_node() {
        let mut root = SourceNode::new("panel");
        root.properties
            .insert("width".to_string(), "${4 * 25}".to_string());
        root.properties
            .insert("title".to_string(), "Main".to_string());
        root.flags.push("visible".to_string());

        let out = expand(&root, &Scope::empty());
        let inst = must_root(&out);
        assert_eq!(inst.name, "panel");
        assert_eq!(inst.property("width"), Some(&Value::Int(100)));
        assert_eq!(inst.property("title"), Some(&Value::Str("Main".to_string())));
        assert_eq!(inst.flags, vec!["visible".to_string()]);
        assert!(inst.condition);
    }

    #[test]
    fn test_live_property_against_scope() {
        let mut root = SourceNode::new("panel");
        root.properties
            .insert("width".to_string(), "${$base * 2}".to_string());

        let expander = Expander::new();
        let mut symbols = SymbolTable::new();
        symbols.define(
            Name::new("base").unwrap(),
            SymbolInfo::variable(Type::int()),
        );
        let tree = Expander::with_symbols(&symbols).parse(&root, &ExpandOptions::default());
        assert!(tree.errors().is_empty());

        let mut scope = Scope::new();
        scope.bind_value(Name::new("base").unwrap(), Value::Int(21));
        let out = tree.evaluate(&scope, &ExpandOptions::default());
        assert_eq!(
            must_root(&out).property("width"),
            Some(&Value::Int(42))
        );

        // Unknown name at parse time is reported, property omitted.
        let broken = expander.parse(&root, &ExpandOptions::default());
        assert_eq!(broken.errors().len(), 1);
        let out = broken.evaluate(&Scope::empty(), &ExpandOptions::default());
        assert_eq!(out.root.unwrap().property("width"), None);
    }

    #[test]
    fn test_foreach_unrolls_children() {
        let mut item = SourceNode::new("item");
        item.properties
            .insert("foreach".to_string(), "x in [1, 2, 3]".to_string());
        item.entries.push("{$x}".to_string());
        let mut root = SourceNode::new("list");
        root.children.push(item);

        let out = expand(&root, &Scope::empty());
        let inst = must_root(&out);
        assert_eq!(inst.children.len(), 3);
        let texts: Vec<&str> = inst
            .children
            .iter()
            .map(|c| c.entries[0].as_str())
            .collect();
        assert_eq!(texts, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_foreach_loop_variable_in_properties() {
        let mut item = SourceNode::new("cell");
        item.properties
            .insert("foreach".to_string(), "$w in [10, 20]".to_string());
        item.properties
            .insert("width".to_string(), "${$w * 2}".to_string());
        let mut root = SourceNode::new("row");
        root.children.push(item);

        let out = expand(&root, &Scope::empty());
        let inst = must_root(&out);
        assert_eq!(inst.children[0].property("width"), Some(&Value::Int(20)));
        assert_eq!(inst.children[1].property("width"), Some(&Value::Int(40)));
    }

    #[test]
    fn test_foreach_rejected_on_root_and_named() {
        let mut root = SourceNode::new("panel");
        root.properties
            .insert("foreach".to_string(), "x in [1]".to_string());
        let out = expand(&root, &Scope::empty());
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].to_string().contains("root"));
        // Binding dropped: the node still materializes exactly once.
        assert!(out.root.is_some());

        let mut named = SourceNode::new("header");
        named
            .properties
            .insert("foreach".to_string(), "x in [1]".to_string());
        let mut root = SourceNode::new("panel");
        root.named_children.push(("header".to_string(), named));
        let out = expand(&root, &Scope::empty());
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.root.unwrap().named_children.len(), 1);
    }

    #[test]
    fn test_foreach_source_must_be_sequence() {
        let mut item = SourceNode::new("item");
        item.properties
            .insert("foreach".to_string(), "x in 5".to_string());
        item.properties
            .insert("width".to_string(), "${$x}".to_string());
        let mut root = SourceNode::new("list");
        root.children.push(item);

        let out = expand(&root, &Scope::empty());
        // One fault for the source, one for the property that can no
        // longer see the loop variable.
        assert_eq!(out.errors.len(), 2);
        let inst = out.root.unwrap();
        assert_eq!(inst.children.len(), 1);
        assert_eq!(inst.children[0].property("width"), None);
    }

    #[test]
    fn test_condition_prunes() {
        let mut hidden = SourceNode::new("hidden");
        hidden
            .properties
            .insert("condition".to_string(), "1 > 2".to_string());
        let mut shown = SourceNode::new("shown");
        shown
            .properties
            .insert("condition".to_string(), "2 > 1".to_string());
        let mut root = SourceNode::new("panel");
        root.children.push(hidden);
        root.children.push(shown);

        let out = expand(&root, &Scope::empty());
        let inst = must_root(&out);
        assert_eq!(inst.children.len(), 1);
        assert_eq!(inst.children[0].name, "shown");
    }

    #[test]
    fn test_condition_kept_without_pruning() {
        let mut hidden = SourceNode::new("hidden");
        hidden
            .properties
            .insert("condition".to_string(), "false".to_string());
        let mut root = SourceNode::new("panel");
        root.children.push(hidden);

        let tree = Expander::new().parse(&root, &ExpandOptions::no_prune());
        let out = tree.evaluate(&Scope::empty(), &ExpandOptions::no_prune());
        let inst = must_root(&out);
        assert_eq!(inst.children.len(), 1);
        assert!(!inst.children[0].condition);
        assert_eq!(inst.children[0].name, "hidden");
    }

    #[test]
    fn test_condition_gates_per_iteration() {
        let mut item = SourceNode::new("item");
        item.properties
            .insert("foreach".to_string(), "x in [1, 2, 3, 4]".to_string());
        item.properties
            .insert("condition".to_string(), "$x % 2 == 0".to_string());
        item.properties
            .insert("value".to_string(), "${$x}".to_string());
        let mut root = SourceNode::new("list");
        root.children.push(item);

        let out = expand(&root, &Scope::empty());
        let inst = must_root(&out);
        assert_eq!(inst.children.len(), 2);
        assert_eq!(inst.children[0].property("value"), Some(&Value::Int(2)));
        assert_eq!(inst.children[1].property("value"), Some(&Value::Int(4)));
    }

    #[test]
    fn test_definitions_visible_to_descendants() {
        let mut child = SourceNode::new("cell");
        child
            .properties
            .insert("width".to_string(), "${$unit * 3}".to_string());
        let mut root = SourceNode::new("grid");
        root.definitions
            .push(("unit".to_string(), "8".to_string()));
        root.children.push(child);

        let out = expand(&root, &Scope::empty());
        let inst = must_root(&out);
        assert_eq!(inst.children[0].property("width"), Some(&Value::Int(24)));
    }

    #[test]
    fn test_definitions_chain_and_shadow() {
        let mut inner = SourceNode::new("inner");
        inner
            .definitions
            .push(("unit".to_string(), "2".to_string()));
        inner
            .properties
            .insert("width".to_string(), "${$unit}".to_string());
        let mut root = SourceNode::new("outer");
        root.definitions.push(("unit".to_string(), "1".to_string()));
        root.definitions
            .push(("double".to_string(), "$unit * 2".to_string()));
        root.properties
            .insert("width".to_string(), "${$double}".to_string());
        root.children.push(inner);

        let out = expand(&root, &Scope::empty());
        let inst = must_root(&out);
        assert_eq!(inst.property("width"), Some(&Value::Int(2)));
        assert_eq!(inst.children[0].property("width"), Some(&Value::UInt(2)));
    }

    #[test]
    fn test_loop_variable_shadows_definition() {
        let mut item = SourceNode::new("item");
        item.properties
            .insert("foreach".to_string(), "x in [7]".to_string());
        item.properties
            .insert("value".to_string(), "${$x}".to_string());
        let mut root = SourceNode::new("list");
        root.definitions.push(("x".to_string(), "99".to_string()));
        root.children.push(item);

        let out = expand(&root, &Scope::empty());
        let inst = must_root(&out);
        assert_eq!(inst.children[0].property("value"), Some(&Value::UInt(7)));
    }

    #[test]
    fn test_conditional_collection_first_true_wins() {
        let mut compact = SourceNode::new("compact");
        compact
            .properties
            .insert("condition".to_string(), "$width < 100".to_string());
        let mut wide = SourceNode::new("wide");
        wide.properties
            .insert("condition".to_string(), "$width >= 100".to_string());
        let mut fallback = SourceNode::new("fallback");
        fallback
            .properties
            .insert("label".to_string(), "never".to_string());
        let mut root = SourceNode::new("panel");
        root.definitions
            .push(("width".to_string(), "120".to_string()));
        root.named_children
            .push(("layout".to_string(), compact));
        root.named_children.push(("layout".to_string(), wide));
        root.named_children
            .push(("layout".to_string(), fallback));

        let out = expand(&root, &Scope::empty());
        let inst = must_root(&out);
        assert_eq!(inst.named_children.len(), 1);
        let layout = inst.named_children.get(&Name::new("layout").unwrap());
        assert_eq!(layout.unwrap().name, "wide");
    }

    #[test]
    fn test_conditional_collection_no_winner() {
        let mut a = SourceNode::new("a");
        a.properties
            .insert("condition".to_string(), "false".to_string());
        let mut b = SourceNode::new("b");
        b.properties
            .insert("condition".to_string(), "false".to_string());
        let mut root = SourceNode::new("panel");
        root.named_children.push(("slot".to_string(), a));
        root.named_children.push(("slot".to_string(), b));

        let out = expand(&root, &Scope::empty());
        assert!(must_root(&out).named_children.is_empty());

        // Competing arms stay absent even without pruning.
        let tree = Expander::new().parse(&root, &ExpandOptions::no_prune());
        let out = tree.evaluate(&Scope::empty(), &ExpandOptions::no_prune());
        assert!(must_root(&out).named_children.is_empty());
    }

    #[test]
    fn test_single_named_child_kept_without_pruning() {
        let mut header = SourceNode::new("header");
        header
            .properties
            .insert("condition".to_string(), "false".to_string());
        let mut root = SourceNode::new("panel");
        root.named_children.push(("header".to_string(), header));

        let out = expand(&root, &Scope::empty());
        assert!(must_root(&out).named_children.is_empty());

        let tree = Expander::new().parse(&root, &ExpandOptions::no_prune());
        let out = tree.evaluate(&Scope::empty(), &ExpandOptions::no_prune());
        let inst = must_root(&out);
        let header = inst.named_children.get(&Name::new("header").unwrap());
        assert!(!header.unwrap().condition);
    }

    #[test]
    fn test_broken_property_reported_and_omitted() {
        let mut root = SourceNode::new("panel");
        root.span = Span::new(3, 2, 1, 5);
        root.properties
            .insert("width".to_string(), "${1 +}".to_string());
        root.properties
            .insert("height".to_string(), "${7}".to_string());

        let out = expand(&root, &Scope::empty());
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].to_string().contains("width"));
        assert_eq!(out.errors[0].span().unwrap().line, 2);
        let inst = out.root.unwrap();
        assert_eq!(inst.property("width"), None);
        assert_eq!(inst.property("height"), Some(&Value::UInt(7)));
    }

    #[test]
    fn test_broken_condition_falls_back_to_true() {
        let mut root = SourceNode::new("panel");
        root.properties
            .insert("condition".to_string(), "1 +".to_string());
        let out = expand(&root, &Scope::empty());
        assert_eq!(out.errors.len(), 1);
        assert!(out.root.is_some());
    }

    #[test]
    fn test_entries_realize_to_text() {
        let mut root = SourceNode::new("legend");
        root.entries.push("fixed".to_string());
        root.entries.push("total ${2 + 3}".to_string());
        root.entries.push("${[1, 2]}".to_string());

        let out = expand(&root, &Scope::empty());
        let inst = must_root(&out);
        assert_eq!(inst.entries, vec!["fixed", "total 5", "[1, 2]"]);
    }

    #[test]
    fn test_reserved_keys_never_become_properties() {
        let mut root = SourceNode::new("panel");
        root.properties
            .insert("Condition".to_string(), "true".to_string());
        let out = expand(&root, &Scope::empty());
        let inst = must_root(&out);
        assert!(inst.properties.is_empty());
    }

    #[test]
    fn test_reevaluation_is_independent() {
        let mut root = SourceNode::new("panel");
        root.properties
            .insert("width".to_string(), "${$w}".to_string());

        let mut symbols = SymbolTable::new();
        symbols.define(Name::new("w").unwrap(), SymbolInfo::variable(Type::int()));
        let tree = Expander::with_symbols(&symbols).parse(&root, &ExpandOptions::default());

        let mut first_scope = Scope::new();
        first_scope.bind_value(Name::new("w").unwrap(), Value::Int(1));
        let first = tree.evaluate(&first_scope, &ExpandOptions::default());

        let mut second_scope = Scope::new();
        second_scope.bind_value(Name::new("w").unwrap(), Value::Int(2));
        let second = tree.evaluate(&second_scope, &ExpandOptions::default());

        assert_eq!(
            first.root.unwrap().property("width"),
            Some(&Value::Int(1))
        );
        assert_eq!(
            second.root.unwrap().property("width"),
            Some(&Value::Int(2))
        );
    }

    #[test]
    fn test_runtime_condition_fault_counts_as_true() {
        let mut child = SourceNode::new("row");
        child
            .properties
            .insert("condition".to_string(), "$flag".to_string());
        let mut root = SourceNode::new("panel");
        root.children.push(child);

        let mut symbols = SymbolTable::new();
        symbols.define(
            Name::new("flag").unwrap(),
            SymbolInfo::variable(Type::bool()),
        );
        let tree = Expander::with_symbols(&symbols).parse(&root, &ExpandOptions::default());
        assert!(tree.errors().is_empty());

        // The binding is missing at runtime, so the guard faults.
        let out = tree.evaluate(&Scope::empty(), &ExpandOptions::default());
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.root.unwrap().children.len(), 1);
    }

    #[test]
    fn test_stdlib_available_in_templates() {
        let mut root = SourceNode::new("panel");
        root.properties
            .insert("size".to_string(), "${max(3, 11, 7)}".to_string());
        let out = expand(&root, &Scope::empty());
        assert_eq!(
            must_root(&out).property("size"),
            Some(&Value::UInt(11))
        );
    }

    #[test]
    fn test_bare_braces_toggle() {
        let mut root = SourceNode::new("panel");
        root.properties
            .insert("label".to_string(), "{1 + 1}".to_string());

        let out = expand(&root, &Scope::empty());
        assert_eq!(must_root(&out).property("label"), Some(&Value::Int(2)));

        let options = ExpandOptions {
            bare_braces: false,
            ..ExpandOptions::default()
        };
        let tree = Expander::new().parse(&root, &options);
        let out = tree.evaluate(&Scope::empty(), &options);
        assert_eq!(
            must_root(&out).property("label"),
            Some(&Value::Str("{1 + 1}".to_string()))
        );
    }

    #[test]
    fn test_nested_foreach() {
        let mut cell = SourceNode::new("cell");
        cell.properties
            .insert("foreach".to_string(), "c in [1, 2]".to_string());
        cell.properties
            .insert("id".to_string(), "${$r * 10 + $c}".to_string());
        let mut row = SourceNode::new("row");
        row.properties
            .insert("foreach".to_string(), "r in [1, 2]".to_string());
        row.children.push(cell);
        let mut root = SourceNode::new("grid");
        root.children.push(row);

        let out = expand(&root, &Scope::empty());
        let inst = must_root(&out);
        assert_eq!(inst.children.len(), 2);
        let ids: Vec<&Value> = inst
            .children
            .iter()
            .flat_map(|row| row.children.iter())
            .map(|cell| cell.property("id").unwrap())
            .collect();
        assert_eq!(
            ids,
            vec![
                &Value::Int(11),
                &Value::Int(12),
                &Value::Int(21),
                &Value::Int(22)
            ]
        );
    }
}
