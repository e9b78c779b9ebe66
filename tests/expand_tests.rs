//! End-to-end tests for document expansion: JSON source in, expanded
//! instances out.

use vellum::{
    ExpandOptions, Expander, Expansion, InstanceNode, Name, Scope, SourceNode, SymbolInfo,
    SymbolTable, Type, Value,
};

fn source(json: &str) -> SourceNode {
    serde_json::from_str(json).unwrap()
}

fn expand(json: &str) -> Expansion {
    Expander::new().expand(&source(json), &Scope::empty(), &ExpandOptions::default())
}

fn root(expansion: &Expansion) -> &InstanceNode {
    expansion.root.as_ref().unwrap()
}

/// A table declaring `width: int` and a scope binding it.
fn width_env(value: i64) -> (SymbolTable, Scope) {
    let mut symbols = SymbolTable::new();
    symbols.define(
        Name::new("width").unwrap(),
        SymbolInfo::variable(Type::int()),
    );
    let mut scope = Scope::new();
    scope.bind_value(Name::new("width").unwrap(), Value::Int(value));
    (symbols, scope)
}

// ============================================================================
// Repetition
// ============================================================================

mod unrolling {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_foreach_unrolls_one_child_per_item() {
        let expansion = expand(
            r#"{
                "name": "doc",
                "children": [
                    {
                        "name": "row",
                        "properties": { "foreach": "x in [1, 2, 3]" },
                        "entries": ["{x}"]
                    }
                ]
            }"#,
        );
        assert!(expansion.errors.is_empty(), "{:?}", expansion.errors);
        let doc = root(&expansion);
        assert_eq!(doc.children.len(), 3);
        let texts: Vec<&str> = doc
            .children
            .iter()
            .map(|c| c.entries[0].as_str())
            .collect();
        assert_eq!(texts, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_loop_variable_drives_properties() {
        let expansion = expand(
            r#"{
                "name": "doc",
                "children": [
                    {
                        "name": "cell",
                        "properties": {
                            "foreach": "x in [1, 2, 3]",
                            "area": "${$x * $x}"
                        }
                    }
                ]
            }"#,
        );
        assert!(expansion.errors.is_empty(), "{:?}", expansion.errors);
        let areas: Vec<&Value> = root(&expansion)
            .children
            .iter()
            .map(|c| c.property("area").unwrap())
            .collect();
        assert_eq!(
            areas,
            vec![&Value::Int(1), &Value::Int(4), &Value::Int(9)]
        );
    }

    #[test]
    fn test_foreach_over_a_defined_sequence() {
        let expansion = expand(
            r#"{
                "name": "doc",
                "definitions": [["sizes", "[2, 4]"]],
                "children": [
                    {
                        "name": "col",
                        "properties": { "foreach": "s in $sizes", "w": "$s" }
                    }
                ]
            }"#,
        );
        assert!(expansion.errors.is_empty(), "{:?}", expansion.errors);
        let widths: Vec<&Value> = root(&expansion)
            .children
            .iter()
            .map(|c| c.property("w").unwrap())
            .collect();
        assert_eq!(widths, vec![&Value::UInt(2), &Value::UInt(4)]);
    }
}

// ============================================================================
// Conditions
// ============================================================================

mod gating {
    use super::*;
    use pretty_assertions::assert_eq;

    const GATED: &str = r#"{
        "name": "doc",
        "children": [
            { "name": "kept", "properties": { "condition": "true" } },
            { "name": "dropped", "properties": { "condition": "false" } }
        ]
    }"#;

    #[test]
    fn test_false_condition_prunes_by_default() {
        let expansion = expand(GATED);
        assert!(expansion.errors.is_empty(), "{:?}", expansion.errors);
        let doc = root(&expansion);
        assert_eq!(doc.children.len(), 1);
        assert_eq!(doc.children[0].name, "kept");
        assert!(doc.children[0].condition);
    }

    #[test]
    fn test_no_prune_keeps_the_node_flagged() {
        let expansion = Expander::new().expand(
            &source(GATED),
            &Scope::empty(),
            &ExpandOptions::no_prune(),
        );
        assert!(expansion.errors.is_empty(), "{:?}", expansion.errors);
        let doc = root(&expansion);
        assert_eq!(doc.children.len(), 2);
        assert!(doc.children[0].condition);
        assert!(!doc.children[1].condition);
    }

    #[test]
    fn test_condition_gates_each_iteration() {
        let expansion = expand(
            r#"{
                "name": "doc",
                "children": [
                    {
                        "name": "even",
                        "properties": {
                            "foreach": "x in range(1, 6)",
                            "condition": "$x % 2 == 0",
                            "n": "$x"
                        }
                    }
                ]
            }"#,
        );
        assert!(expansion.errors.is_empty(), "{:?}", expansion.errors);
        let kept: Vec<&Value> = root(&expansion)
            .children
            .iter()
            .map(|c| c.property("n").unwrap())
            .collect();
        assert_eq!(kept, vec![&Value::Int(2), &Value::Int(4)]);
    }
}

// ============================================================================
// Conditional collections
// ============================================================================

mod collections {
    use super::*;
    use pretty_assertions::assert_eq;

    const PANELS: &str = r#"{
        "name": "doc",
        "named_children": [
            ["panel", {
                "name": "compact",
                "properties": { "condition": "$width < 100", "kind": "compact" }
            }],
            ["panel", {
                "name": "full",
                "properties": { "condition": "$width >= 100", "kind": "full" }
            }]
        ]
    }"#;

    #[test]
    fn test_first_true_arm_wins() {
        let (symbols, scope) = width_env(120);
        let expansion =
            Expander::with_symbols(&symbols).expand(&source(PANELS), &scope, &ExpandOptions::default());
        assert!(expansion.errors.is_empty(), "{:?}", expansion.errors);
        let panel = &root(&expansion).named_children[&Name::new("panel").unwrap()];
        assert_eq!(panel.name, "full");
        assert_eq!(panel.property("kind"), Some(&Value::Str("full".to_string())));

        let (_, narrow) = width_env(60);
        let expansion =
            Expander::with_symbols(&symbols).expand(&source(PANELS), &narrow, &ExpandOptions::default());
        assert_eq!(root(&expansion).named_children[&Name::new("panel").unwrap()].name, "compact");
    }

    #[test]
    fn test_no_winning_arm_drops_the_key() {
        let expansion = expand(
            r#"{
                "name": "doc",
                "named_children": [
                    ["panel", { "name": "a", "properties": { "condition": "false" } }],
                    ["panel", { "name": "b", "properties": { "condition": "1 > 2" } }]
                ]
            }"#,
        );
        assert!(expansion.errors.is_empty(), "{:?}", expansion.errors);
        assert!(root(&expansion).named_children.is_empty());
    }

    #[test]
    fn test_unconditional_named_child_passes_through() {
        let expansion = expand(
            r#"{
                "name": "doc",
                "named_children": [["header", { "name": "h", "entries": ["top"] }]]
            }"#,
        );
        assert!(expansion.errors.is_empty(), "{:?}", expansion.errors);
        let header = &root(&expansion).named_children[&Name::new("header").unwrap()];
        assert_eq!(header.entries, vec!["top".to_string()]);
    }
}

// ============================================================================
// Definitions
// ============================================================================

mod definitions {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_definitions_chain_and_reach_descendants() {
        let expansion = expand(
            r#"{
                "name": "doc",
                "definitions": [["unit", "4"], ["double", "$unit * 2"]],
                "children": [
                    { "name": "cell", "properties": { "w": "$double" } }
                ]
            }"#,
        );
        assert!(expansion.errors.is_empty(), "{:?}", expansion.errors);
        assert_eq!(
            root(&expansion).children[0].property("w"),
            Some(&Value::Int(8))
        );
    }

    #[test]
    fn test_loop_variable_shadows_a_definition() {
        let expansion = expand(
            r#"{
                "name": "doc",
                "children": [
                    {
                        "name": "cell",
                        "definitions": [["x", "99"]],
                        "properties": { "foreach": "x in [7]", "n": "$x" }
                    }
                ]
            }"#,
        );
        assert!(expansion.errors.is_empty(), "{:?}", expansion.errors);
        assert_eq!(
            root(&expansion).children[0].property("n"),
            Some(&Value::UInt(7))
        );
    }
}

// ============================================================================
// Fault reporting
// ============================================================================

mod reporting {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_broken_property_is_reported_and_skipped() {
        let expansion = expand(
            r#"{
                "name": "doc",
                "span": { "offset": 0, "line": 12, "column": 3, "length": 5 },
                "properties": { "w": "${1 +}", "h": "${2 * 3}" }
            }"#,
        );
        assert_eq!(expansion.errors.len(), 1);
        let message = expansion.errors[0].to_string();
        assert!(message.contains("property `w`"), "got: {}", message);
        assert!(message.contains("doc"), "got: {}", message);
        let doc = root(&expansion);
        assert_eq!(doc.property("w"), None);
        assert_eq!(doc.property("h"), Some(&Value::Int(6)));
    }

    #[test]
    fn test_runtime_fault_is_collected() {
        let mut symbols = SymbolTable::new();
        symbols.define(Name::new("d").unwrap(), SymbolInfo::variable(Type::int()));
        let mut scope = Scope::new();
        scope.bind_value(Name::new("d").unwrap(), Value::Int(0));

        let expansion = Expander::with_symbols(&symbols).expand(
            &source(r#"{ "name": "doc", "properties": { "q": "${10 / $d}" } }"#),
            &scope,
            &ExpandOptions::default(),
        );
        assert_eq!(expansion.errors.len(), 1);
        let doc = root(&expansion);
        assert_eq!(doc.property("q"), None);
        assert_eq!(doc.name, "doc");
    }

    #[test]
    fn test_broken_condition_falls_back_to_true() {
        let expansion = expand(
            r#"{
                "name": "doc",
                "children": [
                    { "name": "shaky", "properties": { "condition": "1 +" } }
                ]
            }"#,
        );
        assert_eq!(expansion.errors.len(), 1);
        assert_eq!(root(&expansion).children.len(), 1);
        assert_eq!(root(&expansion).children[0].name, "shaky");
    }

    #[test]
    fn test_partial_failure_still_produces_a_document() {
        let expansion = expand(
            r#"{
                "name": "doc",
                "properties": { "bad": "${launch()}" },
                "children": [{ "name": "ok", "entries": ["fine"] }]
            }"#,
        );
        assert!(!expansion.errors.is_empty());
        let doc = root(&expansion);
        assert_eq!(doc.children.len(), 1);
        assert_eq!(doc.children[0].entries, vec!["fine".to_string()]);
    }
}

// ============================================================================
// Serialization and reuse
// ============================================================================

mod output {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_instances_serialize_to_json() {
        let expansion = expand(
            r#"{
                "name": "doc",
                "properties": { "width": "${4 * 10}" },
                "children": [{ "name": "body", "entries": ["ready"] }]
            }"#,
        );
        assert!(expansion.errors.is_empty(), "{:?}", expansion.errors);
        let doc = root(&expansion);
        let json = serde_json::to_value(doc).unwrap();
        assert_eq!(json["name"], serde_json::json!("doc"));
        assert_eq!(json["properties"]["width"], serde_json::json!(40));
        assert_eq!(json["children"][0]["entries"][0], serde_json::json!("ready"));

        let back: InstanceNode = serde_json::from_value(json).unwrap();
        assert_eq!(&back, doc);
    }

    #[test]
    fn test_parse_once_evaluate_many() {
        let (symbols, first) = width_env(1);
        let (_, second) = width_env(2);
        let expander = Expander::with_symbols(&symbols);
        let tree = expander.parse(
            &source(r#"{ "name": "doc", "properties": { "w": "${$width * 10}" } }"#),
            &ExpandOptions::default(),
        );
        assert!(tree.errors().is_empty());

        let options = ExpandOptions::default();
        let a = tree.evaluate(&first, &options);
        let b = tree.evaluate(&second, &options);
        assert_eq!(root(&a).property("w"), Some(&Value::Int(10)));
        assert_eq!(root(&b).property("w"), Some(&Value::Int(20)));
    }
}
