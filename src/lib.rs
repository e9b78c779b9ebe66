//! Vellum: a typed expression language with document-template expansion.
//!
//! Vellum compiles small expressions (`$width * 2`, `[1, 2, 3][0]`,
//! `"x = ${$x}"`) against a layered symbol table, folds constants, and
//! evaluates the results against runtime scopes. On top of the language
//! sits an expansion engine that walks an external document tree,
//! compiles every embedded expression once and materializes plain value
//! snapshots on demand.
//!
//! ```text
//! SourceNode tree (raw text)
//!        │
//!        ▼
//!    Expander::parse        compile + fold; faults accumulate
//!        │
//!        ▼
//! TemplateTree (reusable)
//!        │
//!        ▼
//!    TemplateTree::evaluate  bind a scope, unroll loops, gate nodes
//!        │
//!        ▼
//! InstanceNode tree (plain values)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use vellum::{parse_expression, stdlib, Name, Scope, Value};
//!
//! let expr = parse_expression("clamp($w, 0, 100)", &stdlib::symbols())?;
//! let mut scope = Scope::new();
//! scope.bind_value(Name::new("w")?, Value::Int(140));
//! assert_eq!(expr.evaluate(&scope)?, Value::Int(100));
//! ```

pub mod error;
pub mod expand;
pub mod expr;
pub mod name;
mod ops;
pub mod parser;
pub mod scope;
pub mod stdlib;
pub mod template;
pub mod types;
pub mod value;
pub mod wrapper;

pub use error::{Error, ErrorKind, EvalResult, ParseResult, Span};
pub use expand::{
    Conditional, ExpandOptions, Expander, Expansion, InstanceNode, SourceNode, TemplateTree,
};
pub use expr::Expr;
pub use name::Name;
pub use parser::parse_expression;
pub use scope::{Binding, FuncSignature, Param, ReturnSpec, Scope, SymbolInfo, SymbolTable};
pub use template::{Formatter, TemplateExpr, TemplateOptions};
pub use types::{Field, Kind, Type};
pub use value::{Color, Value};
pub use wrapper::{BoolExpr, ColorExpr, EnumExpr, FloatExpr, IntExpr, StrExpr};
