//! Expression parsing: lexing, tree construction and name resolution.
//!
//! `parse_expression` is the full pipeline. It tokenizes the source,
//! builds a placeholder tree, resolves every reference against a
//! [`SymbolTable`], folds the constant subtrees and type-checks the
//! result, so an expression that parses successfully is guaranteed to
//! have a coherent static type.

mod lexer;
mod shunting;
mod token;

use crate::error::{Error, ParseResult};
use crate::expr::{Expr, ExprNode, NodeId};
use crate::name::Name;
use crate::scope::SymbolTable;
use crate::types::Type;

/// Parse `source` against the given compile-time symbols.
pub fn parse_expression(source: &str, symbols: &SymbolTable) -> ParseResult<Expr> {
    let mut expr = parse_raw(source)?;
    resolve(&mut expr, symbols)?;
    let folded = expr.simplify()?;
    folded.return_type()?;
    Ok(folded)
}

/// Tokenize and build the tree, leaving references unresolved. Useful
/// when the symbols are not known yet; the tree cannot be type-checked
/// or fully evaluated until [`resolve`] has run.
pub fn parse_raw(source: &str) -> ParseResult<Expr> {
    let tokens = lexer::tokenize(source)?;
    shunting::build_tree(&tokens)
}

/// Replace every `NameRef` placeholder with a typed variable or a
/// grafted copy of a named template, and attach signatures to calls.
pub fn resolve(expr: &mut Expr, symbols: &SymbolTable) -> ParseResult<()> {
    let root = expr.root();
    let mut loops = Vec::new();
    resolve_at(expr, root, symbols, &mut loops)
}

fn resolve_at(
    expr: &mut Expr,
    id: NodeId,
    symbols: &SymbolTable,
    loops: &mut Vec<(Name, Type)>,
) -> ParseResult<()> {
    match expr.node(id) {
        ExprNode::Const(_) | ExprNode::Var { .. } => Ok(()),
        ExprNode::NameRef(name) => {
            let name = name.clone();
            // loop variables shadow the table, innermost first
            if let Some((_, ty)) = loops.iter().rev().find(|(n, _)| *n == name) {
                let ty = ty.clone();
                *expr.node_mut(id) = ExprNode::Var { name, ty };
                return Ok(());
            }
            let info = symbols.lookup(&name)?;
            if let Some(template) = &info.template {
                let grafted = expr.graft(template);
                *expr.node_mut(id) = expr.node(grafted).clone();
            } else if info.signature.is_some() {
                return Err(Error::type_err(format!(
                    "`{}` is a function, not a value",
                    name
                )));
            } else {
                let ty = info.ty.clone();
                *expr.node_mut(id) = ExprNode::Var { name, ty };
            }
            Ok(())
        }
        ExprNode::Unary { operand, .. } => {
            let operand = *operand;
            resolve_at(expr, operand, symbols, loops)
        }
        ExprNode::Binary { lhs, rhs, .. } => {
            let (lhs, rhs) = (*lhs, *rhs);
            resolve_at(expr, lhs, symbols, loops)?;
            resolve_at(expr, rhs, symbols, loops)
        }
        ExprNode::Ternary {
            cond,
            then_branch,
            else_branch,
        } => {
            let (cond, then_branch, else_branch) = (*cond, *then_branch, *else_branch);
            resolve_at(expr, cond, symbols, loops)?;
            resolve_at(expr, then_branch, symbols, loops)?;
            resolve_at(expr, else_branch, symbols, loops)
        }
        ExprNode::Index { target, index } => {
            let (target, index) = (*target, *index);
            resolve_at(expr, target, symbols, loops)?;
            resolve_at(expr, index, symbols, loops)
        }
        ExprNode::Slice { target, lo, hi } => {
            let (target, lo, hi) = (*target, *lo, *hi);
            resolve_at(expr, target, symbols, loops)?;
            resolve_at(expr, lo, symbols, loops)?;
            resolve_at(expr, hi, symbols, loops)
        }
        ExprNode::Field { target, .. } => {
            let target = *target;
            resolve_at(expr, target, symbols, loops)
        }
        ExprNode::Call { name, args, .. } => {
            let name = name.clone();
            let args = args.clone();
            for arg in args {
                resolve_at(expr, arg, symbols, loops)?;
            }
            let info = symbols
                .probe(&name)
                .ok_or_else(|| Error::undefined_function(name.clone()))?;
            let sig = info.signature.clone().ok_or_else(|| {
                Error::type_err(format!("`{}` is not a function", name))
            })?;
            if let ExprNode::Call { sig: slot, .. } = expr.node_mut(id) {
                *slot = Some(sig);
            }
            Ok(())
        }
        ExprNode::Array(items) | ExprNode::Tuple(items) => {
            let items = items.clone();
            for item in items {
                resolve_at(expr, item, symbols, loops)?;
            }
            Ok(())
        }
        ExprNode::ForEach {
            var,
            body,
            source,
            filter,
        } => {
            let var = var.clone();
            let (body, source, filter) = (*body, *source, *filter);
            // the source cannot see its own loop variable
            resolve_at(expr, source, symbols, loops)?;
            let src_ty = expr.type_at(source)?;
            let elem = src_ty.elem().cloned().ok_or_else(|| {
                Error::type_err(format!(
                    "for-each source must be an array or tuple, found {}",
                    src_ty
                ))
            })?;
            loops.push((var, elem));
            let result = resolve_at(expr, body, symbols, loops).and_then(|_| match filter {
                Some(f) => resolve_at(expr, f, symbols, loops),
                None => Ok(()),
            });
            loops.pop();
            result
        }
    }
}
