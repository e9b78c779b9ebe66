//! Expression trees.
//!
//! An [`Expr`] stores its nodes in a flat arena: operand slots are
//! indices into the owning vector rather than boxed pointers. Copying a
//! subtree into another tree appends a re-indexed region (see
//! [`Expr::graft`]), so published trees never alias each other and
//! placeholder resolution can rewrite single nodes in place.

use std::collections::BTreeSet;
use std::fmt;

use fxhash::FxHashMap;

use crate::error::{Error, EvalResult, ParseResult};
use crate::name::Name;
use crate::ops;
use crate::scope::{Binding, Scope};
use crate::types::Type;
use crate::value::Value;

/// Index of a node inside its owning [`Expr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

// =====================================================================
// Operators
// =====================================================================

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

impl UnaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Pos => "+",
            UnaryOp::Not => "!",
        }
    }
}

/// Infix operators. `And`/`Or` short-circuit; `EagerAnd`/`EagerOr`/`Xor`
/// always evaluate both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Pow,
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    EagerAnd,
    Xor,
    EagerOr,
    And,
    Or,
    Coalesce,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Pow => "**",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::EagerAnd => "&",
            BinaryOp::Xor => "^",
            BinaryOp::EagerOr => "|",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Coalesce => "??",
        }
    }

    /// Binding strength, mirroring the parser's operator table.
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Pow => 14,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 12,
            BinaryOp::Add | BinaryOp::Sub => 11,
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => 10,
            BinaryOp::Eq | BinaryOp::Ne => 9,
            BinaryOp::EagerAnd => 8,
            BinaryOp::Xor => 7,
            BinaryOp::EagerOr => 6,
            BinaryOp::And => 5,
            BinaryOp::Or => 4,
            BinaryOp::Coalesce => 3,
        }
    }

    pub fn right_associative(&self) -> bool {
        matches!(self, BinaryOp::Pow)
    }
}

// =====================================================================
// Nodes
// =====================================================================

/// One element of an expression tree.
#[derive(Debug, Clone)]
pub enum ExprNode {
    /// A literal value.
    Const(Value),
    /// An unresolved symbol reference; replaced during resolution.
    NameRef(Name),
    /// A resolved variable reference with its static type.
    Var { name: Name, ty: Type },
    Unary {
        op: UnaryOp,
        operand: NodeId,
    },
    Binary {
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
    },
    /// `cond ? then : else`, evaluated lazily.
    Ternary {
        cond: NodeId,
        then_branch: NodeId,
        else_branch: NodeId,
    },
    /// `target[index]`.
    Index {
        target: NodeId,
        index: NodeId,
    },
    /// `target[lo:hi]`; an open bound is a `Const(Empty)` slot.
    Slice {
        target: NodeId,
        lo: NodeId,
        hi: NodeId,
    },
    /// `target.field`.
    Field {
        target: NodeId,
        field: Name,
    },
    /// `name(args...)`; the signature is attached during resolution.
    Call {
        name: Name,
        args: Vec<NodeId>,
        sig: Option<crate::scope::FuncSignature>,
    },
    /// `[a, b, c]`.
    Array(Vec<NodeId>),
    /// `{a, b, c}`.
    Tuple(Vec<NodeId>),
    /// `body for $var in source` with an optional `if filter`.
    ForEach {
        var: Name,
        body: NodeId,
        source: NodeId,
        filter: Option<NodeId>,
    },
}

fn shifted(node: &ExprNode, off: u32) -> ExprNode {
    let s = |id: NodeId| NodeId(id.0 + off);
    match node {
        ExprNode::Const(v) => ExprNode::Const(v.clone()),
        ExprNode::NameRef(n) => ExprNode::NameRef(n.clone()),
        ExprNode::Var { name, ty } => ExprNode::Var {
            name: name.clone(),
            ty: ty.clone(),
        },
        ExprNode::Unary { op, operand } => ExprNode::Unary {
            op: *op,
            operand: s(*operand),
        },
        ExprNode::Binary { op, lhs, rhs } => ExprNode::Binary {
            op: *op,
            lhs: s(*lhs),
            rhs: s(*rhs),
        },
        ExprNode::Ternary {
            cond,
            then_branch,
            else_branch,
        } => ExprNode::Ternary {
            cond: s(*cond),
            then_branch: s(*then_branch),
            else_branch: s(*else_branch),
        },
        ExprNode::Index { target, index } => ExprNode::Index {
            target: s(*target),
            index: s(*index),
        },
        ExprNode::Slice { target, lo, hi } => ExprNode::Slice {
            target: s(*target),
            lo: s(*lo),
            hi: s(*hi),
        },
        ExprNode::Field { target, field } => ExprNode::Field {
            target: s(*target),
            field: field.clone(),
        },
        ExprNode::Call { name, args, sig } => ExprNode::Call {
            name: name.clone(),
            args: args.iter().map(|a| s(*a)).collect(),
            sig: sig.clone(),
        },
        ExprNode::Array(items) => ExprNode::Array(items.iter().map(|a| s(*a)).collect()),
        ExprNode::Tuple(items) => ExprNode::Tuple(items.iter().map(|a| s(*a)).collect()),
        ExprNode::ForEach {
            var,
            body,
            source,
            filter,
        } => ExprNode::ForEach {
            var: var.clone(),
            body: s(*body),
            source: s(*source),
            filter: filter.map(s),
        },
    }
}

// =====================================================================
// Expr
// =====================================================================

/// An expression tree in arena form.
#[derive(Debug, Clone)]
pub struct Expr {
    nodes: Vec<ExprNode>,
    root: NodeId,
}

impl Expr {
    /// A tree holding a single literal.
    pub fn constant(value: Value) -> Expr {
        Expr {
            nodes: vec![ExprNode::Const(value)],
            root: NodeId(0),
        }
    }

    pub(crate) fn empty() -> Expr {
        Expr {
            nodes: Vec::new(),
            root: NodeId(0),
        }
    }

    pub(crate) fn push(&mut self, node: ExprNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub(crate) fn set_root(&mut self, id: NodeId) {
        self.root = id;
    }

    pub(crate) fn node(&self, id: NodeId) -> &ExprNode {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut ExprNode {
        &mut self.nodes[id.index()]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Deep-copy another tree into this arena and return the id of the
    /// copied root. The copy is re-indexed node by node; the two trees
    /// share no storage afterwards.
    pub fn graft(&mut self, other: &Expr) -> NodeId {
        let off = self.nodes.len() as u32;
        for node in &other.nodes {
            self.nodes.push(shifted(node, off));
        }
        NodeId(other.root.0 + off)
    }

    /// Join two trees under a binary operator without evaluating either.
    pub fn combine(op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Expr {
        let mut out = lhs.clone();
        let r = out.graft(rhs);
        let l = out.root;
        let root = out.push(ExprNode::Binary { op, lhs: l, rhs: r });
        out.root = root;
        out
    }

    // -----------------------------------------------------------------
    // Constancy
    // -----------------------------------------------------------------

    /// Whether the tree evaluates without consulting any scope. Loop
    /// variables bound by an enclosing comprehension do not count as
    /// free; calls count only when their signature carries a fold
    /// implementation.
    pub fn is_constant(&self) -> bool {
        self.const_at(self.root, &mut Vec::new())
    }

    fn const_at(&self, id: NodeId, bound: &mut Vec<Name>) -> bool {
        match self.node(id) {
            ExprNode::Const(_) => true,
            ExprNode::NameRef(_) => false,
            ExprNode::Var { name, .. } => bound.contains(name),
            ExprNode::Unary { operand, .. } => self.const_at(*operand, bound),
            ExprNode::Binary { lhs, rhs, .. } => {
                self.const_at(*lhs, bound) && self.const_at(*rhs, bound)
            }
            ExprNode::Ternary {
                cond,
                then_branch,
                else_branch,
            } => {
                self.const_at(*cond, bound)
                    && self.const_at(*then_branch, bound)
                    && self.const_at(*else_branch, bound)
            }
            ExprNode::Index { target, index } => {
                self.const_at(*target, bound) && self.const_at(*index, bound)
            }
            ExprNode::Slice { target, lo, hi } => {
                self.const_at(*target, bound)
                    && self.const_at(*lo, bound)
                    && self.const_at(*hi, bound)
            }
            ExprNode::Field { target, .. } => self.const_at(*target, bound),
            ExprNode::Call { args, sig, .. } => {
                sig.as_ref().map_or(false, |s| s.fold.is_some())
                    && args.iter().all(|a| self.const_at(*a, bound))
            }
            ExprNode::Array(items) | ExprNode::Tuple(items) => {
                items.iter().all(|a| self.const_at(*a, bound))
            }
            ExprNode::ForEach {
                var,
                body,
                source,
                filter,
            } => {
                if !self.const_at(*source, bound) {
                    return false;
                }
                bound.push(var.clone());
                let ok = self.const_at(*body, bound)
                    && filter.map_or(true, |f| self.const_at(f, bound));
                bound.pop();
                ok
            }
        }
    }

    // -----------------------------------------------------------------
    // Typing
    // -----------------------------------------------------------------

    /// The static type of the tree. Fails on unresolved placeholders and
    /// on type-incoherent operands.
    pub fn return_type(&self) -> ParseResult<Type> {
        self.type_at(self.root)
    }

    pub(crate) fn type_at(&self, id: NodeId) -> ParseResult<Type> {
        match self.node(id) {
            ExprNode::Const(v) => Type::of_value(v),
            ExprNode::NameRef(name) => Err(Error::processing(format!(
                "unresolved reference `{}`",
                name
            ))),
            ExprNode::Var { ty, .. } => Ok(ty.clone()),
            ExprNode::Unary { op, operand } => {
                let ty = self.type_at(*operand)?;
                match op {
                    UnaryOp::Neg => {
                        if !ty.is_numeric() {
                            return Err(Error::type_err(format!("cannot negate {}", ty)));
                        }
                        Ok(if ty.is_integral() {
                            Type::int()
                        } else {
                            Type::float()
                        })
                    }
                    UnaryOp::Pos => {
                        if !ty.is_numeric() {
                            return Err(Error::type_err(format!(
                                "unary `+` expects a number, found {}",
                                ty
                            )));
                        }
                        Ok(ty)
                    }
                    UnaryOp::Not => {
                        if ty != Type::bool() {
                            return Err(Error::type_err(format!(
                                "`!` expects a bool, found {}",
                                ty
                            )));
                        }
                        Ok(Type::bool())
                    }
                }
            }
            ExprNode::Binary { op, lhs, rhs } => {
                let a = self.type_at(*lhs)?;
                let b = self.type_at(*rhs)?;
                self.binary_type(*op, a, b)
            }
            ExprNode::Ternary {
                cond,
                then_branch,
                else_branch,
            } => {
                let c = self.type_at(*cond)?;
                if c != Type::bool() {
                    return Err(Error::type_err(format!(
                        "ternary condition must be bool, found {}",
                        c
                    )));
                }
                let t = self.type_at(*then_branch)?;
                let e = self.type_at(*else_branch)?;
                Type::compatible(&t, &e).ok_or_else(|| {
                    Error::type_err(format!("ternary branches mix {} and {}", t, e))
                })
            }
            ExprNode::Index { target, index } => {
                let idx = self.type_at(*index)?;
                if !idx.is_integral() {
                    return Err(Error::type_err(format!(
                        "index must be an integer, found {}",
                        idx
                    )));
                }
                let t = self.type_at(*target)?;
                if let Some(elem) = t.elem() {
                    Ok(elem.clone())
                } else if t.is_string() || t.is_enum() {
                    Ok(Type::string())
                } else {
                    Err(Error::type_err(format!("cannot index into {}", t)))
                }
            }
            ExprNode::Slice { target, lo, hi } => {
                for bound in [lo, hi] {
                    if matches!(self.node(*bound), ExprNode::Const(Value::Empty)) {
                        continue;
                    }
                    let ty = self.type_at(*bound)?;
                    if !ty.is_integral() {
                        return Err(Error::type_err(format!(
                            "slice bound must be an integer, found {}",
                            ty
                        )));
                    }
                }
                let t = self.type_at(*target)?;
                if let Some(elem) = t.elem() {
                    Ok(Type::array(elem.clone()))
                } else if t.is_string() || t.is_enum() {
                    Ok(Type::string())
                } else {
                    Err(Error::type_err(format!("cannot slice {}", t)))
                }
            }
            ExprNode::Field { target, field } => {
                let t = self.type_at(*target)?;
                match t.field(field) {
                    Some(f) => Ok(f.ty().clone()),
                    None => Err(Error::type_err(format!(
                        "type {} has no field `{}`",
                        t, field
                    ))),
                }
            }
            ExprNode::Call { name, args, sig } => {
                let sig = sig.as_ref().ok_or_else(|| {
                    Error::processing(format!("call to `{}` is unresolved", name))
                })?;
                let mut arg_types = Vec::with_capacity(args.len());
                for arg in args {
                    arg_types.push(self.type_at(*arg)?);
                }
                sig.return_type(name, &arg_types)
            }
            ExprNode::Array(items) => Ok(Type::array(self.elem_type(items)?)),
            ExprNode::Tuple(items) => {
                Ok(Type::tuple(self.elem_type(items)?, items.len()))
            }
            ExprNode::ForEach {
                body,
                source,
                filter,
                ..
            } => {
                let src = self.type_at(*source)?;
                if !src.is_sequence() {
                    return Err(Error::type_err(format!(
                        "for-each source must be an array or tuple, found {}",
                        src
                    )));
                }
                if let Some(f) = filter {
                    let ft = self.type_at(*f)?;
                    if ft != Type::bool() {
                        return Err(Error::type_err(format!(
                            "for-each filter must be bool, found {}",
                            ft
                        )));
                    }
                }
                Ok(Type::array(self.type_at(*body)?))
            }
        }
    }

    fn elem_type(&self, items: &[NodeId]) -> ParseResult<Type> {
        let mut elem: Option<Type> = None;
        for item in items {
            let ty = self.type_at(*item)?;
            elem = Some(match elem {
                None => ty,
                Some(prev) => Type::compatible(&prev, &ty).ok_or_else(|| {
                    Error::type_err(format!(
                        "sequence mixes incompatible element types {} and {}",
                        prev, ty
                    ))
                })?,
            });
        }
        Ok(elem.unwrap_or_else(Type::int))
    }

    fn binary_type(&self, op: BinaryOp, a: Type, b: Type) -> ParseResult<Type> {
        use BinaryOp::*;
        match op {
            Add => {
                if a.is_numeric() && b.is_numeric() {
                    Type::common_numeric(&[a, b])
                } else if a.is_string() && b.is_string() {
                    Ok(Type::string())
                } else if a.is_sequence() && b.is_sequence() {
                    let elem = Type::compatible(
                        a.elem().ok_or_else(|| Error::type_err("malformed sequence type"))?,
                        b.elem().ok_or_else(|| Error::type_err("malformed sequence type"))?,
                    )
                    .ok_or_else(|| {
                        Error::type_err(format!("cannot concatenate {} and {}", a, b))
                    })?;
                    Ok(Type::array(elem))
                } else {
                    Err(Error::type_err(format!("cannot add {} and {}", a, b)))
                }
            }
            Sub | Mul | Rem | Pow => Type::common_numeric(&[a, b]),
            Div => {
                if a.is_numeric() && b.is_numeric() {
                    Ok(Type::float())
                } else {
                    Err(Error::type_err(format!("cannot divide {} by {}", a, b)))
                }
            }
            Lt | Gt | Le | Ge => {
                let textual = |t: &Type| t.is_string() || t.is_enum();
                if (a.is_numeric() && b.is_numeric()) || (textual(&a) && textual(&b)) {
                    Ok(Type::bool())
                } else {
                    Err(Error::type_err(format!("cannot order {} and {}", a, b)))
                }
            }
            Eq | Ne => {
                if Type::compatible(&a, &b).is_some() || a == b {
                    Ok(Type::bool())
                } else {
                    Err(Error::type_err(format!("cannot compare {} and {}", a, b)))
                }
            }
            EagerAnd | EagerOr | Xor | And | Or => {
                if a == Type::bool() && b == Type::bool() {
                    Ok(Type::bool())
                } else {
                    Err(Error::type_err(format!(
                        "logical operands must be bool, found {} and {}",
                        a, b
                    )))
                }
            }
            Coalesce => Type::compatible(&a, &b).ok_or_else(|| {
                Error::type_err(format!("`??` operands mix {} and {}", a, b))
            }),
        }
    }

    // -----------------------------------------------------------------
    // Evaluation
    // -----------------------------------------------------------------

    /// Evaluate the tree against a runtime scope.
    pub fn evaluate(&self, scope: &Scope) -> EvalResult<Value> {
        self.eval_at(self.root, scope)
    }

    fn eval_at(&self, id: NodeId, scope: &Scope) -> EvalResult<Value> {
        match self.node(id) {
            ExprNode::Const(v) => Ok(v.clone()),
            ExprNode::NameRef(name) | ExprNode::Var { name, .. } => scope.value(name),
            ExprNode::Unary { op, operand } => {
                let v = self.eval_at(*operand, scope)?;
                match op {
                    UnaryOp::Neg => ops::neg(v),
                    UnaryOp::Pos => ops::pos(v),
                    UnaryOp::Not => ops::not(&v),
                }
            }
            ExprNode::Binary { op, lhs, rhs } => self.eval_binary(*op, *lhs, *rhs, scope),
            ExprNode::Ternary {
                cond,
                then_branch,
                else_branch,
            } => {
                if self.eval_at(*cond, scope)?.as_bool()? {
                    self.eval_at(*then_branch, scope)
                } else {
                    self.eval_at(*else_branch, scope)
                }
            }
            ExprNode::Index { target, index } => {
                let value = self.eval_at(*target, scope)?;
                let idx = self.eval_at(*index, scope)?.as_i64()?;
                index_value(&value, idx)
            }
            ExprNode::Slice { target, lo, hi } => {
                let value = self.eval_at(*target, scope)?;
                let lo = self.eval_bound(*lo, scope)?;
                let hi = self.eval_bound(*hi, scope)?;
                slice_value(&value, lo, hi)
            }
            ExprNode::Field { target, field } => {
                let ty = self.type_at(*target)?;
                let fld = ty.field(field).ok_or_else(|| {
                    Error::type_err(format!("type {} has no field `{}`", ty, field))
                })?;
                let value = self.eval_at(*target, scope)?;
                fld.extract(&value).ok_or_else(|| {
                    Error::calculation(format!(
                        "cannot read field `{}` of {}",
                        field,
                        value.kind_name()
                    ))
                })
            }
            ExprNode::Call { name, args, sig } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval_at(*arg, scope)?);
                }
                if let Some(sig) = sig {
                    let values = sig.coerce_args(name, values)?;
                    if let Some(f) = scope.function(name) {
                        return f(&values);
                    }
                    if let Some(fold) = &sig.fold {
                        return fold(&values);
                    }
                } else if let Some(f) = scope.function(name) {
                    return f(&values);
                }
                Err(Error::undefined_function(name.clone()))
            }
            ExprNode::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval_at(*item, scope)?);
                }
                Ok(Value::Array(out))
            }
            ExprNode::Tuple(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval_at(*item, scope)?);
                }
                Ok(Value::Tuple(out))
            }
            ExprNode::ForEach {
                var,
                body,
                source,
                filter,
            } => {
                let src = self.eval_at(*source, scope)?;
                let items = src.items()?.to_vec();
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let mut layer = FxHashMap::default();
                    layer.insert(var.clone(), Binding::Value(item));
                    let inner = scope.shadowed_with(layer);
                    if let Some(f) = filter {
                        if !self.eval_at(*f, &inner)?.as_bool()? {
                            continue;
                        }
                    }
                    out.push(self.eval_at(*body, &inner)?);
                }
                Ok(Value::Array(out))
            }
        }
    }

    fn eval_bound(&self, id: NodeId, scope: &Scope) -> EvalResult<Option<i64>> {
        match self.eval_at(id, scope)? {
            Value::Empty => Ok(None),
            v => Ok(Some(v.as_i64()?)),
        }
    }

    fn eval_binary(
        &self,
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
        scope: &Scope,
    ) -> EvalResult<Value> {
        use BinaryOp::*;
        match op {
            And => {
                if !self.eval_at(lhs, scope)?.as_bool()? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval_at(rhs, scope)?.as_bool()?))
            }
            Or => {
                if self.eval_at(lhs, scope)?.as_bool()? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval_at(rhs, scope)?.as_bool()?))
            }
            Coalesce => match self.eval_at(lhs, scope)? {
                Value::Empty => self.eval_at(rhs, scope),
                v => Ok(v),
            },
            _ => {
                let a = self.eval_at(lhs, scope)?;
                let b = self.eval_at(rhs, scope)?;
                match op {
                    Pow => ops::pow(a, b),
                    Mul => ops::mul(a, b),
                    Div => ops::div(a, b),
                    Rem => ops::rem(a, b),
                    Add => ops::add(a, b),
                    Sub => ops::sub(a, b),
                    Lt => Ok(Value::Bool(ops::compare(&a, &b)?.is_lt())),
                    Gt => Ok(Value::Bool(ops::compare(&a, &b)?.is_gt())),
                    Le => Ok(Value::Bool(ops::compare(&a, &b)?.is_le())),
                    Ge => Ok(Value::Bool(ops::compare(&a, &b)?.is_ge())),
                    Eq => Ok(Value::Bool(ops::values_equal(&a, &b))),
                    Ne => Ok(Value::Bool(!ops::values_equal(&a, &b))),
                    EagerAnd => Ok(Value::Bool(a.as_bool()? & b.as_bool()?)),
                    EagerOr => Ok(Value::Bool(a.as_bool()? | b.as_bool()?)),
                    Xor => Ok(Value::Bool(a.as_bool()? ^ b.as_bool()?)),
                    And | Or | Coalesce => unreachable!("handled above"),
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Simplification
    // -----------------------------------------------------------------

    /// Rebuild the tree with every closed constant subtree folded to a
    /// literal. Folding a subtree that faults (for example a constant
    /// division by zero) is a processing error. Idempotent.
    pub fn simplify(&self) -> ParseResult<Expr> {
        let mut out = Expr::empty();
        let root = self.simp_at(self.root, &mut out)?;
        out.root = root;
        Ok(out)
    }

    fn simp_at(&self, id: NodeId, out: &mut Expr) -> ParseResult<NodeId> {
        if self.const_at(id, &mut Vec::new()) {
            if let ExprNode::Const(v) = self.node(id) {
                return Ok(out.push(ExprNode::Const(v.clone())));
            }
            let value = self.eval_at(id, &Scope::empty()).map_err(|e| {
                Error::processing("constant expression failed to evaluate").with_cause(e)
            })?;
            return Ok(out.push(ExprNode::Const(value)));
        }
        let node = match self.node(id) {
            ExprNode::Const(v) => ExprNode::Const(v.clone()),
            ExprNode::NameRef(n) => ExprNode::NameRef(n.clone()),
            ExprNode::Var { name, ty } => ExprNode::Var {
                name: name.clone(),
                ty: ty.clone(),
            },
            ExprNode::Unary { op, operand } => ExprNode::Unary {
                op: *op,
                operand: self.simp_at(*operand, out)?,
            },
            ExprNode::Binary { op, lhs, rhs } => ExprNode::Binary {
                op: *op,
                lhs: self.simp_at(*lhs, out)?,
                rhs: self.simp_at(*rhs, out)?,
            },
            ExprNode::Ternary {
                cond,
                then_branch,
                else_branch,
            } => ExprNode::Ternary {
                cond: self.simp_at(*cond, out)?,
                then_branch: self.simp_at(*then_branch, out)?,
                else_branch: self.simp_at(*else_branch, out)?,
            },
            ExprNode::Index { target, index } => ExprNode::Index {
                target: self.simp_at(*target, out)?,
                index: self.simp_at(*index, out)?,
            },
            ExprNode::Slice { target, lo, hi } => ExprNode::Slice {
                target: self.simp_at(*target, out)?,
                lo: self.simp_at(*lo, out)?,
                hi: self.simp_at(*hi, out)?,
            },
            ExprNode::Field { target, field } => ExprNode::Field {
                target: self.simp_at(*target, out)?,
                field: field.clone(),
            },
            ExprNode::Call { name, args, sig } => {
                let mut new_args = Vec::with_capacity(args.len());
                for arg in args {
                    new_args.push(self.simp_at(*arg, out)?);
                }
                ExprNode::Call {
                    name: name.clone(),
                    args: new_args,
                    sig: sig.clone(),
                }
            }
            ExprNode::Array(items) => {
                let mut new_items = Vec::with_capacity(items.len());
                for item in items {
                    new_items.push(self.simp_at(*item, out)?);
                }
                ExprNode::Array(new_items)
            }
            ExprNode::Tuple(items) => {
                let mut new_items = Vec::with_capacity(items.len());
                for item in items {
                    new_items.push(self.simp_at(*item, out)?);
                }
                ExprNode::Tuple(new_items)
            }
            ExprNode::ForEach {
                var,
                body,
                source,
                filter,
            } => ExprNode::ForEach {
                var: var.clone(),
                body: self.simp_at(*body, out)?,
                source: self.simp_at(*source, out)?,
                filter: match filter {
                    Some(f) => Some(self.simp_at(*f, out)?),
                    None => None,
                },
            },
        };
        Ok(out.push(node))
    }

    // -----------------------------------------------------------------
    // Free variables
    // -----------------------------------------------------------------

    /// Names the tree reads from its scope, in sorted order. Loop
    /// variables of enclosing comprehensions are excluded.
    pub fn free_variables(&self) -> BTreeSet<Name> {
        let mut out = BTreeSet::new();
        self.frees_at(self.root, &mut Vec::new(), &mut out);
        out
    }

    fn frees_at(&self, id: NodeId, bound: &mut Vec<Name>, out: &mut BTreeSet<Name>) {
        match self.node(id) {
            ExprNode::Const(_) => {}
            ExprNode::NameRef(name) | ExprNode::Var { name, .. } => {
                if !bound.contains(name) {
                    out.insert(name.clone());
                }
            }
            ExprNode::Unary { operand, .. } => self.frees_at(*operand, bound, out),
            ExprNode::Binary { lhs, rhs, .. } => {
                self.frees_at(*lhs, bound, out);
                self.frees_at(*rhs, bound, out);
            }
            ExprNode::Ternary {
                cond,
                then_branch,
                else_branch,
            } => {
                self.frees_at(*cond, bound, out);
                self.frees_at(*then_branch, bound, out);
                self.frees_at(*else_branch, bound, out);
            }
            ExprNode::Index { target, index } => {
                self.frees_at(*target, bound, out);
                self.frees_at(*index, bound, out);
            }
            ExprNode::Slice { target, lo, hi } => {
                self.frees_at(*target, bound, out);
                self.frees_at(*lo, bound, out);
                self.frees_at(*hi, bound, out);
            }
            ExprNode::Field { target, .. } => self.frees_at(*target, bound, out),
            ExprNode::Call { args, .. } => {
                for arg in args {
                    self.frees_at(*arg, bound, out);
                }
            }
            ExprNode::Array(items) | ExprNode::Tuple(items) => {
                for item in items {
                    self.frees_at(*item, bound, out);
                }
            }
            ExprNode::ForEach {
                var,
                body,
                source,
                filter,
            } => {
                self.frees_at(*source, bound, out);
                bound.push(var.clone());
                self.frees_at(*body, bound, out);
                if let Some(f) = filter {
                    self.frees_at(*f, bound, out);
                }
                bound.pop();
            }
        }
    }

    // -----------------------------------------------------------------
    // Source form
    // -----------------------------------------------------------------

    /// Canonical source text; parenthesized just enough to re-parse to
    /// the same tree.
    pub fn to_source(&self) -> String {
        let mut out = String::new();
        self.write_source(self.root, &mut out, 0);
        out
    }

    fn source_prec(&self, id: NodeId) -> u8 {
        match self.node(id) {
            ExprNode::Const(_)
            | ExprNode::NameRef(_)
            | ExprNode::Var { .. }
            | ExprNode::Array(_)
            | ExprNode::Tuple(_) => 16,
            ExprNode::Index { .. }
            | ExprNode::Slice { .. }
            | ExprNode::Field { .. }
            | ExprNode::Call { .. } => 15,
            ExprNode::Unary { .. } => 13,
            ExprNode::Binary { op, .. } => op.precedence(),
            ExprNode::Ternary { .. } => 2,
            ExprNode::ForEach { .. } => 1,
        }
    }

    fn write_source(&self, id: NodeId, out: &mut String, min_prec: u8) {
        let prec = self.source_prec(id);
        let parens = prec < min_prec;
        if parens {
            out.push('(');
        }
        match self.node(id) {
            ExprNode::Const(v) => out.push_str(&v.to_source()),
            ExprNode::NameRef(name) | ExprNode::Var { name, .. } => {
                out.push('$');
                out.push_str(name.as_str());
            }
            ExprNode::Unary { op, operand } => {
                out.push_str(op.symbol());
                self.write_source(*operand, out, 13);
            }
            ExprNode::Binary { op, lhs, rhs } => {
                let p = op.precedence();
                let (lmin, rmin) = if op.right_associative() {
                    (p + 1, p)
                } else {
                    (p, p + 1)
                };
                self.write_source(*lhs, out, lmin);
                out.push(' ');
                out.push_str(op.symbol());
                out.push(' ');
                self.write_source(*rhs, out, rmin);
            }
            ExprNode::Ternary {
                cond,
                then_branch,
                else_branch,
            } => {
                self.write_source(*cond, out, 3);
                out.push_str(" ? ");
                self.write_source(*then_branch, out, 2);
                out.push_str(" : ");
                self.write_source(*else_branch, out, 2);
            }
            ExprNode::Index { target, index } => {
                self.write_source(*target, out, 15);
                out.push('[');
                self.write_source(*index, out, 0);
                out.push(']');
            }
            ExprNode::Slice { target, lo, hi } => {
                self.write_source(*target, out, 15);
                out.push('[');
                if !matches!(self.node(*lo), ExprNode::Const(Value::Empty)) {
                    self.write_source(*lo, out, 0);
                }
                out.push(':');
                if !matches!(self.node(*hi), ExprNode::Const(Value::Empty)) {
                    self.write_source(*hi, out, 0);
                }
                out.push(']');
            }
            ExprNode::Field { target, field } => {
                self.write_source(*target, out, 15);
                out.push('.');
                out.push_str(field.as_str());
            }
            ExprNode::Call { name, args, .. } => {
                out.push_str(name.as_str());
                out.push('(');
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.write_source(*arg, out, 0);
                }
                out.push(')');
            }
            ExprNode::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.write_source(*item, out, 0);
                }
                out.push(']');
            }
            ExprNode::Tuple(items) => {
                out.push('{');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.write_source(*item, out, 0);
                }
                out.push('}');
            }
            ExprNode::ForEach {
                var,
                body,
                source,
                filter,
            } => {
                self.write_source(*body, out, 2);
                out.push_str(" for $");
                out.push_str(var.as_str());
                out.push_str(" in ");
                self.write_source(*source, out, 2);
                if let Some(f) = filter {
                    out.push_str(" if ");
                    self.write_source(*f, out, 2);
                }
            }
        }
        if parens {
            out.push(')');
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_source())
    }
}

impl From<Value> for Expr {
    /// A single-leaf constant tree.
    fn from(value: Value) -> Expr {
        let mut expr = Expr::empty();
        let root = expr.push(ExprNode::Const(value));
        expr.set_root(root);
        expr
    }
}

// =====================================================================
// Indexing helpers
// =====================================================================

fn normalize_index(idx: i64, len: usize) -> EvalResult<usize> {
    let len_i = len as i64;
    let adjusted = if idx < 0 { idx + len_i } else { idx };
    if adjusted < 0 || adjusted >= len_i {
        return Err(Error::calculation(format!(
            "index {} is out of range for length {}",
            idx, len
        )));
    }
    Ok(adjusted as usize)
}

fn index_value(value: &Value, idx: i64) -> EvalResult<Value> {
    match value {
        Value::Array(items) | Value::Tuple(items) => {
            let i = normalize_index(idx, items.len())?;
            Ok(items[i].clone())
        }
        Value::Str(s) | Value::Enum(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = normalize_index(idx, chars.len())?;
            Ok(Value::Str(chars[i].to_string()))
        }
        other => Err(Error::calculation(format!(
            "cannot index into {}",
            other.kind_name()
        ))),
    }
}

/// Python-style slice bounds: negatives count from the end, both ends
/// clamp into range, and a backwards range is empty.
fn slice_span(lo: Option<i64>, hi: Option<i64>, len: usize) -> (usize, usize) {
    let len_i = len as i64;
    let norm = |v: i64| if v < 0 { v + len_i } else { v };
    let start = lo.map_or(0, |v| norm(v).clamp(0, len_i)) as usize;
    let end = hi.map_or(len, |v| norm(v).clamp(0, len_i) as usize);
    (start, end.max(start))
}

fn slice_value(value: &Value, lo: Option<i64>, hi: Option<i64>) -> EvalResult<Value> {
    match value {
        Value::Array(items) | Value::Tuple(items) => {
            let (a, b) = slice_span(lo, hi, items.len());
            Ok(Value::Array(items[a..b].to_vec()))
        }
        Value::Str(s) | Value::Enum(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (a, b) = slice_span(lo, hi, chars.len());
            Ok(Value::Str(chars[a..b].iter().collect()))
        }
        other => Err(Error::calculation(format!(
            "cannot slice {}",
            other.kind_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scope;

    fn int(n: i64) -> Expr {
        Expr::constant(Value::Int(n))
    }

    #[test]
    fn test_constant_tree() {
        let e = int(3);
        assert!(e.is_constant());
        assert_eq!(e.evaluate(&Scope::empty()).unwrap(), Value::Int(3));
        assert_eq!(e.return_type().unwrap(), Type::int());
    }

    #[test]
    fn test_combine_grafts_without_aliasing() {
        let a = int(1);
        let b = int(2);
        let sum = Expr::combine(BinaryOp::Add, &a, &b);
        assert_eq!(sum.node_count(), 3);
        assert_eq!(sum.evaluate(&Scope::empty()).unwrap(), Value::Int(3));
        // originals untouched
        assert_eq!(a.node_count(), 1);
        assert_eq!(b.node_count(), 1);
    }

    #[test]
    fn test_var_breaks_constancy() {
        let mut e = Expr::empty();
        let v = e.push(ExprNode::Var {
            name: Name::new("x").unwrap(),
            ty: Type::int(),
        });
        let c = e.push(ExprNode::Const(Value::Int(1)));
        let root = e.push(ExprNode::Binary {
            op: BinaryOp::Add,
            lhs: v,
            rhs: c,
        });
        e.set_root(root);
        assert!(!e.is_constant());
        assert_eq!(
            e.free_variables()
                .iter()
                .map(|n| n.as_str())
                .collect::<Vec<_>>(),
            vec!["x"]
        );
    }

    #[test]
    fn test_loop_variable_is_bound() {
        // $i * 2 for $i in [1, 2]
        let mut e = Expr::empty();
        let i = e.push(ExprNode::Var {
            name: Name::new("i").unwrap(),
            ty: Type::uint(),
        });
        let two = e.push(ExprNode::Const(Value::UInt(2)));
        let body = e.push(ExprNode::Binary {
            op: BinaryOp::Mul,
            lhs: i,
            rhs: two,
        });
        let source = e.push(ExprNode::Const(Value::Array(vec![
            Value::UInt(1),
            Value::UInt(2),
        ])));
        let root = e.push(ExprNode::ForEach {
            var: Name::new("i").unwrap(),
            body,
            source,
            filter: None,
        });
        e.set_root(root);
        assert!(e.is_constant());
        assert!(e.free_variables().is_empty());
        assert_eq!(
            e.evaluate(&Scope::empty()).unwrap(),
            Value::Array(vec![Value::Int(2), Value::Int(4)])
        );
        // the whole comprehension folds
        let folded = e.simplify().unwrap();
        assert_eq!(folded.node_count(), 1);
    }

    #[test]
    fn test_simplify_folds_constant_subtree() {
        // x + (2 * 3)
        let mut e = Expr::empty();
        let x = e.push(ExprNode::Var {
            name: Name::new("x").unwrap(),
            ty: Type::int(),
        });
        let two = e.push(ExprNode::Const(Value::Int(2)));
        let three = e.push(ExprNode::Const(Value::Int(3)));
        let prod = e.push(ExprNode::Binary {
            op: BinaryOp::Mul,
            lhs: two,
            rhs: three,
        });
        let root = e.push(ExprNode::Binary {
            op: BinaryOp::Add,
            lhs: x,
            rhs: prod,
        });
        e.set_root(root);
        let folded = e.simplify().unwrap();
        assert_eq!(folded.node_count(), 3);
        assert_eq!(folded.to_source(), "$x + 6");
        // idempotent
        let again = folded.simplify().unwrap();
        assert_eq!(again.node_count(), 3);
    }

    #[test]
    fn test_simplify_reports_constant_fault() {
        let one = int(1);
        let zero = int(0);
        let div = Expr::combine(BinaryOp::Div, &one, &zero);
        let err = div.simplify().unwrap_err();
        assert_eq!(err.kind(), &crate::error::ErrorKind::Processing);
        assert!(err.cause().is_some());
    }

    #[test]
    fn test_ternary_is_lazy() {
        // true ? 1 : 1/0 evaluates without fault
        let mut e = Expr::empty();
        let cond = e.push(ExprNode::Const(Value::Bool(true)));
        let one = e.push(ExprNode::Const(Value::Int(1)));
        let a = e.push(ExprNode::Const(Value::Int(1)));
        let z = e.push(ExprNode::Const(Value::Int(0)));
        let bad = e.push(ExprNode::Binary {
            op: BinaryOp::Div,
            lhs: a,
            rhs: z,
        });
        let root = e.push(ExprNode::Ternary {
            cond,
            then_branch: one,
            else_branch: bad,
        });
        e.set_root(root);
        assert_eq!(e.evaluate(&Scope::empty()).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_index_and_slice_semantics() {
        let arr = Value::Array(vec![
            Value::UInt(10),
            Value::UInt(20),
            Value::UInt(30),
            Value::UInt(40),
        ]);
        assert_eq!(index_value(&arr, 0).unwrap(), Value::UInt(10));
        assert_eq!(index_value(&arr, -1).unwrap(), Value::UInt(40));
        assert!(index_value(&arr, 4).is_err());
        assert!(index_value(&arr, -5).is_err());
        assert_eq!(
            slice_value(&arr, Some(1), Some(3)).unwrap(),
            Value::Array(vec![Value::UInt(20), Value::UInt(30)])
        );
        assert_eq!(
            slice_value(&arr, None, Some(2)).unwrap(),
            Value::Array(vec![Value::UInt(10), Value::UInt(20)])
        );
        // clamped, never out of range
        assert_eq!(
            slice_value(&arr, Some(2), Some(100)).unwrap(),
            Value::Array(vec![Value::UInt(30), Value::UInt(40)])
        );
        assert_eq!(
            slice_value(&arr, Some(3), Some(1)).unwrap(),
            Value::Array(vec![])
        );
    }

    #[test]
    fn test_string_index() {
        let s = Value::Str("héllo".into());
        assert_eq!(index_value(&s, 1).unwrap(), Value::Str("é".into()));
        assert_eq!(
            slice_value(&s, Some(1), Some(3)).unwrap(),
            Value::Str("él".into())
        );
    }

    #[test]
    fn test_to_source_parenthesizes() {
        // (1 + 2) * 3 keeps its parens, 1 + 2 * 3 does not gain any
        let one = int(1);
        let two = int(2);
        let three = int(3);
        let sum = Expr::combine(BinaryOp::Add, &one, &two);
        let prod = Expr::combine(BinaryOp::Mul, &sum, &three);
        assert_eq!(prod.to_source(), "(1 + 2) * 3");
        let prod2 = Expr::combine(BinaryOp::Mul, &two, &three);
        let sum2 = Expr::combine(BinaryOp::Add, &one, &prod2);
        assert_eq!(sum2.to_source(), "1 + 2 * 3");
    }

    #[test]
    fn test_to_source_right_assoc_pow() {
        let a = int(2);
        let b = int(3);
        let c = int(4);
        // (2 ** 3) ** 4 needs parens on the left
        let left = Expr::combine(BinaryOp::Pow, &Expr::combine(BinaryOp::Pow, &a, &b), &c);
        assert_eq!(left.to_source(), "(2 ** 3) ** 4");
        // 2 ** (3 ** 4) prints without parens
        let right = Expr::combine(BinaryOp::Pow, &a, &Expr::combine(BinaryOp::Pow, &b, &c));
        assert_eq!(right.to_source(), "2 ** 3 ** 4");
    }

    #[test]
    fn test_coalesce_takes_non_empty() {
        let lhs = Expr::constant(Value::Empty);
        let rhs = int(7);
        let e = Expr::combine(BinaryOp::Coalesce, &lhs, &rhs);
        assert_eq!(e.evaluate(&Scope::empty()).unwrap(), Value::Int(7));
        let lhs = int(2);
        let e = Expr::combine(BinaryOp::Coalesce, &lhs, &rhs);
        assert_eq!(e.evaluate(&Scope::empty()).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_binary_types() {
        let u = Expr::constant(Value::UInt(1));
        let f = Expr::constant(Value::Float(1.5));
        let mixed = Expr::combine(BinaryOp::Add, &u, &f);
        assert_eq!(mixed.return_type().unwrap(), Type::float());
        let ints = Expr::combine(BinaryOp::Add, &u, &u);
        assert_eq!(ints.return_type().unwrap(), Type::int());
        let div = Expr::combine(BinaryOp::Div, &u, &u);
        assert_eq!(div.return_type().unwrap(), Type::float());
        let cmp = Expr::combine(BinaryOp::Lt, &u, &f);
        assert_eq!(cmp.return_type().unwrap(), Type::bool());
        let bad = Expr::combine(BinaryOp::Add, &u, &Expr::constant(Value::Bool(true)));
        assert!(bad.return_type().is_err());
    }
}
