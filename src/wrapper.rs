//! Typed expression wrappers.
//!
//! A wrapper pairs a parsed tree with the scalar type its consumer
//! expects, checked once at construction. Constant trees evaluate once
//! and cache the result, so repeated reads cost nothing; non-constant
//! trees evaluate against the scope handed to `value`. The arithmetic
//! impls combine the underlying trees without evaluating anything,
//! which keeps derived quantities symbolic until a scope is available.

use std::ops::{Add, BitAnd, BitOr, BitXor, Div, Mul, Neg, Not, Sub};

use crate::error::{Error, EvalResult, ParseResult};
use crate::expr::{BinaryOp, Expr, ExprNode, UnaryOp};
use crate::parser::parse_expression;
use crate::scope::{Scope, SymbolTable};
use crate::types::Type;
use crate::value::{Color, Value};

fn unary(op: UnaryOp, expr: &Expr) -> Expr {
    let mut out = expr.clone();
    let operand = out.root();
    let root = out.push(ExprNode::Unary { op, operand });
    out.set_root(root);
    out
}

fn constant_value(expr: &Expr) -> EvalResult<Option<Value>> {
    if expr.is_constant() {
        expr.evaluate(&Scope::empty()).map(Some)
    } else {
        Ok(None)
    }
}

// =====================================================================
// Float
// =====================================================================

/// A float-valued expression.
#[derive(Debug, Clone)]
pub struct FloatExpr {
    expr: Expr,
    cached: Option<f64>,
}

impl FloatExpr {
    /// Wrap a tree, checking that it produces a number.
    pub fn new(expr: Expr) -> ParseResult<FloatExpr> {
        let ret = expr.return_type()?;
        if !Type::float().accepts(&ret) {
            return Err(Error::type_err(format!(
                "expected a float expression, found {}",
                ret
            )));
        }
        let cached = match constant_value(&expr)? {
            Some(v) => Some(v.as_f64()?),
            None => None,
        };
        Ok(FloatExpr { expr, cached })
    }

    pub fn parse(source: &str, symbols: &SymbolTable) -> ParseResult<FloatExpr> {
        FloatExpr::new(parse_expression(source, symbols)?)
    }

    pub fn constant(value: f64) -> FloatExpr {
        FloatExpr {
            expr: Expr::from(Value::Float(value)),
            cached: Some(value),
        }
    }

    pub fn value(&self, scope: &Scope) -> EvalResult<f64> {
        match self.cached {
            Some(v) => Ok(v),
            None => self.expr.evaluate(scope)?.as_f64(),
        }
    }

    pub fn is_constant(&self) -> bool {
        self.cached.is_some() || self.expr.is_constant()
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }
}

impl Add for FloatExpr {
    type Output = FloatExpr;
    fn add(self, rhs: FloatExpr) -> FloatExpr {
        FloatExpr {
            expr: Expr::combine(BinaryOp::Add, &self.expr, &rhs.expr),
            cached: None,
        }
    }
}

impl Sub for FloatExpr {
    type Output = FloatExpr;
    fn sub(self, rhs: FloatExpr) -> FloatExpr {
        FloatExpr {
            expr: Expr::combine(BinaryOp::Sub, &self.expr, &rhs.expr),
            cached: None,
        }
    }
}

impl Mul for FloatExpr {
    type Output = FloatExpr;
    fn mul(self, rhs: FloatExpr) -> FloatExpr {
        FloatExpr {
            expr: Expr::combine(BinaryOp::Mul, &self.expr, &rhs.expr),
            cached: None,
        }
    }
}

impl Div for FloatExpr {
    type Output = FloatExpr;
    fn div(self, rhs: FloatExpr) -> FloatExpr {
        FloatExpr {
            expr: Expr::combine(BinaryOp::Div, &self.expr, &rhs.expr),
            cached: None,
        }
    }
}

impl Neg for FloatExpr {
    type Output = FloatExpr;
    fn neg(self) -> FloatExpr {
        FloatExpr {
            expr: unary(UnaryOp::Neg, &self.expr),
            cached: None,
        }
    }
}

// =====================================================================
// Int
// =====================================================================

/// An integer-valued expression.
#[derive(Debug, Clone)]
pub struct IntExpr {
    expr: Expr,
    cached: Option<i64>,
}

impl IntExpr {
    pub fn new(expr: Expr) -> ParseResult<IntExpr> {
        let ret = expr.return_type()?;
        if !Type::int().accepts(&ret) {
            return Err(Error::type_err(format!(
                "expected an integer expression, found {}",
                ret
            )));
        }
        let cached = match constant_value(&expr)? {
            Some(v) => Some(v.as_i64()?),
            None => None,
        };
        Ok(IntExpr { expr, cached })
    }

    pub fn parse(source: &str, symbols: &SymbolTable) -> ParseResult<IntExpr> {
        IntExpr::new(parse_expression(source, symbols)?)
    }

    pub fn constant(value: i64) -> IntExpr {
        IntExpr {
            expr: Expr::from(Value::Int(value)),
            cached: Some(value),
        }
    }

    pub fn value(&self, scope: &Scope) -> EvalResult<i64> {
        match self.cached {
            Some(v) => Ok(v),
            None => self.expr.evaluate(scope)?.as_i64(),
        }
    }

    pub fn is_constant(&self) -> bool {
        self.cached.is_some() || self.expr.is_constant()
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }
}

impl Add for IntExpr {
    type Output = IntExpr;
    fn add(self, rhs: IntExpr) -> IntExpr {
        IntExpr {
            expr: Expr::combine(BinaryOp::Add, &self.expr, &rhs.expr),
            cached: None,
        }
    }
}

impl Sub for IntExpr {
    type Output = IntExpr;
    fn sub(self, rhs: IntExpr) -> IntExpr {
        IntExpr {
            expr: Expr::combine(BinaryOp::Sub, &self.expr, &rhs.expr),
            cached: None,
        }
    }
}

impl Mul for IntExpr {
    type Output = IntExpr;
    fn mul(self, rhs: IntExpr) -> IntExpr {
        IntExpr {
            expr: Expr::combine(BinaryOp::Mul, &self.expr, &rhs.expr),
            cached: None,
        }
    }
}

/// Division always produces a float, so the quotient wrapper changes
/// type.
impl Div for IntExpr {
    type Output = FloatExpr;
    fn div(self, rhs: IntExpr) -> FloatExpr {
        FloatExpr {
            expr: Expr::combine(BinaryOp::Div, &self.expr, &rhs.expr),
            cached: None,
        }
    }
}

impl Neg for IntExpr {
    type Output = IntExpr;
    fn neg(self) -> IntExpr {
        IntExpr {
            expr: unary(UnaryOp::Neg, &self.expr),
            cached: None,
        }
    }
}

// =====================================================================
// String
// =====================================================================

/// A string-valued expression.
#[derive(Debug, Clone)]
pub struct StrExpr {
    expr: Expr,
    cached: Option<String>,
}

impl StrExpr {
    pub fn new(expr: Expr) -> ParseResult<StrExpr> {
        let ret = expr.return_type()?;
        if !Type::string().accepts(&ret) {
            return Err(Error::type_err(format!(
                "expected a string expression, found {}",
                ret
            )));
        }
        let cached = match constant_value(&expr)? {
            Some(v) => Some(v.as_str()?.to_string()),
            None => None,
        };
        Ok(StrExpr { expr, cached })
    }

    pub fn parse(source: &str, symbols: &SymbolTable) -> ParseResult<StrExpr> {
        StrExpr::new(parse_expression(source, symbols)?)
    }

    pub fn constant(value: impl Into<String>) -> StrExpr {
        let value = value.into();
        StrExpr {
            expr: Expr::from(Value::Str(value.clone())),
            cached: Some(value),
        }
    }

    pub fn value(&self, scope: &Scope) -> EvalResult<String> {
        match &self.cached {
            Some(v) => Ok(v.clone()),
            None => Ok(self.expr.evaluate(scope)?.as_str()?.to_string()),
        }
    }

    pub fn is_constant(&self) -> bool {
        self.cached.is_some() || self.expr.is_constant()
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }
}

/// Concatenation.
impl Add for StrExpr {
    type Output = StrExpr;
    fn add(self, rhs: StrExpr) -> StrExpr {
        StrExpr {
            expr: Expr::combine(BinaryOp::Add, &self.expr, &rhs.expr),
            cached: None,
        }
    }
}

// =====================================================================
// Bool
// =====================================================================

/// A boolean-valued expression.
#[derive(Debug, Clone)]
pub struct BoolExpr {
    expr: Expr,
    cached: Option<bool>,
}

impl BoolExpr {
    pub fn new(expr: Expr) -> ParseResult<BoolExpr> {
        let ret = expr.return_type()?;
        if !Type::bool().accepts(&ret) {
            return Err(Error::type_err(format!(
                "expected a bool expression, found {}",
                ret
            )));
        }
        let cached = match constant_value(&expr)? {
            Some(v) => Some(v.as_bool()?),
            None => None,
        };
        Ok(BoolExpr { expr, cached })
    }

    pub fn parse(source: &str, symbols: &SymbolTable) -> ParseResult<BoolExpr> {
        BoolExpr::new(parse_expression(source, symbols)?)
    }

    pub fn constant(value: bool) -> BoolExpr {
        BoolExpr {
            expr: Expr::from(Value::Bool(value)),
            cached: Some(value),
        }
    }

    pub fn value(&self, scope: &Scope) -> EvalResult<bool> {
        match self.cached {
            Some(v) => Ok(v),
            None => self.expr.evaluate(scope)?.as_bool(),
        }
    }

    pub fn is_constant(&self) -> bool {
        self.cached.is_some() || self.expr.is_constant()
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }
}

impl BitAnd for BoolExpr {
    type Output = BoolExpr;
    fn bitand(self, rhs: BoolExpr) -> BoolExpr {
        BoolExpr {
            expr: Expr::combine(BinaryOp::EagerAnd, &self.expr, &rhs.expr),
            cached: None,
        }
    }
}

impl BitOr for BoolExpr {
    type Output = BoolExpr;
    fn bitor(self, rhs: BoolExpr) -> BoolExpr {
        BoolExpr {
            expr: Expr::combine(BinaryOp::EagerOr, &self.expr, &rhs.expr),
            cached: None,
        }
    }
}

impl BitXor for BoolExpr {
    type Output = BoolExpr;
    fn bitxor(self, rhs: BoolExpr) -> BoolExpr {
        BoolExpr {
            expr: Expr::combine(BinaryOp::Xor, &self.expr, &rhs.expr),
            cached: None,
        }
    }
}

impl Not for BoolExpr {
    type Output = BoolExpr;
    fn not(self) -> BoolExpr {
        BoolExpr {
            expr: unary(UnaryOp::Not, &self.expr),
            cached: None,
        }
    }
}

// =====================================================================
// Color
// =====================================================================

/// A color-valued expression.
#[derive(Debug, Clone)]
pub struct ColorExpr {
    expr: Expr,
    cached: Option<Color>,
}

impl ColorExpr {
    pub fn new(expr: Expr) -> ParseResult<ColorExpr> {
        let ret = expr.return_type()?;
        if !Type::color().accepts(&ret) {
            return Err(Error::type_err(format!(
                "expected a color expression, found {}",
                ret
            )));
        }
        let cached = match constant_value(&expr)? {
            Some(v) => Some(v.as_color()?),
            None => None,
        };
        Ok(ColorExpr { expr, cached })
    }

    pub fn parse(source: &str, symbols: &SymbolTable) -> ParseResult<ColorExpr> {
        ColorExpr::new(parse_expression(source, symbols)?)
    }

    pub fn constant(value: Color) -> ColorExpr {
        ColorExpr {
            expr: Expr::from(Value::Color(value)),
            cached: Some(value),
        }
    }

    pub fn value(&self, scope: &Scope) -> EvalResult<Color> {
        match self.cached {
            Some(v) => Ok(v),
            None => self.expr.evaluate(scope)?.as_color(),
        }
    }

    pub fn is_constant(&self) -> bool {
        self.cached.is_some() || self.expr.is_constant()
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }
}

// =====================================================================
// Enum
// =====================================================================

/// An expression producing a symbol of a specific enumeration. Values
/// normalize to the declared spelling of the symbol.
#[derive(Debug, Clone)]
pub struct EnumExpr {
    expr: Expr,
    ty: Type,
    cached: Option<String>,
}

impl EnumExpr {
    pub fn new(expr: Expr, ty: &Type) -> ParseResult<EnumExpr> {
        if !ty.is_enum() {
            return Err(Error::type_err(format!("{} is not an enumeration", ty)));
        }
        let ret = expr.return_type()?;
        if !ty.accepts(&ret) {
            return Err(Error::type_err(format!(
                "expected {} or a string, found {}",
                ty, ret
            )));
        }
        let cached = match constant_value(&expr)? {
            Some(v) => Some(ty.coerce(v)?.as_str()?.to_string()),
            None => None,
        };
        Ok(EnumExpr {
            expr,
            ty: ty.clone(),
            cached,
        })
    }

    pub fn parse(source: &str, symbols: &SymbolTable, ty: &Type) -> ParseResult<EnumExpr> {
        EnumExpr::new(parse_expression(source, symbols)?, ty)
    }

    pub fn value(&self, scope: &Scope) -> EvalResult<String> {
        match &self.cached {
            Some(v) => Ok(v.clone()),
            None => {
                let v = self.expr.evaluate(scope)?;
                Ok(self.ty.coerce(v)?.as_str()?.to_string())
            }
        }
    }

    pub fn is_constant(&self) -> bool {
        self.cached.is_some() || self.expr.is_constant()
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }
}
