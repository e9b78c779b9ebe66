//! The built-in function library and named constants.
//!
//! Nothing in here is process-global: callers compose the table from
//! [`symbols`] with their own definitions and pass it to the parser, so
//! a test or an embedder can swap in a trimmed or extended library.
//! Every function carries a fold evaluator, which doubles as the
//! default runtime behavior and makes calls on constant arguments
//! collapse during simplification.

use std::cmp::Ordering;
use std::f64::consts;

use crate::error::{Error, EvalResult};
use crate::expr::Expr;
use crate::name::Name;
use crate::ops;
use crate::scope::{FuncSignature, Param, ReturnSpec, Scope, SymbolInfo, SymbolTable};
use crate::types::Type;
use crate::value::{Color, Value};

/// Compile-time view of the standard library: constants as foldable
/// templates plus every function signature.
pub fn symbols() -> SymbolTable {
    let mut table = SymbolTable::new();
    register_constants(&mut table);
    register_math(&mut table);
    register_sequence(&mut table);
    register_string(&mut table);
    register_casts(&mut table);
    table
}

/// Runtime bindings for the standard constants, for evaluating trees
/// that were never resolved against [`symbols`].
pub fn constants() -> Scope {
    let mut scope = Scope::new();
    scope.bind_value(name("pi"), Value::Float(consts::PI));
    scope.bind_value(name("e"), Value::Float(consts::E));
    scope
}

// library names are static and known-good
fn name(text: &str) -> Name {
    Name::new(text).unwrap()
}

fn constant(value: Value) -> Expr {
    Expr::from(value)
}

fn define_fn(table: &mut SymbolTable, text: &str, sig: FuncSignature) {
    // nominal type for diagnostics; real typing flows through the signature
    let ty = match &sig.ret {
        ReturnSpec::Fixed(t) => t.clone(),
        _ => Type::float(),
    };
    table.define(name(text), SymbolInfo::function(ty, sig));
}

fn register_constants(table: &mut SymbolTable) {
    table.define(
        name("pi"),
        SymbolInfo::template(Type::float(), constant(Value::Float(consts::PI))),
    );
    table.define(
        name("e"),
        SymbolInfo::template(Type::float(), constant(Value::Float(consts::E))),
    );
}

// =====================================================================
// Math
// =====================================================================

fn register_math(table: &mut SymbolTable) {
    define_fn(
        table,
        "abs",
        FuncSignature::new(vec![Param::Numeric], ReturnSpec::CommonNumeric)
            .with_fold(builtin_abs),
    );
    define_fn(
        table,
        "min",
        FuncSignature::new(vec![Param::Numeric], ReturnSpec::CommonNumeric)
            .variadic()
            .with_fold(builtin_min),
    );
    define_fn(
        table,
        "max",
        FuncSignature::new(vec![Param::Numeric], ReturnSpec::CommonNumeric)
            .variadic()
            .with_fold(builtin_max),
    );
    define_fn(
        table,
        "floor",
        FuncSignature::new(vec![Param::Numeric], ReturnSpec::Fixed(Type::int()))
            .with_fold(builtin_floor),
    );
    define_fn(
        table,
        "ceil",
        FuncSignature::new(vec![Param::Numeric], ReturnSpec::Fixed(Type::int()))
            .with_fold(builtin_ceil),
    );
    define_fn(
        table,
        "round",
        FuncSignature::new(vec![Param::Numeric], ReturnSpec::Fixed(Type::int()))
            .with_fold(builtin_round),
    );
    define_fn(
        table,
        "sqrt",
        FuncSignature::new(vec![Param::Numeric], ReturnSpec::Fixed(Type::float()))
            .with_fold(builtin_sqrt),
    );
    define_fn(
        table,
        "pow",
        FuncSignature::new(vec![Param::Numeric, Param::Numeric], ReturnSpec::CommonNumeric)
            .with_fold(builtin_pow),
    );
    define_fn(
        table,
        "clamp",
        FuncSignature::new(
            vec![Param::Numeric, Param::Numeric, Param::Numeric],
            ReturnSpec::CommonNumeric,
        )
        .with_fold(builtin_clamp),
    );
}

fn builtin_abs(args: &[Value]) -> EvalResult<Value> {
    match args {
        [Value::UInt(v)] => Ok(Value::UInt(*v)),
        [Value::Int(v)] => v
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| Error::calculation("integer overflow in `abs`")),
        [Value::Float(f)] => Ok(Value::Float(f.abs())),
        [Value::UFloat(f)] => Ok(Value::UFloat(*f)),
        [other] => Err(Error::type_err(format!(
            "`abs` expects a number, found {}",
            other.kind_name()
        ))),
        _ => Err(Error::calculation("`abs` expects 1 argument")),
    }
}

fn extreme(fn_name: &str, args: &[Value], keep: Ordering) -> EvalResult<Value> {
    let mut iter = args.iter();
    let mut best = iter
        .next()
        .cloned()
        .ok_or_else(|| Error::calculation(format!("`{}` expects at least 1 argument", fn_name)))?;
    for v in iter {
        if ops::compare(v, &best)? == keep {
            best = v.clone();
        }
    }
    Ok(best)
}

fn builtin_min(args: &[Value]) -> EvalResult<Value> {
    extreme("min", args, Ordering::Less)
}

fn builtin_max(args: &[Value]) -> EvalResult<Value> {
    extreme("max", args, Ordering::Greater)
}

fn to_int(fn_name: &str, args: &[Value], f: fn(f64) -> f64) -> EvalResult<Value> {
    match args {
        [v] if v.is_integral() => v.as_i64().map(Value::Int),
        [v] => {
            let r = f(v.as_f64()?);
            if r.is_finite() && (i64::MIN as f64..=i64::MAX as f64).contains(&r) {
                Ok(Value::Int(r as i64))
            } else {
                Err(Error::calculation(format!(
                    "`{}` result is out of integer range",
                    fn_name
                )))
            }
        }
        _ => Err(Error::calculation(format!(
            "`{}` expects 1 argument",
            fn_name
        ))),
    }
}

fn builtin_floor(args: &[Value]) -> EvalResult<Value> {
    to_int("floor", args, f64::floor)
}

fn builtin_ceil(args: &[Value]) -> EvalResult<Value> {
    to_int("ceil", args, f64::ceil)
}

fn builtin_round(args: &[Value]) -> EvalResult<Value> {
    to_int("round", args, f64::round)
}

fn builtin_sqrt(args: &[Value]) -> EvalResult<Value> {
    match args {
        [v] => {
            let x = v.as_f64()?;
            if x < 0.0 {
                return Err(Error::calculation("`sqrt` of a negative number"));
            }
            Ok(Value::Float(x.sqrt()))
        }
        _ => Err(Error::calculation("`sqrt` expects 1 argument")),
    }
}

fn builtin_pow(args: &[Value]) -> EvalResult<Value> {
    match args {
        [base, exp] => ops::pow(base.clone(), exp.clone()),
        _ => Err(Error::calculation("`pow` expects 2 arguments")),
    }
}

fn builtin_clamp(args: &[Value]) -> EvalResult<Value> {
    match args {
        [v, lo, hi] => {
            if ops::compare(lo, hi)? == Ordering::Greater {
                return Err(Error::calculation("`clamp` bounds are reversed"));
            }
            if ops::compare(v, lo)? == Ordering::Less {
                return Ok(lo.clone());
            }
            if ops::compare(v, hi)? == Ordering::Greater {
                return Ok(hi.clone());
            }
            Ok(v.clone())
        }
        _ => Err(Error::calculation("`clamp` expects 3 arguments")),
    }
}

// =====================================================================
// Sequences
// =====================================================================

fn register_sequence(table: &mut SymbolTable) {
    define_fn(
        table,
        "length",
        FuncSignature::new(vec![Param::Any], ReturnSpec::Fixed(Type::uint()))
            .with_fold(builtin_length),
    );
    define_fn(
        table,
        "sum",
        FuncSignature::new(vec![Param::Sequence], ReturnSpec::NumericElement(0))
            .with_fold(builtin_sum),
    );
    define_fn(
        table,
        "first",
        FuncSignature::new(vec![Param::Sequence], ReturnSpec::Element(0))
            .with_fold(builtin_first),
    );
    define_fn(
        table,
        "last",
        FuncSignature::new(vec![Param::Sequence], ReturnSpec::Element(0))
            .with_fold(builtin_last),
    );
    define_fn(
        table,
        "reverse",
        FuncSignature::new(vec![Param::Sequence], ReturnSpec::Same(0))
            .with_fold(builtin_reverse),
    );
    define_fn(
        table,
        "contains",
        FuncSignature::new(vec![Param::Any, Param::Any], ReturnSpec::Fixed(Type::bool()))
            .with_fold(builtin_contains),
    );
    define_fn(
        table,
        "join",
        FuncSignature::new(
            vec![Param::Sequence, Param::Text],
            ReturnSpec::Fixed(Type::string()),
        )
        .with_fold(builtin_join),
    );
    define_fn(
        table,
        "range",
        FuncSignature::new(
            vec![Param::Typed(Type::int())],
            ReturnSpec::Fixed(Type::array(Type::int())),
        )
        .variadic()
        .with_fold(builtin_range),
    );
}

fn builtin_length(args: &[Value]) -> EvalResult<Value> {
    match args {
        [Value::Array(items)] | [Value::Tuple(items)] => Ok(Value::UInt(items.len() as u64)),
        [Value::Str(s)] | [Value::Enum(s)] => Ok(Value::UInt(s.chars().count() as u64)),
        [other] => Err(Error::type_err(format!(
            "`length` expects a sequence or string, found {}",
            other.kind_name()
        ))),
        _ => Err(Error::calculation("`length` expects 1 argument")),
    }
}

fn builtin_sum(args: &[Value]) -> EvalResult<Value> {
    match args {
        [seq] => {
            let mut acc: Option<Value> = None;
            for item in seq.items()? {
                acc = Some(match acc {
                    None => item.clone(),
                    Some(a) => ops::add(a, item.clone())?,
                });
            }
            Ok(acc.unwrap_or(Value::Int(0)))
        }
        _ => Err(Error::calculation("`sum` expects 1 argument")),
    }
}

fn builtin_first(args: &[Value]) -> EvalResult<Value> {
    match args {
        [seq] => seq
            .items()?
            .first()
            .cloned()
            .ok_or_else(|| Error::calculation("`first` of an empty sequence")),
        _ => Err(Error::calculation("`first` expects 1 argument")),
    }
}

fn builtin_last(args: &[Value]) -> EvalResult<Value> {
    match args {
        [seq] => seq
            .items()?
            .last()
            .cloned()
            .ok_or_else(|| Error::calculation("`last` of an empty sequence")),
        _ => Err(Error::calculation("`last` expects 1 argument")),
    }
}

fn builtin_reverse(args: &[Value]) -> EvalResult<Value> {
    match args {
        [Value::Array(items)] => Ok(Value::Array(items.iter().rev().cloned().collect())),
        [Value::Tuple(items)] => Ok(Value::Tuple(items.iter().rev().cloned().collect())),
        [other] => Err(Error::type_err(format!(
            "`reverse` expects an array or tuple, found {}",
            other.kind_name()
        ))),
        _ => Err(Error::calculation("`reverse` expects 1 argument")),
    }
}

fn builtin_contains(args: &[Value]) -> EvalResult<Value> {
    match args {
        [Value::Array(items), needle] | [Value::Tuple(items), needle] => Ok(Value::Bool(
            items.iter().any(|item| ops::values_equal(item, needle)),
        )),
        [Value::Str(hay), needle] | [Value::Enum(hay), needle] => {
            Ok(Value::Bool(hay.contains(needle.as_str()?)))
        }
        [other, _] => Err(Error::type_err(format!(
            "`contains` expects a sequence or string, found {}",
            other.kind_name()
        ))),
        _ => Err(Error::calculation("`contains` expects 2 arguments")),
    }
}

fn builtin_join(args: &[Value]) -> EvalResult<Value> {
    match args {
        [seq, sep] => {
            let sep = sep.as_str()?;
            let mut out = String::new();
            for (i, item) in seq.items()?.iter().enumerate() {
                if i > 0 {
                    out.push_str(sep);
                }
                out.push_str(&item.to_string());
            }
            Ok(Value::Str(out))
        }
        _ => Err(Error::calculation("`join` expects 2 arguments")),
    }
}

fn builtin_range(args: &[Value]) -> EvalResult<Value> {
    let (start, end, step) = match args {
        [end] => (0, end.as_i64()?, 1),
        [start, end] => (start.as_i64()?, end.as_i64()?, 1),
        [start, end, step] => (start.as_i64()?, end.as_i64()?, step.as_i64()?),
        _ => return Err(Error::calculation("`range` expects 1 to 3 arguments")),
    };
    if step == 0 {
        return Err(Error::calculation("`range` step cannot be zero"));
    }
    let mut out = Vec::new();
    let mut i = start;
    if step > 0 {
        while i < end {
            out.push(Value::Int(i));
            i += step;
        }
    } else {
        while i > end {
            out.push(Value::Int(i));
            i += step;
        }
    }
    Ok(Value::Array(out))
}

// =====================================================================
// Strings
// =====================================================================

fn register_string(table: &mut SymbolTable) {
    let text_to_string = |fold: fn(&[Value]) -> EvalResult<Value>| {
        FuncSignature::new(vec![Param::Text], ReturnSpec::Fixed(Type::string())).with_fold(fold)
    };
    define_fn(table, "upper", text_to_string(builtin_upper));
    define_fn(table, "lower", text_to_string(builtin_lower));
    define_fn(table, "trim", text_to_string(builtin_trim));
    define_fn(
        table,
        "replace",
        FuncSignature::new(
            vec![Param::Text, Param::Text, Param::Text],
            ReturnSpec::Fixed(Type::string()),
        )
        .with_fold(builtin_replace),
    );
    define_fn(
        table,
        "substring",
        FuncSignature::new(
            vec![
                Param::Text,
                Param::Typed(Type::int()),
                Param::Typed(Type::int()),
            ],
            ReturnSpec::Fixed(Type::string()),
        )
        .with_fold(builtin_substring),
    );
    define_fn(
        table,
        "split",
        FuncSignature::new(
            vec![Param::Text, Param::Text],
            ReturnSpec::Fixed(Type::array(Type::string())),
        )
        .with_fold(builtin_split),
    );
    define_fn(
        table,
        "format",
        FuncSignature::new(vec![Param::Any], ReturnSpec::Fixed(Type::string()))
            .variadic()
            .with_fold(builtin_format),
    );
}

fn builtin_upper(args: &[Value]) -> EvalResult<Value> {
    match args {
        [v] => Ok(Value::Str(v.as_str()?.to_uppercase())),
        _ => Err(Error::calculation("`upper` expects 1 argument")),
    }
}

fn builtin_lower(args: &[Value]) -> EvalResult<Value> {
    match args {
        [v] => Ok(Value::Str(v.as_str()?.to_lowercase())),
        _ => Err(Error::calculation("`lower` expects 1 argument")),
    }
}

fn builtin_trim(args: &[Value]) -> EvalResult<Value> {
    match args {
        [v] => Ok(Value::Str(v.as_str()?.trim().to_string())),
        _ => Err(Error::calculation("`trim` expects 1 argument")),
    }
}

fn builtin_replace(args: &[Value]) -> EvalResult<Value> {
    match args {
        [s, from, to] => Ok(Value::Str(
            s.as_str()?.replace(from.as_str()?, to.as_str()?),
        )),
        _ => Err(Error::calculation("`replace` expects 3 arguments")),
    }
}

fn builtin_substring(args: &[Value]) -> EvalResult<Value> {
    match args {
        [s, lo, hi] => {
            let chars: Vec<char> = s.as_str()?.chars().collect();
            let len = chars.len() as i64;
            let clamp = |i: i64| -> usize {
                let i = if i < 0 { i + len } else { i };
                i.clamp(0, len) as usize
            };
            let (a, b) = (clamp(lo.as_i64()?), clamp(hi.as_i64()?));
            if a >= b {
                return Ok(Value::Str(String::new()));
            }
            Ok(Value::Str(chars[a..b].iter().collect()))
        }
        _ => Err(Error::calculation("`substring` expects 3 arguments")),
    }
}

fn builtin_split(args: &[Value]) -> EvalResult<Value> {
    match args {
        [s, sep] => {
            let hay = s.as_str()?;
            let sep = sep.as_str()?;
            if sep.is_empty() {
                return Ok(Value::Array(
                    hay.chars().map(|c| Value::Str(c.to_string())).collect(),
                ));
            }
            Ok(Value::Array(
                hay.split(sep).map(|p| Value::Str(p.to_string())).collect(),
            ))
        }
        _ => Err(Error::calculation("`split` expects 2 arguments")),
    }
}

fn builtin_format(args: &[Value]) -> EvalResult<Value> {
    let (fmt, rest) = match args {
        [fmt, rest @ ..] => (fmt.as_str()?, rest),
        [] => return Err(Error::calculation("`format` expects at least 1 argument")),
    };
    let mut out = String::new();
    let mut values = rest.iter();
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '{' && chars.peek() == Some(&'}') {
            chars.next();
            match values.next() {
                Some(v) => out.push_str(&v.to_string()),
                None => {
                    return Err(Error::calculation(
                        "`format` has more placeholders than arguments",
                    ))
                }
            }
        } else {
            out.push(c);
        }
    }
    Ok(Value::Str(out))
}

// =====================================================================
// Casts
// =====================================================================

fn register_casts(table: &mut SymbolTable) {
    let cast = |ty: Type, fold: fn(&[Value]) -> EvalResult<Value>| {
        FuncSignature::new(vec![Param::Any], ReturnSpec::Fixed(ty)).with_fold(fold)
    };
    define_fn(table, "int", cast(Type::int(), builtin_int));
    define_fn(table, "uint", cast(Type::uint(), builtin_uint));
    define_fn(table, "float", cast(Type::float(), builtin_float));
    define_fn(table, "str", cast(Type::string(), builtin_str));
    define_fn(table, "bool", cast(Type::bool(), builtin_bool));
    define_fn(
        table,
        "color",
        FuncSignature::new(vec![Param::Any], ReturnSpec::Fixed(Type::color()))
            .variadic()
            .with_fold(builtin_color),
    );
}

fn builtin_int(args: &[Value]) -> EvalResult<Value> {
    match args {
        [Value::Int(v)] => Ok(Value::Int(*v)),
        [Value::UInt(v)] => i64::try_from(*v)
            .map(Value::Int)
            .map_err(|_| Error::calculation("integer is too large")),
        [Value::Float(f)] | [Value::UFloat(f)] => {
            if f.is_finite() && (i64::MIN as f64..=i64::MAX as f64).contains(f) {
                Ok(Value::Int(*f as i64))
            } else {
                Err(Error::calculation("float is out of integer range"))
            }
        }
        [Value::Str(s)] => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| Error::calculation(format!("cannot parse {:?} as an integer", s))),
        [Value::Bool(b)] => Ok(Value::Int(i64::from(*b))),
        [other] => Err(Error::type_err(format!(
            "cannot convert {} to an integer",
            other.kind_name()
        ))),
        _ => Err(Error::calculation("`int` expects 1 argument")),
    }
}

fn builtin_uint(args: &[Value]) -> EvalResult<Value> {
    match args {
        [Value::UInt(v)] => Ok(Value::UInt(*v)),
        [Value::Int(v)] => u64::try_from(*v)
            .map(Value::UInt)
            .map_err(|_| Error::calculation("negative value in `uint`")),
        [Value::Float(f)] | [Value::UFloat(f)] => {
            if f.is_finite() && *f >= 0.0 && *f <= u64::MAX as f64 {
                Ok(Value::UInt(*f as u64))
            } else {
                Err(Error::calculation("float is out of unsigned range"))
            }
        }
        [Value::Str(s)] => s
            .trim()
            .parse::<u64>()
            .map(Value::UInt)
            .map_err(|_| Error::calculation(format!("cannot parse {:?} as an unsigned integer", s))),
        [Value::Bool(b)] => Ok(Value::UInt(u64::from(*b))),
        [other] => Err(Error::type_err(format!(
            "cannot convert {} to an unsigned integer",
            other.kind_name()
        ))),
        _ => Err(Error::calculation("`uint` expects 1 argument")),
    }
}

fn builtin_float(args: &[Value]) -> EvalResult<Value> {
    match args {
        [v] if v.is_numeric() => Ok(Value::Float(v.as_f64()?)),
        [Value::Str(s)] => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| Error::calculation(format!("cannot parse {:?} as a float", s))),
        [Value::Bool(b)] => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
        [other] => Err(Error::type_err(format!(
            "cannot convert {} to a float",
            other.kind_name()
        ))),
        _ => Err(Error::calculation("`float` expects 1 argument")),
    }
}

fn builtin_str(args: &[Value]) -> EvalResult<Value> {
    match args {
        [v] => Ok(Value::Str(v.to_string())),
        _ => Err(Error::calculation("`str` expects 1 argument")),
    }
}

fn builtin_bool(args: &[Value]) -> EvalResult<Value> {
    match args {
        [Value::Bool(b)] => Ok(Value::Bool(*b)),
        [Value::Str(s)] | [Value::Enum(s)] => match s.to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(Error::calculation(format!(
                "cannot parse {:?} as a bool",
                s
            ))),
        },
        [v] if v.is_numeric() => Ok(Value::Bool(v.as_f64()? != 0.0)),
        [other] => Err(Error::type_err(format!(
            "cannot convert {} to a bool",
            other.kind_name()
        ))),
        _ => Err(Error::calculation("`bool` expects 1 argument")),
    }
}

fn builtin_color(args: &[Value]) -> EvalResult<Value> {
    match args {
        [Value::Str(s)] => Color::from_hex(s)
            .map(Value::Color)
            .ok_or_else(|| Error::calculation(format!("invalid color literal {:?}", s))),
        [r, g, b] => Ok(Value::Color(Color::rgb(
            r.as_f64()?,
            g.as_f64()?,
            b.as_f64()?,
        ))),
        [r, g, b, a] => Ok(Value::Color(Color::rgba(
            r.as_f64()?,
            g.as_f64()?,
            b.as_f64()?,
            a.as_f64()?,
        ))),
        _ => Err(Error::calculation(
            "`color` expects a hex string or 3 to 4 channel values",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expression;

    fn eval(src: &str) -> Value {
        let expr = parse_expression(src, &symbols()).unwrap();
        assert!(expr.is_constant(), "`{}` should fold", src);
        expr.evaluate(&Scope::empty()).unwrap()
    }

    #[test]
    fn test_math() {
        assert_eq!(eval("abs(-3)"), Value::Int(3));
        assert_eq!(eval("abs(2.5)"), Value::Float(2.5));
        assert_eq!(eval("min(3, 1, 2)"), Value::UInt(1));
        assert_eq!(eval("max(3, 1, 2)"), Value::UInt(3));
        assert_eq!(eval("floor(2.9)"), Value::Int(2));
        assert_eq!(eval("ceil(2.1)"), Value::Int(3));
        assert_eq!(eval("round(2.5)"), Value::Int(3));
        assert_eq!(eval("sqrt(9)"), Value::Float(3.0));
        assert_eq!(eval("pow(2, 10)"), Value::Int(1024));
        assert_eq!(eval("clamp(5, 1, 3)"), Value::UInt(3));
        assert_eq!(eval("clamp(2, 1, 3)"), Value::UInt(2));
    }

    #[test]
    fn test_min_types_as_common_numeric() {
        let expr = parse_expression("min(1, 2.5)", &symbols()).unwrap();
        assert_eq!(expr.return_type().unwrap(), Type::float());
        assert_eq!(expr.evaluate(&Scope::empty()).unwrap(), Value::UInt(1));
    }

    #[test]
    fn test_sequences() {
        assert_eq!(eval("length([1, 2, 3])"), Value::UInt(3));
        assert_eq!(eval("length(\"héllo\")"), Value::UInt(5));
        assert_eq!(eval("sum([1, 2, 3])"), Value::Int(6));
        assert_eq!(eval("first([7, 8])"), Value::UInt(7));
        assert_eq!(eval("last([7, 8])"), Value::UInt(8));
        assert_eq!(
            eval("reverse([1, 2])"),
            Value::Array(vec![Value::UInt(2), Value::UInt(1)])
        );
        assert_eq!(eval("contains([1, 2], 2)"), Value::Bool(true));
        assert_eq!(eval("contains(\"hello\", \"ell\")"), Value::Bool(true));
        assert_eq!(eval("join([1, 2, 3], \"-\")"), Value::Str("1-2-3".into()));
        assert_eq!(
            eval("range(3)"),
            Value::Array(vec![Value::Int(0), Value::Int(1), Value::Int(2)])
        );
        assert_eq!(
            eval("range(5, 1, -2)"),
            Value::Array(vec![Value::Int(5), Value::Int(3)])
        );
    }

    #[test]
    fn test_sum_of_uints_is_int() {
        let expr = parse_expression("sum([1, 2])", &symbols()).unwrap();
        assert_eq!(expr.return_type().unwrap(), Type::int());
    }

    #[test]
    fn test_strings() {
        assert_eq!(eval("upper(\"abc\")"), Value::Str("ABC".into()));
        assert_eq!(eval("lower(\"ABC\")"), Value::Str("abc".into()));
        assert_eq!(eval("trim(\"  x  \")"), Value::Str("x".into()));
        assert_eq!(
            eval("replace(\"a-b-c\", \"-\", \"+\")"),
            Value::Str("a+b+c".into())
        );
        assert_eq!(eval("substring(\"hello\", 1, 3)"), Value::Str("el".into()));
        assert_eq!(eval("substring(\"hello\", -2, 5)"), Value::Str("lo".into()));
        assert_eq!(
            eval("split(\"a,b\", \",\")"),
            Value::Array(vec![Value::Str("a".into()), Value::Str("b".into())])
        );
        assert_eq!(
            eval("format(\"{} of {}\", 1, 3)"),
            Value::Str("1 of 3".into())
        );
    }

    #[test]
    fn test_casts() {
        assert_eq!(eval("int(2.9)"), Value::Int(2));
        assert_eq!(eval("int(\"42\")"), Value::Int(42));
        assert_eq!(eval("uint(3)"), Value::UInt(3));
        assert_eq!(eval("float(2)"), Value::Float(2.0));
        assert_eq!(eval("str(2.5)"), Value::Str("2.5".into()));
        assert_eq!(eval("bool(\"TRUE\")"), Value::Bool(true));
        assert_eq!(eval("bool(0)"), Value::Bool(false));
        assert_eq!(
            eval("color(\"#ff0000\")"),
            Value::Color(Color::rgb(1.0, 0.0, 0.0))
        );
        assert_eq!(
            eval("color(1, 0, 0)"),
            Value::Color(Color::rgb(1.0, 0.0, 0.0))
        );
    }

    #[test]
    fn test_cast_failures() {
        let expr = parse_expression("int(\"nope\")", &symbols());
        assert!(expr.is_err());
        assert!(parse_expression("uint(-1)", &symbols()).is_err());
        assert!(parse_expression("sqrt(-1)", &symbols()).is_err());
    }

    #[test]
    fn test_constants_fold() {
        assert_eq!(eval("$pi > 3"), Value::Bool(true));
        assert_eq!(eval("floor($e)"), Value::Int(2));
    }

    #[test]
    fn test_runtime_constants_scope() {
        let scope = constants();
        assert_eq!(
            scope.value(&Name::new("pi").unwrap()).unwrap(),
            Value::Float(consts::PI)
        );
    }
}
