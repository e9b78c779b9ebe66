//! Structural type descriptors.
//!
//! Types describe what an expression evaluates to. They are compared
//! structurally, shared behind [`Arc`] and carry both a data
//! representation (how the value is stored) and a display representation
//! (how the value presents itself): an enumeration is stored as a string
//! but presents as an enum, a record may be stored as a tuple.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use lazy_static::lazy_static;

use crate::error::{Error, EvalResult, ParseResult};
use crate::name::Name;
use crate::value::Value;

// =====================================================================
// Kinds and fields
// =====================================================================

/// The representation class of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Bool,
    Int,
    UInt,
    Float,
    UFloat,
    Str,
    Color,
    Enum,
    Array,
    Tuple,
    Record,
}

/// Pulls a named field out of a runtime value, `None` when the value
/// does not have the expected shape.
pub type FieldExtractor = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// A named, typed field with its runtime extractor.
#[derive(Clone)]
pub struct Field {
    ty: Type,
    extract: FieldExtractor,
}

impl Field {
    pub fn new(
        ty: Type,
        extract: impl Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    ) -> Field {
        Field {
            ty,
            extract: Arc::new(extract),
        }
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn extract(&self, value: &Value) -> Option<Value> {
        (self.extract)(value)
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field").field("ty", &self.ty).finish()
    }
}

// =====================================================================
// Type
// =====================================================================

#[derive(Debug)]
struct TypeInner {
    name: Name,
    data: Kind,
    display: Kind,
    elem: Option<Type>,
    len: Option<usize>,
    symbols: Option<Vec<String>>,
    underlying: Option<Type>,
    fields: IndexMap<Name, Field>,
}

/// A structural type descriptor. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct Type(Arc<TypeInner>);

fn length_field() -> Field {
    Field::new(Type::uint(), |v| match v {
        Value::Array(items) | Value::Tuple(items) => Some(Value::UInt(items.len() as u64)),
        Value::Str(s) | Value::Enum(s) => Some(Value::UInt(s.chars().count() as u64)),
        _ => None,
    })
}

fn channel_field(pick: impl Fn(&crate::value::Color) -> f64 + Send + Sync + 'static) -> Field {
    Field::new(Type::ufloat(), move |v| match v {
        Value::Color(c) => Some(Value::UFloat(pick(c))),
        _ => None,
    })
}

lazy_static! {
    static ref BOOL: Type = Type::scalar("bool", Kind::Bool, Vec::new());
    static ref INT: Type = Type::scalar("int", Kind::Int, Vec::new());
    static ref UINT: Type = Type::scalar("uint", Kind::UInt, Vec::new());
    static ref FLOAT: Type = Type::scalar("float", Kind::Float, Vec::new());
    static ref UFLOAT: Type = Type::scalar("ufloat", Kind::UFloat, Vec::new());
    static ref STRING: Type = Type::scalar("string", Kind::Str, vec![("length", length_field())]);
    static ref COLOR: Type = Type::scalar(
        "color",
        Kind::Color,
        vec![
            ("r", channel_field(|c| c.r)),
            ("g", channel_field(|c| c.g)),
            ("b", channel_field(|c| c.b)),
            ("a", channel_field(|c| c.a)),
        ]
    );
}

impl Type {
    fn scalar(name: &'static str, kind: Kind, fields: Vec<(&'static str, Field)>) -> Type {
        let mut map = IndexMap::new();
        for (field_name, field) in fields {
            map.insert(Name::new(field_name).unwrap(), field);
        }
        Type(Arc::new(TypeInner {
            name: Name::new(name).unwrap(),
            data: kind,
            display: kind,
            elem: None,
            len: None,
            symbols: None,
            underlying: None,
            fields: map,
        }))
    }

    pub fn bool() -> Type {
        BOOL.clone()
    }

    pub fn int() -> Type {
        INT.clone()
    }

    pub fn uint() -> Type {
        UINT.clone()
    }

    pub fn float() -> Type {
        FLOAT.clone()
    }

    pub fn ufloat() -> Type {
        UFLOAT.clone()
    }

    pub fn string() -> Type {
        STRING.clone()
    }

    pub fn color() -> Type {
        COLOR.clone()
    }

    /// A variable-length sequence of `elem`.
    pub fn array(elem: Type) -> Type {
        let mut fields = IndexMap::new();
        fields.insert(Name::new("length").unwrap(), length_field());
        Type(Arc::new(TypeInner {
            name: Name::new("array").unwrap(),
            data: Kind::Array,
            display: Kind::Array,
            elem: Some(elem),
            len: None,
            symbols: None,
            underlying: None,
            fields,
        }))
    }

    /// A fixed-length sequence of `elem`.
    pub fn tuple(elem: Type, len: usize) -> Type {
        let mut fields = IndexMap::new();
        fields.insert(Name::new("length").unwrap(), length_field());
        Type(Arc::new(TypeInner {
            name: Name::new("tuple").unwrap(),
            data: Kind::Tuple,
            display: Kind::Tuple,
            elem: Some(elem),
            len: Some(len),
            symbols: None,
            underlying: None,
            fields,
        }))
    }

    /// A named enumeration over the given symbols; stored as a string,
    /// displayed as an enum.
    pub fn enumeration(name: Name, symbols: Vec<String>) -> Type {
        let mut fields = IndexMap::new();
        fields.insert(Name::new("length").unwrap(), length_field());
        Type(Arc::new(TypeInner {
            name,
            data: Kind::Str,
            display: Kind::Enum,
            elem: None,
            len: None,
            symbols: Some(symbols),
            underlying: None,
            fields,
        }))
    }

    /// A named record stored as `underlying`, with extra named fields.
    pub fn record(name: Name, underlying: Type, fields: Vec<(Name, Field)>) -> Type {
        let mut map = IndexMap::new();
        for (field_name, field) in fields {
            map.insert(field_name, field);
        }
        Type(Arc::new(TypeInner {
            name,
            data: underlying.data(),
            display: Kind::Record,
            elem: underlying.elem().cloned(),
            len: underlying.len(),
            symbols: None,
            underlying: Some(underlying),
            fields: map,
        }))
    }

    // -----------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------

    pub fn name(&self) -> &Name {
        &self.0.name
    }

    /// How values of this type are stored.
    pub fn data(&self) -> Kind {
        self.0.data
    }

    /// How values of this type present themselves.
    pub fn display(&self) -> Kind {
        self.0.display
    }

    pub fn elem(&self) -> Option<&Type> {
        self.0.elem.as_ref()
    }

    pub fn len(&self) -> Option<usize> {
        self.0.len
    }

    pub fn symbols(&self) -> Option<&[String]> {
        self.0.symbols.as_deref()
    }

    pub fn field(&self, name: &Name) -> Option<&Field> {
        self.0.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&Name, &Field)> {
        self.0.fields.iter()
    }

    // -----------------------------------------------------------------
    // Predicates
    // -----------------------------------------------------------------

    pub fn is_numeric(&self) -> bool {
        matches!(
            self.0.data,
            Kind::Int | Kind::UInt | Kind::Float | Kind::UFloat
        )
    }

    pub fn is_integral(&self) -> bool {
        matches!(self.0.data, Kind::Int | Kind::UInt)
    }

    pub fn is_string(&self) -> bool {
        self.0.data == Kind::Str && self.0.display == Kind::Str
    }

    pub fn is_enum(&self) -> bool {
        self.0.display == Kind::Enum
    }

    pub fn is_array(&self) -> bool {
        self.0.display == Kind::Array
    }

    pub fn is_tuple(&self) -> bool {
        self.0.display == Kind::Tuple
    }

    pub fn is_sequence(&self) -> bool {
        self.0.elem.is_some()
    }

    // -----------------------------------------------------------------
    // Structural rules
    // -----------------------------------------------------------------

    /// The type of a runtime value. Sequence element types are unified
    /// with [`Type::compatible`]; an empty sequence defaults to `int`
    /// elements. The empty value has no type.
    pub fn of_value(value: &Value) -> EvalResult<Type> {
        match value {
            Value::Empty => Err(Error::calculation("the empty value has no type")),
            Value::Bool(_) => Ok(Type::bool()),
            Value::Int(_) => Ok(Type::int()),
            Value::UInt(_) => Ok(Type::uint()),
            Value::Float(_) => Ok(Type::float()),
            Value::UFloat(_) => Ok(Type::ufloat()),
            Value::Str(_) | Value::Enum(_) => Ok(Type::string()),
            Value::Color(_) => Ok(Type::color()),
            Value::Array(items) => Ok(Type::array(Self::elem_of(items)?)),
            Value::Tuple(items) => Ok(Type::tuple(Self::elem_of(items)?, items.len())),
        }
    }

    fn elem_of(items: &[Value]) -> EvalResult<Type> {
        let mut elem: Option<Type> = None;
        for item in items {
            let ty = Type::of_value(item)?;
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

    /// The common numeric type of a set: `int` when every member is
    /// integral, `float` otherwise.
    pub fn common_numeric(types: &[Type]) -> ParseResult<Type> {
        for ty in types {
            if !ty.is_numeric() {
                return Err(Error::type_err(format!("{} is not numeric", ty)));
            }
        }
        if types.iter().all(Type::is_integral) {
            Ok(Type::int())
        } else {
            Ok(Type::float())
        }
    }

    /// The narrowest type both operands widen into, or `None` when the
    /// two cannot mix.
    pub fn compatible(a: &Type, b: &Type) -> Option<Type> {
        if a == b {
            return Some(a.clone());
        }
        if a.is_integral() && b.is_integral() {
            return Some(Type::int());
        }
        if a.is_numeric() && b.is_numeric() {
            return Some(Type::float());
        }
        // enums degrade to their string data representation
        if a.0.data == Kind::Str && b.0.data == Kind::Str && a.0.elem.is_none() {
            return Some(Type::string());
        }
        match (a.elem(), b.elem()) {
            (Some(ae), Some(be)) => {
                let elem = Type::compatible(ae, be)?;
                match (a.len(), b.len()) {
                    (Some(al), Some(bl)) if al == bl => Some(Type::tuple(elem, al)),
                    _ => Some(Type::array(elem)),
                }
            }
            _ => None,
        }
    }

    /// Whether a value of type `arg` can be coerced into `self` without
    /// narrowing.
    pub fn accepts(&self, arg: &Type) -> bool {
        if self == arg {
            return true;
        }
        match self.0.display {
            Kind::Int => arg.is_integral(),
            Kind::UInt => false,
            Kind::Float => arg.is_numeric(),
            Kind::UFloat => matches!(arg.0.data, Kind::UInt | Kind::UFloat),
            Kind::Str => arg.0.data == Kind::Str && arg.0.elem.is_none(),
            // membership is a runtime check
            Kind::Enum => arg.0.data == Kind::Str && arg.0.elem.is_none(),
            Kind::Array => match arg.elem() {
                Some(elem) => self.0.elem.as_ref().map_or(false, |e| e.accepts(elem)),
                None => false,
            },
            Kind::Tuple => match (arg.elem(), arg.len()) {
                (Some(elem), Some(len)) => {
                    self.0.len == Some(len)
                        && self.0.elem.as_ref().map_or(false, |e| e.accepts(elem))
                }
                _ => false,
            },
            Kind::Record => match &self.0.underlying {
                Some(underlying) => underlying.accepts(arg),
                None => false,
            },
            _ => false,
        }
    }

    /// Coerce a runtime value into this type, widening representations
    /// and validating enum membership. Fails with a type error on shape
    /// mismatch and a calculation error on a missing value.
    pub fn coerce(&self, value: Value) -> EvalResult<Value> {
        if matches!(value, Value::Empty) {
            return Err(Error::calculation(format!(
                "missing value where {} was required",
                self
            )));
        }
        let mismatch = |v: &Value| {
            Error::type_err(format!("cannot use {} where {} is required", v.kind_name(), self))
        };
        match self.0.display {
            Kind::Bool => match value {
                Value::Bool(_) => Ok(value),
                other => Err(mismatch(&other)),
            },
            Kind::Int => match value {
                Value::Int(_) => Ok(value),
                Value::UInt(v) => Ok(Value::Int(v.try_into().map_err(|_| {
                    Error::calculation(format!("integer {} is out of range", v))
                })?)),
                other => Err(mismatch(&other)),
            },
            Kind::UInt => match value {
                Value::UInt(_) => Ok(value),
                other => Err(mismatch(&other)),
            },
            Kind::Float => {
                let v = value.as_f64().map_err(|_| mismatch(&value))?;
                Ok(Value::Float(v))
            }
            Kind::UFloat => match value {
                Value::UFloat(_) => Ok(value),
                Value::UInt(v) => Ok(Value::UFloat(v as f64)),
                other => Err(mismatch(&other)),
            },
            Kind::Str => match value {
                Value::Str(_) => Ok(value),
                Value::Enum(s) => Ok(Value::Str(s)),
                other => Err(mismatch(&other)),
            },
            Kind::Color => match value {
                Value::Color(_) => Ok(value),
                other => Err(mismatch(&other)),
            },
            Kind::Enum => match value {
                Value::Str(s) | Value::Enum(s) => {
                    let symbols = self.0.symbols.as_deref().unwrap_or(&[]);
                    match symbols.iter().find(|sym| sym.eq_ignore_ascii_case(&s)) {
                        Some(sym) => Ok(Value::Enum(sym.clone())),
                        None => Err(Error::type_err(format!(
                            "`{}` is not a member of {}",
                            s, self
                        ))),
                    }
                }
                other => Err(mismatch(&other)),
            },
            Kind::Array => match value {
                Value::Array(items) | Value::Tuple(items) => {
                    let elem = self.0.elem.as_ref().ok_or_else(|| {
                        Error::type_err("array type is missing its element type")
                    })?;
                    let coerced: EvalResult<Vec<Value>> =
                        items.into_iter().map(|item| elem.coerce(item)).collect();
                    Ok(Value::Array(coerced?))
                }
                other => Err(mismatch(&other)),
            },
            Kind::Tuple => match value {
                Value::Tuple(items) | Value::Array(items) => {
                    if self.0.len != Some(items.len()) {
                        return Err(Error::type_err(format!(
                            "expected {} elements for {}, found {}",
                            self.0.len.unwrap_or(0),
                            self,
                            items.len()
                        )));
                    }
                    let elem = self.0.elem.as_ref().ok_or_else(|| {
                        Error::type_err("tuple type is missing its element type")
                    })?;
                    let coerced: EvalResult<Vec<Value>> =
                        items.into_iter().map(|item| elem.coerce(item)).collect();
                    Ok(Value::Tuple(coerced?))
                }
                other => Err(mismatch(&other)),
            },
            Kind::Record => match &self.0.underlying {
                Some(underlying) => underlying.coerce(value),
                None => Err(Error::type_err(format!(
                    "record {} is missing its underlying type",
                    self
                ))),
            },
        }
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        let (a, b) = (&self.0, &other.0);
        a.name == b.name
            && a.data == b.data
            && a.display == b.display
            && a.elem == b.elem
            && a.len == b.len
            && a.symbols == b.symbols
            && a.fields.len() == b.fields.len()
            && a.fields
                .iter()
                .zip(b.fields.iter())
                .all(|((an, af), (bn, bf))| an == bn && af.ty == bf.ty)
    }
}

impl Eq for Type {}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.display {
            Kind::Array => match self.elem() {
                Some(elem) => write!(f, "{}[]", elem),
                None => f.write_str("array"),
            },
            Kind::Tuple => match (self.elem(), self.len()) {
                (Some(elem), Some(len)) => write!(f, "{}[{}]", elem, len),
                _ => f.write_str("tuple"),
            },
            _ => write!(f, "{}", self.0.name),
        }
    }
}
