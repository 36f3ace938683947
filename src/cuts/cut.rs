use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use arrow::array::{Array, ArrayRef, AsArray, BooleanArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type, UInt64Type};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};

use super::parse;
use super::value::Value;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cmp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Cmp {
    pub fn from_symbol(symbol: &str) -> Option<Cmp> {
        Some(match symbol {
            "==" => Cmp::Eq,
            "!=" => Cmp::Ne,
            "<" => Cmp::Lt,
            "<=" => Cmp::Le,
            ">" => Cmp::Gt,
            ">=" => Cmp::Ge,
            _ => return None,
        })
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Cmp::Eq => "==",
            Cmp::Ne => "!=",
            Cmp::Lt => "<",
            Cmp::Le => "<=",
            Cmp::Gt => ">",
            Cmp::Ge => ">=",
        }
    }

    fn holds(&self, ord: Ordering) -> bool {
        match self {
            Cmp::Eq => ord == Ordering::Equal,
            Cmp::Ne => ord != Ordering::Equal,
            Cmp::Lt => ord == Ordering::Less,
            Cmp::Le => ord != Ordering::Greater,
            Cmp::Gt => ord == Ordering::Greater,
            Cmp::Ge => ord != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Cmp(Cmp),
    In,
    NotIn,
    /// `var % modulus <cmp> value`, Euclidean remainder.
    Mod { modulus: u32, cmp: Cmp },
}

impl Operator {
    fn takes_list(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }
}

/// Accepts `==`, `in`, `notin`, `not in`, `%2==` and `% 2 ==`.
impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let compact: String = s.split_whitespace().collect();
        match compact.as_str() {
            "in" => return Ok(Operator::In),
            "notin" => return Ok(Operator::NotIn),
            _ => {}
        }
        if let Some(rest) = compact.strip_prefix('%') {
            let split = rest
                .find(|c: char| !c.is_ascii_alphanumeric() && c != '.' && c != '-')
                .unwrap_or(rest.len());
            let (modulus, symbol) = rest.split_at(split);
            let modulus = match modulus.parse::<u32>() {
                Ok(m) if m > 0 => m,
                _ => return Err(Error::InvalidModulus(modulus.to_string())),
            };
            let cmp = Cmp::from_symbol(symbol).ok_or_else(|| Error::UnsupportedOperator {
                operator: s.trim().to_string(),
                context: String::new(),
            })?;
            return Ok(Operator::Mod { modulus, cmp });
        }
        Cmp::from_symbol(&compact)
            .map(Operator::Cmp)
            .ok_or_else(|| Error::UnsupportedOperator {
                operator: s.trim().to_string(),
                context: String::new(),
            })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Cmp(cmp) => f.write_str(cmp.symbol()),
            Operator::In => f.write_str("in"),
            Operator::NotIn => f.write_str("notin"),
            Operator::Mod { modulus, cmp } => write!(f, "% {modulus} {}", cmp.symbol()),
        }
    }
}

// ---------------------------------------------------------------------------
// Operands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    Scalar(Value),
    List(Vec<Value>),
}

impl Operand {
    fn values(&self) -> &[Value] {
        match self {
            Operand::Scalar(v) => std::slice::from_ref(v),
            Operand::List(vs) => vs,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Scalar(v) => write!(f, "{v}"),
            Operand::List(vs) => {
                let items: Vec<String> = vs.iter().map(|v| v.to_string()).collect();
                write!(f, "({})", items.join(", "))
            }
        }
    }
}

/// Operand as supplied to programmatic construction. Text is parsed with the
/// same literal rules as full expressions.
#[derive(Debug, Clone)]
pub enum RawOperand {
    Text(String),
    Value(Value),
    List(Vec<Value>),
}

impl RawOperand {
    fn resolve(self) -> Result<Operand> {
        match self {
            RawOperand::Text(text) => parse::parse_operand(&text),
            RawOperand::Value(v) => Ok(Operand::Scalar(v)),
            RawOperand::List(vs) => Ok(Operand::List(vs)),
        }
    }
}

impl From<&str> for RawOperand {
    fn from(v: &str) -> Self {
        RawOperand::Text(v.to_string())
    }
}

impl From<String> for RawOperand {
    fn from(v: String) -> Self {
        RawOperand::Text(v)
    }
}

impl From<Value> for RawOperand {
    fn from(v: Value) -> Self {
        RawOperand::Value(v)
    }
}

impl From<i64> for RawOperand {
    fn from(v: i64) -> Self {
        RawOperand::Value(Value::Int(v))
    }
}

impl From<i32> for RawOperand {
    fn from(v: i32) -> Self {
        RawOperand::Value(Value::Int(v as i64))
    }
}

impl From<f64> for RawOperand {
    fn from(v: f64) -> Self {
        RawOperand::Value(Value::Float(v))
    }
}

impl<T: Into<Value>> From<Vec<T>> for RawOperand {
    fn from(vs: Vec<T>) -> Self {
        RawOperand::List(vs.into_iter().map(Into::into).collect())
    }
}

// ---------------------------------------------------------------------------
// NaN policy
// ---------------------------------------------------------------------------

/// How rows whose value is NaN (or null) fare against a cut.
///
/// * `Exclude` (default): such rows fail every cut, whatever the operator.
///   `pt != 20000` does not select a NaN `pt`.
/// * `Pass`: such rows pass every cut.
///
/// Cuts that name NaN explicitly (`x == nan`, `x != nan`, `x in (nan, 1)`)
/// decide NaN rows by their own meaning and ignore the policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NanPolicy {
    #[default]
    Exclude,
    Pass,
}

impl NanPolicy {
    fn passes(self) -> bool {
        self == NanPolicy::Pass
    }
}

// ---------------------------------------------------------------------------
// Cut
// ---------------------------------------------------------------------------

/// A single condition over one named column. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cut {
    variable: String,
    operator: Operator,
    operand: Operand,
}

type Test<T> = Box<dyn Fn(T) -> Option<bool>>;

impl Cut {
    /// Parse `var OP value`, `var in (a, b)`, `var % M == n`.
    pub fn parse(expression: &str) -> Result<Cut> {
        parse::parse_cut(expression)
    }

    /// Programmatic construction from a `(variable, operator, operand)` triple.
    pub fn new(
        variable: impl Into<String>,
        operator: &str,
        operand: impl Into<RawOperand>,
    ) -> Result<Cut> {
        let operator = operator.parse::<Operator>()?;
        Cut::from_parts(variable.into(), operator, operand.into().resolve()?)
    }

    pub fn from_parts(variable: String, operator: Operator, operand: Operand) -> Result<Cut> {
        let invalid = |reason: &str| Error::InvalidOperand {
            operator: operator.to_string(),
            reason: reason.to_string(),
        };
        match (&operator, &operand) {
            (Operator::In | Operator::NotIn, Operand::List(vs)) if vs.is_empty() => {
                return Err(invalid("membership needs at least one value"));
            }
            (Operator::In | Operator::NotIn, Operand::Scalar(_)) => {
                return Err(invalid("membership needs a parenthesised list"));
            }
            (_, Operand::List(_)) if !operator.takes_list() => {
                return Err(invalid("expected a single value"));
            }
            (Operator::Mod { .. }, Operand::Scalar(v)) if v.is_nan() || v.as_i64().is_none() => {
                return Err(invalid("modulo cuts compare against an integer"));
            }
            (Operator::Cmp(cmp), Operand::Scalar(v))
                if v.is_nan() && !matches!(cmp, Cmp::Eq | Cmp::Ne) =>
            {
                return Err(Error::UnsupportedOperator {
                    operator: operator.to_string(),
                    context: " with nan, only == and != make sense".to_string(),
                });
            }
            _ => {}
        }
        if variable.is_empty() {
            return Err(Error::parse("empty variable name", format!("{operator} {operand}")));
        }
        Ok(Cut {
            variable,
            operator,
            operand,
        })
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn operand(&self) -> &Operand {
        &self.operand
    }

    /// The same condition on a differently named column.
    pub fn with_variable(&self, variable: impl Into<String>) -> Cut {
        Cut {
            variable: variable.into(),
            ..self.clone()
        }
    }

    /// Boolean mask of rows passing this cut, NaN rows excluded.
    pub fn mask(&self, batch: &RecordBatch) -> Result<BooleanArray> {
        self.mask_with(batch, NanPolicy::default())
    }

    pub fn mask_with(&self, batch: &RecordBatch, policy: NanPolicy) -> Result<BooleanArray> {
        let column = batch.column_by_name(&self.variable).ok_or_else(|| {
            let available: Vec<String> = batch
                .schema()
                .fields()
                .iter()
                .map(|f| f.name().clone())
                .collect();
            Error::MissingColumn {
                column: self.variable.clone(),
                available: available.join(", "),
            }
        })?;
        self.mask_array(column, policy)
    }

    fn mask_array(&self, column: &ArrayRef, policy: NanPolicy) -> Result<BooleanArray> {
        let data_type = column.data_type();
        match data_type {
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
                let strings = cast(column, &DataType::Utf8)?;
                let test = self.string_test(data_type)?;
                Ok(build_mask(
                    strings.as_string::<i32>().iter(),
                    policy,
                    |s| test(s),
                ))
            }
            dt if dt.is_floating()
                || ((dt.is_integer() || *dt == DataType::Boolean) && !self.integral_operand()) =>
            {
                let floats = cast(column, &DataType::Float64)?;
                let test = self.float_test(data_type)?;
                Ok(build_mask(
                    floats.as_primitive::<Float64Type>().iter(),
                    policy,
                    test,
                ))
            }
            DataType::UInt64 => {
                let test = self.int_test(data_type)?;
                let ints = column.as_primitive::<UInt64Type>().iter();
                Ok(build_mask(ints.map(|v| v.map(i128::from)), policy, test))
            }
            dt if dt.is_integer() || *dt == DataType::Boolean => {
                let ints = cast(column, &DataType::Int64)?;
                let test = self.int_test(data_type)?;
                let ints = ints.as_primitive::<Int64Type>().iter();
                Ok(build_mask(ints.map(|v| v.map(i128::from)), policy, test))
            }
            other => Err(Error::NotScalarColumn {
                column: self.variable.clone(),
                data_type: other.clone(),
            }),
        }
    }

    fn integral_operand(&self) -> bool {
        self.operand
            .values()
            .iter()
            .all(|v| matches!(v, Value::Int(_) | Value::Bool(_)))
    }

    fn type_mismatch(&self, data_type: &DataType) -> Error {
        Error::TypeMismatch {
            column: self.variable.clone(),
            data_type: data_type.clone(),
            operand: self.operand.to_string(),
        }
    }

    fn float_test(&self, data_type: &DataType) -> Result<Test<f64>> {
        let numbers = self
            .operand
            .values()
            .iter()
            .map(|v| v.as_f64().ok_or_else(|| self.type_mismatch(data_type)))
            .collect::<Result<Vec<f64>>>()?;
        let first = numbers[0];
        Ok(match self.operator {
            Operator::Cmp(cmp @ (Cmp::Eq | Cmp::Ne)) if first.is_nan() => {
                let want_nan = cmp == Cmp::Eq;
                Box::new(move |x: f64| Some(x.is_nan() == want_nan))
            }
            Operator::Cmp(cmp) => Box::new(move |x: f64| {
                (!x.is_nan()).then(|| x.partial_cmp(&first).is_some_and(|o| cmp.holds(o)))
            }),
            Operator::In | Operator::NotIn => {
                let inside = self.operator == Operator::In;
                let has_nan = numbers.iter().any(|v| v.is_nan());
                Box::new(move |x: f64| {
                    if x.is_nan() {
                        has_nan.then_some(inside)
                    } else {
                        Some(numbers.contains(&x) == inside)
                    }
                })
            }
            Operator::Mod { modulus, cmp } => Box::new(move |x: f64| {
                (!x.is_nan()).then(|| {
                    x.rem_euclid(modulus as f64)
                        .partial_cmp(&first)
                        .is_some_and(|o| cmp.holds(o))
                })
            }),
        })
    }

    /// Integer columns compare in `i128` so that the full `u64` range stays exact.
    fn int_test(&self, data_type: &DataType) -> Result<Test<i128>> {
        let numbers = self
            .operand
            .values()
            .iter()
            .map(|v| {
                v.as_i64()
                    .map(i128::from)
                    .ok_or_else(|| self.type_mismatch(data_type))
            })
            .collect::<Result<Vec<i128>>>()?;
        let first = numbers[0];
        Ok(match self.operator {
            Operator::Cmp(cmp) => Box::new(move |x: i128| Some(cmp.holds(x.cmp(&first)))),
            Operator::In => Box::new(move |x: i128| Some(numbers.contains(&x))),
            Operator::NotIn => Box::new(move |x: i128| Some(!numbers.contains(&x))),
            Operator::Mod { modulus, cmp } => Box::new(move |x: i128| {
                Some(cmp.holds(x.rem_euclid(i128::from(modulus)).cmp(&first)))
            }),
        })
    }

    fn string_test(&self, data_type: &DataType) -> Result<Box<dyn Fn(&str) -> Option<bool>>> {
        let strings = self
            .operand
            .values()
            .iter()
            .map(|v| match v {
                Value::Str(s) => Ok(s.clone()),
                _ => Err(self.type_mismatch(data_type)),
            })
            .collect::<Result<Vec<String>>>()?;
        let first = strings[0].clone();
        Ok(match self.operator {
            Operator::Cmp(cmp) => Box::new(move |x: &str| Some(cmp.holds(x.cmp(first.as_str())))),
            Operator::In => Box::new(move |x: &str| Some(strings.iter().any(|s| s == x))),
            Operator::NotIn => Box::new(move |x: &str| Some(!strings.iter().any(|s| s == x))),
            Operator::Mod { .. } => return Err(self.type_mismatch(data_type)),
        })
    }
}

/// Missing (null) values and tests returning `None` fall back to the policy.
fn build_mask<T>(
    values: impl Iterator<Item = Option<T>>,
    policy: NanPolicy,
    test: impl Fn(T) -> Option<bool>,
) -> BooleanArray {
    let fallback = policy.passes();
    let mask: Vec<bool> = values
        .map(|v| v.and_then(&test).unwrap_or(fallback))
        .collect();
    BooleanArray::from(mask)
}

impl fmt::Display for Cut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.variable, self.operator, self.operand)
    }
}

impl FromStr for Cut {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Cut::parse(s)
    }
}
