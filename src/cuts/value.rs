use std::fmt;

// ---------------------------------------------------------------------------
// Value – a single cut operand
// ---------------------------------------------------------------------------

/// A literal a cut compares a column against.
///
/// Floats compare by bit pattern (`total_cmp`) so that cuts, which hold
/// values, have structural `Eq`/`Hash` and `nan` operands are equal to
/// themselves.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

// -- Manual Eq/Ord/Hash so cuts can be deduplicated in an IndexSet --

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use Value::*;
        fn discriminant(v: &Value) -> u8 {
            match v {
                Bool(_) => 0,
                Int(_) => 1,
                Float(_) => 2,
                Str(_) => 3,
            }
        }
        match (self, other) {
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Str(a), Str(b)) => a.cmp(b),
            _ => discriminant(self).cmp(&discriminant(other)),
        }
    }
}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Str(s) => s.hash(state),
        }
    }
}

/// Renders in a form [`Value::parse_literal`] reads back to the same value.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) if v.is_nan() => write!(f, "nan"),
            Value::Float(v) if v.is_infinite() => {
                write!(f, "{}", if *v > 0.0 { "inf" } else { "-inf" })
            }
            Value::Float(v) => write!(f, "{v:?}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => {
                f.write_str("\"")?;
                for c in s.chars() {
                    if matches!(c, '"' | '\\') {
                        f.write_str("\\")?;
                    }
                    write!(f, "{c}")?;
                }
                f.write_str("\"")
            }
        }
    }
}

impl Value {
    /// Numeric view used when comparing against numeric columns.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Str(_) => None,
        }
    }

    /// Exact integer view, `None` for floats with a fractional part.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            Value::Float(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, Value::Float(v) if v.is_nan())
    }

    /// Interpret an unquoted literal token: integers, floats, `nan`/`inf`,
    /// booleans and named constants.
    pub fn parse_literal(token: &str) -> Option<Value> {
        if let Ok(i) = token.parse::<i64>() {
            return Some(Value::Int(i));
        }
        let lower = token.to_ascii_lowercase();
        match lower.as_str() {
            "nan" | "+nan" | "-nan" => return Some(Value::Float(f64::NAN)),
            "inf" | "+inf" | "infinity" => return Some(Value::Float(f64::INFINITY)),
            "-inf" | "-infinity" => return Some(Value::Float(f64::NEG_INFINITY)),
            "true" => return Some(Value::Bool(true)),
            "false" => return Some(Value::Bool(false)),
            _ => {}
        }
        if token.starts_with(|c: char| c.is_ascii_digit() || "+-.".contains(c)) {
            return token.parse::<f64>().ok().map(Value::Float);
        }
        named_constant(token).map(Value::Int)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

// ---------------------------------------------------------------------------
// Named constants
// ---------------------------------------------------------------------------

/// Particle-name constants (PDG Monte Carlo numbering) accepted as bare
/// identifiers in cut expressions, e.g. `leptonID in (electron, muon)`.
const NAMED_CONSTANTS: &[(&str, i64)] = &[
    ("dquark", 1),
    ("uquark", 2),
    ("squark", 3),
    ("cquark", 4),
    ("bquark", 5),
    ("tquark", 6),
    ("electron", 11),
    ("nu_e", 12),
    ("muon", 13),
    ("nu_mu", 14),
    ("tau", 15),
    ("nu_tau", 16),
    ("gluon", 21),
    ("photon", 22),
    ("zboson", 23),
    ("wboson", 24),
    ("higgs", 25),
    ("pi0", 111),
    ("pion", 211),
    ("kshort", 310),
    ("kaon", 321),
    ("dmeson", 411),
    ("d0meson", 421),
    ("bmeson", 521),
    ("b0meson", 511),
    ("lambda", 3122),
];

pub fn named_constant(name: &str) -> Option<i64> {
    NAMED_CONSTANTS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, v)| *v)
}
