/// Selection engine: parse cut expressions and apply them to record batches.
///
/// ```text
///   "pt > 20e3"   ("eta", "<", 2.5)
///         │            │
///         ▼            ▼
///     ┌──────────────────┐
///     │  Cut             │  variable, operator, operand
///     └──────────────────┘
///              │  de-duplicated, ordered
///              ▼
///     ┌──────────────────┐
///     │  Cuts            │  AND of every cut → CutsResult { idx, values }
///     └──────────────────┘
/// ```
mod cut;
mod parse;
mod value;

use std::fmt;
use std::ops::Add;

use arrow::array::{BooleanArray, UInt64Array};
use arrow::compute::{and, filter_record_batch, take_record_batch};
use arrow::record_batch::RecordBatch;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

pub use cut::{Cmp, Cut, NanPolicy, Operand, Operator, RawOperand};
pub use value::{named_constant, Value};

use crate::error::Result;

// ---------------------------------------------------------------------------
// RawCut – anything a cut can be built from
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum RawCut {
    Text(String),
    Parts(String, String, RawOperand),
    Cut(Cut),
}

impl RawCut {
    fn build(self) -> Result<Cut> {
        match self {
            RawCut::Text(text) => Cut::parse(&text),
            RawCut::Parts(variable, operator, operand) => Cut::new(variable, &operator, operand),
            RawCut::Cut(cut) => Ok(cut),
        }
    }
}

impl From<&str> for RawCut {
    fn from(v: &str) -> Self {
        RawCut::Text(v.to_string())
    }
}

impl From<String> for RawCut {
    fn from(v: String) -> Self {
        RawCut::Text(v)
    }
}

impl From<&String> for RawCut {
    fn from(v: &String) -> Self {
        RawCut::Text(v.clone())
    }
}

impl From<Cut> for RawCut {
    fn from(v: Cut) -> Self {
        RawCut::Cut(v)
    }
}

impl<O: Into<RawOperand>> From<(&str, &str, O)> for RawCut {
    fn from((variable, operator, operand): (&str, &str, O)) -> Self {
        RawCut::Parts(variable.to_string(), operator.to_string(), operand.into())
    }
}

// ---------------------------------------------------------------------------
// Cuts – ordered set of cuts, applied as a logical AND
// ---------------------------------------------------------------------------

/// Ordered, de-duplicated collection of [`Cut`]s.
///
/// Equality ignores order; [`Cuts::render`] keeps it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Cuts {
    cuts: Vec<Cut>,
}

impl Cuts {
    /// Build from strings, `(variable, operator, operand)` tuples or cuts.
    /// Structurally identical cuts collapse to the first occurrence.
    pub fn from_list<I, R>(raw: I) -> Result<Cuts>
    where
        I: IntoIterator<Item = R>,
        R: Into<RawCut>,
    {
        let mut unique = IndexSet::new();
        for item in raw {
            unique.insert(item.into().build()?);
        }
        Ok(Cuts {
            cuts: unique.into_iter().collect(),
        })
    }

    pub fn new(cuts: Vec<Cut>) -> Cuts {
        let unique: IndexSet<Cut> = cuts.into_iter().collect();
        Cuts {
            cuts: unique.into_iter().collect(),
        }
    }

    pub fn empty() -> Cuts {
        Cuts::default()
    }

    pub fn len(&self) -> usize {
        self.cuts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cuts.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Cut> {
        self.cuts.iter()
    }

    /// Variables referenced by the cuts, unique, in first-seen order.
    pub fn variables(&self) -> Vec<String> {
        let unique: IndexSet<&str> = self.cuts.iter().map(|c| c.variable()).collect();
        unique.into_iter().map(str::to_string).collect()
    }

    /// Only the cuts on `variable`.
    pub fn subset_for(&self, variable: &str) -> Cuts {
        Cuts {
            cuts: self
                .cuts
                .iter()
                .filter(|c| c.variable() == variable)
                .cloned()
                .collect(),
        }
    }

    /// Every cut except those on the given variables.
    pub fn ignore<S: AsRef<str>>(&self, variables: &[S]) -> Cuts {
        Cuts {
            cuts: self
                .cuts
                .iter()
                .filter(|c| !variables.iter().any(|v| v.as_ref() == c.variable()))
                .cloned()
                .collect(),
        }
    }

    /// Union of both cut lists. A row passes only if it passes all of them.
    pub fn combine(&self, other: &Cuts) -> Cuts {
        Cuts::new(self.cuts.iter().chain(other.cuts.iter()).cloned().collect())
    }

    /// Same cuts with variables substituted through `rename`; cuts on names
    /// without an entry are kept as they are.
    pub fn map_variables(&self, rename: impl Fn(&str) -> Option<String>) -> Cuts {
        Cuts::new(
            self.cuts
                .iter()
                .map(|c| match rename(c.variable()) {
                    Some(name) => c.with_variable(name),
                    None => c.clone(),
                })
                .collect(),
        )
    }

    /// Row mask of the AND of all cuts. Empty cuts select every row.
    pub fn mask(&self, batch: &RecordBatch, policy: NanPolicy) -> Result<BooleanArray> {
        let mut mask = BooleanArray::from(vec![true; batch.num_rows()]);
        for cut in &self.cuts {
            mask = and(&mask, &cut.mask_with(batch, policy)?)?;
        }
        Ok(mask)
    }

    pub fn apply(&self, batch: &RecordBatch) -> Result<CutsResult> {
        self.apply_with(batch, NanPolicy::default())
    }

    /// Indices of passing rows (ascending) and the filtered batch.
    pub fn apply_with(&self, batch: &RecordBatch, policy: NanPolicy) -> Result<CutsResult> {
        let mask = self.mask(batch, policy)?;
        let idx: UInt64Array = (0..mask.len())
            .filter(|&i| mask.value(i))
            .map(|i| i as u64)
            .collect::<Vec<u64>>()
            .into();
        let values = filter_record_batch(batch, &mask)?;
        Ok(CutsResult { idx, values })
    }

    /// Deterministic textual form, cuts joined with `"; "` in insertion order.
    pub fn render(&self) -> String {
        self.cuts
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl PartialEq for Cuts {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self.cuts.iter().all(|c| other.cuts.contains(c))
            && other.cuts.iter().all(|c| self.cuts.contains(c))
    }
}

impl Eq for Cuts {}

impl Add for Cuts {
    type Output = Cuts;

    fn add(self, rhs: Cuts) -> Cuts {
        self.combine(&rhs)
    }
}

impl<'a> Add<&'a Cuts> for &'a Cuts {
    type Output = Cuts;

    fn add(self, rhs: &'a Cuts) -> Cuts {
        self.combine(rhs)
    }
}

impl fmt::Display for Cuts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl<'a> IntoIterator for &'a Cuts {
    type Item = &'a Cut;
    type IntoIter = std::slice::Iter<'a, Cut>;

    fn into_iter(self) -> Self::IntoIter {
        self.cuts.iter()
    }
}

impl IntoIterator for Cuts {
    type Item = Cut;
    type IntoIter = std::vec::IntoIter<Cut>;

    fn into_iter(self) -> Self::IntoIter {
        self.cuts.into_iter()
    }
}

impl TryFrom<Vec<String>> for Cuts {
    type Error = crate::error::Error;

    fn try_from(v: Vec<String>) -> Result<Self> {
        Cuts::from_list(v)
    }
}

impl From<Cuts> for Vec<String> {
    fn from(cuts: Cuts) -> Self {
        cuts.iter().map(|c| c.to_string()).collect()
    }
}

// ---------------------------------------------------------------------------
// CutsResult
// ---------------------------------------------------------------------------

/// Outcome of [`Cuts::apply`]: passing row indices and the filtered rows.
#[derive(Debug, Clone)]
pub struct CutsResult {
    pub idx: UInt64Array,
    pub values: RecordBatch,
}

impl CutsResult {
    pub fn into_parts(self) -> (UInt64Array, RecordBatch) {
        (self.idx, self.values)
    }

    pub fn len(&self) -> usize {
        self.idx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idx.is_empty()
    }

    /// Select the same rows from a companion batch sharing the row index.
    pub fn take(&self, batch: &RecordBatch) -> Result<RecordBatch> {
        Ok(take_record_batch(batch, &self.idx)?)
    }
}

impl From<CutsResult> for (UInt64Array, RecordBatch) {
    fn from(r: CutsResult) -> Self {
        r.into_parts()
    }
}
