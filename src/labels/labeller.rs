use std::sync::Arc;

use arrow::array::{ArrayRef, Int32Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use log::debug;

use super::{Label, LabelContainer};
use crate::cuts::NanPolicy;
use crate::error::{Error, Result};

/// Default name of the column added by [`Labeller::add_labels`].
pub const LABELS_COLUMN: &str = "labels";

/// Assigns each row the index of the label whose cuts it passes.
///
/// Indices follow the order of the labels. A row passing the cuts of several
/// labels takes the last of them; rows passing none get `-1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Labeller {
    labels: LabelContainer,
    require_labels: bool,
}

impl Labeller {
    pub fn new(labels: LabelContainer, require_labels: bool) -> Self {
        Labeller {
            labels,
            require_labels,
        }
    }

    /// Look each name up in `catalog`, keeping the given order.
    pub fn from_names<S: AsRef<str>>(
        catalog: &LabelContainer,
        names: &[S],
        require_labels: bool,
    ) -> Result<Self> {
        let labels = names
            .iter()
            .map(|n| catalog.get(n.as_ref()).cloned())
            .collect::<Result<Vec<Label>>>()?;
        Ok(Labeller::new(LabelContainer::from_list(labels)?, require_labels))
    }

    pub fn labels(&self) -> &LabelContainer {
        &self.labels
    }

    pub fn require_labels(&self) -> bool {
        self.require_labels
    }

    /// Class index of every row, `-1` where no label matched.
    pub fn classify(&self, batch: &RecordBatch) -> Result<Int32Array> {
        let mut classes = vec![-1; batch.num_rows()];
        for (i, label) in self.labels.iter().enumerate() {
            let mask = label.cuts.mask(batch, NanPolicy::Exclude)?;
            for (class, pass) in classes.iter_mut().zip(mask.values().iter()) {
                if pass {
                    *class = i as i32;
                }
            }
        }
        Ok(Int32Array::from(classes))
    }

    /// Class indices of the labelled rows. Fails on any unlabelled row when
    /// labels are required, otherwise those rows are left out.
    pub fn get_labels(&self, batch: &RecordBatch) -> Result<Int32Array> {
        let classes = self.classify(batch)?;
        let unlabelled = classes.values().iter().filter(|c| **c < 0).count();
        if unlabelled == 0 {
            return Ok(classes);
        }
        if self.require_labels {
            return Err(Error::Unlabelled {
                unlabelled,
                rows: batch.num_rows(),
            });
        }
        debug!("{unlabelled} of {} rows left unlabelled", batch.num_rows());
        let kept: Vec<i32> = classes.values().iter().copied().filter(|c| *c >= 0).collect();
        Ok(Int32Array::from(kept))
    }

    /// Append the class indices to `batch` as an `Int32` column `name`.
    pub fn add_labels(&self, batch: &RecordBatch, name: &str) -> Result<RecordBatch> {
        if !self.require_labels {
            return Err(Error::LabelsNotRequired);
        }
        if batch.column_by_name(name).is_some() {
            return Err(Error::DuplicateColumn(name.to_string()));
        }
        let classes: ArrayRef = Arc::new(self.get_labels(batch)?);
        let mut fields: Vec<Field> = batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.as_ref().clone())
            .collect();
        fields.push(Field::new(name, DataType::Int32, false));
        let mut columns = batch.columns().to_vec();
        columns.push(classes);
        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
    }
}
