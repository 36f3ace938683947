use std::collections::HashMap;
use std::iter::FusedIterator;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, BooleanArray, FixedSizeListArray, UInt64Array};
use arrow::compute::{cast, concat_batches, filter_record_batch, take_record_batch};
use arrow::datatypes::{DataType, Float64Type, SchemaRef};
use arrow::record_batch::RecordBatch;
use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::model::{
    cast_batch, column_index, group_trailing, leaf_type, select_columns, storage_schema,
    NamedBatch, Precision, Selection, Shape, Variables, DEFAULT_PRIMARY,
};
use super::sample::resolve_sources;
use super::transform::{Transform, TransformConfig};
use super::vds::VirtualView;
use crate::cuts::{Cuts, NanPolicy};
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How [`Reader::estimate_available`] samples when cuts are active.
///
/// The first `sample_rows` rows of the primary group are read and cut; the
/// passing fraction is scaled to the full row count and rounded down to a
/// multiple of `round_to`. The sample is a prefix, so sources whose content
/// drifts along the file bias the estimate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimateConfig {
    pub sample_rows: usize,
    pub round_to: usize,
}

impl Default for EstimateConfig {
    fn default() -> Self {
        EstimateConfig {
            sample_rows: 1_000_000,
            round_to: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Container paths, glob patterns or virtual manifests.
    pub sources: Vec<String>,
    /// Candidate rows read per chunk, before cuts.
    pub batch_size: usize,
    /// Group the cuts apply to; other groups follow its row selection.
    pub primary: String,
    /// Visit chunks in a seeded random order. Rows inside a chunk keep
    /// their order, so this is a chunk-level shuffle only.
    pub shuffle: bool,
    pub seed: u64,
    /// Cast float columns on read.
    pub precision: Option<Precision>,
    /// Drop rows holding ±inf in any float column of any requested group.
    pub remove_inf: bool,
    pub nan_policy: NanPolicy,
    pub estimate: EstimateConfig,
    pub transform: Option<TransformConfig>,
    /// One weight per entry of `sources`. When set, every batch draws
    /// `weight * batch_size` candidate rows from each source and the rows are
    /// shuffled together; otherwise the sources are read one after another.
    pub weights: Option<Vec<f64>>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        ReaderConfig {
            sources: Vec::new(),
            batch_size: 100_000,
            primary: DEFAULT_PRIMARY.to_string(),
            shuffle: true,
            seed: 42,
            precision: None,
            remove_inf: false,
            nan_policy: NanPolicy::default(),
            estimate: EstimateConfig::default(),
            transform: None,
            weights: None,
        }
    }
}

impl ReaderConfig {
    pub fn new<S: Into<String>>(sources: impl IntoIterator<Item = S>) -> Self {
        ReaderConfig {
            sources: sources.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_primary(mut self, primary: impl Into<String>) -> Self {
        self.primary = primary.into();
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn with_remove_inf(mut self, remove_inf: bool) -> Self {
        self.remove_inf = remove_inf;
        self
    }

    pub fn with_nan_policy(mut self, policy: NanPolicy) -> Self {
        self.nan_policy = policy;
        self
    }

    pub fn with_estimate(mut self, estimate: EstimateConfig) -> Self {
        self.estimate = estimate;
        self
    }

    pub fn with_transform(mut self, transform: TransformConfig) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_weights(mut self, weights: impl IntoIterator<Item = f64>) -> Self {
        self.weights = Some(weights.into_iter().collect());
        self
    }

    pub fn open(self) -> Result<Reader> {
        Reader::open(self)
    }
}

/// Row count after cuts. `exact` is false when it was extrapolated from a
/// sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowEstimate {
    pub rows: usize,
    pub exact: bool,
}

impl RowEstimate {
    fn exact(rows: usize) -> Self {
        RowEstimate { rows, exact: true }
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// An opened reader session over one or more containers.
pub struct Reader {
    config: ReaderConfig,
    files: Vec<PathBuf>,
    view: VirtualView,
    transform: Transform,
    estimates: HashMap<String, RowEstimate>,
    /// One reader per weighted source, empty unless weights are set.
    parts: Vec<Reader>,
}

/// Columns to read and emit for one group, in emit order.
#[derive(Debug, Clone)]
struct GroupPlan {
    name: String,
    read: Vec<String>,
    output: Vec<String>,
    emit: bool,
}

#[derive(Debug, Clone)]
struct StreamPlan {
    groups: Vec<GroupPlan>,
    cuts: Cuts,
}

impl Reader {
    pub fn open(config: ReaderConfig) -> Result<Self> {
        let files = resolve_sources(&config.sources)?;
        let view = VirtualView::open(&files)?;
        if !view.has_group(&config.primary) {
            return Err(Error::MissingGroup(config.primary.clone()));
        }
        let transform = match &config.transform {
            Some(t) => Transform::from_config(t)?,
            None => Transform::default(),
        };
        let parts = match &config.weights {
            Some(weights) => open_parts(&config, weights)?,
            None => Vec::new(),
        };
        info!(
            "opened reader over {} source(s), {} rows in '{}'",
            files.len(),
            view.num_rows(&config.primary)?,
            config.primary
        );
        Ok(Reader {
            config,
            files,
            view,
            transform,
            estimates: HashMap::new(),
            parts,
        })
    }

    /// Replace the session transform, e.g. to use custom float functions.
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.parts = std::mem::take(&mut self.parts)
            .into_iter()
            .map(|p| p.with_transform(transform.clone()))
            .collect();
        self.transform = transform;
        self.estimates.clear();
        self
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn view(&self) -> &VirtualView {
        &self.view
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn primary(&self) -> &str {
        &self.config.primary
    }

    /// Rows of the primary group across all sources, before cuts.
    pub fn num_rows(&self) -> Result<usize> {
        self.view.num_rows(&self.config.primary)
    }

    /// Attribute of the first source carrying it.
    pub fn attr(&self, name: &str, group: Option<&str>) -> Option<&JsonValue> {
        self.view.first_attr(name, group)
    }

    fn default_variables(&self, variables: &Variables) -> Variables {
        if variables.is_empty() {
            Variables::all(self.config.primary.as_str())
        } else {
            variables.clone()
        }
    }

    fn plan(&self, variables: &Variables, cuts: Option<&Cuts>) -> Result<StreamPlan> {
        let variables = self.default_variables(variables);
        let primary = self.config.primary.as_str();
        let expected = self.view.num_rows(primary)?;

        let mut groups = Vec::new();
        for (group, selection) in variables.iter() {
            let schema = self.view.schema(group)?;
            self.transform.rename_schema(group, &schema)?;
            let actual = self.view.num_rows(group)?;
            if actual != expected {
                return Err(Error::GroupAlignment {
                    group: group.to_string(),
                    primary: primary.to_string(),
                    expected,
                    actual,
                });
            }
            let mut read: Vec<String> = Vec::new();
            let requested: Vec<String> = match selection {
                Selection::All => schema.fields().iter().map(|f| f.name().clone()).collect(),
                Selection::Columns(cols) => cols
                    .iter()
                    .map(|c| self.transform.raw_name(group, c))
                    .collect(),
            };
            for raw in requested {
                column_index(&schema, &raw)?;
                if !read.contains(&raw) {
                    read.push(raw);
                }
            }
            let output = self.transform.map_variable_names(group, &read, false);
            groups.push(GroupPlan {
                name: group.to_string(),
                read,
                output,
                emit: true,
            });
        }

        let cuts = match cuts {
            Some(c) if !c.is_empty() => {
                let schema = self.view.schema(primary)?;
                let target = match groups.iter().position(|g| g.name == primary) {
                    Some(i) => &mut groups[i],
                    None => {
                        groups.insert(
                            0,
                            GroupPlan {
                                name: primary.to_string(),
                                read: Vec::new(),
                                output: Vec::new(),
                                emit: false,
                            },
                        );
                        &mut groups[0]
                    }
                };
                for variable in c.variables() {
                    let raw = self.transform.raw_name(primary, &variable);
                    column_index(&schema, &raw)?;
                    if !target.read.contains(&raw) {
                        target.read.push(raw);
                    }
                }
                self.transform.resolve_cuts(primary, c)
            }
            _ => Cuts::empty(),
        };
        Ok(StreamPlan { groups, cuts })
    }

    /// Read one chunk of candidate rows and run it through the per-batch
    /// steps: rename, cuts, inf removal, projection, integer remap, float
    /// functions, precision.
    fn read_chunk(&self, plan: &StreamPlan, rows: Range<usize>) -> Result<NamedBatch> {
        let primary = self.config.primary.as_str();
        let mut batch = NamedBatch::new(primary);
        for g in &plan.groups {
            let read = self.view.read(&g.name, rows.clone(), Some(g.read.as_slice()))?;
            batch.insert(&g.name, read);
        }
        batch.check_aligned()?;
        let mut batch = batch.try_map(|g, b| self.transform.rename(g, b))?;

        if !plan.cuts.is_empty() {
            let result = plan.cuts.apply_with(batch.get(primary)?, self.config.nan_policy)?;
            batch = batch.try_map(|g, b| {
                if g == primary {
                    Ok(result.values.clone())
                } else {
                    result.take(&b)
                }
            })?;
        }

        if self.config.remove_inf {
            batch = remove_inf(batch)?;
        }

        for g in plan.groups.iter().filter(|g| !g.emit) {
            batch.remove(&g.name);
        }
        batch.try_map(|g, b| {
            let output = plan
                .groups
                .iter()
                .find(|p| p.name == g)
                .map(|p| p.output.as_slice())
                .unwrap_or_default();
            let b = select_columns(&b, output)?;
            let b = self.transform.map_ints(g, b)?;
            let b = self.transform.map_floats(g, b)?;
            cast_batch(&b, self.config.precision, &IndexMap::new())
        })
    }

    /// Lazily yield batches of rows passing `cuts`, at most `num_jets` rows
    /// in total. A fresh call starts again from the first chunk of the
    /// (seeded) shuffle order.
    ///
    /// With weighted sources each batch combines one batch of every source
    /// and the stream ends as soon as any source runs out. The target is
    /// split between sources in proportion to their row counts.
    pub fn stream(
        &self,
        variables: &Variables,
        num_jets: Option<usize>,
        cuts: Option<&Cuts>,
    ) -> Result<BatchStream<'_>> {
        if !self.parts.is_empty() {
            return self.mixed_stream(variables, num_jets, cuts);
        }
        let plan = self.plan(variables, cuts)?;
        let total = self.num_rows()?;
        let batch_size = self.config.batch_size.max(1);
        let mut starts: Vec<usize> = (0..total).step_by(batch_size).collect();
        if self.config.shuffle {
            fastrand::Rng::with_seed(self.config.seed).shuffle(&mut starts);
        }
        debug!(
            "streaming {} chunk(s) of {batch_size} rows, target {:?}, cuts [{}]",
            starts.len(),
            num_jets,
            plan.cuts
        );
        Ok(BatchStream::new(
            Source::Chunks {
                reader: self,
                plan,
                starts: starts.into_iter(),
                batch_size,
            },
            num_jets,
        ))
    }

    fn mixed_stream(
        &self,
        variables: &Variables,
        num_jets: Option<usize>,
        cuts: Option<&Cuts>,
    ) -> Result<BatchStream<'_>> {
        let total = self.num_rows()?;
        let mut streams = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            let share = match num_jets {
                Some(n) if total > 0 => {
                    Some((part.num_rows()? as u128 * n as u128 / total as u128) as usize)
                }
                Some(_) => Some(0),
                None => None,
            };
            streams.push(part.stream(variables, share, cuts)?);
        }
        debug!(
            "mixing {} weighted source(s) with batch sizes {:?}",
            self.parts.len(),
            self.parts.iter().map(|p| p.config.batch_size).collect::<Vec<_>>()
        );
        let rng = self
            .config
            .shuffle
            .then(|| fastrand::Rng::with_seed(self.config.seed));
        Ok(BatchStream::new(Source::Mixed { streams, rng }, num_jets))
    }

    /// Read up to `num_jets` passing rows into one batch per group. Fewer
    /// rows are returned when the sources run out; check
    /// [`NamedBatch::len`].
    pub fn load(
        &self,
        variables: &Variables,
        num_jets: Option<usize>,
        cuts: Option<&Cuts>,
    ) -> Result<NamedBatch> {
        let schemas = self.dtypes(variables)?;
        let mut parts: IndexMap<String, Vec<RecordBatch>> = IndexMap::new();
        for batch in self.stream(variables, num_jets, cuts)? {
            for (group, b) in batch?.into_inner() {
                parts.entry(group).or_default().push(b);
            }
        }
        let mut out = NamedBatch::new(self.config.primary.as_str());
        for (group, schema) in schemas {
            let batches = parts.swap_remove(&group).unwrap_or_default();
            let schema = batches.first().map_or(schema, |b| b.schema());
            out.insert(group, concat_batches(&schema, &batches)?);
        }
        if num_jets.is_some_and(|n| out.len() < n) {
            info!("requested {:?} rows, only {} available", num_jets, out.len());
        }
        Ok(out)
    }

    /// Schemas of the batches [`Reader::stream`] yields for `variables`.
    pub fn dtypes(&self, variables: &Variables) -> Result<IndexMap<String, SchemaRef>> {
        let plan = self.plan(variables, None)?;
        let mut out = IndexMap::new();
        for g in plan.groups.iter().filter(|g| g.emit) {
            let schema = self.view.schema(&g.name)?;
            let indices = g
                .read
                .iter()
                .map(|c| column_index(&schema, c))
                .collect::<Result<Vec<_>>>()?;
            let projected = Arc::new(schema.project(&indices)?);
            let renamed = self.transform.rename_schema(&g.name, &projected)?;
            out.insert(
                g.name.clone(),
                storage_schema(&renamed, self.config.precision, &IndexMap::new()),
            );
        }
        Ok(out)
    }

    /// Placeholder shapes for writing `num_rows` rows of each group.
    pub fn shapes<'a>(
        &self,
        num_rows: usize,
        groups: impl IntoIterator<Item = &'a str>,
    ) -> Result<IndexMap<String, Shape>> {
        let mut out = IndexMap::new();
        for group in groups {
            let trailing = group_trailing(group, self.view.schema(group)?.as_ref())?;
            out.insert(group.to_string(), Shape::placeholder(num_rows, trailing));
        }
        Ok(out)
    }

    /// Rows passing `cuts`; exact without cuts or when the sample covers
    /// every row, otherwise extrapolated per [`EstimateConfig`]. Results
    /// are cached per rendered cut set until
    /// [`Reader::invalidate_estimates`].
    pub fn estimate_available(&mut self, cuts: Option<&Cuts>) -> Result<RowEstimate> {
        let total = self.num_rows()?;
        let Some(cuts) = cuts.filter(|c| !c.is_empty()) else {
            return Ok(RowEstimate::exact(total));
        };
        let key = cuts.render();
        if let Some(hit) = self.estimates.get(&key) {
            debug!("estimate for [{key}] served from cache");
            return Ok(*hit);
        }

        let primary = self.config.primary.as_str();
        let sample = self.config.estimate.sample_rows.min(total);
        let mut raw: Vec<String> = Vec::new();
        for variable in cuts.variables() {
            let name = self.transform.raw_name(primary, &variable);
            if !raw.contains(&name) {
                raw.push(name);
            }
        }
        let resolved = self.transform.resolve_cuts(primary, cuts);
        let batch_size = self.config.batch_size.max(1);
        let mut passed = 0;
        for start in (0..sample).step_by(batch_size) {
            let end = (start + batch_size).min(sample);
            let chunk = self.view.read(primary, start..end, Some(raw.as_slice()))?;
            let chunk = self.transform.rename(primary, chunk)?;
            passed += resolved.mask(&chunk, self.config.nan_policy)?.true_count();
        }

        let estimate = if sample == total {
            RowEstimate::exact(passed)
        } else {
            let scaled = passed as f64 / sample as f64 * total as f64;
            let round_to = self.config.estimate.round_to.max(1);
            RowEstimate {
                rows: (scaled / round_to as f64).floor() as usize * round_to,
                exact: false,
            }
        };
        info!(
            "estimated {} of {total} rows pass [{key}] from a {sample} row sample",
            estimate.rows
        );
        self.estimates.insert(key, estimate);
        Ok(estimate)
    }

    pub fn invalidate_estimates(&mut self) {
        self.estimates.clear();
    }
}

// ---------------------------------------------------------------------------
// BatchStream
// ---------------------------------------------------------------------------

/// Iterator returned by [`Reader::stream`]. Yields `None` for good once the
/// target is met, the chunks run out or an error was returned.
pub struct BatchStream<'r> {
    source: Source<'r>,
    remaining: Option<usize>,
    yielded: usize,
    done: bool,
}

enum Source<'r> {
    Chunks {
        reader: &'r Reader,
        plan: StreamPlan,
        starts: std::vec::IntoIter<usize>,
        batch_size: usize,
    },
    Mixed {
        streams: Vec<BatchStream<'r>>,
        rng: Option<fastrand::Rng>,
    },
}

impl Source<'_> {
    fn next_batch(&mut self) -> Option<Result<NamedBatch>> {
        match self {
            Source::Chunks {
                reader,
                plan,
                starts,
                batch_size,
            } => {
                let start = starts.next()?;
                Some(reader.read_chunk(plan, start..start + *batch_size))
            }
            Source::Mixed { streams, rng } => {
                let mut parts = Vec::with_capacity(streams.len());
                for stream in streams.iter_mut() {
                    match stream.next()? {
                        Ok(batch) => parts.push(batch),
                        Err(e) => return Some(Err(e)),
                    }
                }
                Some(mix(parts, rng.as_mut()))
            }
        }
    }
}

impl<'r> BatchStream<'r> {
    fn new(source: Source<'r>, remaining: Option<usize>) -> Self {
        BatchStream {
            source,
            remaining,
            yielded: 0,
            done: false,
        }
    }

    /// Rows yielded so far.
    pub fn yielded(&self) -> usize {
        self.yielded
    }
}

impl Iterator for BatchStream<'_> {
    type Item = Result<NamedBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        while self.remaining != Some(0) {
            match self.source.next_batch() {
                None => break,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                Some(Ok(batch)) if batch.is_empty() => continue,
                Some(Ok(mut batch)) => {
                    if let Some(remaining) = self.remaining.as_mut() {
                        batch = batch.head(*remaining);
                        *remaining -= batch.len();
                    }
                    self.yielded += batch.len();
                    return Some(Ok(batch));
                }
            }
        }
        self.done = true;
        debug!("stream finished after {} rows", self.yielded);
        None
    }
}

impl FusedIterator for BatchStream<'_> {}

/// Open one reader per source, each reading `weight * batch_size` rows per
/// chunk.
fn open_parts(config: &ReaderConfig, weights: &[f64]) -> Result<Vec<Reader>> {
    if weights.len() != config.sources.len() {
        return Err(Error::InvalidWeights(format!(
            "{} weight(s) for {} source(s)",
            weights.len(),
            config.sources.len()
        )));
    }
    let mut parts = Vec::with_capacity(weights.len());
    for (source, &weight) in config.sources.iter().zip(weights) {
        if !(weight.is_finite() && weight > 0.0) {
            return Err(Error::InvalidWeights(format!(
                "weight {weight} of '{source}' is not positive"
            )));
        }
        let batch_size = (weight * config.batch_size as f64) as usize;
        if batch_size == 0 {
            return Err(Error::InvalidWeights(format!(
                "weight {weight} of '{source}' leaves no rows of a {} row batch",
                config.batch_size
            )));
        }
        let part = ReaderConfig {
            sources: vec![source.clone()],
            batch_size,
            weights: None,
            ..config.clone()
        };
        parts.push(part.open()?);
    }
    Ok(parts)
}

/// Concatenate one batch per source group by group, then reorder the rows
/// of every group with the same permutation.
fn mix(parts: Vec<NamedBatch>, rng: Option<&mut fastrand::Rng>) -> Result<NamedBatch> {
    let Some(first) = parts.first() else {
        return Err(Error::NoSources(String::from("<no weighted sources>")));
    };
    let mut out = NamedBatch::new(first.primary());
    for group in first.groups() {
        let batches = parts
            .iter()
            .map(|p| p.get(group).cloned())
            .collect::<Result<Vec<_>>>()?;
        out.insert(group, concat_batches(&batches[0].schema(), &batches)?);
    }
    let rows = out.len();
    match rng {
        Some(rng) if rows > 1 => {
            let mut order: Vec<u64> = (0..rows as u64).collect();
            rng.shuffle(&mut order);
            let order = UInt64Array::from(order);
            out.try_map(|_, b| Ok(take_record_batch(&b, &order)?))
        }
        _ => Ok(out),
    }
}

// ---------------------------------------------------------------------------
// Inf removal
// ---------------------------------------------------------------------------

fn leaf_values(array: &ArrayRef) -> ArrayRef {
    match array.as_any().downcast_ref::<FixedSizeListArray>() {
        Some(list) => leaf_values(list.values()),
        None => array.clone(),
    }
}

/// Clear `keep[row]` for every row with an infinite value in `column`.
/// Returns the number of infinite values found.
fn mark_inf(column: &ArrayRef, keep: &mut [bool]) -> Result<usize> {
    if keep.is_empty() || !leaf_type(column.data_type()).is_floating() {
        return Ok(0);
    }
    let leaf = leaf_values(column);
    let per_row = (leaf.len() / keep.len()).max(1);
    let floats = cast(&leaf, &DataType::Float64)?;
    let mut found = 0;
    for (i, v) in floats.as_primitive::<Float64Type>().iter().enumerate() {
        if v.is_some_and(f64::is_infinite) {
            keep[i / per_row] = false;
            found += 1;
        }
    }
    Ok(found)
}

/// Drop rows holding ±inf in any float column of any group, from all
/// groups together.
fn remove_inf(batch: NamedBatch) -> Result<NamedBatch> {
    let mut keep = vec![true; batch.len()];
    for (group, b) in batch.iter() {
        for (field, column) in b.schema().fields().iter().zip(b.columns()) {
            let found = mark_inf(column, &mut keep)?;
            if found > 0 {
                warn!(
                    "{found} inf values in '{}' of '{group}', removing the affected rows",
                    field.name()
                );
            }
        }
    }
    if keep.iter().all(|k| *k) {
        return Ok(batch);
    }
    let mask = BooleanArray::from(keep);
    batch.try_map(|_, b| Ok(filter_record_batch(&b, &mask)?))
}
