//! Deterministic mock containers with a `jets` group and a `tracks` group of
//! fixed width, for tests and the `tagsel-mock` binary.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, FixedSizeListArray, Float32Array, Int32Array, Int64Array,
};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use log::info;
use serde::{Deserialize, Serialize};

use crate::data::{Compression, ContainerWriter, NamedBatch};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    pub num_jets: usize,
    pub seed: u64,
    /// Track slots per jet.
    pub num_tracks: usize,
}

impl Default for MockConfig {
    fn default() -> Self {
        MockConfig {
            num_jets: 1_000,
            seed: 42,
            num_tracks: 40,
        }
    }
}

impl MockConfig {
    pub fn new(num_jets: usize) -> Self {
        MockConfig {
            num_jets,
            ..Default::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_num_tracks(mut self, num_tracks: usize) -> Self {
        self.num_tracks = num_tracks;
        self
    }
}

/// Box-Muller transform for a normal variate.
fn gauss(rng: &mut fastrand::Rng, mean: f64, std_dev: f64) -> f64 {
    let u1 = rng.f64().max(1e-15);
    let u2 = rng.f64();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mean + std_dev * z
}

#[derive(Debug, Clone, Copy)]
enum Flavour {
    B,
    C,
    Light,
    Tau,
}

impl Flavour {
    fn draw(rng: &mut fastrand::Rng) -> Self {
        match rng.f64() {
            x if x < 0.25 => Flavour::B,
            x if x < 0.45 => Flavour::C,
            x if x < 0.95 => Flavour::Light,
            _ => Flavour::Tau,
        }
    }

    fn label_id(self) -> i32 {
        match self {
            Flavour::B => 5,
            Flavour::C => 4,
            Flavour::Light => 0,
            Flavour::Tau => 15,
        }
    }

    fn extended_id(self, rng: &mut fastrand::Rng) -> i32 {
        match self {
            Flavour::B => [5, 54, 55][rng.usize(..3)],
            Flavour::C => [4, 44][rng.usize(..2)],
            Flavour::Light => 0,
            Flavour::Tau => 15,
        }
    }

    /// Spread of the track impact parameters; heavy flavour decays displace.
    fn d0_width(self) -> f64 {
        match self {
            Flavour::B => 0.5,
            Flavour::C => 0.25,
            Flavour::Tau => 0.2,
            Flavour::Light => 0.05,
        }
    }
}

fn array(a: impl Array + 'static) -> ArrayRef {
    Arc::new(a)
}

fn list(values: ArrayRef, width: usize) -> Result<ArrayRef> {
    let field = Arc::new(Field::new("item", values.data_type().clone(), true));
    Ok(Arc::new(FixedSizeListArray::try_new(
        field,
        width as i32,
        values,
        None,
    )?))
}

fn batch_of(columns: Vec<(&str, ArrayRef)>) -> Result<RecordBatch> {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, a)| Field::new(*name, a.data_type().clone(), true))
        .collect();
    let arrays = columns.into_iter().map(|(_, a)| a).collect();
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
}

/// Generate `jets` and `tracks` for `config.num_jets` jets.
pub fn mock_batch(config: &MockConfig) -> Result<NamedBatch> {
    let mut rng = fastrand::Rng::with_seed(config.seed);
    let n = config.num_jets;
    let width = config.num_tracks.max(1);

    let mut pt = Vec::with_capacity(n);
    let mut eta = Vec::with_capacity(n);
    let mut abs_eta = Vec::with_capacity(n);
    let mut mass = Vec::with_capacity(n);
    let mut n_tracks = Vec::with_capacity(n);
    let mut label = Vec::with_capacity(n);
    let mut extended = Vec::with_capacity(n);
    let mut ghost_b = Vec::with_capacity(n);
    let mut ghost_c = Vec::with_capacity(n);
    let mut r10 = Vec::with_capacity(n);
    let mut event = Vec::with_capacity(n);

    let mut d0 = Vec::with_capacity(n * width);
    let mut z0 = Vec::with_capacity(n * width);
    let mut dphi = Vec::with_capacity(n * width);
    let mut deta = Vec::with_capacity(n * width);
    let mut pixel_hits = Vec::with_capacity(n * width);
    let mut valid = Vec::with_capacity(n * width);

    for i in 0..n {
        let flavour = Flavour::draw(&mut rng);
        let jet_pt = 20e3 - 60e3 * rng.f64().max(1e-15).ln();
        let jet_eta = gauss(&mut rng, 0.0, 1.2).clamp(-2.5, 2.5);
        let tracks = rng.usize(1..=width);

        pt.push(jet_pt as f32);
        eta.push(jet_eta as f32);
        abs_eta.push(jet_eta.abs() as f32);
        mass.push(gauss(&mut rng, 10e3, 3e3).abs() as f32);
        n_tracks.push(tracks as i32);
        label.push(flavour.label_id());
        extended.push(flavour.extended_id(&mut rng));
        ghost_b.push(i32::from(matches!(flavour, Flavour::B)));
        ghost_c.push(i32::from(matches!(flavour, Flavour::C)));
        r10.push([1, 6, 7, 10, 11, 12][rng.usize(..6)]);
        event.push(i as i64);

        for t in 0..width {
            let is_valid = t < tracks;
            let scale = if is_valid { 1.0 } else { 0.0 };
            d0.push((gauss(&mut rng, 0.0, flavour.d0_width()) * scale) as f32);
            z0.push((gauss(&mut rng, 0.0, 0.3) * scale) as f32);
            dphi.push((gauss(&mut rng, 0.0, 0.1) * scale) as f32);
            deta.push((gauss(&mut rng, 0.0, 0.1) * scale) as f32);
            pixel_hits.push(if is_valid { rng.i32(1..=4) } else { 0 });
            valid.push(is_valid);
        }
    }

    let jets = batch_of(vec![
        ("pt", array(Float32Array::from(pt))),
        ("eta", array(Float32Array::from(eta))),
        ("abs_eta", array(Float32Array::from(abs_eta))),
        ("mass", array(Float32Array::from(mass))),
        ("n_tracks", array(Int32Array::from(n_tracks))),
        ("HadronConeExclTruthLabelID", array(Int32Array::from(label))),
        ("HadronConeExclExtendedTruthLabelID", array(Int32Array::from(extended))),
        ("GhostBHadronsFinalCount", array(Int32Array::from(ghost_b))),
        ("GhostCHadronsFinalCount", array(Int32Array::from(ghost_c))),
        ("R10TruthLabel_R22v1", array(Int32Array::from(r10))),
        ("eventNumber", array(Int64Array::from(event))),
    ])?;
    let tracks = batch_of(vec![
        ("d0", list(array(Float32Array::from(d0)), width)?),
        ("z0SinTheta", list(array(Float32Array::from(z0)), width)?),
        ("dphi", list(array(Float32Array::from(dphi)), width)?),
        ("deta", list(array(Float32Array::from(deta)), width)?),
        ("numberOfPixelHits", list(array(Int32Array::from(pixel_hits)), width)?),
        ("valid", list(array(BooleanArray::from(valid)), width)?),
    ])?;

    Ok(NamedBatch::new("jets")
        .with_group("jets", jets)
        .with_group("tracks", tracks))
}

/// Write a mock container to `path` and return the path.
pub fn write_mock_container(path: &Path, config: &MockConfig) -> Result<PathBuf> {
    let batch = mock_batch(config)?;
    let mut writer = ContainerWriter::create(path)?;
    for (group, b) in batch.iter() {
        writer.create_group(group, b.schema(), Compression::default())?;
        writer.write_slice(group, b)?;
        writer.set_attr("num_jets", config.num_jets, Some(group));
    }
    writer.set_attr("generator", "tagsel-mock", None);
    writer.set_attr("seed", config.seed, None);
    writer.close()?;
    info!("wrote {} mock jets to {}", config.num_jets, path.display());
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use arrow::datatypes::DataType;

    use super::*;

    #[test]
    fn deterministic() {
        let a = mock_batch(&MockConfig::new(50)).unwrap();
        let b = mock_batch(&MockConfig::new(50)).unwrap();
        let c = mock_batch(&MockConfig::new(50).with_seed(7)).unwrap();
        assert_eq!(a.get("jets").unwrap(), b.get("jets").unwrap());
        assert_ne!(a.get("jets").unwrap(), c.get("jets").unwrap());
    }

    #[test]
    fn groups_aligned() {
        let batch = mock_batch(&MockConfig::new(25).with_num_tracks(10)).unwrap();
        batch.check_aligned().unwrap();
        assert_eq!(batch.len(), 25);
        let tracks = batch.get("tracks").unwrap();
        assert_eq!(
            tracks.schema().field(0).data_type(),
            &DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), 10)
        );
    }
}
