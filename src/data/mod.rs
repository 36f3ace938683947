/// Data layer: grouped batches, containers, and chunked reading and writing.
///
/// Architecture:
/// ```text
///  <container>/{jets,tracks,...}.parquet + attrs.json
///        │
///        ▼
///   ┌──────────┐
///   │ storage   │  Container / ContainerWriter, one Parquet file per group
///   └──────────┘
///        │  sample: globs and manifests → sorted source list
///        ▼
///   ┌──────────┐
///   │   vds     │  VirtualView, segment table over all sources
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  reader   │  chunks → rename → cuts → remap → float fns → NamedBatch
///   └──────────┘  weighted sources: one reader each, mixed per batch
///        │        tracks: TrackSelector masks failing tracks in place
///        │
///        ▼
///   ┌──────────┐
///   │  writer   │  NamedBatch → precision cast → new container
///   └──────────┘
/// ```
pub mod model;
pub mod reader;
pub mod sample;
pub mod storage;
pub mod tracks;
pub mod transform;
pub mod vds;
pub mod writer;

pub use model::{
    Compression, NamedBatch, Precision, RowCount, Selection, Shape, Variables, DEFAULT_PRIMARY,
};
pub use reader::{BatchStream, EstimateConfig, Reader, ReaderConfig, RowEstimate};
pub use sample::{resolve_sources, Sample};
pub use storage::{Attrs, Container, ContainerWriter};
pub use tracks::{TrackSelector, VALID_COLUMN};
pub use transform::{FloatFn, NamedFn, Transform, TransformConfig};
pub use vds::{create_virtual_file, Manifest, VirtualGroup, VirtualView};
pub use writer::{Writer, WriterConfig};
