use chrono::NaiveDateTime;
use ndarray::{Array2, Array3};

/// One reconstructed 3D volume plus the metadata a downstream consumer
/// needs to interpret it.
///
/// The first two axes of `data` are the per-slice (row, column) extent;
/// the third axis is slice order, strictly increasing by instance number.
/// Immutable once assembled.
#[derive(Debug, Clone)]
pub struct Volume {
    pub exam: i32,
    pub series: i32,
    pub acquisition: i32,
    pub patient_id: String,
    pub series_description: String,
    /// Repetition time in seconds.
    pub tr: f64,
    pub num_timepoints: u32,
    pub study_datetime: Option<NaiveDateTime>,
    pub data: Array3<u16>,
    /// 4x4 voxel-to-scanner transform. Voxel spacing on the diagonal,
    /// patient position in the last column with negated X/Y and positive Z.
    /// That sign convention matches the scanner's coordinate handedness and
    /// must be preserved exactly for downstream compatibility.
    pub affine: Array2<f64>,
}

impl Volume {
    /// Dimensions of the volume as (rows, columns, slices).
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<u16> {
        &self.data
    }

    /// Number of slices stacked into this volume.
    pub fn num_slices(&self) -> usize {
        self.data.dim().2
    }
}
