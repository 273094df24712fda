use crate::slice::{AcquisitionId, DicomSlice};
use crate::volume::Volume;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use ndarray::{Array2, Array3, s};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum VolumizerError {
    #[error("no slices to assemble")]
    NoSlices,

    #[error("inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("missing spacing information")]
    MissingSpacing,

    #[error("missing patient position")]
    MissingPosition,
}

#[derive(Debug, Clone)]
pub struct VolumizerOpts {
    /// Sleep after an empty pop before re-checking the queue.
    pub interval: Duration,
    /// Bounded wait on the slice queue, so the halt flag and the pending
    /// pool are re-checked even when no slices arrive.
    pub pop_timeout: Duration,
}

/// Consume decoded slices and emit complete volumes.
///
/// Slices are grouped by their acquisition identity and pooled by instance
/// number. Once every instance number of the current needed block is
/// pooled, exactly those slices are extracted in ascending order and
/// stacked; whatever else is pooled stays for the next volume. A slice
/// from a different identity marks an acquisition boundary: the previous
/// run has ended, so its pending slices are discarded.
///
/// Runs until the halt flag is set or both queue ends disconnect.
pub fn volumizer(
    slice_rx: &Receiver<DicomSlice>,
    volume_tx: &Sender<Volume>,
    halt: &AtomicBool,
    opts: &VolumizerOpts,
) {
    let mut current: Option<AcquisitionId> = None;
    // The needed set is always the contiguous block
    // first_needed..first_needed + count_needed.
    let mut first_needed: u32 = 1;
    let mut count_needed: u32 = 0;
    let mut pool: HashMap<u32, DicomSlice> = HashMap::new();
    let mut nqueued: u64 = 0;

    while !halt.load(Ordering::Relaxed) {
        match slice_rx.recv_timeout(opts.pop_timeout) {
            Ok(slice) => {
                let Some(slices_per_volume) = slice.slices_per_volume else {
                    warn!(
                        instance = slice.instance_number,
                        "slice has no usable slices-per-volume value, skipping"
                    );
                    continue;
                };

                if current != Some(slice.identity) {
                    info!(
                        exam = slice.identity.exam,
                        series = slice.identity.series,
                        acquisition = slice.identity.acquisition,
                        "collecting slices for new scanner run"
                    );
                    current = Some(slice.identity);
                    first_needed = 1;
                    pool.clear();
                }
                // Trust the most recently observed value for this acquisition.
                count_needed = slices_per_volume;

                // Overlapping polls can deliver the same instance twice;
                // last write wins.
                pool.insert(slice.instance_number, slice);
            }
            Err(RecvTimeoutError::Timeout) => {
                // The needed set can already be satisfied by slices pooled
                // on earlier pops; only then is there work to do.
                if count_needed == 0 || !block_complete(&pool, first_needed, count_needed) {
                    std::thread::sleep(opts.interval);
                    continue;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if count_needed == 0 || !block_complete(&pool, first_needed, count_needed) {
            continue;
        }

        debug!(
            first = first_needed,
            last = first_needed + count_needed - 1,
            "assembling full volume"
        );
        let slices: Vec<DicomSlice> = (first_needed..first_needed + count_needed)
            .filter_map(|n| pool.remove(&n))
            .collect();
        first_needed += count_needed;

        match assemble_volume(&slices) {
            Ok(volume) => {
                if volume_tx.send(volume).is_err() {
                    break;
                }
                nqueued += 1;
            }
            Err(err) => {
                warn!(error = %err, "discarding unassemblable slice block");
            }
        }
    }

    info!(nqueued, "volumizer halted");
}

fn block_complete(pool: &HashMap<u32, DicomSlice>, first: u32, count: u32) -> bool {
    (first..first + count).all(|n| pool.contains_key(&n))
}

/// Stack ordered slices into a [`Volume`].
///
/// The caller passes slices already in ascending instance-number order;
/// descriptive metadata and the affine come from the first slice.
pub fn assemble_volume(slices: &[DicomSlice]) -> Result<Volume, VolumizerError> {
    let first = slices.first().ok_or(VolumizerError::NoSlices)?;

    let dim = first.pixels.dim();
    if slices.iter().any(|slice| slice.pixels.dim() != dim) {
        return Err(VolumizerError::InconsistentDimensions);
    }

    Ok(Volume {
        exam: first.identity.exam,
        series: first.identity.series,
        acquisition: first.identity.acquisition,
        patient_id: first.patient_id.clone(),
        series_description: first.series_description.clone(),
        tr: first.repetition_time_ms / 1000.0,
        num_timepoints: first.num_timepoints,
        study_datetime: first.study_datetime,
        affine: build_affine(first)?,
        data: stack_slices(slices, dim),
    })
}

fn stack_slices(slices: &[DicomSlice], (rows, cols): (usize, usize)) -> Array3<u16> {
    let mut volume = Array3::<u16>::zeros((rows, cols, slices.len()));
    for (i, slice) in slices.iter().enumerate() {
        volume.slice_mut(s![.., .., i]).assign(&slice.pixels);
    }
    volume
}

fn build_affine(first: &DicomSlice) -> Result<Array2<f64>, VolumizerError> {
    let (row_spacing, col_spacing) = first.pixel_spacing.ok_or(VolumizerError::MissingSpacing)?;
    let slice_spacing = first.slice_spacing.ok_or(VolumizerError::MissingSpacing)?;
    let position = first.image_position.ok_or(VolumizerError::MissingPosition)?;

    let mut affine = Array2::<f64>::eye(4);
    affine[[0, 0]] = row_spacing;
    affine[[1, 1]] = col_spacing;
    affine[[2, 2]] = slice_spacing;
    affine[[0, 3]] = -position[0];
    affine[[1, 3]] = -position[1];
    affine[[2, 3]] = position[2];
    Ok(affine)
}
