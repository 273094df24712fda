use crate::client::ScannerClient;
use crate::slice::DicomSlice;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SeriesFinderOpts {
    pub interval: Duration,
    /// Number of distinct series seen at startup to skip. These are setup
    /// scans collected before the operator truly begins a run.
    pub skip_count: usize,
    /// A series qualifies when NumberOfTemporalPositions exceeds this.
    pub min_timepoints: u32,
}

#[derive(Debug, Clone)]
pub struct DicomFinderOpts {
    pub interval: Duration,
}

/// Poll the scanner for new series directories and queue the ones that
/// look like time-series acquisitions.
///
/// On the first pass every series under the latest exam is considered; on
/// later passes only a change of the latest series triggers a check. Runs
/// until the halt flag is set.
pub fn series_finder<C: ScannerClient>(
    client: &mut C,
    series_tx: &Sender<String>,
    halt: &AtomicBool,
    opts: &SeriesFinderOpts,
) {
    let mut current_series: Option<String> = None;
    let mut skipped: HashSet<String> = HashSet::new();
    let mut nqueued: u64 = 0;

    while !halt.load(Ordering::Relaxed) {
        if current_series.is_none() {
            debug!("starting series collection");
            match client.series_dirs() {
                Ok(dirs) => {
                    for series in &dirs {
                        consider_series(client, series, series_tx, &mut skipped, &mut nqueued, opts);
                    }
                    current_series = dirs.last().cloned();
                }
                Err(err) => debug!(error = %err, "could not enumerate series, will retry"),
            }
        } else {
            match client.latest_series() {
                Ok(latest) => {
                    if current_series.as_deref() != Some(latest.as_str()) {
                        info!(series = %latest, "found new series");
                        let resolved = consider_series(
                            client,
                            &latest,
                            series_tx,
                            &mut skipped,
                            &mut nqueued,
                            opts,
                        );
                        // An empty directory is not yet a time-series;
                        // leave it as "new" so the next poll retries.
                        if resolved {
                            current_series = Some(latest);
                        }
                    }
                }
                Err(err) => debug!(error = %err, "could not read latest series, will retry"),
            }
        }

        std::thread::sleep(opts.interval);
    }

    info!(nqueued, "series finder halted");
}

/// Apply the skip policy and the time-series test to one series,
/// queueing it when it qualifies. Returns false when the series could not
/// be summarized yet and should be reconsidered on a later poll.
fn consider_series<C: ScannerClient>(
    client: &mut C,
    series: &str,
    series_tx: &Sender<String>,
    skipped: &mut HashSet<String>,
    nqueued: &mut u64,
    opts: &SeriesFinderOpts,
) -> bool {
    if skipped.contains(series) {
        return true;
    }
    if skipped.len() < opts.skip_count {
        info!(series, "skipping startup series");
        skipped.insert(series.to_string());
        return true;
    }

    match client.series_info(series) {
        Ok(Some(info)) if info.num_timepoints > opts.min_timepoints => {
            debug!(
                series,
                timepoints = info.num_timepoints,
                "series appears to be 4D, adding to series queue"
            );
            if series_tx.send(series.to_string()).is_ok() {
                *nqueued += 1;
            }
            true
        }
        Ok(Some(info)) => {
            debug!(
                series,
                timepoints = info.num_timepoints,
                "series is not a time-series, ignoring"
            );
            true
        }
        Ok(None) => {
            debug!(series, "series directory still empty");
            false
        }
        Err(err) => {
            warn!(series, error = %err, "could not summarize series");
            false
        }
    }
}

/// Poll the current series directory for files not yet seen, fetch and
/// decode each one, and queue the slices.
///
/// The set of seen files is reset whenever a new series is adopted from
/// the series queue: per-series file identity never matters once a series
/// is superseded, and dropping it bounds memory. Queue order follows
/// listing recency, which usually but not always matches acquisition
/// order; the volumizer orders by instance number regardless.
pub fn dicom_finder<C: ScannerClient>(
    client: &mut C,
    series_rx: &Receiver<String>,
    slice_tx: &Sender<DicomSlice>,
    halt: &AtomicBool,
    opts: &DicomFinderOpts,
) {
    let mut current_series: Option<String> = None;
    let mut seen_files: HashSet<String> = HashSet::new();
    let mut nqueued: u64 = 0;

    while !halt.load(Ordering::Relaxed) {
        if let Some(series) = &current_series {
            match client.series_files(series) {
                Ok(files) => {
                    let new_files: Vec<String> = files
                        .iter()
                        .filter(|path| !seen_files.contains(*path))
                        .cloned()
                        .collect();
                    if !new_files.is_empty() {
                        debug!(count = new_files.len(), "queueing new slice files");
                    }
                    for path in &new_files {
                        match client.retrieve_slice(path) {
                            Ok(slice) => {
                                if slice_tx.send(slice).is_err() {
                                    info!(nqueued, "slice queue closed, dicom finder halting");
                                    return;
                                }
                                nqueued += 1;
                            }
                            Err(err) => {
                                warn!(path = %path, error = %err, "failed to fetch or decode slice, skipping");
                            }
                        }
                    }
                    seen_files.extend(new_files);
                }
                Err(err) => debug!(error = %err, "could not list series, will retry"),
            }
        }

        match series_rx.try_recv() {
            Ok(series) => {
                info!(series = %series, "beginning slice collection for new series");
                current_series = Some(series);
                seen_files.clear();
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                // No series will ever arrive; keep draining the current one
                // if there is one, otherwise there is nothing left to do.
                if current_series.is_none() {
                    break;
                }
            }
        }

        std::thread::sleep(opts.interval);
    }

    info!(nqueued, "dicom finder halted");
}
