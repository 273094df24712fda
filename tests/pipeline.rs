//! Pipeline tests against an in-memory scanner.
//!
//! The mock implements [`ScannerClient`] over a shared directory tree so
//! the finders and the volumizer run exactly as they do against a real
//! scanner, minus the network.

use chrono::{DateTime, Duration as TimeDelta};
use crossbeam_channel::unbounded;
use dicom_stream::finders::{DicomFinderOpts, dicom_finder};
use dicom_stream::{
    AcquisitionId, ClientError, Config, DicomSlice, DirectoryEntry, Pipeline, ScannerClient,
};
use ndarray::Array2;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const BASE: &str = "/store";

#[derive(Default)]
struct MockState {
    /// Directory path -> child names, in arrival order.
    dirs: HashMap<String, Vec<String>>,
    /// File path -> the slice its bytes would decode to.
    slices: HashMap<String, DicomSlice>,
}

/// In-memory scanner shared between workers; clones see the same tree.
#[derive(Clone, Default)]
struct MockScanner {
    state: Arc<Mutex<MockState>>,
}

impl MockScanner {
    fn with_exam() -> Self {
        let scanner = Self::default();
        {
            let mut state = scanner.state.lock().unwrap();
            state.dirs.insert(BASE.into(), vec!["p1".into()]);
            state.dirs.insert(format!("{BASE}/p1"), vec!["e1".into()]);
            state.dirs.insert(format!("{BASE}/p1/e1"), Vec::new());
        }
        scanner
    }

    fn add_series(&self, name: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let exam = format!("{BASE}/p1/e1");
        state
            .dirs
            .get_mut(&exam)
            .expect("exam dir")
            .push(name.into());
        let series = format!("{exam}/{name}");
        state.dirs.insert(series.clone(), Vec::new());
        series
    }

    /// Register a file name under a series. Registering without a slice
    /// simulates a file that fails to decode.
    fn add_file(&self, series: &str, name: &str, slice: Option<DicomSlice>) {
        let mut state = self.state.lock().unwrap();
        state
            .dirs
            .get_mut(series)
            .expect("series dir")
            .push(name.into());
        if let Some(slice) = slice {
            state.slices.insert(format!("{series}/{name}"), slice);
        }
    }
}

impl ScannerClient for MockScanner {
    fn reconnect(&mut self) -> Result<(), ClientError> {
        Ok(())
    }

    fn list_dir(&mut self, path: &str) -> Result<Vec<DirectoryEntry>, ClientError> {
        let state = self.state.lock().unwrap();
        let names = state.dirs.get(path).cloned().unwrap_or_default();
        let epoch = DateTime::from_timestamp(0, 0).expect("epoch").naive_utc();
        Ok(names
            .into_iter()
            .enumerate()
            .map(|(i, name)| DirectoryEntry {
                recency: epoch + TimeDelta::microseconds(i as i64 + 1),
                size: 1,
                name,
            })
            .collect())
    }

    fn retrieve_file(&mut self, path: &str) -> Result<Vec<u8>, ClientError> {
        Err(ClientError::Io(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("mock has no raw bytes for {path}"),
        )))
    }

    fn retrieve_slice(&mut self, path: &str) -> Result<DicomSlice, ClientError> {
        let state = self.state.lock().unwrap();
        state.slices.get(path).cloned().ok_or_else(|| {
            ClientError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("undecodable file {path}"),
            ))
        })
    }

    fn base_dir(&self) -> &str {
        BASE
    }

    fn close(&mut self) {}
}

fn make_slice(series: i32, instance: u32, slices_per_volume: u32, timepoints: u32) -> DicomSlice {
    DicomSlice {
        identity: AcquisitionId {
            exam: 1,
            series,
            acquisition: 1,
        },
        instance_number: instance,
        slices_per_volume: Some(slices_per_volume),
        patient_id: "P001".to_string(),
        series_description: "fmri run".to_string(),
        repetition_time_ms: 2000.0,
        num_timepoints: timepoints,
        study_datetime: None,
        pixel_spacing: Some((2.0, 2.0)),
        slice_spacing: Some(3.0),
        image_position: Some([1.0, 2.0, 3.0]),
        pixels: Array2::from_elem((4, 4), instance as u16),
    }
}

fn fast_config() -> Config {
    let mut config = Config::default();
    config.polling.interval_ms = 1;
    config.polling.pop_timeout_ms = 20;
    config
}

#[test]
fn six_shuffled_slices_become_one_ordered_volume() {
    let scanner = MockScanner::with_exam();
    let series = scanner.add_series("s1");
    for instance in [3, 1, 5, 2, 6, 4] {
        scanner.add_file(
            &series,
            &format!("i{instance}.dcm"),
            Some(make_slice(1, instance, 6, 7)),
        );
    }

    let pipeline = Pipeline::spawn(scanner.clone(), scanner.clone(), &fast_config());
    let volume = pipeline
        .volumes()
        .recv_timeout(Duration::from_secs(5))
        .expect("expected one volume");

    assert_eq!((volume.exam, volume.series, volume.acquisition), (1, 1, 1));
    assert_eq!(volume.dim(), (4, 4, 6));
    for i in 0..6 {
        assert_eq!(volume.data[[0, 0, i]], i as u16 + 1);
    }
    assert_eq!(volume.tr, 2.0);

    assert!(
        pipeline
            .volumes()
            .recv_timeout(Duration::from_millis(200))
            .is_err(),
        "only one volume should be emitted"
    );
    pipeline.halt();
}

#[test]
fn short_series_below_timepoint_threshold_is_ignored() {
    let scanner = MockScanner::with_exam();
    let localizer = scanner.add_series("s1");
    scanner.add_file(&localizer, "i1.dcm", Some(make_slice(1, 1, 1, 1)));

    let run = scanner.add_series("s2");
    for instance in [2, 1] {
        scanner.add_file(
            &run,
            &format!("i{instance}.dcm"),
            Some(make_slice(2, instance, 2, 7)),
        );
    }

    let pipeline = Pipeline::spawn(scanner.clone(), scanner.clone(), &fast_config());
    let volume = pipeline
        .volumes()
        .recv_timeout(Duration::from_secs(5))
        .expect("expected the time-series volume");
    assert_eq!(volume.series, 2);

    assert!(
        pipeline
            .volumes()
            .recv_timeout(Duration::from_millis(200))
            .is_err(),
        "the localizer must never produce a volume"
    );
    pipeline.halt();
}

#[test]
fn startup_skip_count_suppresses_early_series() {
    let scanner = MockScanner::with_exam();
    for (index, name) in ["s1", "s2", "s3"].iter().enumerate() {
        let series = scanner.add_series(name);
        let number = index as i32 + 1;
        for instance in [2, 1] {
            scanner.add_file(
                &series,
                &format!("i{instance}.dcm"),
                Some(make_slice(number, instance, 2, 7)),
            );
        }
    }

    let mut config = fast_config();
    config.polling.skip_series = 2;

    let pipeline = Pipeline::spawn(scanner.clone(), scanner.clone(), &config);
    let volume = pipeline
        .volumes()
        .recv_timeout(Duration::from_secs(5))
        .expect("expected a volume from the third series");
    assert_eq!(volume.series, 3);

    assert!(
        pipeline
            .volumes()
            .recv_timeout(Duration::from_millis(200))
            .is_err(),
        "skipped series must never produce volumes"
    );
    pipeline.halt();
}

#[test]
fn relisting_does_not_requeue_seen_files() {
    let scanner = MockScanner::with_exam();
    let series = scanner.add_series("s1");
    for instance in 1..=3 {
        scanner.add_file(
            &series,
            &format!("i{instance}.dcm"),
            Some(make_slice(1, instance, 6, 7)),
        );
    }

    let (series_tx, series_rx) = unbounded();
    let (slice_tx, slice_rx) = unbounded();
    let halt = Arc::new(AtomicBool::new(false));
    let opts = DicomFinderOpts {
        interval: Duration::from_millis(1),
    };

    let handle = {
        let mut client = scanner.clone();
        let halt = Arc::clone(&halt);
        thread::spawn(move || dicom_finder(&mut client, &series_rx, &slice_tx, &halt, &opts))
    };
    series_tx.send(series.clone()).unwrap();

    for _ in 0..3 {
        slice_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("expected a queued slice");
    }
    // The finder keeps re-listing the unchanged directory; nothing new
    // may appear on the queue.
    assert!(slice_rx.recv_timeout(Duration::from_millis(100)).is_err());

    scanner.add_file(&series, "i4.dcm", Some(make_slice(1, 4, 6, 7)));
    let late = slice_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("expected the newly arrived slice");
    assert_eq!(late.instance_number, 4);
    assert!(slice_rx.recv_timeout(Duration::from_millis(100)).is_err());

    halt.store(true, Ordering::Relaxed);
    handle.join().expect("finder thread panicked");
}

#[test]
fn undecodable_file_is_skipped_until_a_replacement_arrives() {
    let scanner = MockScanner::with_exam();
    let series = scanner.add_series("s1");
    scanner.add_file(&series, "i1.dcm", Some(make_slice(1, 1, 2, 7)));
    // Listed but undecodable; the volume cannot complete from it.
    scanner.add_file(&series, "i2.dcm", None);

    let pipeline = Pipeline::spawn(scanner.clone(), scanner.clone(), &fast_config());
    assert!(
        pipeline
            .volumes()
            .recv_timeout(Duration::from_millis(300))
            .is_err(),
        "volume must not assemble while a slice is missing"
    );

    // A usable copy of the missing instance arrives under a new name.
    scanner.add_file(&series, "i2b.dcm", Some(make_slice(1, 2, 2, 7)));
    let volume = pipeline
        .volumes()
        .recv_timeout(Duration::from_secs(5))
        .expect("expected the completed volume");
    assert_eq!(volume.num_slices(), 2);
    pipeline.halt();
}

#[test]
fn consumer_sees_volumes_within_one_acquisition_in_order() {
    let scanner = MockScanner::with_exam();
    let series = scanner.add_series("s1");
    for instance in [4, 2, 6, 1, 3, 5] {
        scanner.add_file(
            &series,
            &format!("i{instance}.dcm"),
            Some(make_slice(1, instance, 3, 7)),
        );
    }

    let pipeline = Pipeline::spawn(scanner.clone(), scanner.clone(), &fast_config());
    let first = pipeline
        .volumes()
        .recv_timeout(Duration::from_secs(5))
        .expect("expected the first volume");
    let second = pipeline
        .volumes()
        .recv_timeout(Duration::from_secs(5))
        .expect("expected the second volume");

    assert_eq!(first.data[[0, 0, 0]], 1);
    assert_eq!(first.data[[0, 0, 2]], 3);
    assert_eq!(second.data[[0, 0, 0]], 4);
    assert_eq!(second.data[[0, 0, 2]], 6);
    pipeline.halt();
}
