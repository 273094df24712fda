use crate::client::ScannerClient;
use crate::config::{Config, Protocol};
use crate::finders::{DicomFinderOpts, SeriesFinderOpts, dicom_finder, series_finder};
use crate::ftp::FtpClient;
use crate::sftp::SftpClient;
use crate::volume::Volume;
use crate::volumizer::{VolumizerOpts, volumizer};

use crossbeam_channel::{Receiver, unbounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tracing::error;

/// The three-stage acquisition pipeline.
///
/// Series discovery, slice discovery, and volume assembly each run on
/// their own thread, connected by unbounded channels; the only shared
/// state is the halt flag. The volume receiver is the public end of the
/// pipeline: every item popped from it is a complete, correctly ordered
/// volume.
pub struct Pipeline {
    halt: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    volume_rx: Receiver<Volume>,
}

impl Pipeline {
    /// Open two sessions to the scanner with the configured protocol (the
    /// series and slice pollers each own one) and spawn the workers.
    pub fn connect(config: &Config) -> Self {
        match config.connection.protocol {
            Protocol::Ftp => Self::spawn(
                FtpClient::new(&config.connection),
                FtpClient::new(&config.connection),
                config,
            ),
            Protocol::Sftp => Self::spawn(
                SftpClient::new(&config.connection),
                SftpClient::new(&config.connection),
                config,
            ),
        }
    }

    /// Spawn the workers over caller-supplied clients. The two clients may
    /// be different bindings; each worker owns its session exclusively.
    pub fn spawn<S, F>(series_client: S, slice_client: F, config: &Config) -> Self
    where
        S: ScannerClient + Send + 'static,
        F: ScannerClient + Send + 'static,
    {
        let (series_tx, series_rx) = unbounded();
        let (slice_tx, slice_rx) = unbounded();
        let (volume_tx, volume_rx) = unbounded();
        let halt = Arc::new(AtomicBool::new(false));

        let series_opts = SeriesFinderOpts {
            interval: config.polling.interval(),
            skip_count: config.polling.skip_series,
            min_timepoints: config.polling.timeseries_min_timepoints,
        };
        let dicom_opts = DicomFinderOpts {
            interval: config.polling.interval(),
        };
        let volumizer_opts = VolumizerOpts {
            interval: config.polling.interval(),
            pop_timeout: config.polling.pop_timeout(),
        };

        let mut handles = Vec::with_capacity(3);
        handles.push({
            let halt = Arc::clone(&halt);
            std::thread::spawn(move || {
                let mut client = series_client;
                series_finder(&mut client, &series_tx, &halt, &series_opts);
                client.close();
            })
        });
        handles.push({
            let halt = Arc::clone(&halt);
            std::thread::spawn(move || {
                let mut client = slice_client;
                dicom_finder(&mut client, &series_rx, &slice_tx, &halt, &dicom_opts);
                client.close();
            })
        });
        handles.push({
            let halt = Arc::clone(&halt);
            std::thread::spawn(move || volumizer(&slice_rx, &volume_tx, &halt, &volumizer_opts))
        });

        Self {
            halt,
            handles,
            volume_rx,
        }
    }

    /// The downstream end of the pipeline.
    pub fn volumes(&self) -> &Receiver<Volume> {
        &self.volume_rx
    }

    /// Ask every worker to stop and wait for them. Cooperative: takes
    /// effect within one polling interval plus any in-flight transfer.
    pub fn halt(mut self) {
        self.halt.store(true, Ordering::Relaxed);
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("pipeline worker panicked");
            }
        }
    }
}
