//! # dicom-stream
//!
//! Real-time acquisition pipeline for MRI scanners that expose their
//! output as a directory tree of DICOM files over FTP or SFTP.
//!
//! The scanner offers no push notification, so new data is discovered by
//! polling. Three workers run concurrently, connected by FIFO queues:
//!
//! - a series finder polls the latest exam for new series directories and
//!   queues the ones that look like time-series acquisitions,
//! - a DICOM finder polls the current series for files it has not seen,
//!   fetches and decodes each one, and queues the slices,
//! - a volumizer groups slices by their (exam, series, acquisition)
//!   identity, reorders them by instance number, and emits complete 3D
//!   volumes.
//!
//! Slices arrive in no guaranteed order and polls overlap, so the
//! volumizer pools slices until a contiguous instance-number block is
//! complete; a consumer draining the volume queue never sees a partial or
//! duplicated volume. Transient network failures degrade throughput but
//! never stop the pipeline: every session is re-established on the next
//! poll.
//!
//! # Examples
//!
//! ```no_run
//! # use dicom_stream::{Config, Pipeline};
//! let config = Config::load("scanner.toml").expect("should have loaded config");
//! let pipeline = Pipeline::connect(&config);
//! for volume in pipeline.volumes().iter() {
//!     println!(
//!         "exam {} series {} acquisition {}: {:?}",
//!         volume.exam,
//!         volume.series,
//!         volume.acquisition,
//!         volume.dim()
//!     );
//! }
//! ```

pub mod client;
pub mod config;
pub mod finders;
pub mod ftp;
pub mod pipeline;
pub mod sftp;
pub mod slice;
pub mod volume;
pub mod volumizer;

pub use client::{ClientError, DirectoryEntry, ScannerClient, SeriesInfo};
pub use config::{Config, Protocol};
pub use pipeline::Pipeline;
pub use slice::{AcquisitionId, DicomSlice, SliceError};
pub use volume::Volume;
