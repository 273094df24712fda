use crate::slice::{DicomSlice, SliceError};

use chrono::{Datelike, Duration as TimeDelta, Local, NaiveDateTime};
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected to the scanner")]
    Disconnected,

    #[error("directory is empty: {0}")]
    EmptyDirectory(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FTP error: {0}")]
    Ftp(#[from] suppaftp::FtpError),

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("slice decode error: {0}")]
    Slice(#[from] SliceError),
}

/// One entry of a remote directory listing.
///
/// `recency` is a total order over entries by arrival recency. The derived
/// ordering compares `(recency, size, name)` so that sorting a listing
/// yields oldest-first, most-recent-last.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirectoryEntry {
    pub recency: NaiveDateTime,
    pub size: u64,
    pub name: String,
}

/// Summary of a series directory, decoded from its first file.
#[derive(Debug, Clone)]
pub struct SeriesInfo {
    pub path: String,
    pub series_number: i32,
    pub description: String,
    pub datetime: Option<NaiveDateTime>,
    pub num_timepoints: u32,
    pub num_files: usize,
}

/// Protocol-level access to the scanner's image store.
///
/// Implementors provide the low-level operations (`reconnect`, `list_dir`,
/// `retrieve_file`); directory navigation and series inspection are
/// provided on top of them. `list_dir` must return entries in acquisition
/// recency order, most recent last (see [`DirectoryEntry`]).
pub trait ScannerClient {
    /// Re-establish the session if it was dropped. Idempotent: probes the
    /// live session with a cheap operation and only re-dials on failure.
    fn reconnect(&mut self) -> Result<(), ClientError>;

    /// List a directory in acquisition-recency order.
    fn list_dir(&mut self, path: &str) -> Result<Vec<DirectoryEntry>, ClientError>;

    /// Fetch the raw bytes of a remote file.
    fn retrieve_file(&mut self, path: &str) -> Result<Vec<u8>, ClientError>;

    /// Root of the image store on the remote host.
    fn base_dir(&self) -> &str;

    /// Close the session, if one exists.
    fn close(&mut self);

    /// Fetch a remote file and decode it as a DICOM slice.
    fn retrieve_slice(&mut self, path: &str) -> Result<DicomSlice, ClientError> {
        let bytes = self.retrieve_file(path)?;
        Ok(DicomSlice::decode(&bytes)?)
    }

    /// Path of the most recent entry in `dir`.
    fn latest_entry(&mut self, dir: &str) -> Result<String, ClientError> {
        let contents = self.list_dir(dir)?;
        let latest = contents
            .last()
            .ok_or_else(|| ClientError::EmptyDirectory(dir.to_string()))?;
        Ok(join_path(dir, &latest.name))
    }

    /// Path of the most recent exam directory, two levels below the root.
    fn latest_exam(&mut self) -> Result<String, ClientError> {
        let base_dir = self.base_dir().to_string();
        let latest_patient = self.latest_entry(&base_dir)?;
        self.latest_entry(&latest_patient)
    }

    /// Path of the most recent series directory, three levels below the root.
    fn latest_series(&mut self) -> Result<String, ClientError> {
        let latest_exam = self.latest_exam()?;
        self.latest_entry(&latest_exam)
    }

    /// All series directories under the most recent exam.
    fn series_dirs(&mut self) -> Result<Vec<String>, ClientError> {
        let exam_dir = self.latest_exam()?;
        let contents = self.list_dir(&exam_dir)?;
        Ok(contents
            .iter()
            .map(|entry| join_path(&exam_dir, &entry.name))
            .collect())
    }

    /// All file paths in a series directory, recency order.
    fn series_files(&mut self, series_dir: &str) -> Result<Vec<String>, ClientError> {
        let contents = self.list_dir(series_dir)?;
        Ok(contents
            .iter()
            .map(|entry| join_path(series_dir, &entry.name))
            .collect())
    }

    /// Summarize a series from its first file. Returns `None` when the
    /// directory is still empty, which happens when a series is polled
    /// right after the scanner created it.
    fn series_info(&mut self, series_dir: &str) -> Result<Option<SeriesInfo>, ClientError> {
        let contents = self.list_dir(series_dir)?;
        let Some(first) = contents.first() else {
            return Ok(None);
        };

        let num_files = contents.len();
        let first_path = join_path(series_dir, &first.name);
        let slice = self.retrieve_slice(&first_path)?;

        Ok(Some(SeriesInfo {
            path: series_dir.to_string(),
            series_number: slice.identity.series,
            description: slice.series_description.clone(),
            datetime: slice.study_datetime,
            num_timepoints: slice.num_timepoints,
            num_files,
        }))
    }
}

/// Join a remote (unix-style) directory and an entry name.
pub fn join_path(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

/// True for hidden files and OS-generated junk that must never reach the
/// pipeline.
pub fn is_junk_name(name: &str) -> bool {
    name.starts_with('.') || name.contains(".DS_Store")
}

/// Compare two filenames respecting embedded integer runs.
///
/// Scanner filenames are numerically sequential but not zero-padded, so a
/// plain lexicographic sort puts `i100.dcm` before `i11.dcm`. This
/// comparison treats each run of digits as one number.
pub fn alphanumeric_cmp(a: &str, b: &str) -> Ordering {
    let mut left = split_alphanumeric(a).into_iter();
    let mut right = split_alphanumeric(b).into_iter();
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match x.cmp(&y) {
                Ordering::Equal => continue,
                other => return other,
            },
        }
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Chunk {
    // Numbers order before text so that "1a" < "a1", mirroring how
    // int-vs-str tuples would compare; the distinction never matters for
    // scanner names, which share a common textual shape.
    Number(u64),
    Text(String),
}

fn split_alphanumeric(name: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut digits = String::new();
    let mut text = String::new();
    for c in name.chars() {
        if c.is_ascii_digit() {
            if !text.is_empty() {
                chunks.push(Chunk::Text(std::mem::take(&mut text)));
            }
            digits.push(c);
        } else {
            if !digits.is_empty() {
                let value = digits.parse().unwrap_or(u64::MAX);
                chunks.push(Chunk::Number(value));
                digits.clear();
            }
            text.push(c);
        }
    }
    if !digits.is_empty() {
        chunks.push(Chunk::Number(digits.parse().unwrap_or(u64::MAX)));
    }
    if !text.is_empty() {
        chunks.push(Chunk::Text(text));
    }
    chunks
}

/// Parse UNIX-style `LIST` output into recency-ordered entries.
///
/// The server only reports timestamps at minute resolution, so after the
/// alphanumeric sort a strictly increasing microsecond component is
/// synthesized from list position to recover intra-minute order. Entries
/// whose time column holds a year instead of `HH:MM` are more than a year
/// old and irrelevant to a real-time feed, so they are dropped. (Around a
/// year boundary this heuristic misorders files that survived on the
/// scanner for months; in practice the scanner never keeps files that
/// long.)
pub fn parse_unix_listing(lines: &[String]) -> Vec<DirectoryEntry> {
    let mut lines: Vec<&String> = lines
        .iter()
        .filter(|line| {
            line.split_whitespace()
                .last()
                .is_some_and(|name| !is_junk_name(name))
        })
        .collect();
    lines.sort_by(|a, b| {
        let name_a = a.split_whitespace().last().unwrap_or("");
        let name_b = b.split_whitespace().last().unwrap_or("");
        alphanumeric_cmp(name_a, name_b)
    });

    let year = Local::now().year();
    let mut entries = Vec::with_capacity(lines.len());
    for (index, line) in lines.iter().enumerate() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let &[_, _, _, _, size, month, day, time, name] = fields.as_slice() else {
            tracing::debug!(line = %line, "skipping unparseable listing line");
            continue;
        };
        if !time.contains(':') {
            continue;
        }
        let stamp = format!("{year} {month} {day} {time}");
        let Ok(recency) = NaiveDateTime::parse_from_str(&stamp, "%Y %b %d %H:%M") else {
            tracing::debug!(line = %line, "skipping listing line with bad timestamp");
            continue;
        };
        let Ok(size) = size.parse() else {
            tracing::debug!(line = %line, "skipping listing line with bad size");
            continue;
        };
        entries.push(DirectoryEntry {
            recency: recency + TimeDelta::microseconds(index as i64 + 1),
            size,
            name: name.to_string(),
        });
    }

    entries.sort();
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ls_line(name: &str, time: &str) -> String {
        format!("-rw-r--r-- 1 sdc sdc 131072 Nov 15 {time} {name}")
    }

    #[test]
    fn alphanumeric_sort_respects_integer_runs() {
        let mut names = vec!["f1.dcm", "f10.dcm", "f2.dcm"];
        names.sort_by(|a, b| alphanumeric_cmp(a, b));
        assert_eq!(names, vec!["f1.dcm", "f2.dcm", "f10.dcm"]);
    }

    #[test]
    fn alphanumeric_sort_handles_long_sequences() {
        let mut names = vec!["i11.MRDC.11", "i100.MRDC.100", "i2.MRDC.2"];
        names.sort_by(|a, b| alphanumeric_cmp(a, b));
        assert_eq!(names, vec!["i2.MRDC.2", "i11.MRDC.11", "i100.MRDC.100"]);
    }

    #[test]
    fn same_minute_entries_keep_listing_order() {
        let lines: Vec<String> = ["i1.dcm", "i2.dcm", "i3.dcm", "i10.dcm"]
            .iter()
            .map(|name| ls_line(name, "12:34"))
            .collect();
        let entries = parse_unix_listing(&lines);
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["i1.dcm", "i2.dcm", "i3.dcm", "i10.dcm"]);
        // Synthesized keys are strictly increasing.
        for pair in entries.windows(2) {
            assert!(pair[0].recency < pair[1].recency);
        }
    }

    #[test]
    fn listing_is_sorted_by_recency_across_minutes() {
        let lines = vec![ls_line("late.dcm", "12:35"), ls_line("early.dcm", "12:34")];
        let entries = parse_unix_listing(&lines);
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["early.dcm", "late.dcm"]);
    }

    #[test]
    fn hidden_and_junk_entries_are_dropped() {
        let lines = vec![
            ls_line(".hidden", "12:34"),
            ls_line(".DS_Store", "12:34"),
            ls_line("i1.dcm", "12:34"),
        ];
        let entries = parse_unix_listing(&lines);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "i1.dcm");
    }

    #[test]
    fn entries_older_than_a_year_are_dropped() {
        // ls prints a year instead of HH:MM for old entries.
        let lines = vec![ls_line("stale.dcm", "2013"), ls_line("fresh.dcm", "12:34")];
        let entries = parse_unix_listing(&lines);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "fresh.dcm");
    }

    #[test]
    fn listing_sizes_are_parsed() {
        let entries = parse_unix_listing(&[ls_line("i1.dcm", "12:34")]);
        assert_eq!(entries[0].size, 131072);
    }

    #[test]
    fn join_path_normalizes_trailing_slash() {
        assert_eq!(join_path("/images/p1/e1/", "s1"), "/images/p1/e1/s1");
        assert_eq!(join_path("/images/p1/e1", "s1"), "/images/p1/e1/s1");
    }
}
