//! Whisper time-series file backend.
//!
//! File layout (all integers big-endian):
//!
//! ```text
//! [metadata]     aggregation type u32, max retention u32, xFilesFactor f32, archive count u32
//! [archive info] offset u32, seconds per point u32, points u32   (one per archive)
//! [archives]     points of (interval u32, value f64), circular
//! ```
//!
//! An update writes the point into the finest archive whose retention covers
//! the point's age, then propagates an aggregate into each coarser archive as
//! long as enough of the underlying points are known (`xFilesFactor`).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};

use crate::storage::BackendError;
use crate::storage::backend::{TimeSeries, TimeSeriesBackend};
use crate::storage::types::{AggregationMethod, Point, Retention};

/// File suffix for series files.
pub const FILE_SUFFIX: &str = "wsp";

const METADATA_SIZE: u64 = 16;
const ARCHIVE_INFO_SIZE: u64 = 12;
const POINT_SIZE: u64 = 12;

/// Source of "now" in unix seconds.
pub type Clock = fn() -> i64;

fn system_clock() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Backend producing [`WhisperFile`] handles.
#[derive(Debug, Clone)]
pub struct WhisperBackend {
    clock: Clock,
}

impl Default for WhisperBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl WhisperBackend {
    /// Backend using the system clock.
    pub fn new() -> Self {
        Self {
            clock: system_clock,
        }
    }

    /// Backend using a fixed clock; points are validated against it.
    pub fn with_clock(clock: Clock) -> Self {
        Self { clock }
    }
}

impl TimeSeriesBackend for WhisperBackend {
    type Series = WhisperFile;

    fn open(&self, path: &Path) -> Result<WhisperFile, BackendError> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let header = Header::read(&mut file)?;
        Ok(WhisperFile {
            file,
            header,
            path: path.to_path_buf(),
            clock: self.clock,
        })
    }

    fn create(
        &self,
        path: &Path,
        retentions: &[Retention],
        method: AggregationMethod,
        x_files_factor: f32,
    ) -> Result<WhisperFile, BackendError> {
        validate_archives(retentions)?;
        if !(0.0..=1.0).contains(&x_files_factor) {
            return Err(BackendError::InvalidXFilesFactor(x_files_factor));
        }

        let header = Header::new(retentions, method, x_files_factor);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        // Zero-filled archives; an interval of 0 marks an empty slot.
        let init = header
            .write(&mut file)
            .and_then(|()| file.set_len(header.file_size()).map_err(BackendError::from));
        discard_partial(path, init)?;

        tracing::trace!(path = %path.display(), size = header.file_size(), "Created whisper file");

        Ok(WhisperFile {
            file,
            header,
            path: path.to_path_buf(),
            clock: self.clock,
        })
    }
}

/// Archive location and shape inside a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ArchiveInfo {
    offset: u32,
    seconds_per_point: u32,
    points: u32,
}

impl ArchiveInfo {
    fn retention(&self) -> i64 {
        i64::from(self.seconds_per_point) * i64::from(self.points)
    }

    fn size(&self) -> u64 {
        u64::from(self.points) * POINT_SIZE
    }

    fn interval_of(&self, timestamp: i64) -> i64 {
        timestamp - timestamp.rem_euclid(i64::from(self.seconds_per_point))
    }
}

/// Parsed file header.
#[derive(Debug, Clone, PartialEq)]
struct Header {
    method: AggregationMethod,
    max_retention: u32,
    x_files_factor: f32,
    archives: Vec<ArchiveInfo>,
}

impl Header {
    fn new(retentions: &[Retention], method: AggregationMethod, x_files_factor: f32) -> Self {
        let mut offset = METADATA_SIZE + ARCHIVE_INFO_SIZE * retentions.len() as u64;
        let archives = retentions
            .iter()
            .map(|r| {
                let info = ArchiveInfo {
                    offset: offset as u32,
                    seconds_per_point: r.seconds_per_point,
                    points: r.points,
                };
                offset += info.size();
                info
            })
            .collect::<Vec<_>>();
        let max_retention = retentions
            .iter()
            .map(Retention::retention)
            .max()
            .unwrap_or(0)
            .min(u64::from(u32::MAX)) as u32;

        Self {
            method,
            max_retention,
            x_files_factor,
            archives,
        }
    }

    fn file_size(&self) -> u64 {
        self.archives
            .last()
            .map(|a| u64::from(a.offset) + a.size())
            .unwrap_or(METADATA_SIZE)
    }

    fn read(file: &mut File) -> Result<Self, BackendError> {
        let corrupt = |e: std::io::Error| BackendError::Corrupt(format!("unreadable header: {e}"));

        file.seek(SeekFrom::Start(0))?;
        let code = file.read_u32::<BigEndian>().map_err(corrupt)?;
        let max_retention = file.read_u32::<BigEndian>().map_err(corrupt)?;
        let x_files_factor = file.read_f32::<BigEndian>().map_err(corrupt)?;
        let count = file.read_u32::<BigEndian>().map_err(corrupt)?;

        let method = AggregationMethod::from_code(code)
            .ok_or_else(|| BackendError::Corrupt(format!("unknown aggregation type {code}")))?;
        if count == 0 {
            return Err(BackendError::Corrupt("file has no archives".to_string()));
        }

        let file_len = file.metadata()?.len();
        if METADATA_SIZE + ARCHIVE_INFO_SIZE * u64::from(count) > file_len {
            return Err(BackendError::Corrupt(format!(
                "archive count {count} exceeds file size {file_len}"
            )));
        }

        let mut archives = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let info = ArchiveInfo {
                offset: file.read_u32::<BigEndian>().map_err(corrupt)?,
                seconds_per_point: file.read_u32::<BigEndian>().map_err(corrupt)?,
                points: file.read_u32::<BigEndian>().map_err(corrupt)?,
            };
            if info.seconds_per_point == 0
                || info.points == 0
                || u64::from(info.offset) + info.size() > file_len
            {
                return Err(BackendError::Corrupt(format!(
                    "archive {:?} out of bounds (file size {file_len})",
                    info
                )));
            }
            archives.push(info);
        }

        let retentions: Vec<Retention> = archives
            .iter()
            .map(|a| Retention::new(a.seconds_per_point, a.points))
            .collect();
        validate_archives(&retentions).map_err(|e| BackendError::Corrupt(e.to_string()))?;

        Ok(Self {
            method,
            max_retention,
            x_files_factor,
            archives,
        })
    }

    fn write(&self, file: &mut File) -> Result<(), BackendError> {
        let mut buf = Vec::with_capacity(
            (METADATA_SIZE + ARCHIVE_INFO_SIZE * self.archives.len() as u64) as usize,
        );
        buf.write_u32::<BigEndian>(self.method.code())?;
        buf.write_u32::<BigEndian>(self.max_retention)?;
        buf.write_f32::<BigEndian>(self.x_files_factor)?;
        buf.write_u32::<BigEndian>(self.archives.len() as u32)?;
        for archive in &self.archives {
            buf.write_u32::<BigEndian>(archive.offset)?;
            buf.write_u32::<BigEndian>(archive.seconds_per_point)?;
            buf.write_u32::<BigEndian>(archive.points)?;
        }

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&buf)?;
        Ok(())
    }
}

/// Remove a file left half-written by a failed create.
fn discard_partial<T>(path: &Path, result: Result<T, BackendError>) -> Result<T, BackendError> {
    if result.is_err()
        && let Err(e) = std::fs::remove_file(path)
    {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial whisper file");
    }
    result
}

/// Check the archive list the same way the reference Whisper tooling does.
///
/// Applied on create and again to every header read from disk.
fn validate_archives(retentions: &[Retention]) -> Result<(), BackendError> {
    if retentions.is_empty() {
        return Err(BackendError::InvalidArchives(
            "at least one archive is required".to_string(),
        ));
    }

    for (i, pair) in retentions.windows(2).enumerate() {
        let (finer, coarser) = (pair[0], pair[1]);
        if finer.seconds_per_point >= coarser.seconds_per_point {
            return Err(BackendError::InvalidArchives(format!(
                "archive {i} precision {}s is not finer than archive {} precision {}s",
                finer.seconds_per_point,
                i + 1,
                coarser.seconds_per_point
            )));
        }
        if coarser.seconds_per_point % finer.seconds_per_point != 0 {
            return Err(BackendError::InvalidArchives(format!(
                "archive {} precision {}s is not a multiple of archive {i} precision {}s",
                i + 1,
                coarser.seconds_per_point,
                finer.seconds_per_point
            )));
        }
        if finer.retention() >= coarser.retention() {
            return Err(BackendError::InvalidArchives(format!(
                "archive {} must cover a longer span than archive {i}",
                i + 1
            )));
        }
        let points_per_consolidation = coarser.seconds_per_point / finer.seconds_per_point;
        if finer.points < points_per_consolidation {
            return Err(BackendError::InvalidArchives(format!(
                "archive {i} needs at least {points_per_consolidation} points to consolidate into archive {}",
                i + 1
            )));
        }
    }

    let size = Header::new(retentions, AggregationMethod::Average, 0.5).file_size();
    if size > u64::from(u32::MAX) {
        return Err(BackendError::InvalidArchives(format!(
            "file would be {size} bytes, offsets must fit in 32 bits"
        )));
    }

    Ok(())
}

/// An open Whisper file.
#[derive(Debug)]
pub struct WhisperFile {
    file: File,
    header: Header,
    path: PathBuf,
    clock: Clock,
}

impl WhisperFile {
    /// Path the handle was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Aggregation method fixed at creation time.
    pub fn aggregation_method(&self) -> AggregationMethod {
        self.header.method
    }

    /// xFilesFactor fixed at creation time.
    pub fn x_files_factor(&self) -> f32 {
        self.header.x_files_factor
    }

    /// Archive definitions, finest first.
    pub fn retentions(&self) -> Vec<Retention> {
        self.header
            .archives
            .iter()
            .map(|a| Retention::new(a.seconds_per_point, a.points))
            .collect()
    }

    fn read_point(&mut self, offset: u64) -> Result<Point, BackendError> {
        let mut buf = [0u8; POINT_SIZE as usize];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(decode_point(&buf))
    }

    fn write_point(&mut self, offset: u64, point: Point) -> Result<(), BackendError> {
        let mut buf = [0u8; POINT_SIZE as usize];
        BigEndian::write_u32(&mut buf[0..4], point.interval);
        BigEndian::write_f64(&mut buf[4..12], point.value);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&buf)?;
        Ok(())
    }

    /// Byte offset of `interval` within `archive`, anchored on its first slot.
    fn slot_offset(&mut self, archive: ArchiveInfo, interval: i64) -> Result<u64, BackendError> {
        let base = self.read_point(u64::from(archive.offset))?;
        if base.interval == 0 {
            return Ok(u64::from(archive.offset));
        }
        let distance = (interval - i64::from(base.interval)) / i64::from(archive.seconds_per_point);
        let slot = distance.rem_euclid(i64::from(archive.points)) as u64;
        Ok(u64::from(archive.offset) + slot * POINT_SIZE)
    }

    /// Read `count` consecutive slots starting at `offset`, wrapping at the archive end.
    fn read_slots(
        &mut self,
        archive: ArchiveInfo,
        offset: u64,
        count: u64,
    ) -> Result<Vec<Point>, BackendError> {
        if count > u64::from(archive.points) {
            return Err(BackendError::Corrupt(format!(
                "{count} slots requested from an archive of {} points",
                archive.points
            )));
        }
        let archive_end = u64::from(archive.offset) + archive.size();
        let wanted = count * POINT_SIZE;
        let mut buf = vec![0u8; wanted as usize];

        let first_len = wanted.min(archive_end - offset);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf[..first_len as usize])?;
        if first_len < wanted {
            self.file.seek(SeekFrom::Start(u64::from(archive.offset)))?;
            self.file.read_exact(&mut buf[first_len as usize..])?;
        }

        Ok(buf.chunks_exact(POINT_SIZE as usize).map(decode_point).collect())
    }

    /// Aggregate the points of `higher` covering the `lower` slot that contains
    /// `timestamp`, and write the result. Returns false when propagation stops.
    fn propagate(
        &mut self,
        timestamp: i64,
        higher: ArchiveInfo,
        lower: ArchiveInfo,
    ) -> Result<bool, BackendError> {
        let lower_interval = lower.interval_of(timestamp);
        let start = self.slot_offset(higher, lower_interval)?;
        let count = u64::from(lower.seconds_per_point / higher.seconds_per_point);
        let points = self.read_slots(higher, start, count)?;

        let known: Vec<f64> = points
            .iter()
            .enumerate()
            .filter(|(i, p)| {
                i64::from(p.interval) == lower_interval + *i as i64 * i64::from(higher.seconds_per_point)
            })
            .map(|(_, p)| p.value)
            .collect();

        if known.is_empty() || (known.len() as f32 / count as f32) < self.header.x_files_factor {
            return Ok(false);
        }
        let Some(value) = self.header.method.aggregate(&known) else {
            return Ok(false);
        };

        let offset = self.slot_offset(lower, lower_interval)?;
        self.write_point(
            offset,
            Point {
                interval: lower_interval as u32,
                value,
            },
        )?;
        Ok(true)
    }

    /// Points stored in archive `index` in slot order, skipping empty slots.
    pub fn points(&mut self, index: usize) -> Result<Vec<Point>, BackendError> {
        let archive = *self.header.archives.get(index).ok_or_else(|| {
            BackendError::InvalidArchives(format!("no archive at index {index}"))
        })?;
        let points =
            self.read_slots(archive, u64::from(archive.offset), u64::from(archive.points))?;
        Ok(points.into_iter().filter(|p| p.interval != 0).collect())
    }
}

impl TimeSeries for WhisperFile {
    fn update(&mut self, value: f64, timestamp: i64) -> Result<(), BackendError> {
        let now = (self.clock)();
        let age = now - timestamp;
        if timestamp <= 0
            || timestamp > i64::from(u32::MAX)
            || age < 0
            || age >= i64::from(self.header.max_retention)
        {
            return Err(BackendError::TimestampNotCovered { timestamp, now });
        }

        let archives = self.header.archives.clone();
        let Some(index) = archives.iter().position(|a| a.retention() > age) else {
            return Err(BackendError::TimestampNotCovered { timestamp, now });
        };

        let archive = archives[index];
        let interval = archive.interval_of(timestamp);
        let offset = self.slot_offset(archive, interval)?;
        self.write_point(
            offset,
            Point {
                interval: interval as u32,
                value,
            },
        )?;

        let mut higher = archive;
        for &lower in &archives[index + 1..] {
            if !self.propagate(timestamp, higher, lower)? {
                break;
            }
            higher = lower;
        }

        Ok(())
    }

    fn close(self) -> Result<(), BackendError> {
        drop(self.file);
        Ok(())
    }
}

fn decode_point(buf: &[u8]) -> Point {
    Point {
        interval: BigEndian::read_u32(&buf[0..4]),
        value: BigEndian::read_f64(&buf[4..12]),
    }
}
