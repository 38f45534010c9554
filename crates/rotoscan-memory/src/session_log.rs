//! Append-only session log.
//!
//! Every frame accepted during a sweep is written, in ingest order, to a
//! local SQLite file whose name is derived by [`LogName`].  Opening a log
//! for writing truncates any earlier content so reruns with the same
//! configuration overwrite their previous output.
//!
//! # Storage layout
//!
//! A single table `sweep_frames`:
//!
//! | column      | type    | description                                      |
//! |-------------|---------|--------------------------------------------------|
//! | seq         | INTEGER | Insertion order (primary key)                    |
//! | scan_index  | INTEGER | Scan index the frame was swept with              |
//! | angle_rad   | REAL    | Sweep angle of the frame                         |
//! | header_seq  | INTEGER | Sequence number from the frame header            |
//! | stamp       | TEXT    | RFC-3339 acquisition time (UTC)                  |
//! | frame_id    | TEXT    | Reference frame name                             |
//! | point_count | INTEGER | Number of points in `points`                     |
//! | points      | BLOB    | Little-endian `x, y, z: f64`, `extra: [f32; 2]`  |
//!
//! # Example
//!
//! ```rust
//! use rotoscan_memory::session_log::SessionLog;
//! use rotoscan_kernel::SessionSink;
//! use rotoscan_types::{CloudFrame, FrameHeader, Point3D};
//!
//! let mut log = SessionLog::open_in_memory().unwrap();
//! let cloud = CloudFrame {
//!     header: FrameHeader::new(1, "laser"),
//!     points: vec![Point3D::new(2.0, 0.04, 1.0, [0.0, 0.0])],
//! };
//! log.append(&cloud, 0, 0.0).unwrap();
//!
//! let frames = log.frames().unwrap();
//! assert_eq!(frames.len(), 1);
//! assert_eq!(frames[0].cloud.points, cloud.points);
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rotoscan_kernel::{SessionSink, SinkFactory};
use rotoscan_perception::ReferenceModel;
use rotoscan_types::{CloudFrame, FrameHeader, HeightAxis, Point3D, RotoError};
use rusqlite::{Connection, OpenFlags, params};
use thiserror::Error;
use tracing::{debug, info};

use crate::naming::LogName;

/// Bytes per encoded point: three `f64` coordinates and two `f32` payloads.
const POINT_BYTES: usize = 3 * 8 + 2 * 4;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from session log operations.
#[derive(Error, Debug)]
pub enum SessionLogError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Session log is already closed")]
    Closed,
    #[error("Corrupt record {seq}: {details}")]
    Corrupt { seq: i64, details: String },
    #[error("Frame {index} not found ({available} frames logged)")]
    FrameNotFound { index: usize, available: usize },
}

impl From<SessionLogError> for RotoError {
    fn from(e: SessionLogError) -> Self {
        RotoError::Persistence(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LoggedFrame
// ─────────────────────────────────────────────────────────────────────────────

/// One frame read back from a session log.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedFrame {
    pub scan_index: u64,
    pub angle_rad: f64,
    pub cloud: CloudFrame,
}

// ─────────────────────────────────────────────────────────────────────────────
// Point serialisation helpers
// ─────────────────────────────────────────────────────────────────────────────

fn points_to_bytes(points: &[Point3D]) -> Vec<u8> {
    let mut out = Vec::with_capacity(points.len() * POINT_BYTES);
    for p in points {
        out.extend_from_slice(&p.x.to_le_bytes());
        out.extend_from_slice(&p.y.to_le_bytes());
        out.extend_from_slice(&p.z.to_le_bytes());
        out.extend_from_slice(&p.extra[0].to_le_bytes());
        out.extend_from_slice(&p.extra[1].to_le_bytes());
    }
    out
}

fn bytes_to_points(bytes: &[u8]) -> Option<Vec<Point3D>> {
    if bytes.len() % POINT_BYTES != 0 {
        return None;
    }
    let f64_at = |c: &[u8], o: usize| f64::from_le_bytes(c[o..o + 8].try_into().unwrap_or([0; 8]));
    let f32_at = |c: &[u8], o: usize| f32::from_le_bytes(c[o..o + 4].try_into().unwrap_or([0; 4]));
    Some(
        bytes
            .chunks_exact(POINT_BYTES)
            .map(|c| Point3D::new(f64_at(c, 0), f64_at(c, 8), f64_at(c, 16), [f32_at(c, 24), f32_at(c, 28)]))
            .collect(),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionLog
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed append-only log of one sweep session.
pub struct SessionLog {
    id: String,
    /// `None` once closed.
    conn: Option<Connection>,
}

impl SessionLog {
    /// Create (or truncate) the log at `path` for writing.
    pub fn create(path: &Path) -> Result<Self, SessionLogError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("DROP TABLE IF EXISTS sweep_frames;")?;
        let log = Self {
            id: path.display().to_string(),
            conn: Some(conn),
        };
        log.init_schema()?;
        info!(log = %log.id, "session log opened");
        Ok(log)
    }

    /// Open a temporary in-memory log (useful for testing).
    pub fn open_in_memory() -> Result<Self, SessionLogError> {
        let log = Self {
            id: ":memory:".to_string(),
            conn: Some(Connection::open_in_memory()?),
        };
        log.init_schema()?;
        Ok(log)
    }

    fn init_schema(&self) -> Result<(), SessionLogError> {
        self.conn()?.execute_batch(
            "CREATE TABLE IF NOT EXISTS sweep_frames (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                scan_index  INTEGER NOT NULL,
                angle_rad   REAL    NOT NULL,
                header_seq  INTEGER NOT NULL,
                stamp       TEXT    NOT NULL,
                frame_id    TEXT    NOT NULL,
                point_count INTEGER NOT NULL,
                points      BLOB    NOT NULL
            );",
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<&Connection, SessionLogError> {
        self.conn.as_ref().ok_or(SessionLogError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    /// Append one frame.
    pub fn write_frame(
        &self,
        cloud: &CloudFrame,
        scan_index: u64,
        angle_rad: f64,
    ) -> Result<(), SessionLogError> {
        self.conn()?.execute(
            "INSERT INTO sweep_frames
                 (scan_index, angle_rad, header_seq, stamp, frame_id, point_count, points)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                scan_index as i64,
                angle_rad,
                cloud.header.seq as i64,
                cloud.header.stamp.to_rfc3339(),
                cloud.header.frame_id,
                cloud.points.len() as i64,
                points_to_bytes(&cloud.points),
            ],
        )?;
        Ok(())
    }

    /// Every logged frame in insertion order.
    pub fn frames(&self) -> Result<Vec<LoggedFrame>, SessionLogError> {
        read_all(self.conn()?)
    }

    /// Read every frame of the log stored at `path`.
    ///
    /// The file is opened read-only; a missing file is an error.
    pub fn read_frames(path: &Path) -> Result<Vec<LoggedFrame>, SessionLogError> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        read_all(&conn)
    }

    /// Load one logged frame of `path` as a reference height profile.
    ///
    /// The frame's points are rotated back by its logged sweep angle, so the
    /// profile lines up with the heights of a raw frame.
    pub fn load_reference(
        path: &Path,
        frame_index: usize,
        axis: HeightAxis,
    ) -> Result<ReferenceModel, SessionLogError> {
        let frames = Self::read_frames(path)?;
        let available = frames.len();
        let frame = frames.into_iter().nth(frame_index).ok_or(SessionLogError::FrameNotFound {
            index: frame_index,
            available,
        })?;
        debug!(path = %path.display(), frame_index, points = frame.cloud.points.len(), "reference loaded");
        Ok(ReferenceModel::from_swept_points(
            &frame.cloud.points,
            frame.angle_rad,
            axis,
        ))
    }
}

fn read_all(conn: &Connection) -> Result<Vec<LoggedFrame>, SessionLogError> {
    let mut stmt = conn.prepare(
        "SELECT seq, scan_index, angle_rad, header_seq, stamp, frame_id, points
         FROM sweep_frames
         ORDER BY seq ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, f64>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, Vec<u8>>(6)?,
        ))
    })?;

    let mut frames = Vec::new();
    for row in rows {
        let (seq, scan_index, angle_rad, header_seq, stamp, frame_id, blob) = row?;
        let stamp = stamp
            .parse::<DateTime<Utc>>()
            .map_err(|e| SessionLogError::Corrupt { seq, details: e.to_string() })?;
        let points = bytes_to_points(&blob).ok_or_else(|| SessionLogError::Corrupt {
            seq,
            details: format!("point blob of {} bytes", blob.len()),
        })?;
        frames.push(LoggedFrame {
            scan_index: scan_index as u64,
            angle_rad,
            cloud: CloudFrame {
                header: FrameHeader {
                    seq: header_seq as u64,
                    stamp,
                    frame_id,
                },
                points,
            },
        });
    }
    Ok(frames)
}

impl SessionSink for SessionLog {
    fn id(&self) -> &str {
        &self.id
    }

    fn append(&mut self, cloud: &CloudFrame, scan_index: u64, angle_rad: f64) -> Result<(), RotoError> {
        Ok(self.write_frame(cloud, scan_index, angle_rad)?)
    }

    /// Closing an already closed log is a no-op.
    fn close(&mut self) -> Result<(), RotoError> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| SessionLogError::from(e))?;
            info!(log = %self.id, "session log closed");
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionLogFactory
// ─────────────────────────────────────────────────────────────────────────────

/// Opens one [`SessionLog`] per session under `dir`.
#[derive(Debug, Clone)]
pub struct SessionLogFactory {
    dir: PathBuf,
    name: LogName,
    separate_models: bool,
}

impl SessionLogFactory {
    pub fn new(dir: impl Into<PathBuf>, name: LogName, separate_models: bool) -> Self {
        Self {
            dir: dir.into(),
            name,
            separate_models,
        }
    }

    /// Path of the log for the given model counter.
    pub fn path_for(&self, model_index: u32) -> PathBuf {
        let model = self.separate_models.then_some(model_index);
        self.dir.join(self.name.file_name(model))
    }
}

impl SinkFactory for SessionLogFactory {
    fn open(&mut self, model_index: u32) -> Result<Box<dyn SessionSink>, RotoError> {
        fs::create_dir_all(&self.dir).map_err(|e| RotoError::SinkUnavailable {
            path: self.dir.display().to_string(),
            details: e.to_string(),
        })?;
        let path = self.path_for(model_index);
        let log = SessionLog::create(&path).map_err(|e| RotoError::SinkUnavailable {
            path: path.display().to_string(),
            details: e.to_string(),
        })?;
        Ok(Box::new(log))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rotoscan_perception::SweepGeometry;
    use rotoscan_types::Point2D;

    fn cloud(seq: u64, n: usize) -> CloudFrame {
        CloudFrame {
            header: FrameHeader::new(seq, "laser"),
            points: (0..n)
                .map(|i| Point3D::new(i as f64, -(i as f64) * 0.5, 1.25, [i as f32, 7.0]))
                .collect(),
        }
    }

    fn name() -> LogName {
        LogName::from_params(0.04, 41.0, 49.5)
    }

    #[test]
    fn frames_are_read_back_in_order() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("sweep.db");

        let mut log = SessionLog::create(&path).expect("create");
        let written = [cloud(10, 3), cloud(11, 0), cloud(12, 5)];
        for (k, c) in written.iter().enumerate() {
            log.append(c, k as u64, k as f64 * 0.01).expect("append");
        }
        log.close().expect("close");

        let frames = SessionLog::read_frames(&path).expect("read");
        assert_eq!(frames.len(), 3);
        for (k, (frame, original)) in frames.iter().zip(&written).enumerate() {
            assert_eq!(frame.scan_index, k as u64);
            assert!((frame.angle_rad - k as f64 * 0.01).abs() < 1e-12);
            assert_eq!(frame.cloud.header.seq, original.header.seq);
            assert_eq!(frame.cloud.header.frame_id, "laser");
            assert_eq!(frame.cloud.points, original.points);
        }
    }

    #[test]
    fn create_truncates_previous_run() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("sweep.db");

        let mut first = SessionLog::create(&path).expect("create");
        first.append(&cloud(0, 2), 0, 0.0).expect("append");
        first.append(&cloud(1, 2), 1, 0.1).expect("append");
        first.close().expect("close");

        let mut second = SessionLog::create(&path).expect("recreate");
        second.append(&cloud(5, 1), 0, 0.0).expect("append");
        second.close().expect("close");

        let frames = SessionLog::read_frames(&path).expect("read");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].cloud.header.seq, 5);
    }

    #[test]
    fn append_after_close_fails() {
        let mut log = SessionLog::open_in_memory().expect("open");
        log.close().expect("close");
        assert!(log.is_closed());
        assert!(log.append(&cloud(0, 1), 0, 0.0).is_err());
        // Second close is a no-op.
        assert!(log.close().is_ok());
    }

    #[test]
    fn read_missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        assert!(SessionLog::read_frames(&dir.path().join("absent.db")).is_err());
    }

    #[test]
    fn corrupt_point_blob_is_reported() {
        let log = SessionLog::open_in_memory().expect("open");
        log.conn()
            .unwrap()
            .execute(
                "INSERT INTO sweep_frames
                     (scan_index, angle_rad, header_seq, stamp, frame_id, point_count, points)
                 VALUES (0, 0.0, 0, '2024-05-01T12:00:00+00:00', 'laser', 1, x'0102')",
                [],
            )
            .unwrap();
        assert!(matches!(log.frames(), Err(SessionLogError::Corrupt { .. })));
    }

    #[test]
    fn reference_is_loaded_from_logged_frame() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("reference.db");
        let geometry = SweepGeometry::new(0.1, 0.04);
        let swept = CloudFrame {
            header: FrameHeader::new(1, "laser"),
            points: (0..4)
                .map(|i| geometry.transform(&Point2D::new(i as f64, -(i as f64) * 0.5, [i as f32, 7.0]), 1))
                .collect(),
        };
        let mut log = SessionLog::create(&path).expect("create");
        log.append(&cloud(0, 2), 0, 0.0).expect("append");
        log.append(&swept, 1, geometry.angle_for(1)).expect("append");
        log.close().expect("close");

        let model = SessionLog::load_reference(&path, 1, HeightAxis::Y).expect("reference");
        assert_eq!(model.len(), 4);
        for (height, expected) in model.heights().iter().zip([0.0, -0.5, -1.0, -1.5]) {
            assert!((height - expected).abs() < 1e-12, "{height} vs {expected}");
        }

        let missing = SessionLog::load_reference(&path, 9, HeightAxis::Y);
        assert!(matches!(
            missing,
            Err(SessionLogError::FrameNotFound { index: 9, available: 2 })
        ));
    }

    #[test]
    fn factory_creates_directory_and_named_log() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let out = dir.path().join("3d_res");
        let mut factory = SessionLogFactory::new(&out, name(), false);

        let mut sink = factory.open(0).expect("open");
        assert!(sink.id().ends_with("pcl_3d-zofs_4-piangle_41-fre_495.db"));
        sink.close().expect("close");
        assert!(out.join("pcl_3d-zofs_4-piangle_41-fre_495.db").exists());
    }

    #[test]
    fn factory_names_models_separately() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let factory = SessionLogFactory::new(dir.path(), name(), true);
        assert_ne!(factory.path_for(0), factory.path_for(1));
        assert!(factory.path_for(3).to_string_lossy().ends_with("-model_3.db"));

        let single = SessionLogFactory::new(dir.path(), name(), false);
        assert_eq!(single.path_for(0), single.path_for(7));
    }

    #[test]
    fn factory_reports_unavailable_location() {
        let dir = tempfile::tempdir().expect("tmp dir");
        // A regular file where the output directory should be.
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, b"x").expect("write");

        let mut factory = SessionLogFactory::new(blocker.join("3d_res"), name(), false);
        let err = factory.open(0).err().expect("open must fail");
        assert!(matches!(err, RotoError::SinkUnavailable { .. }));
    }
}
