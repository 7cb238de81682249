//! Retention sweeper for uploads and published stems.
//!
//! Removes entries from the upload and output roots once their modification
//! time is older than the retention window. Entries that belong to a job that
//! is still queued, downloading or processing are left alone.

use crate::jobs::{JobId, JobRegistry};
use crate::server::metrics;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Counters from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: usize,
    pub skipped_active: usize,
    pub errors: usize,
}

impl SweepReport {
    fn merge(&mut self, other: SweepReport) {
        self.scanned += other.scanned;
        self.deleted += other.deleted;
        self.skipped_active += other.skipped_active;
        self.errors += other.errors;
    }
}

pub struct RetentionSweeper {
    roots: Vec<PathBuf>,
    retention: Duration,
    registry: Arc<JobRegistry>,
}

impl RetentionSweeper {
    pub fn new(roots: Vec<PathBuf>, retention: Duration, registry: Arc<JobRegistry>) -> Self {
        Self {
            roots,
            retention,
            registry,
        }
    }

    /// Blocking; call from the blocking pool.
    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(SystemTime::now())
    }

    /// Sweep as if the current time were `now`.
    pub fn sweep_at(&self, now: SystemTime) -> SweepReport {
        let active = self.registry.active_ids();
        let mut report = SweepReport::default();
        for root in &self.roots {
            report.merge(self.sweep_root(root, now, &active, &remove_entry));
        }

        if report.deleted > 0 || report.errors > 0 {
            info!(
                "Retention sweep complete: scanned={}, deleted={}, skipped_active={}, errors={}",
                report.scanned, report.deleted, report.skipped_active, report.errors
            );
        } else {
            debug!(
                "Retention sweep complete: scanned={}, nothing expired",
                report.scanned
            );
        }
        metrics::record_sweep(report.deleted, report.errors);
        report
    }

    fn sweep_root(
        &self,
        root: &Path,
        now: SystemTime,
        active: &HashSet<JobId>,
        remove: &dyn Fn(&Path, bool) -> std::io::Result<()>,
    ) -> SweepReport {
        let mut report = SweepReport::default();

        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Sweep root does not exist: {:?}", root);
                return report;
            }
            Err(e) => {
                warn!("Failed to read sweep root {:?}: {}", root, e);
                report.errors += 1;
                return report;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Failed to read directory entry: {}", e);
                    report.errors += 1;
                    continue;
                }
            };

            let path = entry.path();
            report.scanned += 1;

            if owning_job(&path).is_some_and(|id| active.contains(&id)) {
                debug!("Skipping entry of active job: {:?}", path);
                report.skipped_active += 1;
                continue;
            }

            let metadata = match std::fs::symlink_metadata(&path) {
                Ok(m) => m,
                Err(e) => {
                    warn!("Failed to get metadata for {:?}: {}", path, e);
                    report.errors += 1;
                    continue;
                }
            };

            let modified = match metadata.modified() {
                Ok(t) => t,
                Err(e) => {
                    warn!("Failed to get modified time for {:?}: {}", path, e);
                    report.errors += 1;
                    continue;
                }
            };

            // A modification time in the future counts as fresh.
            let age = now.duration_since(modified).unwrap_or_default();
            if age <= self.retention {
                continue;
            }

            match remove(&path, metadata.is_dir()) {
                Ok(()) => {
                    info!("Deleted expired {:?} (age: {}s)", path, age.as_secs());
                    report.deleted += 1;
                }
                Err(e) => {
                    warn!("Failed to delete {:?}: {}", path, e);
                    report.errors += 1;
                }
            }
        }

        report
    }
}

fn remove_entry(path: &Path, is_dir: bool) -> std::io::Result<()> {
    if is_dir {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

/// Job an entry belongs to: uploads are `<id><ext>`, output folders are `<id>`.
fn owning_job(path: &Path) -> Option<JobId> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(JobId::parse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobSource, JobUpdate};
    use tempfile::TempDir;

    const RETENTION: Duration = Duration::from_secs(3600);

    struct Fixture {
        dir: TempDir,
        registry: Arc<JobRegistry>,
        sweeper: RetentionSweeper,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let uploads = dir.path().join("uploads");
            let outputs = dir.path().join("outputs");
            std::fs::create_dir_all(&uploads).unwrap();
            std::fs::create_dir_all(&outputs).unwrap();
            let registry = Arc::new(JobRegistry::new());
            let sweeper = RetentionSweeper::new(vec![uploads, outputs], RETENTION, registry.clone());
            Self {
                dir,
                registry,
                sweeper,
            }
        }

        fn upload(&self, name: &str) -> PathBuf {
            let path = self.dir.path().join("uploads").join(name);
            std::fs::write(&path, b"audio").unwrap();
            path
        }

        fn output(&self, name: &str) -> PathBuf {
            let path = self.dir.path().join("outputs").join(name);
            std::fs::create_dir_all(&path).unwrap();
            std::fs::write(path.join("vocals.wav"), b"wav").unwrap();
            path
        }

        fn later(&self) -> SystemTime {
            SystemTime::now() + RETENTION + Duration::from_secs(60)
        }
    }

    #[test]
    fn test_fresh_entries_are_kept() {
        let fixture = Fixture::new();
        let upload = fixture.upload("song.mp3");
        let output = fixture.output(&JobId::new().to_string());

        let report = fixture.sweeper.sweep();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.deleted, 0);
        assert!(upload.exists());
        assert!(output.exists());
    }

    #[test]
    fn test_expired_files_and_directories_are_removed() {
        let fixture = Fixture::new();
        let done = fixture.registry.create(JobSource::Upload {
            filename: "a.mp3".to_string(),
        });
        fixture
            .registry
            .transition(
                &done,
                JobUpdate::Failed {
                    error: "x".to_string(),
                },
            )
            .unwrap();
        let upload = fixture.upload(&format!("{}.mp3", done));
        let output = fixture.output(&done.to_string());
        let stray = fixture.upload("stray.txt");

        let report = fixture.sweeper.sweep_at(fixture.later());

        assert_eq!(report.deleted, 3);
        assert_eq!(report.errors, 0);
        assert!(!upload.exists());
        assert!(!output.exists());
        assert!(!stray.exists());
    }

    #[test]
    fn test_active_jobs_are_skipped() {
        let fixture = Fixture::new();
        let active = fixture.registry.create(JobSource::Upload {
            filename: "a.flac".to_string(),
        });
        let upload = fixture.upload(&format!("{}.flac", active));
        let output = fixture.output(&active.to_string());

        let report = fixture.sweeper.sweep_at(fixture.later());

        assert_eq!(report.skipped_active, 2);
        assert_eq!(report.deleted, 0);
        assert!(upload.exists());
        assert!(output.exists());
    }

    #[test]
    fn test_failed_removal_is_counted_and_sweep_continues() {
        let fixture = Fixture::new();
        let stuck = fixture.upload("stuck.mp3");
        let first = fixture.upload("first.wav");
        let last = fixture.upload("last.flac");
        let root = fixture.dir.path().join("uploads");

        let remove = |path: &Path, is_dir: bool| {
            if path == stuck.as_path() {
                return Err(std::io::Error::other("device busy"));
            }
            remove_entry(path, is_dir)
        };
        let report = fixture
            .sweeper
            .sweep_root(&root, fixture.later(), &HashSet::new(), &remove);

        assert_eq!(report.scanned, 3);
        assert_eq!(report.errors, 1);
        assert_eq!(report.deleted, 2);
        assert!(stuck.exists());
        assert!(!first.exists());
        assert!(!last.exists());
    }

    #[test]
    fn test_missing_roots_are_ignored() {
        let registry = Arc::new(JobRegistry::new());
        let sweeper = RetentionSweeper::new(
            vec![PathBuf::from("/nonexistent/stem-splitter/uploads")],
            RETENTION,
            registry,
        );
        assert_eq!(sweeper.sweep(), SweepReport::default());
    }

    #[test]
    fn test_owning_job() {
        let id = JobId::new();
        assert_eq!(owning_job(Path::new(&format!("/u/{}.mp3", id))), Some(id));
        assert_eq!(owning_job(Path::new(&format!("/o/{}", id))), Some(id));
        assert_eq!(owning_job(Path::new("/u/song.mp3")), None);
    }
}
