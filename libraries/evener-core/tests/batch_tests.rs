//! Batch checking and adjustment across several open files


use evener_core::{
    BatchEvent, CancelFlag, FileIo, FileRegistry, IoFailure, LevelError, LevelModel, StdFileIo,
    TargetLevel,
};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use test_helpers::{assert_close, init_tracing, read_samples, write_wave};

const TOLERANCE: f64 = 1e-3;

fn no_reference() -> &'static [&'static Path] {
    &[]
}

fn progress_values(events: &[BatchEvent]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|e| match e {
            BatchEvent::Progress(p) => Some(*p),
            _ => None,
        })
        .collect()
}

#[test]
fn test_corrupt_file_does_not_stop_batch() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let a = write_wave(dir.path(), "a.wav", &[0.1, -0.1, 0.1, -0.1]);
    let b = write_wave(dir.path(), "b.wav", &[0.2, -0.2, 0.2, -0.2]);
    let c = write_wave(dir.path(), "c.wav", &[0.3, -0.3, 0.3, -0.3]);

    let mut registry = FileRegistry::new();
    for path in [&a, &b, &c] {
        assert!(registry.open(path));
    }

    // Adjustment re-reads from disk, so damage after opening surfaces there
    std::fs::write(&b, b"this is no longer a wave file at all").unwrap();

    let mut events = Vec::new();
    let summary = registry
        .adjust_files(
            &[&a, &b, &c],
            no_reference(),
            2.0,
            |path| path.to_path_buf(),
            &CancelFlag::new(),
            |event| events.push(event),
        )
        .unwrap();

    assert_eq!(summary.succeeded.len(), 2);
    assert_eq!(summary.failed.len(), 1);
    assert!(summary.failed[0].path.ends_with("b.wav"));
    assert!(!summary.cancelled);

    let outcomes: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            BatchEvent::Succeeded(_) => Some("ok"),
            BatchEvent::Failed { error: LevelError::Format(_), .. } => Some("format"),
            BatchEvent::Failed { .. } => Some("other"),
            _ => None,
        })
        .collect();
    assert_eq!(outcomes, vec!["ok", "format", "ok"]);

    let progress = progress_values(&events);
    assert_eq!(progress.len(), 3);
    assert_eq!(progress.last().copied(), Some(1.0));
    assert!(progress.windows(2).all(|w| w[0] < w[1]));

    assert_close(&read_samples(&a), &[0.2, -0.2, 0.2, -0.2], TOLERANCE);
    assert_close(&read_samples(&c), &[0.6, -0.6, 0.6, -0.6], TOLERANCE);
}

#[test]
fn test_reference_files_define_shared_target() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let a = write_wave(dir.path(), "a.wav", &[0.2, -0.2]);
    let b = write_wave(dir.path(), "b.wav", &[0.4, -0.4]);
    let c = write_wave(dir.path(), "c.wav", &[0.3, -0.3]);

    let mut registry = FileRegistry::new();
    for path in [&a, &b, &c] {
        registry.open(path);
    }

    let summary = registry
        .adjust_files(
            &[&a, &b, &c],
            &[&a, &b],
            2.0,
            |path| path.to_path_buf(),
            &CancelFlag::new(),
            |_| {},
        )
        .unwrap();

    match summary.target {
        TargetLevel::Shared { target } => assert!((target - 0.6).abs() < TOLERANCE),
        other => panic!("unexpected target {other:?}"),
    }
    assert_eq!(summary.succeeded.len(), 3);

    for path in [&a, &b, &c] {
        assert_close(&read_samples(path), &[0.6, -0.6], TOLERANCE);
    }
}

#[test]
fn test_unopened_reference_is_ignored() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let a = write_wave(dir.path(), "a.wav", &[0.2, -0.2]);
    let b = write_wave(dir.path(), "b.wav", &[0.1, -0.1]);

    let mut registry = FileRegistry::new();
    registry.open(&a);
    registry.open(&b);

    let ghost = dir.path().join("ghost.wav");
    let plan = registry.plan(&[&b], &[&a, &ghost], 1.0).unwrap();
    match plan.target() {
        TargetLevel::Shared { target } => assert!((target - 0.2).abs() < TOLERANCE),
        other => panic!("unexpected target {other:?}"),
    }

    let err = registry
        .check_overmodulation(&[&b], &[&ghost], 1.0, &CancelFlag::new(), |_| {})
        .unwrap_err();
    assert_eq!(err, LevelError::NoReferenceFiles);
}

#[test]
fn test_check_reports_overmodulating_files() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    // average 0.2, peak 0.2
    let quiet = write_wave(dir.path(), "quiet.wav", &[0.2, -0.2, 0.2, -0.2]);
    // average 0.3, peak 0.9
    let spiky = write_wave(dir.path(), "spiky.wav", &[0.9, 0.1, -0.1, 0.1]);

    let mut registry = FileRegistry::new();
    registry.open(&quiet);
    registry.open(&spiky);

    let mut progress = Vec::new();
    let report = registry
        .check_overmodulation(
            &[&quiet, &spiky],
            &[&quiet],
            2.0,
            &CancelFlag::new(),
            |p| progress.push(p),
        )
        .unwrap();

    assert_eq!(report.checked, 2);
    assert_eq!(report.overmodulating.len(), 1);
    assert!(report.overmodulating.iter().next().unwrap().ends_with("spiky.wav"));
    assert_eq!(progress, vec![0.5, 1.0]);

    // The check does not touch the files
    assert_close(&read_samples(&spiky), &[0.9, 0.1, -0.1, 0.1], TOLERANCE);
}

#[test]
fn test_overmodulating_file_is_skipped_by_adjust() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let quiet = write_wave(dir.path(), "quiet.wav", &[0.2, -0.2, 0.2, -0.2]);
    let spiky = write_wave(dir.path(), "spiky.wav", &[0.9, 0.1, -0.1, 0.1]);
    let original = std::fs::read(&spiky).unwrap();

    let mut registry = FileRegistry::new();
    registry.open(&quiet);
    registry.open(&spiky);

    let mut events = Vec::new();
    let summary = registry
        .adjust_files(
            &[&quiet, &spiky],
            &[&quiet],
            2.0,
            |path| path.to_path_buf(),
            &CancelFlag::new(),
            |event| events.push(event),
        )
        .unwrap();

    assert_eq!(summary.succeeded.len(), 1);
    assert!(events.iter().any(|e| matches!(
        e,
        BatchEvent::Failed { error: LevelError::Overmodulation { .. }, .. }
    )));
    assert_eq!(std::fs::read(&spiky).unwrap(), original);
    assert_close(&read_samples(&quiet), &[0.4, -0.4, 0.4, -0.4], TOLERANCE);
}

#[test]
fn test_cancel_stops_between_files() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let paths: Vec<PathBuf> = (0..4)
        .map(|i| write_wave(dir.path(), &format!("{i}.wav"), &[0.1, -0.1]))
        .collect();
    let originals: Vec<Vec<u8>> = paths.iter().map(|p| std::fs::read(p).unwrap()).collect();

    let mut registry = FileRegistry::new();
    for path in &paths {
        registry.open(path);
    }

    let cancel = CancelFlag::new();
    let trigger = cancel.clone();
    let mut events = Vec::new();
    let summary = registry
        .adjust_files(
            &paths,
            no_reference(),
            2.0,
            |path| path.to_path_buf(),
            &cancel,
            |event| {
                if matches!(event, BatchEvent::Succeeded(_)) {
                    trigger.cancel();
                }
                events.push(event);
            },
        )
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.processed(), 1);
    assert_eq!(progress_values(&events), vec![0.25]);

    // Files after the cancellation point are untouched
    for (path, original) in paths.iter().zip(&originals).skip(1) {
        assert_eq!(&std::fs::read(path).unwrap(), original);
    }
}

#[test]
fn test_output_mapping_leaves_sources() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let a = write_wave(dir.path(), "a.wav", &[0.1, -0.2]);
    let original = std::fs::read(&a).unwrap();

    let mut registry = FileRegistry::new();
    registry.open(&a);

    let target_dir = out_dir.path().to_path_buf();
    let summary = registry
        .adjust_files(
            &[&a],
            no_reference(),
            0.5,
            move |path| target_dir.join(path.file_name().unwrap()),
            &CancelFlag::new(),
            |_| {},
        )
        .unwrap();

    assert_eq!(summary.succeeded.len(), 1);
    assert_eq!(std::fs::read(&a).unwrap(), original);
    assert_close(
        &read_samples(&out_dir.path().join("a.wav")),
        &[0.05, -0.1],
        TOLERANCE,
    );
}

/// Fails every write whose file name starts with "deny"
struct DenyingIo;

impl FileIo for DenyingIo {
    fn read_file(&self, path: &Path) -> Result<Vec<u8>, IoFailure> {
        StdFileIo.read_file(path)
    }

    fn write_file(&self, path: &Path, content: &[u8]) -> Result<(), IoFailure> {
        let denied = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("deny"));
        if denied {
            return Err(IoFailure::PermissionDenied(path.display().to_string()));
        }
        StdFileIo.write_file(path, content)
    }
}

#[test]
fn test_write_failure_is_reported_per_file() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let first = write_wave(dir.path(), "deny_me.wav", &[0.1, -0.1]);
    let second = write_wave(dir.path(), "fine.wav", &[0.1, -0.1]);

    let mut registry = FileRegistry::with_parts(LevelModel::new(), Arc::new(DenyingIo));
    registry.open(&first);
    registry.open(&second);

    let target_dir = out_dir.path().to_path_buf();
    let mut events = Vec::new();
    let summary = registry
        .adjust_files(
            &[&first, &second],
            no_reference(),
            1.0,
            move |path| target_dir.join(path.file_name().unwrap()),
            &CancelFlag::new(),
            |event| events.push(event),
        )
        .unwrap();

    assert_eq!(summary.succeeded.len(), 1);
    assert!(matches!(
        &events[0],
        BatchEvent::Failed {
            error: LevelError::Io(IoFailure::PermissionDenied(_)),
            ..
        }
    ));
    assert!(out_dir.path().join("fine.wav").exists());
}

#[test]
fn test_unopened_selection_fails_only_that_file() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let a = write_wave(dir.path(), "a.wav", &[0.1, -0.1]);
    let missing = dir.path().join("never_opened.wav");

    let mut registry = FileRegistry::new();
    registry.open(&a);

    let mut events = Vec::new();
    let summary = registry
        .adjust_files(
            &[&missing, &a],
            no_reference(),
            1.5,
            |path| path.to_path_buf(),
            &CancelFlag::new(),
            |event| events.push(event),
        )
        .unwrap();

    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.succeeded.len(), 1);
    assert!(matches!(
        &events[0],
        BatchEvent::Failed { error: LevelError::NotOpen(_), .. }
    ));
    assert_eq!(progress_values(&events), vec![0.5, 1.0]);
}

#[test]
fn test_second_registry_cannot_open_locked_file() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let a = write_wave(dir.path(), "a.wav", &[0.1, -0.1]);

    let mut first = FileRegistry::new();
    assert!(first.open(&a));

    let mut second = FileRegistry::new();
    let err = second.open_detailed(&a).unwrap_err();
    assert!(matches!(err, LevelError::Io(IoFailure::Locked(_))));
    assert!(second.is_empty());

    drop(first);
    assert!(second.open(&a));
}

#[tokio::test]
async fn test_background_adjust_streams_events() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let a = write_wave(dir.path(), "a.wav", &[0.1, -0.1]);
    let b = write_wave(dir.path(), "b.wav", &[0.2, -0.2]);

    let mut registry = FileRegistry::new();
    registry.open(&a);
    registry.open(&b);

    let mut task = registry
        .spawn_adjust_files(&[&a, &b], &[&b], 1.0, |path: &Path| path.to_path_buf())
        .unwrap();

    let mut events = Vec::new();
    while let Some(event) = task.next_event().await {
        events.push(event);
    }
    let summary = task.join().await.unwrap();

    assert_eq!(summary.succeeded.len(), 2);
    assert_eq!(progress_values(&events), vec![0.5, 1.0]);
    assert_close(&read_samples(&a), &[0.2, -0.2], TOLERANCE);
}

#[tokio::test]
async fn test_background_check_reports_overmodulation() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let quiet = write_wave(dir.path(), "quiet.wav", &[0.2, -0.2]);
    let spiky = write_wave(dir.path(), "spiky.wav", &[0.9, 0.1, -0.1, 0.1]);

    let mut registry = FileRegistry::new();
    registry.open(&quiet);
    registry.open(&spiky);

    let mut task = registry
        .spawn_check_overmodulation(&[&quiet, &spiky], &[&quiet], 2.0)
        .unwrap();

    let mut flagged = Vec::new();
    while let Some(event) = task.next_event().await {
        if let BatchEvent::Overmodulating(path) = event {
            flagged.push(path);
        }
    }
    let report = task.join().await.unwrap();

    assert_eq!(flagged.len(), 1);
    assert!(flagged[0].ends_with("spiky.wav"));
    assert_eq!(report.overmodulating.len(), 1);
}

/// Holds every write until the test hands out a permit
struct GatedIo {
    permits: Mutex<mpsc::Receiver<()>>,
}

impl FileIo for GatedIo {
    fn read_file(&self, path: &Path) -> Result<Vec<u8>, IoFailure> {
        StdFileIo.read_file(path)
    }

    fn write_file(&self, path: &Path, content: &[u8]) -> Result<(), IoFailure> {
        self.permits
            .lock()
            .unwrap()
            .recv()
            .map_err(|_| IoFailure::Io("write gate closed".to_string()))?;
        StdFileIo.write_file(path, content)
    }
}

#[tokio::test]
async fn test_background_cancel_after_first_file() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let paths: Vec<PathBuf> = (0..3)
        .map(|i| write_wave(dir.path(), &format!("{i}.wav"), &[0.1, -0.1]))
        .collect();
    let originals: Vec<Vec<u8>> = paths.iter().map(|p| std::fs::read(p).unwrap()).collect();

    let (permit, permits) = mpsc::channel();
    let io = GatedIo {
        permits: Mutex::new(permits),
    };
    let mut registry = FileRegistry::with_parts(LevelModel::new(), Arc::new(io));
    for path in &paths {
        assert!(registry.open(path));
    }

    let target_dir = out_dir.path().to_path_buf();
    let mut task = registry
        .spawn_adjust_files(&paths, no_reference(), 2.0, move |path: &Path| {
            target_dir.join(path.file_name().unwrap())
        })
        .unwrap();

    // Let exactly one write through
    permit.send(()).unwrap();
    while let Some(event) = task.next_event().await {
        if matches!(event, BatchEvent::Succeeded(_)) {
            task.cancel();
            // A write already waiting fails instead of blocking
            drop(permit);
            break;
        }
    }
    while task.next_event().await.is_some() {}
    let summary = task.join().await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.succeeded.len(), 1);
    assert!(summary.succeeded[0].ends_with("0.wav"));
    assert!(out_dir.path().join("0.wav").exists());
    assert!(!out_dir.path().join("1.wav").exists());
    assert!(!out_dir.path().join("2.wav").exists());

    for (path, original) in paths.iter().zip(&originals) {
        assert_eq!(&std::fs::read(path).unwrap(), original);
    }
}
