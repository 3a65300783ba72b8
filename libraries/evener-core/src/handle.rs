//! One open audio file
//!
//! An [`AudioHandle`] holds the metrics measured at open time and the
//! exclusive lock on its file. The lock is released by [`AudioHandle::close`]
//! or when the handle is dropped.

use crate::error::{LevelError, Result};
use crate::io::{FileIo, FileLock};
use crate::level::{LevelMetrics, LevelModel};
use crate::path::{normalize_path, same_path};
use evener_wave::WaveLayout;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A decoded and measured file that is not locked yet
pub(crate) struct LoadedAudio {
    path: PathBuf,
    layout: WaveLayout,
    metrics: LevelMetrics,
    bytes: Vec<u8>,
}

impl LoadedAudio {
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Make sure the metrics describe the bytes now under `lock`
    ///
    /// The file may have changed between the unlocked read and locking it;
    /// in that case the locked contents are measured again.
    fn confirm(self, lock: &FileLock, model: &LevelModel) -> Result<Self> {
        let current = lock.read_all()?;
        if current == self.bytes {
            return Ok(self);
        }

        tracing::debug!("{} changed before it was locked, measuring again", self.path.display());
        let (layout, metrics) = measure(&current, model)?;
        Ok(Self {
            path: self.path,
            layout,
            metrics,
            bytes: current,
        })
    }
}

fn measure(buffer: &[u8], model: &LevelModel) -> Result<(WaveLayout, LevelMetrics)> {
    let (samples, layout) = evener_wave::decode(buffer)?;
    let metrics = model.metrics(&samples)?;
    Ok((layout, metrics))
}

/// An open WAVE file with its level metrics
pub struct AudioHandle {
    path: PathBuf,
    layout: WaveLayout,
    metrics: LevelMetrics,
    model: LevelModel,
    io: Arc<dyn FileIo>,
    lock: Mutex<Option<FileLock>>,
}

impl std::fmt::Debug for AudioHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioHandle")
            .field("path", &self.path)
            .field("layout", &self.layout)
            .field("metrics", &self.metrics)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl AudioHandle {
    /// Read, decode, and measure `path`, then lock it
    ///
    /// # Errors
    /// Returns a [`LevelError`] if the file cannot be read or locked, is not
    /// a PCM WAVE file, or has no measurable level. No handle exists then.
    pub fn open(path: &Path, model: LevelModel, io: Arc<dyn FileIo>) -> Result<Self> {
        let loaded = Self::load(path, &model, io.as_ref())?;
        Self::lock_loaded(loaded, model, io)
    }

    pub(crate) fn load(path: &Path, model: &LevelModel, io: &dyn FileIo) -> Result<LoadedAudio> {
        let path = normalize_path(path)?;
        let buffer = io.read_file(&path)?;
        let (layout, metrics) = measure(&buffer, model)?;

        tracing::debug!(
            "Opened {}: {} samples, weighted average {:.6}, peak {:.6}",
            path.display(),
            metrics.sample_count,
            metrics.weighted_average,
            metrics.peak
        );

        Ok(LoadedAudio {
            path,
            layout,
            metrics,
            bytes: buffer,
        })
    }

    /// Lock the loaded file and build the handle from the locked contents
    pub(crate) fn lock_loaded(loaded: LoadedAudio, model: LevelModel, io: Arc<dyn FileIo>) -> Result<Self> {
        let lock = FileLock::acquire(&loaded.path)?;
        let loaded = loaded.confirm(&lock, &model)?;
        Ok(Self {
            path: loaded.path,
            layout: loaded.layout,
            metrics: loaded.metrics,
            model,
            io,
            lock: Mutex::new(Some(lock)),
        })
    }

    /// Normalized absolute path the handle was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> &WaveLayout {
        &self.layout
    }

    pub fn metrics(&self) -> LevelMetrics {
        self.metrics
    }

    pub fn weighted_average(&self) -> f64 {
        self.metrics.weighted_average
    }

    pub fn peak(&self) -> f64 {
        self.metrics.peak
    }

    /// Whether reaching `target_average` keeps every sample within full scale
    pub fn would_fit(&self, target_average: f64) -> bool {
        self.model
            .would_fit(self.metrics.peak, target_average, self.metrics.weighted_average)
    }

    /// Scale the file so its weighted average becomes `target_average`
    ///
    /// The samples are re-read from disk, adjusted, re-encoded, and written
    /// to `output`. When `output` is `None` or names the handle's own file,
    /// the file is overwritten in place through the lock. Metrics are not
    /// recomputed afterwards.
    ///
    /// # Errors
    /// - [`LevelError::Overmodulation`] if the target would clip; nothing is written
    /// - [`LevelError::Closed`] if the handle was closed
    /// - format or I/O errors from re-reading, encoding, or writing
    pub fn adjust_samples(&self, target_average: f64, output: Option<&Path>) -> Result<()> {
        if !self.would_fit(target_average) {
            return Err(LevelError::Overmodulation {
                target: target_average,
                peak: self.metrics.peak,
                resulting_peak: self.model.adjust(
                    self.metrics.peak,
                    target_average,
                    self.metrics.weighted_average,
                ),
            });
        }

        let guard = self.lock_guard();
        let lock = guard
            .as_ref()
            .ok_or_else(|| LevelError::Closed(self.path.display().to_string()))?;

        let buffer = lock.read_all()?;
        let (mut samples, layout) = evener_wave::decode(&buffer)?;
        self.model
            .adjust_all(&mut samples, target_average, self.metrics.weighted_average);
        let encoded = evener_wave::encode(&samples, &layout, &buffer)?;

        match output {
            Some(destination) if !same_path(destination, &self.path) => {
                tracing::debug!(
                    "Writing adjusted {} to {}",
                    self.path.display(),
                    destination.display()
                );
                self.io.write_file(destination, &encoded)?;
            }
            _ => {
                tracing::debug!("Overwriting {} in place", self.path.display());
                lock.overwrite(&encoded)?;
            }
        }

        Ok(())
    }

    /// Release the file lock; further adjustments fail
    pub fn close(&self) {
        if self.lock_guard().take().is_some() {
            tracing::debug!("Closed {}", self.path.display());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock_guard().is_none()
    }

    /// Lock the handle's file again after a [`close`](Self::close)
    ///
    /// Metrics are kept as measured at open time.
    pub(crate) fn relock(&self) -> Result<()> {
        let mut guard = self.lock_guard();
        if guard.is_none() {
            *guard = Some(FileLock::acquire(&self.path)?);
        }
        Ok(())
    }

    fn lock_guard(&self) -> MutexGuard<'_, Option<FileLock>> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for AudioHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::StdFileIo;
    use evener_wave::test_utils::{build_wave_from_samples, WaveSpec};
    use evener_wave::ByteOrder;

    fn write_wave(dir: &Path, name: &str, samples: &[f64]) -> PathBuf {
        let path = dir.join(name);
        let bytes = build_wave_from_samples(&WaveSpec::new(ByteOrder::LittleEndian, 32), samples);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn open(path: &Path) -> Result<AudioHandle> {
        AudioHandle::open(path, LevelModel::new(), Arc::new(StdFileIo))
    }

    #[test]
    fn test_open_measures_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wave(dir.path(), "a.wav", &[0.25, -0.5, 0.25, -0.2]);

        let handle = open(&path).unwrap();
        assert!((handle.weighted_average() - 0.3).abs() < 1e-6);
        assert!((handle.peak() - 0.5).abs() < 1e-6);
        assert_eq!(handle.layout().step, 4);
        assert!(handle.path().is_absolute());
    }

    #[test]
    fn test_open_rejects_non_wave() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("text.wav");
        std::fs::write(&path, b"definitely not a wave file, just some text here").unwrap();

        assert!(matches!(open(&path).unwrap_err(), LevelError::Format(_)));
    }

    #[test]
    fn test_open_rejects_silence() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wave(dir.path(), "silent.wav", &[0.0; 32]);
        assert_eq!(open(&path).unwrap_err(), LevelError::SilentAudio);
    }

    #[test]
    fn test_adjust_in_place_doubles_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wave(dir.path(), "a.wav", &[0.1, -0.2, 0.3, -0.4]);
        let handle = open(&path).unwrap();
        let target = handle.weighted_average() * 2.0;

        handle.adjust_samples(target, None).unwrap();
        drop(handle);

        let (samples, _) = evener_wave::decode(&std::fs::read(&path).unwrap()).unwrap();
        for (got, want) in samples.iter().zip([0.2, -0.4, 0.6, -0.8]) {
            assert!((got - want).abs() < 1e-6, "{got} != {want}");
        }
    }

    #[test]
    fn test_adjust_to_other_path_leaves_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wave(dir.path(), "a.wav", &[0.1, -0.2, 0.3, -0.4]);
        let original = std::fs::read(&path).unwrap();
        let output = dir.path().join("out.wav");

        let handle = open(&path).unwrap();
        handle
            .adjust_samples(handle.weighted_average() * 0.5, Some(&output))
            .unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), original);
        let (samples, _) = evener_wave::decode(&std::fs::read(&output).unwrap()).unwrap();
        assert!((samples[3] + 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_output_equal_to_source_writes_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wave(dir.path(), "Mixed.wav", &[0.1, -0.2]);
        let handle = open(&path).unwrap();

        // Same file spelled differently
        let alias = dir.path().join(".").join("MIXED.wav");
        handle
            .adjust_samples(handle.weighted_average() * 2.0, Some(&alias))
            .unwrap();
        drop(handle);

        let (samples, _) = evener_wave::decode(&std::fs::read(&path).unwrap()).unwrap();
        assert!((samples[0] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_overmodulation_leaves_file_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        // peak 0.9, average 0.3
        let path = write_wave(dir.path(), "loud.wav", &[0.9, -0.0, 0.0, 0.3, -0.3, 0.3]);
        let original = std::fs::read(&path).unwrap();
        let handle = open(&path).unwrap();
        assert!((handle.weighted_average() - 0.3).abs() < 1e-6);

        assert!(!handle.would_fit(1.0));
        let err = handle.adjust_samples(1.0, None).unwrap_err();
        match err {
            LevelError::Overmodulation { resulting_peak, .. } => {
                assert!((resulting_peak - 3.0).abs() < 1e-5);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        drop(handle);
        assert_eq!(std::fs::read(&path).unwrap(), original);
    }

    #[test]
    fn test_would_fit_is_pure() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wave(dir.path(), "a.wav", &[0.5, -0.25]);
        let handle = open(&path).unwrap();
        let before = handle.metrics();

        let first = handle.would_fit(0.5);
        let second = handle.would_fit(0.5);
        assert_eq!(first, second);
        assert_eq!(handle.metrics(), before);
    }

    #[test]
    fn test_close_is_idempotent_and_blocks_adjust() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wave(dir.path(), "a.wav", &[0.5, -0.25]);
        let handle = open(&path).unwrap();

        handle.close();
        handle.close();
        assert!(handle.is_closed());
        assert!(matches!(
            handle.adjust_samples(handle.weighted_average(), None),
            Err(LevelError::Closed(_))
        ));

        // The lock is gone, so the file can be opened again
        assert!(open(&path).is_ok());
    }

    /// Serves fixed bytes regardless of what is on disk
    struct StaleIo(Vec<u8>);

    impl FileIo for StaleIo {
        fn read_file(&self, _path: &Path) -> std::result::Result<Vec<u8>, crate::error::IoFailure> {
            Ok(self.0.clone())
        }

        fn write_file(&self, path: &Path, content: &[u8]) -> std::result::Result<(), crate::error::IoFailure> {
            StdFileIo.write_file(path, content)
        }
    }

    #[test]
    fn test_metrics_describe_locked_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wave(dir.path(), "a.wav", &[0.4, -0.4]);
        // The unlocked read sees an older version of the file
        let stale = build_wave_from_samples(&WaveSpec::new(ByteOrder::LittleEndian, 32), &[0.1, -0.1]);

        let handle = AudioHandle::open(&path, LevelModel::new(), Arc::new(StaleIo(stale))).unwrap();
        assert!((handle.weighted_average() - 0.4).abs() < 1e-6);
        assert!((handle.peak() - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_changed_to_garbage_before_lock_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        std::fs::write(&path, b"replaced by something that is not a wave file").unwrap();
        let stale = build_wave_from_samples(&WaveSpec::new(ByteOrder::LittleEndian, 32), &[0.1, -0.1]);

        let err = AudioHandle::open(&path, LevelModel::new(), Arc::new(StaleIo(stale))).unwrap_err();
        assert!(matches!(err, LevelError::Format(_)));
        // No lock is left behind
        assert!(open(&path).is_err_and(|e| matches!(e, LevelError::Format(_))));
    }

    #[test]
    fn test_relock_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wave(dir.path(), "a.wav", &[0.1, -0.1]);
        let handle = open(&path).unwrap();

        handle.close();
        handle.relock().unwrap();
        assert!(!handle.is_closed());
        handle.adjust_samples(0.2, None).unwrap();
    }

    #[test]
    fn test_metrics_not_recomputed_after_adjust() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wave(dir.path(), "a.wav", &[0.1, -0.1]);
        let handle = open(&path).unwrap();
        let before = handle.metrics();

        handle.adjust_samples(0.2, None).unwrap();
        assert_eq!(handle.metrics(), before);
    }
}
