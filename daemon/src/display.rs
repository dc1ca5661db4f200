use std::future::Future;
use std::path::{Path, PathBuf};

use common::{DisplayInfo, UpdateError, WallpaperMode};

/// Display-target enumeration plus the OS-level apply call.
///
/// The list is re-queried on every apply pass so hotplugged displays are
/// picked up without restarting the daemon.
pub trait DisplayServer: Send + Sync {
    fn displays(&self) -> Vec<DisplayInfo>;
    fn set_wallpaper(&self, display: &DisplayInfo, path: &Path) -> Result<(), UpdateError>;
}

/// [`DisplayServer`] using the desktop environment's wallpaper mechanism.
///
/// The underlying OS call addresses the whole desktop, so a single logical
/// target is exposed; a platform backend with true per-display addressing
/// plugs in behind the same trait.
pub struct SystemDisplayServer;

impl DisplayServer for SystemDisplayServer {
    fn displays(&self) -> Vec<DisplayInfo> {
        vec![DisplayInfo {
            name: "primary".to_string(),
            index: 0,
        }]
    }

    fn set_wallpaper(&self, display: &DisplayInfo, path: &Path) -> Result<(), UpdateError> {
        log::debug!("Setting wallpaper on {}: {}", display.name, path.display());
        wallpaper::set_from_path(&path.to_string_lossy())
            .map_err(|e| UpdateError::WallpaperSetFailed(e.to_string()))
    }
}

/// Applies cached image files across displays under a fan-out mode.
pub struct DisplayApplier<D: DisplayServer> {
    server: D,
}

impl<D: DisplayServer> DisplayApplier<D> {
    pub fn new(server: D) -> Self {
        Self { server }
    }

    pub fn server(&self) -> &D {
        &self.server
    }

    /// Fan a wallpaper out across the currently connected displays.
    ///
    /// `Same` fetches exactly once and applies that file to every display in
    /// turn; `Different` fetches a fresh image per display. Either way a
    /// failing display surfaces its error immediately and later displays are
    /// not attempted: already-applied displays keep the new image, the rest
    /// keep the old one.
    pub async fn apply<F, Fut>(&self, mode: WallpaperMode, fetch_one: F) -> Result<(), UpdateError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<PathBuf, UpdateError>> + Send,
    {
        let displays = self.server.displays();
        log::debug!("Applying in {} mode to {} display(s)", mode, displays.len());

        match mode {
            WallpaperMode::Same => {
                let path = fetch_one().await?;
                for display in &displays {
                    self.apply_to(display, &path)?;
                }
            }
            WallpaperMode::Different => {
                for display in &displays {
                    let path = fetch_one().await?;
                    self.apply_to(display, &path)?;
                }
            }
        }

        Ok(())
    }

    fn apply_to(&self, display: &DisplayInfo, path: &Path) -> Result<(), UpdateError> {
        if !path.exists() {
            return Err(UpdateError::FileNotFound(path.display().to_string()));
        }

        self.server.set_wallpaper(display, path)?;
        log::info!("Applied {} to display {}", path.display(), display.name);
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeDisplayServer;
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn existing_file(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"img").unwrap();
        path
    }

    #[tokio::test]
    async fn test_same_mode_fetches_once_and_applies_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let path = existing_file(&dir, "a_1.jpg");
        let applier = DisplayApplier::new(FakeDisplayServer::new(2));
        let fetches = AtomicUsize::new(0);

        applier
            .apply(WallpaperMode::Same, || {
                fetches.fetch_add(1, Ordering::SeqCst);
                let p = path.clone();
                async move { Ok(p) }
            })
            .await
            .unwrap();

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        let applied = applier.server().applied.lock().unwrap();
        assert_eq!(applied.len(), 2);
        assert!(applied.iter().all(|(_, p)| *p == path));
    }

    #[tokio::test]
    async fn test_different_mode_fetches_per_display() {
        let dir = tempfile::tempdir().unwrap();
        let first = existing_file(&dir, "a_1.jpg");
        let second = existing_file(&dir, "b_2.jpg");
        let queue = Mutex::new(VecDeque::from([first.clone(), second.clone()]));

        let applier = DisplayApplier::new(FakeDisplayServer::new(2));
        let fetches = AtomicUsize::new(0);

        applier
            .apply(WallpaperMode::Different, || {
                fetches.fetch_add(1, Ordering::SeqCst);
                let p = queue.lock().unwrap().pop_front().unwrap();
                async move { Ok(p) }
            })
            .await
            .unwrap();

        assert_eq!(fetches.load(Ordering::SeqCst), 2);
        let applied = applier.server().applied.lock().unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0].1, first);
        assert_eq!(applied[1].1, second);
    }

    #[tokio::test]
    async fn test_missing_source_fails_before_any_os_call() {
        let applier = DisplayApplier::new(FakeDisplayServer::new(2));
        let missing = PathBuf::from("/nonexistent/wallpaper.jpg");

        let err = applier
            .apply(WallpaperMode::Same, || {
                let p = missing.clone();
                async move { Ok(p) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, UpdateError::FileNotFound(_)));
        assert_eq!(applier.server().applied_count(), 0);
    }

    #[tokio::test]
    async fn test_failing_display_stops_the_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = existing_file(&dir, "a_1.jpg");
        let applier = DisplayApplier::new(FakeDisplayServer::new(3).failing_at(1));

        let err = applier
            .apply(WallpaperMode::Same, || {
                let p = path.clone();
                async move { Ok(p) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, UpdateError::WallpaperSetFailed(_)));
        // Display 0 keeps the new image; displays 1 and 2 were never reached
        // or rejected it. Partial application is accepted, not rolled back.
        assert_eq!(applier.server().applied_count(), 1);
    }

    #[tokio::test]
    async fn test_different_mode_stops_fetching_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = existing_file(&dir, "a_1.jpg");
        let applier = DisplayApplier::new(FakeDisplayServer::new(3).failing_at(1));
        let fetches = AtomicUsize::new(0);

        let err = applier
            .apply(WallpaperMode::Different, || {
                fetches.fetch_add(1, Ordering::SeqCst);
                let p = path.clone();
                async move { Ok(p) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, UpdateError::WallpaperSetFailed(_)));
        // Fetched for displays 0 and 1 only; the third display was never
        // reached.
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
        assert_eq!(applier.server().applied_count(), 1);
    }

    #[tokio::test]
    async fn test_same_mode_with_no_displays_still_fetches_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = existing_file(&dir, "a_1.jpg");
        let applier = DisplayApplier::new(FakeDisplayServer::new(0));
        let fetches = AtomicUsize::new(0);

        applier
            .apply(WallpaperMode::Same, || {
                fetches.fetch_add(1, Ordering::SeqCst);
                let p = path.clone();
                async move { Ok(p) }
            })
            .await
            .unwrap();

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(applier.server().applied_count(), 0);
    }
}
