use facegate_core::locator::{ModelFiles, SearchPlan};
use std::path::{Path, PathBuf};

/// Kiosk configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Application directory; the model search starts here (default: the
    /// executable's directory).
    pub app_dir: PathBuf,
    /// Extra model directories, probed before the standard locations.
    pub model_dirs: Vec<PathBuf>,
    /// Path to the kiosk SQLite database.
    pub db_path: PathBuf,
    /// Raw threshold override; takes precedence over the stored setting.
    pub threshold: Option<String>,
    /// Depth of the engine request queue.
    pub queue_depth: usize,
    pub model_files: ModelFiles,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let app_dir = var("FACEGATE_APP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_app_dir);

        let model_dirs = var("FACEGATE_MODEL_DIRS")
            .map(|v| {
                v.split(':')
                    .filter(|s| !s.trim().is_empty())
                    .map(|s| PathBuf::from(s.trim()))
                    .collect()
            })
            .unwrap_or_default();

        let db_path = var("FACEGATE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| app_dir.join("database").join("kiosk.db"));

        let defaults = ModelFiles::default();
        let model_files = ModelFiles {
            detector: var("FACEGATE_DETECTOR_MODEL").unwrap_or(defaults.detector),
            landmarker: var("FACEGATE_LANDMARK_MODEL").unwrap_or(defaults.landmarker),
            recognizer: var("FACEGATE_RECOGNIZER_MODEL").unwrap_or(defaults.recognizer),
        };

        Self {
            app_dir,
            model_dirs,
            db_path,
            threshold: var("FACEGATE_THRESHOLD"),
            queue_depth: parse_or(var("FACEGATE_QUEUE_DEPTH"), 4usize).max(1),
            model_files,
        }
    }

    /// Model search plan for this configuration.
    pub fn search_plan(&self, cwd: &Path) -> SearchPlan {
        SearchPlan::standard(&self.app_dir, cwd)
            .with_extra_dirs(self.model_dirs.iter().cloned())
            .with_files(self.model_files.clone())
    }
}

fn default_app_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}
