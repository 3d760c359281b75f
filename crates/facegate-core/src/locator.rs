//! Model resource discovery.
//!
//! The three model artifacts must come from one directory. Discovery runs
//! three strategies in order: the caller's candidate directories, a
//! breadth-first search of the application tree, and a short recovery list.

use crate::types::ModelGeneration;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DETECTOR_MODEL: &str = "det_10g.onnx";
pub const LANDMARK_MODEL: &str = "landmark_5pt.onnx";
pub const RECOGNIZER_MODEL: &str = "w600k_r50.onnx";

/// Name of the model subfolder probed next to each candidate directory.
pub const MODEL_SUBDIR: &str = "model";

/// Conventional install locations, probed after the application-relative ones.
pub const INSTALL_DIRS: &[&str] = &[
    "/usr/local/share/facegate/model",
    "/usr/share/facegate/model",
    "/opt/facegate/model",
];

/// Last-resort locations. Relative entries are resolved against the working directory.
pub const RECOVERY_DIRS: &[&str] = &[
    "models",
    "../models",
    "resources/model",
    "/var/lib/facegate/model",
];

/// Depth limit for the recursive application-tree search.
pub const MAX_SEARCH_DEPTH: usize = 8;

#[derive(Error, Debug)]
pub enum LocateError {
    #[error("model files not found ({files}) after searching {searched} directories")]
    NotFound { files: String, searched: usize },
    #[error("failed to read model file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// File names of the three required artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub detector: String,
    pub landmarker: String,
    pub recognizer: String,
}

impl Default for ModelFiles {
    fn default() -> Self {
        Self {
            detector: DETECTOR_MODEL.to_string(),
            landmarker: LANDMARK_MODEL.to_string(),
            recognizer: RECOGNIZER_MODEL.to_string(),
        }
    }
}

impl ModelFiles {
    fn names(&self) -> [&str; 3] {
        [
            self.detector.as_str(),
            self.landmarker.as_str(),
            self.recognizer.as_str(),
        ]
    }

    /// True when `dir` holds all three artifacts as regular files.
    pub fn present_in(&self, dir: &Path) -> bool {
        self.names().iter().all(|name| dir.join(name).is_file())
    }

    fn bundle_in(&self, dir: &Path, found_by: Strategy) -> ModelBundle {
        ModelBundle {
            directory: dir.to_path_buf(),
            detector: dir.join(&self.detector),
            landmarker: dir.join(&self.landmarker),
            recognizer: dir.join(&self.recognizer),
            found_by,
        }
    }
}

/// Which discovery step produced a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Candidates,
    Recursive,
    Recovery,
}

/// Resolved paths of a mutually consistent model set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelBundle {
    pub directory: PathBuf,
    pub detector: PathBuf,
    pub landmarker: PathBuf,
    pub recognizer: PathBuf,
    pub found_by: Strategy,
}

impl ModelBundle {
    /// Fingerprint of the feature model. Embeddings are only comparable
    /// within one generation.
    pub fn generation(&self) -> Result<ModelGeneration, LocateError> {
        let digest = sha256_file_hex(&self.recognizer)?;
        let stem = self
            .recognizer
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(ModelGeneration(format!("{stem}-{}", &digest[..16])))
    }
}

/// Where to look for models.
#[derive(Debug, Clone)]
pub struct SearchPlan {
    pub candidates: Vec<PathBuf>,
    pub recursive_root: Option<PathBuf>,
    pub recovery: Vec<PathBuf>,
    pub files: ModelFiles,
    pub max_depth: usize,
}

impl SearchPlan {
    /// A plan that only probes the given directories.
    pub fn from_dirs(candidates: Vec<PathBuf>, files: ModelFiles) -> Self {
        Self {
            candidates: dedup(candidates),
            recursive_root: None,
            recovery: Vec::new(),
            files,
            max_depth: MAX_SEARCH_DEPTH,
        }
    }

    /// The standard kiosk layout: application directory and its `model`
    /// folder, the working directory, up to three parents of the application
    /// directory, install locations, then recursive and recovery fallbacks.
    pub fn standard(app_dir: &Path, cwd: &Path) -> Self {
        let mut candidates = vec![
            app_dir.join(MODEL_SUBDIR),
            app_dir.to_path_buf(),
            cwd.join(MODEL_SUBDIR),
            cwd.to_path_buf(),
        ];
        for parent in app_dir.ancestors().skip(1).take(3) {
            candidates.push(parent.join(MODEL_SUBDIR));
            candidates.push(parent.to_path_buf());
        }
        candidates.extend(INSTALL_DIRS.iter().map(PathBuf::from));

        let recovery = RECOVERY_DIRS
            .iter()
            .map(|d| {
                let p = Path::new(d);
                if p.is_absolute() {
                    p.to_path_buf()
                } else {
                    cwd.join(p)
                }
            })
            .collect();

        Self {
            candidates: dedup(candidates),
            recursive_root: Some(app_dir.to_path_buf()),
            recovery,
            files: ModelFiles::default(),
            max_depth: MAX_SEARCH_DEPTH,
        }
    }

    /// Put caller-supplied directories ahead of the standard candidates.
    pub fn with_extra_dirs(mut self, extra: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut candidates: Vec<PathBuf> = extra.into_iter().collect();
        candidates.append(&mut self.candidates);
        self.candidates = dedup(candidates);
        self
    }

    pub fn with_files(mut self, files: ModelFiles) -> Self {
        self.files = files;
        self
    }
}

/// Resolve the model bundle described by `plan`.
///
/// Fails only when every strategy fails. Files found in different
/// directories are never combined.
pub fn locate(plan: &SearchPlan) -> Result<ModelBundle, LocateError> {
    let mut searched = 0usize;

    for dir in &plan.candidates {
        searched += 1;
        if plan.files.present_in(dir) {
            tracing::info!(dir = %dir.display(), "model bundle found in candidate directory");
            return Ok(plan.files.bundle_in(dir, Strategy::Candidates));
        }
        tracing::debug!(dir = %dir.display(), "candidate directory incomplete");
    }

    if let Some(root) = &plan.recursive_root {
        tracing::warn!(
            root = %root.display(),
            "no candidate directory holds all models; searching application tree"
        );
        let (found, visited) = search_tree(root, &plan.files, plan.max_depth);
        searched += visited;
        if let Some(dir) = found {
            tracing::info!(dir = %dir.display(), "model bundle found by recursive search");
            return Ok(plan.files.bundle_in(&dir, Strategy::Recursive));
        }
    }

    for dir in &plan.recovery {
        searched += 1;
        if plan.files.present_in(dir) {
            tracing::warn!(dir = %dir.display(), "model bundle found in recovery location");
            return Ok(plan.files.bundle_in(dir, Strategy::Recovery));
        }
    }

    Err(LocateError::NotFound {
        files: plan.files.names().join(", "),
        searched,
    })
}

/// Breadth-first search for the shallowest directory holding all files.
/// Symlinked directories are not followed. Returns the hit and the number of
/// directories visited.
fn search_tree(root: &Path, files: &ModelFiles, max_depth: usize) -> (Option<PathBuf>, usize) {
    let mut queue = VecDeque::from([(root.to_path_buf(), 0usize)]);
    let mut visited = 0usize;

    while let Some((dir, depth)) = queue.pop_front() {
        visited += 1;
        if files.present_in(&dir) {
            return (Some(dir), visited);
        }
        if depth >= max_depth {
            continue;
        }
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        let mut subdirs: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .map(|e| e.path())
            .collect();
        subdirs.sort();
        queue.extend(subdirs.into_iter().map(|d| (d, depth + 1)));
    }

    (None, visited)
}

fn dedup(dirs: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = Vec::with_capacity(dirs.len());
    for dir in dirs {
        if !out.contains(&dir) {
            out.push(dir);
        }
    }
    out
}

/// Compute SHA-256 hex digest of a file.
pub fn sha256_file_hex(path: &Path) -> Result<String, LocateError> {
    let read_err = |source: std::io::Error| LocateError::Read {
        path: path.to_path_buf(),
        source,
    };
    let mut file = fs::File::open(path).map_err(read_err)?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = file.read(&mut buf).map_err(read_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "facegate-locator-{tag}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn install_models(dir: &Path, files: &ModelFiles) {
        fs::create_dir_all(dir).unwrap();
        for name in files.names() {
            fs::write(dir.join(name), name.as_bytes()).unwrap();
        }
    }

    #[test]
    fn test_first_complete_candidate_wins() {
        let root = scratch("first");
        let files = ModelFiles::default();
        let a = root.join("a");
        let b = root.join("b");
        fs::create_dir_all(&a).unwrap();
        install_models(&b, &files);
        install_models(&root.join("c"), &files);

        let plan = SearchPlan::from_dirs(vec![a, b.clone(), root.join("c")], files);
        let bundle = locate(&plan).unwrap();
        assert_eq!(bundle.directory, b);
        assert_eq!(bundle.found_by, Strategy::Candidates);
        assert_eq!(bundle.recognizer, b.join(RECOGNIZER_MODEL));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_split_artifacts_are_rejected() {
        let root = scratch("split");
        let files = ModelFiles::default();
        let a = root.join("a");
        let b = root.join("b");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();
        fs::write(a.join(&files.detector), b"d").unwrap();
        fs::write(a.join(&files.landmarker), b"l").unwrap();
        fs::write(b.join(&files.recognizer), b"r").unwrap();

        let plan = SearchPlan::from_dirs(vec![a, b], files);
        let err = locate(&plan).unwrap_err();
        assert!(matches!(err, LocateError::NotFound { searched: 2, .. }));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_recursive_fallback_finds_nested_bundle() {
        let root = scratch("recursive");
        let files = ModelFiles::default();
        let nested = root.join("deploy").join("assets").join("weights");
        install_models(&nested, &files);

        let mut plan = SearchPlan::from_dirs(vec![root.join("missing")], files);
        plan.recursive_root = Some(root.clone());
        let bundle = locate(&plan).unwrap();
        assert_eq!(bundle.directory, nested);
        assert_eq!(bundle.found_by, Strategy::Recursive);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_recursive_search_respects_depth_limit() {
        let root = scratch("depth");
        let files = ModelFiles::default();
        install_models(&root.join("x").join("y").join("z"), &files);

        let (found, _) = search_tree(&root, &files, 2);
        assert!(found.is_none());
        let (found, _) = search_tree(&root, &files, 3);
        assert!(found.is_some());
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_recovery_list_is_last_resort() {
        let root = scratch("recovery");
        let files = ModelFiles::default();
        let rescue = root.join("rescue");
        install_models(&rescue, &files);

        let mut plan = SearchPlan::from_dirs(vec![root.join("nope")], files);
        plan.recursive_root = Some(root.join("empty-tree"));
        plan.recovery = vec![rescue.clone()];
        let bundle = locate(&plan).unwrap();
        assert_eq!(bundle.directory, rescue);
        assert_eq!(bundle.found_by, Strategy::Recovery);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_standard_plan_order() {
        let app = Path::new("/srv/kiosk/bin/release");
        let cwd = Path::new("/home/exam");
        let plan = SearchPlan::standard(app, cwd);

        assert_eq!(plan.candidates[0], app.join("model"));
        assert_eq!(plan.candidates[1], app.to_path_buf());
        assert_eq!(plan.candidates[2], cwd.join("model"));
        assert_eq!(plan.candidates[3], cwd.to_path_buf());
        assert_eq!(plan.candidates[4], PathBuf::from("/srv/kiosk/bin/model"));
        assert!(plan.candidates.contains(&PathBuf::from("/srv/model")));
        assert!(!plan.candidates.contains(&PathBuf::from("/model")));
        assert!(plan.candidates.contains(&PathBuf::from(INSTALL_DIRS[0])));
        assert_eq!(plan.recursive_root.as_deref(), Some(app));
        assert_eq!(plan.recovery[0], cwd.join("models"));
    }

    #[test]
    fn test_extra_dirs_go_first_without_duplicates() {
        let app = Path::new("/srv/kiosk");
        let plan = SearchPlan::standard(app, app)
            .with_extra_dirs(vec![PathBuf::from("/data/models"), app.join("model")]);
        assert_eq!(plan.candidates[0], PathBuf::from("/data/models"));
        assert_eq!(plan.candidates[1], app.join("model"));
        let count = plan.candidates.iter().filter(|d| **d == app.join("model")).count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_generation_tracks_recognizer_contents() {
        let root = scratch("generation");
        let files = ModelFiles::default();
        install_models(&root, &files);
        let plan = SearchPlan::from_dirs(vec![root.clone()], files.clone());
        let bundle = locate(&plan).unwrap();

        let first = bundle.generation().unwrap();
        assert!(first.0.starts_with("w600k_r50-"));
        assert_eq!(first, bundle.generation().unwrap());

        fs::write(root.join(&files.recognizer), b"retrained").unwrap();
        assert_ne!(first, bundle.generation().unwrap());
        let _ = fs::remove_dir_all(&root);
    }
}
