use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

pub const STATE_DIR_NAME: &str = ".docfetch";
pub const INDEX_FILENAME: &str = "metadata.json";
pub const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub root: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub root_dir: PathBuf,
    pub state_dir: PathBuf,
    pub index_path: PathBuf,
    pub config_path: PathBuf,
    pub root_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "root_dir={} ({})\nstate_dir={}\nindex_path={}\nconfig_path={} ({})",
            normalize_for_display(&self.root_dir),
            self.root_source.as_str(),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.index_path),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
        )
    }
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (root_dir, root_source) = if let Some(path) = overrides.root.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = lookup_env("DOCFETCH_ROOT") {
        (
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        )
    } else {
        detect_root_heuristic(&context.cwd)
    };

    let state_dir = root_dir.join(STATE_DIR_NAME);
    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &root_dir), ValueSource::Flag)
    } else if let Some(value) = lookup_env("DOCFETCH_CONFIG") {
        (
            absolutize(Path::new(value.trim()), &root_dir),
            ValueSource::Env,
        )
    } else {
        (state_dir.join(CONFIG_FILENAME), ValueSource::Default)
    };

    Ok(ResolvedPaths {
        index_path: state_dir.join(INDEX_FILENAME),
        root_dir,
        state_dir,
        config_path,
        root_source,
        config_source,
    })
}

/// Nearest ancestor that already carries a state directory wins; a
/// fresh directory falls back to the cwd itself.
fn detect_root_heuristic(cwd: &Path) -> (PathBuf, ValueSource) {
    let mut cursor = Some(cwd);
    while let Some(current) = cursor {
        if current.join(STATE_DIR_NAME).is_dir() {
            return (current.to_path_buf(), ValueSource::Heuristic);
        }
        cursor = current.parent();
    }
    (cwd.to_path_buf(), ValueSource::Default)
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub root_exists: bool,
    pub state_dir_exists: bool,
    pub index_exists: bool,
    pub index_size_bytes: Option<u64>,
    pub config_exists: bool,
    pub warnings: Vec<String>,
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> Result<RuntimeStatus> {
    let root_exists = paths.root_dir.exists();
    let state_dir_exists = paths.state_dir.exists();
    let index_exists = paths.index_path.exists();
    let config_exists = paths.config_path.exists();
    let index_size_bytes = if index_exists {
        let metadata = fs::metadata(&paths.index_path)
            .with_context(|| format!("failed to inspect {}", paths.index_path.display()))?;
        Some(metadata.len())
    } else {
        None
    };

    let mut warnings = Vec::new();
    if !state_dir_exists {
        warnings.push(format!(
            "{STATE_DIR_NAME}/ is missing; run `docfetch init` before fetch or sync commands"
        ));
    }
    if state_dir_exists && !index_exists {
        warnings.push("metadata index is missing; fetched documents are not tracked".to_string());
    }

    Ok(RuntimeStatus {
        root_exists,
        state_dir_exists,
        index_exists,
        index_size_bytes,
        config_exists,
        warnings,
    })
}

pub fn ensure_runtime_ready(paths: &ResolvedPaths, status: &RuntimeStatus) -> Result<()> {
    if !status.state_dir_exists {
        bail!(
            "Runtime layout is not initialized.\nMissing: {}\nRun: docfetch init --root {}",
            normalize_for_display(&paths.state_dir),
            normalize_for_display(&paths.root_dir)
        );
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub materialize_config: bool,
    pub force: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            materialize_config: true,
            force: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
    pub wrote_index: bool,
}

pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let mut created_dirs = Vec::new();
    for dir in [&paths.root_dir, &paths.state_dir] {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            created_dirs.push(dir.clone());
        }
    }

    let wrote_index = if paths.index_path.exists() && !options.force {
        false
    } else {
        crate::store::write_empty_index(&paths.index_path)?;
        true
    };

    let wrote_config = if options.materialize_config {
        write_text_file(
            &paths.config_path,
            &render_materialized_config(paths),
            options.force,
        )?
    } else {
        false
    };

    Ok(InitReport {
        created_dirs,
        wrote_config,
        wrote_index,
    })
}

pub fn render_materialized_config(paths: &ResolvedPaths) -> String {
    let root_dir = normalize_for_display(&paths.root_dir);
    format!(
        "# docfetch configuration (materialized by `docfetch init`)\n\n[connection]\n# id = \"default\"\n# base_url = \"https://your-wiki.example.org\"\n# user_agent = \"docfetch/0.1\"\n# Credentials come from the environment: CONFLUENCE_USER / CONFLUENCE_TOKEN.\n\n[sync]\n# default_category = \"pages\"\n\n# root_dir = \"{root_dir}\"\n"
    )
}

fn write_text_file(path: &Path, content: &str, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use tempfile::tempdir;

    use super::{
        InitOptions, PathOverrides, ResolutionContext, ValueSource, ensure_runtime_ready,
        init_layout, inspect_runtime, resolve_paths_with_lookup,
    };

    #[test]
    fn resolve_paths_prefers_flag_over_env() {
        let temp = tempdir().expect("tempdir");
        let cwd = temp.path().join("cwd");
        fs::create_dir_all(&cwd).expect("create cwd");
        let from_flag = temp.path().join("flag-root");

        let context = ResolutionContext { cwd: cwd.clone() };
        let overrides = PathOverrides {
            root: Some(from_flag.clone()),
            ..PathOverrides::default()
        };
        let env = HashMap::from([(
            "DOCFETCH_ROOT".to_string(),
            temp.path().join("env-root").to_string_lossy().to_string(),
        )]);

        let resolved = resolve_paths_with_lookup(&context, &overrides, |key| env.get(key).cloned())
            .expect("resolve paths");
        assert_eq!(resolved.root_dir, from_flag);
        assert_eq!(resolved.root_source, ValueSource::Flag);
    }

    #[test]
    fn heuristic_walks_up_to_an_initialized_ancestor() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("workspace");
        let nested = root.join("pages").join("deep");
        fs::create_dir_all(root.join(".docfetch")).expect("state dir");
        fs::create_dir_all(&nested).expect("nested");

        let context = ResolutionContext { cwd: nested };
        let resolved =
            resolve_paths_with_lookup(&context, &PathOverrides::default(), |_| None)
                .expect("resolve");
        assert_eq!(resolved.root_dir, root);
        assert_eq!(resolved.root_source, ValueSource::Heuristic);
    }

    #[test]
    fn init_layout_creates_state_dir_index_and_config() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        let context = ResolutionContext { cwd: root.clone() };
        let overrides = PathOverrides {
            root: Some(root.clone()),
            ..PathOverrides::default()
        };
        let paths = resolve_paths_with_lookup(&context, &overrides, |_| None).expect("resolve");

        let report = init_layout(&paths, &InitOptions::default()).expect("init");
        assert!(!report.created_dirs.is_empty());
        assert!(report.wrote_index);
        assert!(report.wrote_config);
        assert!(paths.index_path.exists());
        assert!(paths.config_path.exists());

        // Second init leaves existing files alone.
        let second = init_layout(&paths, &InitOptions::default()).expect("init again");
        assert!(!second.wrote_index);
        assert!(!second.wrote_config);
    }

    #[test]
    fn readiness_fails_before_init_and_warns_about_it() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        fs::create_dir_all(&root).expect("create root");
        let context = ResolutionContext { cwd: root.clone() };
        let overrides = PathOverrides {
            root: Some(root),
            ..PathOverrides::default()
        };
        let paths = resolve_paths_with_lookup(&context, &overrides, |_| None).expect("resolve");

        let status = inspect_runtime(&paths).expect("inspect");
        assert!(!status.warnings.is_empty());
        let error = ensure_runtime_ready(&paths, &status).expect_err("must fail");
        assert!(error.to_string().contains("not initialized"));
    }
}
