use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const CONFIG_FILENAME: &str = "config.toml";
pub const SESSION_FILENAME: &str = "session.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub state_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub session_path: PathBuf,
    pub state_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "state_dir={} ({})\nconfig_path={} ({})\nsession_path={}",
            normalize_for_display(&self.state_dir),
            self.state_source.as_str(),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            normalize_for_display(&self.session_path),
        )
    }
}

pub fn resolve_paths(overrides: &PathOverrides) -> Result<ResolvedPaths> {
    let cwd = env::current_dir().context("failed to read current directory")?;
    Ok(resolve_paths_with_lookup(&cwd, overrides, |key| {
        env::var(key).ok()
    }))
}

fn resolve_paths_with_lookup<F>(
    cwd: &Path,
    overrides: &PathOverrides,
    lookup_env: F,
) -> ResolvedPaths
where
    F: Fn(&str) -> Option<String>,
{
    let (state_dir, state_source) = if let Some(path) = overrides.state_dir.as_deref() {
        (absolutize(path, cwd), ValueSource::Flag)
    } else if let Some(value) = lookup_env("GAPTOOL_STATE_DIR") {
        (absolutize(Path::new(value.trim()), cwd), ValueSource::Env)
    } else {
        (cwd.join(".gaptool"), ValueSource::Default)
    };

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, cwd), ValueSource::Flag)
    } else if let Some(value) = lookup_env("GAPTOOL_CONFIG") {
        (absolutize(Path::new(value.trim()), cwd), ValueSource::Env)
    } else {
        (state_dir.join(CONFIG_FILENAME), ValueSource::Default)
    };

    ResolvedPaths {
        session_path: state_dir.join(SESSION_FILENAME),
        state_dir,
        config_path,
        config_source,
        state_source,
    }
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
}

pub fn init_layout(paths: &ResolvedPaths, config_content: &str, force: bool) -> Result<InitReport> {
    let mut created_dirs = Vec::new();
    if !paths.state_dir.exists() {
        fs::create_dir_all(&paths.state_dir)
            .with_context(|| format!("failed to create {}", paths.state_dir.display()))?;
        created_dirs.push(paths.state_dir.clone());
    }

    let wrote_config = write_text_file(&paths.config_path, config_content, force)?;

    Ok(InitReport {
        created_dirs,
        wrote_config,
    })
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn write_text_file(path: &Path, content: &str, force: bool) -> Result<bool> {
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

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
