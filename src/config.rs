use anyhow::{bail, Context as _, Result};
use serde::Deserialize;
use std::{
    fmt,
    path::{Path, PathBuf},
};

use crate::{cache::TokenPolicy, env::EnvSource};

pub const CONFIG_FILE_NAME: &str = "testbed.toml";

/// Resolver settings, read from `testbed.toml`. Every field has a default,
/// so a project without the file works out of the box.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub layout: LayoutConfig,

    #[serde(default)]
    pub resolve: ResolveConfig,

    #[serde(default)]
    pub publish: PublishConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutConfig {
    #[serde(default = "default_environments_dir")]
    pub environments_dir: PathBuf,

    #[serde(default = "default_platforms_dir")]
    pub platforms_dir: PathBuf,

    #[serde(default = "default_dotenv")]
    pub dotenv: PathBuf,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            environments_dir: default_environments_dir(),
            platforms_dir: default_platforms_dir(),
            dotenv: default_dotenv(),
        }
    }
}

fn default_environments_dir() -> PathBuf {
    PathBuf::from("config/environments")
}

fn default_platforms_dir() -> PathBuf {
    PathBuf::from("config/drivers")
}

fn default_dotenv() -> PathBuf {
    PathBuf::from(".env")
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolveConfig {
    #[serde(default)]
    pub tokens: TokenPolicy,

    #[serde(default = "default_environment")]
    pub default_environment: String,

    #[serde(default = "default_platform")]
    pub default_platform: String,

    #[serde(default)]
    pub default_role: Option<String>,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            tokens: TokenPolicy::default(),
            default_environment: default_environment(),
            default_platform: default_platform(),
            default_role: None,
        }
    }
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_platform() -> String {
    "web".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublishConfig {
    #[serde(default = "default_shell")]
    pub shell: Shell,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
        }
    }
}

fn default_shell() -> Shell {
    Shell::Bash
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Shell {
    Zsh,
    Bash,
    Fish,
    Pwsh,
}

impl fmt::Display for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Shell::Zsh => "zsh",
            Shell::Bash => "bash",
            Shell::Fish => "fish",
            Shell::Pwsh => "pwsh",
        })
    }
}

impl Config {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let cfg: Self =
            toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))?;
        Ok(cfg)
    }

    /// Absolute locations of the layout entries, relative paths taken from `root`.
    pub fn environments_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.layout.environments_dir)
    }

    pub fn platforms_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.layout.platforms_dir)
    }

    pub fn dotenv_path(&self, root: &Path) -> PathBuf {
        root.join(&self.layout.dotenv)
    }
}

/// Project root precedence:
/// 1) CLI --root
/// 2) TESTBED_ROOT
/// 3) current directory
pub fn locate_root(cli_root: Option<&Path>, env: &dyn EnvSource) -> Result<PathBuf> {
    if let Some(p) = cli_root {
        if !p.is_dir() {
            bail!("--root was provided but is not a directory: {}", p.display());
        }
        return Ok(p.to_path_buf());
    }

    if let Some(p) = env_path(env, "TESTBED_ROOT") {
        if !p.is_dir() {
            bail!("TESTBED_ROOT is set but is not a directory: {}", p.display());
        }
        return Ok(p);
    }

    std::env::current_dir().context("could not determine current directory")
}

/// Config path precedence:
/// 1) CLI --config (must exist)
/// 2) TESTBED_CONFIG (must exist)
/// 3) <root>/testbed.toml, if present
///
/// `None` means built-in defaults.
pub fn locate_config(
    cli_config: Option<&Path>,
    root: &Path,
    env: &dyn EnvSource,
) -> Result<Option<PathBuf>> {
    if let Some(p) = cli_config {
        if !p.is_file() {
            bail!("--config was provided but file does not exist: {}", p.display());
        }
        return Ok(Some(p.to_path_buf()));
    }

    if let Some(p) = env_path(env, "TESTBED_CONFIG") {
        if !p.is_file() {
            bail!(
                "TESTBED_CONFIG is set but file does not exist: {}",
                p.display()
            );
        }
        return Ok(Some(p));
    }

    let p = root.join(CONFIG_FILE_NAME);
    Ok(p.is_file().then_some(p))
}

/// Locate and load the config; defaults when there is none.
pub fn load_config(cli_config: Option<&Path>, root: &Path, env: &dyn EnvSource) -> Result<Config> {
    match locate_config(cli_config, root, env)? {
        Some(path) => Config::load_from_path(&path),
        None => Ok(Config::default()),
    }
}

fn env_path(env: &dyn EnvSource, key: &str) -> Option<PathBuf> {
    env.var(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::EnvMap;
    use tempfile::TempDir;

    #[test]
    fn defaults_without_file() {
        let tmp = TempDir::new().unwrap();
        let cfg = load_config(None, tmp.path(), &EnvMap::new()).unwrap();

        assert_eq!(cfg.resolve.tokens, TokenPolicy::PerCall);
        assert_eq!(cfg.resolve.default_environment, "dev");
        assert_eq!(cfg.resolve.default_platform, "web");
        assert_eq!(cfg.publish.shell, Shell::Bash);
        assert_eq!(
            cfg.environments_dir(tmp.path()),
            tmp.path().join("config/environments")
        );
        assert_eq!(cfg.platforms_dir(tmp.path()), tmp.path().join("config/drivers"));
    }

    #[test]
    fn root_file_is_picked_up() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE_NAME),
            "[layout]\nplatforms_dir = \"drivers\"\n\n[resolve]\ntokens = \"frozen\"\ndefault_role = \"admin\"\n",
        )
        .unwrap();

        let cfg = load_config(None, tmp.path(), &EnvMap::new()).unwrap();
        assert_eq!(cfg.resolve.tokens, TokenPolicy::Frozen);
        assert_eq!(cfg.resolve.default_role.as_deref(), Some("admin"));
        assert_eq!(cfg.platforms_dir(tmp.path()), tmp.path().join("drivers"));
        assert_eq!(cfg.layout.dotenv, PathBuf::from(".env"));
    }

    #[test]
    fn explicit_paths_must_exist() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope.toml");

        assert!(locate_config(Some(missing.as_path()), tmp.path(), &EnvMap::new()).is_err());

        let mut env = EnvMap::new();
        env.insert(
            "TESTBED_CONFIG".to_string(),
            missing.to_string_lossy().to_string(),
        );
        assert!(locate_config(None, tmp.path(), &env).is_err());
    }

    #[test]
    fn env_config_beats_root_file() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE_NAME), "").unwrap();
        let other = tmp.path().join("ci.toml");
        std::fs::write(&other, "[resolve]\ndefault_platform = \"android\"\n").unwrap();

        let mut env = EnvMap::new();
        env.insert("TESTBED_CONFIG".to_string(), other.to_string_lossy().to_string());

        let cfg = load_config(None, tmp.path(), &env).unwrap();
        assert_eq!(cfg.resolve.default_platform, "android");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[resolve]\ntoken = \"frozen\"\n").unwrap();
        assert!(Config::load_from_path(&path).is_err());
    }

    #[test]
    fn root_from_env() {
        let tmp = TempDir::new().unwrap();
        let mut env = EnvMap::new();
        env.insert(
            "TESTBED_ROOT".to_string(),
            tmp.path().to_string_lossy().to_string(),
        );
        assert_eq!(locate_root(None, &env).unwrap(), tmp.path());
        assert!(locate_root(Some(tmp.path().join("missing").as_path()), &env).is_err());
    }
}
