use std::{
    fmt, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{
    descriptor::Descriptor,
    error::{Error, Result},
};

/// The two descriptor families a test run is composed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    Environment,
    Platform,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Namespace::Environment => "environment",
            Namespace::Platform => "platform",
        })
    }
}

/// Where descriptors come from. `locate` must be cheap and side-effect free;
/// it also produces the cache key.
pub trait DescriptorSource {
    fn locate(&self, namespace: Namespace, name: &str) -> PathBuf;

    fn load(&self, namespace: Namespace, name: &str) -> Result<Descriptor>;
}

impl<S: DescriptorSource + ?Sized> DescriptorSource for &S {
    fn locate(&self, namespace: Namespace, name: &str) -> PathBuf {
        (**self).locate(namespace, name)
    }

    fn load(&self, namespace: Namespace, name: &str) -> Result<Descriptor> {
        (**self).load(namespace, name)
    }
}

/// Extensions probed in order. The first one is reported when nothing exists.
const EXTENSIONS: [&str; 3] = ["yaml", "yml", "toml"];

/// One file per descriptor under a directory per namespace.
#[derive(Debug, Clone)]
pub struct FileStore {
    environments_dir: PathBuf,
    platforms_dir: PathBuf,
}

impl FileStore {
    pub fn new(environments_dir: impl Into<PathBuf>, platforms_dir: impl Into<PathBuf>) -> Self {
        Self {
            environments_dir: environments_dir.into(),
            platforms_dir: platforms_dir.into(),
        }
    }

    pub fn dir(&self, namespace: Namespace) -> &Path {
        match namespace {
            Namespace::Environment => &self.environments_dir,
            Namespace::Platform => &self.platforms_dir,
        }
    }

    /// Names of every descriptor present in `namespace`, sorted and deduplicated.
    pub fn names(&self, namespace: Namespace) -> anyhow::Result<Vec<String>> {
        let dir = self.dir(namespace);
        let escaped = glob::Pattern::escape(&dir.to_string_lossy());

        let mut out = Vec::new();
        for ext in EXTENSIONS {
            let pattern = format!("{escaped}/*.{ext}");
            for entry in glob::glob(&pattern)? {
                let path = entry?;
                if !path.is_file() {
                    continue;
                }
                if let Some(stem) = path.file_stem() {
                    out.push(stem.to_string_lossy().to_string());
                }
            }
        }

        out.sort();
        out.dedup();
        Ok(out)
    }
}

impl DescriptorSource for FileStore {
    fn locate(&self, namespace: Namespace, name: &str) -> PathBuf {
        let dir = self.dir(namespace);
        EXTENSIONS
            .iter()
            .map(|ext| dir.join(format!("{name}.{ext}")))
            .find(|p| p.is_file())
            .unwrap_or_else(|| dir.join(format!("{name}.{}", EXTENSIONS[0])))
    }

    fn load(&self, namespace: Namespace, name: &str) -> Result<Descriptor> {
        let path = self.locate(namespace, name);

        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::DescriptorNotFound {
                    namespace,
                    name: name.to_string(),
                    path,
                });
            }
            Err(source) => return Err(Error::Io { path, source }),
        };

        debug!(%namespace, name, path = %path.display(), "read descriptor");
        parse_descriptor(&path, &text)
    }
}

fn parse_descriptor(path: &Path, text: &str) -> Result<Descriptor> {
    let is_toml = path.extension().is_some_and(|ext| ext == "toml");

    let parsed = if is_toml {
        Descriptor::from_toml_str(text)
    } else {
        Descriptor::from_yaml_str(text)
    };

    parsed.map_err(|message| Error::Parse {
        path: path.to_path_buf(),
        message,
    })
}
