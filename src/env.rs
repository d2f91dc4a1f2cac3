use anyhow::{Context as _, Result};
use regex::{Captures, Regex};
use std::{collections::BTreeMap, fs, path::Path, sync::LazyLock};
use tracing::{debug, warn};

/// `${NAME}` or `${NAME:-default}` inside a dotenv value.
static DOTENV_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^}:]*)(?::-([^}]*))?\}").expect("valid dotenv reference pattern")
});

pub type EnvMap = BTreeMap<String, String>;

/// Read-only view of environment variables. Nothing in this crate writes to
/// the process environment; lookups go through this trait instead.
pub trait EnvSource {
    fn var(&self, name: &str) -> Option<String>;
}

impl<E: EnvSource + ?Sized> EnvSource for &E {
    fn var(&self, name: &str) -> Option<String> {
        (**self).var(name)
    }
}

impl EnvSource for EnvMap {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// The live process environment, read on every lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var_os(name).map(|v| v.to_string_lossy().to_string())
    }
}

/// A base source with dotenv values filling in whatever it lacks.
#[derive(Debug, Clone, Default)]
pub struct Layered<E> {
    base: E,
    fallback: EnvMap,
}

impl<E: EnvSource> Layered<E> {
    pub fn new(base: E, fallback: EnvMap) -> Self {
        Self { base, fallback }
    }

    /// Layer the dotenv file at `path` under `base`. A missing file is not an error.
    pub fn with_dotenv(base: E, path: &Path) -> Result<Self> {
        if !path.is_file() {
            debug!(path = %path.display(), "no dotenv file");
            return Ok(Self::new(base, EnvMap::new()));
        }

        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read dotenv file: {}", path.display()))?;
        let vars = parse_env_text(&text, path, &base);
        debug!(path = %path.display(), count = vars.len(), "loaded dotenv file");

        Ok(Self::new(base, vars))
    }

    pub fn fallback(&self) -> &EnvMap {
        &self.fallback
    }
}

impl<E: EnvSource> EnvSource for Layered<E> {
    fn var(&self, name: &str) -> Option<String> {
        self.base.var(name).or_else(|| self.fallback.get(name).cloned())
    }
}

/// Dotenv rules:
/// - unquoted values end at a `#` preceded by whitespace
/// - single-quoted values are literal
/// - double-quoted values take `\n`-style escapes
/// - unquoted and double-quoted values expand `${NAME}` / `${NAME:-default}`,
///   looking in `base` first and then at lines already parsed
fn parse_env_text(text: &str, path: &Path, base: &dyn EnvSource) -> EnvMap {
    let mut out = EnvMap::new();

    for (idx, line) in text.lines().enumerate() {
        let mut s = line.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }

        if let Some(rest) = s.strip_prefix("export ") {
            s = rest.trim();
        }

        let Some((k, v)) = s.split_once('=') else {
            warn!(
                path = %path.display(),
                line = idx + 1,
                "skipping dotenv line (expected KEY=VALUE)"
            );
            continue;
        };

        let key = k.trim().to_string();
        if key.is_empty() {
            continue;
        }

        let raw = v.trim();
        let val = match raw.as_bytes().first() {
            Some(&q @ (b'\'' | b'"')) => {
                let Some(end) = closing_quote(&raw[1..], q) else {
                    warn!(
                        path = %path.display(),
                        line = idx + 1,
                        "skipping dotenv line (unterminated quote)"
                    );
                    continue;
                };
                let inner = &raw[1..1 + end];
                if q == b'"' {
                    interpolate(&unescape_double(inner), &out, base)
                } else {
                    inner.replace("\\'", "'").replace("\\\\", "\\")
                }
            }
            _ => interpolate(strip_inline_comment(raw).trim_end(), &out, base),
        };

        out.insert(key, val);
    }

    out
}

/// Byte offset of the first unescaped `quote` in `s`.
fn closing_quote(s: &str, quote: u8) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn strip_inline_comment(s: &str) -> &str {
    s.as_bytes()
        .windows(2)
        .position(|w| w[0].is_ascii_whitespace() && w[1] == b'#')
        .map_or(s, |i| &s[..i])
}

fn unescape_double(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other @ ('"' | '\'' | '\\')) => out.push(other),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn interpolate(value: &str, parsed: &EnvMap, base: &dyn EnvSource) -> String {
    if !value.contains("${") {
        return value.to_string();
    }

    DOTENV_REF
        .replace_all(value, |caps: &Captures<'_>| {
            let name = &caps[1];
            base.var(name)
                .or_else(|| parsed.get(name).cloned())
                .or_else(|| caps.get(2).map(|m| m.as_str().to_string()))
                .unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn map(pairs: &[(&str, &str)]) -> EnvMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parse_handles_export_quotes_and_comments() {
        let text = "# comment\n\nexport GRID_URL=http://grid:4444\nPASS='s3cret'\nNAME=\"qa bot\"\nbroken line\n=novalue\n";
        let vars = parse_env_text(text, Path::new(".env"), &EnvMap::new());

        assert_eq!(
            vars,
            map(&[
                ("GRID_URL", "http://grid:4444"),
                ("NAME", "qa bot"),
                ("PASS", "s3cret"),
            ])
        );
    }

    #[test]
    fn inline_comments_end_unquoted_values() {
        let text = "GRID_URL=http://grid:4444  # local grid\nPASS='p#ss' # note\nNAME=\"qa # bot\"\t# who\nTAG=a#b\n";
        let vars = parse_env_text(text, Path::new(".env"), &EnvMap::new());

        assert_eq!(vars["GRID_URL"], "http://grid:4444");
        assert_eq!(vars["PASS"], "p#ss");
        assert_eq!(vars["NAME"], "qa # bot");
        assert_eq!(vars["TAG"], "a#b");
    }

    #[test]
    fn double_quotes_unescape_single_quotes_stay_literal() {
        let text = "MULTI=\"line1\\nline2\"\nQUOTED=\"say \\\"hi\\\"\"\nRAW='a\\nb'\nOPEN=\"never closed\n";
        let vars = parse_env_text(text, Path::new(".env"), &EnvMap::new());

        assert_eq!(vars["MULTI"], "line1\nline2");
        assert_eq!(vars["QUOTED"], "say \"hi\"");
        assert_eq!(vars["RAW"], "a\\nb");
        assert!(!vars.contains_key("OPEN"));
    }

    #[test]
    fn references_expand_from_base_then_earlier_lines() {
        let text = "\
GRID_HOST=grid.local
GRID_URL=http://${GRID_HOST}:4444
APK=\"${APP_HOME}/app-${FLAVOR:-debug}.apk\"
LITERAL='${GRID_HOST}'
SHADOWED=${REGION}
UNKNOWN=[${NOPE}]
";
        let base = map(&[("APP_HOME", "/opt/app"), ("REGION", "eu")]);
        let vars = parse_env_text(text, Path::new(".env"), &base);

        assert_eq!(vars["GRID_URL"], "http://grid.local:4444");
        assert_eq!(vars["APK"], "/opt/app/app-debug.apk");
        assert_eq!(vars["LITERAL"], "${GRID_HOST}");
        assert_eq!(vars["SHADOWED"], "eu");
        assert_eq!(vars["UNKNOWN"], "[]");

        let base = map(&[("GRID_HOST", "grid.ci")]);
        let vars = parse_env_text(text, Path::new(".env"), &base);
        assert_eq!(vars["GRID_URL"], "http://grid.ci:4444");
    }

    #[test]
    fn base_wins_over_dotenv() {
        let layered = Layered::new(
            map(&[("USER_PASS", "from-process")]),
            map(&[("USER_PASS", "from-dotenv"), ("ONLY_DOTENV", "x")]),
        );

        assert_eq!(layered.var("USER_PASS").as_deref(), Some("from-process"));
        assert_eq!(layered.var("ONLY_DOTENV").as_deref(), Some("x"));
        assert_eq!(layered.var("MISSING"), None);
    }

    #[test]
    fn set_but_empty_base_value_is_kept() {
        let layered = Layered::new(map(&[("X", "")]), map(&[("X", "dotenv")]));
        assert_eq!(layered.var("X").as_deref(), Some(""));
    }

    #[test]
    fn missing_dotenv_file_is_empty_overlay() {
        let tmp = TempDir::new().unwrap();
        let layered = Layered::with_dotenv(EnvMap::new(), &tmp.path().join(".env")).unwrap();
        assert!(layered.fallback().is_empty());
    }

    #[test]
    fn dotenv_file_is_loaded() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".env");
        fs::write(&path, "ADMIN_PASS=hunter2\n").unwrap();

        let layered = Layered::with_dotenv(EnvMap::new(), &path).unwrap();
        assert_eq!(layered.var("ADMIN_PASS").as_deref(), Some("hunter2"));
    }
}
