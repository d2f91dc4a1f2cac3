use regex::{Captures, Regex};
use std::sync::LazyLock;

use crate::{
    descriptor::{Descriptor, Node, Scalar},
    env::EnvSource,
};

/// `${ENV:NAME}` or `${ENV:NAME:-default}`.
static ENV_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{ENV:([A-Za-z0-9_]+)(:-([^}]*))?\}").expect("valid env token pattern")
});

/// Expands env tokens inside descriptor values. Reads variables through an
/// [`EnvSource`] and never writes anything back.
pub struct TokenResolver<'a> {
    env: &'a dyn EnvSource,
}

impl<'a> TokenResolver<'a> {
    pub fn new(env: &'a dyn EnvSource) -> Self {
        Self { env }
    }

    pub fn resolve_descriptor(&self, d: &Descriptor) -> Descriptor {
        d.iter()
            .map(|(k, v)| (k.clone(), self.resolve_node(v)))
            .collect()
    }

    pub fn resolve_node(&self, node: &Node) -> Node {
        match node {
            Node::Scalar(Scalar::Str(s)) => Node::string(self.resolve_str(s)),
            Node::Scalar(other) => Node::Scalar(other.clone()),
            Node::Sequence(items) => {
                Node::Sequence(items.iter().map(|n| self.resolve_node(n)).collect())
            }
            Node::Mapping(d) => Node::Mapping(self.resolve_descriptor(d)),
        }
    }

    /// `${ENV:..}` tokens first, then legacy `$NAME` / `${NAME}` expansion.
    pub fn resolve_str(&self, input: &str) -> String {
        // Fast path
        if !input.contains('$') {
            return input.to_string();
        }

        let substituted = ENV_TOKEN.replace_all(input, |caps: &Captures<'_>| {
            let default = caps.get(3).map(|m| m.as_str()).unwrap_or("");
            self.env
                .var(&caps[1])
                .unwrap_or_else(|| default.to_string())
        });

        self.expand_shell_vars(&substituted)
    }

    /// Shell-style expansion; unknown variables are left untouched.
    fn expand_shell_vars(&self, input: &str) -> String {
        let bytes = input.as_bytes();
        let mut out = String::with_capacity(input.len());
        let mut i = 0;
        let mut copied = 0;

        while i < bytes.len() {
            if bytes[i] != b'$' {
                i += 1;
                continue;
            }

            let reference = if i + 1 < bytes.len() && bytes[i + 1] == b'{' {
                input[i + 2..]
                    .find('}')
                    .map(|off| (&input[i + 2..i + 2 + off], i + 3 + off))
            } else {
                let mut j = i + 1;
                while j < bytes.len() && is_ident_char(bytes[j]) {
                    j += 1;
                }
                (j > i + 1).then(|| (&input[i + 1..j], j))
            };

            // A lone `$` or an unclosed `${` is literal; keep scanning after it.
            let Some((name, end)) = reference else {
                i += 1;
                continue;
            };

            // Unknown references are skipped whole.
            if let Some(value) = (!name.is_empty()).then(|| self.env.var(name)).flatten() {
                out.push_str(&input[copied..i]);
                out.push_str(&value);
                copied = end;
            }
            i = end;
        }

        out.push_str(&input[copied..]);
        out
    }
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
