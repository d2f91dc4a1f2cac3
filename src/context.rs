use serde::Serialize;
use std::collections::BTreeMap;

use crate::{
    credentials::{CredentialTable, SelectedUser},
    descriptor::{Descriptor, Node, Scalar},
    error::{Error, Result},
};

/// Names under which a [`MergedContext`] is published.
pub mod keys {
    pub const ENVIRONMENT: &str = "ENVIRONMENT";
    pub const PLATFORM: &str = "PLATFORM";
    pub const BASE_URL: &str = "BASE_URL";
    pub const API_BASE_URL: &str = "API_BASE_URL";
    pub const REMOTE_URL: &str = "REMOTE_URL";
    pub const BROWSER: &str = "BROWSER";
    pub const DESIRED_CAPS: &str = "DESIRED_CAPS";
    pub const DESIRED_CAPS_JSON: &str = "DESIRED_CAPS_JSON";
    pub const IMPLICIT_WAIT: &str = "IMPLICIT_WAIT";
    pub const EXPLICIT_TIMEOUT: &str = "EXPLICIT_TIMEOUT";
    pub const PAGE_LOAD_TIMEOUT: &str = "PAGE_LOAD_TIMEOUT";
    pub const ALL_CREDENTIALS: &str = "ALL_CREDENTIALS";
    pub const SELECTED_USER: &str = "SELECTED_USER";
    pub const USERNAME: &str = "USERNAME";
    pub const PASSWORD: &str = "PASSWORD";
}

pub const DEFAULT_IMPLICIT_WAIT: u64 = 5;
pub const DEFAULT_EXPLICIT_TIMEOUT: u64 = 15;
pub const DEFAULT_PAGE_LOAD_TIMEOUT: u64 = 30;

/// Timeouts the driver setup reads; these must be whole seconds.
const SECOND_TIMEOUTS: [&str; 3] = ["implicit", "explicit", "page_load"];

/// Named timeouts. Values in whole seconds are normalized to integers; other
/// keys are carried as written for whatever reads the structured context.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Timeouts(BTreeMap<String, Node>);

impl Timeouts {
    pub(crate) fn from_node(node: Option<&Node>, origin: &str) -> Result<Self> {
        let Some(node) = node.filter(|n| !n.is_null()) else {
            return Ok(Self::default());
        };
        let Some(table) = node.as_mapping() else {
            return Err(Error::malformed(
                origin,
                format!("'timeouts' must be a mapping (found {})", node.kind()),
            ));
        };

        let mut out = BTreeMap::new();
        for (name, value) in table {
            let value = match whole_seconds(value) {
                Some(secs) => Node::int(secs),
                None if SECOND_TIMEOUTS.contains(&name.as_str()) => {
                    return Err(Error::malformed(
                        origin,
                        format!(
                            "timeouts.{name} must be a non-negative integer (found {})",
                            value.to_plain_string()
                        ),
                    ));
                }
                None => value.clone(),
            };
            out.insert(name.clone(), value);
        }

        Ok(Self(out))
    }

    /// Field union; on conflict `overrides` wins.
    pub fn merged(base: &Timeouts, overrides: &Timeouts) -> Self {
        let mut out = base.0.clone();
        out.extend(overrides.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self(out)
    }

    /// Seconds for `name`, if present and a whole number.
    pub fn get(&self, name: &str) -> Option<u64> {
        match self.0.get(name) {
            Some(Node::Scalar(Scalar::Int(n))) => u64::try_from(*n).ok(),
            _ => None,
        }
    }

    pub fn implicit(&self) -> u64 {
        self.get("implicit").unwrap_or(DEFAULT_IMPLICIT_WAIT)
    }

    pub fn explicit(&self) -> u64 {
        self.get("explicit").unwrap_or(DEFAULT_EXPLICIT_TIMEOUT)
    }

    pub fn page_load(&self) -> u64 {
        self.get("page_load").unwrap_or(DEFAULT_PAGE_LOAD_TIMEOUT)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

fn whole_seconds(value: &Node) -> Option<i64> {
    match value {
        Node::Scalar(Scalar::Int(n)) if *n >= 0 => Some(*n),
        Node::Scalar(Scalar::Str(s)) => s
            .trim()
            .parse::<u64>()
            .ok()
            .and_then(|n| i64::try_from(n).ok()),
        _ => None,
    }
}

impl FromIterator<(String, u64)> for Timeouts {
    fn from_iter<T: IntoIterator<Item = (String, u64)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k, Node::int(i64::try_from(v).unwrap_or(i64::MAX))))
                .collect(),
        )
    }
}

/// The environment × platform product for one test run. Built by
/// [`crate::merge::merge`] and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedContext {
    pub(crate) environment: String,
    pub(crate) platform: String,
    pub(crate) base_url: String,
    pub(crate) api_base_url: Option<String>,
    pub(crate) remote_url: String,
    pub(crate) browser: String,
    pub(crate) capabilities: Descriptor,
    pub(crate) timeouts: Timeouts,
    pub(crate) credentials: CredentialTable,
    pub(crate) selected_user: SelectedUser,
    /// Environment keys not consumed by the merge.
    pub(crate) environment_extras: Descriptor,
    /// Platform keys not consumed by the merge.
    pub(crate) platform_extras: Descriptor,
}

/// One published name/value pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: &'static str,
    pub value: Node,
}

impl MergedContext {
    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_base_url(&self) -> Option<&str> {
        self.api_base_url.as_deref()
    }

    pub fn remote_url(&self) -> &str {
        &self.remote_url
    }

    pub fn browser(&self) -> &str {
        &self.browser
    }

    pub fn capabilities(&self) -> &Descriptor {
        &self.capabilities
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub fn credentials(&self) -> &CredentialTable {
        &self.credentials
    }

    pub fn selected_user(&self) -> &SelectedUser {
        &self.selected_user
    }

    pub fn environment_extras(&self) -> &Descriptor {
        &self.environment_extras
    }

    pub fn platform_extras(&self) -> &Descriptor {
        &self.platform_extras
    }

    /// Every published variable, in a fixed order.
    pub fn variables(&self) -> Vec<Variable> {
        let opt = |s: Option<&str>| s.map(Node::string).unwrap_or_else(Node::null);
        let secs = |n: u64| Node::int(i64::try_from(n).unwrap_or(i64::MAX));
        let caps_json = serde_json::to_string(&self.capabilities).unwrap_or_else(|_| "{}".into());

        vec![
            var(keys::ENVIRONMENT, Node::string(&self.environment)),
            var(keys::PLATFORM, Node::string(&self.platform)),
            var(keys::BASE_URL, Node::string(&self.base_url)),
            var(keys::API_BASE_URL, opt(self.api_base_url())),
            var(keys::REMOTE_URL, Node::string(&self.remote_url)),
            var(keys::BROWSER, Node::string(&self.browser)),
            var(keys::DESIRED_CAPS, Node::Mapping(self.capabilities.clone())),
            var(keys::DESIRED_CAPS_JSON, Node::string(caps_json)),
            var(keys::IMPLICIT_WAIT, secs(self.timeouts.implicit())),
            var(keys::EXPLICIT_TIMEOUT, secs(self.timeouts.explicit())),
            var(keys::PAGE_LOAD_TIMEOUT, secs(self.timeouts.page_load())),
            var(keys::ALL_CREDENTIALS, self.credentials.to_node()),
            var(
                keys::SELECTED_USER,
                Node::Mapping(self.selected_user.to_descriptor()),
            ),
            var(keys::USERNAME, opt(self.selected_user.username())),
            var(keys::PASSWORD, opt(self.selected_user.password())),
        ]
    }

    /// Published variables as a mapping, e.g. for JSON output.
    pub fn variables_descriptor(&self) -> Descriptor {
        self.variables()
            .into_iter()
            .map(|v| (v.name.to_string(), v.value))
            .collect()
    }

    pub fn debug_dump(&self, redact: bool) -> String {
        let mut out = String::new();

        out.push_str("testbed resolved context (debug)\n");
        out.push_str("================================\n");

        out.push_str(&format!("environment: {}\n", self.environment));
        out.push_str(&format!("platform: {}\n", self.platform));
        out.push_str(&format!("role: {}\n", self.selected_user.role()));
        out.push_str(&format!(
            "roles available: {}\n",
            self.credentials.roles().collect::<Vec<_>>().join(", ")
        ));

        let timeouts: Vec<String> = self
            .timeouts
            .iter()
            .map(|(k, v)| format!("{k}={}s", v.to_plain_string()))
            .collect();
        out.push_str(&format!(
            "timeouts: {}\n",
            if timeouts.is_empty() {
                "<defaults>".to_string()
            } else {
                timeouts.join(" ")
            }
        ));

        out.push_str("\nvars:\n");
        for v in self.variables() {
            let shown = if redact && v.name == keys::DESIRED_CAPS_JSON {
                // Rebuilt from the redacted mapping; the JSON string itself is opaque.
                redact_node(&Node::Mapping(self.capabilities.clone())).to_plain_string()
            } else {
                dump_value(v.name, &v.value, redact)
            };
            out.push_str(&format!("  {} = {}\n", v.name, shown));
        }

        if !self.environment_extras.is_empty() || !self.platform_extras.is_empty() {
            out.push_str("\nextras:\n");
            for (scope, extras) in [
                ("environment", &self.environment_extras),
                ("platform", &self.platform_extras),
            ] {
                for (k, v) in extras {
                    out.push_str(&format!("  {scope}.{k} = {}\n", dump_value(k, v, redact)));
                }
            }
        }

        out
    }
}

const REDACTED: &str = "<redacted>";

fn dump_value(key: &str, value: &Node, redact: bool) -> String {
    if !redact {
        value.to_plain_string()
    } else if looks_sensitive_key(key) {
        REDACTED.to_string()
    } else {
        redact_node(value).to_plain_string()
    }
}

fn var(name: &'static str, value: Node) -> Variable {
    Variable { name, value }
}

fn looks_sensitive_key(k: &str) -> bool {
    let u = k.to_ascii_uppercase();
    u.contains("TOKEN")
        || u.contains("SECRET")
        || u.contains("PASSWORD")
        || u.contains("PRIVATE")
        || u.ends_with("API_KEY")
        || u.ends_with("APIKEY")
}

fn redact_node(node: &Node) -> Node {
    match node {
        Node::Mapping(d) => Node::Mapping(
            d.iter()
                .map(|(k, v)| {
                    let v = if looks_sensitive_key(k) {
                        Node::string(REDACTED)
                    } else {
                        redact_node(v)
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Node::Sequence(items) => Node::Sequence(items.iter().map(redact_node).collect()),
        Node::Scalar(_) => node.clone(),
    }
}
