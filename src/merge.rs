use std::collections::BTreeMap;
use tracing::debug;

use crate::{
    context::{MergedContext, Timeouts},
    credentials::{CredentialTable, SelectedUser},
    descriptor::{Descriptor, Node},
    error::{Error, Result},
};

/// Browser used when a platform descriptor does not name one.
pub const DEFAULT_BROWSER: &str = "chrome";

const ENVIRONMENT_KEYS: [&str; 6] = [
    "base_url",
    "api_base_url",
    "remote_endpoints",
    "timeouts",
    "default_user_role",
    "credentials",
];

const PLATFORM_KEYS: [&str; 4] = ["remote_url", "browser", "capabilities", "timeouts"];

/// Typed, validated view of an environment descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentDescriptor {
    name: String,
    base_url: String,
    api_base_url: Option<String>,
    remote_endpoints: BTreeMap<String, String>,
    timeouts: Timeouts,
    default_user_role: Option<String>,
    credentials: CredentialTable,
    extras: Descriptor,
}

impl EnvironmentDescriptor {
    pub fn from_descriptor(name: &str, d: &Descriptor) -> Result<Self> {
        let origin = format!("environment descriptor '{name}'");

        let endpoints = optional_mapping(d, "remote_endpoints", &origin)?;
        let remote_endpoints: BTreeMap<String, String> = endpoints
            .iter()
            .map(|(platform, url)| match url.as_str() {
                Some(url) => Ok((platform.clone(), url.to_string())),
                None => Err(Error::malformed(
                    &origin,
                    format!(
                        "remote_endpoints.{platform} must be a string (found {})",
                        url.kind()
                    ),
                )),
            })
            .collect::<Result<_>>()?;

        Ok(Self {
            name: name.to_string(),
            base_url: required_str(d, "base_url", &origin)?,
            api_base_url: optional_str(d, "api_base_url", &origin)?,
            remote_endpoints,
            timeouts: Timeouts::from_node(d.get("timeouts"), &origin)?,
            default_user_role: optional_str(d, "default_user_role", &origin)?,
            credentials: CredentialTable::from_node(d.get("credentials"), &origin)?,
            extras: extras(d, &ENVIRONMENT_KEYS),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_base_url(&self) -> Option<&str> {
        self.api_base_url.as_deref()
    }

    pub fn remote_endpoint(&self, platform: &str) -> Option<&str> {
        self.remote_endpoints.get(platform).map(String::as_str)
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub fn default_user_role(&self) -> Option<&str> {
        self.default_user_role.as_deref()
    }

    pub fn credentials(&self) -> &CredentialTable {
        &self.credentials
    }
}

/// Typed, validated view of a platform (driver) descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformDescriptor {
    name: String,
    remote_url: Option<String>,
    browser: Option<String>,
    capabilities: Descriptor,
    timeouts: Timeouts,
    extras: Descriptor,
}

impl PlatformDescriptor {
    pub fn from_descriptor(name: &str, d: &Descriptor) -> Result<Self> {
        let origin = format!("platform descriptor '{name}'");

        Ok(Self {
            name: name.to_string(),
            remote_url: optional_str(d, "remote_url", &origin)?,
            browser: optional_str(d, "browser", &origin)?,
            capabilities: optional_mapping(d, "capabilities", &origin)?,
            timeouts: Timeouts::from_node(d.get("timeouts"), &origin)?,
            extras: extras(d, &PLATFORM_KEYS),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn remote_url(&self) -> Option<&str> {
        self.remote_url.as_deref()
    }

    pub fn browser(&self) -> &str {
        self.browser.as_deref().unwrap_or(DEFAULT_BROWSER)
    }

    pub fn capabilities(&self) -> &Descriptor {
        &self.capabilities
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }
}

/// Combine both descriptors and the selected user into one context.
///
/// Precedence:
/// - remote URL: `env.remote_endpoints[platform]`, else the platform's own
/// - timeouts: field union, platform wins on conflict
/// - browser and capabilities: platform only
/// - base and API URLs: environment only
pub fn merge(
    env: &EnvironmentDescriptor,
    platform: &PlatformDescriptor,
    selected_user: SelectedUser,
) -> Result<MergedContext> {
    let remote_url = match env.remote_endpoint(&platform.name) {
        Some(url) => {
            debug!(
                environment = %env.name,
                platform = %platform.name,
                "remote endpoint overridden by environment"
            );
            url.to_string()
        }
        None => platform.remote_url.clone().ok_or_else(|| {
            Error::malformed(
                format!("platform descriptor '{}'", platform.name),
                format!(
                    "no 'remote_url' and environment '{}' has no remote_endpoints.{} override",
                    env.name, platform.name
                ),
            )
        })?,
    };

    Ok(MergedContext {
        environment: env.name.clone(),
        platform: platform.name.clone(),
        base_url: env.base_url.clone(),
        api_base_url: env.api_base_url.clone(),
        remote_url,
        browser: platform.browser().to_string(),
        capabilities: platform.capabilities.clone(),
        timeouts: Timeouts::merged(&env.timeouts, &platform.timeouts),
        credentials: env.credentials.clone(),
        selected_user,
        environment_extras: env.extras.clone(),
        platform_extras: platform.extras.clone(),
    })
}

fn required_str(d: &Descriptor, key: &str, origin: &str) -> Result<String> {
    optional_str(d, key, origin)?
        .ok_or_else(|| Error::malformed(origin, format!("missing required key '{key}'")))
}

fn optional_str(d: &Descriptor, key: &str, origin: &str) -> Result<Option<String>> {
    match d.get(key) {
        None => Ok(None),
        Some(node) if node.is_null() => Ok(None),
        Some(node) => match node.as_str() {
            Some(s) => Ok(Some(s.to_string())),
            None => Err(Error::malformed(
                origin,
                format!("'{key}' must be a string (found {})", node.kind()),
            )),
        },
    }
}

fn optional_mapping(d: &Descriptor, key: &str, origin: &str) -> Result<Descriptor> {
    match d.get(key) {
        None => Ok(Descriptor::new()),
        Some(node) if node.is_null() => Ok(Descriptor::new()),
        Some(Node::Mapping(m)) => Ok(m.clone()),
        Some(node) => Err(Error::malformed(
            origin,
            format!("'{key}' must be a mapping (found {})", node.kind()),
        )),
    }
}

fn extras(d: &Descriptor, known: &[&str]) -> Descriptor {
    d.iter()
        .filter(|(k, _)| !known.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
