use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use tracing::debug;

use crate::{
    descriptor::{Descriptor, Node},
    error::{Error, Result},
    merge::EnvironmentDescriptor,
};

/// Role used when neither the caller nor the environment names one.
pub const FALLBACK_ROLE: &str = "standard";

/// Role name to credential record for one environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CredentialTable(IndexMap<String, Descriptor>);

impl CredentialTable {
    pub(crate) fn from_node(node: Option<&Node>, origin: &str) -> Result<Self> {
        let Some(node) = node else {
            return Err(Error::malformed(origin, "missing required key 'credentials'"));
        };
        let Some(records) = node.as_mapping() else {
            return Err(Error::malformed(
                origin,
                format!("'credentials' must be a mapping (found {})", node.kind()),
            ));
        };

        let mut out = IndexMap::new();
        for (role, record) in records {
            let Some(fields) = record.as_mapping() else {
                return Err(Error::malformed(
                    origin,
                    format!("credentials.{role} must be a mapping (found {})", record.kind()),
                ));
            };
            out.insert(role.clone(), fields.clone());
        }

        Ok(Self(out))
    }

    pub fn get(&self, role: &str) -> Option<&Descriptor> {
        self.0.get(role)
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_node(&self) -> Node {
        Node::Mapping(
            self.0
                .iter()
                .map(|(role, fields)| (role.clone(), Node::Mapping(fields.clone())))
                .collect(),
        )
    }
}

/// The credential record chosen for a run, tagged with its role.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedUser {
    role: String,
    fields: Descriptor,
}

impl SelectedUser {
    /// A stored `role` field never shadows the role the record was selected under.
    pub fn new(role: impl Into<String>, mut fields: Descriptor) -> Self {
        fields.remove("role");
        Self {
            role: role.into(),
            fields,
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn username(&self) -> Option<&str> {
        self.fields.str("username")
    }

    pub fn password(&self) -> Option<&str> {
        self.fields.str("password")
    }

    pub fn field(&self, key: &str) -> Option<&Node> {
        self.fields.get(key)
    }

    /// Flat mapping: `role` plus every credential field.
    pub fn to_descriptor(&self) -> Descriptor {
        let mut out = self.fields.clone();
        out.insert("role", Node::string(self.role.clone()));
        out
    }
}

impl Serialize for SelectedUser {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_descriptor().serialize(serializer)
    }
}

/// Explicit role, else the environment default, else [`FALLBACK_ROLE`].
/// Empty strings count as absent.
pub fn effective_role<'a>(explicit: Option<&'a str>, env_default: Option<&'a str>) -> &'a str {
    explicit
        .filter(|r| !r.is_empty())
        .or(env_default.filter(|r| !r.is_empty()))
        .unwrap_or(FALLBACK_ROLE)
}

pub fn select(env: &EnvironmentDescriptor, role: Option<&str>) -> Result<SelectedUser> {
    let role = effective_role(role, env.default_user_role());

    match env.credentials().get(role) {
        Some(fields) if !fields.is_empty() => {
            debug!(environment = env.name(), role, "selected credentials");
            Ok(SelectedUser::new(role, fields.clone()))
        }
        _ => Err(Error::MissingCredential {
            role: role.to_string(),
            environment: env.name().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(yaml: &str) -> EnvironmentDescriptor {
        let d = Descriptor::from_yaml_str(yaml).unwrap();
        EnvironmentDescriptor::from_descriptor("dev", &d).unwrap()
    }

    const DEV: &str = "\
base_url: https://dev.example.com
default_user_role: standard
credentials:
  standard: {username: u1, password: p1}
  admin: {username: u2, password: p2}
";

    #[test]
    fn default_role_from_environment() {
        let user = select(&env(DEV), None).unwrap();

        assert_eq!(user.role(), "standard");
        assert_eq!(user.username(), Some("u1"));
        assert_eq!(user.password(), Some("p1"));
        assert_eq!(
            serde_json::to_value(&user).unwrap(),
            serde_json::json!({"role": "standard", "username": "u1", "password": "p1"})
        );
    }

    #[test]
    fn explicit_role_wins() {
        let user = select(&env(DEV), Some("admin")).unwrap();
        assert_eq!(user.role(), "admin");
        assert_eq!(user.username(), Some("u2"));
    }

    #[test]
    fn unknown_role_names_role_and_environment() {
        match select(&env(DEV), Some("ghost")) {
            Err(Error::MissingCredential { role, environment }) => {
                assert_eq!(role, "ghost");
                assert_eq!(environment, "dev");
            }
            other => panic!("expected MissingCredential, got {other:?}"),
        }
    }

    #[test]
    fn fallback_role_is_standard() {
        let e = env("base_url: x\ncredentials:\n  standard: {username: s}\n");
        assert_eq!(select(&e, None).unwrap().username(), Some("s"));
        assert_eq!(select(&e, Some("")).unwrap().role(), "standard");
    }

    #[test]
    fn empty_record_counts_as_missing() {
        let e = env("base_url: x\ncredentials:\n  standard: {}\n");
        assert!(matches!(
            select(&e, None),
            Err(Error::MissingCredential { .. })
        ));
    }

    #[test]
    fn stored_role_field_does_not_shadow_selection() {
        let e = env("base_url: x\ncredentials:\n  admin: {username: a, role: superuser}\n");
        let user = select(&e, Some("admin")).unwrap();

        assert_eq!(user.role(), "admin");
        assert_eq!(user.to_descriptor().str("role"), Some("admin"));
    }

    #[test]
    fn extra_fields_are_kept() {
        let e = env("base_url: x\ncredentials:\n  standard: {username: a, password: b, otp_seed: ABC}\n");
        let user = select(&e, None).unwrap();
        assert_eq!(user.field("otp_seed"), Some(&Node::string("ABC")));
    }
}
