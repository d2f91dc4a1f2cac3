use indexmap::IndexMap;
use serde::Serialize;

/// A parsed descriptor document: string keys to nested nodes.
///
/// Keys keep the order they have in the source file, so capabilities and
/// credentials render (JSON, shell, debug dump) the way they were written.
/// Equality ignores key order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Descriptor {
    entries: IndexMap<String, Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Node {
    Scalar(Scalar),
    Sequence(Vec<Node>),
    Mapping(Descriptor),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Descriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Node) -> Option<Node> {
        self.entries.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Node> {
        self.entries.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Node)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// String value at `key`, if present and a string.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Node::as_str)
    }

    /// Parse a YAML document. Empty or null documents yield an empty descriptor.
    pub fn from_yaml_str(text: &str) -> Result<Self, String> {
        if text.trim().is_empty() {
            return Ok(Self::new());
        }
        let mut value: serde_yaml::Value =
            serde_yaml::from_str(text).map_err(|e| e.to_string())?;
        // `<<: *anchor` merge keys
        value.apply_merge().map_err(|e| e.to_string())?;
        match Node::from_yaml(value)? {
            Node::Scalar(Scalar::Null) => Ok(Self::new()),
            Node::Mapping(d) => Ok(d),
            other => Err(format!("document root must be a mapping, found {}", other.kind())),
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, String> {
        let table: toml::Table = toml::from_str(text).map_err(|e| e.to_string())?;
        let mut out = Self::new();
        for (k, v) in table {
            out.insert(k, Node::from_toml(v));
        }
        Ok(out)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl FromIterator<(String, Node)> for Descriptor {
    fn from_iter<T: IntoIterator<Item = (String, Node)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Descriptor {
    type Item = (&'a String, &'a Node);
    type IntoIter = indexmap::map::Iter<'a, String, Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl Node {
    pub fn null() -> Self {
        Node::Scalar(Scalar::Null)
    }

    pub fn string(s: impl Into<String>) -> Self {
        Node::Scalar(Scalar::Str(s.into()))
    }

    pub fn int(n: i64) -> Self {
        Node::Scalar(Scalar::Int(n))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::Scalar(Scalar::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&Descriptor> {
        match self {
            Node::Mapping(d) => Some(d),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::Scalar(Scalar::Null))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Node::Scalar(Scalar::Null) => "null",
            Node::Scalar(Scalar::Bool(_)) => "boolean",
            Node::Scalar(Scalar::Int(_)) => "integer",
            Node::Scalar(Scalar::Float(_)) => "float",
            Node::Scalar(Scalar::Str(_)) => "string",
            Node::Sequence(_) => "sequence",
            Node::Mapping(_) => "mapping",
        }
    }

    /// Plain-text rendering: strings as-is, null as empty, containers as JSON.
    pub fn to_plain_string(&self) -> String {
        match self {
            Node::Scalar(Scalar::Null) => String::new(),
            Node::Scalar(Scalar::Bool(b)) => b.to_string(),
            Node::Scalar(Scalar::Int(n)) => n.to_string(),
            Node::Scalar(Scalar::Float(f)) => f.to_string(),
            Node::Scalar(Scalar::Str(s)) => s.clone(),
            Node::Sequence(_) | Node::Mapping(_) => self.to_json().to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    fn from_yaml(value: serde_yaml::Value) -> Result<Self, String> {
        use serde_yaml::Value as Y;

        Ok(match value {
            Y::Null => Node::null(),
            Y::Bool(b) => Node::Scalar(Scalar::Bool(b)),
            Y::Number(n) => match n.as_i64() {
                Some(i) => Node::int(i),
                None => Node::Scalar(Scalar::Float(n.as_f64().unwrap_or(f64::NAN))),
            },
            Y::String(s) => Node::string(s),
            Y::Sequence(items) => Node::Sequence(
                items
                    .into_iter()
                    .map(Node::from_yaml)
                    .collect::<Result<_, _>>()?,
            ),
            Y::Mapping(map) => {
                let mut out = Descriptor::new();
                for (k, v) in map {
                    let key = yaml_key(k)?;
                    out.insert(key, Node::from_yaml(v)?);
                }
                Node::Mapping(out)
            }
            Y::Tagged(tagged) => Node::from_yaml(tagged.value)?,
        })
    }

    fn from_toml(value: toml::Value) -> Self {
        use toml::Value as T;

        match value {
            T::String(s) => Node::string(s),
            T::Integer(i) => Node::int(i),
            T::Float(f) => Node::Scalar(Scalar::Float(f)),
            T::Boolean(b) => Node::Scalar(Scalar::Bool(b)),
            T::Datetime(dt) => Node::string(dt.to_string()),
            T::Array(items) => Node::Sequence(items.into_iter().map(Node::from_toml).collect()),
            T::Table(table) => Node::Mapping(
                table
                    .into_iter()
                    .map(|(k, v)| (k, Node::from_toml(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Descriptor> for Node {
    fn from(d: Descriptor) -> Self {
        Node::Mapping(d)
    }
}

fn yaml_key(key: serde_yaml::Value) -> Result<String, String> {
    use serde_yaml::Value as Y;

    match key {
        Y::String(s) => Ok(s),
        Y::Bool(b) => Ok(b.to_string()),
        Y::Number(n) => Ok(n.to_string()),
        Y::Null => Ok("null".to_string()),
        Y::Tagged(tagged) => yaml_key(tagged.value),
        Y::Sequence(_) | Y::Mapping(_) => Err("mapping keys must be scalars".to_string()),
    }
}
