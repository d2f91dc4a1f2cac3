use serde::Deserialize;
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};
use tracing::debug;

use crate::{
    descriptor::Descriptor,
    error::Result,
    store::{DescriptorSource, Namespace},
    tokens::TokenResolver,
};

/// When env tokens inside cached descriptors are expanded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPolicy {
    /// Parse once, expand tokens on every `get`. Variable changes between
    /// calls are observed.
    #[default]
    PerCall,
    /// Parse and expand once; later `get`s return the first expansion even if
    /// variables change afterwards.
    Frozen,
}

#[derive(Debug)]
struct CacheEntry {
    raw: Arc<Descriptor>,
    frozen: Option<Arc<Descriptor>>,
}

type Slot = Arc<Mutex<Option<CacheEntry>>>;

/// Process-lifetime memo of parsed descriptors keyed by source path.
///
/// The backing store is read at most once per path. Concurrent first callers
/// for the same path serialize on that path's slot; callers for different
/// paths do not block each other. A failed load leaves the slot empty, so the
/// next call retries. There is no invalidation: build a new cache to re-read.
pub struct DescriptorCache<S> {
    source: S,
    policy: TokenPolicy,
    slots: Mutex<HashMap<PathBuf, Slot>>,
}

impl<S: DescriptorSource> DescriptorCache<S> {
    pub fn new(source: S, policy: TokenPolicy) -> Self {
        Self {
            source,
            policy,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn policy(&self) -> TokenPolicy {
        self.policy
    }

    /// Number of paths with a successfully loaded descriptor.
    pub fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .values()
            .filter(|slot| {
                slot.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .is_some()
            })
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolved descriptor for `(namespace, name)`.
    pub fn get(
        &self,
        namespace: Namespace,
        name: &str,
        tokens: &TokenResolver<'_>,
    ) -> Result<Arc<Descriptor>> {
        let path = self.source.locate(namespace, name);

        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(path.clone()).or_default())
        };

        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);

        let entry = match &mut *guard {
            Some(entry) => {
                debug!(%namespace, name, path = %path.display(), "descriptor cache hit");
                entry
            }
            empty => {
                debug!(%namespace, name, path = %path.display(), "descriptor cache miss");
                let raw = self.source.load(namespace, name)?;
                empty.insert(CacheEntry {
                    raw: Arc::new(raw),
                    frozen: None,
                })
            }
        };

        let CacheEntry { raw, frozen } = entry;
        let raw: &Descriptor = raw;
        match self.policy {
            TokenPolicy::PerCall => Ok(Arc::new(tokens.resolve_descriptor(raw))),
            TokenPolicy::Frozen => {
                let resolved =
                    frozen.get_or_insert_with(|| Arc::new(tokens.resolve_descriptor(raw)));
                Ok(Arc::clone(resolved))
            }
        }
    }
}
