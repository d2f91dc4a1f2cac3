use anyhow::Result as AnyResult;
use std::path::Path;
use tracing::info;

use crate::{
    cache::{DescriptorCache, TokenPolicy},
    config::Config,
    context::MergedContext,
    credentials,
    env::{EnvSource, Layered, ProcessEnv},
    error::Result,
    merge::{self, EnvironmentDescriptor, PlatformDescriptor},
    publish::Publisher,
    store::{DescriptorSource, FileStore, Namespace},
    tokens::TokenResolver,
};

/// One resolution call: which environment, which platform, which role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub environment: String,
    pub platform: String,
    pub role: Option<String>,
}

impl Request {
    pub fn new(environment: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            platform: platform.into(),
            role: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

/// Loads, expands, merges and selects credentials. Construct once per test
/// run and share it; the descriptor cache lives as long as the resolver.
pub struct ContextResolver<S, E> {
    cache: DescriptorCache<S>,
    env: E,
}

impl ContextResolver<FileStore, Layered<ProcessEnv>> {
    /// File-backed resolver for a project root, with the process environment
    /// layered over the configured dotenv file.
    pub fn from_config(cfg: &Config, root: &Path) -> AnyResult<Self> {
        let store = FileStore::new(cfg.environments_dir(root), cfg.platforms_dir(root));
        let env = Layered::with_dotenv(ProcessEnv, &cfg.dotenv_path(root))?;
        Ok(Self::new(store, env, cfg.resolve.tokens))
    }
}

impl<S: DescriptorSource, E: EnvSource> ContextResolver<S, E> {
    pub fn new(source: S, env: E, policy: TokenPolicy) -> Self {
        Self {
            cache: DescriptorCache::new(source, policy),
            env,
        }
    }

    pub fn cache(&self) -> &DescriptorCache<S> {
        &self.cache
    }

    pub fn source(&self) -> &S {
        self.cache.source()
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn resolve(&self, request: &Request) -> Result<MergedContext> {
        let tokens = TokenResolver::new(&self.env);

        let env_raw = self
            .cache
            .get(Namespace::Environment, &request.environment, &tokens)?;
        let platform_raw = self
            .cache
            .get(Namespace::Platform, &request.platform, &tokens)?;

        let env = EnvironmentDescriptor::from_descriptor(&request.environment, &env_raw)?;
        let platform = PlatformDescriptor::from_descriptor(&request.platform, &platform_raw)?;

        let user = credentials::select(&env, request.role.as_deref())?;
        let ctx = merge::merge(&env, &platform, user)?;

        info!(
            environment = ctx.environment(),
            platform = ctx.platform(),
            role = ctx.selected_user().role(),
            remote_url = ctx.remote_url(),
            "resolved test context"
        );

        Ok(ctx)
    }

    /// Resolve, then hand the context to `publisher`. Nothing is published
    /// when resolution fails.
    pub fn resolve_and_publish(
        &self,
        request: &Request,
        publisher: &mut dyn Publisher,
    ) -> AnyResult<MergedContext> {
        let ctx = self.resolve(request)?;
        publisher.publish(&ctx)?;
        Ok(ctx)
    }
}
