pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod credentials;
pub mod descriptor;
pub mod emit;
pub mod env;
pub mod error;
pub mod merge;
pub mod publish;
pub mod resolver;
pub mod store;
pub mod tokens;

pub use cache::{DescriptorCache, TokenPolicy};
pub use config::{Config, Shell};
pub use context::{MergedContext, Timeouts, Variable};
pub use credentials::{CredentialTable, SelectedUser};
pub use descriptor::{Descriptor, Node, Scalar};
pub use env::{EnvSource, Layered, ProcessEnv};
pub use error::{Error, Result};
pub use merge::{EnvironmentDescriptor, PlatformDescriptor};
pub use publish::{
    JsonPublisher, MemoryPublisher, NoopPublisher, Publisher, ShellPublisher, TemplatePublisher,
};
pub use resolver::{ContextResolver, Request};
pub use store::{DescriptorSource, FileStore, Namespace};
pub use tokens::TokenResolver;
