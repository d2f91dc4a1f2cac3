use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::Shell;

#[derive(Parser, Debug)]
#[command(name = "testbed", version, about)]
pub struct Args {
    /// Project root holding the descriptor directories (overrides TESTBED_ROOT)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Path to testbed.toml (overrides TESTBED_CONFIG and <root>/testbed.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// More log output on stderr (-v debug, -vv trace); RUST_LOG wins if set
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve a context and publish it
    Resolve(ResolveArgs),

    /// List available environments and platforms
    List,

    /// Resolve every environment against every platform and report failures
    Check,

    /// Print the resolved context for humans
    Dump(DumpArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct TargetArgs {
    /// Environment name (defaults to resolve.default_environment)
    #[arg(long = "env", short = 'e')]
    pub environment: Option<String>,

    /// Platform name (defaults to resolve.default_platform)
    #[arg(long, short = 'p')]
    pub platform: Option<String>,

    /// Credential role (defaults to the environment's default_user_role)
    #[arg(long, short = 'r')]
    pub role: Option<String>,
}

#[derive(ClapArgs, Debug)]
pub struct ResolveArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    #[arg(long, value_enum, default_value_t = Format::Shell)]
    pub format: Format,

    /// Shell dialect for --format shell (defaults to publish.shell)
    #[arg(long, value_enum)]
    pub shell: Option<Shell>,

    /// MiniJinja template for --format template
    #[arg(long, required_if_eq("format", "template"))]
    pub template: Option<PathBuf>,

    /// Write to a file instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
pub struct DumpArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Show password/token-like values in clear text
    #[arg(long = "no-redact", default_value_t = false)]
    pub no_redact: bool,
}

impl DumpArgs {
    pub fn effective_redact(&self) -> bool {
        !self.no_redact
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Shell,
    Json,
    Template,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn resolve_flags() {
        let args = Args::try_parse_from([
            "testbed", "--root", "/srv/suite", "resolve", "-e", "staging", "-p", "android",
            "--role", "admin", "--format", "json",
        ])
        .unwrap();

        assert_eq!(args.root, Some(PathBuf::from("/srv/suite")));
        let Command::Resolve(r) = args.command else {
            panic!("expected resolve");
        };
        assert_eq!(r.target.environment.as_deref(), Some("staging"));
        assert_eq!(r.target.platform.as_deref(), Some("android"));
        assert_eq!(r.target.role.as_deref(), Some("admin"));
        assert_eq!(r.format, Format::Json);
    }

    #[test]
    fn template_format_requires_template() {
        assert!(Args::try_parse_from(["testbed", "resolve", "--format", "template"]).is_err());
        assert!(Args::try_parse_from([
            "testbed", "resolve", "--format", "template", "--template", "vars.j2"
        ])
        .is_ok());
    }

    #[test]
    fn dump_redacts_by_default() {
        let args = Args::try_parse_from(["testbed", "-vv", "dump"]).unwrap();
        assert_eq!(args.verbose, 2);
        let Command::Dump(d) = args.command else {
            panic!("expected dump");
        };
        assert!(d.effective_redact());
    }
}
