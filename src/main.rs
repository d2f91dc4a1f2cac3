use anyhow::{Context as _, Result};
use clap::Parser;
use std::{
    fs,
    io::{self, Write},
    process::ExitCode,
};
use tracing_subscriber::EnvFilter;

use testbed::{
    cli::{Args, Command, Format, ResolveArgs, TargetArgs},
    config, Config, ContextResolver, JsonPublisher, Namespace, ProcessEnv, Request, ShellPublisher,
    TemplatePublisher,
};

fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = match args.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let root = config::locate_root(args.root.as_deref(), &ProcessEnv)?;
    let cfg = config::load_config(args.config.as_deref(), &root, &ProcessEnv)?;
    let resolver = ContextResolver::from_config(&cfg, &root)?;

    match args.command {
        Command::Resolve(r) => {
            resolve(&resolver, &cfg, &r)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::List => {
            let mut out = io::stdout().lock();
            for (label, ns) in [
                ("environments", Namespace::Environment),
                ("platforms", Namespace::Platform),
            ] {
                let names = resolver.source().names(ns)?;
                writeln!(out, "{label}:")?;
                for name in names {
                    writeln!(out, "  {name}")?;
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Check => check(&resolver),
        Command::Dump(d) => {
            let ctx = resolver.resolve(&request(&cfg, &d.target))?;
            print!("{}", ctx.debug_dump(d.effective_redact()));
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn request(cfg: &Config, target: &TargetArgs) -> Request {
    let environment = target
        .environment
        .clone()
        .unwrap_or_else(|| cfg.resolve.default_environment.clone());
    let platform = target
        .platform
        .clone()
        .unwrap_or_else(|| cfg.resolve.default_platform.clone());

    Request {
        environment,
        platform,
        role: target.role.clone().or_else(|| cfg.resolve.default_role.clone()),
    }
}

type Resolver = ContextResolver<testbed::FileStore, testbed::Layered<ProcessEnv>>;

fn resolve(resolver: &Resolver, cfg: &Config, r: &ResolveArgs) -> Result<()> {
    // Render fully before touching the destination so a failed run leaves
    // the previous output in place.
    let rendered = render(resolver, cfg, r)?;

    match &r.out {
        Some(path) => fs::write(path, &rendered)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => {
            let mut out = io::stdout().lock();
            out.write_all(&rendered)?;
            out.flush()?;
        }
    }
    Ok(())
}

fn render(resolver: &Resolver, cfg: &Config, r: &ResolveArgs) -> Result<Vec<u8>> {
    let request = request(cfg, &r.target);

    let buf = match r.format {
        Format::Shell => {
            let mut p = ShellPublisher::new(Vec::new(), r.shell.unwrap_or(cfg.publish.shell));
            resolver.resolve_and_publish(&request, &mut p)?;
            p.into_inner()
        }
        Format::Json => {
            let mut p = JsonPublisher::new(Vec::new());
            resolver.resolve_and_publish(&request, &mut p)?;
            p.into_inner()
        }
        Format::Template => {
            let Some(path) = r.template.as_ref() else {
                anyhow::bail!("--format template needs --template");
            };
            let source = fs::read_to_string(path)
                .with_context(|| format!("failed to read template {}", path.display()))?;
            let mut p = TemplatePublisher::new(Vec::new(), source);
            resolver.resolve_and_publish(&request, &mut p)?;
            p.into_inner()
        }
    };
    Ok(buf)
}

fn check(resolver: &Resolver) -> Result<ExitCode> {
    let environments = resolver.source().names(Namespace::Environment)?;
    let platforms = resolver.source().names(Namespace::Platform)?;

    let mut out = io::stdout().lock();
    let mut failures = 0usize;

    for env in &environments {
        for platform in &platforms {
            match resolver.resolve(&Request::new(env.as_str(), platform.as_str())) {
                Ok(_) => writeln!(out, "ok    {env}/{platform}")?,
                Err(e) => {
                    failures += 1;
                    writeln!(out, "FAIL  {env}/{platform}: {e}")?;
                }
            }
        }
    }

    writeln!(
        out,
        "\n{} combination(s), {} failed",
        environments.len() * platforms.len(),
        failures
    )?;

    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
