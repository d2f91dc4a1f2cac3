use anyhow::{Context as _, Result};
use minijinja::Environment;
use serde_json::json;
use std::io::Write;

use crate::{
    config::Shell,
    context::MergedContext,
    descriptor::Descriptor,
    emit::Emitter,
};

/// The boundary where a resolved context leaves this crate. The only place
/// allowed to have side effects beyond reading descriptors.
pub trait Publisher {
    fn publish(&mut self, ctx: &MergedContext) -> Result<()>;
}

impl<P: Publisher + ?Sized> Publisher for &mut P {
    fn publish(&mut self, ctx: &MergedContext) -> Result<()> {
        (**self).publish(ctx)
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl Publisher for NoopPublisher {
    fn publish(&mut self, _ctx: &MergedContext) -> Result<()> {
        Ok(())
    }
}

/// Keeps every published variable set in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryPublisher {
    published: Vec<Descriptor>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> &[Descriptor] {
        &self.published
    }

    pub fn last(&self) -> Option<&Descriptor> {
        self.published.last()
    }
}

impl Publisher for MemoryPublisher {
    fn publish(&mut self, ctx: &MergedContext) -> Result<()> {
        self.published.push(ctx.variables_descriptor());
        Ok(())
    }
}

/// Emits one environment assignment per variable for `eval`/`source`.
pub struct ShellPublisher<W> {
    out: W,
    shell: Shell,
}

impl<W: Write> ShellPublisher<W> {
    pub fn new(out: W, shell: Shell) -> Self {
        Self { out, shell }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Publisher for ShellPublisher<W> {
    fn publish(&mut self, ctx: &MergedContext) -> Result<()> {
        let em = Emitter::new(self.shell);
        let mut script = String::new();

        em.header(
            &mut script,
            &format!("testbed ({}/{})", ctx.environment(), ctx.platform()),
        );
        em.comment(&mut script, &format!("role: {}", ctx.selected_user().role()));
        em.blank(&mut script);

        for v in ctx.variables() {
            em.set_env(&mut script, v.name, &v.value.to_plain_string());
        }

        self.out
            .write_all(script.as_bytes())
            .context("failed to write shell variables")?;
        self.out.flush()?;
        Ok(())
    }
}

/// Writes the published variables as one pretty-printed JSON object.
pub struct JsonPublisher<W> {
    out: W,
}

impl<W: Write> JsonPublisher<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Publisher for JsonPublisher<W> {
    fn publish(&mut self, ctx: &MergedContext) -> Result<()> {
        serde_json::to_writer_pretty(&mut self.out, &ctx.variables_descriptor())
            .context("failed to write JSON variables")?;
        writeln!(self.out)?;
        self.out.flush()?;
        Ok(())
    }
}

/// Renders a MiniJinja template, e.g. a variable file for the test runner.
///
/// Template context:
/// - `vars`: the published variables by name
/// - `context`: the full structured context
pub struct TemplatePublisher<W> {
    out: W,
    source: String,
}

impl<W: Write> TemplatePublisher<W> {
    pub fn new(out: W, source: impl Into<String>) -> Self {
        Self {
            out,
            source: source.into(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Publisher for TemplatePublisher<W> {
    fn publish(&mut self, ctx: &MergedContext) -> Result<()> {
        let ctx_json = json!({
            "vars": ctx.variables_descriptor(),
            "context": ctx,
        });

        let rendered = render_minijinja(&self.source, &ctx_json).context("template render failed")?;

        self.out.write_all(rendered.as_bytes())?;
        if !rendered.ends_with('\n') {
            self.out.write_all(b"\n")?;
        }
        self.out.flush()?;
        Ok(())
    }
}

fn render_minijinja(source: &str, ctx_json: &serde_json::Value) -> Result<String> {
    let mut env = Environment::new();

    // Jinja-style `tojson` filter over any value.
    env.add_filter(
        "tojson",
        |v: minijinja::value::Value| -> Result<String, minijinja::Error> {
            serde_json::to_string(&v).map_err(|e| {
                minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, e.to_string())
            })
        },
    );

    env.add_template("tpl", source)?;
    let tpl = env.get_template("tpl")?;
    let v = minijinja::value::Value::from_serialize(ctx_json);
    Ok(tpl.render(v)?)
}
