use crate::config::Shell;

/// Writes shell statements for one target shell. Values are emitted as
/// literals: nothing in them is expanded by the shell.
#[derive(Debug, Clone, Copy)]
pub struct Emitter {
    shell: Shell,
}

impl Emitter {
    pub fn new(shell: Shell) -> Self {
        Self { shell }
    }

    pub fn header(&self, out: &mut String, title: &str) {
        out.push_str("# ");
        out.push_str(title);
        out.push('\n');
        out.push('\n');
    }

    pub fn comment(&self, out: &mut String, text: &str) {
        out.push_str("# ");
        out.push_str(text);
        out.push('\n');
    }

    pub fn blank(&self, out: &mut String) {
        out.push('\n');
    }

    pub fn set_env(&self, out: &mut String, key: &str, value: &str) {
        match self.shell {
            Shell::Zsh | Shell::Bash => {
                out.push_str("export ");
                out.push_str(key);
                out.push('=');
                out.push_str(&quote_posix_single(value));
                out.push('\n');
            }
            Shell::Fish => {
                out.push_str("set -gx ");
                out.push_str(key);
                out.push(' ');
                out.push_str(&quote_fish_single(value));
                out.push('\n');
            }
            Shell::Pwsh => {
                out.push_str("$env:");
                out.push_str(key);
                out.push_str(" = ");
                out.push_str(&quote_pwsh_single(value));
                out.push('\n');
            }
        }
    }
}

// -------------------- quoting helpers --------------------

fn quote_posix_single(s: &str) -> String {
    let mut out = String::from("'");
    for ch in s.chars() {
        if ch == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

fn quote_fish_single(s: &str) -> String {
    let mut out = String::from("'");
    for ch in s.chars() {
        match ch {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
    out
}

fn quote_pwsh_single(s: &str) -> String {
    let mut out = String::from("'");
    for ch in s.chars() {
        if ch == '\'' {
            out.push_str("''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}
