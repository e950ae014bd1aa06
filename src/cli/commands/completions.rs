//! `osync completions <shell>`.

use crate::cli::{Cli, Shell};
use crate::error::Result;
use clap::CommandFactory;
use clap_complete::{generate, shells};
use std::io::{self, Write};

const BIN: &str = "osync";

fn write_completions(shell: &Shell, out: &mut dyn Write) {
    let mut cmd = Cli::command();
    match shell {
        Shell::Bash => generate(shells::Bash, &mut cmd, BIN, out),
        Shell::Zsh => generate(shells::Zsh, &mut cmd, BIN, out),
        Shell::Fish => generate(shells::Fish, &mut cmd, BIN, out),
        Shell::PowerShell => generate(shells::PowerShell, &mut cmd, BIN, out),
        Shell::Elvish => generate(shells::Elvish, &mut cmd, BIN, out),
    }
}

/// Print the completion script for `shell`.
///
/// # Errors
///
/// Returns an error if stdout cannot be flushed.
pub fn execute(shell: &Shell) -> Result<()> {
    let mut stdout = io::stdout().lock();
    write_completions(shell, &mut stdout);
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bash_script_offers_sync_commands() {
        let mut out = Vec::new();
        write_completions(&Shell::Bash, &mut out);
        let script = String::from_utf8(out).unwrap();
        for command in ["sync", "daemon", "queue", "retry"] {
            assert!(script.contains(command), "missing {command}");
        }
    }
}
