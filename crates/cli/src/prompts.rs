use std::io::{self, IsTerminal, Write};

use anyhow::{Result, bail};

/// Ask a yes/no question on stderr. `force` answers yes without asking.
pub fn confirm(message: &str, force: bool) -> Result<bool> {
  if force {
    return Ok(true);
  }

  if !io::stdin().is_terminal() || !io::stderr().is_terminal() {
    bail!("Refusing to prompt in non-interactive mode. Pass --force to proceed.");
  }

  write!(io::stderr(), "{message} [y/N] ")?;
  io::stderr().flush()?;

  let mut answer = String::new();
  io::stdin().read_line(&mut answer)?;
  Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
