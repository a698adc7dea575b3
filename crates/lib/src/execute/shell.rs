//! Interpreter selection for build scripts.

use std::path::Path;

/// Program and leading arguments used to run `script`. The script path is
/// appended after these arguments.
///
/// The system shell is used rather than `$SHELL`: interactive shells may
/// source profile files that alter the cleared environment.
pub fn interpreter_for(script: &Path, override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec!["-NoProfile".to_string(), "-File".to_string()]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      Vec::new()
    };
    return (shell.to_string(), args);
  }

  let ext = script
    .extension()
    .and_then(|e| e.to_str())
    .map(str::to_ascii_lowercase);

  match ext.as_deref() {
    Some("bat") | Some("cmd") => ("cmd.exe".to_string(), vec!["/C".to_string()]),
    Some("ps1") => (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-File".to_string(),
      ],
    ),
    _ => default_shell(),
  }
}

#[cfg(unix)]
fn default_shell() -> (String, Vec<String>) {
  ("/bin/sh".to_string(), Vec::new())
}

#[cfg(windows)]
fn default_shell() -> (String, Vec<String>) {
  ("cmd.exe".to_string(), vec!["/C".to_string()])
}
