//! External tool invocation.

use std::process::{Output, Stdio};

use log::debug;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::errors::BuildError;

/// Runs `cmd` to completion, failing if it does not exit successfully.
///
/// `tool` names the program in error messages. On failure, the error carries what the tool
/// printed on both its output streams.
pub async fn run_tool(tool: &str, cmd: &mut Command) -> Result<Output, BuildError> {
    debug!(target: "tool", "{:?}", cmd.as_std());

    let output = cmd
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| BuildError::ToolUnavailable {
            tool: String::from(tool),
            source,
        })?;

    check_status(tool, output)
}

/// Runs `cmd`, feeding `input` on its standard input.
pub async fn run_tool_with_input(
    tool: &str,
    cmd: &mut Command,
    input: &str,
) -> Result<Output, BuildError> {
    debug!(target: "tool", "{:?} <<< {input:?}", cmd.as_std());

    let unavailable = |source| BuildError::ToolUnavailable {
        tool: String::from(tool),
        source,
    };

    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(unavailable)?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input.as_bytes()).await.map_err(unavailable)?;
    }

    let output = child.wait_with_output().await.map_err(unavailable)?;

    check_status(tool, output)
}

/// Concatenates the error and standard output of a tool.
pub fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stderr).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stdout));
    text
}

fn check_status(tool: &str, output: Output) -> Result<Output, BuildError> {
    if !output.status.success() {
        return Err(BuildError::Tool {
            tool: String::from(tool),
            status: output.status.code(),
            output: combined_output(&output),
        });
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn success_returns_output() {
        let output = run_tool("sh", Command::new("sh").args(["-c", "echo formatted"]))
            .await
            .unwrap();

        assert_eq!(String::from_utf8_lossy(&output.stdout), "formatted\n");
    }

    #[tokio::test]
    async fn failure_carries_status_and_output() {
        let err = run_tool(
            "sh",
            Command::new("sh").args(["-c", "echo 'bad geometry' >&2; exit 3"]),
        )
        .await
        .unwrap_err();

        match err {
            BuildError::Tool {
                tool,
                status,
                output,
            } => {
                assert_eq!(tool, "sh");
                assert_eq!(status, Some(3));
                assert!(output.contains("bad geometry"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program() {
        let err = run_tool(
            "mkfs.nothing",
            &mut Command::new("/nonexistent/mkfs.nothing"),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, BuildError::ToolUnavailable { .. }));
    }

    #[tokio::test]
    async fn input_is_fed() {
        let output = run_tool_with_input("cat", &mut Command::new("cat"), "mkdir /boot\n")
            .await
            .unwrap();

        assert_eq!(String::from_utf8_lossy(&output.stdout), "mkdir /boot\n");
    }
}
