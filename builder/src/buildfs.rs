// Licensed under the Apache-2.0 license

//! Building the filesystem image which is flashed to its own data partition.

use std::process::Command;

use anyhow::{bail, Context, Result};
use log::{error, info};

use crate::env::BuildEnv;

/// The command run when the environment doesn't override it.
const DEFAULT_BUILDFS_COMMAND: &[&str] =
    &["$PYTHONEXE", "-m", "platformio", "run", "--target", "buildfs"];

/// The filesystem build command with all variables substituted.
pub fn buildfs_command(env: &BuildEnv) -> Result<Vec<String>> {
    let words: Vec<String> = match &env.buildfs.command {
        Some(command) => command.clone(),
        None => DEFAULT_BUILDFS_COMMAND.iter().map(|w| w.to_string()).collect(),
    };
    if words.is_empty() {
        bail!("The filesystem image build command is empty");
    }
    words.iter().map(|w| env.subst(w)).collect()
}

/// Build the filesystem image, capturing the output of the build.
///
/// There is no retry: if the build exits unsuccessfully its captured error output is logged and
/// an error is returned.
pub fn build_filesystem(env: &BuildEnv) -> Result<()> {
    info!("Building filesystem image...");

    let words = buildfs_command(env)?;
    let mut cmd = Command::new(&words[0]);
    cmd.args(&words[1..]);

    let output = cmd
        .output()
        .with_context(|| format!("Failed to execute command: {}", words.join(" ")))?;

    if !output.status.success() {
        error!("Failed to build filesystem image.");
        error!("{}", String::from_utf8_lossy(&output.stderr));
        bail!(
            "Filesystem image build failed ({}): {}",
            output.status,
            words.join(" ")
        );
    }

    info!("Successfully built filesystem image.");
    info!("FLASH_EXTRA_IMAGES: {:?}", env.flash_extra_images()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_env(command: &[&str]) -> BuildEnv {
        let mut env = BuildEnv::default();
        env.buildfs.command = Some(command.iter().map(|w| w.to_string()).collect());
        env
    }

    #[test]
    fn default_command_uses_python() {
        let mut env = BuildEnv::default();
        env.set_var("PYTHONEXE", "/usr/bin/python3");
        assert_eq!(
            buildfs_command(&env).unwrap(),
            vec![
                "/usr/bin/python3",
                "-m",
                "platformio",
                "run",
                "--target",
                "buildfs"
            ]
        );
    }

    #[test]
    fn default_command_requires_python() {
        assert!(buildfs_command(&BuildEnv::default()).is_err());
    }

    #[test]
    fn empty_command_fails() {
        assert!(buildfs_command(&test_env(&[])).is_err());
    }

    #[test]
    fn successful_build() {
        let env = test_env(&["sh", "-c", "echo building; exit 0"]);
        assert!(build_filesystem(&env).is_ok());
    }

    #[test]
    fn failed_build() {
        let env = test_env(&["sh", "-c", "echo 'no data dir' >&2; exit 3"]);
        let err = build_filesystem(&env).unwrap_err();
        assert!(err.to_string().contains("Filesystem image build failed"));
    }

    #[test]
    fn missing_program() {
        let env = test_env(&["/does/not/exist/buildfs"]);
        assert!(build_filesystem(&env).is_err());
    }
}
