// Licensed under the Apache-2.0 license

//! Deciding which post-build actions run after the firmware build, and running them.

use std::{fmt, path::PathBuf};

use anyhow::Result;
use log::info;

use crate::{buildfs::build_filesystem, env::BuildEnv, flags::Defines, unified};

/// The define which opts a build into generating the unified binary.
pub const CREATE_FIRMWAREFILE: &str = "CREATE_FIRMWAREFILE";

/// An action to run once the firmware has been built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostBuildAction {
    /// Build the filesystem image.
    BuildFilesystem,
    /// Merge every image into `FW_<program name>.bin`.
    CreateUnifiedBinary,
}

impl fmt::Display for PostBuildAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostBuildAction::BuildFilesystem => f.write_str("build filesystem image"),
            PostBuildAction::CreateUnifiedBinary => f.write_str("create unified binary"),
        }
    }
}

/// The actions to run for a build with the given defines, in order.  Builds which don't define
/// `CREATE_FIRMWAREFILE` get no actions.
pub fn plan(defines: &Defines) -> Vec<PostBuildAction> {
    if defines.is_truthy(CREATE_FIRMWAREFILE) {
        info!("{CREATE_FIRMWAREFILE} is defined. Registering post-build actions.");
        vec![
            PostBuildAction::BuildFilesystem,
            PostBuildAction::CreateUnifiedBinary,
        ]
    } else {
        info!("{CREATE_FIRMWAREFILE} is not defined. Skipping firmware merge.");
        Vec::new()
    }
}

/// Run `actions` in order, stopping at the first failure.  Returns the unified binary if one was
/// created.
pub fn run(env: &BuildEnv, actions: &[PostBuildAction]) -> Result<Option<PathBuf>> {
    let mut unified_binary = None;
    for action in actions {
        info!("Running post-build action: {action}");
        match action {
            PostBuildAction::BuildFilesystem => build_filesystem(env)?,
            PostBuildAction::CreateUnifiedBinary => {
                unified_binary = Some(unified::create_unified_binary(env)?)
            }
        }
    }
    Ok(unified_binary)
}

/// Plan and run the post-build actions for `env`.
pub fn post_build(env: &BuildEnv) -> Result<Option<PathBuf>> {
    run(env, &plan(&env.defines()))
}
