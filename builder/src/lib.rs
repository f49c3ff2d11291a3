// Licensed under the Apache-2.0 license

//! Post-build steps producing a single flashable image for an ESP firmware project.
//!
//! After the firmware itself is built, the project can opt into two more steps by defining
//! `CREATE_FIRMWAREFILE` in its build flags:
//!     1. The filesystem image is built by the host build system.
//!     2. The bootloader, partition table, every partition listed in the partition table CSV, and
//!        the application are merged into `<build dir>/FW_<program name>.bin`, which can be
//!        flashed at offset 0.
//!
//! The host build system describes the finished build through a [`BuildEnv`] rather than through
//! any process-wide state; [`post_build::plan`] turns it into the list of actions to run.

pub mod buildfs;
pub mod env;
pub mod flags;
pub mod partitions;
pub mod post_build;
pub mod sections;
pub mod unified;

pub use env::BuildEnv;
pub use post_build::{post_build, PostBuildAction};
