// Licensed under the Apache-2.0 license

//! The build environment the post-build steps run against.  This is loaded from a TOML file
//! written by the host build system and describes the variables, build flags, and project options
//! of the build which just finished.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use crate::flags::{parse_defines, Defines};

/// Escape every backslash which does not escape a `$`, so it survives substitution literally.
fn escape_backslashes(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        escaped.push(c);
        if c == '\\' {
            match chars.peek() {
                Some('$') => escaped.extend(chars.next()),
                _ => escaped.push('\\'),
            }
        }
    }
    escaped
}

/// The project option naming the partition table CSV.
pub const PARTITIONS_OPTION: &str = "board_build.partitions";

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct BuildEnv {
    /// Variables available for substitution in any string of the environment, e.g. `BUILD_DIR`,
    /// `PROGNAME`, `PROJECT_DIR`, and `PYTHONEXE`.
    #[serde(default)]
    pub vars: HashMap<String, String>,

    /// The compiler flags the firmware was built with.  Preprocessor defines are extracted from
    /// them to decide which post-build steps run.
    #[serde(default)]
    pub build_flags: Vec<String>,

    /// The offset of the application partition.  Passed through to the merge unmodified.
    #[serde(rename = "ESP32_APP_OFFSET")]
    pub app_offset: Option<String>,

    /// The chip the firmware was built for.
    #[serde(rename = "BOARD_MCU")]
    pub board_mcu: Option<String>,

    /// Images the build system already knows to flash, as `"<address> <file>"` strings.
    #[serde(rename = "FLASH_EXTRA_IMAGES", default)]
    pub flash_extra_images: Vec<String>,

    /// Project options keyed by their dotted name, e.g. `board_build.partitions`.
    #[serde(default)]
    pub options: HashMap<String, String>,

    #[serde(default)]
    pub buildfs: BuildFsConfig,

    #[serde(default)]
    pub merge: MergeConfig,
}

/// Configuration of the filesystem image build.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct BuildFsConfig {
    /// The command building the filesystem image.  If not specified
    /// `$PYTHONEXE -m platformio run --target buildfs` is used.
    pub command: Option<Vec<String>>,
}

/// Configuration handed through to the merge.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    /// Pad the merged image to the full flash size, e.g. `4MB`.
    pub fill_flash_size: Option<String>,

    /// The flash address the merged image will be written to.  Default: 0.
    pub target_offset: Option<String>,
}

impl BuildEnv {
    /// Load a build environment from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read build environment {}", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Invalid build environment {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Set (or replace) a substitution variable.
    pub fn set_var(&mut self, name: &str, value: impl Into<String>) {
        self.vars.insert(name.to_string(), value.into());
    }

    /// Expand `$VAR` and `${VAR}` references in `s`.  Variables may themselves reference other
    /// variables.  A backslash only escapes a following `$`, so `\$` is a literal dollar sign and
    /// Windows paths pass through unchanged.
    ///
    /// This fails if `s` references a variable which is not defined (or whose own value
    /// references an undefined variable), or if variables reference each other in a cycle.
    pub fn subst(&self, s: &str) -> Result<String> {
        let vars = self.resolved_vars()?;
        subst::substitute(&escape_backslashes(s), &vars)
            .with_context(|| format!("Failed to substitute '{s}'"))
    }

    /// The variables with every reference between them expanded.
    ///
    /// Each round expands the raw value of every variable against the previous round, so an
    /// expanded value is never parsed again.  A chain of references is resolved after as many
    /// rounds as it is long; anything still changing after that is a cycle.  Variables whose
    /// value cannot be expanded are left out, so only strings referencing them fail.
    fn resolved_vars(&self) -> Result<HashMap<String, String>> {
        let mut resolved = self.vars.clone();
        for _ in 0..=self.vars.len() {
            let next: HashMap<String, String> = self
                .vars
                .iter()
                .filter_map(|(name, raw)| {
                    subst::substitute(&escape_backslashes(raw), &resolved)
                        .ok()
                        .map(|value| (name.clone(), value))
                })
                .collect();
            if next == resolved {
                return Ok(resolved);
            }
            resolved = next;
        }
        bail!("Build environment variables reference each other in a cycle")
    }

    /// Look up a project option.  Empty values count as not set.
    pub fn project_option(&self, name: &str) -> Option<&str> {
        self.options
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// The preprocessor defines of the build.
    pub fn defines(&self) -> Defines {
        parse_defines(&self.build_flags)
    }

    fn required_var(&self, name: &str) -> Result<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("Variable '{name}' is not defined in the build environment"))
    }

    /// The directory build artifacts are written to.
    pub fn build_dir(&self) -> Result<PathBuf> {
        Ok(PathBuf::from(self.subst(self.required_var("BUILD_DIR")?)?))
    }

    /// The root of the project.  Relative paths in project options are relative to it.
    pub fn project_dir(&self) -> Result<PathBuf> {
        Ok(PathBuf::from(self.subst(self.required_var("PROJECT_DIR")?)?))
    }

    pub fn progname(&self) -> Result<String> {
        self.subst(self.required_var("PROGNAME")?)
    }

    pub fn app_offset(&self) -> Result<String> {
        match self.app_offset.as_deref().map(str::trim) {
            Some(offset) if !offset.is_empty() => self.subst(offset),
            _ => bail!("'ESP32_APP_OFFSET' is not defined in the build environment"),
        }
    }

    pub fn board_mcu(&self) -> Result<String> {
        match self.board_mcu.as_deref().map(str::trim) {
            Some(mcu) if !mcu.is_empty() => self.subst(mcu),
            _ => bail!("'BOARD_MCU' is not defined in the build environment"),
        }
    }

    /// The extra flash images with all variables substituted.
    pub fn flash_extra_images(&self) -> Result<Vec<String>> {
        self.flash_extra_images
            .iter()
            .map(|image| self.subst(image))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_ENV: &str = r#"
build_flags = ["-DCREATE_FIRMWAREFILE -DNUM_DIGITS=6", "-Os"]
ESP32_APP_OFFSET = "0x10000"
BOARD_MCU = "esp32"
FLASH_EXTRA_IMAGES = ["0x1000 ${BUILD_DIR}/bootloader.bin", "0x8000 $BUILD_DIR/partitions.bin"]

[vars]
BUILD_DIR = "$PROJECT_DIR/.pio/build/esp32dev"
PROJECT_DIR = "/work/clock"
PROGNAME = "firmware"

[options]
"board_build.partitions" = "partitions.csv"

[merge]
fill_flash_size = "4MB"
"#;

    #[test]
    fn load_from_toml() {
        let env = BuildEnv::from_toml(TEST_ENV).unwrap();
        assert_eq!(env.app_offset().unwrap(), "0x10000");
        assert_eq!(env.board_mcu().unwrap(), "esp32");
        assert_eq!(env.project_option(PARTITIONS_OPTION), Some("partitions.csv"));
        assert_eq!(env.merge.fill_flash_size.as_deref(), Some("4MB"));
        assert!(env.buildfs.command.is_none());
    }

    #[test]
    fn substitution_expands_variables() {
        let env = BuildEnv::from_toml(TEST_ENV).unwrap();
        assert_eq!(env.progname().unwrap(), "firmware");
        assert_eq!(
            env.subst("$BUILD_DIR/FW_${PROGNAME}.bin").unwrap(),
            "/work/clock/.pio/build/esp32dev/FW_firmware.bin"
        );
        assert_eq!(
            env.flash_extra_images().unwrap(),
            vec![
                "0x1000 /work/clock/.pio/build/esp32dev/bootloader.bin",
                "0x8000 /work/clock/.pio/build/esp32dev/partitions.bin",
            ]
        );
    }

    #[test]
    fn build_dir_expands_nested_variables() {
        let env = BuildEnv::from_toml(TEST_ENV).unwrap();
        assert_eq!(
            env.build_dir().unwrap(),
            PathBuf::from("/work/clock/.pio/build/esp32dev")
        );
    }

    #[test]
    fn windows_paths_are_kept() {
        let mut env = BuildEnv::default();
        env.set_var("PROJECT_DIR", r"C:\Users\me\clock");
        env.set_var("BUILD_DIR", r"$PROJECT_DIR\.pio\build\esp32dev");
        env.set_var("PROGNAME", "firmware");

        assert_eq!(
            env.build_dir().unwrap(),
            PathBuf::from(r"C:\Users\me\clock\.pio\build\esp32dev")
        );
        assert_eq!(
            env.subst(r"$BUILD_DIR\FW_${PROGNAME}.bin").unwrap(),
            r"C:\Users\me\clock\.pio\build\esp32dev\FW_firmware.bin"
        );
    }

    #[test]
    fn escaped_dollar_is_literal() {
        let mut env = BuildEnv::default();
        env.set_var("PROGNAME", "firmware");
        env.set_var("PRICE", r"cost\$5");

        assert_eq!(env.subst(r"cost\$5 $PROGNAME").unwrap(), "cost$5 firmware");
        assert_eq!(env.subst("$PRICE for $PROGNAME").unwrap(), "cost$5 for firmware");
    }

    #[test]
    fn broken_variable_only_fails_its_users() {
        let mut env = BuildEnv::default();
        env.set_var("PROGNAME", "firmware");
        env.set_var("BROKEN", "$NOT_DEFINED/x");

        assert_eq!(env.progname().unwrap(), "firmware");
        assert!(env.subst("$BROKEN").is_err());
    }

    #[test]
    fn cyclic_variables_fail() {
        let mut env = BuildEnv::default();
        env.set_var("A", "$B");
        env.set_var("B", "${A}");
        assert!(env.subst("$A").is_err());
    }

    #[test]
    fn undefined_variable_fails() {
        let env = BuildEnv::from_toml(TEST_ENV).unwrap();
        assert!(env.subst("$NOT_DEFINED/x").is_err());
    }

    #[test]
    fn reference_environment_loads() {
        let env = BuildEnv::from_toml(include_str!("../reference/esp32dev.toml")).unwrap();
        assert!(env.defines().is_truthy("CREATE_FIRMWAREFILE"));
        assert_eq!(env.build_dir().unwrap(), PathBuf::from("./.pio/build/esp32dev"));
        assert_eq!(env.flash_extra_images().unwrap().len(), 3);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(BuildEnv::from_toml("NOT_A_FIELD = 1").is_err());
    }

    #[test]
    fn missing_values_are_reported() {
        let env = BuildEnv::default();
        assert!(env.app_offset().is_err());
        assert!(env.board_mcu().is_err());
        assert!(env.build_dir().is_err());
        assert!(env.project_option(PARTITIONS_OPTION).is_none());
    }

    #[test]
    fn empty_project_option_is_unset() {
        let mut env = BuildEnv::default();
        env.options.insert(PARTITIONS_OPTION.to_string(), "  ".to_string());
        assert!(env.project_option(PARTITIONS_OPTION).is_none());
    }
}
