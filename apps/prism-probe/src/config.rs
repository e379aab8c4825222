//! Command line configuration.

use anyhow::{bail, Context};
use std::path::PathBuf;

pub const USAGE: &str = "\
Usage: prism-probe [OPTIONS]

Options:
  --meshes <N>        Number of procedural meshes to build (default 3)
  --obj <PATH>        Build one mesh per shape of an OBJ file instead
  --hit-groups <H>    Hit groups in the printed table layout (default 2)
  --miss-groups <M>   Miss groups in the printed table layout (default 2)
  --no-validation     Disable Vulkan validation layers
  -h, --help          Print this help";

/// Probe settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    pub mesh_count: u32,
    pub obj_path: Option<PathBuf>,
    pub hit_groups: u32,
    pub miss_groups: u32,
    pub validation: bool,
    pub show_help: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            mesh_count: 3,
            obj_path: None,
            hit_groups: 2,
            miss_groups: 2,
            validation: cfg!(debug_assertions),
            show_help: false,
        }
    }
}

impl ProbeConfig {
    /// Parse from the process arguments.
    pub fn from_args() -> anyhow::Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        Self::parse_args(&args)
    }

    /// Parse from a slice of arguments. The first entry is the program name.
    pub fn parse_args(args: &[String]) -> anyhow::Result<Self> {
        let mut config = Self::default();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--meshes" => {
                    config.mesh_count = parse_count(args, i)?;
                    i += 1;
                }
                "--obj" => {
                    let path = args.get(i + 1).context("--obj needs a path")?;
                    config.obj_path = Some(PathBuf::from(path));
                    i += 1;
                }
                "--hit-groups" => {
                    config.hit_groups = parse_count(args, i)?;
                    i += 1;
                }
                "--miss-groups" => {
                    config.miss_groups = parse_count(args, i)?;
                    i += 1;
                }
                "--no-validation" => {
                    config.validation = false;
                }
                "-h" | "--help" => {
                    config.show_help = true;
                }
                other => bail!("unknown argument: {other}"),
            }
            i += 1;
        }

        if config.mesh_count == 0 {
            bail!("--meshes must be at least 1");
        }

        Ok(config)
    }
}

fn parse_count(args: &[String], flag_index: usize) -> anyhow::Result<u32> {
    let flag = &args[flag_index];
    let value = args
        .get(flag_index + 1)
        .with_context(|| format!("{flag} needs a value"))?;
    value
        .parse()
        .with_context(|| format!("{flag}: invalid count {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("prism-probe")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn defaults_without_arguments() {
        let config = ProbeConfig::parse_args(&args(&[])).unwrap();
        assert_eq!(config.mesh_count, 3);
        assert_eq!(config.hit_groups, 2);
        assert_eq!(config.miss_groups, 2);
        assert!(!config.show_help);
        assert!(config.obj_path.is_none());
    }

    #[test]
    fn obj_path_flag() {
        let config = ProbeConfig::parse_args(&args(&["--obj", "scenes/sponza.obj"])).unwrap();
        assert_eq!(config.obj_path, Some(PathBuf::from("scenes/sponza.obj")));
        assert!(ProbeConfig::parse_args(&args(&["--obj"])).is_err());
    }

    #[test]
    fn parses_every_flag() {
        let config = ProbeConfig::parse_args(&args(&[
            "--meshes",
            "5",
            "--hit-groups",
            "4",
            "--miss-groups",
            "1",
            "--no-validation",
        ]))
        .unwrap();
        assert_eq!(config.mesh_count, 5);
        assert_eq!(config.hit_groups, 4);
        assert_eq!(config.miss_groups, 1);
        assert!(!config.validation);
    }

    #[test]
    fn help_flag() {
        assert!(ProbeConfig::parse_args(&args(&["-h"])).unwrap().show_help);
        assert!(ProbeConfig::parse_args(&args(&["--help"])).unwrap().show_help);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(ProbeConfig::parse_args(&args(&["--meshes"])).is_err());
        assert!(ProbeConfig::parse_args(&args(&["--meshes", "many"])).is_err());
        assert!(ProbeConfig::parse_args(&args(&["--meshes", "0"])).is_err());
        assert!(ProbeConfig::parse_args(&args(&["--frobnicate"])).is_err());
    }
}
