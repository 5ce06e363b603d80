//! Subcommand implementations.

use std::fmt::Display;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use cldispatch_opencl::{
    kernels, vector_add, DeviceFilter, DispatchConfig, DispatchError, Runtime, Session,
    VectorAddRequest,
};
use console::style;
use tracing::info;

/// Options of the `run` command. Unset flags keep the configured value.
#[derive(Args, Debug, Default, Clone)]
pub struct RunCommand {
    /// Kernel source file
    #[arg(short, long, value_name = "PATH")]
    pub kernel: Option<PathBuf>,

    /// Kernel entry point to launch
    #[arg(long, value_name = "NAME")]
    pub entry_point: Option<String>,

    /// Number of elements in each operand
    #[arg(short = 'n', long, value_name = "N")]
    pub elements: Option<usize>,

    /// Number of work-items to launch
    #[arg(short, long, value_name = "N")]
    pub global_size: Option<usize>,

    /// Device type to enumerate (all, gpu, cpu, accelerator)
    #[arg(long, value_name = "TYPE")]
    pub device_type: Option<DeviceFilter>,

    /// Platform to use, by enumeration order
    #[arg(long, value_name = "INDEX")]
    pub platform_index: Option<usize>,

    /// Device to use among the matching ones
    #[arg(long, value_name = "INDEX")]
    pub device_index: Option<usize>,

    /// Only consider devices whose name contains this text
    #[arg(long, value_name = "TEXT")]
    pub device_name: Option<String>,

    /// Options passed to the kernel compiler
    #[arg(long, value_name = "OPTIONS", allow_hyphen_values = true)]
    pub build_options: Option<String>,

    /// Continue with an unusable program when the build fails
    #[arg(long)]
    pub lenient_build: bool,

    /// Allocate inputs read-only and the output write-only
    #[arg(long)]
    pub strict_access: bool,

    /// Number of elements to print per operand
    #[arg(long, value_name = "N")]
    pub show: Option<usize>,
}

impl RunCommand {
    /// Overlay the flags that were given onto `config`.
    pub fn apply(&self, config: &mut DispatchConfig) {
        if let Some(path) = &self.kernel {
            config.run.kernel_path = path.clone();
        }
        if let Some(entry) = &self.entry_point {
            config.run.entry_point = entry.clone();
        }
        if let Some(n) = self.elements {
            config.run.element_count = n;
        }
        if let Some(n) = self.global_size {
            config.run.global_work_size = n;
        }
        if let Some(filter) = self.device_type {
            config.selection.device_type = filter;
        }
        if let Some(index) = self.platform_index {
            config.selection.platform_index = index;
        }
        if let Some(index) = self.device_index {
            config.selection.device_index = index;
        }
        if let Some(name) = &self.device_name {
            config.selection.name_contains = Some(name.clone());
        }
        if let Some(options) = &self.build_options {
            config.build.options = options.clone();
        }
        if self.lenient_build {
            config.build.fail_on_error = false;
        }
        if self.strict_access {
            config.run.strict_access = true;
        }
        if let Some(n) = self.show {
            config.run.display_count = n;
        }
    }

    /// Run the vector-add pipeline described by `config`.
    pub fn execute(&self, config: &DispatchConfig) -> Result<()> {
        let runtime = Runtime::for_backend(config.backend)?;
        let session = Session::open(&runtime, &config.selection)?;
        println!("Platform: {}", session.platform().name());
        println!("Device: {}", session.device().name());

        let source = kernels::load_source(&config.run.kernel_path)?;
        let program = session
            .build_program(&source, &config.build)
            .with_context(|| format!("failed to build {}", config.run.kernel_path.display()))?;
        if program.is_emulated() {
            println!(
                "{}",
                style("Backend: reference (kernel bodies emulated by host implementations)")
                    .yellow()
            );
        }

        let n = config.run.element_count;
        let count = i32::try_from(n).map_err(|_| DispatchError::CountOutOfRange { count: n })?;
        let a: Vec<i32> = (0..count).collect();
        let b: Vec<i32> = (0..count).map(|i| count - i - 1).collect();
        let mut c = vec![0i32; n];

        let request = VectorAddRequest::from_config(&config.run);
        vector_add(&session, &program, &request, &a, &b, &mut c)
            .with_context(|| format!("dispatch of '{}' failed", request.entry_point))?;
        info!(elements = n, global_work_size = request.global_work_size, "run complete");

        let show = config.run.display_count.min(n);
        println!("A: {}", join(&a[..show]));
        println!("B: {}", join(&b[..show]));
        println!("C: {}", join(&c[..show]));
        Ok(())
    }
}

fn join<T: Display>(values: &[T]) -> String {
    values.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ")
}

/// List every platform and the devices it exposes.
pub fn list_devices(config: &DispatchConfig) -> Result<()> {
    let runtime = Runtime::for_backend(config.backend)?;
    let platforms = runtime.list_platforms()?;
    for (p, platform) in platforms.iter().enumerate() {
        println!(
            "{} {} ({}, {})",
            style(format!("[{p}]")).bold(),
            style(platform.name()).bold().cyan(),
            platform.vendor(),
            platform.version()
        );
        match runtime.list_devices(platform, DeviceFilter::All) {
            Ok(devices) => {
                for (d, device) in devices.iter().enumerate() {
                    println!(
                        "  [{d}] {} [{}] {} MiB global, {} MiB max alloc",
                        device.name(),
                        device.device_type(),
                        device.global_mem_bytes() >> 20,
                        device.max_alloc_bytes() >> 20
                    );
                }
            }
            Err(DispatchError::NoDevice { .. }) => {
                println!("  {}", style("no devices").yellow());
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Print the resolved configuration as TOML.
pub fn show_config(config: &DispatchConfig) -> Result<()> {
    let config_str =
        toml::to_string_pretty(config).context("Failed to serialize configuration")?;
    println!("{}", config_str);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_overrides_only_given_flags() {
        let mut config = DispatchConfig::default();
        let cmd = RunCommand {
            elements: Some(8),
            lenient_build: true,
            device_name: Some("gpu".into()),
            ..RunCommand::default()
        };
        cmd.apply(&mut config);
        assert_eq!(config.run.element_count, 8);
        assert!(!config.build.fail_on_error);
        assert_eq!(config.selection.name_contains.as_deref(), Some("gpu"));
        assert_eq!(config.run.global_work_size, DispatchConfig::default().run.global_work_size);
        assert_eq!(config.run.entry_point, "simple_add");
    }

    #[test]
    fn printed_config_parses_back() {
        let mut config = DispatchConfig::default();
        config.run.element_count = 7;
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: DispatchConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.run.element_count, 7);
        assert!(show_config(&config).is_ok());
    }

    #[test]
    fn join_separates_with_spaces() {
        assert_eq!(join(&[1, 2, 3]), "1 2 3");
        assert_eq!(join::<i32>(&[]), "");
    }
}
