//! Hardware backends and their build configurations

use serde::{Deserialize, Serialize};

/// Hardware execution path of the simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// OpenCL accelerated path
    Gpu,
    /// CPU-only reference path
    Cpu,
}

impl Backend {
    /// Both backends, in pipeline order
    pub fn all() -> [Backend; 2] {
        [Backend::Gpu, Backend::Cpu]
    }

    /// Upper-case label used in logs and reports
    pub fn label(&self) -> &'static str {
        match self {
            Backend::Gpu => "GPU",
            Backend::Cpu => "CPU",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Flag set for one backend, as read from configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendProfile {
    /// Configure-time definitions (`-D...`)
    #[serde(default)]
    pub build_flags: Vec<String>,
    /// Compiler flags, joined into `CMAKE_C_FLAGS`
    #[serde(default)]
    pub optimization_flags: Vec<String>,
    /// Arguments handed to the simulator to select this backend at run time
    #[serde(default)]
    pub runtime_args: Vec<String>,
}

impl BackendProfile {
    /// Default GPU profile: OpenCL on, reassociating float math
    pub fn gpu() -> Self {
        Self {
            build_flags: vec![
                "-DNBODY_OPENCL=ON".to_string(),
                "-DCMAKE_BUILD_TYPE=DEBUG".to_string(),
            ],
            optimization_flags: vec!["-funsafe-math-optimizations".to_string()],
            runtime_args: Vec::new(),
        }
    }

    /// Default CPU profile: OpenCL off, strict IEEE ordering
    pub fn cpu() -> Self {
        Self {
            build_flags: vec![
                "-DNBODY_OPENCL=OFF".to_string(),
                "-DCMAKE_BUILD_TYPE=DEBUG".to_string(),
            ],
            optimization_flags: Vec::new(),
            runtime_args: Vec::new(),
        }
    }

    pub fn for_backend(backend: Backend) -> Self {
        match backend {
            Backend::Gpu => Self::gpu(),
            Backend::Cpu => Self::cpu(),
        }
    }
}

/// Immutable build configuration for one backend run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendConfig {
    backend: Backend,
    build_flags: Vec<String>,
    optimization_flags: Vec<String>,
    runtime_args: Vec<String>,
}

impl BackendConfig {
    pub fn new(backend: Backend, profile: BackendProfile) -> Self {
        Self {
            backend,
            build_flags: profile.build_flags,
            optimization_flags: profile.optimization_flags,
            runtime_args: profile.runtime_args,
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn build_flags(&self) -> &[String] {
        &self.build_flags
    }

    pub fn optimization_flags(&self) -> &[String] {
        &self.optimization_flags
    }

    pub fn runtime_args(&self) -> &[String] {
        &self.runtime_args
    }

    /// Arguments for the configure step, in order: build flags, then the
    /// joined optimization flags as `-DCMAKE_C_FLAGS=...` when any are set.
    pub fn configure_args(&self) -> Vec<String> {
        let mut args = self.build_flags.clone();
        if !self.optimization_flags.is_empty() {
            args.push(format!(
                "-DCMAKE_C_FLAGS={}",
                self.optimization_flags.join(" ")
            ));
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_labels() {
        assert_eq!(Backend::Gpu.to_string(), "GPU");
        assert_eq!(Backend::Cpu.to_string(), "CPU");
        assert_eq!(Backend::all(), [Backend::Gpu, Backend::Cpu]);
    }

    #[test]
    fn test_gpu_configure_args_carry_unsafe_math() {
        let config = BackendConfig::new(Backend::Gpu, BackendProfile::gpu());
        assert_eq!(
            config.configure_args(),
            vec![
                "-DNBODY_OPENCL=ON",
                "-DCMAKE_BUILD_TYPE=DEBUG",
                "-DCMAKE_C_FLAGS=-funsafe-math-optimizations",
            ]
        );
    }

    #[test]
    fn test_cpu_configure_args_are_strict() {
        let config = BackendConfig::new(Backend::Cpu, BackendProfile::cpu());
        let args = config.configure_args();
        assert!(args.contains(&"-DNBODY_OPENCL=OFF".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("-DCMAKE_C_FLAGS")));
    }

    #[test]
    fn test_profile_deserializes_with_defaults() {
        let profile: BackendProfile = toml::from_str(r#"build_flags = ["-DFOO=1"]"#).unwrap();
        assert_eq!(profile.build_flags, vec!["-DFOO=1"]);
        assert!(profile.optimization_flags.is_empty());
        assert!(profile.runtime_args.is_empty());
    }
}
