//! Process resource sampling
//!
//! The monitor polls a [`ResourceSampler`] once per tick. On Linux the default
//! sampler reads `/proc`; elsewhere it reports nothing and the resource rules
//! simply never fire.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed {field}: {reason}")]
    Malformed { field: &'static str, reason: String },
}

/// One memory/CPU observation; either half may be unavailable
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceSample {
    pub memory_mb: Option<f64>,
    pub cpu_percent: Option<f64>,
}

/// Source of process memory and CPU load readings
pub trait ResourceSampler: Send + Sync {
    fn sample(&self) -> Result<ResourceSample, SampleError>;
}

/// Reads resident memory from `/proc/self/status` and CPU load from `/proc/loadavg`
///
/// CPU is approximated as the 1-minute load average divided by the number of
/// available cores, expressed in percent.
#[derive(Debug, Clone)]
pub struct ProcSampler {
    status_path: PathBuf,
    loadavg_path: PathBuf,
    cores: usize,
}

impl Default for ProcSampler {
    fn default() -> Self {
        Self {
            status_path: PathBuf::from("/proc/self/status"),
            loadavg_path: PathBuf::from("/proc/loadavg"),
            cores: std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
        }
    }
}

impl ResourceSampler for ProcSampler {
    fn sample(&self) -> Result<ResourceSample, SampleError> {
        if !cfg!(target_os = "linux") {
            return Ok(ResourceSample::default());
        }

        let memory_mb = parse_rss_mb(&read(&self.status_path)?)?;
        let load = parse_load_avg_1m(&read(&self.loadavg_path)?)?;

        Ok(ResourceSample {
            memory_mb: Some(memory_mb),
            cpu_percent: Some(load / self.cores.max(1) as f64 * 100.0),
        })
    }
}

fn read(path: &Path) -> Result<String, SampleError> {
    fs::read_to_string(path).map_err(|source| SampleError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_rss_mb(contents: &str) -> Result<f64, SampleError> {
    let line = contents
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .ok_or_else(|| SampleError::Malformed {
            field: "VmRSS",
            reason: "field missing".to_string(),
        })?;

    let kb: u64 = line
        .split_whitespace()
        .next()
        .ok_or_else(|| SampleError::Malformed {
            field: "VmRSS",
            reason: "value missing".to_string(),
        })?
        .parse()
        .map_err(|e| SampleError::Malformed {
            field: "VmRSS",
            reason: format!("{}", e),
        })?;

    Ok(kb as f64 / 1024.0)
}

fn parse_load_avg_1m(contents: &str) -> Result<f64, SampleError> {
    contents
        .split_whitespace()
        .next()
        .ok_or_else(|| SampleError::Malformed {
            field: "loadavg",
            reason: "first field missing".to_string(),
        })?
        .parse()
        .map_err(|e| SampleError::Malformed {
            field: "loadavg",
            reason: format!("{}", e),
        })
}
