use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use candle::{DType, Device};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePreference {
    Auto,
    Cpu,
    Cuda(usize),
    Metal(usize),
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let lower = trimmed.to_ascii_lowercase();
        let mut parts = lower.splitn(2, ':');
        let kind = parts.next().unwrap_or_default();
        let ordinal = match parts.next() {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| format!("invalid device ordinal in '{trimmed}'"))?,
            None => 0,
        };

        match kind {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda(ordinal)),
            "metal" | "mps" => Ok(Self::Metal(ordinal)),
            _ => Err(format!("unrecognized device '{trimmed}'")),
        }
    }
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(n) => write!(f, "cuda:{n}"),
            Self::Metal(n) => write!(f, "metal:{n}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    F16,
    Bf16,
    F32,
}

impl FromStr for Precision {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "f16" | "float16" | "half" => Ok(Self::F16),
            "bf16" | "bfloat16" => Ok(Self::Bf16),
            "f32" | "float32" => Ok(Self::F32),
            other => Err(format!("unsupported precision '{other}'")),
        }
    }
}

impl From<Precision> for DType {
    fn from(p: Precision) -> Self {
        match p {
            Precision::F16 => DType::F16,
            Precision::Bf16 => DType::BF16,
            Precision::F32 => DType::F32,
        }
    }
}

/// Explicit choices fail loudly; `Auto` walks Metal, CUDA, CPU.
pub fn select_device(pref: DevicePreference) -> Result<Device> {
    match pref {
        DevicePreference::Cpu => Ok(Device::Cpu),
        DevicePreference::Cuda(n) => Device::new_cuda(n).map_err(|err| {
            anyhow!(
                "requested CUDA device {n} but initialization failed: {err}. \
                 Build with the `cuda` feature and ensure CUDA libraries are available."
            )
        }),
        DevicePreference::Metal(n) => Device::new_metal(n).map_err(|err| {
            anyhow!(
                "requested Metal device {n} but initialization failed: {err}. \
                 Build with the `metal` feature."
            )
        }),
        DevicePreference::Auto => {
            if candle::utils::metal_is_available() {
                match Device::new_metal(0) {
                    Ok(device) => return Ok(device),
                    Err(err) => warn!("Metal initialization failed: {err}, trying CUDA"),
                }
            }
            if candle::utils::cuda_is_available() {
                match Device::new_cuda(0) {
                    Ok(device) => return Ok(device),
                    Err(err) => warn!("CUDA initialization failed: {err}, falling back to CPU"),
                }
            }
            info!("no accelerator available, running on CPU");
            Ok(Device::Cpu)
        }
    }
}

/// Half precision on accelerators, f32 on CPU unless told otherwise.
pub fn select_dtype(device: &Device, precision: Option<Precision>) -> DType {
    match precision {
        Some(p) => p.into(),
        None if device.is_cpu() => DType::F32,
        None => DType::F16,
    }
}
