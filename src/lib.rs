//! Detection of the host x86 microarchitecture for kernel selection.
//!
//! `cpuid` is issued either through the compiler intrinsic or through a small stub written into
//! executable memory for the running calling convention. The vendor and signature it reports
//! are looked up in per vendor tables, aliased onto a supported template and gated on AVX.

#![deny(missing_docs, missing_debug_implementations)]

use lazy_static::lazy_static;
use log::{info, warn};

mod errors;
pub use errors::{Error, Result};

/// Architecture specific access to `cpuid`.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[path = "arch/x86/mod.rs"]
pub mod arch;

/// Architecture specific access to `cpuid`.
#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
#[path = "arch/generic/mod.rs"]
pub mod arch;

pub mod classify;
pub use classify::{Classifier, Codename, Detection};

pub mod config;
pub use config::Config;

pub mod decode;
pub use decode::{CpuIdentity, Vendor};

pub mod invoke;
pub use invoke::{CpuidSource, Invoker, RawRegisters, Strategy};

lazy_static! {
    static ref DETECTION: Detection = {
        let config = Config::from_env().unwrap_or_else(|e| {
            warn!("Ignoring invalid configuration - {}", e);
            Config::default()
        });
        detect_with(&config)
    };
}

/// Classify the processor according to `config`.
///
/// Failing to build the invoker for any reason other than an unsupported platform is returned
/// to the caller.
pub fn try_detect(config: &Config) -> Result<Detection> {
    classify_invoker(Invoker::new(config.strategy), config)
}

/// Classify the processor according to `config`, treating every invoker failure as an
/// unsupported platform.
pub fn detect_with(config: &Config) -> Detection {
    recover(try_detect(config), config)
}

/// Classify through whatever `Invoker::new` produced. Only `UnsupportedPlatform` is absorbed.
fn classify_invoker(invoker: Result<Invoker>, config: &Config) -> Result<Detection> {
    let mut detection = match invoker {
        Ok(invoker) => Classifier::new(Some(&invoker)).classify(),
        Err(Error::UnsupportedPlatform) => Classifier::new(None).classify(),
        Err(e) => return Err(e),
    };
    if let Some(coretype) = config.coretype {
        info!("{} detected, reporting {} as configured", detection.codename, coretype);
        detection.codename = coretype;
    }
    Ok(detection)
}

/// Turn a failed detection into the generic one, keeping a configured codename.
fn recover(detection: Result<Detection>, config: &Config) -> Detection {
    detection.unwrap_or_else(|e| {
        warn!("cpuid unavailable, using {} - {}", classify::GENERIC, e);
        let mut detection = Detection::unsupported();
        if let Some(coretype) = config.coretype {
            detection.codename = coretype;
        }
        detection
    })
}

/// Detection for this process. Computed on first use and cached.
pub fn detect() -> &'static Detection {
    &DETECTION
}

/// Codename of the host microarchitecture, `"reference"` when nothing more specific applies.
pub fn detect_microarchitecture() -> &'static str {
    detect().codename.as_str()
}
