use std::collections::HashSet;
use std::sync::Arc;

use deploy_jdwp::DeviceState;
use deploy_model::Apk;

use crate::error::DeployError;
use crate::proto::Arch;

/// What the deployer needs to know about processes running on a device.
pub trait AdbClient {
    /// Pids of the running processes that belong to `package`.
    fn pids(&self, package: &str) -> Vec<u32>;

    /// The architecture shared by `pids`, or [`Arch::Unknown`] when none of
    /// them reports one.
    fn arch(&self, pids: &[u32]) -> Arch;
}

/// Maps an ABI name such as `arm64-v8a` to its word size.
pub fn arch_for_abi(abi: &str) -> Option<Arch> {
    match abi {
        "arm64-v8a" | "x86_64" => Some(Arch::Arch64Bit),
        "armeabi-v7a" | "x86" => Some(Arch::Arch32Bit),
        _ => None,
    }
}

/// Picks the ABI the app will run with: the most preferred device ABI that
/// the app ships native code for, or simply the most preferred device ABI
/// when the app has no native code.
pub fn abi_for_apks(device_abis: &[String], apks: &[Apk]) -> Result<String, DeployError> {
    let app_abis: HashSet<&str> = apks
        .iter()
        .flat_map(|apk| apk.library_abis())
        .map(String::as_str)
        .collect();

    let Some(preferred) = device_abis.first() else {
        return Err(DeployError::UnsupportedArch);
    };
    if app_abis.is_empty() {
        return Ok(preferred.clone());
    }

    device_abis
        .iter()
        .find(|abi| app_abis.contains(abi.as_str()))
        .cloned()
        .ok_or(DeployError::UnsupportedArch)
}

/// [`AdbClient`] answering from the client registry of a [`DeviceState`].
#[derive(Clone)]
pub struct DeviceAdbClient {
    device: Arc<DeviceState>,
}

impl DeviceAdbClient {
    pub fn new(device: Arc<DeviceState>) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &Arc<DeviceState> {
        &self.device
    }

    pub fn abi_for_apks(&self, apks: &[Apk]) -> Result<String, DeployError> {
        abi_for_apks(self.device.abis(), apks)
    }

    /// Client ABIs are reported as descriptions like `"64-bit (arm64)"`.
    fn arch_of(&self, pid: u32) -> Arch {
        let Some(client) = self.device.client(pid) else {
            return Arch::Unknown;
        };
        match client.abi() {
            Some(abi) if abi.starts_with("32-bit") => Arch::Arch32Bit,
            Some(abi) if abi.starts_with("64-bit") => Arch::Arch64Bit,
            _ => Arch::Unknown,
        }
    }
}

impl AdbClient for DeviceAdbClient {
    fn pids(&self, package: &str) -> Vec<u32> {
        self.device
            .clients()
            .iter()
            .filter(|client| client.package_name() == package)
            .map(|client| client.pid())
            .collect()
    }

    fn arch(&self, pids: &[u32]) -> Arch {
        let mut result = Arch::Unknown;
        for &pid in pids {
            let arch = self.arch_of(pid);
            if result == Arch::Unknown {
                result = arch;
            } else if arch != Arch::Unknown && arch != result {
                // Webview processes legitimately run with a different ABI.
                tracing::warn!(
                    target: crate::TRACE_TARGET,
                    first = %result,
                    other = %arch,
                    pid,
                    "mixed ABIs detected"
                );
            }
        }
        result
    }
}
