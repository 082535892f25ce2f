//! Live updates for running apps: the installer RPC schema and client, the
//! view of running processes the deployer needs, and the driver that turns
//! installer responses into user-facing errors.

pub mod adb;
pub mod deployer;
pub mod error;
pub mod installer;
pub mod proto;

pub use adb::{abi_for_apks, arch_for_abi, AdbClient, DeviceAdbClient};
pub use deployer::{
    LiveUpdateDeployer, UpdateLiveEditResult, UpdateLiveEditsParam, UpdateLiveLiteralParam,
};
pub use error::{DeployError, UpdateLiveEditError};
pub use installer::{read_message, write_message, Installer, InstallerError, RpcInstaller};

pub const TRACE_TARGET: &str = "deploy.live";
