use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::poison::{read, write};
use crate::session::SessionGate;

/// A debuggable process on the device.
#[derive(Debug)]
pub struct ClientState {
    pid: u32,
    uid: u32,
    process_name: String,
    package_name: String,
    abi: Option<String>,
    jvm_flags: String,
    native_debuggable: bool,
    waiting: bool,
    features: Vec<String>,
    session: SessionGate,
}

impl ClientState {
    pub fn new(
        pid: u32,
        uid: u32,
        process_name: impl Into<String>,
        package_name: impl Into<String>,
        waiting: bool,
    ) -> Self {
        Self {
            pid,
            uid,
            process_name: process_name.into(),
            package_name: package_name.into(),
            abi: None,
            jvm_flags: String::new(),
            native_debuggable: false,
            waiting,
            features: Vec::new(),
            session: SessionGate::new(pid),
        }
    }

    /// Process ABI as reported by `HELO`, e.g. `64-bit` or `32-bit`.
    pub fn with_abi(mut self, abi: impl Into<String>) -> Self {
        self.abi = Some(abi.into());
        self
    }

    pub fn with_jvm_flags(mut self, flags: impl Into<String>) -> Self {
        self.jvm_flags = flags.into();
        self
    }

    pub fn with_native_debuggable(mut self, native_debuggable: bool) -> Self {
        self.native_debuggable = native_debuggable;
        self
    }

    pub fn with_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.features = features.into_iter().map(Into::into).collect();
        self
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    /// Android user id derived from the uid (`uid / 100000`).
    pub fn user_id(&self) -> u32 {
        self.uid / 100_000
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn abi(&self) -> Option<&str> {
        self.abi.as_deref()
    }

    pub fn jvm_flags(&self) -> &str {
        &self.jvm_flags
    }

    pub fn native_debuggable(&self) -> bool {
        self.native_debuggable
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn session(&self) -> &SessionGate {
        &self.session
    }
}

/// Client registry for one device. Connection threads read it concurrently;
/// starting and stopping clients takes the write lock.
#[derive(Debug)]
pub struct DeviceState {
    serial: String,
    api_level: u32,
    abis: Vec<String>,
    clients: RwLock<BTreeMap<u32, Arc<ClientState>>>,
}

impl DeviceState {
    pub fn new(serial: impl Into<String>, api_level: u32) -> Self {
        Self {
            serial: serial.into(),
            api_level,
            abis: Vec::new(),
            clients: RwLock::new(BTreeMap::new()),
        }
    }

    /// Supported ABIs, most preferred first.
    pub fn with_abis<I, S>(mut self, abis: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.abis = abis.into_iter().map(Into::into).collect();
        self
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn api_level(&self) -> u32 {
        self.api_level
    }

    pub fn abis(&self) -> &[String] {
        &self.abis
    }

    /// Registers `client`, replacing (and stopping) any previous client with
    /// the same pid.
    pub fn start_client(&self, client: ClientState) -> Arc<ClientState> {
        let client = Arc::new(client);
        let previous = write(&self.clients, "device.start_client").insert(client.pid, client.clone());
        if let Some(previous) = previous {
            previous.session().close();
        }
        tracing::debug!(
            target: crate::TRACE_TARGET,
            serial = %self.serial,
            pid = client.pid,
            package = %client.package_name,
            "client started"
        );
        client
    }

    /// Removes the client and ends its JDWP session, waking any waiters.
    pub fn stop_client(&self, pid: u32) -> Option<Arc<ClientState>> {
        let removed = write(&self.clients, "device.stop_client").remove(&pid);
        if let Some(client) = &removed {
            client.session().close();
            tracing::debug!(target: crate::TRACE_TARGET, serial = %self.serial, pid, "client stopped");
        }
        removed
    }

    pub fn client(&self, pid: u32) -> Option<Arc<ClientState>> {
        read(&self.clients, "device.client").get(&pid).cloned()
    }

    /// Snapshot of every client, ordered by pid.
    pub fn clients(&self) -> Vec<Arc<ClientState>> {
        read(&self.clients, "device.clients").values().cloned().collect()
    }
}
