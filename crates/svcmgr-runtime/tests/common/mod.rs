//! Shared fixtures for the runtime integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use svcmgr_core::protocol::message::{Credential, SessionGrant};
use svcmgr_core::{
    ClientConfig, ClientId, CryptoProvider, GroupKey, HashAlgorithm, InboundReceiver, KeyPair,
    ManagerConfig, MessageBus, PublicKey, Request, RequestData, Response, ResponseData,
    SealedBoxCrypto, ServiceState, SessionId, TunnelPayload, WireFormat,
};
use svcmgr_harness::{MemoryBus, MemoryEndpoint, MemoryLogStore, MockComponentManager};
use svcmgr_runtime::{ManagerClient, ServiceManager, ServiceManagerBuilder};

pub const EVIDENCE: &[u8] = b"integration-evidence";

pub fn config() -> ManagerConfig {
    ManagerConfig::testing(EVIDENCE)
}

pub fn components() -> MockComponentManager {
    MockComponentManager::new()
        .with_service("web", ServiceState::Running)
        .with_service("db", ServiceState::Stopped)
        .with_package("web", &["runtime"])
        .with_package("runtime", &[])
}

// ----------------------------------------------------------------------------
// Manager Fixture
// ----------------------------------------------------------------------------

pub struct Fixture {
    pub bus: MemoryBus,
    pub manager: ServiceManager,
    pub config: ManagerConfig,
}

impl Fixture {
    pub async fn start(config: ManagerConfig) -> Self {
        Self::start_with(config, components(), MemoryLogStore::generated("core", 25)).await
    }

    pub async fn start_with(
        config: ManagerConfig,
        components: MockComponentManager,
        logs: MemoryLogStore,
    ) -> Self {
        let bus = MemoryBus::new();
        let (endpoint, inbound) = bus.endpoint(&config.manager_id);
        let manager = ServiceManagerBuilder::new()
            .with_config(config.clone())
            .with_bus(endpoint, inbound)
            .with_component_manager(Arc::new(components))
            .with_log_store(Arc::new(logs))
            .build_and_start()
            .await
            .expect("Failed to start manager");
        Self {
            bus,
            manager,
            config,
        }
    }

    pub fn client(&self, id: &str) -> ManagerClient {
        self.client_with_crypto(id, Arc::new(SealedBoxCrypto::new()))
    }

    pub fn client_with_crypto(&self, id: &str, crypto: Arc<dyn CryptoProvider>) -> ManagerClient {
        let (endpoint, inbound) = self.bus.endpoint(id);
        let client_config = ClientConfig {
            response_timeout_ms: 5_000,
            staging_root: self.config.transfer.staging_root.join("client"),
            ..ClientConfig::default()
        };
        ManagerClient::connect(
            endpoint,
            inbound,
            self.config.manager_id(),
            crypto,
            client_config,
        )
    }

    pub async fn logged_in_client(&self, id: &str) -> ManagerClient {
        let client = self.client(id);
        client
            .login(EVIDENCE, &svcmgr_runtime::CancelSignal::new())
            .await
            .expect("Login failed");
        client
    }

    pub fn raw(&self, id: &str) -> RawPeer {
        let (endpoint, inbound) = self.bus.endpoint(id);
        RawPeer {
            endpoint,
            inbound,
            manager: self.config.manager_id().endpoint(),
            config: self.config.clone(),
            session: SessionId::none(),
            crypto: SealedBoxCrypto::new(),
        }
    }

    /// Names left in the manager's staging root
    pub fn staging_entries(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.config.transfer.staging_root) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name != "client")
            .collect();
        names.sort();
        names
    }

    pub fn file_root(&self) -> PathBuf {
        self.config.transfer.file_root.clone()
    }

    pub fn scratch(&self, name: &str) -> PathBuf {
        let dir = self
            .config
            .transfer
            .staging_root
            .parent()
            .map(|p| p.join("scratch"))
            .unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }
}

// ----------------------------------------------------------------------------
// Crypto Doubles
// ----------------------------------------------------------------------------

/// Sealed-box crypto whose file hashes never match what the other side computed
#[derive(Debug, Default)]
pub struct SkewedHashCrypto {
    inner: SealedBoxCrypto,
}

impl CryptoProvider for SkewedHashCrypto {
    fn generate_key_pair(&self) -> KeyPair {
        self.inner.generate_key_pair()
    }

    fn encrypt_block(&self, recipient: &PublicKey, block: &[u8]) -> svcmgr_core::Result<Vec<u8>> {
        self.inner.encrypt_block(recipient, block)
    }

    fn decrypt_block(&self, key_pair: &KeyPair, block: &[u8]) -> svcmgr_core::Result<Vec<u8>> {
        self.inner.decrypt_block(key_pair, block)
    }

    fn max_block_size(&self) -> usize {
        self.inner.max_block_size()
    }

    fn hash_file(&self, algorithm: HashAlgorithm, path: &Path) -> svcmgr_core::Result<Vec<u8>> {
        let mut hash = self.inner.hash_file(algorithm, path)?;
        if let Some(first) = hash.first_mut() {
            *first ^= 0xff;
        }
        Ok(hash)
    }

    fn random_bytes(&self, len: usize) -> Vec<u8> {
        self.inner.random_bytes(len)
    }
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 253) as u8).collect()
}

// ----------------------------------------------------------------------------
// Raw Protocol Peer
// ----------------------------------------------------------------------------

/// Speaks the protocol envelope by envelope, for scenarios the client does not expose
pub struct RawPeer {
    endpoint: Arc<MemoryEndpoint>,
    inbound: InboundReceiver,
    manager: ClientId,
    config: ManagerConfig,
    pub session: SessionId,
    pub crypto: SealedBoxCrypto,
}

impl RawPeer {
    fn wire(&self) -> WireFormat {
        self.config.wire_format
    }

    pub fn request(&self, group_key: &GroupKey, data: RequestData) -> Request {
        Request::new(
            group_key.clone(),
            self.session.clone(),
            self.config.manager_id(),
            data,
        )
    }

    pub async fn send(&self, group_key: &GroupKey, data: RequestData) {
        let request = self.request(group_key, data);
        self.send_request(&request).await;
    }

    pub async fn send_request(&self, request: &Request) {
        let payload = self.wire().encode_request(request).unwrap();
        self.send_bytes(payload).await;
    }

    pub async fn send_bytes(&self, payload: Vec<u8>) {
        self.endpoint.send(&self.manager, payload).await.unwrap();
    }

    pub async fn recv(&mut self) -> Response {
        self.recv_within(Duration::from_secs(5))
            .await
            .expect("No response from manager")
    }

    pub async fn recv_within(&mut self, wait: Duration) -> Option<Response> {
        let message = tokio::time::timeout(wait, self.inbound.recv()).await.ok()??;
        Some(self.wire().decode_response(&message.payload).unwrap())
    }

    /// Run the login handshake and adopt the granted session
    pub async fn login(&mut self, evidence: &[u8]) -> SessionId {
        let group_key = GroupKey::generate();
        self.send(&group_key, RequestData::LoginRequest).await;
        let manager_key = match self.recv().await.data {
            ResponseData::LoginRequestResponse { public_key } => public_key,
            other => panic!("unexpected {:?}", other),
        };

        let key_pair = self.crypto.generate_key_pair();
        let credential = self.seal_credential(&manager_key, &key_pair, evidence);
        self.send(&group_key, RequestData::LoginCredential { credential })
            .await;
        let grant: SessionGrant = match self.recv().await.data {
            ResponseData::LoginResponse { grant } => grant.open_value(&self.crypto, &key_pair).unwrap(),
            other => panic!("unexpected {:?}", other),
        };
        assert!(grant.success);
        self.session = grant.session_id.clone();
        grant.session_id
    }

    pub fn seal_credential(
        &self,
        manager_key: &PublicKey,
        key_pair: &KeyPair,
        evidence: &[u8],
    ) -> TunnelPayload {
        let credential = Credential {
            public_key: key_pair.public_key(),
            evidence: evidence.to_vec(),
        };
        TunnelPayload::seal_value(&self.crypto, manager_key, &credential).unwrap()
    }
}
