use appencryption::{
    envelope::EnvelopeKeyRecord,
    kms::StaticKeyManagementService,
    policy::CryptoPolicy,
    session::{Session, SessionFactory},
    Error, Metastore, Result,
};
use async_trait::async_trait;
use securememory::protected_memory::DefaultSecretFactory;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Example demonstrating how to implement a custom Metastore for the library.
///
/// This example shows:
/// 1. How to create a custom Metastore implementation
/// 2. How to integrate the custom Metastore with a session factory
/// 3. Basic encrypt/decrypt operations using the custom Metastore
///
/// A production metastore backed by an external store (a KV store, an RDBMS, ...)
/// is built the same way: satisfy the `Metastore` trait and hand it to the factory.

/// A simple in-memory Metastore that also tracks a TTL per record, to
/// illustrate the kind of thing a real backing store might add.
#[derive(Debug)]
struct TtlMetastore {
    store: RwLock<HashMap<(String, i64), (EnvelopeKeyRecord, Option<i64>)>>,
}

impl TtlMetastore {
    fn new() -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
        }
    }

    /// Sets a TTL (seconds from now) on an existing record.
    fn expire(&self, id: &str, created: i64, ttl_seconds: i64) -> Result<bool> {
        let mut store = self
            .store
            .write()
            .map_err(|e| Error::MetastoreException(format!("lock poisoned: {e}")))?;

        let now = chrono::Utc::now().timestamp();
        if let Some(entry) = store.get_mut(&(id.to_string(), created)) {
            entry.1 = Some(now + ttl_seconds);
            return Ok(true);
        }
        Ok(false)
    }

    fn is_expired(expire_at: Option<i64>) -> bool {
        expire_at.is_some_and(|at| chrono::Utc::now().timestamp() >= at)
    }
}

#[async_trait]
impl Metastore for TtlMetastore {
    async fn load(&self, id: &str, created: i64) -> Result<Option<EnvelopeKeyRecord>> {
        let store = self
            .store
            .read()
            .map_err(|e| Error::MetastoreException(format!("lock poisoned: {e}")))?;

        Ok(store
            .get(&(id.to_string(), created))
            .filter(|(_, expire_at)| !Self::is_expired(*expire_at))
            .map(|(record, _)| record.clone()))
    }

    async fn load_latest(&self, id: &str) -> Result<Option<EnvelopeKeyRecord>> {
        let store = self
            .store
            .read()
            .map_err(|e| Error::MetastoreException(format!("lock poisoned: {e}")))?;

        Ok(store
            .iter()
            .filter(|((key_id, _), (_, expire_at))| key_id == id && !Self::is_expired(*expire_at))
            .max_by_key(|((_, created), _)| *created)
            .map(|(_, (record, _))| record.clone()))
    }

    async fn store(&self, id: &str, created: i64, envelope: &EnvelopeKeyRecord) -> Result<bool> {
        let mut store = self
            .store
            .write()
            .map_err(|e| Error::MetastoreException(format!("lock poisoned: {e}")))?;

        let key = (id.to_string(), created);
        if store.contains_key(&key) {
            return Ok(false);
        }
        store.insert(key, (envelope.clone(), None));
        Ok(true)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Custom Metastore Example");
    println!("=======================");

    let metastore = Arc::new(TtlMetastore::new());

    let policy = CryptoPolicy::new()
        .with_expire_after(std::time::Duration::from_secs(24 * 60 * 60))
        .with_session_cache()
        .with_session_cache_duration(std::time::Duration::from_secs(2 * 60 * 60))
        .with_create_date_precision(std::time::Duration::from_secs(60));

    let master_key = vec![0_u8; 32]; // In a real app, use a securely generated key
    let kms = Arc::new(StaticKeyManagementService::new(master_key));
    let secret_factory = Arc::new(DefaultSecretFactory::new());

    let factory = Arc::new(SessionFactory::new(
        "service",
        "product",
        policy,
        kms,
        metastore.clone(),
        secret_factory,
        vec![],
    ));

    let alice_session = factory.session("alice").await?;
    let bob_session = factory.session("bob").await?;

    let alice_data = b"Alice's secret data".to_vec();
    let alice_encrypted = alice_session.encrypt(&alice_data).await?;
    println!(
        "Encrypted Alice's data: {} bytes",
        alice_encrypted.data.len()
    );

    let bob_data = b"Bob's confidential information".to_vec();
    let bob_encrypted = bob_session.encrypt(&bob_data).await?;
    println!("Encrypted Bob's data: {} bytes", bob_encrypted.data.len());

    let alice_decrypted = alice_session.decrypt(&alice_encrypted).await?;
    let bob_decrypted = bob_session.decrypt(&bob_encrypted).await?;

    println!(
        "Alice's decrypted data: {}",
        String::from_utf8_lossy(&alice_decrypted)
    );
    println!(
        "Bob's decrypted data: {}",
        String::from_utf8_lossy(&bob_decrypted)
    );

    // Demonstrate the TTL feature our custom metastore adds on top of `Metastore`.
    let system_key_id = "_SK_service_product".to_string();
    let some_key_created = {
        let store = metastore
            .store
            .read()
            .map_err(|e| format!("failed to acquire read lock: {e}"))?;
        store
            .keys()
            .find(|(id, _)| id == &system_key_id)
            .map(|(_, created)| *created)
    };

    if let Some(created) = some_key_created {
        println!("Setting a TTL of 60 seconds on the system key...");
        metastore
            .expire(&system_key_id, created, 60)
            .map_err(|e| format!("failed to set TTL: {e}"))?;
    }

    alice_session.close().await?;
    bob_session.close().await?;

    println!("Sessions closed. All operations successful!");

    Ok(())
}
