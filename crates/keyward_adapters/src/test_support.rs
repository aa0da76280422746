use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use axum::Router;
use keyward_core::entities::{AccountId, AccountSecrets};
use keyward_core::ports::CredentialStore;
use keyward_core::Error;

/// Serve `app` on an ephemeral loopback port and return its base URL
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{}", addr)
}

/// Keyring stand-in
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<AccountId, AccountSecrets>>,
    fail_writes: AtomicBool,
}

impl MemoryCredentialStore {
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub fn get(&self, id: AccountId) -> Option<AccountSecrets> {
        self.entries.lock().unwrap().get(&id).cloned()
    }

    pub fn remove(&self, id: AccountId) {
        self.entries.lock().unwrap().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn store_secrets(&self, id: AccountId, secrets: &AccountSecrets) -> Result<(), Error> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::CredentialStorage("keyring locked".to_string()));
        }
        self.entries.lock().unwrap().insert(id, secrets.clone());
        Ok(())
    }

    async fn get_secrets(&self, id: AccountId) -> Result<Option<AccountSecrets>, Error> {
        Ok(self.get(id))
    }

    async fn delete_secrets(&self, id: AccountId) -> Result<(), Error> {
        self.remove(id);
        Ok(())
    }
}
