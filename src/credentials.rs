// This file is part of Astarte.
//
// Copyright 2024 SECO Mind Srl
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Storage of the TLS client credentials issued by pairing.
//!
//! The store is an injected capability: the process wide credential storage of the platform is
//! mediated through it, the SDK only adds and deletes entries under its own roles. When a stored
//! certificate fails verification it is deleted and a fresh one is issued in its place.

use std::collections::HashMap;
use std::convert::Infallible;
use std::error::Error as StdError;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::RwLock;

/// Role of a stored credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialRole {
    /// The PEM client certificate returned by pairing.
    Certificate,
    /// The PEM private key the CSR was signed with.
    PrivateKey,
}

/// Storage for the PEM credentials of the device.
pub trait CredentialStore: Clone + Debug + Send + Sync + 'static
where
    Self::Err: StdError + Send + Sync + 'static,
{
    /// Reason for a failed operation.
    type Err;

    /// Stores a credential, replacing the previous one for the role.
    fn add(
        &self,
        role: CredentialRole,
        pem: &str,
    ) -> impl Future<Output = Result<(), Self::Err>> + Send;

    /// Retrieves a credential.
    fn get(
        &self,
        role: CredentialRole,
    ) -> impl Future<Output = Result<Option<String>, Self::Err>> + Send;

    /// Deletes a credential, a no-op when missing.
    fn delete(&self, role: CredentialRole) -> impl Future<Output = Result<(), Self::Err>> + Send;
}

/// Volatile credential store, a fresh certificate is requested at every boot.
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    entries: Arc<RwLock<HashMap<CredentialRole, String>>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    type Err = Infallible;

    async fn add(&self, role: CredentialRole, pem: &str) -> Result<(), Self::Err> {
        self.entries.write().await.insert(role, pem.to_string());

        Ok(())
    }

    async fn get(&self, role: CredentialRole) -> Result<Option<String>, Self::Err> {
        Ok(self.entries.read().await.get(&role).cloned())
    }

    async fn delete(&self, role: CredentialRole) -> Result<(), Self::Err> {
        self.entries.write().await.remove(&role);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_get_delete() {
        let store = MemoryCredentialStore::new();

        assert!(store.get(CredentialRole::Certificate).await.unwrap().is_none());

        store
            .add(CredentialRole::Certificate, "cert pem")
            .await
            .unwrap();
        store
            .add(CredentialRole::PrivateKey, "key pem")
            .await
            .unwrap();

        assert_eq!(
            store.get(CredentialRole::Certificate).await.unwrap().as_deref(),
            Some("cert pem")
        );
        assert_eq!(
            store.get(CredentialRole::PrivateKey).await.unwrap().as_deref(),
            Some("key pem")
        );

        store.delete(CredentialRole::Certificate).await.unwrap();
        assert!(store.get(CredentialRole::Certificate).await.unwrap().is_none());

        // Deleting a missing entry is fine.
        store.delete(CredentialRole::Certificate).await.unwrap();
    }
}
