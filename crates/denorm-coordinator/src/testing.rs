//! Fault-injecting collaborators for unit tests.

use async_trait::async_trait;

use crate::namespace::{
    CoordinationNamespace, CreateMode, NamespaceError, NamespaceResult, NamespaceStore, SessionId,
};

/// Namespace that fails or hangs on chosen paths.
pub(crate) struct FaultyNamespace {
    pub inner: NamespaceStore,
    pub broken_path: Option<String>,
    pub hang_path: Option<String>,
    pub fail_create: bool,
}

impl FaultyNamespace {
    pub fn new(inner: NamespaceStore) -> Self {
        Self {
            inner,
            broken_path: None,
            hang_path: None,
            fail_create: false,
        }
    }
}

#[async_trait]
impl CoordinationNamespace for FaultyNamespace {
    async fn children(&self, path: &str) -> NamespaceResult<Vec<String>> {
        if self.broken_path.as_deref() == Some(path) {
            return Err(NamespaceError::Backend("connection loss".to_string()));
        }
        if self.hang_path.as_deref() == Some(path) {
            std::future::pending::<()>().await;
        }
        self.inner.children(path).await
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> NamespaceResult<()> {
        if self.fail_create {
            return Err(NamespaceError::Backend("read-only".to_string()));
        }
        self.inner.create(path, data, mode).await
    }

    async fn get_data(&self, path: &str) -> NamespaceResult<Vec<u8>> {
        self.inner.get_data(path).await
    }

    async fn delete(&self, path: &str) -> NamespaceResult<()> {
        self.inner.delete(path).await
    }

    async fn close_session(&self, session: SessionId) -> NamespaceResult<usize> {
        self.inner.close_session(session).await
    }
}
