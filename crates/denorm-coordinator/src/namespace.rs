//! Coordination namespace — a hierarchical key space shared with workers.
//!
//! Paths look like filesystem paths (`/rules/orders_customers/denormalizer`).
//! Every node may carry data and children. Ephemeral nodes belong to a
//! session and disappear when that session is closed; they cannot have
//! children.
//!
//! [`NamespaceStore`] keeps the tree in redb: one table maps a path to its
//! data, a second maps ephemeral paths to their owning session. Sessions do
//! not survive a restart, so ephemeral nodes are purged on open.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use thiserror::Error;
use tracing::debug;

/// Path → node data.
const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Ephemeral path → owning session.
const EPHEMERAL: TableDefinition<&str, u64> = TableDefinition::new("ephemeral");

pub type SessionId = u64;

/// Result type alias for namespace operations.
pub type NamespaceResult<T> = Result<T, NamespaceError>;

#[derive(Debug, Error)]
pub enum NamespaceError {
    #[error("no node at {0}")]
    NoNode(String),

    #[error("node already exists at {0}")]
    NodeExists(String),

    #[error("node {0} has children")]
    NotEmpty(String),

    #[error("ephemeral node {0} cannot have children")]
    NoChildrenForEphemerals(String),

    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("namespace backend error: {0}")]
    Backend(String),

    #[error("{op} on {path} timed out after {after:?}")]
    Timeout {
        op: &'static str,
        path: String,
        after: Duration,
    },
}

/// Lifetime of a created node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    /// Removed when the owning session closes.
    Ephemeral(SessionId),
}

/// Operations the coordinator and the workers perform on the namespace.
#[async_trait]
pub trait CoordinationNamespace: Send + Sync {
    /// Names of the direct children of `path`, sorted.
    async fn children(&self, path: &str) -> NamespaceResult<Vec<String>>;

    /// Create a node, creating missing parents as empty persistent nodes.
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> NamespaceResult<()>;

    async fn get_data(&self, path: &str) -> NamespaceResult<Vec<u8>>;

    /// Delete a childless node.
    async fn delete(&self, path: &str) -> NamespaceResult<()>;

    /// Drop every ephemeral node owned by `session`. Returns how many.
    async fn close_session(&self, session: SessionId) -> NamespaceResult<usize>;
}

/// Join path segments with single slashes, e.g.
/// `make_path("/rules", &["orders", "denormalizer"])`.
pub fn make_path(parent: &str, segments: &[&str]) -> String {
    let mut path = String::from("/");
    for part in std::iter::once(parent).chain(segments.iter().copied()) {
        let part = part.trim_matches('/');
        if part.is_empty() {
            continue;
        }
        if !path.ends_with('/') {
            path.push('/');
        }
        path.push_str(part);
    }
    path
}

fn validate(path: &str) -> NamespaceResult<()> {
    let invalid = |reason| NamespaceError::InvalidPath {
        path: path.to_string(),
        reason,
    };
    if !path.starts_with('/') {
        return Err(invalid("must start with '/'"));
    }
    if path == "/" {
        return Ok(());
    }
    if path.ends_with('/') {
        return Err(invalid("must not end with '/'"));
    }
    if path[1..].split('/').any(str::is_empty) {
        return Err(invalid("empty path segment"));
    }
    Ok(())
}

fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(i) => Some(&path[..i]),
        None => None,
    }
}

fn child_prefix(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{path}/")
    }
}

macro_rules! backend {
    () => {
        |e| NamespaceError::Backend(e.to_string())
    };
}

/// redb-backed [`CoordinationNamespace`].
#[derive(Clone)]
pub struct NamespaceStore {
    db: Arc<Database>,
    next_session: Arc<AtomicU64>,
}

impl NamespaceStore {
    pub fn open(path: &Path) -> NamespaceResult<Self> {
        let db = Database::create(path).map_err(backend!())?;
        let store = Self::with_db(db)?;
        let purged = store.purge_ephemerals()?;
        debug!(?path, purged, "namespace store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> NamespaceResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(backend!())?;
        Self::with_db(db)
    }

    fn with_db(db: Database) -> NamespaceResult<Self> {
        let txn = db.begin_write().map_err(backend!())?;
        txn.open_table(NODES).map_err(backend!())?;
        txn.open_table(EPHEMERAL).map_err(backend!())?;
        txn.commit().map_err(backend!())?;
        Ok(Self {
            db: Arc::new(db),
            next_session: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Allocate a session id for ephemeral nodes.
    pub fn new_session(&self) -> SessionId {
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }

    fn purge_ephemerals(&self) -> NamespaceResult<usize> {
        let txn = self.db.begin_write().map_err(backend!())?;
        let count = {
            let mut owners = txn.open_table(EPHEMERAL).map_err(backend!())?;
            let mut nodes = txn.open_table(NODES).map_err(backend!())?;
            let paths: Vec<String> = owners
                .iter()
                .map_err(backend!())?
                .map(|entry| entry.map(|(k, _)| k.value().to_string()))
                .collect::<Result<_, _>>()
                .map_err(backend!())?;
            for path in &paths {
                owners.remove(path.as_str()).map_err(backend!())?;
                nodes.remove(path.as_str()).map_err(backend!())?;
            }
            paths.len()
        };
        txn.commit().map_err(backend!())?;
        Ok(count)
    }

    fn children_sync(&self, path: &str) -> NamespaceResult<Vec<String>> {
        validate(path)?;
        let txn = self.db.begin_read().map_err(backend!())?;
        let nodes = txn.open_table(NODES).map_err(backend!())?;
        if path != "/" && nodes.get(path).map_err(backend!())?.is_none() {
            return Err(NamespaceError::NoNode(path.to_string()));
        }

        let prefix = child_prefix(path);
        let mut children = Vec::new();
        for entry in nodes.range(prefix.as_str()..).map_err(backend!())? {
            let (key, _) = entry.map_err(backend!())?;
            let Some(rest) = key.value().strip_prefix(prefix.as_str()) else {
                break;
            };
            if !rest.is_empty() && !rest.contains('/') {
                children.push(rest.to_string());
            }
        }
        Ok(children)
    }

    fn create_sync(&self, path: &str, data: &[u8], mode: CreateMode) -> NamespaceResult<()> {
        validate(path)?;
        if path == "/" {
            return Err(NamespaceError::NodeExists(path.to_string()));
        }

        let txn = self.db.begin_write().map_err(backend!())?;
        {
            let mut nodes = txn.open_table(NODES).map_err(backend!())?;
            let mut owners = txn.open_table(EPHEMERAL).map_err(backend!())?;

            if nodes.get(path).map_err(backend!())?.is_some() {
                return Err(NamespaceError::NodeExists(path.to_string()));
            }

            // Walk up to the first existing ancestor, then create downward.
            let mut missing = Vec::new();
            let mut cursor = parent_of(path);
            while let Some(parent) = cursor {
                if parent == "/" {
                    break;
                }
                if nodes.get(parent).map_err(backend!())?.is_some() {
                    if owners.get(parent).map_err(backend!())?.is_some() {
                        return Err(NamespaceError::NoChildrenForEphemerals(parent.to_string()));
                    }
                    break;
                }
                missing.push(parent.to_string());
                cursor = parent_of(parent);
            }
            let empty: &[u8] = &[];
            for parent in missing.iter().rev() {
                nodes.insert(parent.as_str(), empty).map_err(backend!())?;
            }

            nodes.insert(path, data).map_err(backend!())?;
            if let CreateMode::Ephemeral(session) = mode {
                owners.insert(path, session).map_err(backend!())?;
            }
        }
        txn.commit().map_err(backend!())?;
        debug!(%path, ?mode, bytes = data.len(), "namespace node created");
        Ok(())
    }

    fn get_data_sync(&self, path: &str) -> NamespaceResult<Vec<u8>> {
        validate(path)?;
        let txn = self.db.begin_read().map_err(backend!())?;
        let nodes = txn.open_table(NODES).map_err(backend!())?;
        match nodes.get(path).map_err(backend!())? {
            Some(guard) => Ok(guard.value().to_vec()),
            None if path == "/" => Ok(Vec::new()),
            None => Err(NamespaceError::NoNode(path.to_string())),
        }
    }

    fn delete_sync(&self, path: &str) -> NamespaceResult<()> {
        validate(path)?;
        if !self.children_sync(path)?.is_empty() {
            return Err(NamespaceError::NotEmpty(path.to_string()));
        }
        let txn = self.db.begin_write().map_err(backend!())?;
        {
            let mut nodes = txn.open_table(NODES).map_err(backend!())?;
            let mut owners = txn.open_table(EPHEMERAL).map_err(backend!())?;
            if nodes.remove(path).map_err(backend!())?.is_none() {
                return Err(NamespaceError::NoNode(path.to_string()));
            }
            owners.remove(path).map_err(backend!())?;
        }
        txn.commit().map_err(backend!())?;
        debug!(%path, "namespace node deleted");
        Ok(())
    }

    fn close_session_sync(&self, session: SessionId) -> NamespaceResult<usize> {
        let txn = self.db.begin_write().map_err(backend!())?;
        let count = {
            let mut owners = txn.open_table(EPHEMERAL).map_err(backend!())?;
            let mut nodes = txn.open_table(NODES).map_err(backend!())?;
            let mut owned = Vec::new();
            for entry in owners.iter().map_err(backend!())? {
                let (key, owner) = entry.map_err(backend!())?;
                if owner.value() == session {
                    owned.push(key.value().to_string());
                }
            }
            for path in &owned {
                owners.remove(path.as_str()).map_err(backend!())?;
                nodes.remove(path.as_str()).map_err(backend!())?;
            }
            owned.len()
        };
        txn.commit().map_err(backend!())?;
        debug!(session, removed = count, "namespace session closed");
        Ok(count)
    }
}

#[async_trait]
impl CoordinationNamespace for NamespaceStore {
    async fn children(&self, path: &str) -> NamespaceResult<Vec<String>> {
        self.children_sync(path)
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> NamespaceResult<()> {
        self.create_sync(path, data, mode)
    }

    async fn get_data(&self, path: &str) -> NamespaceResult<Vec<u8>> {
        self.get_data_sync(path)
    }

    async fn delete(&self, path: &str) -> NamespaceResult<()> {
        self.delete_sync(path)
    }

    async fn close_session(&self, session: SessionId) -> NamespaceResult<usize> {
        self.close_session_sync(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns() -> NamespaceStore {
        NamespaceStore::open_in_memory().unwrap()
    }

    // ── Paths ──────────────────────────────────────────────────────

    #[test]
    fn make_path_joins_segments() {
        assert_eq!(
            make_path("/rules", &["orders_customers", "denormalizer"]),
            "/rules/orders_customers/denormalizer"
        );
        assert_eq!(make_path("/bootstrapper/", &["job-1"]), "/bootstrapper/job-1");
        assert_eq!(make_path("/", &["a"]), "/a");
        assert_eq!(make_path("/", &[]), "/");
    }

    #[test]
    fn parent_of_walks_up() {
        assert_eq!(parent_of("/a/b/c"), Some("/a/b"));
        assert_eq!(parent_of("/a"), Some("/"));
        assert_eq!(parent_of("/"), None);
    }

    #[tokio::test]
    async fn invalid_paths_are_rejected() {
        let ns = ns();
        for bad in ["relative", "/trailing/", "/double//slash", ""] {
            let err = ns.create(bad, b"", CreateMode::Persistent).await.unwrap_err();
            assert!(matches!(err, NamespaceError::InvalidPath { .. }), "{bad}");
        }
    }

    // ── Create and read ────────────────────────────────────────────

    #[tokio::test]
    async fn create_and_get_data() {
        let ns = ns();
        ns.create("/jobs", b"payload", CreateMode::Persistent).await.unwrap();
        assert_eq!(ns.get_data("/jobs").await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn create_makes_missing_parents() {
        let ns = ns();
        ns.create("/bootstrapper/job-1", b"{}", CreateMode::Persistent)
            .await
            .unwrap();

        assert_eq!(ns.get_data("/bootstrapper").await.unwrap(), b"");
        assert_eq!(ns.children("/").await.unwrap(), vec!["bootstrapper"]);
        assert_eq!(ns.children("/bootstrapper").await.unwrap(), vec!["job-1"]);
    }

    #[tokio::test]
    async fn create_existing_fails() {
        let ns = ns();
        ns.create("/a", b"1", CreateMode::Persistent).await.unwrap();
        let err = ns.create("/a", b"2", CreateMode::Persistent).await.unwrap_err();
        assert!(matches!(err, NamespaceError::NodeExists(p) if p == "/a"));
        assert_eq!(ns.get_data("/a").await.unwrap(), b"1");
    }

    #[tokio::test]
    async fn children_are_direct_and_sorted() {
        let ns = ns();
        ns.create("/r/t/denormalizer/2", b"", CreateMode::Persistent).await.unwrap();
        ns.create("/r/t/denormalizer/0", b"", CreateMode::Persistent).await.unwrap();
        ns.create("/r/t/denormalizer/1/deep", b"", CreateMode::Persistent).await.unwrap();
        ns.create("/r/t2", b"", CreateMode::Persistent).await.unwrap();

        assert_eq!(
            ns.children("/r/t/denormalizer").await.unwrap(),
            vec!["0", "1", "2"]
        );
        // "/r/t2" shares a string prefix with "/r/t" but is not its child.
        assert_eq!(ns.children("/r/t").await.unwrap(), vec!["denormalizer"]);
        assert_eq!(ns.children("/r").await.unwrap(), vec!["t", "t2"]);
    }

    #[tokio::test]
    async fn missing_paths_are_no_node() {
        let ns = ns();
        assert!(matches!(ns.children("/nope").await, Err(NamespaceError::NoNode(_))));
        assert!(matches!(ns.get_data("/nope").await, Err(NamespaceError::NoNode(_))));
        assert!(matches!(ns.delete("/nope").await, Err(NamespaceError::NoNode(_))));
        assert!(ns.children("/").await.unwrap().is_empty());
    }

    // ── Delete ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn delete_requires_no_children() {
        let ns = ns();
        ns.create("/a/b", b"", CreateMode::Persistent).await.unwrap();

        assert!(matches!(ns.delete("/a").await, Err(NamespaceError::NotEmpty(_))));
        ns.delete("/a/b").await.unwrap();
        ns.delete("/a").await.unwrap();
        assert!(ns.children("/").await.unwrap().is_empty());
    }

    // ── Ephemeral nodes ────────────────────────────────────────────

    #[tokio::test]
    async fn closing_session_removes_its_ephemerals() {
        let ns = ns();
        let worker_a = ns.new_session();
        let worker_b = ns.new_session();
        assert_ne!(worker_a, worker_b);

        ns.create("/acks/0", b"", CreateMode::Ephemeral(worker_a)).await.unwrap();
        ns.create("/acks/1", b"", CreateMode::Ephemeral(worker_a)).await.unwrap();
        ns.create("/acks/2", b"", CreateMode::Ephemeral(worker_b)).await.unwrap();

        assert_eq!(ns.close_session(worker_a).await.unwrap(), 2);
        assert_eq!(ns.children("/acks").await.unwrap(), vec!["2"]);
        // The persistent parent stays.
        assert_eq!(ns.close_session(worker_a).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn ephemerals_cannot_have_children() {
        let ns = ns();
        let session = ns.new_session();
        ns.create("/e", b"", CreateMode::Ephemeral(session)).await.unwrap();

        let err = ns.create("/e/child", b"", CreateMode::Persistent).await.unwrap_err();
        assert!(matches!(err, NamespaceError::NoChildrenForEphemerals(p) if p == "/e"));
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[tokio::test]
    async fn reopen_keeps_persistent_and_drops_ephemeral() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ns.redb");

        {
            let ns = NamespaceStore::open(&path).unwrap();
            let session = ns.new_session();
            ns.create("/keep", b"1", CreateMode::Persistent).await.unwrap();
            ns.create("/keep/gone", b"", CreateMode::Ephemeral(session)).await.unwrap();
        }

        let ns = NamespaceStore::open(&path).unwrap();
        assert_eq!(ns.get_data("/keep").await.unwrap(), b"1");
        assert!(ns.children("/keep").await.unwrap().is_empty());
    }
}
