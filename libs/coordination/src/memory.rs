//! A process-local coordination store.
//!
//! `MemoryStore` keeps a node tree behind one mutex and hands out
//! [`MemorySession`]s through [`Connector`]. It implements the full client
//! contract: sequential counters per parent, ephemeral nodes owned by their
//! session, and one-shot watches delivered on each session's event channel.
//! The last clone of a session dropping ends the session, which removes its
//! ephemeral nodes the way a crashed client's would be.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use config::SessionConfig;
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::client::{CoordinationClient, Connector, CreateMode, sequential_name};
use crate::error::{CoordinationError, CoordinationResult};
use crate::event::{self, EventSender, EventType, KeeperState, WatchEvents, WatchedEvent};
use crate::path;

/// Connect-string scheme served by this store.
pub const MEMORY_SCHEME: &str = "memory";

#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Tree>>,
}

#[derive(Debug)]
struct Tree {
    nodes: HashMap<String, Node>,
    sessions: HashMap<u64, SessionEntry>,
    /// one-shot watches: path -> sessions to notify on the next change
    watches: HashMap<String, HashSet<u64>>,
    next_session: u64,
    available: bool,
    data_reads: u64,
}

#[derive(Debug, Default)]
struct Node {
    data: Vec<u8>,
    owner: Option<u64>,
    children: BTreeSet<String>,
    next_seq: u64,
}

#[derive(Debug)]
struct SessionEntry {
    events: EventSender,
    ephemerals: BTreeSet<String>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(path::ROOT.to_owned(), Node::default());
        Self {
            inner: Arc::new(Mutex::new(Tree {
                nodes,
                sessions: HashMap::new(),
                watches: HashMap::new(),
                next_session: 1,
                available: true,
                data_reads: 0,
            })),
        }
    }

    /// When false, new connects fail with `Connection`. Live sessions are
    /// not affected.
    pub fn set_available(&self, available: bool) {
        self.inner.lock().available = available;
    }

    /// Forcibly end a session as the store would on timeout. Returns false
    /// if no such session is live.
    pub fn expire_session(&self, session_id: u64) -> bool {
        let mut tree = self.inner.lock();
        let live = tree.sessions.contains_key(&session_id);
        tree.close_session(session_id, KeeperState::Expired);
        live
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Number of nodes, not counting the tree root.
    pub fn node_count(&self) -> usize {
        self.inner.lock().nodes.len() - 1
    }

    /// Number of pending watches, counting each (path, session) pair once.
    pub fn watch_count(&self) -> usize {
        self.inner.lock().watches.values().map(HashSet::len).sum()
    }

    /// Number of `get_data` calls served so far, across all sessions.
    pub fn data_reads(&self) -> u64 {
        self.inner.lock().data_reads
    }

    /// Read a payload without a session, watch, or read accounting.
    pub fn peek(&self, path: &str) -> Option<Vec<u8>> {
        self.inner.lock().nodes.get(path).map(|node| node.data.clone())
    }

    /// Sorted child names of `path`, without a session.
    pub fn peek_children(&self, path: &str) -> Option<Vec<String>> {
        self.inner
            .lock()
            .nodes
            .get(path)
            .map(|node| node.children.iter().cloned().collect())
    }
}

impl Tree {
    fn check_session(&self, session_id: u64) -> CoordinationResult<()> {
        if self.sessions.contains_key(&session_id) {
            Ok(())
        } else {
            Err(CoordinationError::SessionClosed(format!(
                "session {session_id:#x} is closed"
            )))
        }
    }

    fn node(&self, path: &str) -> CoordinationResult<&Node> {
        self.nodes
            .get(path)
            .ok_or_else(|| CoordinationError::NoNode(path.to_owned()))
    }

    /// Notify and forget every watch registered on `path`.
    fn fire(&mut self, path: &str, kind: EventType) {
        let Some(watchers) = self.watches.remove(path) else {
            return;
        };
        for session_id in watchers {
            if let Some(session) = self.sessions.get(&session_id) {
                trace!(session_id, path, ?kind, "firing watch");
                // receiver gone means the session's event loop stopped
                let _ = session.events.send(WatchedEvent::node(kind, path));
            }
        }
    }

    fn watch(&mut self, session_id: u64, path: &str) {
        self.watches
            .entry(path.to_owned())
            .or_default()
            .insert(session_id);
    }

    fn unwatch(&mut self, session_id: u64, path: &str) -> bool {
        let Some(watchers) = self.watches.get_mut(path) else {
            return false;
        };
        let removed = watchers.remove(&session_id);
        if watchers.is_empty() {
            self.watches.remove(path);
        }
        removed
    }

    fn create(
        &mut self,
        session_id: u64,
        path: &str,
        mode: CreateMode,
        data: &[u8],
    ) -> CoordinationResult<String> {
        path::validate(path)?;
        let Some(parent_path) = path::parent(path) else {
            return Err(CoordinationError::NodeExists(path.to_owned()));
        };
        let parent = self
            .nodes
            .get_mut(parent_path)
            .ok_or_else(|| CoordinationError::NoNode(parent_path.to_owned()))?;
        if parent.owner.is_some() {
            return Err(CoordinationError::NoChildrenForEphemerals(
                parent_path.to_owned(),
            ));
        }

        let actual = if mode.is_sequential() {
            let seq = parent.next_seq;
            parent.next_seq += 1;
            path::join(parent_path, &sequential_name(path::name(path), seq))
        } else {
            path.to_owned()
        };
        let name = path::name(&actual).to_owned();
        if parent.children.contains(&name) {
            return Err(CoordinationError::NodeExists(actual));
        }
        parent.children.insert(name);

        let owner = mode.is_ephemeral().then_some(session_id);
        self.nodes.insert(
            actual.clone(),
            Node {
                data: data.to_vec(),
                owner,
                ..Node::default()
            },
        );
        if owner.is_some() {
            if let Some(session) = self.sessions.get_mut(&session_id) {
                session.ephemerals.insert(actual.clone());
            }
        }
        self.fire(&actual, EventType::NodeCreated);
        Ok(actual)
    }

    /// Unlink a single node and fire its deletion watches.
    fn remove(&mut self, path: &str) {
        let Some(node) = self.nodes.remove(path) else {
            return;
        };
        if let Some(parent) = path::parent(path).and_then(|p| self.nodes.get_mut(p)) {
            parent.children.remove(path::name(path));
        }
        if let Some(owner) = node.owner.and_then(|id| self.sessions.get_mut(&id)) {
            owner.ephemerals.remove(path);
        }
        self.fire(path, EventType::NodeDeleted);
    }

    fn delete(&mut self, path: &str) -> CoordinationResult<()> {
        path::validate(path)?;
        if path == path::ROOT {
            return Err(CoordinationError::BadPath("cannot delete the tree root".into()));
        }
        if !self.node(path)?.children.is_empty() {
            return Err(CoordinationError::NotEmpty(path.to_owned()));
        }
        self.remove(path);
        Ok(())
    }

    fn force_delete(&mut self, path: &str) -> CoordinationResult<()> {
        path::validate(path)?;
        if path == path::ROOT {
            return Err(CoordinationError::BadPath("cannot delete the tree root".into()));
        }
        if !self.nodes.contains_key(path) {
            return Ok(());
        }
        // depth first, children before their parent
        let mut order = Vec::new();
        let mut stack = vec![path.to_owned()];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.children.iter().map(|c| path::join(&current, c)));
            }
            order.push(current);
        }
        for node in order.iter().rev() {
            self.remove(node);
        }
        Ok(())
    }

    fn close_session(&mut self, session_id: u64, state: KeeperState) {
        let Some(session) = self.sessions.remove(&session_id) else {
            return;
        };
        for watchers in self.watches.values_mut() {
            watchers.remove(&session_id);
        }
        self.watches.retain(|_, watchers| !watchers.is_empty());
        for ephemeral in &session.ephemerals {
            self.remove(ephemeral);
        }
        let _ = session.events.send(WatchedEvent::session(state));
        info!(
            session_id,
            ?state,
            ephemerals = session.ephemerals.len(),
            "memory store session ended"
        );
    }
}

#[async_trait]
impl Connector for MemoryStore {
    type Client = MemorySession;

    async fn connect(
        &self,
        config: &SessionConfig,
    ) -> CoordinationResult<(MemorySession, WatchEvents)> {
        config
            .validate()
            .map_err(|e| CoordinationError::Connection(format!("invalid session config: {e}")))?;
        if config.scheme() != Some(MEMORY_SCHEME) {
            return Err(CoordinationError::Connection(format!(
                "unsupported connect string '{}', expected {MEMORY_SCHEME}://",
                config.connect_string
            )));
        }

        let (tx, rx) = event::channel();
        let session_id = {
            let mut tree = self.inner.lock();
            if !tree.available {
                return Err(CoordinationError::Connection(format!(
                    "store at '{}' is unavailable",
                    config.connect_string
                )));
            }
            let session_id = tree.next_session;
            tree.next_session += 1;
            let _ = tx.send(WatchedEvent::connected());
            tree.sessions.insert(
                session_id,
                SessionEntry {
                    events: tx,
                    ephemerals: BTreeSet::new(),
                },
            );
            session_id
        };

        info!(
            session_id,
            connect_string = %config.connect_string,
            session_timeout_ms = config.session_timeout.as_millis() as u64,
            "memory store session established"
        );
        Ok((
            MemorySession {
                handle: Arc::new(SessionHandle {
                    tree: Arc::clone(&self.inner),
                    id: session_id,
                }),
            },
            rx,
        ))
    }
}

/// One session on a [`MemoryStore`]. Clones share the session.
#[derive(Debug, Clone)]
pub struct MemorySession {
    handle: Arc<SessionHandle>,
}

#[derive(Debug)]
struct SessionHandle {
    tree: Arc<Mutex<Tree>>,
    id: u64,
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.tree.lock().close_session(self.id, KeeperState::Closed);
    }
}

impl MemorySession {
    fn with_tree<T>(
        &self,
        f: impl FnOnce(&mut Tree, u64) -> CoordinationResult<T>,
    ) -> CoordinationResult<T> {
        let mut tree = self.handle.tree.lock();
        tree.check_session(self.handle.id)?;
        f(&mut tree, self.handle.id)
    }
}

#[async_trait]
impl CoordinationClient for MemorySession {
    fn session_id(&self) -> u64 {
        self.handle.id
    }

    async fn create_node(
        &self,
        path: &str,
        mode: CreateMode,
        data: &[u8],
    ) -> CoordinationResult<String> {
        let created = self.with_tree(|tree, id| tree.create(id, path, mode, data))?;
        debug!(path = %created, ?mode, "node created");
        Ok(created)
    }

    async fn exists(&self, path: &str) -> CoordinationResult<bool> {
        path::validate(path)?;
        self.with_tree(|tree, _| Ok(tree.nodes.contains_key(path)))
    }

    async fn add_watch(&self, path: &str) -> CoordinationResult<bool> {
        path::validate(path)?;
        self.with_tree(|tree, id| {
            tree.watch(id, path);
            let exists = tree.nodes.contains_key(path);
            trace!(path, exists, "existence watch registered");
            Ok(exists)
        })
    }

    async fn remove_watch(&self, path: &str) -> CoordinationResult<()> {
        path::validate(path)?;
        self.with_tree(|tree, id| {
            let removed = tree.unwatch(id, path);
            trace!(path, removed, "watch removed");
            Ok(())
        })
    }

    async fn get_data(&self, path: &str, watch: bool) -> CoordinationResult<Vec<u8>> {
        path::validate(path)?;
        self.with_tree(|tree, id| {
            let data = tree.node(path)?.data.clone();
            tree.data_reads += 1;
            if watch {
                tree.watch(id, path);
            }
            Ok(data)
        })
    }

    async fn write(&self, path: &str, data: &[u8]) -> CoordinationResult<()> {
        path::validate(path)?;
        self.with_tree(|tree, _| {
            let node = tree
                .nodes
                .get_mut(path)
                .ok_or_else(|| CoordinationError::NoNode(path.to_owned()))?;
            node.data = data.to_vec();
            tree.fire(path, EventType::NodeDataChanged);
            Ok(())
        })?;
        debug!(path, bytes = data.len(), "node data written");
        Ok(())
    }

    async fn delete(&self, path: &str) -> CoordinationResult<()> {
        self.with_tree(|tree, _| tree.delete(path))?;
        debug!(path, "node deleted");
        Ok(())
    }

    async fn force_delete(&self, path: &str) -> CoordinationResult<()> {
        self.with_tree(|tree, _| tree.force_delete(path))?;
        debug!(path, "subtree deleted");
        Ok(())
    }

    async fn get_children(&self, root: &str) -> CoordinationResult<Vec<String>> {
        path::validate(root)?;
        self.with_tree(|tree, _| Ok(tree.node(root)?.children.iter().cloned().collect()))
    }

    async fn close(&self) -> CoordinationResult<()> {
        self.handle
            .tree
            .lock()
            .close_session(self.handle.id, KeeperState::Closed);
        Ok(())
    }
}
