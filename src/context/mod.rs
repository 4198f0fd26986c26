//! Execution context carried through transactional call chains.
//!
//! A [`Context`] is an immutable, cheaply clonable chain of nodes. Each
//! derivation (`with_value`, `with_cancel`, `with_deadline`) returns a new
//! context whose parent is the receiver, so values attached by an outer
//! call stay visible to every nested call while nested additions never
//! leak back out.
//!
//! ```text
//!   background ─► value(TransactionId) ─► value(group tx) ─► cancel
//!                                                   ▲
//!                                  lookups walk this way, newest first
//! ```

mod error;

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use error::ContextError;

/// Key under which a value is attached to a [`Context`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextKey(Cow<'static, str>);

impl ContextKey {
    /// Key from a static name.
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Key from an owned name, e.g. one namespaced by a database group.
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type AnyValue = Arc<dyn Any + Send + Sync>;

enum Node {
    Value { key: ContextKey, value: AnyValue },
    Cancel(Arc<AtomicBool>),
    Deadline(Instant),
}

struct Link {
    node: Node,
    parent: Context,
}

/// Immutable execution context.
///
/// The empty context ([`Context::background`]) carries nothing and never
/// expires.
#[derive(Clone, Default)]
pub struct Context {
    head: Option<Arc<Link>>,
}

impl Context {
    /// The empty root context.
    pub fn background() -> Self {
        Self::default()
    }

    /// True if nothing has ever been attached to this context.
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// True if `a` and `b` are the same context, not merely alike.
    pub fn ptr_eq(a: &Context, b: &Context) -> bool {
        match (&a.head, &b.head) {
            (Some(x), Some(y)) => Arc::ptr_eq(x, y),
            (None, None) => true,
            _ => false,
        }
    }

    fn derive(&self, node: Node) -> Self {
        Self {
            head: Some(Arc::new(Link {
                node,
                parent: self.clone(),
            })),
        }
    }

    /// Derive a context carrying `value` under `key`.
    ///
    /// A later binding of the same key shadows earlier ones.
    pub fn with_value<V>(&self, key: ContextKey, value: V) -> Self
    where
        V: Any + Send + Sync,
    {
        self.with_shared_value(key, Arc::new(value))
    }

    /// Like [`with_value`](Self::with_value) for a value that is already shared.
    pub fn with_shared_value<V>(&self, key: ContextKey, value: Arc<V>) -> Self
    where
        V: Any + Send + Sync,
    {
        self.derive(Node::Value { key, value })
    }

    /// Find the nearest value attached under `key` with type `V`.
    pub fn value<V>(&self, key: &ContextKey) -> Option<Arc<V>>
    where
        V: Any + Send + Sync,
    {
        self.links().find_map(|link| match &link.node {
            Node::Value { key: k, value } if k == key => value.clone().downcast::<V>().ok(),
            _ => None,
        })
    }

    /// Derive a context that can be cancelled through the returned handle.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let flag = Arc::new(AtomicBool::new(false));
        let ctx = self.derive(Node::Cancel(flag.clone()));
        (ctx, CancelHandle { flag })
    }

    /// Derive a context that expires at `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        self.derive(Node::Deadline(deadline))
    }

    /// Derive a context that expires after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// The earliest deadline anywhere in the chain.
    pub fn deadline(&self) -> Option<Instant> {
        self.links()
            .filter_map(|link| match link.node {
                Node::Deadline(at) => Some(at),
                _ => None,
            })
            .min()
    }

    /// Report whether the context has been cancelled or has expired.
    pub fn err(&self) -> Option<ContextError> {
        let now = Instant::now();
        for link in self.links() {
            match &link.node {
                Node::Cancel(flag) if flag.load(Ordering::Acquire) => {
                    return Some(ContextError::Cancelled);
                }
                Node::Deadline(at) if *at <= now => return Some(ContextError::DeadlineExceeded),
                _ => {}
            }
        }
        None
    }

    /// `Err` if the context is done, `Ok` otherwise.
    pub fn check(&self) -> Result<(), ContextError> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn links(&self) -> impl Iterator<Item = &Link> {
        std::iter::successors(self.head.as_deref(), |link| link.parent.head.as_deref())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&str> = self
            .links()
            .filter_map(|link| match &link.node {
                Node::Value { key, .. } => Some(key.as_str()),
                _ => None,
            })
            .collect();
        f.debug_struct("Context")
            .field("keys", &keys)
            .field("done", &self.err())
            .finish()
    }
}

/// Cancels the context it was created with, and every context derived from it.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
