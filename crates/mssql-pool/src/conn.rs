//! The contract pooled connections implement.

use async_trait::async_trait;

/// A connection the pool can manage.
///
/// The attach layer implements this for its TDS connection; tests use
/// lightweight fakes.
#[async_trait]
pub trait ManagedConnection: Send + 'static {
    /// Whether the underlying transport is open and the connection idle.
    ///
    /// A connection handed back in any other state is closed by the pool
    /// rather than reused.
    fn is_reusable(&self) -> bool;

    /// Cheap liveness check without server I/O (socket-level).
    fn is_open(&self) -> bool;

    /// Server round trip (empty batch ping). Returns false when the
    /// connection should be discarded.
    async fn ping(&mut self) -> bool;

    /// Called before the connection re-enters the idle queue. The TDS
    /// implementation sets the pending-reset flag here so the next request
    /// carries RESET_CONNECTION.
    fn prepare_for_reuse(&mut self);

    /// Close the connection. Must be idempotent and non-blocking; dropping
    /// the socket is enough.
    fn close(&mut self);
}
