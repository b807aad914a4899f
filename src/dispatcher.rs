use std::sync::Arc;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use crate::connection::Connection;

/// The consumer of completed connections, i.e. the parcel decoding and scheduling layer.
///
/// This is called exactly once per connection. The connection may carry a protocol violation
///  instead of a payload, see `Connection::into_payload`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ParcelDispatcher: Send + Sync + 'static {
    async fn on_connection_complete(&self, connection: Connection);
}

/// Hands completed connections to a `ParcelDispatcher` on a separate task, so that dispatching
///  never happens on a poll call's stack.
pub struct DispatchLoop {
    handle: JoinHandle<()>,
}

impl Drop for DispatchLoop {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl DispatchLoop {
    pub fn spawn(completed: mpsc::UnboundedReceiver<Connection>, dispatcher: Arc<dyn ParcelDispatcher>) -> DispatchLoop {
        DispatchLoop {
            handle: tokio::spawn(Self::do_loop(completed, dispatcher)),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// runs until all senders are dropped
    async fn do_loop(mut completed: mpsc::UnboundedReceiver<Connection>, dispatcher: Arc<dyn ParcelDispatcher>) {
        while let Some(connection) = completed.recv().await {
            dispatcher.on_connection_complete(connection).await;
        }
        debug!("all receivers are gone - dispatch loop terminates");
    }
}
