use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;
use crate::background::spawn_poll_worker;
use crate::config::ReceiverConfig;
use crate::dispatcher::{DispatchLoop, ParcelDispatcher};
use crate::receiver::Receiver;
use crate::transport::Transport;

/// ReceiverEndpoint is where the receive side comes together: a started receiver on a transport,
///  a dispatch loop handing completed connections to the dispatcher, and poll workers driving
///  the receiver.
///
/// This must be created inside a tokio runtime. Dropping it aborts all its tasks without
///  stopping the receiver.
pub struct ReceiverEndpoint {
    receiver: Arc<Receiver>,
    poll_workers: Vec<JoinHandle<()>>,
    _dispatch_loop: DispatchLoop,
}

impl Drop for ReceiverEndpoint {
    fn drop(&mut self) {
        for worker in &self.poll_workers {
            worker.abort();
        }
    }
}

impl ReceiverEndpoint {
    pub async fn new(
        config: Arc<ReceiverConfig>,
        transport: Arc<dyn Transport>,
        dispatcher: Arc<dyn ParcelDispatcher>,
    ) -> anyhow::Result<ReceiverEndpoint> {
        config.validate()?;

        let (completed_send, completed_recv) = mpsc::unbounded_channel();
        let dispatch_loop = DispatchLoop::spawn(completed_recv, dispatcher);

        let receiver = Arc::new(Receiver::new(config.clone(), transport, completed_send));
        receiver.start()?;

        let poll_workers = (0..config.num_poll_workers)
            .map(|_| spawn_poll_worker(receiver.clone(), config.clone()))
            .collect();
        info!("receiver endpoint is up with {} poll worker(s)", config.num_poll_workers);

        Ok(ReceiverEndpoint {
            receiver,
            poll_workers,
            _dispatch_loop: dispatch_loop,
        })
    }

    pub fn receiver(&self) -> &Arc<Receiver> {
        &self.receiver
    }

    /// Stops polling and then the receiver, returning the number of abandoned connections.
    ///
    /// NB: Completed connections that were not dispatched yet are dropped with the dispatch loop
    pub async fn shutdown(mut self) -> usize {
        for worker in self.poll_workers.drain(..) {
            worker.abort();
            let _ = worker.await;
        }
        self.receiver.stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::header::Header;
    use crate::loopback::LoopbackTransport;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::sync::Mutex;

    struct CollectingDispatcher {
        payloads: Mutex<Vec<(Header, Vec<u8>)>>,
    }
    impl CollectingDispatcher {
        fn new() -> CollectingDispatcher {
            CollectingDispatcher {
                payloads: Default::default(),
            }
        }

        async fn wait_for(&self, num_payloads: usize) -> Vec<(Header, Vec<u8>)> {
            loop {
                {
                    let payloads = self.payloads.lock().await;
                    if payloads.len() >= num_payloads {
                        return payloads.clone();
                    }
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }
    }
    #[async_trait]
    impl ParcelDispatcher for CollectingDispatcher {
        async fn on_connection_complete(&self, connection: Connection) {
            let header = *connection.header();
            let payload = connection.into_payload().unwrap();
            self.payloads.lock().await.push((header, payload.to_vec()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end() {
        let transport = Arc::new(LoopbackTransport::new(0, 1, 100));
        let dispatcher = Arc::new(CollectingDispatcher::new());

        let endpoint = ReceiverEndpoint::new(
            Arc::new(ReceiverConfig::default_config()),
            transport.clone(),
            dispatcher.clone(),
        ).await.unwrap();
        assert!(endpoint.receiver().is_started());

        for tag in 1..=3u32 {
            let payload = vec![tag as u8; 250];
            let header = Header::new(0, tag, payload.len() as u64);
            while !transport.put(&header, Bytes::from(payload.clone())).unwrap() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }

        let payloads = tokio::time::timeout(Duration::from_secs(10), dispatcher.wait_for(3)).await.unwrap();
        let mut tags = payloads.iter()
            .map(|(header, _)| header.tag)
            .collect::<Vec<_>>();
        tags.sort();
        assert_eq!(tags, vec![1, 2, 3]);
        for (header, payload) in payloads {
            assert_eq!(payload, vec![header.tag as u8; 250]);
        }

        assert_eq!(endpoint.shutdown().await, 0);
        assert!(transport.segment().is_none());
    }

    #[tokio::test]
    async fn test_invalid_config() {
        let mut config = ReceiverConfig::default_config();
        config.num_poll_workers = 0;

        let transport = Arc::new(LoopbackTransport::new(0, 1, 100));
        let result = ReceiverEndpoint::new(Arc::new(config), transport.clone(), Arc::new(CollectingDispatcher::new())).await;
        assert!(result.is_err());
        assert!(transport.segment().is_none());
    }
}
