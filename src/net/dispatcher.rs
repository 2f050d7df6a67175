//! Command dispatch with asynchronous result delivery
//!
//! `CommandDispatcher` is the seam between callers (the CLI, a UI) and
//! the link: it accepts an opaque command line from any task, runs the
//! exchange on a worker, and hands the outcome to the caller's
//! continuation on the delivery context. Exactly one attempt per call;
//! callers wanting retries re-invoke.

use jiff::Zoned;
use tracing::debug;
use uuid::Uuid;

use crate::net::{Delivery, DeviceLink, ExchangeResult};

/// One in-flight command: the line, an id for log correlation, and
/// when it was submitted.
struct PendingRequest {
    id: Uuid,
    line: String,
    submitted_at: Zoned,
}

impl PendingRequest {
    fn new(line: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            line,
            submitted_at: Zoned::now(),
        }
    }
}

/// Routes command lines through the link, one attempt per call.
#[derive(Clone)]
pub struct CommandDispatcher {
    link: DeviceLink,
    delivery: Delivery,
}

impl CommandDispatcher {
    pub fn new(link: DeviceLink, delivery: Delivery) -> Self {
        Self { link, delivery }
    }

    /// Send a line and deliver the outcome to `continuation` on the
    /// delivery context. Callable from any task or thread. When the
    /// link is offline the exchange is skipped entirely and the
    /// continuation sees [`ExchangeResult::NotConnected`].
    pub fn send_and_receive<F>(&self, line: impl Into<String>, continuation: F)
    where
        F: FnOnce(ExchangeResult) + Send + 'static,
    {
        let link = self.link.clone();
        let delivery = self.delivery.clone();
        let request = PendingRequest::new(line.into());

        tokio::spawn(async move {
            debug!(
                id = %request.id,
                submitted_at = %request.submitted_at,
                line = %request.line.trim_end(),
                "dispatching command"
            );

            let outcome = if link.is_connected() {
                link.exchange(&request.line).await
            } else {
                ExchangeResult::NotConnected
            };

            debug!(id = %request.id, ?outcome, "command finished");
            delivery.post(move || continuation(outcome));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{Endpoint, LinkConfig};
    use crate::protocol;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    fn test_config() -> LinkConfig {
        LinkConfig {
            connect_timeout: Duration::from_millis(500),
            read_timeout: Duration::from_millis(100),
            retry_delay: Duration::from_millis(10),
            liveness_interval: Duration::from_millis(50),
        }
    }

    async fn wait_until<F: Fn() -> bool>(cond: F, deadline: Duration) -> bool {
        let start = tokio::time::Instant::now();
        while start.elapsed() < deadline {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cond()
    }

    #[tokio::test]
    async fn test_outcome_delivered_on_delivery_context() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::from_addr(listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);

            write_half.write_all(b"mode\n").await.unwrap();
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            assert_eq!(line.trim_end(), protocol::PERSIST_REPLY);
            write_half.write_all(b"identify\n").await.unwrap();
            line.clear();
            reader.read_line(&mut line).await.unwrap();
            assert_eq!(line.trim_end(), protocol::MOBILE_REPLY);

            line.clear();
            reader.read_line(&mut line).await.unwrap();
            assert_eq!(line, "power on\n");
            write_half.write_all(b"ack\n").await.unwrap();
            (reader, write_half)
        });

        let delivery = Delivery::start();
        let link = DeviceLink::start(endpoint, test_config(), delivery.clone());
        assert!(wait_until(|| link.is_connected(), Duration::from_millis(1000)).await);

        let dispatcher = CommandDispatcher::new(link, delivery);
        let (tx, rx) = tokio::sync::oneshot::channel();
        dispatcher.send_and_receive("power on\n", move |outcome| {
            let _ = tx.send(outcome);
        });

        let outcome = rx.await.unwrap();
        assert_eq!(outcome, ExchangeResult::Sent(Some("ack\n".to_string())));
        let _io = server.await.unwrap();
    }

    #[tokio::test]
    async fn test_offline_dispatch_skips_the_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::from_addr(listener.local_addr().unwrap());
        drop(listener);

        let delivery = Delivery::start();
        let link = DeviceLink::start(endpoint, test_config(), delivery.clone());
        let dispatcher = CommandDispatcher::new(link, delivery);

        let (tx, rx) = tokio::sync::oneshot::channel();
        dispatcher.send_and_receive("power on\n", move |outcome| {
            let _ = tx.send(outcome);
        });

        assert_eq!(rx.await.unwrap(), ExchangeResult::NotConnected);
    }

    #[tokio::test]
    async fn test_continuations_arrive_in_completion_order_on_one_context() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::from_addr(listener.local_addr().unwrap());
        drop(listener);

        let delivery = Delivery::start();
        let link = DeviceLink::start(endpoint, test_config(), delivery.clone());
        let dispatcher = CommandDispatcher::new(link, delivery.clone());

        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = tokio::sync::oneshot::channel();
        let mut tx = Some(tx);
        for i in 0..3 {
            let outcomes = Arc::clone(&outcomes);
            let done = if i == 2 { tx.take() } else { None };
            dispatcher.send_and_receive("listen\n", move |outcome| {
                outcomes.lock().unwrap().push(outcome);
                if let Some(done) = done {
                    let _ = done.send(());
                }
            });
        }

        rx.await.unwrap();
        let outcomes = outcomes.lock().unwrap();
        assert_eq!(
            *outcomes,
            vec![ExchangeResult::NotConnected; 3],
            "every continuation runs, serialized on the delivery context"
        );
    }
}
