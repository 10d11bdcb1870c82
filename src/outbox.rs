//! Single path for every outbound message.
//!
//! Producers (the protocol handler, the chunker, spawned tool calls) push
//! [`ClientMessage`]s into one unbounded channel that the writer task drains
//! in order. Closing the outbox makes later sends no-ops, so results that
//! arrive after the session stopped are dropped instead of written.

use crate::error::{RealtimeError, Result};
use crate::protocol::ClientMessage;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Outbox {
    tx: UnboundedSender<ClientMessage>,
    /// Open flag; held for the whole of a send so batches stay contiguous
    /// and nothing is queued once `close` has returned
    open: Arc<Mutex<bool>>,
}

impl Outbox {
    /// Create an open outbox and the receiver the writer drains.
    pub fn channel() -> (Self, UnboundedReceiver<ClientMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let outbox = Self {
            tx,
            open: Arc::new(Mutex::new(true)),
        };
        (outbox, rx)
    }

    fn gate(&self) -> MutexGuard<'_, bool> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `msg` for sending. Returns `Ok(false)` when the outbox is closed
    /// and the message was discarded.
    pub fn send(&self, msg: ClientMessage) -> Result<bool> {
        self.send_all([msg])
    }

    /// Queue `msgs` back to back, with no other producer's message in between.
    /// Returns `Ok(false)` when the outbox is closed and nothing was queued.
    pub fn send_all<I>(&self, msgs: I) -> Result<bool>
    where
        I: IntoIterator<Item = ClientMessage>,
    {
        let open = self.gate();
        if !*open {
            debug!("Outbox closed, dropping outbound messages");
            return Ok(false);
        }
        for msg in msgs {
            self.tx.send(msg).map_err(|_| RealtimeError::ChannelClosed)?;
        }
        Ok(true)
    }

    /// Stop accepting messages. Shared by every clone; waits for a send in
    /// progress to finish.
    pub fn close(&self) {
        *self.gate() = false;
    }

    pub fn is_open(&self) -> bool {
        *self.gate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_preserves_order() {
        let (outbox, mut rx) = Outbox::channel();
        outbox.send(ClientMessage::user_text("a")).unwrap();
        outbox.send(ClientMessage::ResponseCreate {}).unwrap();

        assert_eq!(rx.try_recv().unwrap(), ClientMessage::user_text("a"));
        assert_eq!(rx.try_recv().unwrap(), ClientMessage::ResponseCreate {});
    }

    #[test]
    fn test_closed_outbox_drops_messages() {
        let (outbox, mut rx) = Outbox::channel();
        let late = outbox.clone();
        outbox.close();

        assert!(!late.is_open());
        assert!(!late.send(ClientMessage::ResponseCreate {}).unwrap());
        assert!(!late
            .send_all([ClientMessage::user_text("a"), ClientMessage::ResponseCreate {}])
            .unwrap());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_after_writer_gone_is_error() {
        let (outbox, rx) = Outbox::channel();
        drop(rx);
        assert!(matches!(
            outbox.send(ClientMessage::ResponseCreate {}),
            Err(RealtimeError::ChannelClosed)
        ));
    }

    #[test]
    fn test_concurrent_batches_are_not_interleaved() {
        let (outbox, mut rx) = Outbox::channel();
        let producers: Vec<_> = (0..8)
            .map(|n| {
                let outbox = outbox.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let call_id = format!("call_{}_{}", n, i);
                        outbox
                            .send_all([
                                ClientMessage::function_call_output(call_id, "ok"),
                                ClientMessage::ResponseCreate {},
                            ])
                            .unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let mut received = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            received.push(msg);
        }
        assert_eq!(received.len(), 8 * 50 * 2);
        for pair in received.chunks(2) {
            assert_eq!(pair[0].kind(), "conversation.item.create");
            assert_eq!(pair[1], ClientMessage::ResponseCreate {});
        }
    }

    #[test]
    fn test_close_is_final_across_threads() {
        let (outbox, mut rx) = Outbox::channel();
        let late = outbox.clone();
        outbox.close();
        std::thread::spawn(move || late.send(ClientMessage::ResponseCreate {}).unwrap())
            .join()
            .map(|queued| assert!(!queued))
            .unwrap();
        assert!(rx.try_recv().is_err());
    }
}
