use crate::network::protocol::{Message, ProtocolHandler};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::sync::{mpsc, oneshot};

/// Raw bytes received from one peer, with an optional return path for the
/// handler's answer.
#[derive(Debug)]
pub struct Envelope {
    pub peer_id: String,
    pub data: Vec<u8>,
    pub reply: Option<oneshot::Sender<Message>>,
}

impl Envelope {
    pub fn new(peer_id: impl Into<String>, message: &Message) -> Result<Self> {
        Ok(Self {
            peer_id: peer_id.into(),
            data: message.serialize()?,
            reply: None,
        })
    }

    /// Like [`Envelope::new`], also returning the receiver for the answer.
    pub fn with_reply(peer_id: impl Into<String>, message: &Message) -> Result<(Self, oneshot::Receiver<Message>)> {
        let (sender, receiver) = oneshot::channel();
        let mut envelope = Self::new(peer_id, message)?;
        envelope.reply = Some(sender);
        Ok((envelope, receiver))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxStats {
    pub messages_received: u64,
    pub bytes_received: u64,
    pub undecodable: u64,
    pub replies_sent: u64,
}

/// Queue between the transport and the [`ProtocolHandler`].
pub struct PeerInbox {
    handler: ProtocolHandler,
    receiver: mpsc::Receiver<Envelope>,
    stats: InboxStats,
}

impl PeerInbox {
    pub fn new(handler: ProtocolHandler, capacity: usize) -> (Self, mpsc::Sender<Envelope>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let inbox = Self {
            handler,
            receiver,
            stats: InboxStats::default(),
        };
        (inbox, sender)
    }

    /// Drains messages until every sender is gone or `shutdown` resolves.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> InboxStats {
        log::info!("📬 Peer inbox started");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                envelope = self.receiver.recv() => match envelope {
                    Some(envelope) => self.dispatch(envelope).await,
                    None => break,
                },
            }
        }

        log::info!("📬 Peer inbox closed after {} messages", self.stats.messages_received);
        self.stats
    }

    async fn dispatch(&mut self, envelope: Envelope) {
        self.stats.messages_received += 1;
        self.stats.bytes_received += envelope.data.len() as u64;

        let message = match Message::deserialize(&envelope.data) {
            Ok(message) => message,
            Err(e) => {
                self.stats.undecodable += 1;
                log::warn!("⚠️ Dropping undecodable message from {}: {}", envelope.peer_id, e);
                return;
            }
        };

        match self.handler.handle_message(message, &envelope.peer_id).await {
            Ok(Some(response)) => {
                if let Some(reply) = envelope.reply {
                    if reply.send(response).is_ok() {
                        self.stats.replies_sent += 1;
                    }
                }
            }
            Ok(None) => {}
            Err(e) => log::warn!("⚠️ Message from {} refused: {}", envelope.peer_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Blockchain, ChainParams};
    use crate::crypto::keys::KeyPair;
    use crate::network::protocol::MessageType;
    use std::sync::{Arc, Mutex};

    fn inbox() -> Result<(Arc<Blockchain>, PeerInbox, mpsc::Sender<Envelope>, KeyPair)> {
        let key = KeyPair::new()?;
        let params = ChainParams {
            difficulty: 0,
            ..ChainParams::default()
        };
        let blockchain = Arc::new(Blockchain::new(params, key.public_key.clone())?);
        let handler = ProtocolHandler::new(Arc::clone(&blockchain), Arc::new(Mutex::new(())));
        let (inbox, sender) = PeerInbox::new(handler, 8);
        Ok((blockchain, inbox, sender, key))
    }

    #[tokio::test]
    async fn test_inbox_routes_until_senders_close() -> Result<()> {
        let (blockchain, inbox, sender, key) = inbox()?;
        let running = tokio::spawn(inbox.run(std::future::pending()));

        let block = blockchain.assemble_candidate_block(key.public_key.clone());
        sender.send(Envelope::new("peer-1", &Message::new(MessageType::Block(block)))?).await.unwrap();

        let (envelope, answer) = Envelope::with_reply("peer-1", &Message::new(MessageType::GetTip))?;
        sender.send(envelope).await.unwrap();
        match answer.await.unwrap().message_type {
            MessageType::Tip { height, .. } => assert_eq!(height, 1),
            other => panic!("expected tip, got {:?}", other),
        }

        sender
            .send(Envelope {
                peer_id: "peer-2".to_string(),
                data: vec![0xde, 0xad],
                reply: None,
            })
            .await
            .unwrap();

        drop(sender);
        let stats = running.await.unwrap();

        assert_eq!(stats.messages_received, 3);
        assert_eq!(stats.undecodable, 1);
        assert_eq!(stats.replies_sent, 1);
        assert_eq!(blockchain.current_height(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_inbox_stops_on_shutdown() -> Result<()> {
        let (_, inbox, sender, _) = inbox()?;
        let (stop, stopped) = oneshot::channel::<()>();

        let running = tokio::spawn(inbox.run(async move {
            let _ = stopped.await;
        }));
        stop.send(()).unwrap();

        let stats = running.await.unwrap();
        assert_eq!(stats, InboxStats::default());
        drop(sender);

        Ok(())
    }
}
