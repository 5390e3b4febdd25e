use crate::core::{Block, Blockchain, Transaction};
use crate::crypto::hash::Hash256;
use crate::{ChainError, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

pub const PROTOCOL_VERSION: u32 = 1;

pub const REJECT_INVALID: u8 = 0x10;
pub const REJECT_DUPLICATE: u8 = 0x12;
pub const REJECT_NOT_FOUND: u8 = 0x20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_type: MessageType,
    pub timestamp: u64,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageType {
    Block(Block),
    Transaction(Transaction),
    GetBlock(Hash256),
    GetTip,
    Tip {
        hash: Hash256,
        height: u64,
    },
    Reject {
        message: String,
        code: u8,
        reason: String,
    },
}

impl Message {
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            timestamp: chrono::Utc::now().timestamp() as u64,
            version: PROTOCOL_VERSION,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| ChainError::Network(format!("Failed to serialize message: {}", e)))
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data)
            .map_err(|e| ChainError::Network(format!("Failed to deserialize message: {}", e)))
    }

    pub fn message_type_name(&self) -> &'static str {
        match &self.message_type {
            MessageType::Block(_) => "block",
            MessageType::Transaction(_) => "tx",
            MessageType::GetBlock(_) => "getblock",
            MessageType::GetTip => "gettip",
            MessageType::Tip { .. } => "tip",
            MessageType::Reject { .. } => "reject",
        }
    }

    fn reject(message: &str, code: u8, reason: String) -> Self {
        Self::new(MessageType::Reject {
            message: message.to_string(),
            code,
            reason,
        })
    }
}

/// Entry point for data arriving from peers.
///
/// Blocks go through the same publish lock the miner uses, so peer blocks and
/// mined blocks are committed one at a time.
pub struct ProtocolHandler {
    blockchain: Arc<Blockchain>,
    publish_lock: Arc<Mutex<()>>,
    version: u32,
}

impl ProtocolHandler {
    pub fn new(blockchain: Arc<Blockchain>, publish_lock: Arc<Mutex<()>>) -> Self {
        Self {
            blockchain,
            publish_lock,
            version: PROTOCOL_VERSION,
        }
    }

    pub async fn handle_message(&self, message: Message, peer_id: &str) -> Result<Option<Message>> {
        log::debug!("📨 Handling {} message from peer {}", message.message_type_name(), peer_id);
        self.validate_message(&message)?;

        match message.message_type {
            MessageType::Block(block) => self.handle_block(block, peer_id).await,
            MessageType::Transaction(tx) => self.handle_transaction(tx, peer_id).await,
            MessageType::GetBlock(hash) => Ok(Some(self.handle_get_block(hash))),
            MessageType::GetTip => Ok(Some(self.create_tip_message())),
            MessageType::Tip { hash, height } => {
                if height > self.blockchain.current_height() && !self.blockchain.contains_block(&hash) {
                    Ok(Some(Message::new(MessageType::GetBlock(hash))))
                } else {
                    Ok(None)
                }
            }
            MessageType::Reject { message, code, reason } => {
                log::warn!("⚠️ Peer {} rejected our {} (code {:#04x}): {}", peer_id, message, code, reason);
                Ok(None)
            }
        }
    }

    async fn handle_block(&self, block: Block, peer_id: &str) -> Result<Option<Message>> {
        log::info!("📦 Received block {} at height {} from {}", block.hash.short(), block.height, peer_id);

        let outcome = {
            let _guard = self.publish_lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.blockchain.try_process_block(&block)
        };

        match outcome {
            Ok(()) => Ok(None),
            Err(e) => {
                log::warn!("❌ Rejected block from {}: {}", peer_id, e);
                let code = match e {
                    ChainError::DuplicateBlock(_) => REJECT_DUPLICATE,
                    _ => REJECT_INVALID,
                };
                Ok(Some(Message::reject("block", code, e.to_string())))
            }
        }
    }

    async fn handle_transaction(&self, tx: Transaction, peer_id: &str) -> Result<Option<Message>> {
        log::debug!("💰 Received transaction {} from {}", tx.hash.short(), peer_id);

        match self.blockchain.try_process_tx(&tx) {
            Ok(_) => Ok(None),
            Err(e) => {
                log::warn!("❌ Rejected transaction from {}: {}", peer_id, e);
                Ok(Some(Message::reject("tx", REJECT_INVALID, e.to_string())))
            }
        }
    }

    fn handle_get_block(&self, hash: Hash256) -> Message {
        match self.blockchain.get_block(&hash) {
            Some(block) => Message::new(MessageType::Block(block)),
            None => Message::reject("getblock", REJECT_NOT_FOUND, format!("Unknown block {}", hash)),
        }
    }

    pub fn create_tip_message(&self) -> Message {
        let tip = self.blockchain.tip();
        Message::new(MessageType::Tip {
            hash: tip.hash,
            height: tip.height,
        })
    }

    pub fn validate_message(&self, message: &Message) -> Result<()> {
        if message.version > self.version {
            return Err(ChainError::Network("Unsupported message version".to_string()));
        }

        let now = chrono::Utc::now().timestamp() as u64;
        let max_future_time = 2 * 60 * 60; // 2 hours

        if message.timestamp > now + max_future_time {
            return Err(ChainError::Network("Message timestamp too far in the future".to_string()));
        }

        if let MessageType::Transaction(tx) = &message.message_type {
            if tx.outputs.is_empty() {
                return Err(ChainError::Network("Transaction must have outputs".to_string()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ChainParams, TxInput, TxOutput, DEFAULT_BLOCK_REWARD};
    use crate::crypto::keys::KeyPair;

    fn setup() -> Result<(Arc<Blockchain>, ProtocolHandler, KeyPair)> {
        let key = KeyPair::new()?;
        let params = ChainParams {
            difficulty: 0,
            ..ChainParams::default()
        };
        let blockchain = Arc::new(Blockchain::new(params, key.public_key.clone())?);
        let handler = ProtocolHandler::new(Arc::clone(&blockchain), Arc::new(Mutex::new(())));
        Ok((blockchain, handler, key))
    }

    fn spend_genesis(blockchain: &Blockchain, from: &KeyPair, to: &KeyPair) -> Transaction {
        let genesis = blockchain.get_block(&blockchain.genesis_hash()).unwrap();
        Transaction::new(
            TxInput::new(genesis.coinbase.hash, 0),
            TxOutput::new(DEFAULT_BLOCK_REWARD, to.public_key.clone()),
            &from.private_key,
        )
    }

    #[test]
    fn test_message_serialization() -> Result<()> {
        let key = KeyPair::new()?;
        let block = Block::genesis(key.public_key.clone(), DEFAULT_BLOCK_REWARD);
        let msg = Message::new(MessageType::Block(block));

        let deserialized = Message::deserialize(&msg.serialize()?)?;
        assert_eq!(deserialized, msg);
        assert_eq!(deserialized.message_type_name(), "block");

        if let MessageType::Block(block) = deserialized.message_type {
            assert!(block.has_valid_hash());
        }

        assert!(Message::deserialize(&[0xFF, 0x01]).is_err());

        Ok(())
    }

    #[tokio::test]
    async fn test_peer_block_is_committed() -> Result<()> {
        let (blockchain, handler, key) = setup()?;
        let block = blockchain.assemble_candidate_block(key.public_key.clone());

        let reply = handler.handle_message(Message::new(MessageType::Block(block.clone())), "peer-1").await?;
        assert!(reply.is_none());
        assert_eq!(blockchain.tip().hash, block.hash);

        let reply = handler.handle_message(Message::new(MessageType::Block(block)), "peer-1").await?;
        match reply.map(|m| m.message_type) {
            Some(MessageType::Reject { code, .. }) => assert_eq!(code, REJECT_DUPLICATE),
            other => panic!("expected reject, got {:?}", other),
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_peer_transaction_routing() -> Result<()> {
        let (blockchain, handler, key) = setup()?;
        let other = KeyPair::new()?;

        let forged = spend_genesis(&blockchain, &other, &other);
        let reply = handler.handle_message(Message::new(MessageType::Transaction(forged)), "peer-2").await?;
        assert!(matches!(reply.map(|m| m.message_type), Some(MessageType::Reject { .. })));
        assert_eq!(blockchain.pending_tx_count(), 0);

        let tx = spend_genesis(&blockchain, &key, &other);
        let reply = handler.handle_message(Message::new(MessageType::Transaction(tx)), "peer-2").await?;
        assert!(reply.is_none());
        assert_eq!(blockchain.pending_tx_count(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_tip_and_block_queries() -> Result<()> {
        let (blockchain, handler, _) = setup()?;

        let reply = handler.handle_message(Message::new(MessageType::GetTip), "peer-3").await?;
        assert_eq!(
            reply.map(|m| m.message_type),
            Some(MessageType::Tip {
                hash: blockchain.genesis_hash(),
                height: 0
            })
        );

        let reply = handler
            .handle_message(Message::new(MessageType::GetBlock(blockchain.genesis_hash())), "peer-3")
            .await?;
        assert!(matches!(reply.map(|m| m.message_type), Some(MessageType::Block(b)) if b.is_genesis()));

        let reply = handler
            .handle_message(Message::new(MessageType::GetBlock(Hash256::hash(b"missing"))), "peer-3")
            .await?;
        assert!(matches!(
            reply.map(|m| m.message_type),
            Some(MessageType::Reject { code: REJECT_NOT_FOUND, .. })
        ));

        // A taller unknown tip is requested.
        let unknown = Hash256::hash(b"far ahead");
        let reply = handler
            .handle_message(Message::new(MessageType::Tip { hash: unknown, height: 7 }), "peer-3")
            .await?;
        assert_eq!(reply.map(|m| m.message_type), Some(MessageType::GetBlock(unknown)));

        Ok(())
    }

    #[tokio::test]
    async fn test_message_validation() -> Result<()> {
        let (_, handler, _) = setup()?;

        let mut future = Message::new(MessageType::GetTip);
        future.timestamp += 3 * 60 * 60;
        assert!(handler.validate_message(&future).is_err());

        let mut newer = Message::new(MessageType::GetTip);
        newer.version = PROTOCOL_VERSION + 1;
        assert!(handler.handle_message(newer, "peer-4").await.is_err());

        Ok(())
    }
}
