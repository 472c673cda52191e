//! Wire messages and length-prefixed framing.
//!
//! Each connection carries exactly one frame: a 4-byte big-endian length
//! followed by that many bytes of JSON [`Envelope`].

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::blockchain::{Block, Transaction};
use crate::error::NetError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Tx {
        tx: Transaction,
    },
    Block {
        block: Block,
    },
    Peers {
        peers: Vec<String>,
    },
    GetPeers,
    GetBlocks {
        #[serde(rename = "fromIndex")]
        from_index: u64,
    },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Tx { .. } => "tx",
            Message::Block { .. } => "block",
            Message::Peers { .. } => "peers",
            Message::GetPeers => "getpeers",
            Message::GetBlocks { .. } => "getblocks",
        }
    }
}

/// A message with the sender's advertised endpoint and chain height.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub from: String,
    pub height: u64,
    #[serde(flatten)]
    pub message: Message,
}

pub async fn write_frame<W>(writer: &mut W, envelope: &Envelope, limit: usize) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(envelope)?;
    if body.len() > limit {
        return Err(NetError::FrameTooLarge {
            size: body.len(),
            limit,
        });
    }
    let len = u32::try_from(body.len()).map_err(|_| NetError::FrameTooLarge {
        size: body.len(),
        limit,
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R>(reader: &mut R, limit: usize) -> Result<Envelope, NetError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let size = u32::from_be_bytes(len_buf) as usize;
    if size > limit {
        return Err(NetError::FrameTooLarge { size, limit });
    }
    let mut body = vec![0u8; size];
    reader.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;
    use pretty_assertions::assert_eq;

    fn envelope(message: Message) -> Envelope {
        Envelope {
            from: "127.0.0.1:6002".into(),
            height: 3,
            message,
        }
    }

    #[test]
    fn discriminator_is_top_level_type() {
        let json = serde_json::to_value(envelope(Message::GetBlocks { from_index: 2 })).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "from": "127.0.0.1:6002",
                "height": 3,
                "type": "getblocks",
                "fromIndex": 2
            })
        );

        let json = serde_json::to_value(envelope(Message::GetPeers)).unwrap();
        assert_eq!(json["type"], "getpeers");
    }

    #[test]
    fn unknown_type_is_rejected() {
        let raw = r#"{"from":"a:1","height":0,"type":"ping"}"#;
        assert!(serde_json::from_str::<Envelope>(raw).is_err());
    }

    #[tokio::test]
    async fn frame_carries_transaction() {
        let alice = Keypair::from_label("alice");
        let sent = envelope(Message::Tx {
            tx: Transaction::signed(&alice, "bob", 10),
        });
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        write_frame(&mut client, &sent, 1 << 20).await.unwrap();
        let received = read_frame(&mut server, 1 << 20).await.unwrap();
        assert_eq!(received, sent);
        assert_eq!(received.message.kind(), "tx");
    }

    #[tokio::test]
    async fn oversized_frame_is_refused() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&(10_000u32).to_be_bytes()).await.unwrap();
        assert!(matches!(
            read_frame(&mut server, 512).await,
            Err(NetError::FrameTooLarge { size: 10_000, limit: 512 })
        ));

        let big = envelope(Message::Peers {
            peers: vec!["x".repeat(600)],
        });
        assert!(matches!(
            write_frame(&mut client, &big, 512).await,
            Err(NetError::FrameTooLarge { limit: 512, .. })
        ));
    }
}
