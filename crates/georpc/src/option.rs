use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::codec::{AsyncDuplex, CODEC_BINCODE};
use crate::error::RpcError;
use crate::framing::read_line;

/// Magic number every handshake must carry.
pub const MAGIC_NUMBER: u32 = 0x3bef5c;

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Connection-scoped negotiation exchanged once, before the codec takes
/// over. Field names are `PascalCase` on the wire (via `#[serde(rename)]`)
/// to match a fixed wire contract, even though every other type in this
/// crate uses ordinary Rust naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectOptions {
    #[serde(rename = "MagicNumber")]
    pub magic_number: u32,
    #[serde(rename = "CodecType")]
    pub codec_type: String,
    #[serde(rename = "ConnectTimeout", with = "duration_millis")]
    pub connect_timeout: Duration,
    #[serde(rename = "HandleTimeout", with = "duration_millis")]
    pub handle_timeout: Duration,
}

impl Default for ConnectOptions {
    /// `ConnectTimeout` defaults to 10s; `HandleTimeout` defaults to zero,
    /// meaning "no deadline".
    fn default() -> Self {
        Self {
            magic_number: MAGIC_NUMBER,
            codec_type: CODEC_BINCODE.to_string(),
            connect_timeout: Duration::from_secs(10),
            handle_timeout: Duration::ZERO,
        }
    }
}

impl ConnectOptions {
    pub fn with_codec_type(mut self, codec_type: impl Into<String>) -> Self {
        self.codec_type = codec_type.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handle_timeout(mut self, timeout: Duration) -> Self {
        self.handle_timeout = timeout;
        self
    }
}

/// Writes the handshake as one newline-terminated JSON object and flushes.
pub(crate) async fn write_handshake<W: AsyncWrite + Unpin>(
    stream: &mut W,
    opt: &ConnectOptions,
) -> Result<(), RpcError> {
    let mut line = serde_json::to_vec(opt).map_err(|e| RpcError::Encode(e.to_string()))?;
    line.push(b'\n');
    stream
        .write_all(&line)
        .await
        .map_err(|e| RpcError::Transport(e.to_string()))?;
    stream
        .flush()
        .await
        .map_err(|e| RpcError::Transport(e.to_string()))
}

/// Reads exactly one newline-terminated JSON object, leaving every
/// subsequent byte on `stream` for the codec to pick up untouched.
pub(crate) async fn read_handshake(
    stream: &mut Box<dyn AsyncDuplex>,
) -> Result<ConnectOptions, RpcError> {
    let line = read_line(stream).await.map_err(RpcError::from)?;
    if line.is_empty() {
        return Err(RpcError::Eof);
    }
    serde_json::from_slice(&line).map_err(|e| RpcError::Handshake(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handshake_round_trips_and_leaves_codec_bytes_untouched() {
        let (mut client, server) = tokio::io::duplex(4096);
        let opt = ConnectOptions::default();
        write_handshake(&mut client, &opt).await.unwrap();
        client.write_all(b"leftover").await.unwrap();

        let mut server: Box<dyn AsyncDuplex> = Box::new(server);
        let got = read_handshake(&mut server).await.unwrap();
        assert_eq!(got.magic_number, MAGIC_NUMBER);
        assert_eq!(got.codec_type, CODEC_BINCODE);

        let mut rest = [0u8; 8];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut rest)
            .await
            .unwrap();
        assert_eq!(&rest, b"leftover");
    }
}
