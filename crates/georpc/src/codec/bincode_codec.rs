use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use super::{AsyncDuplex, CodecPair, CodecReader, CodecWriter, Header};
use crate::error::RpcError;

/// Default wire codec: length-delimited binary frames, `bincode`-encoded
/// headers, opaque body bytes.
///
/// `bincode` has no self-describing frame boundary of its own, so each
/// header and each body gets its own length-delimited frame via
/// `LengthDelimitedCodec`. Body bytes are never interpreted here — argument
/// and reply marshaling is the service registry's job (see `service.rs`),
/// which keeps `Header` the only type that has to survive a round trip
/// through `bincode`.
pub struct BincodeReader {
    framed: FramedRead<ReadHalf<Box<dyn AsyncDuplex>>, LengthDelimitedCodec>,
}

pub struct BincodeWriter {
    framed: FramedWrite<WriteHalf<Box<dyn AsyncDuplex>>, LengthDelimitedCodec>,
}

pub fn build_bincode_pair(stream: Box<dyn AsyncDuplex>) -> CodecPair {
    let (read_half, write_half) = tokio::io::split(stream);
    CodecPair {
        reader: Box::new(BincodeReader {
            framed: FramedRead::new(read_half, LengthDelimitedCodec::new()),
        }),
        writer: Box::new(BincodeWriter {
            framed: FramedWrite::new(write_half, LengthDelimitedCodec::new()),
        }),
    }
}

#[async_trait]
impl CodecReader for BincodeReader {
    async fn read_header(&mut self) -> Result<Header, RpcError> {
        let frame = self
            .framed
            .next()
            .await
            .ok_or(RpcError::Eof)?
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        bincode::deserialize(&frame).map_err(|e| RpcError::DecodeHeader(e.to_string()))
    }

    async fn read_body(&mut self) -> Result<Vec<u8>, RpcError> {
        let frame = self
            .framed
            .next()
            .await
            .ok_or(RpcError::Eof)?
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        Ok(frame.to_vec())
    }
}

#[async_trait]
impl CodecWriter for BincodeWriter {
    async fn write(&mut self, header: &Header, body: &[u8]) -> Result<(), RpcError> {
        let header_bytes =
            bincode::serialize(header).map_err(|e| RpcError::Encode(e.to_string()))?;
        self.framed
            .send(Bytes::from(header_bytes))
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        self.framed
            .send(Bytes::copy_from_slice(body))
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RpcError> {
        self.framed
            .close()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_header_and_body() {
        let (client, server) = tokio::io::duplex(4096);
        let client: Box<dyn AsyncDuplex> = Box::new(client);
        let server: Box<dyn AsyncDuplex> = Box::new(server);

        let mut client_pair = build_bincode_pair(client);
        let mut server_pair = build_bincode_pair(server);

        let header = Header {
            service_method: "Arith.Sum".to_string(),
            seq: 7,
            error: String::new(),
        };
        let body = serde_json::to_vec(&serde_json::json!({"a": 1, "b": 2})).unwrap();

        client_pair.writer.write(&header, &body).await.unwrap();

        let got_header = server_pair.reader.read_header().await.unwrap();
        let got_body = server_pair.reader.read_body().await.unwrap();

        assert_eq!(got_header, header);
        assert_eq!(got_body, body);
    }

    #[tokio::test]
    async fn read_after_close_reports_eof() {
        let (client, server) = tokio::io::duplex(4096);
        let client: Box<dyn AsyncDuplex> = Box::new(client);
        let server: Box<dyn AsyncDuplex> = Box::new(server);

        let mut client_pair = build_bincode_pair(client);
        client_pair.writer.close().await.unwrap();
        drop(client_pair);

        let mut server_pair = build_bincode_pair(server);
        let err = server_pair.reader.read_header().await.unwrap_err();
        assert!(matches!(err, RpcError::Eof));
    }
}
