use tokio::io::{AsyncRead, AsyncReadExt};

/// Reads up to and including the next `\n`, one byte at a time.
///
/// Used for the JSON handshake and the HTTP CONNECT upgrade, both of which
/// hand the underlying stream to something else (a codec, or the plain
/// connection handler) immediately afterward. A `BufReader` would read ahead
/// past the line and strand those bytes inside its own buffer instead of
/// leaving them for the codec to see — this reads exactly the line and
/// nothing more.
pub(crate) async fn read_line<R: AsyncRead + Unpin>(stream: &mut R) -> std::io::Result<Vec<u8>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            break;
        }
        line.push(byte[0]);
        if byte[0] == b'\n' {
            break;
        }
    }
    Ok(line)
}
