//! Header-block serialization for trailer frames.

use crate::error::{FrameError, Result};

use bytes::{BufMut, Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue};

/// Serialize headers as `key: value\r\n` lines.
pub fn encode(headers: &HeaderMap) -> Bytes {
    let mut buf = BytesMut::new();

    for (name, value) in headers {
        buf.put_slice(name.as_str().as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }

    buf.freeze()
}

/// Parse a header block written by [`encode`] or by another gRPC-Web peer.
///
/// Lines may end in `\r\n` or a bare `\n`; names are normalized to lower
/// case.
pub fn decode(payload: &[u8]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    for line in payload.split(|byte| *byte == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.trim_ascii().is_empty() {
            continue;
        }

        let colon = line.iter().position(|byte| *byte == b':').ok_or_else(|| {
            FrameError::InvalidTrailer(format!(
                "line without separator: {:?}",
                String::from_utf8_lossy(line)
            ))
        })?;

        let name = HeaderName::from_bytes(line[..colon].trim_ascii())
            .map_err(|e| FrameError::InvalidTrailer(e.to_string()))?;
        let value = HeaderValue::from_bytes(line[colon + 1..].trim_ascii())
            .map_err(|e| FrameError::InvalidTrailer(e.to_string()))?;

        headers.append(name, value);
    }

    Ok(headers)
}
