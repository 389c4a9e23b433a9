//! Trait abstraction for the blocking, timeout-bounded read primitive

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{GathererError, Result};

/// Read side of a device connection
///
/// Exactly one synchronizer owns a reader, so reads on a channel are never
/// concurrent.
#[async_trait]
pub trait PortReader: Send {
    /// Read at most `max_len` bytes, waiting no longer than `timeout`
    ///
    /// # Errors
    ///
    /// * [`GathererError::Timeout`] if nothing arrived in time
    /// * [`GathererError::ConnectionClosed`] at end of stream
    /// * [`GathererError::Io`] on any other failure
    async fn read_chunk(&mut self, max_len: usize, timeout: Duration) -> Result<Bytes>;
}

/// Adapter turning any `AsyncRead` (serial stream, replay file) into a [`PortReader`]
pub struct StreamPort<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R> StreamPort<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
        }
    }
}

#[async_trait]
impl<R> PortReader for StreamPort<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn read_chunk(&mut self, max_len: usize, timeout: Duration) -> Result<Bytes> {
        if self.buf.len() < max_len {
            self.buf.resize(max_len, 0);
        }

        let read = tokio::time::timeout(timeout, self.inner.read(&mut self.buf[..max_len])).await;
        match read {
            Err(_) => Err(GathererError::Timeout(timeout.as_millis() as u64)),
            Ok(Ok(0)) if max_len > 0 => Err(GathererError::ConnectionClosed),
            Ok(Ok(n)) => Ok(Bytes::copy_from_slice(&self.buf[..n])),
            Ok(Err(e)) => Err(GathererError::Io(e)),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_stream_port_delivers_chunks_as_read() {
        let mock = Builder::new().read(b"$1;2;").read(b"3\r\n").build();
        let mut port = StreamPort::new(mock);

        let first = port.read_chunk(64, Duration::from_millis(100)).await.unwrap();
        assert_eq!(&first[..], b"$1;2;");
        let second = port.read_chunk(64, Duration::from_millis(100)).await.unwrap();
        assert_eq!(&second[..], b"3\r\n");
    }

    #[tokio::test]
    async fn test_stream_port_respects_max_len() {
        let mock = Builder::new().read(b"0123").read(b"4567").build();
        let mut port = StreamPort::new(mock);

        let chunk = port.read_chunk(4, Duration::from_millis(100)).await.unwrap();
        assert_eq!(&chunk[..], b"0123");
        let chunk = port.read_chunk(4, Duration::from_millis(100)).await.unwrap();
        assert_eq!(&chunk[..], b"4567");
    }

    #[tokio::test]
    async fn test_stream_port_end_of_stream() {
        let mock = Builder::new().read(b"ab").build();
        let mut port = StreamPort::new(mock);

        port.read_chunk(8, Duration::from_millis(100)).await.unwrap();
        let result = port.read_chunk(8, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(GathererError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_stream_port_io_error() {
        let mock = Builder::new()
            .read_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged"))
            .build();
        let mut port = StreamPort::new(mock);

        let result = port.read_chunk(8, Duration::from_millis(100)).await;
        match result {
            Err(GathererError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe),
            other => panic!("Expected Io error, got: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_port_timeout() {
        let mock = Builder::new().wait(Duration::from_secs(10)).read(b"late").build();
        let mut port = StreamPort::new(mock);

        let result = port.read_chunk(8, Duration::from_millis(500)).await;
        match result {
            Err(GathererError::Timeout(ms)) => assert_eq!(ms, 500),
            other => panic!("Expected Timeout, got: {:?}", other),
        }

        // The device answers eventually
        let chunk = port.read_chunk(8, Duration::from_secs(20)).await.unwrap();
        assert_eq!(&chunk[..], b"late");
    }

    #[tokio::test]
    async fn test_scripted_port_splits_oversized_chunks() {
        let mut port = mocks::ScriptedPort::chunks([b"abcdef"]);

        let first = port.read_chunk(4, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&first[..], b"abcd");
        let second = port.read_chunk(4, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&second[..], b"ef");
        assert!(matches!(
            port.read_chunk(4, Duration::from_millis(10)).await,
            Err(GathererError::ConnectionClosed)
        ));
        assert_eq!(port.requested_sizes(), vec![4, 4, 4]);
    }
}
