//! Bounded, cancellation-aware streaming copy with a running MD5 digest.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

const COPY_BUFFER: usize = 32 * 1024;

#[derive(Error, Debug)]
pub enum CopyError {
    #[error("stream interrupted by cancellation")]
    StreamInterrupted,

    #[error("unexpected end of stream before {0} bytes were copied")]
    UnexpectedEof(u64),

    #[error("short write: sink accepted {written} of {read} bytes")]
    ShortWrite { read: usize, written: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Copy at most `limit` bytes from `source` to `sink`, computing an MD5
/// digest of the bytes actually copied. Cancellation is polled between each
/// buffered read/write iteration. The digest is returned alongside the
/// result even when the result is an error, since a partial copy still
/// produces a meaningful digest of what was sent.
pub async fn stream_bounded<R, W>(
    cancel: &CancellationToken,
    mut sink: W,
    mut source: R,
    limit: u64,
) -> (String, Result<u64, CopyError>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut hasher = md5::Context::new();
    let mut buf = vec![0u8; COPY_BUFFER];
    let mut copied: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return (digest_hex(&hasher), Err(CopyError::StreamInterrupted));
        }

        if copied >= limit {
            break;
        }

        let want = std::cmp::min(buf.len() as u64, limit - copied) as usize;
        let n = match source.read(&mut buf[..want]).await {
            Ok(n) => n,
            Err(e) => return (digest_hex(&hasher), Err(CopyError::Io(e))),
        };

        if n == 0 {
            return (digest_hex(&hasher), Err(CopyError::UnexpectedEof(limit)));
        }

        if cancel.is_cancelled() {
            return (digest_hex(&hasher), Err(CopyError::StreamInterrupted));
        }

        match sink.write(&buf[..n]).await {
            Ok(written) if written == n => {}
            Ok(written) => {
                hasher.consume(&buf[..written]);
                copied += written as u64;
                return (
                    digest_hex(&hasher),
                    Err(CopyError::ShortWrite { read: n, written }),
                );
            }
            Err(e) => return (digest_hex(&hasher), Err(CopyError::Io(e))),
        }

        hasher.consume(&buf[..n]);
        copied += n as u64;
    }

    if let Err(e) = sink.flush().await {
        return (digest_hex(&hasher), Err(CopyError::Io(e)));
    }

    (digest_hex(&hasher), Ok(copied))
}

fn digest_hex(hasher: &md5::Context) -> String {
    format!("{:x}", hasher.clone().compute())
}
