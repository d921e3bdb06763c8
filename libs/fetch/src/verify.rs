//! Streaming SHA-256 verification.
//!
//! Blobs are hashed in the same pass that copies them to their destination, so no
//! downloaded byte is read twice. Digests are compared case-insensitively.

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::FetchError;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Incremental SHA-256 over a byte stream.
#[derive(Debug, Clone, Default)]
pub struct Sha256Verifier {
    hasher: Sha256,
    bytes: u64,
}

impl Sha256Verifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes into the digest.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes += data.len() as u64;
    }

    /// Bytes hashed so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Compare against `expected` and return the byte count on success.
    pub fn finish(self, expected: &str) -> Result<u64, FetchError> {
        let actual = hex::encode(self.hasher.finalize());
        if !digests_match(&actual, expected) {
            return Err(FetchError::Integrity {
                expected: expected.to_string(),
                actual,
            });
        }
        Ok(self.bytes)
    }
}

/// Case-insensitive digest comparison.
pub fn digests_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Lowercase hex SHA-256 of an in-memory buffer.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Copy `source` into `dest` while hashing; fails with [`FetchError::Integrity`] when
/// the digest differs from `expected`. Returns the number of bytes copied.
pub async fn copy_and_verify<R, W>(
    source: &mut R,
    dest: &mut W,
    expected: &str,
) -> Result<u64, FetchError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + Send,
{
    let mut sinks: [&mut (dyn AsyncWrite + Unpin + Send); 1] = [dest];
    copy_and_verify_fanout(source, &mut sinks, expected).await
}

/// Like [`copy_and_verify`], but writes every byte to each of `sinks` in order.
pub async fn copy_and_verify_fanout<R>(
    source: &mut R,
    sinks: &mut [&mut (dyn AsyncWrite + Unpin + Send)],
    expected: &str,
) -> Result<u64, FetchError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut verifier = Sha256Verifier::new();
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];

    loop {
        let n = source.read(&mut buf).await.map_err(FetchError::from_read)?;
        if n == 0 {
            break;
        }
        verifier.update(&buf[..n]);
        for sink in sinks.iter_mut() {
            sink.write_all(&buf[..n]).await?;
        }
    }
    for sink in sinks.iter_mut() {
        sink.flush().await?;
    }

    let written = verifier.finish(expected)?;
    debug!(bytes = written, digest = %expected, "Digest verified");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_WORLD: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_sha256_hex() {
        assert_eq!(sha256_hex(b"hello world"), HELLO_WORLD);
    }

    #[test]
    fn test_digest_comparison_ignores_case() {
        assert!(digests_match(HELLO_WORLD, &HELLO_WORLD.to_uppercase()));
        assert!(!digests_match(HELLO_WORLD, &sha256_hex(b"hello")));
    }

    #[tokio::test]
    async fn test_copy_and_verify_success() {
        let mut source: &[u8] = b"hello world";
        let mut dest = Vec::new();

        let written = copy_and_verify(&mut source, &mut dest, &HELLO_WORLD.to_uppercase())
            .await
            .unwrap();

        assert_eq!(written, 11);
        assert_eq!(dest, b"hello world");
    }

    #[tokio::test]
    async fn test_copy_and_verify_mismatch() {
        let mut source: &[u8] = b"hello world";
        let mut dest = Vec::new();
        let wrong = sha256_hex(b"something else");

        let err = copy_and_verify(&mut source, &mut dest, &wrong)
            .await
            .unwrap_err();

        match err {
            FetchError::Integrity { expected, actual } => {
                assert_eq!(expected, wrong);
                assert_eq!(actual, HELLO_WORLD);
            }
            other => panic!("expected integrity error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fanout_writes_every_sink() {
        let data = vec![7u8; 200 * 1024];
        let expected = sha256_hex(&data);
        let mut source: &[u8] = &data;
        let mut first = Vec::new();
        let mut second = Vec::new();

        let written = {
            let mut sinks: [&mut (dyn AsyncWrite + Unpin + Send); 2] = [&mut first, &mut second];
            copy_and_verify_fanout(&mut source, &mut sinks, &expected)
                .await
                .unwrap()
        };

        assert_eq!(written, data.len() as u64);
        assert_eq!(first, data);
        assert_eq!(second, data);
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let mut source: &[u8] = b"";
        let mut dest = Vec::new();
        let written = copy_and_verify(&mut source, &mut dest, &sha256_hex(b""))
            .await
            .unwrap();
        assert_eq!(written, 0);
    }
}
