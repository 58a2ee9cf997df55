//! Rolling MD5 over an upload, checked against the provider's checksum.

use tracing::debug;

use unistore_common::{Checksum, OperationError, Result};

/// Accumulates the whole-object MD5 and one MD5 per chunk.
///
/// Chunks correspond to provider parts, so the per-chunk digests reproduce
/// multipart ETags of the `<md5 of part md5s>-<parts>` form.
pub struct RollingChecksum {
    whole: md5::Context,
    parts: Vec<[u8; 16]>,
}

impl RollingChecksum {
    pub fn new() -> Self {
        Self {
            whole: md5::Context::new(),
            parts: Vec::new(),
        }
    }

    /// Feed the next chunk.
    pub fn update(&mut self, chunk: &[u8]) {
        self.whole.consume(chunk);
        self.parts.push(md5::compute(chunk).0);
    }

    /// Number of chunks fed so far.
    pub fn parts(&self) -> usize {
        self.parts.len()
    }

    pub fn finalize(self) -> LocalChecksum {
        let mut concatenated = Vec::with_capacity(self.parts.len() * 16);
        for part in &self.parts {
            concatenated.extend_from_slice(part);
        }
        LocalChecksum {
            whole: format!("{:x}", self.whole.compute()),
            parts_digest: format!("{:x}", md5::compute(&concatenated)),
            parts: self.parts.len() as u32,
        }
    }
}

impl Default for RollingChecksum {
    fn default() -> Self {
        Self::new()
    }
}

/// Digests computed from the bytes actually sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalChecksum {
    pub whole: String,
    pub parts_digest: String,
    pub parts: u32,
}

impl LocalChecksum {
    /// The local value in the same form as `reported`.
    pub fn expected_for(&self, reported: &Checksum) -> Checksum {
        match reported {
            Checksum::Md5 { .. } => Checksum::Md5 {
                digest: self.whole.clone(),
            },
            Checksum::Md5OfParts { .. } => Checksum::Md5OfParts {
                digest: self.parts_digest.clone(),
                parts: self.parts,
            },
        }
    }

    /// Compare with what the provider reported.
    ///
    /// # Errors
    /// - `IntegrityMismatch` if the provider's checksum differs
    pub fn verify(&self, reported: Option<&Checksum>) -> Result<()> {
        let Some(reported) = reported else {
            debug!("Provider reported no checksum; skipping verification");
            return Ok(());
        };

        let expected = self.expected_for(reported);
        if &expected == reported {
            Ok(())
        } else {
            Err(OperationError::IntegrityMismatch {
                expected: expected.to_string(),
                actual: reported.to_string(),
            }
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unistore_common::Error;

    #[test]
    fn test_whole_object_digest() {
        let mut rolling = RollingChecksum::new();
        rolling.update(b"hello ");
        rolling.update(b"world");
        let local = rolling.finalize();

        assert_eq!(local.whole, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(local.parts, 2);
        assert!(local
            .verify(Some(&Checksum::Md5 {
                digest: "5eb63bbbe01eeed093cb22bb8f5acdc3".to_string()
            }))
            .is_ok());
    }

    #[test]
    fn test_multipart_digest() {
        let mut rolling = RollingChecksum::new();
        rolling.update(b"hello ");
        rolling.update(b"world");
        let local = rolling.finalize();

        let mut concatenated = Vec::new();
        concatenated.extend_from_slice(&md5::compute(b"hello ").0);
        concatenated.extend_from_slice(&md5::compute(b"world").0);
        let digest = format!("{:x}", md5::compute(&concatenated));

        assert!(local
            .verify(Some(&Checksum::Md5OfParts { digest, parts: 2 }))
            .is_ok());
    }

    #[test]
    fn test_mismatch() {
        let mut rolling = RollingChecksum::new();
        rolling.update(b"payload");
        let local = rolling.finalize();

        let reported = Checksum::Md5 {
            digest: "00000000000000000000000000000000".to_string(),
        };
        let err = local.verify(Some(&reported)).unwrap_err();
        assert!(matches!(
            err,
            Error::Operation(OperationError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn test_part_count_mismatch() {
        let mut rolling = RollingChecksum::new();
        rolling.update(b"payload");
        let local = rolling.finalize();

        let reported = Checksum::Md5OfParts {
            digest: local.parts_digest.clone(),
            parts: 3,
        };
        assert!(local.verify(Some(&reported)).is_err());
    }

    #[test]
    fn test_missing_checksum_is_accepted() {
        let local = RollingChecksum::new().finalize();
        assert_eq!(local.whole, "d41d8cd98f00b204e9800998ecf8427e");
        assert!(local.verify(None).is_ok());
    }
}
