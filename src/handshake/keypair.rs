//! Local RSA identity used for the handshake.
//!
//! Generated once and kept as `public.pem` / `private.pem` in the key
//! directory. The directory is owner-only (0700), the files 0600, and files
//! are created exclusively so an existing key is never overwritten.

use std::path::{Path, PathBuf};

use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::RsaPrivateKey;
use tokio::io::AsyncWriteExt;
use tracing::info;

use super::HandshakeError;
use crate::crypto::rsa_keys::parse_private_key;

pub const PUBLIC_KEY_FILE: &str = "public.pem";
pub const PRIVATE_KEY_FILE: &str = "private.pem";

/// Default RSA modulus size
pub const DEFAULT_MODULUS_BITS: usize = 2048;

const KEY_DIR_MODE: u32 = 0o700;
const KEY_FILE_MODE: u32 = 0o600;

/// Loaded key pair.
#[derive(Clone)]
pub struct LocalKeyPair {
    pub public_pem: String,
    pub private_key: RsaPrivateKey,
}

impl std::fmt::Debug for LocalKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeyPair")
            .field("public_pem", &self.public_pem)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct KeyPairStore {
    dir: PathBuf,
    modulus_bits: usize,
}

impl KeyPairStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            modulus_bits: DEFAULT_MODULUS_BITS,
        }
    }

    pub fn with_modulus_bits(mut self, bits: usize) -> Self {
        self.modulus_bits = bits;
        self
    }

    /// Load the existing key pair, or generate and persist a new one when
    /// either file is missing.
    pub async fn load_or_generate(&self) -> Result<LocalKeyPair, HandshakeError> {
        self.ensure_dir().await?;

        let public_path = self.dir.join(PUBLIC_KEY_FILE);
        let private_path = self.dir.join(PRIVATE_KEY_FILE);

        let existing = tokio::try_join!(
            tokio::fs::read_to_string(&public_path),
            tokio::fs::read_to_string(&private_path)
        );

        match existing {
            Ok((public_pem, private_pem)) => {
                let private_key = parse_private_key(&private_pem)?;
                Ok(LocalKeyPair {
                    public_pem,
                    private_key,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.generate().await,
            Err(e) => Err(e.into()),
        }
    }

    async fn generate(&self) -> Result<LocalKeyPair, HandshakeError> {
        let bits = self.modulus_bits;
        let private_key = tokio::task::spawn_blocking(move || {
            RsaPrivateKey::new(&mut rand::rngs::OsRng, bits)
        })
        .await
        .map_err(|e| HandshakeError::KeyPair(e.to_string()))?
        .map_err(|e| HandshakeError::KeyPair(e.to_string()))?;

        let public_pem = private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| HandshakeError::KeyPair(e.to_string()))?;
        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| HandshakeError::KeyPair(e.to_string()))?;

        let public_path = self.dir.join(PUBLIC_KEY_FILE);
        let private_path = self.dir.join(PRIVATE_KEY_FILE);
        tokio::try_join!(
            write_key_file(&public_path, public_pem.as_bytes()),
            write_key_file(&private_path, private_pem.as_bytes())
        )?;

        info!(dir = %self.dir.display(), bits = bits, "Generated handshake key pair");

        Ok(LocalKeyPair {
            public_pem,
            private_key,
        })
    }

    async fn ensure_dir(&self) -> Result<(), HandshakeError> {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(KEY_DIR_MODE);
        builder.create(&self.dir).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = tokio::fs::metadata(&self.dir).await?.permissions().mode();
            if mode & 0o777 != KEY_DIR_MODE {
                tokio::fs::set_permissions(
                    &self.dir,
                    std::fs::Permissions::from_mode(KEY_DIR_MODE),
                )
                .await?;
            }
        }
        Ok(())
    }
}

async fn write_key_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(KEY_FILE_MODE);

    let mut file = options.open(path).await?;
    file.write_all(content).await?;
    file.sync_all().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::rsa_keys::test_support::{test_private_pem, test_public_pem};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_loads_existing_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(PUBLIC_KEY_FILE), test_public_pem()).unwrap();
        std::fs::write(dir.path().join(PRIVATE_KEY_FILE), test_private_pem()).unwrap();

        let pair = KeyPairStore::new(dir.path()).load_or_generate().await.unwrap();
        assert_eq!(pair.public_pem, test_public_pem());
    }

    #[tokio::test]
    async fn test_generates_once_and_reuses() {
        let dir = TempDir::new().unwrap();
        let key_dir = dir.path().join("keys");
        let store = KeyPairStore::new(&key_dir).with_modulus_bits(1024);

        let first = store.load_or_generate().await.unwrap();
        let second = store.load_or_generate().await.unwrap();
        assert_eq!(first.public_pem, second.public_pem);
        assert!(first.public_pem.starts_with("-----BEGIN PUBLIC KEY-----"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let key_dir = dir.path().join("keys");
        KeyPairStore::new(&key_dir)
            .with_modulus_bits(1024)
            .load_or_generate()
            .await
            .unwrap();

        let dir_mode = std::fs::metadata(&key_dir).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700);
        for file in [PUBLIC_KEY_FILE, PRIVATE_KEY_FILE] {
            let mode = std::fs::metadata(key_dir.join(file)).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_partial_pair_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(PUBLIC_KEY_FILE), test_public_pem()).unwrap();

        let err = KeyPairStore::new(dir.path())
            .with_modulus_bits(1024)
            .load_or_generate()
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::Io(_)));
        assert_eq!(
            std::fs::read_to_string(dir.path().join(PUBLIC_KEY_FILE)).unwrap(),
            test_public_pem()
        );
    }
}
