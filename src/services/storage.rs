use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use s3::creds::Credentials;
use s3::{Bucket, Region};
use uuid::Uuid;

/// S3-compatible object store holding uploaded answer audio.
///
/// Blobs are sealed with AES-256-GCM before upload and opened after
/// download; the stored object is nonce (12 bytes) || ciphertext. The
/// raw recording never touches the bucket.
pub struct AudioStore {
    bucket: Box<Bucket>,
    cipher: Aes256Gcm,
}

impl AudioStore {
    /// `key_base64` is the base64-encoded 32-byte encryption key.
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        key_base64: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        use base64::Engine;
        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(key_base64)
            .map_err(|_| StorageError::InvalidKey)?;
        if key_bytes.len() != 32 {
            return Err(StorageError::InvalidKey);
        }
        let cipher =
            Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| StorageError::InvalidKey)?;

        Ok(Self { bucket, cipher })
    }

    /// Canonical object key for a submission's audio blob.
    pub fn audio_object_key(request_id: Uuid) -> String {
        format!("audio/{request_id}.enc")
    }

    /// Encrypt and upload a raw audio blob.
    pub async fn store_audio(&self, key: &str, audio: &[u8]) -> Result<(), StorageError> {
        let sealed = seal(&self.cipher, audio)?;
        self.bucket
            .put_object_with_content_type(key, &sealed, "application/octet-stream")
            .await
            .map_err(StorageError::S3)?;
        Ok(())
    }

    /// Download and decrypt a stored audio blob.
    pub async fn load_audio(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket.get_object(key).await.map_err(StorageError::S3)?;
        open(&self.cipher, &response.to_vec())
    }

    /// Delete a stored audio object.
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.bucket.delete_object(key).await.map_err(StorageError::S3)?;
        Ok(())
    }
}

fn seal(cipher: &Aes256Gcm, plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| StorageError::Encrypt)?;

    let mut output = nonce.to_vec();
    output.extend(ciphertext);
    Ok(output)
}

fn open(cipher: &Aes256Gcm, data: &[u8]) -> Result<Vec<u8>, StorageError> {
    if data.len() < 12 {
        return Err(StorageError::Decrypt);
    }
    let (nonce_bytes, ciphertext) = data.split_at(12);
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher.decrypt(nonce, ciphertext).map_err(|_| StorageError::Decrypt)
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("Invalid encryption key (must be 32 bytes, base64-encoded)")]
    InvalidKey,

    #[error("Audio encryption failed")]
    Encrypt,

    #[error("Audio decryption failed")]
    Decrypt,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> Aes256Gcm {
        Aes256Gcm::new_from_slice(&[7u8; 32]).unwrap()
    }

    #[test]
    fn sealed_audio_opens_to_original() {
        let cipher = test_cipher();
        let audio = b"RIFFxxxxWAVEfake audio payload";
        let sealed = seal(&cipher, audio).unwrap();
        assert_ne!(&sealed[12..], audio.as_slice());
        assert_eq!(open(&cipher, &sealed).unwrap(), audio.to_vec());
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let cipher = test_cipher();
        assert!(open(&cipher, &[0u8; 7]).is_err());
    }

    #[test]
    fn audio_object_keys_are_per_request() {
        let id = Uuid::new_v4();
        assert_eq!(
            AudioStore::audio_object_key(id),
            format!("audio/{id}.enc")
        );
    }
}
