use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const NONCE_LEN: usize = 12;
const SECRET_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum KeyStoreError {
    #[error("Failed to access key store: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize key store: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Encryption failed: {0}")]
    Crypto(String),
    /// The keys file could not be decrypted. Either the secret material
    /// changed or the file was tampered with; there is no plaintext fallback.
    #[error("Key store is corrupted or the secret has changed: {0}")]
    Corrupted(String),
    #[error("No API key named '{0}'")]
    NotFound(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyEntry {
    pub key: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

/// Listing row that never exposes the key material itself.
#[derive(Debug, Clone, Serialize)]
pub struct KeyInfo {
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

/// Named API keys encrypted at rest with AES-256-GCM.
///
/// The symmetric secret is generated once into `.secret` next to the keys
/// file; `keys.json` holds base64(nonce || ciphertext) of the JSON entry map.
pub struct KeyStore {
    dir: PathBuf,
    secret: [u8; SECRET_LEN],
}

impl KeyStore {
    /// Open the store in `dir`, generating secret material on first use.
    pub fn open(dir: &Path) -> Result<Self, KeyStoreError> {
        std::fs::create_dir_all(dir)?;
        let secret = Self::load_or_create_secret(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            secret,
        })
    }

    fn keys_path(&self) -> PathBuf {
        self.dir.join("keys.json")
    }

    fn secret_path(dir: &Path) -> PathBuf {
        dir.join(".secret")
    }

    fn load_or_create_secret(dir: &Path) -> Result<[u8; SECRET_LEN], KeyStoreError> {
        let path = Self::secret_path(dir);
        if path.exists() {
            let encoded = std::fs::read_to_string(&path)?;
            let bytes = BASE64
                .decode(encoded.trim())
                .map_err(|e| KeyStoreError::Corrupted(format!("bad secret encoding: {}", e)))?;
            let secret: [u8; SECRET_LEN] = bytes
                .try_into()
                .map_err(|_| KeyStoreError::Corrupted("secret has wrong length".to_string()))?;
            return Ok(secret);
        }

        let mut secret = [0u8; SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut secret);
        std::fs::write(&path, BASE64.encode(secret))?;
        restrict_permissions(&path);
        debug!(path = %path.display(), "Generated key store secret");
        Ok(secret)
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<String, KeyStoreError> {
        let cipher = Aes256Gcm::new_from_slice(&self.secret)
            .map_err(|e| KeyStoreError::Crypto(format!("failed to create cipher: {}", e)))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| KeyStoreError::Crypto(format!("encryption failed: {}", e)))?;

        let mut blob = nonce_bytes.to_vec();
        blob.extend(ciphertext);
        Ok(BASE64.encode(blob))
    }

    fn decrypt(&self, encoded: &str) -> Result<Vec<u8>, KeyStoreError> {
        let blob = BASE64
            .decode(encoded.trim())
            .map_err(|e| KeyStoreError::Corrupted(format!("bad base64: {}", e)))?;
        if blob.len() < NONCE_LEN {
            return Err(KeyStoreError::Corrupted("blob too short".to_string()));
        }

        let cipher = Aes256Gcm::new_from_slice(&self.secret)
            .map_err(|e| KeyStoreError::Crypto(format!("failed to create cipher: {}", e)))?;

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| {
                KeyStoreError::Corrupted("authentication failed during decryption".to_string())
            })
    }

    fn load_entries(&self) -> Result<HashMap<String, KeyEntry>, KeyStoreError> {
        let path = self.keys_path();
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let encoded = std::fs::read_to_string(&path)?;
        let plaintext = self.decrypt(&encoded)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    fn save_entries(&self, entries: &HashMap<String, KeyEntry>) -> Result<(), KeyStoreError> {
        let plaintext = serde_json::to_vec(entries)?;
        let encoded = self.encrypt(&plaintext)?;
        let path = self.keys_path();
        std::fs::write(&path, encoded)?;
        restrict_permissions(&path);
        Ok(())
    }

    /// Store a named key, replacing any existing entry with the same name.
    pub fn add(&self, name: &str, key: &str) -> Result<(), KeyStoreError> {
        let mut entries = self.load_entries()?;
        entries.insert(
            name.to_string(),
            KeyEntry {
                key: key.to_string(),
                created_at: Utc::now(),
                last_used: None,
            },
        );
        self.save_entries(&entries)
    }

    /// Remove a named key. Returns false if no such key existed.
    pub fn remove(&self, name: &str) -> Result<bool, KeyStoreError> {
        let mut entries = self.load_entries()?;
        let removed = entries.remove(name).is_some();
        if removed {
            self.save_entries(&entries)?;
        }
        Ok(removed)
    }

    pub fn get(&self, name: &str) -> Result<KeyEntry, KeyStoreError> {
        self.load_entries()?
            .remove(name)
            .ok_or_else(|| KeyStoreError::NotFound(name.to_string()))
    }

    /// List key names and timestamps, sorted by name. Key material stays out.
    pub fn list(&self) -> Result<Vec<KeyInfo>, KeyStoreError> {
        let mut infos: Vec<KeyInfo> = self
            .load_entries()?
            .into_iter()
            .map(|(name, entry)| KeyInfo {
                name,
                created_at: entry.created_at,
                last_used: entry.last_used,
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    /// Record that a named key was just used.
    pub fn touch(&self, name: &str) -> Result<(), KeyStoreError> {
        let mut entries = self.load_entries()?;
        if let Some(entry) = entries.get_mut(name) {
            entry.last_used = Some(Utc::now());
            self.save_entries(&entries)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();
        store.add("work", "sk-or-v1-abc123").unwrap();
        let entry = store.get("work").unwrap();
        assert_eq!(entry.key, "sk-or-v1-abc123");
        assert!(entry.last_used.is_none());
    }

    #[test]
    fn get_unknown_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();
        let err = store.get("missing").unwrap_err();
        assert!(matches!(err, KeyStoreError::NotFound(_)));
    }

    #[test]
    fn remove_existing_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();
        store.add("work", "sk-1").unwrap();
        assert!(store.remove("work").unwrap());
        assert!(!store.remove("work").unwrap());
    }

    #[test]
    fn list_is_sorted_and_hides_key_material() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();
        store.add("zeta", "sk-z").unwrap();
        store.add("alpha", "sk-a").unwrap();
        let infos = store.list().unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].name, "alpha");
        assert_eq!(infos[1].name, "zeta");
        let json = serde_json::to_string(&infos).unwrap();
        assert!(!json.contains("sk-a"));
        assert!(!json.contains("sk-z"));
    }

    #[test]
    fn touch_updates_last_used() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();
        store.add("work", "sk-1").unwrap();
        store.touch("work").unwrap();
        let entry = store.get("work").unwrap();
        assert!(entry.last_used.is_some());
    }

    #[test]
    fn secret_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = KeyStore::open(dir.path()).unwrap();
            store.add("work", "sk-1").unwrap();
        }
        let reopened = KeyStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get("work").unwrap().key, "sk-1");
    }

    #[test]
    fn keys_file_is_not_plaintext_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();
        store.add("work", "sk-or-v1-supersecret").unwrap();
        let raw = std::fs::read_to_string(dir.path().join("keys.json")).unwrap();
        assert!(!raw.contains("supersecret"));
    }

    #[test]
    fn tampered_file_reports_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();
        store.add("work", "sk-1").unwrap();
        std::fs::write(dir.path().join("keys.json"), "bm90IHJlYWwgY2lwaGVydGV4dA==").unwrap();
        let err = store.load_entries().unwrap_err();
        assert!(matches!(err, KeyStoreError::Corrupted(_)));
    }

    #[test]
    fn changed_secret_reports_corruption() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = KeyStore::open(dir.path()).unwrap();
            store.add("work", "sk-1").unwrap();
        }
        // Replace the secret material out from under the store
        let mut other = [0u8; SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut other);
        std::fs::write(dir.path().join(".secret"), BASE64.encode(other)).unwrap();

        let reopened = KeyStore::open(dir.path()).unwrap();
        let err = reopened.get("work").unwrap_err();
        assert!(matches!(err, KeyStoreError::Corrupted(_)));
    }
}
