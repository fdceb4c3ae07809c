// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Identity service: orchestrates fingerprint validation, key derivation,
// encryption and persistence.
//
// Hash acquisition walks:
//   START -> CHECK_STORE_CONNECTION -> CHECK_EXISTING_HASH
//     -> found:   RETURN
//     -> missing: VALIDATE_FINGERPRINT -> GENERATE_AND_ENCRYPT -> PERSIST -> RETURN
// Any failure aborts, is reported as `hash_error`, and the original error is
// returned unchanged.
//
// PBKDF2 and AES run on the blocking pool; the engine itself holds no
// mutable state, so concurrent requests share one `Arc<CryptoEngine>`.

use std::path::Path;
use std::sync::Arc;

use devid_bridge::FingerprintSupplier;
use devid_core::config::IdentityConfig;
use devid_core::error::{CryptoError, DevIdError, Result, ServiceError, StoreError, ValidationError};
use devid_core::types::{DeviceFingerprint, HashRecord, IV_LENGTH, KeyMetadata, SALT_LENGTH, now_millis};
use devid_core::validation::validate;
use devid_security::crypto::{CryptoEngine, KeySeed, decode_transport, encode_transport};
use devid_security::integrity::{DeviceMetadata, unique_hash};
use devid_security::store::LocalStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::events::{EventSink, IdentityEvent, Operation, Stage};

/// Cross-device transfer form of a device hash: the encrypted fingerprint
/// as a base64 `IV ‖ ciphertext` blob, plus the key metadata shipped
/// alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferBundle {
    pub blob: String,
    pub key: KeyMetadata,
}

pub struct IdentityService {
    store: Arc<LocalStore>,
    crypto: Arc<CryptoEngine>,
    supplier: Arc<dyn FingerprintSupplier>,
    sink: Arc<dyn EventSink>,
}

impl IdentityService {
    pub fn new(
        store: Arc<LocalStore>,
        crypto: Arc<CryptoEngine>,
        supplier: Arc<dyn FingerprintSupplier>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            crypto,
            supplier,
            sink,
        }
    }

    /// Service over the process-wide store for `data_dir`.  Every service
    /// opened on the same directory shares one store handle.
    pub fn open(
        data_dir: &Path,
        config: IdentityConfig,
        supplier: Arc<dyn FingerprintSupplier>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let crypto = CryptoEngine::from_config(&config)?;
        let store = LocalStore::shared(data_dir.join(&config.database_name), config);
        Ok(Self::new(store, Arc::new(crypto), supplier, sink))
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Return the stored device hash, generating and persisting one if the
    /// store holds none.
    #[instrument(skip_all)]
    pub async fn get_or_create_hash(&self) -> Result<String> {
        let result = self.acquire_hash().await;
        self.report(Operation::GetOrCreate, result)
    }

    /// Decrypt the payload stored for `hash` and return the fingerprint JSON
    /// it holds.  The key is re-derived from a fresh fingerprint read.
    #[instrument(skip_all, fields(hash = %hash))]
    pub async fn decrypt_own_hash(&self, hash: &str) -> Result<String> {
        let result = self.open_own(hash).await.inspect(|_| {
            self.emit(IdentityEvent::HashDecrypt {
                operation: Operation::DecryptOwn,
                hash: Some(hash.to_owned()),
            });
        });
        self.report(Operation::DecryptOwn, result)
    }

    /// Decrypt a transport blob produced by another instance, given the key
    /// metadata it was shipped with.
    #[instrument(skip_all, fields(blob_len = encrypted.len()))]
    pub async fn decrypt_cross_device_hash(
        &self,
        encrypted: &str,
        metadata: &KeyMetadata,
    ) -> Result<String> {
        let result = self.open_cross_device(encrypted, metadata).await.inspect(|_| {
            self.emit(IdentityEvent::HashDecrypt {
                operation: Operation::DecryptCrossDevice,
                hash: None,
            });
        });
        self.report(Operation::DecryptCrossDevice, result)
    }

    /// Re-encrypt the fingerprint stored for `hash` under a cross-device
    /// key, producing a bundle another instance on the same physical device
    /// can open with [`decrypt_cross_device_hash`](Self::decrypt_cross_device_hash).
    #[instrument(skip_all, fields(hash = %hash))]
    pub async fn export_for_transfer(&self, hash: &str) -> Result<TransferBundle> {
        let result = self.seal_for_transfer(hash).await.inspect(|_| {
            self.emit(IdentityEvent::HashExport {
                hash: hash.to_owned(),
            });
        });
        self.report(Operation::ExportForTransfer, result)
    }

    /// Remove every record older than the configured maximum age.
    #[instrument(skip_all)]
    pub async fn evict_stale(&self) -> Result<usize> {
        let max_age_ms = self.store.config().max_age_ms;
        let result = self
            .store
            .evict_older_than(max_age_ms, now_millis())
            .await
            .map_err(DevIdError::from)
            .inspect(|removed| {
                self.emit(IdentityEvent::HashEvict { removed: *removed });
            });
        self.report(Operation::EvictStale, result)
    }

    async fn acquire_hash(&self) -> Result<String> {
        let op = Operation::GetOrCreate;
        self.stage(op, Stage::Start);

        self.stage(op, Stage::CheckStoreConnection);
        self.ensure_connected().await?;

        self.stage(op, Stage::CheckExistingHash);
        let sentinel = self.store.config().store_name.clone();
        if let Some(latest) = self.store.get_latest().await? {
            if !latest.hash.is_empty() && latest.hash != sentinel {
                debug!(hash = %latest.hash, "existing device hash found");
                self.emit(IdentityEvent::HashAssign {
                    hash: latest.hash.clone(),
                });
                self.stage(op, Stage::Return);
                return Ok(latest.hash);
            }
        }

        self.stage(op, Stage::ValidateFingerprint);
        let fingerprint = self.fresh_fingerprint(op)?;

        self.stage(op, Stage::GenerateAndEncrypt);
        let (hash, payload) = self
            .blocking(CryptoError::EncryptionFailed, move |crypto| {
                let salt = crypto.random_block()?;
                let timestamp = now_millis();
                let seed = KeySeed::OwnDevice {
                    device_info: &fingerprint,
                    salt: &salt,
                    timestamp,
                    version: crypto.version(),
                };
                let key = crypto.derive_key(&seed, &salt)?;
                let plaintext = fingerprint.canonical_json()?;
                let mut payload = crypto.encrypt(plaintext.as_bytes(), &key, Some(&salt[..]))?;
                // The stored timestamp is the one folded into the seed.
                payload.timestamp = timestamp;

                let hash = unique_hash(&DeviceMetadata {
                    device_info: &fingerprint,
                    salt: &payload.salt,
                    iv: &payload.iv,
                    version: &payload.version,
                })?;
                Ok((hash, payload))
            })
            .await?;

        self.stage(op, Stage::Persist);
        self.store.put(HashRecord::with_payload(&hash, &payload)).await?;
        self.store
            .put(HashRecord::pointer(&sentinel, &hash, now_millis()))
            .await?;

        info!(hash = %hash, "device hash generated");
        self.emit(IdentityEvent::HashSet {
            hash: hash.clone(),
            timestamp: payload.timestamp,
        });
        self.stage(op, Stage::Return);
        Ok(hash)
    }

    async fn open_own(&self, hash: &str) -> Result<String> {
        if hash.trim().is_empty() {
            return Err(ValidationError::EmptyHash.into());
        }
        self.ensure_connected().await?;

        let record = self
            .store
            .get_by_id(hash)
            .await?
            .ok_or_else(|| StoreError::NotFound(hash.to_owned()))?;
        let payload = record.payload()?;
        let fingerprint = self.fresh_fingerprint(Operation::DecryptOwn)?;

        let plaintext = self
            .blocking(CryptoError::DecryptionFailed, move |crypto| {
                let seed = KeySeed::OwnDevice {
                    device_info: &fingerprint,
                    salt: &payload.salt,
                    timestamp: payload.timestamp,
                    version: &payload.version,
                };
                let key = crypto.derive_key(&seed, &payload.salt)?;
                Ok(crypto.decrypt(&payload.combined(), &key)?)
            })
            .await?;

        into_text(plaintext)
    }

    async fn open_cross_device(&self, encrypted: &str, metadata: &KeyMetadata) -> Result<String> {
        if encrypted.trim().is_empty() {
            return Err(ValidationError::EmptyHash.into());
        }
        metadata.validate()?;

        let combined = decode_transport(encrypted)?;
        if combined.len() > IV_LENGTH && combined[..IV_LENGTH] != metadata.iv[..] {
            return Err(ValidationError::InvalidEncryptedData(
                "blob iv does not match key metadata".into(),
            )
            .into());
        }
        let salt: [u8; SALT_LENGTH] = metadata
            .salt
            .as_slice()
            .try_into()
            .map_err(|_| ValidationError::InvalidMetadata("salt must be 16 bytes".into()))?;

        let fingerprint = self.fresh_fingerprint(Operation::DecryptCrossDevice)?;
        let iv = metadata.iv.clone();
        let version = metadata.version.clone();

        let plaintext = self
            .blocking(CryptoError::DecryptionFailed, move |crypto| {
                let seed = KeySeed::CrossDevice {
                    device_info: &fingerprint,
                    original_salt: &salt,
                    original_iv: &iv,
                    version: &version,
                };
                let key = crypto.derive_key(&seed, &salt)?;
                Ok(crypto.decrypt(&combined, &key)?)
            })
            .await?;

        into_text(plaintext)
    }

    async fn seal_for_transfer(&self, hash: &str) -> Result<TransferBundle> {
        let plaintext = self.open_own(hash).await?;
        let fingerprint = self.fresh_fingerprint(Operation::ExportForTransfer)?;

        self.blocking(CryptoError::EncryptionFailed, move |crypto| {
            let material = crypto.generate_key_material()?;
            debug!(
                iterations = material.iterations,
                digest = material.digest,
                "transfer key material generated"
            );
            let seed = KeySeed::CrossDevice {
                device_info: &fingerprint,
                original_salt: &material.salt,
                original_iv: &material.iv,
                version: &material.version,
            };
            let key = crypto.derive_key(&seed, &material.salt)?;
            let payload = crypto.encrypt_with_material(plaintext.as_bytes(), &key, &material)?;

            Ok(TransferBundle {
                blob: encode_transport(&payload.combined()),
                key: KeyMetadata {
                    salt: payload.salt.to_vec(),
                    iv: payload.iv.to_vec(),
                    version: payload.version,
                    timestamp: payload.timestamp,
                },
            })
        })
        .await
    }

    /// Re-open the store if it was closed.  A store that cannot be opened at
    /// all is reported as not initialized.
    async fn ensure_connected(&self) -> Result<()> {
        if self.store.is_connected() {
            return Ok(());
        }
        debug!("store not connected, initializing");
        self.store.init().await.map_err(|e| match e {
            StoreError::InitializationFailed(reason) => {
                DevIdError::from(ServiceError::DatabaseNotInitialized(reason))
            }
            other => other.into(),
        })?;
        if !self.store.is_connected() {
            return Err(ServiceError::DatabaseNotConnected.into());
        }
        Ok(())
    }

    fn fresh_fingerprint(&self, operation: Operation) -> Result<DeviceFingerprint> {
        let fingerprint = self.supplier.fingerprint()?;
        let report = validate(&fingerprint);
        self.emit(IdentityEvent::HashValidate {
            operation,
            is_valid: report.is_valid,
            missing: report.missing_required(),
        });
        report.into_result()?;
        Ok(fingerprint)
    }

    /// Run `f` on the blocking pool.  A task that dies without returning is
    /// reported through `failed`, so decrypt paths surface as decryption
    /// failures.
    async fn blocking<T, F>(&self, failed: fn(String) -> CryptoError, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&CryptoEngine) -> Result<T> + Send + 'static,
    {
        let crypto = Arc::clone(&self.crypto);
        tokio::task::spawn_blocking(move || f(&crypto))
            .await
            .map_err(|e| failed(format!("crypto task failed: {e}")))?
    }

    fn stage(&self, operation: Operation, stage: Stage) {
        self.emit(IdentityEvent::Transition { operation, stage });
    }

    fn emit(&self, event: IdentityEvent) {
        if let Err(e) = self.sink.emit(&event) {
            warn!(event = event.name(), error = %e, "event sink rejected event");
        }
    }

    /// Report a failed operation and hand the result back untouched.
    fn report<T>(&self, operation: Operation, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            error!(
                op = operation.as_str(),
                code = e.code(),
                store_op = e.store_op().map(|op| op.as_str()),
                error = %e,
                "identity operation failed"
            );
            self.emit(IdentityEvent::HashError {
                operation,
                code: e.code(),
                message: e.to_string(),
                timestamp: now_millis(),
            });
            if operation == Operation::GetOrCreate {
                self.stage(operation, Stage::Error);
            }
        }
        result
    }
}

fn into_text(plaintext: Vec<u8>) -> Result<String> {
    if plaintext.is_empty() {
        return Err(CryptoError::EmptyDecryption.into());
    }
    String::from_utf8(plaintext).map_err(|_| {
        DevIdError::from(CryptoError::DecryptionFailed(
            "plaintext is not valid UTF-8".into(),
        ))
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use aes::Aes256;
    use cbc::cipher::block_padding::Pkcs7;
    use cbc::cipher::{BlockEncryptMut, KeyIvInit};
    use devid_bridge::StaticFingerprint;
    use devid_core::types::EncryptedPayload;
    use devid_security::store::StoreLocation;

    use super::*;
    use crate::events::NullSink;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<IdentityEvent>>,
        fail: bool,
    }

    impl RecordingSink {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        fn names(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().iter().map(|e| e.name()).collect()
        }

        fn count(&self, name: &str) -> usize {
            self.names().into_iter().filter(|n| *n == name).count()
        }
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: &IdentityEvent) -> Result<()> {
            self.events.lock().unwrap().push(event.clone());
            if self.fail {
                return Err(ServiceError::DatabaseNotConnected.into());
            }
            Ok(())
        }
    }

    fn fingerprint() -> DeviceFingerprint {
        DeviceFingerprint {
            platform: "Win32".into(),
            user_agent: "UA".into(),
            language: "en-US".into(),
            screen_resolution: "1920x1080".into(),
            color_depth: Some(24),
            pixel_ratio: Some(1.0),
            hardware_concurrency: Some(8),
            ..Default::default()
        }
    }

    fn engine() -> Arc<CryptoEngine> {
        Arc::new(CryptoEngine::new(1_000, "1.0").unwrap())
    }

    fn service_with(
        store: LocalStore,
        fp: DeviceFingerprint,
        sink: Arc<dyn EventSink>,
    ) -> IdentityService {
        IdentityService::new(
            Arc::new(store),
            engine(),
            Arc::new(StaticFingerprint::new(fp)),
            sink,
        )
    }

    fn service(fp: DeviceFingerprint) -> (IdentityService, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let svc = service_with(
            LocalStore::in_memory(IdentityConfig::default()),
            fp,
            sink.clone(),
        );
        (svc, sink)
    }

    #[tokio::test]
    async fn fresh_store_generates_and_persists_hash() {
        let (svc, _) = service(fingerprint());
        let hash = svc.get_or_create_hash().await.unwrap();

        assert!(!hash.is_empty());
        assert_eq!(decode_transport(&hash).unwrap().len(), 32);

        let record = svc.store().get_by_id(&hash).await.unwrap().unwrap();
        assert_eq!(record.hash, hash);
        assert_eq!(record.iv.as_ref().map(Vec::len), Some(16));
        assert_eq!(record.salt.as_ref().map(Vec::len), Some(16));

        let pointer = svc.store().get_by_id("deviceId").await.unwrap().unwrap();
        assert_eq!(pointer.hash, hash);
        assert!(pointer.data.is_none());
    }

    #[tokio::test]
    async fn second_call_returns_cached_hash() {
        let (svc, sink) = service(fingerprint());
        let first = svc.get_or_create_hash().await.unwrap();
        let second = svc.get_or_create_hash().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(sink.count("hash_set"), 1);
        assert_eq!(sink.count("hash_assign"), 1);
        assert_eq!(sink.count("hash_validate"), 1);
        assert_eq!(svc.store().count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn acquisition_walks_every_stage() {
        let (svc, sink) = service(fingerprint());
        svc.get_or_create_hash().await.unwrap();

        let stages: Vec<Stage> = sink
            .events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                IdentityEvent::Transition { stage, .. } => Some(*stage),
                _ => None,
            })
            .collect();
        assert_eq!(
            stages,
            vec![
                Stage::Start,
                Stage::CheckStoreConnection,
                Stage::CheckExistingHash,
                Stage::ValidateFingerprint,
                Stage::GenerateAndEncrypt,
                Stage::Persist,
                Stage::Return,
            ]
        );
    }

    #[tokio::test]
    async fn sentinel_hash_is_not_returned() {
        let (svc, _) = service(fingerprint());
        svc.store()
            .put(HashRecord::pointer("deviceId", "deviceId", now_millis()))
            .await
            .unwrap();

        let hash = svc.get_or_create_hash().await.unwrap();
        assert_ne!(hash, "deviceId");
    }

    #[tokio::test]
    async fn invalid_fingerprint_is_rejected_before_encryption() {
        let fp = DeviceFingerprint {
            hardware_concurrency: Some(0),
            ..fingerprint()
        };
        let (svc, sink) = service(fp);

        let err = svc.get_or_create_hash().await.unwrap_err();
        assert!(matches!(
            err,
            DevIdError::Validation(ValidationError::InvalidDeviceInfo { .. })
        ));
        assert_eq!(svc.store().count().await.unwrap(), 0);

        let events = sink.events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            IdentityEvent::HashError { code: "INVALID_DEVICE_INFO", operation: Operation::GetOrCreate, .. }
        )));
        assert!(!events.iter().any(|e| matches!(
            e,
            IdentityEvent::Transition { stage: Stage::GenerateAndEncrypt, .. }
        )));
    }

    #[tokio::test]
    async fn own_hash_decrypts_to_fingerprint_json() {
        let (svc, sink) = service(fingerprint());
        let hash = svc.get_or_create_hash().await.unwrap();

        let plaintext = svc.decrypt_own_hash(&hash).await.unwrap();
        assert_eq!(plaintext, fingerprint().canonical_json().unwrap());
        assert_eq!(sink.count("hash_decrypt"), 1);
    }

    #[tokio::test]
    async fn own_hash_does_not_open_for_another_device() {
        let store = Arc::new(LocalStore::in_memory(IdentityConfig::default()));
        let original = IdentityService::new(
            Arc::clone(&store),
            engine(),
            Arc::new(StaticFingerprint::new(fingerprint())),
            Arc::new(NullSink),
        );
        let hash = original.get_or_create_hash().await.unwrap();

        let other = IdentityService::new(
            store,
            engine(),
            Arc::new(StaticFingerprint::new(DeviceFingerprint {
                platform: "MacIntel".into(),
                ..fingerprint()
            })),
            Arc::new(NullSink),
        );
        let err = other.decrypt_own_hash(&hash).await.unwrap_err();
        assert!(matches!(err, DevIdError::Crypto(CryptoError::DecryptionFailed(_))));
    }

    #[tokio::test]
    async fn padding_only_payload_is_an_empty_decryption() {
        let (svc, sink) = service(fingerprint());
        let crypto = engine();
        let salt = [7u8; SALT_LENGTH];
        let iv = [3u8; IV_LENGTH];
        let timestamp = 1_700_000_000_000;

        let fp = fingerprint();
        let seed = KeySeed::OwnDevice {
            device_info: &fp,
            salt: &salt,
            timestamp,
            version: "1.0",
        };
        let key = crypto.derive_key(&seed, &salt).unwrap();
        // Empty plaintext encrypts to one block of pure PKCS#7 padding.
        let ciphertext = cbc::Encryptor::<Aes256>::new_from_slices(key.as_bytes(), &iv)
            .unwrap()
            .encrypt_padded_vec_mut::<Pkcs7>(b"");
        assert_eq!(ciphertext.len(), 16);

        let payload = EncryptedPayload {
            ciphertext,
            iv,
            salt,
            version: "1.0".into(),
            timestamp,
        };
        svc.store()
            .put(HashRecord::with_payload("padding", &payload))
            .await
            .unwrap();

        let err = svc.decrypt_own_hash("padding").await.unwrap_err();
        assert!(matches!(err, DevIdError::Crypto(CryptoError::EmptyDecryption)));
        assert_eq!(err.code(), "EMPTY_DECRYPTION");
        assert_eq!(sink.count("hash_decrypt"), 0);
        assert_eq!(sink.count("hash_error"), 1);
    }

    #[tokio::test]
    async fn crashed_decrypt_task_reports_decryption_failure() {
        let (svc, _) = service(fingerprint());
        let err = svc
            .blocking::<(), _>(CryptoError::DecryptionFailed, |_| panic!("worker died"))
            .await
            .unwrap_err();
        assert!(matches!(err, DevIdError::Crypto(CryptoError::DecryptionFailed(_))));

        let err = svc
            .blocking::<(), _>(CryptoError::EncryptionFailed, |_| panic!("worker died"))
            .await
            .unwrap_err();
        assert!(matches!(err, DevIdError::Crypto(CryptoError::EncryptionFailed(_))));
    }

    #[tokio::test]
    async fn unopenable_store_is_not_initialized() {
        let config = IdentityConfig {
            store_name: "bad name".into(),
            ..IdentityConfig::default()
        };
        let svc = service_with(LocalStore::in_memory(config), fingerprint(), Arc::new(NullSink));

        let err = svc.get_or_create_hash().await.unwrap_err();
        assert!(matches!(
            err,
            DevIdError::Service(ServiceError::DatabaseNotInitialized(_))
        ));
        assert_eq!(err.code(), "DB_NOT_INIT");
    }

    #[tokio::test]
    async fn unknown_hash_is_not_found() {
        let (svc, _) = service(fingerprint());
        let err = svc.decrypt_own_hash("bm9wZQ==").await.unwrap_err();
        assert!(matches!(err, DevIdError::Store(StoreError::NotFound(_))));
        assert_eq!(err.code(), "DB_NOT_FOUND");
    }

    #[tokio::test]
    async fn empty_cross_device_hash_fails_before_any_crypto() {
        let (svc, sink) = service(fingerprint());
        let metadata = KeyMetadata {
            salt: vec![],
            iv: vec![],
            version: String::new(),
            timestamp: 0,
        };

        for blob in ["", "   "] {
            let err = svc.decrypt_cross_device_hash(blob, &metadata).await.unwrap_err();
            assert!(matches!(err, DevIdError::Validation(ValidationError::EmptyHash)));
        }
        assert_eq!(sink.count("hash_validate"), 0);
        assert_eq!(sink.count("hash_error"), 2);
    }

    #[tokio::test]
    async fn malformed_metadata_is_rejected() {
        let (svc, _) = service(fingerprint());
        let metadata = KeyMetadata {
            salt: vec![1, 2, 3],
            iv: vec![0; 16],
            version: "1.0".into(),
            timestamp: 1,
        };
        let err = svc
            .decrypt_cross_device_hash("AAAA", &metadata)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DevIdError::Validation(ValidationError::InvalidMetadata(_))
        ));
    }

    #[tokio::test]
    async fn exported_bundle_opens_on_second_instance() {
        let (exporter, _) = service(fingerprint());
        let hash = exporter.get_or_create_hash().await.unwrap();
        let bundle = exporter.export_for_transfer(&hash).await.unwrap();
        assert_eq!(bundle.key.salt.len(), 16);
        assert_eq!(bundle.key.iv.len(), 16);

        // Separate store, same physical device.
        let (importer, sink) = service(fingerprint());
        let plaintext = importer
            .decrypt_cross_device_hash(&bundle.blob, &bundle.key)
            .await
            .unwrap();
        assert_eq!(plaintext, fingerprint().canonical_json().unwrap());
        assert_eq!(sink.count("hash_decrypt"), 1);
    }

    #[tokio::test]
    async fn exported_bundle_rejects_tampered_iv() {
        let (svc, _) = service(fingerprint());
        let hash = svc.get_or_create_hash().await.unwrap();
        let mut bundle = svc.export_for_transfer(&hash).await.unwrap();
        bundle.key.iv[0] ^= 0xFF;

        let err = svc
            .decrypt_cross_device_hash(&bundle.blob, &bundle.key)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DevIdError::Validation(ValidationError::InvalidEncryptedData(_))
        ));
    }

    #[tokio::test]
    async fn failing_sink_never_masks_results() {
        let sink = Arc::new(RecordingSink::failing());
        let svc = service_with(
            LocalStore::in_memory(IdentityConfig::default()),
            fingerprint(),
            sink.clone(),
        );
        let hash = svc.get_or_create_hash().await.unwrap();
        assert!(!hash.is_empty());

        let err = svc.decrypt_own_hash("").await.unwrap_err();
        assert!(matches!(err, DevIdError::Validation(ValidationError::EmptyHash)));
        assert_eq!(sink.count("hash_error"), 1);
    }

    #[tokio::test]
    async fn hash_survives_store_close() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(
            StoreLocation::File(dir.path().join("deviceIdDB.sqlite3")),
            IdentityConfig::default(),
        );
        let svc = service_with(store, fingerprint(), Arc::new(NullSink));

        let first = svc.get_or_create_hash().await.unwrap();
        svc.store().close();
        assert!(!svc.store().is_connected());

        let second = svc.get_or_create_hash().await.unwrap();
        assert_eq!(first, second);
        assert!(svc.store().is_connected());
    }

    #[tokio::test]
    async fn evict_stale_uses_configured_age() {
        let (svc, sink) = service(fingerprint());
        let hash = svc.get_or_create_hash().await.unwrap();
        svc.store()
            .put(HashRecord::pointer("ancient", "ancient", 1))
            .await
            .unwrap();

        let removed = svc.evict_stale().await.unwrap();
        assert_eq!(removed, 1);
        assert!(svc.store().get_by_id("ancient").await.unwrap().is_none());
        assert!(svc.store().get_by_id(&hash).await.unwrap().is_some());
        assert_eq!(sink.count("hash_evict"), 1);
    }
}
