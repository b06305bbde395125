//! Encrypted, content-addressed backup store.
//!
//! Layout under the store root:
//!
//! ```text
//! key                      32 random bytes, owner-only
//! .lock                    flock target serializing deletions across processes
//! blobs/<fp[..2]>/<fp>.bak encrypted artifact copies
//! oplog/<session>.jsonl    signed operation logs
//! ```
//!
//! A blob is a 12-byte header (`PSBK\x01` + 7-byte nonce prefix) followed by
//! length-prefixed ChaCha20-Poly1305 frames of at most 64 KiB plaintext. The
//! per-frame nonce is `prefix ‖ counter (u32 BE) ‖ last-flag`, and the
//! fingerprint is bound as associated data, so reordering, truncating or
//! renaming a blob all fail authentication.

#![allow(missing_docs)]
#![allow(clippy::cast_possible_truncation)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use hmac::{Hmac, Mac};
use parking_lot::{Mutex, MutexGuard};
use sha2::Sha256;

use crate::core::errors::{PswError, Result};
use crate::scanner::fingerprint::Fingerprinter;

// ──────────────────── constants ────────────────────

const MAGIC: &[u8; 5] = b"PSBK\x01";
const PREFIX_LEN: usize = 7;
const HEADER_LEN: usize = MAGIC.len() + PREFIX_LEN;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;
/// Plaintext bytes per authenticated frame.
pub const BLOB_CHUNK_BYTES: usize = 64 * 1024;

type HmacSha256 = Hmac<Sha256>;

// ──────────────────── types ────────────────────

/// Result of [`BackupStore::store`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub fingerprint: String,
    pub bytes: u64,
    /// An already-present blob verified and was kept.
    pub reused: bool,
}

/// Held while originals are deleted. Serializes deleters in this process
/// (mutex) and across processes (`flock` on unix).
pub struct StoreLock<'a> {
    _guard: MutexGuard<'a, ()>,
    #[cfg(unix)]
    _flock: nix::fcntl::Flock<File>,
}

pub struct BackupStore {
    root: PathBuf,
    key: [u8; KEY_LEN],
    lock: Mutex<()>,
}

impl std::fmt::Debug for BackupStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl BackupStore {
    /// Open (creating if needed) the store at `root`.
    pub fn open(root: &Path) -> Result<Self> {
        for dir in [root.to_path_buf(), root.join("blobs"), root.join("oplog")] {
            fs::create_dir_all(&dir).map_err(|e| PswError::io(&dir, e))?;
        }
        let key = load_or_create_key(&root.join("key"))?;
        Ok(Self {
            root: root.to_path_buf(),
            key,
            lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn oplog_dir(&self) -> PathBuf {
        self.root.join("oplog")
    }

    pub fn blob_path(&self, fingerprint: &str) -> PathBuf {
        let shard = fingerprint.get(..2).unwrap_or("00");
        self.root
            .join("blobs")
            .join(shard)
            .join(format!("{fingerprint}.bak"))
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        is_fingerprint(fingerprint) && self.blob_path(fingerprint).is_file()
    }

    /// Sub-key for a purpose such as operation-log signing.
    pub(crate) fn derive_key(&self, label: &[u8]) -> Result<[u8; KEY_LEN]> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key).map_err(|_| {
            PswError::Crypto {
                context: "key derivation",
            }
        })?;
        mac.update(label);
        let mut out = [0u8; KEY_LEN];
        out.copy_from_slice(&mac.finalize().into_bytes());
        Ok(out)
    }

    /// Take the deletion lock.
    pub fn lock(&self) -> Result<StoreLock<'_>> {
        let guard = self.lock.lock();
        Ok(StoreLock {
            _guard: guard,
            #[cfg(unix)]
            _flock: self.flock()?,
        })
    }

    #[cfg(unix)]
    fn flock(&self) -> Result<nix::fcntl::Flock<File>> {
        use std::os::unix::fs::OpenOptionsExt as _;

        let path = self.root.join(".lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(&path)
            .map_err(|e| PswError::io(&path, e))?;

        #[allow(deprecated)]
        nix::fcntl::Flock::lock(file, nix::fcntl::FlockArg::LockExclusive).map_err(|(_file, e)| {
            PswError::Runtime {
                details: format!("failed to lock backup store: {e}"),
            }
        })
    }

    // ──────────────────── store / verify / restore ────────────────────

    /// Encrypt `reader`, the contents of `origin`, into the blob for
    /// `fingerprint`.
    ///
    /// An existing blob that verifies is reused without reading `reader`. The
    /// content read must hash to `fingerprint`, otherwise nothing is kept.
    /// Read failures are reported against `origin`.
    pub fn store(
        &self,
        origin: &Path,
        reader: &mut dyn Read,
        fingerprint: &str,
    ) -> Result<StoredBlob> {
        check_fingerprint(fingerprint)?;
        let blob = self.blob_path(fingerprint);

        if blob.is_file() {
            match self.verify(fingerprint) {
                Ok(bytes) => {
                    return Ok(StoredBlob {
                        fingerprint: fingerprint.to_string(),
                        bytes,
                        reused: true,
                    });
                }
                Err(err) => {
                    eprintln!("[PSW-BACKUP] replacing unreadable blob {fingerprint}: {err}");
                }
            }
        }

        let shard = blob.parent().map_or_else(|| self.root.clone(), Path::to_path_buf);
        fs::create_dir_all(&shard).map_err(|e| PswError::io(&shard, e))?;
        let tmp = shard.join(format!(
            ".{fingerprint}.{:08x}.tmp",
            rand::random::<u32>()
        ));

        let result = self.write_blob(origin, reader, fingerprint, &tmp);
        match result {
            Ok(bytes) => {
                fs::rename(&tmp, &blob).map_err(|e| PswError::io(&blob, e))?;
                Ok(StoredBlob {
                    fingerprint: fingerprint.to_string(),
                    bytes,
                    reused: false,
                })
            }
            Err(err) => {
                let _ = fs::remove_file(&tmp);
                Err(err)
            }
        }
    }

    /// Decrypt and re-hash a blob. Returns the plaintext length.
    pub fn verify(&self, fingerprint: &str) -> Result<u64> {
        let mut reader = self.open_blob(fingerprint)?;
        let (actual, bytes) = self.decrypt(&mut reader, &mut io::sink(), fingerprint)?;
        if actual != fingerprint {
            return Err(PswError::BackupIntegrity {
                fingerprint: fingerprint.to_string(),
                details: format!("decrypted content hashes to {actual}"),
            });
        }
        Ok(bytes)
    }

    /// Decrypt a blob to `dest`. Refuses to overwrite an existing entry.
    pub fn restore(&self, fingerprint: &str, dest: &Path) -> Result<u64> {
        let mut reader = self.open_blob(fingerprint)?;
        if fs::symlink_metadata(dest).is_ok() {
            return Err(PswError::io(
                dest,
                io::Error::new(io::ErrorKind::AlreadyExists, "refusing to overwrite"),
            ));
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| PswError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dest)
            .map_err(|e| PswError::io(dest, e))?;

        let mut writer = BufWriter::new(file);
        let outcome = self
            .decrypt(&mut reader, &mut writer, fingerprint)
            .and_then(|(actual, bytes)| {
                writer.flush().map_err(|e| PswError::io(dest, e))?;
                if actual == fingerprint {
                    Ok(bytes)
                } else {
                    Err(PswError::BackupIntegrity {
                        fingerprint: fingerprint.to_string(),
                        details: format!("restored content hashes to {actual}"),
                    })
                }
            });
        if outcome.is_err() {
            drop(writer);
            let _ = fs::remove_file(dest);
        }
        outcome
    }

    // ──────────────────── internals ────────────────────

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.key))
    }

    fn open_blob(&self, fingerprint: &str) -> Result<BufReader<File>> {
        check_fingerprint(fingerprint)?;
        let path = self.blob_path(fingerprint);
        match File::open(&path) {
            Ok(file) => Ok(BufReader::new(file)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(PswError::BackupNotFound {
                fingerprint: fingerprint.to_string(),
            }),
            Err(err) => Err(PswError::io(&path, err)),
        }
    }

    fn write_blob(
        &self,
        origin: &Path,
        reader: &mut dyn Read,
        fingerprint: &str,
        tmp: &Path,
    ) -> Result<u64> {
        let file = {
            let mut opts = OpenOptions::new();
            opts.write(true).create_new(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o600);
            }
            opts.open(tmp).map_err(|e| PswError::io(tmp, e))?
        };
        let mut writer = BufWriter::new(file);
        let (actual, bytes) = self.encrypt(origin, reader, &mut writer, fingerprint, tmp)?;
        if actual != fingerprint {
            return Err(PswError::BackupIntegrity {
                fingerprint: fingerprint.to_string(),
                details: format!("source content now hashes to {actual}"),
            });
        }
        let file = writer
            .into_inner()
            .map_err(|e| PswError::io(tmp, e.into_error()))?;
        file.sync_all().map_err(|e| PswError::io(tmp, e))?;
        Ok(bytes)
    }

    fn encrypt(
        &self,
        origin: &Path,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
        fingerprint: &str,
        blob: &Path,
    ) -> Result<(String, u64)> {
        let prefix: [u8; PREFIX_LEN] = rand::random();
        let cipher = self.cipher();
        let mut hasher = Fingerprinter::new();
        let mut total: u64 = 0;
        let write_err = |e| PswError::io(blob, e);
        let read_err = |e: io::Error| PswError::UnreadableEntry {
            path: origin.to_path_buf(),
            details: format!("reading artifact: {e}"),
        };

        writer.write_all(MAGIC).map_err(write_err)?;
        writer.write_all(&prefix).map_err(write_err)?;

        let mut current = vec![0u8; BLOB_CHUNK_BYTES];
        let mut lookahead = vec![0u8; BLOB_CHUNK_BYTES];
        let mut len = read_full(reader, &mut current).map_err(read_err)?;
        let mut counter: u32 = 0;

        loop {
            let (last, next_len) = if len < BLOB_CHUNK_BYTES {
                (true, 0)
            } else {
                let n = read_full(reader, &mut lookahead).map_err(read_err)?;
                (n == 0, n)
            };

            let plain = &current[..len];
            hasher.update(plain);
            total += len as u64;
            let frame = cipher
                .encrypt(
                    Nonce::from_slice(&frame_nonce(&prefix, counter, last)),
                    Payload {
                        msg: plain,
                        aad: fingerprint.as_bytes(),
                    },
                )
                .map_err(|_| PswError::Crypto {
                    context: "blob encryption",
                })?;
            writer
                .write_all(&(frame.len() as u32).to_le_bytes())
                .map_err(write_err)?;
            writer.write_all(&frame).map_err(write_err)?;

            if last {
                break;
            }
            std::mem::swap(&mut current, &mut lookahead);
            len = next_len;
            counter = counter.checked_add(1).ok_or(PswError::Crypto {
                context: "blob frame counter overflow",
            })?;
        }

        Ok((hasher.finish(), total))
    }

    fn decrypt(
        &self,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
        fingerprint: &str,
    ) -> Result<(String, u64)> {
        let corrupt = |details: String| PswError::BackupIntegrity {
            fingerprint: fingerprint.to_string(),
            details,
        };
        let blob = self.blob_path(fingerprint);
        let read_err = |e: io::Error| PswError::io(&blob, e);

        let mut header = [0u8; HEADER_LEN];
        if read_full(reader, &mut header).map_err(read_err)? != HEADER_LEN
            || &header[..MAGIC.len()] != MAGIC
        {
            return Err(corrupt("missing or unknown blob header".to_string()));
        }
        let mut prefix = [0u8; PREFIX_LEN];
        prefix.copy_from_slice(&header[MAGIC.len()..]);

        let cipher = self.cipher();
        let mut hasher = Fingerprinter::new();
        let mut total: u64 = 0;
        let mut counter: u32 = 0;
        let mut len_buf = [0u8; 4];
        if read_full(reader, &mut len_buf).map_err(read_err)? != len_buf.len() {
            return Err(corrupt("no frames".to_string()));
        }

        loop {
            let frame_len = u32::from_le_bytes(len_buf) as usize;
            if !(TAG_LEN..=BLOB_CHUNK_BYTES + TAG_LEN).contains(&frame_len) {
                return Err(corrupt(format!("frame {counter} has bad length {frame_len}")));
            }
            let mut frame = vec![0u8; frame_len];
            if read_full(reader, &mut frame).map_err(read_err)? != frame_len {
                return Err(corrupt(format!("frame {counter} truncated")));
            }
            let last = match read_full(reader, &mut len_buf).map_err(read_err)? {
                0 => true,
                4 => false,
                _ => return Err(corrupt(format!("trailing bytes after frame {counter}"))),
            };

            let plain = cipher
                .decrypt(
                    Nonce::from_slice(&frame_nonce(&prefix, counter, last)),
                    Payload {
                        msg: &frame,
                        aad: fingerprint.as_bytes(),
                    },
                )
                .map_err(|_| corrupt(format!("frame {counter} failed authentication")))?;
            hasher.update(&plain);
            total += plain.len() as u64;
            writer.write_all(&plain).map_err(|e| PswError::io(&blob, e))?;

            if last {
                break;
            }
            counter = counter
                .checked_add(1)
                .ok_or_else(|| corrupt("frame counter overflow".to_string()))?;
        }

        Ok((hasher.finish(), total))
    }
}

// ──────────────────── helpers ────────────────────

fn frame_nonce(prefix: &[u8; PREFIX_LEN], counter: u32, last: bool) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..PREFIX_LEN].copy_from_slice(prefix);
    nonce[PREFIX_LEN..PREFIX_LEN + 4].copy_from_slice(&counter.to_be_bytes());
    nonce[11] = u8::from(last);
    nonce
}

/// Fill `buf` unless the reader hits EOF first; returns bytes read.
fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

fn is_fingerprint(value: &str) -> bool {
    value.len() == 64
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn check_fingerprint(value: &str) -> Result<()> {
    if is_fingerprint(value) {
        Ok(())
    } else {
        Err(PswError::BackupIntegrity {
            fingerprint: value.to_string(),
            details: "not a lowercase SHA-256 hex digest".to_string(),
        })
    }
}

fn load_or_create_key(path: &Path) -> Result<[u8; KEY_LEN]> {
    match fs::read(path) {
        Ok(bytes) => {
            let mut key = [0u8; KEY_LEN];
            if bytes.len() != KEY_LEN {
                return Err(PswError::Crypto {
                    context: "backup key has wrong length",
                });
            }
            key.copy_from_slice(&bytes);
            Ok(key)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            let key: [u8; KEY_LEN] = rand::random();
            let mut opts = OpenOptions::new();
            opts.write(true).create_new(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o600);
            }
            let mut file = opts.open(path).map_err(|e| PswError::io(path, e))?;
            file.write_all(&key).map_err(|e| PswError::io(path, e))?;
            file.sync_all().map_err(|e| PswError::io(path, e))?;
            Ok(key)
        }
        Err(err) => Err(PswError::io(path, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::fingerprint::hash_bytes;
    use std::io::Cursor;

    fn store_in(dir: &Path) -> BackupStore {
        BackupStore::open(&dir.join("backup")).unwrap()
    }

    fn put(store: &BackupStore, data: &[u8]) -> String {
        let fp = hash_bytes(data);
        store
            .store(Path::new("/tmp/artifact"), &mut Cursor::new(data.to_vec()), &fp)
            .unwrap();
        fp
    }

    #[test]
    fn store_verify_restore_multi_frame_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let fp = put(&store, &data);

        assert!(store.contains(&fp));
        assert_eq!(store.verify(&fp).unwrap(), data.len() as u64);

        let dest = dir.path().join("restored/file.bin");
        assert_eq!(store.restore(&fp, &dest).unwrap(), data.len() as u64);
        assert_eq!(fs::read(&dest).unwrap(), data);
    }

    #[test]
    fn empty_and_exact_chunk_sizes_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        for size in [0, BLOB_CHUNK_BYTES, 2 * BLOB_CHUNK_BYTES] {
            let data = vec![7u8; size];
            let fp = put(&store, &data);
            assert_eq!(store.verify(&fp).unwrap(), size as u64);
        }
    }

    #[test]
    fn blob_is_not_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let data = b"visited https://example.test/secret".repeat(10);
        let fp = put(&store, &data);
        let raw = fs::read(store.blob_path(&fp)).unwrap();
        assert!(raw.starts_with(MAGIC));
        assert!(memchr::memmem::find(&raw, b"example.test").is_none());
    }

    #[test]
    fn second_store_reuses_verified_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let fp = put(&store, b"cookie jar");
        let again = store
            .store(Path::new("/tmp/cookies"), &mut Cursor::new(b"cookie jar".to_vec()), &fp)
            .unwrap();
        assert!(again.reused);
        assert_eq!(again.bytes, 10);
    }

    #[test]
    fn content_not_matching_fingerprint_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let fp = hash_bytes(b"original");
        let err = store
            .store(Path::new("/tmp/notes"), &mut Cursor::new(b"changed".to_vec()), &fp)
            .unwrap_err();
        assert!(matches!(err, PswError::BackupIntegrity { .. }));
        assert!(!store.contains(&fp));
    }

    struct BrokenReader;

    impl Read for BrokenReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("device went away"))
        }
    }

    #[test]
    fn read_failure_names_the_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let fp = hash_bytes(b"whatever");
        let origin = Path::new("/home/u/.cache/app/blob");
        let err = store.store(origin, &mut BrokenReader, &fp).unwrap_err();
        match err {
            PswError::UnreadableEntry { path, details } => {
                assert_eq!(path, origin);
                assert!(details.contains("device went away"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!store.contains(&fp));
        let shard = store.blob_path(&fp).parent().unwrap().to_path_buf();
        assert_eq!(fs::read_dir(shard).unwrap().count(), 0);
    }

    #[test]
    fn tampered_blob_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let fp = put(&store, b"thumbnail bytes");
        let path = store.blob_path(&fp);
        let mut raw = fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        fs::write(&path, raw).unwrap();

        assert!(matches!(
            store.verify(&fp),
            Err(PswError::BackupIntegrity { .. })
        ));
    }

    #[test]
    fn truncated_blob_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let data = vec![3u8; BLOB_CHUNK_BYTES + 10];
        let fp = put(&store, &data);
        let path = store.blob_path(&fp);
        let raw = fs::read(&path).unwrap();
        let first_frame_end = HEADER_LEN + 4 + BLOB_CHUNK_BYTES + TAG_LEN;
        fs::write(&path, &raw[..first_frame_end]).unwrap();

        assert!(store.verify(&fp).is_err());
    }

    #[test]
    fn missing_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let fp = hash_bytes(b"never stored");
        assert!(matches!(
            store.verify(&fp),
            Err(PswError::BackupNotFound { .. })
        ));
    }

    #[test]
    fn malformed_fingerprint_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(store.verify("../../etc/passwd").is_err());
        assert!(!store.contains("ABC"));
    }

    #[test]
    fn restore_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let fp = put(&store, b"recent docs");
        let dest = dir.path().join("existing");
        fs::write(&dest, b"keep me").unwrap();

        assert!(store.restore(&fp, &dest).is_err());
        assert_eq!(fs::read(&dest).unwrap(), b"keep me");
    }

    #[test]
    fn key_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let fp = {
            let store = store_in(dir.path());
            put(&store, b"history.sqlite")
        };
        let reopened = store_in(dir.path());
        assert_eq!(reopened.verify(&fp).unwrap(), 14);
    }

    #[test]
    fn wrong_length_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("backup");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("key"), b"short").unwrap();
        assert!(matches!(
            BackupStore::open(&root),
            Err(PswError::Crypto { .. })
        ));
    }

    #[test]
    #[cfg(unix)]
    fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt as _;
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let mode = fs::metadata(store.root().join("key"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn derived_keys_differ_by_label() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        assert_ne!(
            store.derive_key(b"oplog-signing").unwrap(),
            store.derive_key(b"other").unwrap()
        );
    }

    #[test]
    fn lock_can_be_reacquired() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        drop(store.lock().unwrap());
        let _again = store.lock().unwrap();
    }
}
