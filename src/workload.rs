//! Sealed workload format.
//!
//! A sealed file is a 24-byte random nonce followed by the XChaCha20-Poly1305
//! ciphertext (tag included) of the original contents, stored under the
//! original name plus `.enc`. Files without the suffix travel in the clear.

use crate::error::{BootError, BootResult};
use crate::provision::CodeKey;
use crate::storage;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Suffix of sealed files.
pub const SEALED_EXTENSION: &str = "enc";

/// XChaCha20 nonce length.
pub const NONCE_LEN: usize = 24;

/// Turns a sealed workload directory into a runnable one.
pub trait DirectoryDecryptor: Send + Sync {
    /// Materialize `src` into `dst`, returning the number of files decrypted.
    fn decrypt_directory(&self, src: &Path, key: &CodeKey, dst: &Path) -> BootResult<usize>;
}

/// XChaCha20-Poly1305 implementation of [`DirectoryDecryptor`].
#[derive(Debug, Default, Clone, Copy)]
pub struct XChaChaDirectory;

impl DirectoryDecryptor for XChaChaDirectory {
    fn decrypt_directory(&self, src: &Path, key: &CodeKey, dst: &Path) -> BootResult<usize> {
        let mut decrypted = 0;

        for relative in list_files(src)? {
            let source = src.join(&relative);
            let data = fs::read(&source).map_err(|e| BootError::storage(&source, e))?;
            let mode = file_mode(&source)?;

            match strip_sealed_extension(&relative) {
                Some(plain) => {
                    let plaintext = open(key, &data).map_err(|e| match e {
                        BootError::Decryption(reason) => {
                            BootError::decryption(format!("{}: {}", relative.display(), reason))
                        }
                        other => other,
                    })?;
                    storage::write_file(&dst.join(&plain), &plaintext, mode)?;
                    debug!(file = %plain.display(), "Decrypted");
                    decrypted += 1;
                }
                None => {
                    storage::write_file(&dst.join(&relative), &data, mode)?;
                    debug!(file = %relative.display(), "Copied");
                }
            }
        }

        info!(
            source = %src.display(),
            destination = %dst.display(),
            decrypted,
            "Workload decrypted"
        );
        Ok(decrypted)
    }
}

/// Seal every file under `src` into `dst`, returning the number of files sealed.
pub fn seal_directory(src: &Path, key: &CodeKey, dst: &Path) -> BootResult<usize> {
    let files = list_files(src)?;

    for relative in &files {
        let source = src.join(relative);
        let data = fs::read(&source).map_err(|e| BootError::storage(&source, e))?;
        let mode = file_mode(&source)?;

        let mut sealed_name = relative.as_os_str().to_owned();
        sealed_name.push(".");
        sealed_name.push(SEALED_EXTENSION);

        storage::write_file(&dst.join(sealed_name), &seal(key, &data)?, mode)?;
    }

    Ok(files.len())
}

/// Encrypt `plaintext` with a fresh random nonce.
pub fn seal(key: &CodeKey, plaintext: &[u8]) -> BootResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| BootError::decryption("encryption failed"))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypt a sealed buffer.
pub fn open(key: &CodeKey, sealed: &[u8]) -> BootResult<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(BootError::decryption("sealed data shorter than its nonce"));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

    XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()))
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| BootError::decryption("invalid ciphertext or wrong key"))
}

fn strip_sealed_extension(relative: &Path) -> Option<PathBuf> {
    if relative.extension()? != SEALED_EXTENSION {
        return None;
    }
    let stem = relative.file_stem()?;
    Some(relative.with_file_name(stem))
}

/// Regular files under `root`, relative to it, in a stable order.
fn list_files(root: &Path) -> BootResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![PathBuf::new()];

    while let Some(relative) = pending.pop() {
        let dir = root.join(&relative);
        let entries = fs::read_dir(&dir).map_err(|e| BootError::storage(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| BootError::storage(&dir, e))?;
            let file_type = entry.file_type().map_err(|e| BootError::storage(entry.path(), e))?;
            let path = relative.join(entry.file_name());
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                files.push(path);
            } else {
                debug!(file = %path.display(), "Skipping non-regular file");
            }
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(unix)]
fn file_mode(path: &Path) -> BootResult<u32> {
    let metadata = fs::metadata(path).map_err(|e| BootError::storage(path, e))?;
    Ok(metadata.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> BootResult<u32> {
    Ok(storage::PUBLIC_MODE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> CodeKey {
        CodeKey::new([byte; 32])
    }

    fn write(root: &Path, relative: &str, data: &[u8]) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    #[test]
    fn test_seal_and_open() {
        let sealed = seal(&key(1), b"print('hello')").unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + 14 + 16);
        assert_eq!(open(&key(1), &sealed).unwrap(), b"print('hello')");

        // Fresh nonce every time
        assert_ne!(seal(&key(1), b"x").unwrap(), seal(&key(1), b"x").unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal(&key(1), b"secret code").unwrap();
        assert!(matches!(open(&key(2), &sealed), Err(BootError::Decryption(_))));
        assert!(matches!(open(&key(1), &sealed[..10]), Err(BootError::Decryption(_))));
    }

    #[test]
    fn test_directory_round_trip() {
        let plain = tempfile::tempdir().unwrap();
        write(plain.path(), "app.py", b"import flask");
        write(plain.path(), "pkg/util.py", b"def f(): pass");
        write(plain.path(), "pkg/data/config.json", b"{}");

        let sealed = tempfile::tempdir().unwrap();
        assert_eq!(seal_directory(plain.path(), &key(4), sealed.path()).unwrap(), 3);
        assert!(sealed.path().join("pkg/util.py.enc").exists());
        assert!(!sealed.path().join("pkg/util.py").exists());

        // Unsealed files are copied as is
        write(sealed.path(), "README.md", b"readme");

        let module = tempfile::tempdir().unwrap();
        let count = XChaChaDirectory
            .decrypt_directory(sealed.path(), &key(4), module.path())
            .unwrap();

        assert_eq!(count, 3);
        assert_eq!(fs::read(module.path().join("app.py")).unwrap(), b"import flask");
        assert_eq!(fs::read(module.path().join("pkg/util.py")).unwrap(), b"def f(): pass");
        assert_eq!(fs::read(module.path().join("pkg/data/config.json")).unwrap(), b"{}");
        assert_eq!(fs::read(module.path().join("README.md")).unwrap(), b"readme");
    }

    #[test]
    fn test_directory_wrong_key_names_file() {
        let plain = tempfile::tempdir().unwrap();
        write(plain.path(), "app.py", b"import flask");
        let sealed = tempfile::tempdir().unwrap();
        seal_directory(plain.path(), &key(4), sealed.path()).unwrap();

        let module = tempfile::tempdir().unwrap();
        let err = XChaChaDirectory
            .decrypt_directory(sealed.path(), &key(5), module.path())
            .unwrap_err();
        match err {
            BootError::Decryption(msg) => assert!(msg.contains("app.py.enc")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_source_directory() {
        let module = tempfile::tempdir().unwrap();
        let result = XChaChaDirectory.decrypt_directory(
            &module.path().join("missing"),
            &key(1),
            module.path(),
        );
        assert!(matches!(result, Err(BootError::Storage { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_executable_bit_preserved() {
        let plain = tempfile::tempdir().unwrap();
        write(plain.path(), "run.sh", b"#!/bin/sh\n");
        fs::set_permissions(plain.path().join("run.sh"), fs::Permissions::from_mode(0o755)).unwrap();

        let sealed = tempfile::tempdir().unwrap();
        seal_directory(plain.path(), &key(1), sealed.path()).unwrap();
        let module = tempfile::tempdir().unwrap();
        XChaChaDirectory
            .decrypt_directory(sealed.path(), &key(1), module.path())
            .unwrap();

        let mode = fs::metadata(module.path().join("run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
