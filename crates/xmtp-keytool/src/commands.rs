use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use rand::rngs::OsRng;
use xmtp_crypto::backup::check_signer_determinism;
use xmtp_crypto::{KeyBundle, PrivateKeyBundle, WalletSigner};

/// Create a new bundle and write its encrypted backup to `path`.
pub async fn generate<S: WalletSigner>(wallet: &S, path: &Path) -> Result<KeyBundle> {
    if path.exists() {
        bail!("refusing to overwrite existing backup at {}", path.display());
    }
    check_signer_determinism(wallet)
        .await
        .context("wallet cannot be used for backups")?;

    let (bundle, public) = PrivateKeyBundle::generate()?;
    let bytes = bundle.encode(wallet).await?;
    // `create_new` also catches a file that appeared after the check above.
    write_new(path, &bytes)
        .with_context(|| format!("refusing to overwrite existing backup at {}", path.display()))?;
    tracing::info!(path = %path.display(), "key bundle generated");
    Ok(public)
}

/// Decrypt the backup at `path` and return its public bundle.
pub async fn restore<S: WalletSigner>(wallet: &S, path: &Path) -> Result<KeyBundle> {
    let bundle = read_backup(wallet, path).await?;
    Ok(bundle.key_bundle())
}

/// Replace the pre-key in the backup at `path` with a freshly signed one.
pub async fn rotate<S: WalletSigner>(wallet: &S, path: &Path) -> Result<KeyBundle> {
    let mut bundle = read_backup(wallet, path).await?;
    let public = bundle.rotate_pre_key(&mut OsRng)?;
    replace_backup(wallet, &bundle, path).await?;
    tracing::info!(path = %path.display(), "pre-key rotated");
    Ok(public)
}

async fn read_backup<S: WalletSigner>(wallet: &S, path: &Path) -> Result<PrivateKeyBundle> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read backup {}", path.display()))?;
    PrivateKeyBundle::decode(wallet, &bytes)
        .await
        .with_context(|| format!("failed to decrypt backup {}", path.display()))
}

/// Write through a temporary file so a failed write never truncates the old backup.
async fn replace_backup<S: WalletSigner>(
    wallet: &S,
    bundle: &PrivateKeyBundle,
    path: &Path,
) -> Result<()> {
    let bytes = bundle.encode(wallet).await?;
    let tmp = temp_path(path);
    write_new(&tmp, &bytes).with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to move backup into place at {}", path.display()))?;
    Ok(())
}

/// Write `bytes` to a file that must not exist yet.
fn write_new(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// `<path>.tmp`, appended to the full file name so it never equals `path`.
fn temp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xmtp_crypto::Ed25519WalletSigner;

    fn scratch(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "xmtp-keytool-{}-{}",
            std::process::id(),
            name
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("bundle.json")
    }

    #[tokio::test]
    async fn generate_then_restore() {
        let path = scratch("restore");
        let wallet = Ed25519WalletSigner::from_seed(&[4; 32]);

        let generated = generate(&wallet, &path).await.unwrap();
        let restored = restore(&wallet, &path).await.unwrap();
        assert_eq!(generated, restored);

        assert!(generate(&wallet, &path).await.is_err());
        assert!(restore(&Ed25519WalletSigner::from_seed(&[5; 32]), &path)
            .await
            .is_err());
        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[tokio::test]
    async fn rotate_keeps_identity() {
        let path = scratch("rotate");
        let wallet = Ed25519WalletSigner::from_seed(&[6; 32]);

        let before = generate(&wallet, &path).await.unwrap();
        let after = rotate(&wallet, &path).await.unwrap();
        assert_eq!(before.identity_key(), after.identity_key());
        assert_ne!(before.pre_key(), after.pre_key());
        assert_eq!(restore(&wallet, &path).await.unwrap(), after);
        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn temp_path_differs_from_target() {
        assert_eq!(temp_path(Path::new("/x/b.json")), PathBuf::from("/x/b.json.tmp"));
        assert_eq!(temp_path(Path::new("/x/b.tmp")), PathBuf::from("/x/b.tmp.tmp"));
        assert_ne!(temp_path(Path::new("b.tmp")), PathBuf::from("b.tmp"));
    }

    #[test]
    fn write_new_never_overwrites() {
        let path = scratch("write-new");
        write_new(&path, b"first").unwrap();
        let err = write_new(&path, b"second").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(&path).unwrap(), b"first");
        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[tokio::test]
    async fn rotate_leaves_no_temp_file() {
        let path = scratch("rotate-tmp");
        let wallet = Ed25519WalletSigner::from_seed(&[7; 32]);
        generate(&wallet, &path).await.unwrap();
        rotate(&wallet, &path).await.unwrap();
        assert!(!temp_path(&path).exists());
        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }
}
