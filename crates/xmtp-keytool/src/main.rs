mod commands;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;
use xmtp_crypto::Ed25519WalletSigner;
use zeroize::Zeroizing;

/// Environment fallback for `--wallet-seed`.
const WALLET_SEED_ENV: &str = "XMTP_WALLET_SEED";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Generate,
    Restore,
    Rotate,
}

/// Command-line arguments.
struct Args {
    command: Command,
    backup_path: PathBuf,
    wallet_seed: Option<Zeroizing<String>>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args> {
    let command = match args.next().as_deref() {
        Some("generate") => Command::Generate,
        Some("restore") => Command::Restore,
        Some("rotate") => Command::Rotate,
        Some(other) => bail!("unknown command `{other}` (expected generate, restore or rotate)"),
        None => bail!("usage: xmtp-keytool <generate|restore|rotate> --backup <path> [--wallet-seed <hex>]"),
    };

    let mut backup_path = None;
    let mut wallet_seed = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--backup" => backup_path = args.next().map(PathBuf::from),
            "--wallet-seed" => wallet_seed = args.next().map(Zeroizing::new),
            other => bail!("unexpected argument `{other}`"),
        }
    }

    Ok(Args {
        command,
        backup_path: backup_path.context("--backup <path> is required")?,
        wallet_seed,
    })
}

/// Build the software wallet from a 32-byte hex seed.
fn load_wallet(seed_hex: Option<Zeroizing<String>>) -> Result<Ed25519WalletSigner> {
    let seed_hex = match seed_hex {
        Some(seed) => seed,
        None => Zeroizing::new(
            std::env::var(WALLET_SEED_ENV)
                .with_context(|| format!("--wallet-seed or {WALLET_SEED_ENV} must be set"))?,
        ),
    };
    let seed = Zeroizing::new(hex::decode(seed_hex.trim()).context("wallet seed is not valid hex")?);
    let seed: &[u8; 32] = seed
        .as_slice()
        .try_into()
        .with_context(|| format!("wallet seed must be 32 bytes, got {}", seed.len()))?;
    Ok(Ed25519WalletSigner::from_seed(seed))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    let wallet = load_wallet(args.wallet_seed)?;
    tracing::info!(
        command = ?args.command,
        backup = %args.backup_path.display(),
        wallet = %hex::encode(wallet.public_key_bytes()),
        "xmtp-keytool starting"
    );

    let bundle = match args.command {
        Command::Generate => commands::generate(&wallet, &args.backup_path).await?,
        Command::Restore => commands::restore(&wallet, &args.backup_path).await?,
        Command::Rotate => commands::rotate(&wallet, &args.backup_path).await?,
    };

    println!("{}", String::from_utf8(bundle.to_bytes()?)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args> {
        parse_args(list.iter().map(ToString::to_string))
    }

    #[test]
    fn parses_generate() {
        let parsed = args(&["generate", "--backup", "/tmp/b.json", "--wallet-seed", "ab"]).unwrap();
        assert_eq!(parsed.command, Command::Generate);
        assert_eq!(parsed.backup_path, PathBuf::from("/tmp/b.json"));
        assert_eq!(parsed.wallet_seed.as_deref().map(String::as_str), Some("ab"));
    }

    #[test]
    fn backup_path_required() {
        assert!(args(&["restore"]).is_err());
    }

    #[test]
    fn unknown_command_rejected() {
        assert!(args(&["export", "--backup", "x"]).is_err());
        assert!(args(&[]).is_err());
    }

    #[test]
    fn wallet_seed_must_be_32_bytes() {
        assert!(load_wallet(Some(Zeroizing::new("00".repeat(31)))).is_err());
        assert!(load_wallet(Some(Zeroizing::new("zz".repeat(32)))).is_err());

        let wallet = load_wallet(Some(Zeroizing::new("11".repeat(32)))).unwrap();
        assert_eq!(
            wallet.public_key_bytes(),
            Ed25519WalletSigner::from_seed(&[0x11; 32]).public_key_bytes()
        );
    }
}
