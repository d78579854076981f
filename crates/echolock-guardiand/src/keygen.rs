//! echolock-keygen — generate a fresh EchoLock identity keypair.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use echolock_crypto::{derive_public, SecretScalar};

#[derive(Parser, Debug)]
#[command(name = "echolock-keygen", about = "Generate an EchoLock curve keypair")]
struct Args {
    /// Path to write the hex-encoded secret key to. Printed to stdout if omitted.
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let sk = SecretScalar::generate();
    let pk = derive_public(&sk);
    let sk_hex = hex::encode(sk.as_bytes());

    match args.out {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, &sk_hex)
                .with_context(|| format!("writing key to {}", path.display()))?;
            println!("wrote secret key to {}", path.display());
        }
        None => println!("secret: {sk_hex}"),
    }
    println!("public:  {}", pk.to_hex());
    Ok(())
}
