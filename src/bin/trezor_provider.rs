use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction::SetTrue, Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};

use trezor_provider::device::DeviceInfo;
use trezor_provider::path::HARDENED_BIT;
use trezor_provider::pin::FixedPinProvider;
use trezor_provider::transport::{EmulatedDevice, EmulatorBehaviour};
use trezor_provider::{
    DerivationPath, MsgParams, ProviderConfig, SignedLegacyTransaction, TrezorProvider, TxParams,
    WalletProvider,
};

/// Wallet-provider bridge for Trezor devices
#[derive(Parser, Debug, Clone)]
#[clap(version, about)]
struct Cli {
    /// show debug output
    #[clap(short, long, default_value_t = false, action = SetTrue)]
    verbose: bool,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Show how a derivation path is sent to the device
    Path {
        path: String,
    },
    /// Run a signing round against an in-memory device
    Demo {
        /// derivation path (defaults to TREZOR_PROVIDER_DERIVATION_PATH or 44'/60'/0'/0)
        #[clap(long)]
        path: Option<String>,
        #[clap(long)]
        chain_id: Option<u32>,
        /// require this PIN on the emulated device
        #[clap(long)]
        pin: Option<String>,
        /// print results as a json object
        #[clap(short, long, default_value_t = false, action = SetTrue)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        trezor_provider::logging::init_with_default("trezor_provider=debug");
    } else {
        trezor_provider::logging::init();
    }

    match cli.command {
        Command::Path { path } => show_path(&path),
        Command::Demo { path, chain_id, pin, json } => demo(path, chain_id, pin, json).await,
    }
}

fn show_path(path: &str) -> Result<()> {
    let parsed: DerivationPath = path.parse().context("parsing derivation path")?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["Segment", "Index", "Hardened", "Wire value"]);
    for (i, segment) in parsed.as_slice().iter().enumerate() {
        let hardened = segment & HARDENED_BIT != 0;
        table.add_row([
            i.to_string(),
            (segment & !HARDENED_BIT).to_string(),
            if hardened { "Yes" } else { "No" }.to_string(),
            format!("0x{:08x}", segment),
        ]);
    }

    println!("{}", parsed);
    println!("{}", table);
    Ok(())
}

async fn demo(path: Option<String>, chain_id: Option<u32>, pin: Option<String>, json: bool) -> Result<()> {
    let mut config = ProviderConfig::from_env()?;
    config.warmup_ms = 0;
    if let Some(path) = path {
        config.derivation_path = path;
    }
    if chain_id.is_some() {
        config.chain_id = chain_id;
    }

    let pin_provider = Arc::new(FixedPinProvider::new(pin.clone().unwrap_or_default()));
    let provider = TrezorProvider::with_pin_provider(config, pin_provider)?;

    let behaviour = EmulatorBehaviour { pin, ..Default::default() };
    let device = Arc::new(EmulatedDevice::new(
        DeviceInfo::new("emulator-0001", Some("Emulator".to_string()), false),
        behaviour,
    ));
    provider.registry().connect(device).await?;

    let accounts = provider.get_accounts().await.context("get_accounts")?;
    let from = accounts.first().cloned();

    let tx = TxParams {
        from: from.clone(),
        nonce: Some("0x0".to_string()),
        gas_price: Some("0x4a817c800".to_string()),
        gas: Some("0x5208".to_string()),
        to: Some("0x3535353535353535353535353535353535353535".to_string()),
        value: Some("0xde0b6b3a7640000".to_string()),
        data: None,
    };
    let raw_tx = provider.sign_transaction(&tx).await.context("sign_transaction")?;
    let decoded = SignedLegacyTransaction::from_hex(&raw_tx)?;

    let msg = MsgParams { data: format!("0x{}", hex::encode("hello trezor")), from };
    let message_sig = provider.sign_personal_message(&msg).await.context("sign_personal_message")?;

    if json {
        let report = serde_json::json!({
            "path": provider.pipeline().path().to_string(),
            "accounts": accounts,
            "signedTransaction": raw_tx,
            "messageSignature": message_sig,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        provider.shutdown().await;
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["Operation", "Result"]);
    table.add_row(["Path".to_string(), provider.pipeline().path().to_string()]);
    table.add_row(["Accounts".to_string(), accounts.join(", ")]);
    table.add_row(["Signed tx".to_string(), raw_tx]);
    table.add_row(["Tx v".to_string(), decoded.v.to_string()]);
    table.add_row(["Message signature".to_string(), message_sig]);

    if let Some(active) = provider.registry().active_device().await? {
        let metrics = active.queue.metrics().await?;
        table.add_row(["Device jobs".to_string(), metrics.processed.to_string()]);
    }

    println!("{}", table);
    provider.shutdown().await;
    Ok(())
}
