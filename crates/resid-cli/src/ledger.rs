//! # Ledger CLI: token probes and address checks.
//!
//! ```bash
//! resid probe --wallet 0xabc... --details
//! resid check-address 0xABC...
//! ```

use anyhow::{Context, Result};
use clap::Args;

use resid_core::WalletAddress;
use resid_ledger::LedgerClient;

use crate::context;

/// Arguments for `resid probe`.
#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Wallet to look up on the ledger.
    #[arg(long)]
    pub wallet: String,

    /// Also read the token's on-chain attributes.
    #[arg(long)]
    pub details: bool,
}

/// Arguments for `resid check-address`.
#[derive(Args, Debug)]
pub struct CheckAddressArgs {
    /// Address to validate.
    pub address: String,
}

/// Execute `resid probe`. Exits 0 when the wallet holds a token, 1 when not.
pub async fn run_probe(args: &ProbeArgs) -> Result<u8> {
    let wallet = WalletAddress::new(args.wallet.as_str()).context("invalid --wallet")?;
    let ledger = context::open_ledger()?;
    probe(&*ledger, &wallet, args.details).await
}

/// Execute `resid check-address`. No backend is contacted.
pub fn run_check_address(args: &CheckAddressArgs) -> Result<u8> {
    match WalletAddress::new(args.address.as_str()) {
        Ok(address) => {
            println!("OK: {address}");
            Ok(0)
        }
        Err(e) => {
            eprintln!("FAIL: {e}");
            Ok(1)
        }
    }
}

pub(crate) async fn probe(
    ledger: &dyn LedgerClient,
    wallet: &WalletAddress,
    details: bool,
) -> Result<u8> {
    let probe = ledger
        .has_token(wallet)
        .await
        .with_context(|| format!("token lookup for {wallet} failed"))?;

    let token_id = match probe.token_id {
        Some(id) if probe.exists => id,
        _ => {
            println!("No residency token held by {wallet}");
            return Ok(1);
        }
    };

    println!("OK: {wallet} holds token {token_id}");
    if details {
        let data = ledger
            .read_token_data(&token_id, wallet)
            .await
            .with_context(|| format!("reading token {token_id} failed"))?;
        println!("  Name:        {}", data.display_name);
        println!("  Nationality: {}", data.nationality_code);
        println!("  Credential:  {}", data.human_readable_id);
        println!("  Issued at:   {}", data.issued_at_epoch);
        if !data.token_uri.is_empty() {
            println!("  URI:         {}", data.token_uri);
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use resid_core::HumanReadableId;
    use resid_ledger::MockLedger;

    fn wallet(n: u8) -> WalletAddress {
        WalletAddress::new(format!("0x{}", format!("{n:02x}").repeat(20))).unwrap()
    }

    #[tokio::test]
    async fn probe_finds_preloaded_token() {
        let ledger = MockLedger::new();
        let hrid = HumanReadableId::new("ERES-1700000000-ABCDEF").unwrap();
        ledger.preload_token(&wallet(1), "Ada", "EE", &hrid, 1_700_000_000);

        assert_eq!(probe(&ledger, &wallet(1), false).await.unwrap(), 0);
        assert_eq!(ledger.read_calls(), 1);
        assert_eq!(probe(&ledger, &wallet(1), true).await.unwrap(), 0);
        assert_eq!(ledger.read_calls(), 3);
    }

    #[tokio::test]
    async fn probe_reports_absent_token() {
        let ledger = MockLedger::new();
        assert_eq!(probe(&ledger, &wallet(9), true).await.unwrap(), 1);
        assert_eq!(ledger.read_calls(), 1);
    }

    #[tokio::test]
    async fn probe_propagates_outage() {
        let ledger = MockLedger::new();
        ledger.set_unavailable(true);
        assert!(probe(&ledger, &wallet(1), false).await.is_err());
    }

    #[test]
    fn check_address_accepts_mixed_case() {
        let args = CheckAddressArgs {
            address: format!("0X{}", "Ab".repeat(20)),
        };
        assert_eq!(run_check_address(&args).unwrap(), 0);
    }

    #[test]
    fn check_address_rejects_short_input() {
        let args = CheckAddressArgs {
            address: "0x1234".to_string(),
        };
        assert_eq!(run_check_address(&args).unwrap(), 1);
    }
}
