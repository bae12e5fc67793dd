//! Candidate-generation and broker-lookup resolution for raw ticker input
//! (spec §4.9.1). Crypto pairs like `BTCUSD` don't exist as a single
//! tradable asset at Alpaca; they need a `BASE/QUOTE` split.

use crate::domain::errors::{CoordinatorError, CoordinatorResult};
use crate::domain::models::SymbolResolution;
use crate::domain::ports::{AssetInfo, Broker, BrokerCredentials};

fn candidates(ticker: &str) -> Vec<String> {
    let stripped: String = ticker.chars().filter(|c| c.is_alphanumeric()).collect();
    let mut out = vec![ticker.to_string()];
    if stripped != ticker {
        out.push(stripped.clone());
    }

    if stripped.len() >= 5 {
        for quote_len in 2..=5 {
            if quote_len >= stripped.len() {
                continue;
            }
            let base_len = stripped.len() - quote_len;
            let (base, quote) = stripped.split_at(base_len);
            out.push(format!("{base}/{quote}"));
        }
    }

    out.dedup();
    out
}

fn looks_crypto(ticker: &str) -> bool {
    let upper = ticker.to_uppercase();
    upper.contains('/') || upper.ends_with("USD") || upper.ends_with("USDT")
}

fn is_crypto_asset(symbol: &str, asset_class: &str) -> bool {
    symbol.contains('/') || asset_class.to_lowercase().contains("crypto")
}

pub async fn resolve_symbol(
    broker: &dyn Broker,
    creds: &BrokerCredentials,
    ticker: &str,
) -> CoordinatorResult<SymbolResolution> {
    let stripped: String = ticker.chars().filter(|c| c.is_alphanumeric()).collect();
    let input_looks_crypto = looks_crypto(ticker);

    let mut found: Vec<AssetInfo> = Vec::new();
    for candidate in candidates(ticker) {
        if let Some(asset) = broker.resolve_asset(creds, &candidate).await? {
            found.push(asset);
        }
    }

    let tradable: Vec<&AssetInfo> = found.iter().filter(|a| a.tradable).collect();
    if tradable.is_empty() {
        return Err(CoordinatorError::NotFound(format!("no tradable asset resolved for ticker {ticker}")));
    }

    let chosen = if input_looks_crypto {
        tradable
            .iter()
            .find(|a| is_crypto_asset(&a.symbol, &a.asset_class))
            .or_else(|| tradable.first())
    } else {
        tradable.iter().find(|a| a.fractionable).or_else(|| tradable.first())
    }
    .expect("tradable is non-empty");

    let is_crypto = is_crypto_asset(&chosen.symbol, &chosen.asset_class);

    Ok(SymbolResolution {
        order_symbol: chosen.symbol.clone(),
        position_symbol: stripped,
        is_crypto,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_include_base_quote_splits_for_long_symbols() {
        let c = candidates("BTCUSD");
        assert!(c.contains(&"BTC/USD".to_string()));
        assert!(c.contains(&"BTCU/SD".to_string()));
        assert!(c.contains(&"BT/CUSD".to_string()));
    }

    #[test]
    fn short_symbols_get_no_splits() {
        let c = candidates("AAPL");
        assert_eq!(c, vec!["AAPL".to_string()]);
    }

    #[test]
    fn looks_crypto_detects_usd_suffix() {
        assert!(looks_crypto("BTCUSD"));
        assert!(looks_crypto("ETH/USD"));
        assert!(!looks_crypto("AAPL"));
    }
}
