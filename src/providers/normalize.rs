//! Canonical symbol (`BTC`, `ETH`, ...) to provider-native identifier mapping.
//!
//! Each adapter speaks its own dialect on the wire: Binance wants a
//! concatenated pair (`BTCUSDT`), Coinbase a hyphenated pair (`BTC-USD`), and
//! CoinGecko a lowercase coin id (`bitcoin`) that does not even share a
//! prefix with the ticker. Adapters normalize at the edge so everything
//! above `providers/` only ever sees the canonical symbol.

/// Quote currency every adapter normalizes against. Only USD is supported;
/// symbols quoted in anything else are out of scope (see Non-goals).
pub const QUOTE_CURRENCY: &str = "USD";

/// Maps a canonical symbol to its Binance pair, e.g. `BTC` -> `BTCUSDT`.
pub fn to_binance(symbol: &str) -> String {
    format!("{}USDT", symbol.to_ascii_uppercase())
}

/// Inverse of [`to_binance`]. Returns `None` if `pair` doesn't end in `USDT`.
pub fn from_binance(pair: &str) -> Option<String> {
    pair.strip_suffix("USDT").map(|s| s.to_ascii_uppercase())
}

/// Maps a canonical symbol to its Coinbase product id, e.g. `BTC` -> `BTC-USD`.
pub fn to_coinbase(symbol: &str) -> String {
    format!("{}-{}", symbol.to_ascii_uppercase(), QUOTE_CURRENCY)
}

/// Inverse of [`to_coinbase`].
pub fn from_coinbase(product_id: &str) -> Option<String> {
    product_id
        .strip_suffix(&format!("-{QUOTE_CURRENCY}"))
        .map(|s| s.to_ascii_uppercase())
}

/// Static table of canonical symbol -> CoinGecko coin id, covering the
/// majors. CoinGecko ids bear no structural relation to ticker symbols so
/// this cannot be derived and must be maintained as data.
const COINGECKO_IDS: &[(&str, &str)] = &[
    ("BTC", "bitcoin"),
    ("ETH", "ethereum"),
    ("SOL", "solana"),
    ("BNB", "binancecoin"),
    ("XRP", "ripple"),
    ("ADA", "cardano"),
    ("DOGE", "dogecoin"),
    ("AVAX", "avalanche-2"),
    ("DOT", "polkadot"),
    ("MATIC", "matic-network"),
    ("LTC", "litecoin"),
    ("LINK", "chainlink"),
    ("USDT", "tether"),
    ("USDC", "usd-coin"),
];

/// Maps a canonical symbol to its CoinGecko coin id.
pub fn to_coingecko(symbol: &str) -> Option<&'static str> {
    let upper = symbol.to_ascii_uppercase();
    COINGECKO_IDS.iter().find(|(canonical, _)| *canonical == upper).map(|(_, id)| *id)
}

/// Inverse of [`to_coingecko`].
pub fn from_coingecko(coin_id: &str) -> Option<&'static str> {
    COINGECKO_IDS.iter().find(|(_, id)| *id == coin_id).map(|(canonical, _)| *canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binance_round_trips() {
        for symbol in ["BTC", "ETH", "SOL"] {
            let pair = to_binance(symbol);
            assert_eq!(from_binance(&pair).as_deref(), Some(symbol));
        }
    }

    #[test]
    fn coinbase_round_trips() {
        for symbol in ["BTC", "ETH", "DOGE"] {
            let product = to_coinbase(symbol);
            assert_eq!(from_coinbase(&product).as_deref(), Some(symbol));
        }
    }

    #[test]
    fn coingecko_round_trips_known_symbols() {
        for symbol in ["BTC", "ETH", "MATIC"] {
            let id = to_coingecko(symbol).expect("known symbol");
            assert_eq!(from_coingecko(id), Some(symbol));
        }
    }

    #[test]
    fn coingecko_unknown_symbol_is_none() {
        assert!(to_coingecko("NOTASYMBOL").is_none());
    }

    #[test]
    fn lowercase_input_normalizes_to_uppercase_canonical() {
        assert_eq!(to_binance("btc"), "BTCUSDT");
        assert_eq!(from_binance("BTCUSDT").as_deref(), Some("BTC"));
    }
}
