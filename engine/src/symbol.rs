/// Canonical price-store key for a display symbol: `"btc-usdt"` and
/// `"BTC/USDT"` both become `"BTCUSDT"`. Empty input gives an empty key.
pub fn normalize(symbol: &str) -> String {
    symbol
        .chars()
        .flat_map(char::to_uppercase)
        .filter(|c| *c != '-' && *c != '/')
        .collect()
}
