//! Instrument Catalog (C7): a fetch-once bidirectional map of instrument
//! token ↔ tradingsymbol, built from the broker's CSV instrument dump.

use crate::core::AppError;
use crate::kite::client::KiteClient;
use std::collections::HashMap;

#[derive(Debug, Clone, serde::Deserialize)]
struct CatalogCsvRow {
    instrument_token: u32,
    tradingsymbol: String,
    #[serde(default)]
    name: Option<String>,
    exchange: String,
}

#[derive(Debug, Clone)]
pub struct Instrument {
    pub token: u32,
    pub symbol: String,
    pub name: String,
}

/// Immutable after load. Tokens and symbols are both keyed for O(1) lookup
/// in either direction; the registry decides which form a user referred to.
pub struct InstrumentCatalog {
    by_token: HashMap<u32, Instrument>,
    by_symbol: HashMap<String, u32>,
}

impl InstrumentCatalog {
    /// `exchange` is the exchange segment the registry tracks (e.g. `"NSE"`).
    pub async fn fetch(kite: &KiteClient, exchange: &str) -> Result<Self, AppError> {
        let csv_text = kite.instruments_csv(exchange).await?;
        Self::from_csv_str(&csv_text)
    }

    pub(crate) fn from_csv_str(csv_text: &str) -> Result<Self, AppError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(csv_text.as_bytes());

        let mut by_token = HashMap::new();
        let mut by_symbol = HashMap::new();

        for record in reader.deserialize() {
            let row: CatalogCsvRow = record?;
            let symbol = row.tradingsymbol.trim().to_string();
            if symbol.is_empty() {
                continue;
            }
            let instrument = Instrument {
                token: row.instrument_token,
                symbol: symbol.clone(),
                name: row.name.unwrap_or_default(),
            };
            by_symbol.insert(qualified(&row.exchange, &symbol), instrument.token);
            by_token.insert(instrument.token, instrument);
        }

        Ok(Self { by_token, by_symbol })
    }

    pub fn token_for_symbol(&self, qualified_symbol: &str) -> Option<u32> {
        self.by_symbol.get(qualified_symbol).copied()
    }

    pub fn instrument(&self, token: u32) -> Option<&Instrument> {
        self.by_token.get(&token)
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }

    /// Resolves a subscription-registry identifier — either a bare numeric
    /// token or an `EXCHANGE:SYMBOL` string — to `(token, symbol)`.
    pub fn resolve(&self, identifier: &str) -> Option<(u32, String)> {
        if let Ok(token) = identifier.parse::<u32>() {
            return self.instrument(token).map(|i| (i.token, i.symbol.clone()));
        }
        let token = self.token_for_symbol(identifier)?;
        self.instrument(token).map(|i| (i.token, i.symbol.clone()))
    }
}

/// `NSE:RELIANCE`-style qualified identifier, matching the subscription
/// registry's on-disk form.
fn qualified(exchange: &str, symbol: &str) -> String {
    format!("{exchange}:{symbol}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rows_and_builds_both_directions() {
        let csv = "instrument_token,tradingsymbol,name,exchange\n\
                   738561,RELIANCE,Reliance Industries,NSE\n\
                   2953217,TCS,Tata Consultancy Services,NSE\n";
        let catalog = InstrumentCatalog::from_csv_str(csv).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.token_for_symbol("NSE:RELIANCE"), Some(738561));
        assert_eq!(catalog.instrument(2953217).unwrap().symbol, "TCS");
    }

    #[test]
    fn resolve_accepts_either_bare_token_or_qualified_symbol() {
        let csv = "instrument_token,tradingsymbol,name,exchange\n738561,RELIANCE,Reliance Industries,NSE\n";
        let catalog = InstrumentCatalog::from_csv_str(csv).unwrap();
        assert_eq!(catalog.resolve("738561"), Some((738561, "RELIANCE".to_string())));
        assert_eq!(catalog.resolve("NSE:RELIANCE"), Some((738561, "RELIANCE".to_string())));
        assert_eq!(catalog.resolve("NSE:UNKNOWN"), None);
    }

    #[test]
    fn skips_rows_with_blank_tradingsymbol() {
        let csv = "instrument_token,tradingsymbol,name,exchange\n738561,,  ,NSE\n";
        let catalog = InstrumentCatalog::from_csv_str(csv).unwrap();
        assert!(catalog.is_empty());
    }
}
