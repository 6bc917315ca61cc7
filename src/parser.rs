//! Parser module for Binance WebSocket and REST messages
//!
//! Handles deserialization of depth diffs, 24h ticker events and REST
//! snapshots. Prices are normalized on the way in so that "50000.00"
//! and "50000" address the same level.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;

/// Binance depth diff message
#[derive(Debug, Clone, Deserialize)]
pub struct DepthUpdate {
    /// Event type
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time (milliseconds)
    #[serde(rename = "E", default)]
    pub event_time: u64,

    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// First update ID in event
    #[serde(rename = "U", default)]
    pub first_update_id: u64,

    /// Final update ID in event
    #[serde(rename = "u", default)]
    pub final_update_id: u64,

    /// Bids to update
    #[serde(rename = "b", default, deserialize_with = "deserialize_price_levels")]
    pub bids: Vec<PriceLevel>,

    /// Asks to update
    #[serde(rename = "a", default, deserialize_with = "deserialize_price_levels")]
    pub asks: Vec<PriceLevel>,
}

/// Binance 24h rolling ticker event
#[derive(Debug, Clone, Deserialize)]
pub struct TickerEvent {
    #[serde(rename = "e")]
    pub event_type: String,

    #[serde(rename = "E")]
    pub event_time: u64,

    #[serde(rename = "s")]
    pub symbol: String,

    /// Last price
    #[serde(rename = "c", deserialize_with = "deserialize_decimal")]
    pub last_price: Decimal,

    /// Price change percent
    #[serde(rename = "P", deserialize_with = "deserialize_decimal")]
    pub price_change_percent: Decimal,

    /// Total traded quote asset volume
    #[serde(rename = "q", deserialize_with = "deserialize_decimal")]
    pub quote_volume: Decimal,
}

/// Price level (price, quantity pair)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Depth snapshot from the REST API
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DepthSnapshot {
    /// Last update ID
    #[serde(rename = "lastUpdateId", default)]
    pub last_update_id: u64,

    /// Bids
    #[serde(default, deserialize_with = "deserialize_price_levels")]
    pub bids: Vec<PriceLevel>,

    /// Asks
    #[serde(default, deserialize_with = "deserialize_price_levels")]
    pub asks: Vec<PriceLevel>,
}

/// Response of `/ticker/price`
#[derive(Debug, Clone, Deserialize)]
pub struct LastPrice {
    #[serde(default)]
    pub symbol: String,

    #[serde(deserialize_with = "deserialize_decimal")]
    pub price: Decimal,
}

/// One entry of `/ticker/24hr`, the market listing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketTicker {
    pub symbol: String,

    #[serde(deserialize_with = "deserialize_decimal")]
    pub last_price: Decimal,

    #[serde(deserialize_with = "deserialize_decimal")]
    pub price_change_percent: Decimal,

    #[serde(deserialize_with = "deserialize_decimal")]
    pub quote_volume: Decimal,
}

/// Combined stream message wrapper
#[derive(Debug, Clone, Deserialize)]
pub struct StreamMessage {
    /// Stream name
    pub stream: String,

    /// Data payload
    pub data: serde_json::Value,
}

/// Parsed WebSocket message
#[derive(Debug, Clone)]
pub enum ParsedMessage {
    DepthUpdate(DepthUpdate),
    Tickers(Vec<TickerEvent>),
    Unknown(String),
}

impl ParsedMessage {
    /// Parse a raw WebSocket message
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(raw)?;

        // Combined streams wrap the payload
        if let Ok(stream_msg) = serde_json::from_value::<StreamMessage>(value.clone()) {
            return Self::from_value(stream_msg.data);
        }

        Self::from_value(value)
    }

    fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        if value.is_array() {
            let tickers: Vec<TickerEvent> = serde_json::from_value(value)?;
            let tickers = tickers
                .into_iter()
                .filter(|t| t.event_type == "24hrTicker")
                .collect();
            return Ok(ParsedMessage::Tickers(tickers));
        }

        match value.get("e").and_then(|e| e.as_str()) {
            Some("depthUpdate") => Ok(ParsedMessage::DepthUpdate(serde_json::from_value(value)?)),
            Some("24hrTicker") => Ok(ParsedMessage::Tickers(vec![serde_json::from_value(value)?])),
            _ => Ok(ParsedMessage::Unknown(value.to_string())),
        }
    }
}

/// Custom deserializer for Decimal from string
fn deserialize_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Decimal::from_str(&s)
        .map(|d| d.normalize())
        .map_err(serde::de::Error::custom)
}

/// Custom deserializer for price levels from array of string pairs
fn deserialize_price_levels<'de, D>(deserializer: D) -> Result<Vec<PriceLevel>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Vec<String>> = Deserialize::deserialize(deserializer)?;
    raw.into_iter()
        .map(|pair| {
            if pair.len() != 2 {
                return Err(serde::de::Error::custom("Invalid price level format"));
            }
            let price = Decimal::from_str(&pair[0]).map_err(serde::de::Error::custom)?;
            let quantity = Decimal::from_str(&pair[1]).map_err(serde::de::Error::custom)?;
            if price <= Decimal::ZERO || quantity < Decimal::ZERO {
                return Err(serde::de::Error::custom(format!(
                    "Invalid price level [{}, {}]",
                    pair[0], pair[1]
                )));
            }
            Ok(PriceLevel {
                price: price.normalize(),
                quantity: quantity.normalize(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_depth_update() {
        let raw = r#"{
            "e": "depthUpdate",
            "E": 1672531200000,
            "s": "BTCUSDT",
            "U": 100,
            "u": 105,
            "b": [["50000.00", "1.5"], ["49999.00", "2.0"]],
            "a": [["50001.00", "1.0"], ["50002.00", "0.00000000"]]
        }"#;

        let msg = ParsedMessage::parse(raw).unwrap();
        if let ParsedMessage::DepthUpdate(depth) = msg {
            assert_eq!(depth.symbol, "BTCUSDT");
            assert_eq!(depth.bids.len(), 2);
            assert_eq!(depth.asks.len(), 2);
            assert_eq!(depth.bids[0].price, dec!(50000));
            assert_eq!(depth.bids[0].price.to_string(), "50000");
            assert!(depth.asks[1].quantity.is_zero());
        } else {
            panic!("Expected DepthUpdate");
        }
    }

    #[test]
    fn test_parse_minimal_depth_update() {
        let raw = r#"{"e":"depthUpdate","s":"ETHUSDT","b":[["3000","2"]]}"#;

        match ParsedMessage::parse(raw).unwrap() {
            ParsedMessage::DepthUpdate(depth) => {
                assert_eq!(depth.bids.len(), 1);
                assert!(depth.asks.is_empty());
                assert_eq!(depth.event_time, 0);
            }
            other => panic!("Expected DepthUpdate, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_ticker() {
        let raw = r#"{
            "e": "24hrTicker",
            "E": 1672531200000,
            "s": "BTCUSDT",
            "c": "50000.50",
            "P": "-1.25",
            "q": "123456.78",
            "o": "50600.00"
        }"#;

        match ParsedMessage::parse(raw).unwrap() {
            ParsedMessage::Tickers(tickers) => {
                assert_eq!(tickers.len(), 1);
                assert_eq!(tickers[0].symbol, "BTCUSDT");
                assert_eq!(tickers[0].last_price, dec!(50000.5));
                assert_eq!(tickers[0].price_change_percent, dec!(-1.25));
            }
            other => panic!("Expected Tickers, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_ticker_array_and_combined_stream() {
        let raw = r#"{
            "stream": "!ticker@arr",
            "data": [
                {"e": "24hrTicker", "E": 1, "s": "BTCUSDT", "c": "1", "P": "0", "q": "10"},
                {"e": "24hrTicker", "E": 1, "s": "ETHUSDT", "c": "2", "P": "0", "q": "20"}
            ]
        }"#;

        match ParsedMessage::parse(raw).unwrap() {
            ParsedMessage::Tickers(tickers) => {
                let symbols: Vec<_> = tickers.iter().map(|t| t.symbol.as_str()).collect();
                assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);
            }
            other => panic!("Expected Tickers, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_is_not_an_error() {
        let msg = ParsedMessage::parse(r#"{"result": null, "id": 1}"#).unwrap();
        assert!(matches!(msg, ParsedMessage::Unknown(_)));
    }

    #[test]
    fn test_malformed_levels_rejected() {
        let negative = r#"{"e":"depthUpdate","s":"BTCUSDT","a":[["100","-1"]]}"#;
        assert!(ParsedMessage::parse(negative).is_err());

        let short = r#"{"e":"depthUpdate","s":"BTCUSDT","a":[["100"]]}"#;
        assert!(ParsedMessage::parse(short).is_err());

        assert!(ParsedMessage::parse("not json").is_err());
    }

    #[test]
    fn test_parse_rest_shapes() {
        let snapshot: DepthSnapshot = serde_json::from_str(
            r#"{"lastUpdateId": 7, "bids": [["99.5", "3"]], "asks": [["100.5", "1"]]}"#,
        )
        .unwrap();
        assert_eq!(snapshot.last_update_id, 7);
        assert_eq!(snapshot.asks[0].price, dec!(100.5));

        let price: LastPrice =
            serde_json::from_str(r#"{"symbol": "BTCUSDT", "price": "50000.01000000"}"#).unwrap();
        assert_eq!(price.price, dec!(50000.01));

        let market: MarketTicker = serde_json::from_str(
            r#"{"symbol": "BTCUSDT", "lastPrice": "1.0", "priceChangePercent": "2.5",
                "quoteVolume": "1000", "count": 12}"#,
        )
        .unwrap();
        assert_eq!(market.quote_volume, dec!(1000));
    }
}
