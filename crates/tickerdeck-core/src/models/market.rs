use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketQuote {
    pub ticker: String,
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
    pub price: f64,
    #[serde(rename = "changePct", default)]
    pub change_pct: Option<f64>,
    #[serde(rename = "dayHigh", default)]
    pub day_high: Option<f64>,
    #[serde(rename = "dayLow", default)]
    pub day_low: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(rename = "asOf", default)]
    pub as_of: Option<String>,
}

impl MarketQuote {
    /// Direction of the daily move, for coloring the quote row
    pub fn is_up(&self) -> bool {
        self.change_pct.map(|pct| pct >= 0.0).unwrap_or(true)
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.ticker)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketQuotesResponse {
    #[serde(default)]
    pub quotes: Vec<MarketQuote>,
}
