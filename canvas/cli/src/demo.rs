//! Offline demo data
//!
//! Seeds an [`InMemoryBackend`] so every subcommand works without a
//! visualization service.

use canvas_core::{InMemoryBackend, VizPath};

const GAS_FEES: &str = r#"{
    "title": "Gas fees",
    "chart": "bar",
    "data": { "inline": [
        { "hour": "00", "gwei": 18 },
        { "hour": "06", "gwei": 24 },
        { "hour": "12", "gwei": 41 },
        { "hour": "18", "gwei": 33 }
    ] },
    "x": { "field": "hour" },
    "series": [{ "field": "gwei", "label": "Gwei" }]
}"#;

const TOKEN_SHARE: &str = r#"{
    "title": "Token share",
    "chart": "pie",
    "data": { "inline": [
        { "token": "ETH", "share": 0.55 },
        { "token": "USDC", "share": 0.30 },
        { "token": "other", "share": 0.15 }
    ] }
}"#;

const ETH_PRICE: &str = r#"{
    "title": "ETH price",
    "chart": "line",
    "data": { "url": "/data/eth_price.json" },
    "x": { "field": "date" },
    "series": [{ "field": "close", "label": "Close" }]
}"#;

const BTC_VOLUME: &str = r#"{
    "title": "BTC volume",
    "chart": "area",
    "data": { "url": "/data/btc_volume.json" },
    "x": { "field": "date" },
    "series": [{ "field": "volume" }]
}"#;

/// Backend with two templates and two canned prompts
pub fn backend() -> InMemoryBackend {
    let backend = InMemoryBackend::new();
    backend.insert_source(VizPath::template("gas_fees.viz"), GAS_FEES);
    backend.insert_source(VizPath::template("token_share.viz"), TOKEN_SHARE);
    backend.on_prompt("show ETH price", &[("eth_price.viz", ETH_PRICE)]);
    backend.on_prompt(
        "compare ETH and BTC",
        &[("eth_price.viz", ETH_PRICE), ("btc_volume.viz", BTC_VOLUME)],
    );
    backend.set_prompt_reply("Here is what I found.");
    backend
}
