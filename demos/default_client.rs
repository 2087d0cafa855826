use std::collections::HashMap;

use tether_http::{decode_json, TetherClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let client = TetherClient::new();

    let response = client.get("https://httpbin.org/anything").await?;
    let body: HashMap<String, serde_json::Value> = decode_json(Some(response)).await?;

    println!("{body:#?}");
    Ok(())
}
