use tether_http::TetherClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 60 requests per minute: one request per second.
    let client = TetherClient::builder().rate_limit(60).build()?;

    for i in 0..10 {
        let response = client.get("https://httpbin.org/anything").await?;
        println!("request {i}: {}", response.status());
    }

    Ok(())
}
