use reqwest::StatusCode;
use tether_http::TetherClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Keep retrying while the server answers 429 Too Many Requests.
    let client = TetherClient::builder()
        .retries(3, |_, response, _| {
            let retry = response.is_some_and(|r| r.status() == StatusCode::TOO_MANY_REQUESTS);
            if retry {
                println!("got 429, retrying");
            }
            retry
        })
        .build()?;

    // httpbin picks 200 or 429 at random.
    for i in 0..10 {
        let response = client
            .get("https://httpbin.org/status/200%2C429")
            .await?;
        println!("request {i}: {}", response.status());
    }

    Ok(())
}
