// ABOUTME: Example application demonstrating consuming messages discovered via nsqlookupd
// ABOUTME: Producers are added and removed automatically as the lookupd poller reconciles its pool

use nsq::{Consumer, LookupConfig};
use std::error::Error;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let lookupd_addr =
        std::env::var("NSQLOOKUPD_ADDR").unwrap_or_else(|_| "http://127.0.0.1:4161".to_string());
    let topic = std::env::args().nth(1).unwrap_or_else(|| "events".to_string());
    let channel = std::env::args().nth(2).unwrap_or_else(|| "demo".to_string());

    let lookup = LookupConfig::new(vec![lookupd_addr]);
    let consumer = Consumer::with_lookupd(topic, channel, Vec::new(), lookup, 100).await?;
    println!("subscribed via lookupd, waiting for messages (ctrl-c to stop)");

    while let Some(message) = consumer.next_message().await {
        println!("received: {:?}", String::from_utf8_lossy(message.body()));
        if let Err(err) = message.finish().await {
            eprintln!("failed to finish message: {err}");
        }
    }

    Ok(())
}
