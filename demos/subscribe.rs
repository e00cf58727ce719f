// ABOUTME: Example application demonstrating consuming messages with a Consumer
// ABOUTME: Connects directly to a fixed nsqd address list, no lookupd involved

use nsq::Consumer;
use std::error::Error;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let addr = std::env::var("NSQD_ADDR").unwrap_or_else(|_| "127.0.0.1:4150".to_string());
    let topic = std::env::args().nth(1).unwrap_or_else(|| "events".to_string());
    let channel = std::env::args().nth(2).unwrap_or_else(|| "demo".to_string());

    let consumer = Consumer::new(topic, channel, vec![addr], 100).await?;
    println!("subscribed, waiting for messages (ctrl-c to stop)");

    while let Some(message) = consumer.next_message().await {
        println!(
            "received {} bytes, attempt {}: {:?}",
            message.body().len(),
            message.attempts(),
            String::from_utf8_lossy(message.body())
        );
        if let Err(err) = message.finish().await {
            eprintln!("failed to finish message: {err}");
        }
    }

    Ok(())
}
