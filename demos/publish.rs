// ABOUTME: Example application demonstrating publishing messages with a Producer
// ABOUTME: Shows connecting to one or more nsqd instances and publishing a single message

use nsq::Producer;
use std::error::Error;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let addr = std::env::var("NSQD_ADDR").unwrap_or_else(|_| "127.0.0.1:4150".to_string());
    let topic = std::env::args().nth(1).unwrap_or_else(|| "events".to_string());
    let body = std::env::args().nth(2).unwrap_or_else(|| "hello world".to_string());

    let producer = Producer::new([addr.as_str()]).await?;
    producer.publish(&topic, body).await?;
    println!("published to {topic}");

    producer.close().await;
    Ok(())
}
