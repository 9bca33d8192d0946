use amqp_receiver::{obtain_url, AmqpReceiver, FacadeSink, Message, ReceiverConfig};
use std::sync::Arc;
use std::time::Duration;

// Connects to a custom broker and stops the receiver after ten seconds, whether
// or not the broker was ever reached.
#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let host = std::env::var("RABBITMQ_HOST").unwrap_or_else(|_| "192.168.1.50".to_string());
    let url = obtain_url("user", "password", &host, 5672, 5, 5400);

    let config = match ReceiverConfig::builder("me", "message", "hello")
        .url(url)
        .logger(Arc::new(FacadeSink))
        .build()
    {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            return;
        }
    };
    let receiver = Arc::new(AmqpReceiver::new(config));

    let stopper = receiver.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        stopper.stop().await;
    });

    if let Err(e) = receiver
        .start(|message: Message| println!("{:?}", message))
        .await
    {
        log::error!("Receiver failed: {}", e);
    }
    log::info!("Receiver finished in state {:?}", receiver.state());
}
