use amqp_receiver::{AmqpReceiver, ConnectionParams, FacadeSink, Message, ReceiverConfig};
use std::sync::Arc;

// Consumes `message` (bound to exchange `me` with key `hello`) and prints every body.
#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let rabbitmq_url =
        std::env::var("RABBITMQ_URL").unwrap_or_else(|_| ConnectionParams::default().url());

    let config = match ReceiverConfig::builder("me", "message", "hello")
        .url(rabbitmq_url)
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

    let consumer = receiver.clone();
    let mut run = tokio::spawn(async move {
        consumer
            .start(|message: Message| {
                println!("{} [{}]: {}", message.routing_key, message.delivery_tag, message.body_lossy());
            })
            .await
    });

    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl+C received. Shutting down.");
            receiver.stop().await;
            run.await
        }
        result = &mut run => result,
    };

    match result {
        Ok(Err(e)) => log::error!("Receiver failed: {}", e),
        Ok(Ok(())) => log::info!("Receiver stopped."),
        Err(e) => log::error!("Receiver task aborted: {}", e),
    }
}
