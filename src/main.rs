use steward::config::Config;
use steward::core::assistant::Assistant;

#[tokio::main]
async fn main() {
    let (log_tx, _) = tokio::sync::broadcast::channel(256);
    steward::logging::init(log_tx.clone());

    let config = Config::from_env();
    match Assistant::boot(config, log_tx).await {
        Ok(assistant) => {
            if let Err(e) = assistant.run().await {
                eprintln!("steward: {}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("steward: failed to boot: {}", e);
            std::process::exit(1);
        }
    }
}
