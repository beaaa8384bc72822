use mass_translate_server::config::Config;
use tracing::error;

#[tokio::main]
async fn main() {
    // Reads .env before tracing so RUST_LOG from it applies.
    let config = Config::from_env();
    mass_translate_server::init_tracing();

    let result = match config {
        Ok(config) => mass_translate_server::run(config).await,
        Err(e) => Err(e.into()),
    };
    if let Err(e) = result {
        error!(error = %e, "mass-translate-server failed");
        std::process::exit(1);
    }
}
