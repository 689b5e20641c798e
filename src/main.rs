use chat4o_relay::error::AppError;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,chat4o_relay=debug")),
        )
        .json()
        .init();

    if let Err(err) = run().await {
        eprintln!("error: {}", err.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let state = chat4o_relay::app::load_state()?;
    let app = chat4o_relay::app::build_app(state.clone());
    let addr: std::net::SocketAddr = state
        .config
        .listen
        .parse()
        .map_err(|err: std::net::AddrParseError| {
            AppError::config(format!("invalid listen address: {err}"))
        })?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::config(format!("bind {addr} failed: {err}")))?;
    tracing::info!(
        models = ?state.config.models,
        upstream = %state.config.upstream.base_url,
        "listening on {}",
        addr
    );
    axum::serve(listener, app)
        .await
        .map_err(|err| AppError::internal(format!("serve failed: {err}")))?;
    Ok(())
}
