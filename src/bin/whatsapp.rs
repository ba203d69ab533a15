//! Regimen WhatsApp 服务
//!
//! 通过 WhatsApp Cloud API 与用户对话。
//!
//! 环境变量:
//! - WHATSAPP_ACCESS_TOKEN: Meta WhatsApp API 访问令牌
//! - WHATSAPP_PHONE_NUMBER_ID: 企业电话号码 ID
//! - REGIMEN__WHATSAPP__VERIFY_TOKEN: Webhook 验证令牌 (默认 "regimen")
//!
//! 启动: cargo run --bin regimen-whatsapp --features whatsapp

#[cfg(feature = "whatsapp")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use std::path::PathBuf;
    use std::sync::Arc;

    use anyhow::Context;
    use regimen::config::load_config;
    use regimen::core::ShutdownManager;
    use regimen::integrations::whatsapp::{create_router, forward_outbound, WhatsappState};
    use regimen::storage::create_store;
    use regimen::{observability, Dispatcher, RitualEngine, RitualSettings};

    let config_path = std::env::var("REGIMEN_CONFIG").ok().map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    observability::init(&cfg.logging.filter);

    let access_token =
        std::env::var("WHATSAPP_ACCESS_TOKEN").context("WHATSAPP_ACCESS_TOKEN must be set")?;
    let phone_number_id = std::env::var("WHATSAPP_PHONE_NUMBER_ID")
        .context("WHATSAPP_PHONE_NUMBER_ID must be set")?;

    let store = create_store(Some(cfg.app.db_path.as_path())).context("Failed to open database")?;
    let (engine, outbound_rx) = RitualEngine::new(store, RitualSettings::from_config(&cfg));

    let state = Arc::new(WhatsappState::new(
        Dispatcher::new(engine.clone()),
        access_token,
        phone_number_id,
        cfg.whatsapp.api_base.clone(),
        cfg.whatsapp.verify_token.clone(),
    ));
    tokio::spawn(forward_outbound(state.clone(), outbound_rx));

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&cfg.whatsapp.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.whatsapp.listen_addr))?;
    tracing::info!("Regimen WhatsApp server listening on http://{}", cfg.whatsapp.listen_addr);
    tracing::info!("Webhook URL: http://YOUR_HOST/webhook");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { signal.wait_for_shutdown().await })
        .await?;

    engine.shutdown();
    Ok(())
}

#[cfg(not(feature = "whatsapp"))]
fn main() {
    eprintln!("请使用 --features whatsapp 编译: cargo run --bin regimen-whatsapp --features whatsapp");
    std::process::exit(1);
}
