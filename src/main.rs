use std::sync::Arc;

use onnix_backend::{
    config::settings::Settings,
    services::market_data::{Timeframe, YahooChartProvider},
    services::signal_engine::SignalService,
    utils::types::ApiResponse,
};

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    println!("Starting Onnix signal core…");

    let settings = Settings::new().unwrap_or_else(|e| {
        eprintln!("Failed to load settings: {e}");
        std::process::exit(1);
    });

    let mut args = std::env::args().skip(1);
    let symbol = args.next().unwrap_or_else(|| "EURUSD=X".to_string());
    let timeframe: Timeframe = args
        .next()
        .unwrap_or_else(|| "5m".to_string())
        .parse()
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let expiry: Timeframe = args
        .next()
        .unwrap_or_else(|| timeframe.as_str().to_string())
        .parse()
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let provider = Arc::new(YahooChartProvider::new(settings.http_timeout_secs)?);
    let balance = settings.account_balance;
    let service = SignalService::new(provider, settings);

    let signal = service.generate_signal(&symbol, timeframe, expiry).await;
    let assessment = service.assess_risk(&signal, balance);

    log::info!(
        "{symbol}: {:?} confidence {} ({}) -> {:?}",
        signal.direction,
        signal.confidence,
        signal.confidence_label(),
        assessment.recommendation
    );

    let out = ApiResponse::ok(serde_json::json!({
        "signal": signal,
        "risk": assessment,
        "session": service.session_summary(),
    }));
    println!("{}", serde_json::to_string_pretty(&out)?);

    Ok(())
}
