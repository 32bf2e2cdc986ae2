use sentinel_proxy::{capture::CaptureLog, config::Config, proxy::build_http_client, server::build_router, state::AppState};
use std::time::Duration;
use thin_logger::log::{error, info, LevelFilter};
use tokio::net::TcpListener;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
   let config = Config::from_env();
   let level = if config.verbose { LevelFilter::Debug } else { LevelFilter::Info };
   thin_logger::build(Some(level)).init();

   let log = CaptureLog::open(&config.data_dir).await?;
   let state = AppState::new(log, build_http_client());
   let router = build_router(state.clone());

   let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
   let bound_port = listener.local_addr()?.port();
   info!("proxy listening on http://0.0.0.0:{bound_port}, capturing to {}", config.data_dir.display());

   let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
   let server_task = tokio::spawn(async move {
      axum::serve(listener, router)
         .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
         })
         .await
   });

   tokio::signal::ctrl_c().await?;
   info!("shutdown signal received, draining in-flight requests (deadline {SHUTDOWN_DEADLINE:?})");
   let _ = shutdown_tx.send(());

   match tokio::time::timeout(SHUTDOWN_DEADLINE, server_task).await {
      Ok(Ok(Ok(()))) => info!("server stopped cleanly"),
      Ok(Ok(Err(e))) => error!("server error during shutdown: {e}"),
      Ok(Err(e)) => error!("server task panicked during shutdown: {e}"),
      Err(_) => error!("shutdown deadline exceeded, exiting without waiting further"),
   }

   state.fanout.close_all();
   state.log.close().await;
   Ok(())
}
