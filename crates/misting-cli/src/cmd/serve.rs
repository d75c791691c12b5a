use anyhow::Result;
use misting_core::config::Config;
use misting_core::Controller;

pub fn run(mut config: Config, bind: Option<String>) -> Result<()> {
    if let Some(bind) = bind {
        config.http.bind = bind;
    }
    let addr = config.http.bind.clone();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let (controller, tasks) = Controller::open(config).await?;
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        println!("misting listening on http://{}", listener.local_addr()?);

        let result = tokio::select! {
            res = misting_server::serve_on(controller, listener) => res,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                Ok(())
            }
        };

        // Pins keep their last level; the next start reconciles them.
        tasks.abort_all();
        result
    })
}
