//! `opsloop serve`: run the HTTP gateway.

use opsloop_config::AppConfig;
use opsloop_runtime::build_supervisor_with_backend;

pub async fn run(
    mut config: AppConfig,
    port: Option<u16>,
    host: Option<String>,
    offline: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(port) = port {
        config.gateway.port = port;
    }
    if let Some(host) = host {
        config.gateway.host = host;
    }

    let backend = super::backend(&config, offline);
    let supervisor = build_supervisor_with_backend(&config, backend)?;

    println!("OpsLoop gateway");
    println!("   Listening:  {}:{}", config.gateway.host, config.gateway.port);
    println!("   Backend:    {}", supervisor.backend_name());
    println!("   Model:      {}", config.inference.model);
    println!(
        "   Loops:      {} concurrent, {} steps / {}s by default",
        config.supervisor.max_concurrent_loops,
        config.reasoning.max_steps,
        config.reasoning.deadline_secs
    );

    opsloop_gateway::serve(&config.gateway, supervisor).await
}
