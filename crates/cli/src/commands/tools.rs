//! `opsloop tools`: list the tools the model can call.

use opsloop_config::AppConfig;
use opsloop_runtime::build_supervisor_with_backend;

pub fn run(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Listing tools never calls the model, so the offline backend is enough.
    let supervisor = build_supervisor_with_backend(config, super::backend(config, true))?;
    let tools = supervisor.tool_definitions();

    println!("{} tools available:", tools.len());
    for tool in tools {
        println!();
        println!("  {}", tool.name);
        println!("    {}", tool.description);
        println!("    parameters: {}", tool.parameters);
    }
    Ok(())
}
