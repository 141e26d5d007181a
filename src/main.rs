//! Molt Agent - 按修订号部署预览环境
//!
//! Usage:
//! - Normal mode: `molt-agent`
//! - With custom port: `molt-agent --port 5001`

use molt_agent::RuntimeConfig;

/// 解析命令行参数
fn parse_args() -> RuntimeConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = RuntimeConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" if i + 1 < args.len() => {
                config.port_override = args[i + 1].parse().ok();
                i += 2;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                i += 1;
            }
        }
    }

    config
}

fn print_help() {
    println!("Molt Agent - per-revision preview deployments");
    println!();
    println!("USAGE:");
    println!("    molt-agent [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>    Override the listening port");
    println!("    -h, --help       Print help information");
    println!();
    println!("ENVIRONMENT:");
    println!("    HOST, PORT, MOLT_BASE_DOMAIN, MOLT_REPOS_DIR, MOLT_GIT_URL_TEMPLATE,");
    println!("    MOLT_NETWORK, MOLT_NETWORK_SUBNET, MOLT_COMPOSE_COMMAND,");
    println!("    MOLT_STAGE_TIMEOUT_SECS, MOLT_STORE_CALLBACK_URL, MOLT_GITHUB_TOKEN,");
    println!("    MOLT_DEPLOY_KEY");
}

fn main() {
    let config = parse_args();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create runtime: {}", e);
            std::process::exit(1);
        }
    };
    rt.block_on(async {
        molt_agent::init_and_run_with_config(config).await;
    });
}
