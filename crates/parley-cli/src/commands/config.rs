use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use parley::config::Config;
use parley::providers::{ProviderKind, resolve_provider};
use serde_json::{Value, json};

use crate::error::CliResult;
use crate::output::{OutputFormat, secret_status, truncate_string};

#[derive(Parser)]
pub struct ConfigCommand {
    #[clap(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Parser)]
pub enum ConfigSubcommand {
    #[clap(about = "Show the effective configuration (API keys are never printed)")]
    Show,
}

impl ConfigCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            ConfigSubcommand::Show => Self::show(config, format),
        }
    }

    fn show(config: &Config, format: OutputFormat) -> CliResult<()> {
        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&config_json(config))?);
            }
            OutputFormat::Table => {
                for (title, table) in config_tables(config) {
                    println!("[{title}]");
                    println!("{table}\n");
                }
            }
        }
        Ok(())
    }
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(["Setting", "Value"]);
    table
}

/// Effective configuration as JSON, with secrets reduced to set/not set
pub fn config_json(config: &Config) -> Value {
    let providers: Value = ProviderKind::ALL
        .into_iter()
        .map(|kind| {
            let p = config.provider_config(kind);
            (
                kind.to_string(),
                json!({
                    "api_key": secret_status(p.api_key.as_deref()),
                    "api_key_env": p.api_key_env,
                    "model": p.model,
                    "base_url": p.base_url,
                    "timeout_secs": p.timeout_secs,
                    "max_tokens": p.max_tokens,
                    "temperature": p.temperature,
                }),
            )
        })
        .collect::<serde_json::Map<String, Value>>()
        .into();

    json!({
        "active_provider": resolve_provider(config).to_string(),
        "provider_override": config.provider.name,
        "providers": providers,
        "search": {
            "enabled": config.search.enabled,
            "api_key": secret_status(config.search.api_key.as_deref()),
            "api_key_env": config.search.api_key_env,
            "base_url": config.search.base_url,
            "timeout_secs": config.search.timeout_secs,
            "max_results": config.search.max_results,
            "top_results": config.search.top_results,
        },
        "backend": {
            "base_url": config.backend.base_url,
            "timeout_secs": config.backend.timeout_secs,
        },
        "retry": {
            "max_attempts": config.retry.max_attempts,
            "base_delay_ms": config.retry.base_delay_ms,
            "search_max_attempts": config.retry.search_max_attempts,
            "search_base_delay_ms": config.retry.search_base_delay_ms,
            "backend_max_attempts": config.retry.backend_max_attempts,
            "backend_base_delay_ms": config.retry.backend_base_delay_ms,
        },
        "server": {
            "listen_addr": config.server.listen_addr,
            "allowed_origins": config.server.allowed_origins,
            "request_timeout_secs": config.server.request_timeout_secs,
        },
        "logging": {
            "level": config.logging.level,
            "json": config.logging.json,
        }
    })
}

/// Effective configuration as titled tables
pub fn config_tables(config: &Config) -> Vec<(String, Table)> {
    let mut tables = Vec::new();
    let active = resolve_provider(config);

    for kind in ProviderKind::ALL {
        let p = config.provider_config(kind);
        let mut table = new_table();
        table.add_row(["active", if kind == active { "yes" } else { "no" }]);
        table.add_row(["api_key", secret_status(p.api_key.as_deref())]);
        table.add_row(["api_key_env", &p.api_key_env]);
        table.add_row(["model", &p.model]);
        table.add_row(["base_url", &p.base_url]);
        table.add_row(["timeout_secs", &p.timeout_secs.to_string()]);
        table.add_row(["max_tokens", &p.max_tokens.to_string()]);
        table.add_row(["temperature", &p.temperature.to_string()]);
        tables.push((format!("Provider: {kind}"), table));
    }

    let mut search = new_table();
    search.add_row(["enabled", &config.search.enabled.to_string()]);
    search.add_row(["api_key", secret_status(config.search.api_key.as_deref())]);
    search.add_row(["api_key_env", &config.search.api_key_env]);
    search.add_row(["base_url", &config.search.base_url]);
    search.add_row(["timeout_secs", &config.search.timeout_secs.to_string()]);
    search.add_row(["top_results", &config.search.top_results.to_string()]);
    tables.push(("Search".to_string(), search));

    let mut backend = new_table();
    backend.add_row([
        "base_url",
        config.backend.base_url.as_deref().unwrap_or("(not set)"),
    ]);
    backend.add_row(["timeout_secs", &config.backend.timeout_secs.to_string()]);
    tables.push(("Backend".to_string(), backend));

    let mut retry = new_table();
    retry.add_row([
        "provider",
        &format!(
            "{} attempts, {} ms base",
            config.retry.max_attempts, config.retry.base_delay_ms
        ),
    ]);
    retry.add_row([
        "search",
        &format!(
            "{} attempts, {} ms base",
            config.retry.search_max_attempts, config.retry.search_base_delay_ms
        ),
    ]);
    retry.add_row([
        "backend",
        &format!(
            "{} attempts, {} ms base",
            config.retry.backend_max_attempts, config.retry.backend_base_delay_ms
        ),
    ]);
    tables.push(("Retry".to_string(), retry));

    let mut server = new_table();
    server.add_row(["listen_addr", &config.server.listen_addr]);
    server.add_row([
        "allowed_origins",
        &truncate_string(&config.server.allowed_origins.join(", "), 60),
    ]);
    server.add_row([
        "request_timeout_secs",
        &config.server.request_timeout_secs.to_string(),
    ]);
    tables.push(("Server".to_string(), server));

    let mut logging = new_table();
    logging.add_row([
        "level",
        config.logging.level.as_deref().unwrap_or("(default)"),
    ]);
    logging.add_row(["json", &config.logging.json.to_string()]);
    tables.push(("Logging".to_string(), logging));

    tables
}
