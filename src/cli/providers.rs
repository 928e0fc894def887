//! Providers command implementation.

use std::io::BufRead;
use std::sync::Arc;

use serde::Serialize;

use crate::cli::args::{
    KeyArgs, ProviderAddArgs, ProviderSettingsArgs, ProviderUpdateArgs, ProvidersCommand,
};
use crate::cli::open_registry;
use crate::core::provider::{NewProvider, Provider, ProviderConfig, ProviderUpdate};
use crate::core::registry::ProviderRegistry;
use crate::core::secrets::ApiKeyRef;
use crate::error::{AicwError, Result};
use crate::render::{self, human};
use crate::storage::config::ResolvedConfig;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Message {
    message: String,
}

/// Execute a providers subcommand.
///
/// # Errors
///
/// Returns an error if the registry cannot be opened or the operation fails.
pub async fn execute(cmd: &ProvidersCommand, resolved: &ResolvedConfig) -> Result<()> {
    let registry = open_registry(resolved)?;
    let format = resolved.format;
    let pretty = resolved.pretty;

    let output = match cmd {
        ProvidersCommand::List => {
            let providers = registry.list_providers();
            render::render("providers list", &providers, Vec::new(), format, pretty, |p| {
                human::render_providers(p)
            })?
        }
        ProvidersCommand::Add(args) => {
            let provider = add(&registry, args, &mut std::io::stdin().lock())?;
            render::render("providers add", &provider, Vec::new(), format, pretty, human::render_provider)?
        }
        ProvidersCommand::Update(args) => {
            let provider = update(&registry, args, &mut std::io::stdin().lock())?;
            render::render("providers update", &provider, Vec::new(), format, pretty, human::render_provider)?
        }
        ProvidersCommand::Enable { id } | ProvidersCommand::Disable { id } => {
            let enabled = matches!(cmd, ProvidersCommand::Enable { .. });
            let command = if enabled { "providers enable" } else { "providers disable" };
            let provider = registry.set_enabled(id, enabled)?;
            render::render(command, &provider, Vec::new(), format, pretty, human::render_provider)?
        }
        ProvidersCommand::Remove { id } => {
            registry.delete_provider(id)?;
            let message = Message {
                message: format!("Removed provider {id}"),
            };
            render::render("providers remove", &message, Vec::new(), format, pretty, |m| {
                m.message.clone()
            })?
        }
        ProvidersCommand::Test { id } => {
            let record = registry.test_provider(id).await?;
            registry.flush_if_dirty()?;
            let records = vec![record];
            render::render("providers test", &records, Vec::new(), format, pretty, |r| {
                human::render_health(r)
            })?
        }
        ProvidersCommand::Health => {
            let records = registry.refresh_all_health().await;
            render::render("providers health", &records, Vec::new(), format, pretty, |r| {
                human::render_health(r)
            })?
        }
        ProvidersCommand::Init => {
            let added = registry.initialize_default_providers()?;
            let message = Message {
                message: init_message(added, registry.list_providers().len()),
            };
            render::render("providers init", &message, Vec::new(), format, pretty, |m| {
                m.message.clone()
            })?
        }
    };

    println!("{}", output.trim_end());
    Ok(())
}

fn init_message(added: usize, total: usize) -> String {
    if added > 0 {
        format!("Registered {added} provider(s) from environment keys")
    } else if total > 0 {
        format!("{total} provider(s) already configured; nothing added")
    } else {
        "No OPENAI_API_KEY or ANTHROPIC_API_KEY found; nothing added".to_string()
    }
}

fn add(
    registry: &Arc<ProviderRegistry>,
    args: &ProviderAddArgs,
    stdin: &mut impl BufRead,
) -> Result<Provider> {
    let key = args
        .key
        .key_ref()
        .unwrap_or_else(|| ApiKeyRef::env(args.provider_type.default_key_env()));
    store_key_if_requested(&args.key, &key, stdin)?;

    let mut config = ProviderConfig::for_type(args.provider_type, key);
    apply_settings(&mut config, &args.settings);

    registry.create_provider(NewProvider {
        id: args.id.clone(),
        name: args.name.clone(),
        provider_type: args.provider_type,
        enabled: !args.disabled,
        priority: args.priority,
        config,
        rate_limits: None,
    })
}

fn update(
    registry: &Arc<ProviderRegistry>,
    args: &ProviderUpdateArgs,
    stdin: &mut impl BufRead,
) -> Result<Provider> {
    let api_key = args.key.key_ref();
    if let Some(key) = &api_key {
        store_key_if_requested(&args.key, key, stdin)?;
    }
    let settings = &args.settings;
    registry.update_provider(
        &args.id,
        ProviderUpdate {
            name: args.name.clone(),
            priority: args.priority,
            api_key,
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            timeout_ms: settings.timeout_ms,
            base_url: settings.base_url.clone(),
            cost_per_1k_tokens: settings.cost_per_1k,
            ..ProviderUpdate::default()
        },
    )
}

fn apply_settings(config: &mut ProviderConfig, settings: &ProviderSettingsArgs) {
    if let Some(model) = &settings.model {
        config.model.clone_from(model);
    }
    if let Some(url) = &settings.base_url {
        config.base_url = Some(url.clone());
    }
    if let Some(max_tokens) = settings.max_tokens {
        config.max_tokens = max_tokens;
    }
    if let Some(temperature) = settings.temperature {
        config.temperature = temperature;
    }
    if let Some(timeout_ms) = settings.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    if settings.cost_per_1k.is_some() {
        config.cost_per_1k_tokens = settings.cost_per_1k;
    }
}

/// With `--store-key`, read one line from `stdin` into the keyring entry.
fn store_key_if_requested(
    args: &KeyArgs,
    key: &ApiKeyRef,
    stdin: &mut impl BufRead,
) -> Result<()> {
    if !args.store_key {
        return Ok(());
    }
    let mut line = String::new();
    stdin.read_line(&mut line)?;
    let secret = line.trim();
    if secret.is_empty() {
        return Err(AicwError::Config("no API key on stdin".to_string()));
    }
    key.store(secret)?;
    tracing::info!(key = %key.describe(), "API key stored");
    Ok(())
}
