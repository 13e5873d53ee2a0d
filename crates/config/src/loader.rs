//! File loading, environment overlay, and validation.

use std::path::Path;

use anyhow::bail;
use indoc::indoc;
use secrecy::SecretString;

use crate::{Config, DatabaseUrl, ProviderKind};

pub(crate) fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let config: Config = toml::from_str(&content)?;

    Ok(config)
}

/// Overlay the documented environment keys on a configuration.
///
/// Unparseable numeric values are ignored with a warning rather than
/// aborting startup; the file value (or default) stays in effect.
pub(crate) fn overlay(config: &mut Config, get: &impl Fn(&str) -> Option<String>) {
    for kind in ProviderKind::all() {
        if let Some(key) = get(kind.api_key_env()) {
            config.llm.entry_for(kind).api_key = Some(SecretString::from(key));
        }
    }

    if let Some(raw) = get("DATABASE_URL") {
        match DatabaseUrl::parse(&raw) {
            Ok(url) => config.storage.database_url = Some(url),
            Err(err) => log_invalid("DATABASE_URL", &err.to_string()),
        }
    }

    if let Some(secret) = get("JWT_SECRET_KEY") {
        config.auth.jwt_secret = Some(SecretString::from(secret));
    }

    if let Some(id) = get("GOOGLE_CLIENT_ID") {
        config.google.client_id = Some(id);
    }

    if let Some(secret) = get("GOOGLE_CLIENT_SECRET") {
        config.google.client_secret = Some(SecretString::from(secret));
    }

    if let Some(uri) = get("GOOGLE_REDIRECT_URI") {
        config.google.redirect_uri = Some(uri);
    }

    if let Some(model) = get("JUDGE_MODEL_ID") {
        config.llm.judge_model = model;
    }

    overlay_number(get, "CONTEXT_MAX_MESSAGES", &mut config.context.max_messages);
    overlay_number(get, "CONTEXT_MAX_CHARS", &mut config.context.max_kb_chars);
    overlay_number(get, "TOOL_LOOP_MAX_ITERS", &mut config.llm.tool_loop.max_iterations);
    overlay_number(get, "TOOL_CALL_DEADLINE_SEC", &mut config.llm.tool_loop.call_deadline_secs);
}

fn overlay_number<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = get(key) else {
        return;
    };

    match raw.trim().parse() {
        Ok(value) => *slot = value,
        Err(_) => log_invalid(key, &raw),
    }
}

fn log_invalid(key: &str, raw: &str) {
    // The logger may not be installed yet during early startup.
    eprintln!("ignoring invalid {key} value: {raw}");
}

pub(crate) fn validate(config: &Config) -> anyhow::Result<()> {
    if !config.llm.has_active_providers() {
        bail!(indoc! {r#"
            No LLM providers configured. Concord requires at least one provider API key to function.

            Set one of OPENAI_API_KEY, GROK_API_KEY, ANTHROPIC_API_KEY or DEEPSEEK_API_KEY,
            or add a provider to the configuration file:

              [llm.providers.openai]
              type = "openai"
              api_key = "sk-..."
        "#});
    }

    if config.auth.jwt_secret.is_none() {
        bail!("JWT_SECRET_KEY is required to sign client tokens");
    }

    if config.google.client_id.is_some() && !config.google.is_configured() {
        bail!("incomplete Google OAuth configuration: client_id, client_secret and redirect_uri must all be set");
    }

    Ok(())
}
