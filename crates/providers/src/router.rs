//! Adapter selection: picks the adapter and transport for a configured vendor.
//!
//! Selection happens once per agent; the loop itself never branches on the
//! provider.

use std::sync::Arc;
use std::time::Duration;

use streamloop_config::{AppConfig, ProviderKind};
use streamloop_core::{ProviderAdapter, TransportError};
use streamloop_telemetry::PricingTable;

use crate::anthropic::AnthropicAdapter;
use crate::gemini::GeminiAdapter;
use crate::openai_compat::OpenAiAdapter;
use crate::transport::{AuthScheme, HttpTransport};

/// Build the adapter for a vendor.
pub fn build_adapter(
    kind: ProviderKind,
    base_url: Option<&str>,
    pricing: Arc<PricingTable>,
) -> Box<dyn ProviderAdapter> {
    match kind {
        ProviderKind::Anthropic => {
            let mut adapter = AnthropicAdapter::new(pricing);
            if let Some(url) = base_url {
                adapter = adapter.with_base_url(url);
            }
            Box::new(adapter)
        }
        ProviderKind::OpenAi => {
            let mut adapter = OpenAiAdapter::new(pricing);
            if let Some(url) = base_url {
                adapter = adapter.with_base_url(url);
            }
            Box::new(adapter)
        }
        ProviderKind::Gemini => {
            let mut adapter = GeminiAdapter::new(pricing);
            if let Some(url) = base_url {
                adapter = adapter.with_base_url(url);
            }
            Box::new(adapter)
        }
    }
}

/// How each vendor expects its API key.
pub fn auth_scheme(kind: ProviderKind) -> AuthScheme {
    match kind {
        ProviderKind::Anthropic => AuthScheme::XApiKey,
        ProviderKind::OpenAi => AuthScheme::Bearer,
        ProviderKind::Gemini => AuthScheme::GoogApiKey,
    }
}

/// The built-in price table with the config's `[custom_pricing]` applied.
pub fn pricing_from_config(config: &AppConfig) -> PricingTable {
    let table = PricingTable::with_defaults();
    for (model, pricing) in &config.custom_pricing {
        table.set(model.clone(), *pricing);
    }
    table
}

/// Build the adapter and transport described by the configuration.
pub fn build_from_config(
    config: &AppConfig,
) -> Result<(Box<dyn ProviderAdapter>, HttpTransport), TransportError> {
    let pricing = Arc::new(pricing_from_config(config));
    let adapter = build_adapter(config.provider, config.base_url.as_deref(), pricing);
    let transport = HttpTransport::with_timeout(
        auth_scheme(config.provider),
        config.api_key.clone(),
        Duration::from_secs(config.request_timeout_secs),
    )?;

    tracing::debug!(
        provider = %config.provider,
        model = %config.effective_model(),
        "Built provider adapter"
    );

    Ok((adapter, transport))
}
