//! Adapter construction from `[[providers]]`.

use std::sync::Arc;

use failsafe_core::config::{resolve_secret, ControlConfig, ControlFlavor, ProviderConfig, ProviderKind};
use failsafe_core::{Clock, ConfigError, ConfigResult, RetryPolicy};

use crate::adapter::ProviderAdapter;
use crate::composite::CompositeStandby;
use crate::control::{ControlPlane, FlyControl, RenderControl};
use crate::endpoint::{http_client, StandbyEndpoint};
use crate::http::HttpStandby;
use crate::local::LocalProvider;

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Build the adapter for one configured provider, resolving its
/// credentials through `lookup`.
pub fn build_adapter(
    config: &ProviderConfig,
    lookup: Lookup<'_>,
    clock: Arc<dyn Clock>,
) -> ConfigResult<Arc<dyn ProviderAdapter>> {
    let field = |name: &str| format!("providers.{}.{name}", config.name);

    if config.kind == ProviderKind::Local {
        return Ok(Arc::new(LocalProvider::new(&config.name)));
    }

    let http = http_client(config.request_timeout).map_err(|e| ConfigError::Invalid {
        field: field("request_timeout"),
        reason: e.to_string(),
    })?;
    let poll = RetryPolicy::fixed(config.health_attempts, config.health_delay, config.request_timeout);

    match config.kind {
        ProviderKind::Http => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| ConfigError::Missing(field("url")))?;
            let key_env = config
                .api_key_env
                .as_deref()
                .ok_or_else(|| ConfigError::Missing(field("api_key_env")))?;
            let api_key = resolve_secret(key_env, &field("api_key_env"), lookup)?;

            let mut endpoint = StandbyEndpoint::new(&config.name, url, api_key, http.clone());
            if let Some(control) = &config.control {
                endpoint = endpoint.with_control(build_control(control, &http, lookup, &field("control"))?);
            }
            Ok(Arc::new(HttpStandby::new(&config.name, endpoint, poll, clock)))
        }
        ProviderKind::Composite => {
            let mut apps = Vec::with_capacity(config.apps.len());
            for app in &config.apps {
                let app_field = |name: &str| field(&format!("apps.{}.{name}", app.name));
                let key_env = app
                    .api_key_env
                    .as_deref()
                    .or(config.api_key_env.as_deref())
                    .ok_or_else(|| ConfigError::Missing(app_field("api_key_env")))?;
                let api_key = resolve_secret(key_env, &app_field("api_key_env"), lookup)?;

                let mut endpoint = StandbyEndpoint::new(&app.name, &app.url, api_key, http.clone());
                if let Some(control) = &app.control {
                    endpoint = endpoint.with_control(build_control(control, &http, lookup, &app_field("control"))?);
                }
                apps.push(endpoint);
            }
            Ok(Arc::new(CompositeStandby::new(&config.name, apps, poll, clock)))
        }
        ProviderKind::Local => Ok(Arc::new(LocalProvider::new(&config.name))),
    }
}

fn build_control(
    config: &ControlConfig,
    http: &reqwest::Client,
    lookup: Lookup<'_>,
    field: &str,
) -> ConfigResult<Arc<dyn ControlPlane>> {
    let token = resolve_secret(&config.token_env, &format!("{field}.token_env"), lookup)?;
    let base = config.base_url.as_deref();
    let control: Arc<dyn ControlPlane> = match config.flavor {
        ControlFlavor::Render => Arc::new(RenderControl::new(http.clone(), base, token, &config.service_id)),
        ControlFlavor::Fly => Arc::new(FlyControl::new(http.clone(), base, token, &config.service_id)),
    };
    Ok(control)
}
