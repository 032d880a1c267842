use std::path::Path;

use indexmap::IndexMap;
use secrecy::ExposeSecret;

use crate::Config;
use crate::routing::{ResolvedRoutes, RouteTarget, parse_target};

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, environment variable
    /// expansion fails, TOML parsing fails, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        let expanded =
            crate::env::expand_env(&raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self = toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate internal consistency and resolve the route pools
    ///
    /// # Errors
    ///
    /// Returns an error when no provider is configured, a credential is
    /// empty, the `default` pool is missing, or any pool target does not
    /// resolve against the provider table
    pub fn validate(&self) -> anyhow::Result<ResolvedRoutes> {
        self.validate_providers()?;
        self.resolve_routes()
    }

    fn validate_providers(&self) -> anyhow::Result<()> {
        if self.providers.is_empty() {
            anyhow::bail!("at least one provider must be configured");
        }

        for (name, provider) in &self.providers {
            if provider.auth.keys.is_empty() {
                anyhow::bail!("provider '{name}' has no credentials configured");
            }
            for (alias, key) in &provider.auth.keys {
                if key.value.expose_secret().is_empty() {
                    anyhow::bail!("provider '{name}' credential '{alias}' is empty");
                }
            }
            if provider.models.is_empty() {
                anyhow::bail!("provider '{name}' serves no models");
            }
        }

        Ok(())
    }

    /// Parse and check every route pool target
    fn resolve_routes(&self) -> anyhow::Result<ResolvedRoutes> {
        if !self.routing.pools.contains_key("default") {
            anyhow::bail!("routing must define a 'default' pool");
        }

        let alias_exists = |provider: &str, alias: &str| {
            self.providers
                .get(provider)
                .is_some_and(|p| p.auth.keys.contains_key(alias))
        };

        let mut pools: IndexMap<String, Vec<RouteTarget>> = IndexMap::new();

        for (route, targets) in &self.routing.pools {
            if targets.is_empty() {
                anyhow::bail!("route '{route}' has no targets");
            }

            let mut resolved = Vec::with_capacity(targets.len());
            for raw in targets {
                let target = parse_target(raw, &alias_exists)
                    .ok_or_else(|| anyhow::anyhow!("route '{route}' target '{raw}' is not provider.model[.key]"))?;

                let Some(provider) = self.providers.get(&target.provider) else {
                    anyhow::bail!("route '{route}' target '{raw}' names unknown provider '{}'", target.provider);
                };
                if !provider.models.contains_key(&target.model) {
                    anyhow::bail!(
                        "route '{route}' target '{raw}' names model '{}' not served by provider '{}'",
                        target.model,
                        target.provider
                    );
                }

                resolved.push(target);
            }

            pools.insert(route.clone(), resolved);
        }

        Ok(ResolvedRoutes::new(pools))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [providers.providerA]
        type = "chat"
        base_url = "https://upstream.example/v1"

        [providers.providerA.auth.keys.key1]
        value = "sk-one"

        [providers.providerA.models."glm-4.6"]
        max_tokens = 131072

        [routing.pools]
        default = ["providerA.glm-4.6.key1"]
    "#;

    #[test]
    fn minimal_config_validates() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        let routes = config.validate().unwrap();
        let pool = routes.pool("default").unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].model, "glm-4.6");
        assert_eq!(pool[0].key_alias.as_deref(), Some("key1"));
    }

    #[test]
    fn missing_default_pool_rejected() {
        let raw = MINIMAL.replace("default =", "coding =");
        let config: Config = toml::from_str(&raw).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("default"));
    }

    #[test]
    fn unknown_provider_rejected() {
        let raw = MINIMAL.replace("[\"providerA.glm-4.6.key1\"]", "[\"ghost.glm-4.6\"]");
        let config: Config = toml::from_str(&raw).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("ghost"));
    }

    #[test]
    fn unknown_model_rejected() {
        let raw = MINIMAL.replace("[\"providerA.glm-4.6.key1\"]", "[\"providerA.other-model\"]");
        let config: Config = toml::from_str(&raw).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("other-model"));
    }

    #[test]
    fn load_expands_env() {
        temp_env::with_var("CB_TEST_KEY", Some("sk-from-env"), || {
            let raw = MINIMAL.replace("sk-one", "{{ env.CB_TEST_KEY }}");
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("crossbar.toml");
            std::fs::write(&path, raw).unwrap();

            let config = Config::load(&path).unwrap();
            let key = &config.providers["providerA"].auth.keys["key1"];
            assert_eq!(key.value.expose_secret(), "sk-from-env");
        });
    }
}
