use indexmap::IndexMap;
use serde::Deserialize;

/// Route pool table and retry limits
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingConfig {
    /// Route pools: route name -> ordered `provider.model[.key]` targets
    #[serde(default)]
    pub pools: IndexMap<String, Vec<String>>,
    /// Maximum keys tried per request before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries_per_route: u32,
    /// Maximum server-tool round trips per responses request
    #[serde(default = "default_max_tool_loops")]
    pub max_tool_loops: u32,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            pools: IndexMap::new(),
            max_retries_per_route: default_max_retries(),
            max_tool_loops: default_max_tool_loops(),
        }
    }
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_max_tool_loops() -> u32 {
    4
}

/// One resolved entry of a route pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    /// Provider id (key in the providers table)
    pub provider: String,
    /// Model identifier to request from the provider
    pub model: String,
    /// Pinned credential alias; `None` means any eligible key
    pub key_alias: Option<String>,
}

impl std::fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.key_alias {
            Some(alias) => write!(f, "{}.{}.{alias}", self.provider, self.model),
            None => write!(f, "{}.{}", self.provider, self.model),
        }
    }
}

/// Route pools with every target parsed and checked against the
/// provider table
///
/// Built by [`crate::Config::validate`]; handed to the router so request
/// handling never re-parses target strings.
#[derive(Debug, Default, Clone)]
pub struct ResolvedRoutes {
    pools: IndexMap<String, Vec<RouteTarget>>,
}

impl ResolvedRoutes {
    pub(crate) fn new(pools: IndexMap<String, Vec<RouteTarget>>) -> Self {
        Self { pools }
    }

    /// Targets for a route, if the pool exists and is non-empty
    pub fn pool(&self, route: &str) -> Option<&[RouteTarget]> {
        self.pools.get(route).map(Vec::as_slice).filter(|p| !p.is_empty())
    }

    /// Names of all configured pools, in config order
    pub fn route_names(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(String::as_str)
    }

    /// Whether a route has at least one target
    pub fn has_route(&self, route: &str) -> bool {
        self.pool(route).is_some()
    }
}

/// Parse a `provider.model[.key]` target string
///
/// Model ids may themselves contain dots (`glm-4.6`), so the key alias
/// is only split off when the final dot-segment names a configured
/// credential of that provider. `known_aliases` carries the provider's
/// alias table for that check.
pub(crate) fn parse_target(raw: &str, known_aliases: &dyn Fn(&str, &str) -> bool) -> Option<RouteTarget> {
    let (provider, rest) = raw.split_once('.')?;
    if provider.is_empty() || rest.is_empty() {
        return None;
    }

    if let Some((model, alias)) = rest.rsplit_once('.')
        && !model.is_empty()
        && known_aliases(provider, alias)
    {
        return Some(RouteTarget {
            provider: provider.to_owned(),
            model: model.to_owned(),
            key_alias: Some(alias.to_owned()),
        });
    }

    Some(RouteTarget {
        provider: provider.to_owned(),
        model: rest.to_owned(),
        key_alias: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliases(provider: &str, alias: &str) -> bool {
        provider == "providerA" && alias == "key1"
    }

    #[test]
    fn target_with_key_alias() {
        let target = parse_target("providerA.glm-4.6.key1", &aliases).unwrap();
        assert_eq!(target.provider, "providerA");
        assert_eq!(target.model, "glm-4.6");
        assert_eq!(target.key_alias.as_deref(), Some("key1"));
    }

    #[test]
    fn dotted_model_without_alias() {
        let target = parse_target("providerA.glm-4.6", &aliases).unwrap();
        assert_eq!(target.model, "glm-4.6");
        assert_eq!(target.key_alias, None);
    }

    #[test]
    fn unknown_alias_folds_into_model() {
        let target = parse_target("providerB.claude-3.5.key1", &aliases).unwrap();
        assert_eq!(target.model, "claude-3.5.key1");
        assert_eq!(target.key_alias, None);
    }

    #[test]
    fn rejects_bare_provider() {
        assert!(parse_target("providerA", &aliases).is_none());
        assert!(parse_target("providerA.", &aliases).is_none());
    }

    #[test]
    fn display_round_trip() {
        let target = parse_target("providerA.glm-4.6.key1", &aliases).unwrap();
        assert_eq!(target.to_string(), "providerA.glm-4.6.key1");
    }
}
