use crate::ai::search::SearchParams;

/// Engine configuration parsed from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Transposition table holds `2^hash_log2` entries.
    pub hash_log2: u32,
    /// Deepest iteration the search may run.
    pub max_depth: i32,
    /// Soft time budget per move in milliseconds.
    pub min_time_ms: u64,
    /// Hard time budget per move in milliseconds. Zero disables both limits.
    pub max_time_ms: u64,
    /// Node budget per move, if any.
    pub max_nodes: Option<u64>,
    /// Shallowest iteration that uses late move pruning.
    pub lmp_min_depth: i32,
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        let defaults = EngineConfig::default();
        EngineConfig {
            hash_log2: env_parse("CHESS_HASH_LOG2").unwrap_or(defaults.hash_log2),
            max_depth: env_parse("CHESS_MAX_DEPTH").unwrap_or(defaults.max_depth),
            min_time_ms: env_parse("CHESS_MIN_TIME_MS").unwrap_or(defaults.min_time_ms),
            max_time_ms: env_parse("CHESS_MAX_TIME_MS").unwrap_or(defaults.max_time_ms),
            max_nodes: env_parse("CHESS_MAX_NODES").or(defaults.max_nodes),
            lmp_min_depth: env_parse("CHESS_LMP_MIN_DEPTH").unwrap_or(defaults.lmp_min_depth),
        }
    }

    /// Limits for one search.
    pub fn search_params(&self) -> SearchParams {
        let timed = self.max_time_ms > 0;
        SearchParams {
            max_depth: self.max_depth.max(1),
            min_time_ms: timed.then_some(self.min_time_ms.min(self.max_time_ms)),
            max_time_ms: timed.then_some(self.max_time_ms),
            max_nodes: self.max_nodes,
            lmp_min_depth: self.lmp_min_depth,
            ..SearchParams::default()
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            hash_log2: 20,
            max_depth: 64,
            min_time_ms: 1000,
            max_time_ms: 5000,
            max_nodes: None,
            lmp_min_depth: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.hash_log2, 20);
        assert_eq!(config.max_depth, 64);
        assert_eq!(config.min_time_ms, 1000);
        assert_eq!(config.max_time_ms, 5000);
        assert_eq!(config.max_nodes, None);
        assert_eq!(config.lmp_min_depth, 5);
    }

    #[test]
    fn from_env_defaults() {
        // Without setting env vars, should fall back to defaults
        let config = EngineConfig::from_env();
        assert_eq!(config.hash_log2, 20);
        assert_eq!(config.lmp_min_depth, 5);
    }

    #[test]
    fn search_params_follow_config() {
        let params = EngineConfig::default().search_params();
        assert_eq!(params.max_depth, 64);
        assert_eq!(params.min_time_ms, Some(1000));
        assert_eq!(params.max_time_ms, Some(5000));
        assert_eq!(params.lmp_min_depth, 5);

        let untimed = EngineConfig {
            max_time_ms: 0,
            max_depth: 0,
            ..EngineConfig::default()
        };
        let params = untimed.search_params();
        assert_eq!(params.min_time_ms, None);
        assert_eq!(params.max_time_ms, None);
        assert_eq!(params.max_depth, 1);
    }
}
