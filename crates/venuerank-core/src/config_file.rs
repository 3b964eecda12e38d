use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::Rank;
use crate::{Config, CoreError};

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub lookup: Option<LookupConfig>,
    pub cache: Option<CacheConfig>,
    pub matcher: Option<MatcherConfig>,
    pub display: Option<DisplayConfig>,
    pub sites: Option<SitesConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LookupConfig {
    pub endpoint: Option<String>,
    pub timeout_secs: Option<u64>,
    pub min_title_similarity: Option<f64>,
    pub batch_delay_ms: Option<u64>,
    pub max_concurrent: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    pub path: Option<String>,
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatcherConfig {
    pub min_partial_len: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Ranks to badge, e.g. `["A", "B"]`. Absent or empty means all.
    pub show_ranks: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SitesConfig {
    pub enabled: Option<Vec<String>>,
    pub lookup_enabled: Option<Vec<String>>,
}

/// Platform config directory path: `<config_dir>/venuerank/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("venuerank").join("config.toml"))
}

/// Load config by cascading CWD `.venuerank.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(&PathBuf::from(".venuerank.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &PathBuf) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    toml::from_str(&content).ok()
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        lookup: Some(LookupConfig {
            endpoint: overlay
                .lookup
                .as_ref()
                .and_then(|l| l.endpoint.clone())
                .or_else(|| base.lookup.as_ref().and_then(|l| l.endpoint.clone())),
            timeout_secs: overlay
                .lookup
                .as_ref()
                .and_then(|l| l.timeout_secs)
                .or_else(|| base.lookup.as_ref().and_then(|l| l.timeout_secs)),
            min_title_similarity: overlay
                .lookup
                .as_ref()
                .and_then(|l| l.min_title_similarity)
                .or_else(|| base.lookup.as_ref().and_then(|l| l.min_title_similarity)),
            batch_delay_ms: overlay
                .lookup
                .as_ref()
                .and_then(|l| l.batch_delay_ms)
                .or_else(|| base.lookup.as_ref().and_then(|l| l.batch_delay_ms)),
            max_concurrent: overlay
                .lookup
                .as_ref()
                .and_then(|l| l.max_concurrent)
                .or_else(|| base.lookup.as_ref().and_then(|l| l.max_concurrent)),
        }),
        cache: Some(CacheConfig {
            path: overlay
                .cache
                .as_ref()
                .and_then(|c| c.path.clone())
                .or_else(|| base.cache.as_ref().and_then(|c| c.path.clone())),
            ttl_secs: overlay
                .cache
                .as_ref()
                .and_then(|c| c.ttl_secs)
                .or_else(|| base.cache.as_ref().and_then(|c| c.ttl_secs)),
        }),
        matcher: Some(MatcherConfig {
            min_partial_len: overlay
                .matcher
                .as_ref()
                .and_then(|m| m.min_partial_len)
                .or_else(|| base.matcher.as_ref().and_then(|m| m.min_partial_len)),
        }),
        display: Some(DisplayConfig {
            show_ranks: overlay
                .display
                .as_ref()
                .and_then(|d| d.show_ranks.clone())
                .or_else(|| base.display.as_ref().and_then(|d| d.show_ranks.clone())),
        }),
        sites: Some(SitesConfig {
            enabled: overlay
                .sites
                .as_ref()
                .and_then(|s| s.enabled.clone())
                .or_else(|| base.sites.as_ref().and_then(|s| s.enabled.clone())),
            lookup_enabled: overlay
                .sites
                .as_ref()
                .and_then(|s| s.lookup_enabled.clone())
                .or_else(|| base.sites.as_ref().and_then(|s| s.lookup_enabled.clone())),
        }),
    }
}

/// Save the current config to the platform config directory.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf, CoreError> {
    let path = config_path()
        .ok_or_else(|| CoreError::Config("could not determine config directory".to_string()))?;
    write_config(config, &path)?;
    Ok(path)
}

fn write_config(config: &ConfigFile, path: &PathBuf) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

fn parse_rank(s: &str) -> Option<Rank> {
    match s.trim().to_ascii_uppercase().as_str() {
        "A" => Some(Rank::A),
        "B" => Some(Rank::B),
        "C" => Some(Rank::C),
        _ => None,
    }
}

impl ConfigFile {
    /// Apply file values over a runtime [`Config`]. Absent fields keep the
    /// base value; unrecognized rank strings are dropped.
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(ref lookup) = self.lookup {
            if let Some(ref endpoint) = lookup.endpoint {
                config.lookup_endpoint = endpoint.clone();
            }
            if let Some(secs) = lookup.timeout_secs {
                config.lookup_timeout_secs = secs;
            }
            if let Some(sim) = lookup.min_title_similarity {
                config.min_title_similarity = sim;
            }
            if let Some(ms) = lookup.batch_delay_ms {
                config.batch_delay_ms = ms;
            }
            if let Some(n) = lookup.max_concurrent {
                config.max_concurrent_lookups = n;
            }
        }
        if let Some(ref cache) = self.cache {
            if let Some(ref path) = cache.path {
                config.cache_path = Some(PathBuf::from(path));
            }
            if let Some(ttl) = cache.ttl_secs {
                config.cache_ttl_secs = Some(ttl);
            }
        }
        if let Some(ref matcher) = self.matcher
            && let Some(len) = matcher.min_partial_len
        {
            config.min_partial_len = len;
        }
        if let Some(ref display) = self.display
            && let Some(ref ranks) = display.show_ranks
        {
            config.show_ranks = ranks.iter().filter_map(|r| parse_rank(r)).collect();
        }
        if let Some(ref sites) = self.sites {
            if let Some(ref enabled) = sites.enabled {
                config.enabled_sites = enabled.clone();
            }
            if let Some(ref lookup_enabled) = sites.lookup_enabled {
                config.lookup_sites = lookup_enabled.clone();
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_toml() {
        let config = ConfigFile {
            cache: Some(CacheConfig {
                path: Some("/tmp/venuerank_cache.db".to_string()),
                ttl_secs: Some(86400),
            }),
            ..Default::default()
        };
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: ConfigFile = toml::from_str(&toml_str).unwrap();
        let cache = parsed.cache.unwrap();
        assert_eq!(cache.path.unwrap(), "/tmp/venuerank_cache.db");
        assert_eq!(cache.ttl_secs, Some(86400));
    }

    #[test]
    fn partial_section_parses() {
        let toml_str = "[lookup]\ntimeout_secs = 5\n";
        let parsed: ConfigFile = toml::from_str(toml_str).unwrap();
        let lookup = parsed.lookup.unwrap();
        assert_eq!(lookup.timeout_secs, Some(5));
        assert!(lookup.endpoint.is_none());
        assert!(parsed.cache.is_none());
    }

    #[test]
    fn merge_overlay_wins() {
        let base = ConfigFile {
            lookup: Some(LookupConfig {
                timeout_secs: Some(10),
                batch_delay_ms: Some(200),
                ..Default::default()
            }),
            ..Default::default()
        };
        let overlay = ConfigFile {
            lookup: Some(LookupConfig {
                timeout_secs: Some(30),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = merge(base, overlay);
        let lookup = merged.lookup.unwrap();
        assert_eq!(lookup.timeout_secs, Some(30));
        // Base preserved when overlay is silent
        assert_eq!(lookup.batch_delay_ms, Some(200));
    }

    #[test]
    fn apply_overrides_runtime_config() {
        let file = ConfigFile {
            lookup: Some(LookupConfig {
                max_concurrent: Some(4),
                min_title_similarity: Some(0.7),
                ..Default::default()
            }),
            display: Some(DisplayConfig {
                show_ranks: Some(vec!["a".into(), "B".into(), "bogus".into()]),
            }),
            sites: Some(SitesConfig {
                lookup_enabled: Some(vec!["arxiv".into(), "dblp".into()]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let config = file.apply(Config::default());
        assert_eq!(config.max_concurrent_lookups, 4);
        assert!((config.min_title_similarity - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.show_ranks, vec![Rank::A, Rank::B]);
        assert_eq!(config.lookup_sites, vec!["arxiv", "dblp"]);
        // Untouched values keep their defaults
        assert_eq!(config.lookup_timeout_secs, 10);
    }

    #[test]
    fn write_and_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = ConfigFile {
            lookup: Some(LookupConfig {
                timeout_secs: Some(7),
                ..Default::default()
            }),
            ..Default::default()
        };
        write_config(&config, &path).unwrap();
        let reloaded = load_from_path(&path).unwrap();
        assert_eq!(reloaded.lookup.unwrap().timeout_secs, Some(7));
    }

    #[test]
    fn apply_empty_file_keeps_defaults() {
        let config = ConfigFile::default().apply(Config::default());
        assert_eq!(config.lookup_endpoint, "https://dblp.org/search/publ/api");
        assert_eq!(config.max_concurrent_lookups, 2);
        assert!(config.show_ranks.is_empty());
    }
}
