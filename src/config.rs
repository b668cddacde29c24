//! Layered configuration: defaults, optional TOML file, then environment overrides.

use std::collections::HashSet;
use std::path::PathBuf;

use common::{AppConfig, Error};
use coverage::{Granularity, WindowCalculator};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

fn parse_positive_u64(raw: &str, env_name: &str) -> Result<u64, Error> {
    match raw.trim().parse::<u64>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(Error::Config(format!("{env_name} must be an integer > 0"))),
    }
}

fn parse_fraction(raw: &str, env_name: &str) -> Result<f64, Error> {
    match raw.trim().parse::<f64>() {
        Ok(parsed) if (0.0..=1.0).contains(&parsed) => Ok(parsed),
        _ => Err(Error::Config(format!("{env_name} must be a number in [0,1]"))),
    }
}

fn check_window_length(issues: &mut Vec<String>, field: &str, secs: u64) {
    if let Err(e) = Granularity::classify(secs) {
        issues.push(format!("{field}: {e}"));
    }
}

pub fn validate_config(config: &AppConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();

    check_window_length(&mut issues, "cache.ttl_seconds", config.cache.ttl_seconds);
    let threshold = config.cache.refresh_threshold_percentage;
    if !(0.0..=1.0).contains(&threshold) {
        issues.push("cache.refresh_threshold_percentage must be in [0,1]".into());
    }
    if config.cache.max_concurrent_refreshes == 0 {
        issues.push("cache.max_concurrent_refreshes must be > 0".into());
    }

    let upstream = &config.upstream;
    if upstream.timeout_secs == 0 {
        issues.push("upstream.timeout_secs must be > 0".into());
    }
    let resolved = upstream.resolve_url();
    if let Err(e) = url::Url::parse(&resolved) {
        issues.push(format!("upstream url '{resolved}' is not a valid URL: {e}"));
    }
    let key_names = [
        ("upstream.geometry_outer_key", &upstream.geometry_outer_key),
        ("upstream.geometry_inner_key", &upstream.geometry_inner_key),
        ("upstream.site_name_key", &upstream.site_name_key),
        ("upstream.time_range_outer_key", &upstream.time_range_outer_key),
        ("upstream.time_range_inner_key", &upstream.time_range_inner_key),
        ("upstream.response_key", &upstream.response_key),
    ];
    for (field, value) in key_names {
        if value.trim().is_empty() {
            issues.push(format!("{field} must not be empty"));
        }
    }

    if let Err(e) = WindowCalculator::from_timezone_name(&config.window.timezone) {
        issues.push(format!("window.timezone: {e}"));
    }

    if config.watch.interval_secs == 0 {
        issues.push("watch.interval_secs must be > 0".into());
    }
    if config.watch.heartbeat_secs == 0 {
        issues.push("watch.heartbeat_secs must be > 0".into());
    }

    let mut group_names = HashSet::new();
    for group in &config.groups {
        if group.name.trim().is_empty() {
            issues.push("groups: every group needs a name".into());
        } else if !group_names.insert(group.name.as_str()) {
            issues.push(format!("groups: duplicate group '{}'", group.name));
        }
        check_window_length(
            &mut issues,
            &format!("groups.{}.default_refresh_seconds", group.name),
            group.default_refresh_seconds,
        );

        let mut site_names = HashSet::new();
        for site in &group.sites {
            if site.name.trim().is_empty() {
                issues.push(format!("groups.{}: every site needs a name", group.name));
            } else if !site_names.insert(site.name.as_str()) {
                issues.push(format!(
                    "groups.{}: duplicate site '{}'",
                    group.name, site.name
                ));
            }
            if let Some(secs) = site.refresh_seconds {
                check_window_length(
                    &mut issues,
                    &format!("groups.{}.{}.refresh_seconds", group.name, site.name),
                    secs,
                );
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Load configuration from defaults, an optional TOML file and the environment.
pub fn load_config() -> Result<AppConfig, Error> {
    // 1. Load .env file from project root or parent directories.
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    // 2. Start with defaults.
    let mut config = AppConfig::default();

    // 3. Config file: COVERWATCH_CONFIG must exist if set, config.toml is optional.
    let (config_path, required) = match std::env::var("COVERWATCH_CONFIG") {
        Ok(path) => (PathBuf::from(path), true),
        Err(_) => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    };
    if config_path.exists() {
        let contents = std::fs::read_to_string(&config_path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", config_path.display(), e))
        })?;
        config = toml::from_str(&contents).map_err(|e| {
            Error::Config(format!("Failed to parse {}: {}", config_path.display(), e))
        })?;
    } else if required {
        return Err(Error::Config(format!(
            "COVERWATCH_CONFIG points to missing file {}",
            config_path.display()
        )));
    }

    // 4. Override with environment variables (highest priority).
    if let Ok(url) = std::env::var("COVERWATCH_UPSTREAM_URL") {
        config.upstream.url = url;
    }
    if let Ok(endpoint) = std::env::var("COVERWATCH_UPSTREAM_ENDPOINT") {
        config.upstream.endpoint = endpoint;
    }
    if let Ok(raw) = std::env::var("COVERWATCH_UPSTREAM_TIMEOUT_SECS") {
        config.upstream.timeout_secs = parse_positive_u64(&raw, "COVERWATCH_UPSTREAM_TIMEOUT_SECS")?;
    }
    if let Ok(raw) = std::env::var("COVERWATCH_CACHE_TTL_SECONDS") {
        config.cache.ttl_seconds = parse_positive_u64(&raw, "COVERWATCH_CACHE_TTL_SECONDS")?;
    }
    if let Ok(raw) = std::env::var("COVERWATCH_REFRESH_THRESHOLD") {
        config.cache.refresh_threshold_percentage =
            parse_fraction(&raw, "COVERWATCH_REFRESH_THRESHOLD")?;
    }
    if let Ok(raw) = std::env::var("COVERWATCH_MAX_CONCURRENT_REFRESHES") {
        config.cache.max_concurrent_refreshes =
            parse_positive_u64(&raw, "COVERWATCH_MAX_CONCURRENT_REFRESHES")? as usize;
    }
    if let Ok(tz) = std::env::var("COVERWATCH_TIMEZONE") {
        config.window.timezone = tz;
    }

    // 5. Validate.
    validate_config(&config)?;

    Ok(config)
}
