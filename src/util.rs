const CLOUDMON_CONFIG: &str = "CLOUDMON_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "./config.json";

/// Config path from the environment, if set and not blank
pub fn get_config_path_from_env() -> Option<String> {
    std::env::var(CLOUDMON_CONFIG)
        .ok()
        .filter(|path| !path.trim().is_empty())
}

/// `-f/--file` wins over `CLOUDMON_CONFIG`, which wins over the default
pub fn resolve_config_path(cli: Option<String>) -> String {
    cli.or_else(get_config_path_from_env)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}
