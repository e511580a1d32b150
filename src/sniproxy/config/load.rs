use std::borrow::Cow;
use std::env;
use std::path::{Path, PathBuf};

use regex::{Captures, Regex};
use tracing::{debug, info, info_span};

use crate::sniproxy::common::{Error, Result};
use crate::sniproxy::config::settings::{self, Settings};

/// Load configuration settings from sniproxy.yaml (or the name given).
/// Searching in order:
/// 1) config_path passed as first command line argument
/// 2) Current directory
/// 3) Any parent directory of the current directory, up to root
/// 4) ~/.config/sniproxy/
/// 5) ~/.sniproxy.yaml
/// 6) /etc/sniproxy/
///
/// This replaces ${ENV_VAR[:DEFAULT]} parameters in the yaml file with values from the
/// environment variable of that name, if set, otherwise with the given default, if any.
pub fn load_config(config_name: &str) -> Result<&'static Settings> {
    let _span = info_span!("loading config file").entered();
    let config_path = find_config_file(config_name)?;
    info!(config_path = %config_path.to_string_lossy().into_owned(), "found config file");
    let raw_yaml = std::fs::read_to_string(&config_path)?;
    let yaml_text = replace_env_vars(&raw_yaml)?;

    // Safety: this runs once at startup, before any other task can observe SETTINGS.
    let slot = unsafe { settings::settings_slot() };
    let config = slot.write(serde_yaml::from_str(&yaml_text)?);
    config.finish_loading()?;
    Ok(&*config)
}

fn find_config_file(config_name: &str) -> Result<PathBuf> {
    if let Some(path) = env::args().nth(1) {
        debug!("using config_path passed on command line");
        return Ok(PathBuf::from(path));
    }

    if let Ok(start) = env::current_dir() {
        let mut dir = start.as_path();
        loop {
            debug!("checking for config file in {}", dir.to_string_lossy());
            let fp = Path::join(dir, config_name);
            if fp.exists() {
                return Ok(fp);
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
    }

    let home = env::var("HOME").unwrap_or_else(|_| "~/".to_string());

    let mut conf_path = Path::join(Path::new(&home), Path::join(Path::new(".config/sniproxy"), config_name));
    debug!("checking for config file in {}", conf_path.to_string_lossy());
    if conf_path.exists() {
        return Ok(conf_path);
    }

    conf_path = Path::join(Path::new(&home), ".".to_string() + config_name);
    debug!("checking for config file in {}", conf_path.to_string_lossy());
    if conf_path.exists() {
        return Ok(conf_path);
    }

    conf_path = Path::join(Path::new("/etc/sniproxy"), config_name);
    debug!("checking for config file in {}", conf_path.to_string_lossy());
    if conf_path.exists() {
        return Ok(conf_path);
    }

    Err(Error::new(format!("config file {} not found", config_name)))
}

fn replace_env_vars(raw_yaml: &str) -> Result<Cow<str>> {
    // We only call this once at startup, so no need to keep the compiled regex around.
    let re_var = Regex::new(r"\$\{([a-zA-Z_][0-9a-zA-Z_]*)(?::([^}]+?))?\}").unwrap();

    let mut errors = Vec::<String>::new();

    let replaced_text = re_var.replace_all(raw_yaml, |caps: &Captures| {
        match env::var(&caps[1]) {
            Ok(val) => val,
            Err(_) => {
                if let Some(default) = caps.get(2) {
                    let s = default.as_str();
                    if let Some(msg) = s.strip_prefix('?') {
                        errors.push(msg.to_string());
                        String::new()
                    } else {
                        s.to_string()
                    }
                } else {
                    errors.push(format!("environment variable {} is required but not defined", &caps[1]));
                    String::new()
                }
            }
        }
    });

    if errors.is_empty() {
        Ok(replaced_text)
    } else {
        Err(Error::new(errors.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_present_var() {
        std::env::set_var("SNIPROXY_TEST_VAR", "hello");
        let out = replace_env_vars("value: ${SNIPROXY_TEST_VAR}").unwrap();
        assert_eq!(out, "value: hello");
    }

    #[test]
    fn falls_back_to_default() {
        std::env::remove_var("SNIPROXY_TEST_MISSING");
        let out = replace_env_vars("value: ${SNIPROXY_TEST_MISSING:fallback}").unwrap();
        assert_eq!(out, "value: fallback");
    }

    #[test]
    fn errors_when_required_var_missing() {
        std::env::remove_var("SNIPROXY_TEST_MISSING2");
        assert!(replace_env_vars("value: ${SNIPROXY_TEST_MISSING2}").is_err());
    }
}
