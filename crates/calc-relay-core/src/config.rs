use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
};

use crate::{domain::ChatId, errors::Error, Result};

const DEFAULT_INITIAL_VALUE: f64 = 1.0;

/// Typed configuration for the relay.
///
/// Loaded once at startup; nothing mutates it afterwards.
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,

    // Relay
    pub admins: Vec<i64>,
    pub initial_value: f64,
    /// Source chat -> destination chat. Keys are the only chats we listen to.
    pub group_mappings: BTreeMap<ChatId, ChatId>,
    pub show_process: bool,
    pub independent_mode: bool,

    // Storage
    pub store_file: PathBuf,

    // Audit
    pub audit_log_path: PathBuf,
    pub audit_log_json: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (the process env in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let telegram_bot_token = lookup("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let admins = parse_csv_i64("RELAY_ADMINS", lookup("RELAY_ADMINS"))?;
        if admins.is_empty() {
            return Err(Error::Config(
                "RELAY_ADMINS environment variable is required".to_string(),
            ));
        }

        let group_mappings = parse_group_mappings(lookup("RELAY_GROUP_MAPPINGS"))?;
        if group_mappings.is_empty() {
            return Err(Error::Config(
                "RELAY_GROUP_MAPPINGS environment variable is required".to_string(),
            ));
        }

        let initial_value = match lookup("RELAY_INITIAL_VALUE").and_then(non_empty) {
            Some(raw) => parse_initial_value(&raw)?,
            None => DEFAULT_INITIAL_VALUE,
        };

        let show_process = parse_bool(lookup("RELAY_SHOW_PROCESS")).unwrap_or(false);
        let independent_mode = parse_bool(lookup("RELAY_INDEPENDENT_MODE")).unwrap_or(false);

        let store_file = PathBuf::from(
            lookup("RELAY_STORE_FILE").unwrap_or("/tmp/calc-relay-values.json".to_string()),
        );

        let audit_log_path = PathBuf::from(
            lookup("AUDIT_LOG_PATH").unwrap_or("/tmp/calc-relay-audit.log".to_string()),
        );
        let audit_log_json = parse_bool(lookup("AUDIT_LOG_JSON")).unwrap_or(false);

        Ok(Self {
            telegram_bot_token,
            admins,
            initial_value,
            group_mappings,
            show_process,
            independent_mode,
            store_file,
            audit_log_path,
            audit_log_json,
        })
    }

    /// Destination chat for a source chat, if the source is wired for relay.
    pub fn destination_for(&self, source: ChatId) -> Option<ChatId> {
        self.group_mappings.get(&source).copied()
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn parse_bool(v: Option<String>) -> Option<bool> {
    v.map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn parse_initial_value(raw: &str) -> Result<f64> {
    let value = raw
        .trim()
        .parse::<f64>()
        .map_err(|e| Error::Config(format!("RELAY_INITIAL_VALUE is not a number: {raw}: {e}")))?;
    if !value.is_finite() {
        return Err(Error::Config(format!(
            "RELAY_INITIAL_VALUE must be finite: {raw}"
        )));
    }
    Ok(value)
}

/// Comma-separated ids; any entry that is not an integer fails the whole list.
fn parse_csv_i64(key: &str, v: Option<String>) -> Result<Vec<i64>> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| Error::Config(format!("invalid id in {key}: {s}")))
        })
        .collect()
}

/// Parse `source:destination` pairs separated by commas.
///
/// Chat ids are signed, so the separator is the first `:` after the source id.
fn parse_group_mappings(v: Option<String>) -> Result<BTreeMap<ChatId, ChatId>> {
    let mut out = BTreeMap::new();
    for pair in v.unwrap_or_default().split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }

        let parsed = pair.split_once(':').and_then(|(src, dst)| {
            let src = src.trim().parse::<i64>().ok()?;
            let dst = dst.trim().parse::<i64>().ok()?;
            Some((ChatId(src), ChatId(dst)))
        });
        let Some((src, dst)) = parsed else {
            return Err(Error::Config(format!(
                "invalid RELAY_GROUP_MAPPINGS entry (expected source:destination): {pair}"
            )));
        };

        out.insert(src, dst);
    }
    Ok(out)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
