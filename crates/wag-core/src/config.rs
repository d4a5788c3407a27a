use std::{env, fs, net::SocketAddr, path::Path, str::FromStr, time::Duration};

use crate::{errors::Error, retry::RetryPolicy, Result};

/// Typed configuration for the gateway.
///
/// Loaded once at startup and handed to each component; nothing reads the
/// environment after `main` has built this.
#[derive(Clone, Debug)]
pub struct Config {
    // Meta API
    pub meta_verify_token: String,
    pub meta_whatsapp_token: String,
    pub meta_phone_number_id: String,
    pub meta_app_secret: String,
    pub meta_api_base_url: String,
    pub facebook_user_agent: String,
    pub in_meta_sandbox_mode: bool,
    pub meta_sandbox_phone_number: String,
    pub message_age_cutoff: i64,

    // Engine connection
    pub engine_base_url: String,
    pub engine_api_key: String,
    pub engine_org: String,
    pub engine_timeout: Duration,
    pub engine_max_retries: u32,
    pub engine_retry_base_delay: Duration,
    pub engine_retry_multiplier: f64,

    // WhatsApp limits
    pub max_message_length: usize,
    pub chunk_size: usize,
    pub combine_responses: bool,
    pub audio_input_enabled: bool,

    // Progress callbacks
    pub gateway_public_url: Option<String>,
    pub progress_throttle_seconds: f64,
    pub progress_callback_token: String,

    // Server
    pub bind_addr: SocketAddr,

    // Logging
    pub log_level: String,
    pub log_pseudonym_secret: Option<String>,
}

impl Config {
    /// Load from the process environment, reading `.env` first if present.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (environment, map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);
        let required = |key: &str| {
            get(key).ok_or_else(|| {
                Error::Config(format!("{key} environment variable is required"))
            })
        };

        let meta_verify_token = required("META_VERIFY_TOKEN")?;
        let meta_whatsapp_token = required("META_WHATSAPP_TOKEN")?;
        let meta_phone_number_id = required("META_PHONE_NUMBER_ID")?;
        let meta_app_secret = required("META_APP_SECRET")?;
        let engine_base_url = required("ENGINE_BASE_URL")?
            .trim_end_matches('/')
            .to_string();
        let engine_api_key = required("ENGINE_API_KEY")?;

        let meta_api_base_url = get("META_API_BASE_URL")
            .unwrap_or_else(|| "https://graph.facebook.com/v23.0".to_string())
            .trim_end_matches('/')
            .to_string();
        let facebook_user_agent =
            get("FACEBOOK_USER_AGENT").unwrap_or_else(|| "facebookexternalua".to_string());
        let in_meta_sandbox_mode =
            parse_flag("IN_META_SANDBOX_MODE", get("IN_META_SANDBOX_MODE"))?.unwrap_or(false);
        let meta_sandbox_phone_number =
            get("META_SANDBOX_PHONE_NUMBER").unwrap_or_else(|| "11111111".to_string());
        let message_age_cutoff =
            parse_num::<i64>("MESSAGE_AGE_CUTOFF_IN_SECONDS", get("MESSAGE_AGE_CUTOFF_IN_SECONDS"))?
                .unwrap_or(3600);

        let engine_org = get("ENGINE_ORG").unwrap_or_else(|| "default".to_string());
        let engine_timeout = Duration::from_secs(
            parse_num::<u64>("ENGINE_TIMEOUT_SECONDS", get("ENGINE_TIMEOUT_SECONDS"))?
                .unwrap_or(120),
        );
        let engine_max_retries =
            parse_num::<u32>("ENGINE_MAX_RETRIES", get("ENGINE_MAX_RETRIES"))?.unwrap_or(5);
        let engine_retry_base_delay = seconds(
            "ENGINE_RETRY_BASE_DELAY_SECONDS",
            parse_num::<f64>(
                "ENGINE_RETRY_BASE_DELAY_SECONDS",
                get("ENGINE_RETRY_BASE_DELAY_SECONDS"),
            )?
            .unwrap_or(2.0),
        )?;
        let engine_retry_multiplier =
            parse_num::<f64>("ENGINE_RETRY_MULTIPLIER", get("ENGINE_RETRY_MULTIPLIER"))?
                .unwrap_or(1.5);
        if !engine_retry_multiplier.is_finite() || engine_retry_multiplier < 0.0 {
            return Err(Error::Config(
                "ENGINE_RETRY_MULTIPLIER must be a finite, non-negative number".to_string(),
            ));
        }
        ensure_bounded_backoff(
            engine_retry_base_delay,
            engine_retry_multiplier,
            engine_max_retries,
        )?;

        let max_message_length =
            parse_num::<usize>("MAX_MESSAGE_LENGTH", get("MAX_MESSAGE_LENGTH"))?.unwrap_or(4096);
        // A chunk must always fit in a single WhatsApp message.
        let chunk_size = parse_num::<usize>("CHUNK_SIZE", get("CHUNK_SIZE"))?
            .unwrap_or(1500)
            .clamp(1, max_message_length.max(1));
        let combine_responses =
            parse_flag("COMBINE_RESPONSES", get("COMBINE_RESPONSES"))?.unwrap_or(false);
        let audio_input_enabled =
            parse_flag("AUDIO_INPUT_ENABLED", get("AUDIO_INPUT_ENABLED"))?.unwrap_or(false);

        let gateway_public_url = get("GATEWAY_PUBLIC_URL");
        let progress_throttle_seconds =
            parse_num::<f64>("PROGRESS_THROTTLE_SECONDS", get("PROGRESS_THROTTLE_SECONDS"))?
                .unwrap_or(3.0);
        let progress_callback_token =
            get("PROGRESS_CALLBACK_TOKEN").unwrap_or_else(|| engine_api_key.clone());

        let bind_addr = parse_num::<SocketAddr>("BIND_ADDR", get("BIND_ADDR"))?
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080)));

        let log_level = get("LOG_LEVEL").unwrap_or_else(|| "INFO".to_string());
        let log_pseudonym_secret = get("LOG_PSEUDONYM_SECRET");

        Ok(Self {
            meta_verify_token,
            meta_whatsapp_token,
            meta_phone_number_id,
            meta_app_secret,
            meta_api_base_url,
            facebook_user_agent,
            in_meta_sandbox_mode,
            meta_sandbox_phone_number,
            message_age_cutoff,
            engine_base_url,
            engine_api_key,
            engine_org,
            engine_timeout,
            engine_max_retries,
            engine_retry_base_delay,
            engine_retry_multiplier,
            max_message_length,
            chunk_size,
            combine_responses,
            audio_input_enabled,
            gateway_public_url,
            progress_throttle_seconds,
            progress_callback_token,
            bind_addr,
            log_level,
            log_pseudonym_secret,
        })
    }

    /// Retry policy for calls to the engine.
    pub fn engine_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.engine_max_retries,
            base_delay: self.engine_retry_base_delay,
            multiplier: self.engine_retry_multiplier,
            ..RetryPolicy::default()
        }
    }

    /// URL the engine posts progress updates to, when the gateway is publicly reachable.
    pub fn progress_callback_url(&self) -> Option<String> {
        self.gateway_public_url
            .as_deref()
            .map(|base| format!("{}/progress-callback", base.trim_end_matches('/')))
    }
}

/// Copy `.env` entries into the process environment. Keys already set win.
fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };
    for (key, value) in parse_dotenv(&contents) {
        if env::var_os(&key).is_none() {
            env::set_var(key, value);
        }
    }
}

/// `KEY=value` lines; blank lines, `#` comments and lines without `=` are
/// skipped. Accepts a leading `export `, matching quotes around the value, and
/// a trailing ` #comment` on unquoted values.
fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .filter_map(|raw| {
            let line = raw.trim();
            if line.starts_with('#') {
                return None;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), dotenv_value(value.trim()).to_string()))
        })
        .collect()
}

fn dotenv_value(raw: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = raw
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    match raw.find(" #") {
        Some(i) => raw[..i].trim_end(),
        None => raw,
    }
}

fn parse_flag(key: &str, v: Option<String>) -> Result<Option<bool>> {
    let Some(raw) = v else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(Error::Config(format!("{key} is not a boolean: {raw:?}"))),
    }
}

fn parse_num<T: FromStr>(key: &str, v: Option<String>) -> Result<Option<T>> {
    let Some(raw) = v else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| Error::Config(format!("{key} has an invalid value: {raw:?}")))
}

fn seconds(key: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| Error::Config(format!("{key} must be a non-negative number of seconds")))
}

/// The summed backoff over every retry must fit in a `Duration`.
fn ensure_bounded_backoff(base: Duration, multiplier: f64, max_retries: u32) -> Result<()> {
    let mut total = 0.0f64;
    let mut step = base.as_secs_f64();
    for _ in 0..max_retries {
        total += step;
        if Duration::try_from_secs_f64(total).is_err() {
            return Err(Error::Config(
                "ENGINE_MAX_RETRIES and ENGINE_RETRY_MULTIPLIER give an unbounded backoff"
                    .to_string(),
            ));
        }
        step *= multiplier;
    }
    Ok(())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
