use std::env;

#[derive(Clone)]
pub struct Config {
    pub s3_listen: String,
    pub metrics_listen: String,
    pub redis_url: Option<String>,
    pub write_payload_bytes: usize,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub log_level: String,
    pub insecure_dev: bool,
}

impl Config {
    pub fn load() -> Result<Self, String> {
        let config = Self {
            s3_listen: normalize_listen_addr(env_or_default("OGW_S3_LISTEN", ":9000")),
            metrics_listen: normalize_listen_addr(env_or_default("OGW_METRICS_LISTEN", ":9100")),
            redis_url: env::var("OGW_REDIS_URL").ok(),
            write_payload_bytes: parse_env("OGW_WRITE_PAYLOAD_BYTES").unwrap_or(1024 * 1024),
            access_key_id: env_or_default("OGW_ACCESS_KEY_ID", "ogw-dev"),
            secret_access_key: env_or_default("OGW_SECRET_ACCESS_KEY", "change-me"),
            region: env_or_default("OGW_REGION", "us-east-1"),
            log_level: env_or_default("OGW_LOG_LEVEL", "info"),
            insecure_dev: env::var("OGW_INSECURE_DEV")
                .ok()
                .and_then(|value| parse_bool(&value))
                .unwrap_or(false),
        };
        config.validate_security()?;
        Ok(config)
    }

    fn validate_security(&self) -> Result<(), String> {
        if self.write_payload_bytes == 0 {
            return Err("OGW_WRITE_PAYLOAD_BYTES must be greater than zero".into());
        }
        if self.insecure_dev {
            return Ok(());
        }
        if is_insecure_secret_value(&self.secret_access_key) {
            return Err(
                "OGW_SECRET_ACCESS_KEY must be changed from default when OGW_INSECURE_DEV=false"
                    .into(),
            );
        }
        Ok(())
    }
}

fn env_or_default(key: &str, default_value: &str) -> String {
    env::var(key).unwrap_or_else(|_| default_value.to_string())
}

fn parse_env<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn is_insecure_secret_value(value: &str) -> bool {
    matches!(value.trim(), "" | "change-me")
}

fn normalize_listen_addr(value: String) -> String {
    if value.starts_with(':') {
        format!("0.0.0.0{}", value)
    } else {
        value
    }
}
