use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::{ClientConfig, DEFAULT_URL};

#[derive(Debug, Default, PartialEq)]
struct RcConfig {
    url: Option<String>,
    timeout: Option<String>,
    verify: Option<bool>,
}

pub(crate) fn load_config(
    url: Option<String>,
    timeout: Option<Duration>,
    verify: Option<bool>,
) -> Result<ClientConfig> {
    let mut url = url.or_else(|| std::env::var("ENATRIEVE_URL").ok());
    let mut timeout_raw = std::env::var("ENATRIEVE_TIMEOUT").ok();
    let mut verify = verify.or_else(|| {
        std::env::var("ENATRIEVE_VERIFY")
            .ok()
            .map(|v| parse_verify(&v))
    });

    if url.is_none() || (timeout.is_none() && timeout_raw.is_none()) || verify.is_none() {
        for rc_path in rc_candidates() {
            if rc_path.exists() {
                let cfg = read_rc(&rc_path).with_context(|| {
                    format!("failed to read configuration file {}", rc_path.display())
                })?;

                if url.is_none() {
                    url = cfg.url;
                }
                if timeout_raw.is_none() {
                    timeout_raw = cfg.timeout;
                }
                if verify.is_none() {
                    verify = cfg.verify;
                }
                break;
            }
        }
    }

    let timeout = match timeout {
        Some(t) => Some(t),
        None => match timeout_raw {
            Some(raw) => parse_timeout(&raw)?,
            None => None,
        },
    };

    let url = url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| DEFAULT_URL.to_string());

    Ok(ClientConfig {
        url,
        timeout,
        verify: verify.unwrap_or(true),
        ..ClientConfig::default()
    })
}

/// Seconds, with `0` meaning no total timeout.
fn parse_timeout(raw: &str) -> Result<Option<Duration>> {
    let secs: f64 = raw
        .trim()
        .parse()
        .with_context(|| format!("invalid timeout value '{}' (expected seconds)", raw.trim()))?;
    if !secs.is_finite() || secs < 0.0 {
        bail!("invalid timeout value '{}' (expected seconds)", raw.trim());
    }
    Ok(if secs == 0.0 {
        None
    } else {
        Some(Duration::from_secs_f64(secs))
    })
}

fn parse_verify(v: &str) -> bool {
    !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no")
}

fn read_rc(path: &Path) -> Result<RcConfig> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_rc(&text))
}

fn parse_rc(text: &str) -> RcConfig {
    let mut cfg = RcConfig::default();

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Only split on the first colon so URLs keep their scheme.
        if let Some((k, v)) = line.split_once(':') {
            let v = strip_quotes(v.trim());
            if v.is_empty() {
                continue;
            }
            match k.trim() {
                "url" => cfg.url = Some(v.to_string()),
                "timeout" => cfg.timeout = Some(v.to_string()),
                "verify" => cfg.verify = Some(parse_verify(v)),
                _ => {}
            }
        }
    }

    cfg
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn rc_candidates() -> Vec<PathBuf> {
    // 1) ENATRIEVE_RC (explicit)
    // 2) ./.enatrieverc
    // 3) ~/.enatrieverc
    if let Ok(p) = std::env::var("ENATRIEVE_RC") {
        return vec![PathBuf::from(p)];
    }

    let mut v = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        v.push(cwd.join(".enatrieverc"));
    }
    if let Some(home) = dirs::home_dir() {
        v.push(home.join(".enatrieverc"));
    }
    v
}
