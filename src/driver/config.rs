use super::{DriverError, DriverOptions};

pub fn parse_driver_kv(pairs: &[String]) -> Result<DriverOptions, DriverError> {
    let mut opts = DriverOptions::default();
    for p in pairs {
        match p.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => {
                opts.params.insert(k.trim().to_string(), v.trim().to_string());
            }
            _ => return Err(DriverError::Other(format!("expected key=value, got '{p}'"))),
        }
    }
    Ok(opts)
}

/// Reads an optional typed parameter, rejecting values that fail to parse.
pub fn param<T: std::str::FromStr>(opts: &DriverOptions, key: &str) -> Result<Option<T>, DriverError> {
    match opts.params.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| DriverError::Other(format!("invalid value for {key}: '{raw}'"))),
    }
}
