use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use crate::config::Config;
use crate::error::{InspectError, Result};

pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<Config> {
    let txt = fs::read_to_string(p)
        .map_err(|e| InspectError::Config(format!("Failed to read config file: {e}")))?;
    let cfg: Config = toml::from_str(&txt)
        .map_err(|e| InspectError::Config(format!("Failed to parse config: {e}")))?;

    validate_config(&cfg)?;

    Ok(cfg)
}

fn validate_config(cfg: &Config) -> Result<()> {
    if cfg.capture.interface.is_empty() {
        return Err(InspectError::Config("capture.interface is empty".into()));
    }

    if cfg.capture.buffer_mb == 0 {
        return Err(InspectError::Config("capture.buffer_mb must be nonzero".into()));
    }

    if cfg.capture.flow.table_size == 0 {
        return Err(InspectError::Config(
            "capture.flow.table_size must be nonzero".into(),
        ));
    }

    if cfg.dpi.max_sessions == 0 {
        return Err(InspectError::Config("dpi.max_sessions must be nonzero".into()));
    }

    if let Some(netflow) = &cfg.netflow {
        // Accept bare "ip" by appending the default collector port.
        let with_port = if netflow.collector.contains(':') {
            netflow.collector.clone()
        } else {
            format!("{}:2055", netflow.collector)
        };
        with_port.parse::<SocketAddr>().map_err(|_| {
            InspectError::Config(format!(
                "netflow.collector is not a valid address: {}",
                netflow.collector
            ))
        })?;
        if netflow.export_interval_sec == 0 {
            return Err(InspectError::Config(
                "netflow.export_interval_sec must be nonzero".into(),
            ));
        }
    }

    Ok(())
}
