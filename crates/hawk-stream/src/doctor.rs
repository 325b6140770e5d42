use anyhow::{Context, Result};
use std::net::SocketAddr;

use crate::StreamConfig;

pub fn check_stream(cfg: &StreamConfig) -> Result<()> {
    if !cfg.enable {
        return Ok(());
    }
    cfg.bind
        .parse::<SocketAddr>()
        .with_context(|| format!("stream.bind is not an ip:port address: {}", cfg.bind))?;
    anyhow::ensure!(cfg.fps >= 1 && cfg.fps <= 60, "stream.fps should be 1..60");
    anyhow::ensure!(cfg.jpeg_quality >= 10 && cfg.jpeg_quality <= 100, "stream.jpeg_quality should be 10..100");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_address_must_parse() {
        check_stream(&StreamConfig::default()).unwrap();
        let cfg = StreamConfig { bind: "localhost".into(), ..Default::default() };
        assert!(check_stream(&cfg).is_err());
        let cfg = StreamConfig { enable: false, bind: "nonsense".into(), ..Default::default() };
        assert!(check_stream(&cfg).is_ok());
    }
}
