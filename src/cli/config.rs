//! `newsdigest config`.

use anyhow::Result;

use newsdigest::config::Config;

pub(crate) fn cmd_config(config: &Config) -> Result<()> {
    let mut shown = config.clone();
    if shown.upstream.api_key.is_some() {
        shown.upstream.api_key = Some("<redacted>".to_string());
    }
    print!("{}", shown.to_toml()?);
    Ok(())
}
