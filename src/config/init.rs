// ABOUTME: Config scaffolding for new installations.
// ABOUTME: Writes a commented lookout.yml template.

use std::path::Path;

use crate::error::{Error, Result};

use super::{CONFIG_FILENAME, Config};

pub fn init_config(dir: &Path, force: bool) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    let yaml = generate_template_yaml(&Config::template());
    std::fs::write(&config_path, yaml)?;

    Ok(())
}

fn generate_template_yaml(config: &Config) -> String {
    let update = &config.update;
    format!(
        r#"providers:
  - id: {id}
    # host: unix:///var/run/docker.sock
    # swarm: false
    # watch_stopped: false
    # tls:
    #   ca: /certs/ca.pem
    #   cert: /certs/cert.pem
    #   key: /certs/key.pem

update:
  poll_interval: {poll}
  run_on_start: {run_on_start}
  # Only watch containers labelled lookout.enable=true
  label_enable: {label_enable}
  monitor_only: {monitor_only}
  # Remove the previous image after a successful update
  cleanup: {cleanup}
  # Recreate running containers that depend on an updated one
  restart_dependents: {restart_dependents}
  # favor-skip or favor-force
  opt_out_precedence: favor-skip
  worker_limit: {workers}
  stop_timeout: {stop}

api:
  enabled: {api_enabled}
  listen: {listen}
  # token: {{ env: LOOKOUT_API_TOKEN }}

notifications:
  notify_on_empty: false
  channels:
    - type: log
    # - type: webhook
    #   url: {{ env: LOOKOUT_WEBHOOK_URL }}
"#,
        id = config.providers.head.id,
        poll = humantime_serde::re::humantime::format_duration(update.poll_interval),
        run_on_start = update.run_on_start,
        label_enable = update.label_enable,
        monitor_only = update.monitor_only,
        cleanup = update.cleanup,
        restart_dependents = update.restart_dependents,
        workers = update.worker_limit,
        stop = humantime_serde::re::humantime::format_duration(update.stop_timeout),
        api_enabled = config.api.enabled,
        listen = config.api.listen,
    )
}
