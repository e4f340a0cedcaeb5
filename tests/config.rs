// ABOUTME: Integration tests for configuration discovery, overrides and validation.
// ABOUTME: Exercises file lookup, LOOKOUT_* environment overrides and CLI precedence.

use lookout::config::*;
use lookout::error::Error;
use lookout::runtime::RuntimeMode;
use std::fs;
use std::time::Duration;

mod discovery {
    use super::*;

    #[test]
    fn finds_primary_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lookout.yml"), "update:\n  poll_interval: 1h\n").unwrap();

        let config = Config::discover(dir.path()).unwrap();
        assert_eq!(config.update.poll_interval, Duration::from_secs(3600));
    }

    #[test]
    fn finds_alternate_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".lookout")).unwrap();
        fs::write(
            dir.path().join(".lookout/config.yml"),
            "update:\n  cleanup: true\n",
        )
        .unwrap();

        let config = Config::discover(dir.path()).unwrap();
        assert!(config.update.cleanup);
    }

    #[test]
    fn missing_file_is_reported_by_discover() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Config::discover(dir.path()),
            Err(Error::ConfigNotFound(_))
        ));
    }

    #[test]
    fn resolve_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::resolve(None, dir.path()).unwrap();
        assert_eq!(config.providers.head.id, "local");
        assert_eq!(config.update.worker_limit, 1);
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yml");
        assert!(matches!(
            Config::resolve(Some(&missing), dir.path()),
            Err(Error::Io(_))
        ));
    }
}

mod parsing {
    use super::*;

    #[test]
    fn full_config() {
        let yaml = r#"
providers:
  - id: edge
    host: tcp://edge.internal:2376
    api_version: "1.43"
    timeout: 30s
    tls:
      ca: /certs/ca.pem
      cert: /certs/cert.pem
      key: /certs/key.pem
  - id: cluster
    host: tcp://manager:2375
    swarm: true
    watch_stopped: true
update:
  poll_interval: 6h
  label_enable: true
  restart_dependents: true
  opt_out_precedence: favor-force
  containers: [web, db]
  worker_limit: 2
  settle: 5s
api:
  enabled: true
  listen: 127.0.0.1:9090
  token: { env: LOOKOUT_TEST_TOKEN }
notifications:
  notify_on_empty: true
  timeout: 3s
  channels:
    - type: webhook
      name: ops
      url: https://hooks.example.com/lookout
      headers:
        X-Key: { env: LOOKOUT_TEST_HOOK_KEY, default: fallback }
    - type: log
"#;
        let config = Config::from_yaml(yaml).unwrap();
        config.validate().unwrap();

        let edge = &config.providers.head;
        assert_eq!(edge.timeout, Duration::from_secs(30));
        assert!(edge.tls.as_ref().unwrap().verify);
        let cluster = &config.providers.tail[0];
        assert_eq!(cluster.mode(), RuntimeMode::Swarm);

        let policy = config.update.policy(cluster);
        assert!(policy.watch_stopped);
        assert!(policy.label_enable);
        assert_eq!(policy.worker_limit, 2);
        assert_eq!(policy.timeouts.settle, Duration::from_secs(5));
        assert!(policy.containers.contains("db"));

        assert_eq!(config.api.listen.port(), 9090);
        assert_eq!(config.notifications.channels.len(), 2);
        assert_eq!(config.notifications.channels[1].name(1), "log-1");
    }

    #[test]
    fn unknown_channel_type_is_rejected() {
        let yaml = "notifications:\n  channels:\n    - type: carrier-pigeon\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn bad_duration_is_rejected() {
        assert!(Config::from_yaml("update:\n  poll_interval: often\n").is_err());
    }
}

mod validation {
    use super::*;

    #[test]
    fn unsupported_endpoint_scheme() {
        let config = Config::from_yaml("providers:\n  - host: ssh://box\n");
        // Short-form entries are checked while parsing, detailed ones in validate.
        match config {
            Err(_) => {}
            Ok(config) => assert!(config.validate().is_err()),
        }
    }

    #[test]
    fn poll_interval_below_a_second() {
        let config = Config::from_yaml("update:\n  poll_interval: 100ms\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_container_name_in_allow_list() {
        let config = Config::from_yaml("update:\n  containers: [\"bad name\"]\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn webhook_must_be_http() {
        let yaml = "notifications:\n  channels:\n    - type: webhook\n      url: ftp://x\n";
        let config = Config::from_yaml(yaml).unwrap();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}

mod overrides {
    use super::*;

    #[test]
    fn environment_overrides_file() {
        let mut config = Config::from_yaml("update:\n  poll_interval: 1h\n").unwrap();
        temp_env::with_vars(
            [
                ("LOOKOUT_POLL_INTERVAL", Some("15m")),
                ("LOOKOUT_API_TOKEN", Some("from-env")),
                ("LOOKOUT_API_LISTEN", Some("127.0.0.1:7000")),
                ("DOCKER_HOST", Some("tcp://docker:2375")),
            ],
            || config.apply_env().unwrap(),
        );

        assert_eq!(config.update.poll_interval, Duration::from_secs(900));
        assert_eq!(
            config.api.resolved_token().unwrap().as_deref(),
            Some("from-env")
        );
        assert_eq!(config.api.listen.port(), 7000);
        assert_eq!(
            config.providers.head.host.as_deref(),
            Some("tcp://docker:2375")
        );
    }

    #[test]
    fn docker_host_does_not_replace_configured_hosts() {
        let mut config = Config::from_yaml("providers:\n  - tcp://a:2375\n").unwrap();
        temp_env::with_var("DOCKER_HOST", Some("tcp://b:2375"), || {
            config.apply_env().unwrap()
        });
        assert_eq!(config.providers.head.host.as_deref(), Some("tcp://a:2375"));
    }

    #[test]
    fn bad_env_interval_is_an_error() {
        let mut config = Config::default();
        let result = temp_env::with_var("LOOKOUT_POLL_INTERVAL", Some("soon"), || {
            config.apply_env()
        });
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn flags_win_over_environment() {
        let mut config = Config::default();
        temp_env::with_var("LOOKOUT_POLL_INTERVAL", Some("15m"), || {
            config.apply_env().unwrap()
        });
        config.apply_overrides(&Overrides {
            poll_interval: Some(Duration::from_secs(60)),
            cleanup: true,
            ..Default::default()
        });
        assert_eq!(config.update.poll_interval, Duration::from_secs(60));
        assert!(config.update.cleanup);
    }

    #[test]
    fn token_from_env_reference() {
        let config = Config::from_yaml("api:\n  token: { env: LOOKOUT_TEST_TOKEN_REF }\n").unwrap();
        temp_env::with_var("LOOKOUT_TEST_TOKEN_REF", Some("abc"), || {
            assert_eq!(config.api.resolved_token().unwrap().as_deref(), Some("abc"));
        });
        temp_env::with_var_unset("LOOKOUT_TEST_TOKEN_REF", || {
            assert!(matches!(
                config.api.resolved_token(),
                Err(Error::MissingEnvVar(_))
            ));
        });
    }
}

mod init {
    use super::*;

    #[test]
    fn template_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        init_config(dir.path(), false).unwrap();

        let config = Config::discover(dir.path()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.providers.head.id, "local");
    }

    #[test]
    fn force_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lookout.yml"), "garbage: [").unwrap();
        assert!(matches!(
            init_config(dir.path(), false),
            Err(Error::AlreadyExists(_))
        ));
        init_config(dir.path(), true).unwrap();
        Config::discover(dir.path()).unwrap();
    }
}
