use super::*;

#[test]
fn defaults_resolve_to_local_services() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.broker.url, DEFAULT_BROKER_URL);
    assert_eq!(settings.broker.exchange, "pipeline");
    assert_eq!(settings.broker.dead_letter_exchange, "pipeline.dlx");
    assert_eq!(settings.broker.retry_delay_ms, 60_000);
    assert_eq!(settings.broker.max_retries, 3);
    assert_eq!(settings.pipeline.queue(StageKind::Render), "render");
    assert_eq!(settings.redis.tasks_ttl, Duration::from_secs(3600));
    assert_eq!(settings.redis.jobs_ttl, Duration::from_secs(900));
    assert!(settings.database.url.is_none());
    assert_eq!(settings.tasks.max_input_bytes.get(), 64 * 1024);
    assert_eq!(settings.render.pdf_cli_path, PathBuf::from("wkhtmltopdf"));
    assert!(matches!(settings.logging.format, LogFormat::Compact));
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.broker.max_retries = Some(5);
    raw.logging.level = Some("info".to_string());

    let overrides = WorkerOverrides {
        common: CommonOverrides {
            log_level: Some("debug".to_string()),
            broker_url: Some("amqp://rabbit:5672/%2f".to_string()),
            ..Default::default()
        },
        max_retries: Some(1),
        ..Default::default()
    };

    raw.apply_worker_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.broker.max_retries, 1);
    assert_eq!(settings.broker.url, "amqp://rabbit:5672/%2f");
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    raw.apply_common_overrides(&CommonOverrides {
        log_json: Some(true),
        ..Default::default()
    });

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn zero_retry_delay_is_rejected() {
    let mut raw = RawSettings::default();
    raw.broker.retry_delay_ms = Some(0);

    let err = Settings::from_raw(raw).expect_err("invalid settings");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "broker.retry_delay_ms",
            ..
        }
    ));
}

#[test]
fn zero_max_retries_is_allowed() {
    let mut raw = RawSettings::default();
    raw.broker.max_retries = Some(0);

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.broker.max_retries, 0);
}

#[test]
fn dead_letter_exchange_must_differ() {
    let mut raw = RawSettings::default();
    raw.broker.dead_letter_exchange = Some("pipeline".to_string());

    let err = Settings::from_raw(raw).expect_err("invalid settings");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "broker.dead_letter_exchange",
            ..
        }
    ));
}

#[test]
fn stage_queues_must_be_distinct() {
    let mut raw = RawSettings::default();
    raw.pipeline.render_queue = Some("ingest".to_string());

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn ttls_must_be_positive() {
    let mut raw = RawSettings::default();
    raw.redis.jobs_ttl_seconds = Some(0);

    let err = Settings::from_raw(raw).expect_err("invalid settings");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "redis.jobs_ttl_seconds",
            ..
        }
    ));
}

#[test]
fn blank_database_url_is_treated_as_missing() {
    let mut raw = RawSettings::default();
    raw.database.url = Some("   ".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.database.url.is_none());
}

#[test]
fn temperature_out_of_range_is_rejected() {
    let mut raw = RawSettings::default();
    raw.llm.temperature = Some(3.5);

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn storage_folder_cannot_escape_root() {
    let mut raw = RawSettings::default();
    raw.storage.folder = Some("../outside".to_string());

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn parse_worker_arguments() {
    let args = CliArgs::parse_from([
        "docpipe",
        "worker",
        "render",
        "--redis-url",
        "redis://cache:6379/1",
        "--retry-delay-ms",
        "5000",
    ]);

    match args.command.expect("worker command") {
        Command::Worker(worker) => {
            assert_eq!(worker.stage, StageKind::Render);
            assert_eq!(
                worker.overrides.common.redis_url.as_deref(),
                Some("redis://cache:6379/1")
            );
            assert_eq!(worker.overrides.retry_delay_ms, Some(5000));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_topology_arguments() {
    let args = CliArgs::parse_from(["docpipe", "topology", "verify"]);

    match args.command.expect("topology command") {
        Command::Topology(topology) => assert_eq!(topology.action, TopologyAction::Verify),
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_submit_arguments() {
    let user = "0190a0b4-0000-7000-8000-000000000001";
    let args = CliArgs::parse_from([
        "docpipe",
        "submit",
        "--user-id",
        user,
        "--text",
        "hello",
        "--database-url",
        "postgres://example",
    ]);

    match args.command.expect("submit command") {
        Command::Submit(submit) => {
            assert_eq!(submit.user_id.to_string(), user);
            assert_eq!(submit.text.as_deref(), Some("hello"));
            assert!(submit.file.is_none());
            assert_eq!(
                submit.overrides.database_url.as_deref(),
                Some("postgres://example")
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn submit_rejects_text_and_file_together() {
    let result = CliArgs::try_parse_from([
        "docpipe",
        "submit",
        "--user-id",
        "0190a0b4-0000-7000-8000-000000000001",
        "--text",
        "hello",
        "--file",
        "/tmp/input.txt",
    ]);
    assert!(result.is_err());
}

#[test]
fn parse_status_arguments() {
    let args = CliArgs::parse_from([
        "docpipe",
        "status",
        "0190a0b4-0000-7000-8000-000000000002",
        "--user-id",
        "0190a0b4-0000-7000-8000-000000000001",
    ]);

    match args.command.expect("status command") {
        Command::Status(status) => {
            assert_eq!(
                status.id.to_string(),
                "0190a0b4-0000-7000-8000-000000000002"
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn unknown_stage_is_rejected() {
    assert!(CliArgs::try_parse_from(["docpipe", "worker", "upload"]).is_err());
}

#[test]
fn workers_declare_their_own_and_downstream_queues() {
    let mut raw = RawSettings::default();
    raw.broker.retry_delay_ms = Some(5_000);
    let settings = Settings::from_raw(raw).expect("valid settings");

    let names = |stage: StageKind| -> Vec<String> {
        settings
            .worker_topologies(stage)
            .into_iter()
            .map(|topology| topology.queue)
            .collect()
    };

    assert_eq!(names(StageKind::Ingest), vec!["ingest", "render"]);
    assert_eq!(names(StageKind::Render), vec!["render", "finalize"]);
    assert_eq!(names(StageKind::Finalize), vec!["finalize"]);

    let render = settings.stage_topology(StageKind::Render);
    assert_eq!(render.exchange, "pipeline");
    assert_eq!(render.dead_letter_exchange, "pipeline.dlx");
    assert_eq!(render.delay_queue, "render.dlq");
    assert_eq!(render.retry_delay_ms, 5_000);
}
