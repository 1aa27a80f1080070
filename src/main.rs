use std::{path::Path, process, sync::Arc};

use docpipe::{
    application::{
        broker::Publisher,
        collaborators::{DocumentRenderer, ObjectStore, TextTransformer},
        error::AppError,
        pipeline::{
            FinalizeStage, Forwarder, IngestStage, ReliableConsumer, RenderStage, RetryPolicy,
            Stage,
        },
        repos::TasksRepo,
        state::StateStore,
        tasks::TaskService,
    },
    config::{self, Command, ListArgs, Settings, SubmitArgs, TaskArgs, TopologyAction},
    domain::{entities::Task, types::StageKind},
    infra::{
        broker::{BrokerConnection, TopologyManager},
        db::PostgresRepositories,
        error::InfraError,
        llm::{DEFAULT_INSTRUCTIONS, LlmClientConfig, OpenAiTransformer},
        render::HtmlPdfRenderer,
        state::RedisStateStore,
        telemetry,
        uploads::FilesystemObjectStore,
    },
};
use serde::Serialize;
use serde_json::json;
use tokio::signal;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, chain = ?error.messages(), "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, chain = ?error.messages(), "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .ok_or_else(|| AppError::validation("a command is required; see `docpipe --help`"))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        Command::Worker(args) => run_worker(settings, args.stage).await,
        Command::Topology(args) => run_topology(settings, args.action).await,
        Command::Submit(args) => run_submit(settings, args).await,
        Command::Status(args) => run_status(settings, args).await,
        Command::List(args) => run_list(settings, args).await,
        Command::Delete(args) => run_delete(settings, args).await,
    }
}

async fn run_worker(settings: Settings, stage: StageKind) -> Result<(), AppError> {
    let broker = BrokerConnection::open(&settings.broker.url).await?;
    let result = consume_stage(&broker, &settings, stage).await;
    broker.close().await;
    result
}

async fn consume_stage(
    broker: &BrokerConnection,
    settings: &Settings,
    stage: StageKind,
) -> Result<(), AppError> {
    let topology = settings.stage_topology(stage);
    for declared in settings.worker_topologies(stage) {
        TopologyManager::new(broker, &declared).setup().await?;
    }

    let state = init_state(settings).await?;
    let publisher: Arc<dyn Publisher> = Arc::new(broker.publisher());

    let worker: Arc<dyn Stage> = match stage {
        StageKind::Ingest => Arc::new(IngestStage::new(
            state,
            build_transformer(settings).await?,
            next_stage_forwarder(settings, stage, publisher.clone())?,
        )),
        StageKind::Render => Arc::new(RenderStage::new(
            state,
            build_renderer(settings).await?,
            build_object_store(settings)?,
            next_stage_forwarder(settings, stage, publisher.clone())?,
        )),
        StageKind::Finalize => {
            let tasks: Arc<dyn TasksRepo> = init_repositories(settings).await?;
            Arc::new(FinalizeStage::new(state, tasks))
        }
    };

    let consumer = ReliableConsumer::new(
        worker,
        publisher,
        RetryPolicy::new(&topology, settings.broker.max_retries),
    );

    info!(
        target = "docpipe::worker",
        stage = stage.as_str(),
        queue = %topology.queue,
        "Starting worker"
    );

    let source = broker.delivery_source();
    consumer
        .start_consuming(&source, &topology.queue, shutdown_signal())
        .await?;

    info!(
        target = "docpipe::worker",
        stage = stage.as_str(),
        "Worker stopped"
    );
    Ok(())
}

async fn run_topology(settings: Settings, action: TopologyAction) -> Result<(), AppError> {
    let broker = BrokerConnection::open(&settings.broker.url).await?;

    let mut result = Ok(());
    for stage in StageKind::ALL {
        let topology = settings.stage_topology(stage);
        let manager = TopologyManager::new(&broker, &topology);
        let outcome = match action {
            TopologyAction::Setup => manager.setup().await,
            TopologyAction::Verify => manager.verify().await,
        };
        if let Err(err) = outcome {
            result = Err(err.into());
            break;
        }
        info!(
            target = "docpipe::topology",
            stage = stage.as_str(),
            queue = %topology.queue,
            action = ?action,
            "Topology ready"
        );
    }

    broker.close().await;
    result
}

async fn run_submit(settings: Settings, args: SubmitArgs) -> Result<(), AppError> {
    let text = match (args.text, args.file) {
        (Some(text), None) => text,
        (None, Some(path)) => read_text_file(&path).await?,
        _ => {
            return Err(AppError::validation(
                "submit requires either --text or --file",
            ));
        }
    };

    let broker = BrokerConnection::open(&settings.broker.url).await?;
    let result = submit_with(&broker, &settings, &text, args.user_id).await;
    broker.close().await;

    let task = result?;
    print_json(&task);
    Ok(())
}

async fn submit_with(
    broker: &BrokerConnection,
    settings: &Settings,
    text: &str,
    user_id: uuid::Uuid,
) -> Result<Task, AppError> {
    let topology = settings.stage_topology(StageKind::Ingest);
    TopologyManager::new(broker, &topology).setup().await?;

    let publisher: Arc<dyn Publisher> = Arc::new(broker.publisher());
    let submissions = Forwarder::new(
        publisher,
        settings.broker.exchange.clone(),
        topology.queue.clone(),
    );
    let service = build_task_service(settings).await?.with_submissions(submissions);

    Ok(service.create_task(text, user_id).await?)
}

async fn run_status(settings: Settings, args: TaskArgs) -> Result<(), AppError> {
    let service = build_task_service(&settings).await?;
    let task = service.get_task(args.id, args.user_id).await?;
    print_json(&task);
    Ok(())
}

async fn run_list(settings: Settings, args: ListArgs) -> Result<(), AppError> {
    let service = build_task_service(&settings).await?;
    let tasks = service.list_tasks(args.user_id).await?;
    print_json(&tasks);
    Ok(())
}

async fn run_delete(settings: Settings, args: TaskArgs) -> Result<(), AppError> {
    let service = build_task_service(&settings).await?;
    service.delete_task(args.id, args.user_id).await?;
    print_json(&json!({ "id": args.id, "deleted": true }));
    Ok(())
}

fn next_stage_forwarder(
    settings: &Settings,
    stage: StageKind,
    publisher: Arc<dyn Publisher>,
) -> Result<Forwarder, AppError> {
    let next = stage.next().ok_or_else(|| {
        AppError::unexpected(format!("stage `{}` has no successor", stage.as_str()))
    })?;
    Ok(Forwarder::new(
        publisher,
        settings.broker.exchange.clone(),
        settings.pipeline.queue(next),
    ))
}

async fn init_state(settings: &Settings) -> Result<Arc<dyn StateStore>, AppError> {
    let store = RedisStateStore::connect(
        &settings.redis.url,
        settings.redis.tasks_ttl,
        settings.redis.jobs_ttl,
    )
    .await
    .map_err(|err| AppError::from(InfraError::state_store(err.to_string())))?;
    Ok(Arc::new(store))
}

async fn init_repositories(settings: &Settings) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

async fn build_task_service(settings: &Settings) -> Result<TaskService, AppError> {
    let state = init_state(settings).await?;
    let tasks: Arc<dyn TasksRepo> = init_repositories(settings).await?;
    Ok(TaskService::new(
        state,
        tasks,
        settings.tasks.max_input_bytes.get(),
    ))
}

async fn build_transformer(settings: &Settings) -> Result<Arc<dyn TextTransformer>, AppError> {
    let llm = &settings.llm;
    let api_key = llm
        .api_key
        .clone()
        .ok_or_else(|| InfraError::configuration("llm.api_key is not configured"))?;

    let instructions = match llm.prompt_path.as_ref() {
        Some(path) => read_text_file(path).await?,
        None => DEFAULT_INSTRUCTIONS.to_string(),
    };

    let transformer = OpenAiTransformer::new(LlmClientConfig {
        base_url: llm.base_url.clone(),
        api_key,
        project: llm.project.clone(),
        model: llm.model.clone(),
        instructions,
        temperature: llm.temperature,
        timeout: llm.timeout,
    })
    .map_err(|err| AppError::from(InfraError::http_client(err.to_string())))?;

    Ok(Arc::new(transformer))
}

async fn build_renderer(settings: &Settings) -> Result<Arc<dyn DocumentRenderer>, AppError> {
    let stylesheet = match settings.render.stylesheet_path.as_ref() {
        Some(path) => Some(read_text_file(path).await?),
        None => None,
    };
    Ok(Arc::new(HtmlPdfRenderer::new(
        settings.render.pdf_cli_path.clone(),
        stylesheet,
    )))
}

fn build_object_store(settings: &Settings) -> Result<Arc<dyn ObjectStore>, AppError> {
    let storage = &settings.storage;
    let store = FilesystemObjectStore::new(
        storage.directory.clone(),
        &storage.folder,
        &storage.public_base_url,
    )
    .map_err(|err| AppError::from(InfraError::Io(err)))?;
    Ok(Arc::new(store))
}

async fn read_text_file(path: &Path) -> Result<String, AppError> {
    tokio::fs::read_to_string(path).await.map_err(|err| {
        AppError::from(InfraError::configuration(format!(
            "failed to read {}: {err}",
            path.display()
        )))
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(
                target = "docpipe::worker",
                error = %err,
                "Failed to listen for ctrl-c"
            );
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                warn!(
                    target = "docpipe::worker",
                    error = %err,
                    "Failed to listen for SIGTERM"
                );
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(rendered) => println!("{rendered}"),
        Err(err) => warn!(target = "docpipe::cli", error = %err, "Failed to render output"),
    }
}
