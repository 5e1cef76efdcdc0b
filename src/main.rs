use anyhow::{Context, Result};
use promote::cli::commands::{HistoryCommand, ListCommand, RunCommand, ValidateCommand};
use promote::cli::output::*;
use promote::cli::{Cli, Command};
use promote::container::{DockerCli, InMemoryEngine};
use promote::core::{
    EnvMap, InvocationContext, Pipeline, Settings, Target, TriggerKind,
};
use promote::credentials::{CredentialProvider, EnvCredentialProvider};
use promote::execution::{
    ContainerStageRunner, ExecutionEngine, NotifyPolicy, PipelineOutcome, StageRunner,
};
use promote::notify::{notifier_from, NotificationSink};
use promote::persistence::{create_summary, load_ledger, record_run, PersistenceBackend};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // RUST_LOG wins over -v
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let config = cli.config.as_deref();
    let exit_code = match &cli.command {
        Command::Run(cmd) => run_target(cmd, config).await?,
        Command::List(cmd) => list_targets(cmd)?,
        Command::Validate(cmd) => validate_targets(cmd, config).await?,
        Command::History(cmd) => show_history(cmd).await?,
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

async fn load_settings(config: Option<&Path>, env: &EnvMap) -> Result<Settings> {
    let mut settings = Settings::load(config, env).context("Failed to load settings")?;
    settings.resolve_revision().await;
    Ok(settings)
}

fn parse_target(name: &str) -> Option<Target> {
    match name.parse::<Target>() {
        Ok(target) => Some(target),
        Err(e) => {
            println!("{} {}", CROSS, e);
            println!("  Run `promote list` to see the available targets");
            None
        }
    }
}

async fn open_store() -> Result<Arc<dyn PersistenceBackend>> {
    #[cfg(feature = "sqlite")]
    {
        let store = promote::persistence::SqliteExecutionStore::with_default_path()
            .await
            .context("Failed to open execution history")?;
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "sqlite"))]
    {
        Ok(Arc::new(promote::persistence::InMemoryPersistence::new()))
    }
}

async fn run_target(cmd: &RunCommand, config: Option<&Path>) -> Result<i32> {
    let env: EnvMap = std::env::vars().collect();
    let mut settings = load_settings(config, &env).await?;
    if let Some(image) = &cmd.image {
        settings.image = Some(image.clone());
    }
    settings.opts.extend(cmd.opts.iter().cloned());

    let Some(target) = parse_target(&cmd.target) else {
        return Ok(1);
    };
    let trigger = cmd
        .trigger
        .clone()
        .unwrap_or_else(|| TriggerKind::from_env(&env));

    let mut ctx = InvocationContext::new(settings, trigger).context("Invalid settings")?;
    ctx.force_rebuild = cmd.rebuild;
    ctx.assume_qualified = cmd.assume_qualified;
    ctx.env.extend(cmd.env.iter().cloned());

    // Simulated digests must never qualify real images
    let keep_history = !(cmd.no_history || cmd.dry_run);
    // History never decides the outcome of a run
    let store = if keep_history {
        match open_store().await {
            Ok(store) => Some(store),
            Err(e) => {
                warn!("Continuing without execution history: {:#}", e);
                None
            }
        }
    } else {
        None
    };
    if let Some(store) = &store {
        ctx.ledger = load_ledger(store.as_ref()).await;
        debug!("Ledger seeded with {} records", ctx.ledger.len());
    }

    let credentials: Arc<dyn CredentialProvider> = Arc::new(EnvCredentialProvider::from_env());
    let notifier = notifier_from(credentials.as_ref());
    let policy = if cmd.notify {
        NotifyPolicy::Always
    } else {
        NotifyPolicy::CiOnly
    };

    let mut pipeline = target.build_pipeline(&ctx);
    let outcome = if cmd.dry_run {
        println!("{} Dry run: no docker commands are executed", INFO);
        let runner = ContainerStageRunner::new(InMemoryEngine::dry_run());
        execute(runner, credentials, notifier, policy, &mut pipeline, &mut ctx).await
    } else {
        let runner = ContainerStageRunner::new(DockerCli::from_settings(&ctx.settings));
        execute(runner, credentials, notifier, policy, &mut pipeline, &mut ctx).await
    };

    print_outcome(&outcome);

    if let Some(store) = &store {
        let summary = create_summary(&pipeline, &outcome, &ctx);
        if record_run(store.as_ref(), &summary, ctx.ledger.new_records()).await {
            println!(
                "{} Execution saved to history (ID: {})",
                INFO,
                style(&summary.execution_id.to_string()[..8]).dim()
            );
        }
    }

    Ok(outcome.exit_code)
}

async fn execute<R: StageRunner>(
    runner: R,
    credentials: Arc<dyn CredentialProvider>,
    notifier: Arc<dyn NotificationSink>,
    policy: NotifyPolicy,
    pipeline: &mut Pipeline,
    ctx: &mut InvocationContext,
) -> PipelineOutcome {
    let engine = ExecutionEngine::new(runner, credentials)
        .with_notifier(notifier, policy)
        .with_retry_delay(Duration::from_millis(ctx.settings.retry_delay_ms));

    let reporter = Arc::new(ConsoleReporter::new());
    engine.add_event_handler(move |event| reporter.handle(&event));

    let cancel = ctx.cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling the running stage");
            cancel.cancel();
        }
    });

    let outcome = engine.execute(pipeline, ctx).await;
    interrupt.abort();
    outcome
}

fn list_targets(cmd: &ListCommand) -> Result<i32> {
    let targets = Target::all();

    if cmd.json {
        let data: Vec<_> = targets
            .iter()
            .map(|target| {
                serde_json::json!({
                    "name": target.name(),
                    "description": target.description(),
                    "composite": target.is_composite(),
                    "children": target.children().iter().map(Target::name).collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "targets": data }))?);
        return Ok(0);
    }

    println!("{} Available targets:", INFO);
    let width = targets.iter().map(|t| t.name().len()).max().unwrap_or(0);
    for target in &targets {
        println!(
            "  {}  {}",
            style(format!("{:width$}", target.name(), width = width)).bold(),
            style(target.description()).dim()
        );
    }
    Ok(0)
}

async fn validate_targets(cmd: &ValidateCommand, config: Option<&Path>) -> Result<i32> {
    let env: EnvMap = std::env::vars().collect();
    let ctx = match load_settings(config, &env)
        .await
        .and_then(|s| InvocationContext::new(s, TriggerKind::from_env(&env)).map_err(Into::into))
    {
        Ok(ctx) => ctx,
        Err(e) => {
            println!("{} Settings are invalid:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            return Ok(1);
        }
    };

    let targets = match &cmd.target {
        Some(name) => match parse_target(name) {
            Some(target) => vec![target],
            None => return Ok(1),
        },
        None => Target::all(),
    };

    let mut report = Vec::new();
    let mut failures = 0;
    for target in &targets {
        let pipeline = target.build_pipeline(&ctx);
        let error = pipeline.validate().err().map(|e| e.to_string());
        if error.is_some() {
            failures += 1;
        }
        report.push((target.name(), pipeline, error));
    }

    if cmd.json {
        let data: Vec<_> = report
            .iter()
            .map(|(name, pipeline, error)| {
                serde_json::json!({
                    "target": name,
                    "segments": pipeline.segments.iter().map(|s| s.target_name.clone()).collect::<Vec<_>>(),
                    "stages": pipeline.stages().map(|(_, stage)| stage.name.clone()).collect::<Vec<_>>(),
                    "requires_registry": pipeline.requires_registry(),
                    "error": error,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "targets": data }))?);
    } else {
        println!("{}", ctx.describe());
        println!();
        for (name, pipeline, error) in &report {
            match error {
                None => println!(
                    "{} {} ({} stages)",
                    CHECK,
                    style(name).bold(),
                    style(pipeline.stage_count()).cyan()
                ),
                Some(e) => println!("{} {}: {}", CROSS, style(name).bold(), style(e).red()),
            }
        }
    }

    Ok(if failures == 0 { 0 } else { 1 })
}

async fn show_history(cmd: &HistoryCommand) -> Result<i32> {
    let store = open_store().await?;

    let mut executions = match &cmd.target {
        Some(target) => store.list_executions(target).await?,
        None => {
            let mut all = Vec::new();
            for target in store.list_targets().await? {
                all.extend(store.list_executions(&target).await?);
            }
            all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all
        }
    };
    executions.truncate(cmd.limit);

    if cmd.json {
        let data = serde_json::json!({ "executions": executions });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(0);
    }

    if executions.is_empty() {
        println!("{} No executions found", INFO);
        return Ok(0);
    }

    println!("{} Execution history (latest {}):", INFO, executions.len());
    for summary in &executions {
        println!("  {}", format_execution_summary(summary));
        if let Some(error) = &summary.error {
            println!("      {}", style(error).red());
        }
    }

    Ok(0)
}
