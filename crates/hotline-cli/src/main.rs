//! Hotline CLI - boots the host and serves until shutdown

mod cli;

use clap::Parser;
use cli::{Cli, Commands, LaunchOpts};
use colored::Colorize;
use hotline_app::{ChatConfig, ChatModule};
use hotline_kernel::module::ModuleBox;
use hotline_kernel::{ExitCode, ReloadOrigin};
use hotline_modules::{ArtifactLocator, DylibLoader, ModuleLoader, StaticLoader};
use hotline_runtime::{
    BootError, BootResult, ConsoleConnector, GatewayConnector, GatewayKind, Host, HostParts,
    HostSettings, MemoryDatastore, ReloadTrigger, SettingsError,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to start the async runtime");
            return ExitCode::Failure.into();
        }
    };

    match rt.block_on(run_command(cli)) {
        Ok(code) => code.into(),
        Err(e) => {
            error!("{e:#}");
            ExitCode::Failure.into()
        }
    }
}

fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // stdout belongs to the console gateway
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run_command(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Some(Commands::Run(opts)) => run(opts).await,
        Some(Commands::CheckConfig(opts)) => check_config(&opts),
        None => run(cli.launch).await,
    }
}

/// Build the collaborators the settings ask for.
fn assemble(settings: &HostSettings, builtin: bool) -> BootResult<HostParts> {
    let loader: Arc<dyn ModuleLoader> = if builtin {
        Arc::new(StaticLoader::new("hotline-app", |host| {
            Box::new(ChatModule::new(host)) as ModuleBox
        }))
    } else {
        let mut locator = ArtifactLocator::new(&settings.module.directory, &settings.module.name);
        if let Some(version) = settings.pinned_version().map_err(BootError::from)? {
            locator = locator.with_pinned_version(version);
        }
        let mut loader = DylibLoader::new(locator);
        if let Some(dir) = &settings.module.shadow_dir {
            loader = loader.with_shadow_dir(dir);
        }
        Arc::new(loader)
    };

    let connector: Arc<dyn GatewayConnector> = match settings.gateway.kind {
        GatewayKind::Console => Arc::new(ConsoleConnector::new(
            &settings.gateway.self_user_id,
            &settings.gateway.console_user,
            &settings.gateway.console_channel,
        )),
        GatewayKind::Memory => {
            return Err(BootError::Settings(SettingsError::Invalid {
                field: "gateway.kind",
                reason: "the memory gateway can only be used when embedding the runtime".into(),
            })
            .into());
        }
    };

    Ok(HostParts {
        loader,
        connector,
        datastore: Arc::new(MemoryDatastore::new()),
    })
}

async fn run(opts: LaunchOpts) -> anyhow::Result<ExitCode> {
    let args = opts.launch_args();
    let builtin = opts.builtin;
    let host = match Host::boot(&args, |settings| assemble(settings, builtin)).await {
        Ok(host) => host,
        Err(failure) => {
            error!(
                stage = %failure.stage,
                code = failure.code.code(),
                "Boot failed: {:?}",
                failure.report
            );
            return Ok(failure.code);
        }
    };

    spawn_signal_handlers(host.trigger());
    Ok(host.run().await)
}

/// Ctrl-C shuts down, SIGHUP reloads.
fn spawn_signal_handlers(trigger: ReloadTrigger) {
    let on_interrupt = trigger.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = on_interrupt.request_shutdown(ExitCode::Success);
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                warn!(error = %e, "SIGHUP reload disabled");
                return;
            }
        };
        while hangup.recv().await.is_some() {
            info!("SIGHUP received");
            if trigger.request_reload(ReloadOrigin::operator("SIGHUP")).is_err() {
                break;
            }
        }
    });
}

fn check_config(opts: &LaunchOpts) -> anyhow::Result<ExitCode> {
    let settings = match opts.launch_args().resolve() {
        Ok(settings) => settings,
        Err(e) => {
            println!("{} host settings: {e}", "✗".red());
            return Ok(ExitCode::ConfigInvalid);
        }
    };
    println!("{} host settings", "✓".green());
    println!("  gateway:  {:?}, {} shard(s)", settings.gateway.kind, settings.gateway.shards);
    println!(
        "  http:     {} concurrent, {} idle/host, {}s timeout",
        settings.http.max_concurrent_requests,
        settings.http.pool_max_idle_per_host,
        settings.http.request_timeout_secs
    );
    match settings.reload_timeout() {
        Some(limit) => println!("  reload:   timeout {}s", limit.as_secs()),
        None => println!("  reload:   no timeout"),
    }

    let mut code = ExitCode::Success;
    if opts.builtin {
        println!("{} module: builtin hotline-app", "✓".green());
    } else {
        let mut locator = ArtifactLocator::new(&settings.module.directory, &settings.module.name);
        if let Ok(Some(version)) = settings.pinned_version() {
            locator = locator.with_pinned_version(version);
        }
        match locator.resolve() {
            Ok((version, path)) => {
                println!("{} module: {} {} ({})", "✓".green(), settings.module.name, version, path.display());
            }
            Err(report) => {
                println!("{} module: {}", "✗".red(), report.current_context());
                code = ExitCode::Failure;
            }
        }
    }

    match ChatConfig::load(&settings.module.config) {
        Ok(config) => println!(
            "{} module config: prefix {:?}, {} admin(s)",
            "✓".green(),
            config.prefix,
            config.admins.len()
        ),
        Err(e) => {
            println!("{} module config: {e}", "✗".red());
            code = ExitCode::ConfigInvalid;
        }
    }

    Ok(code)
}
