use clap::Parser;
use std::process::ExitCode;
use talktime::app::App;
use talktime::cli::Args;
use talktime::logging::setup_logging;
use tracing::info;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let early_config = {
        use figment::providers::Env;
        use figment::value::UncasedStr;
        figment::Figment::new()
            .merge(Env::raw().map(|k| {
                if k == UncasedStr::new("RAILWAY_DEPLOYMENT_DRAINING_SECONDS") {
                    "SHUTDOWN_TIMEOUT_SECS".into()
                } else {
                    k.into()
                }
            }))
            .extract::<talktime::config::Config>()
            .expect("failed to load config for logging setup")
    };
    setup_logging(&early_config, args.tracing);

    let mut app = match App::new().await {
        Ok(app) => app,
        Err(e) => {
            tracing::error!(error = ?e, "failed to initialize application");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = if cfg!(debug_assertions) { "development" } else { "production" },
        "starting talktime meeting engine"
    );

    if args.migrate_only {
        info!("--migrate-only set, migrations already applied by App::new, exiting");
        return ExitCode::SUCCESS;
    }

    if let Err(e) = app.setup_services(&args.services) {
        tracing::error!(error = ?e, "failed to set up services");
        return ExitCode::FAILURE;
    }

    app.start_services();
    app.run().await
}
