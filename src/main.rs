use std::time::Duration;
use storyboard::{
    import_project, remove_inbox_copy, run_project, scan_inbox, Cli, HttpCompletionClient,
    PipelineConfig, ProjectPaths, StoryboardErrorKind,
};
use tracing::{error, info, warn};

/// Exit codes: 0 success, 2 invalid input, 3 terminal failure mid-stage.
const EXIT_INPUT_INVALID: i32 = 2;
const EXIT_STAGE_FAILED: i32 = 3;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();

    let mut config = match PipelineConfig::load_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            std::process::exit(EXIT_INPUT_INVALID);
        }
    };
    if let Some(mode) = cli.mode {
        config.video_mode = mode;
    }

    let client = match HttpCompletionClient::from_config(&config) {
        Ok(client) => client,
        Err(e) => {
            error!("cannot build LLM client: {e}");
            std::process::exit(EXIT_INPUT_INVALID);
        }
    };

    if cli.loop_mode {
        run_loop(&client, &config).await;
        return;
    }

    let Some(code) = cli.project else {
        error!("pass --project <CODE> for a single run, or --loop for continuous mode");
        std::process::exit(EXIT_INPUT_INVALID);
    };

    let project = ProjectPaths::new(&config.projects_dir, &code);
    match run_project(&client, &config, &project).await {
        Ok(report) => {
            info!("{}", report.summary());
        }
        Err(e) => {
            error!("pipeline failed: {e}");
            let code = match e.kind() {
                StoryboardErrorKind::InputInvalid(_) => EXIT_INPUT_INVALID,
                _ => EXIT_STAGE_FAILED,
            };
            std::process::exit(code);
        }
    }
}

/// Continuous mode: import new inbox projects, run them, clean up.
async fn run_loop(client: &HttpCompletionClient, config: &PipelineConfig) {
    info!(
        inbox = %config.inbox_dir.display(),
        interval = config.scan_interval_seconds,
        "continuous mode started"
    );

    loop {
        for code in scan_inbox(&config.inbox_dir) {
            let project = ProjectPaths::new(&config.projects_dir, &code);
            if project.exists() {
                // Already imported earlier; the inbox copy stays until a
                // run of this project fully succeeds.
                info!(code = %code, "already imported, resuming");
            } else if let Err(e) = import_project(&config.inbox_dir, &config.projects_dir, &code)
            {
                warn!(code = %code, "import failed: {e}");
                continue;
            }

            match run_project(client, config, &project).await {
                Ok(report) => {
                    info!(code = %code, "{}", report.summary());
                    if let Err(e) = remove_inbox_copy(&config.inbox_dir, &code) {
                        warn!(code = %code, "could not remove inbox copy: {e}");
                    }
                }
                Err(e) => {
                    // Leave the inbox copy; the next scan resumes the
                    // project from its checkpoint.
                    warn!(code = %code, "run failed, will retry next scan: {e}");
                }
            }
        }

        tokio::time::sleep(Duration::from_secs(config.scan_interval_seconds.max(1))).await;
    }
}
