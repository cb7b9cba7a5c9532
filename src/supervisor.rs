//! Client Supervisor: dispatches the parsed command, composes the journal,
//! recorder, target scheduler and worker pool, and owns the process exit
//! code.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use reqwest::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::auth;
use crate::cli::{self, Args, Command};
use crate::config::{default_chunk_size, Config, Target};
use crate::journal::StatusJournal;
use crate::target;
use crate::transfer::recorder::TransferRecorder;
use crate::upload::UploadClient;
use crate::utils::errors::{AgentError, Result};
use crate::worker::{self, WorkerContext};

pub const EXIT_OK: i32 = 0;
pub const EXIT_FATAL: i32 = 1;

/// Run the command described by `args`, returning the process exit code.
pub async fn dispatch(args: Args, cancel: CancellationToken) -> i32 {
    match args.command {
        Command::Help => {
            println!("{}", cli::usage());
            EXIT_OK
        }
        Command::Unknown(name) => {
            eprintln!("unknown command: {name}\n{}", cli::usage());
            EXIT_FATAL
        }
        Command::SetConfig | Command::GetConfig => {
            println!("{}", cli::usage());
            EXIT_OK
        }
        Command::Test => run_test(&args).await,
        Command::Upload => match upload_config(&args) {
            Ok(config) => run_pass(config, false, cancel).await,
            Err(e) => {
                error!("{e}");
                EXIT_FATAL
            }
        },
        Command::Start => match start_config(&args) {
            Ok(config) => run_pass(config, false, cancel).await,
            Err(e) => {
                error!("{e}");
                EXIT_FATAL
            }
        },
        Command::Auto => match start_config(&args) {
            Ok(config) => run_pass(config, true, cancel).await,
            Err(e) => {
                error!("{e}");
                EXIT_FATAL
            }
        },
    }
}

fn upload_config(args: &Args) -> Result<Config> {
    if args.client_id.is_empty() || args.path.is_empty() {
        return Err(AgentError::Config("Upload requires -u: and -path:".to_string()));
    }

    let path = PathBuf::from(&args.path);
    let (location, pattern) = if path.is_dir() {
        (path, ".*".to_string())
    } else {
        let parent = path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        (parent, format!("^{}$", regex::escape(&file_name)))
    };

    let target = Target {
        name: "upload".to_string(),
        active: true,
        tenant: args.tenant.clone(),
        location,
        recursive: false,
        r#match: pattern,
        datatype: args.datatype.clone(),
        dataformat: args.dataformat.clone(),
        ..Default::default()
    };

    Ok(Config {
        client_id: args.client_id.clone(),
        secret: args.secret.clone(),
        token_url: args.token_url.clone(),
        endpoint: args.endpoint.clone(),
        concurrent_uploads: 1,
        run_as_service: false,
        chunk_size: default_chunk_size(),
        targets: vec![target],
    })
}

fn start_config(args: &Args) -> Result<Config> {
    if args.client_id.is_empty() {
        return Err(AgentError::Config("Start/Auto requires -u:<clientID>".to_string()));
    }
    let mut config = Config::load(&args.client_id)?;
    config.filter_targets(&args.targets);
    Ok(config)
}

async fn run_test(args: &Args) -> i32 {
    let http = Client::new();

    if !args.endpoint.is_empty() {
        match http.get(&args.endpoint).send().await {
            Ok(resp) => info!("endpoint reachability check: {}", resp.status()),
            Err(e) => {
                error!("endpoint unreachable: {e}");
                return EXIT_FATAL;
            }
        }
    }

    if !args.token_url.is_empty() && !args.client_id.is_empty() {
        match auth::authenticate(&http, &args.token_url, &args.client_id, &args.secret).await {
            Ok(_) => info!("token endpoint reachable and credentials accepted"),
            Err(e) => {
                error!("authentication check failed: {e}");
                return EXIT_FATAL;
            }
        }
    }

    EXIT_OK
}

async fn run_pass(config: Config, run_as_service: bool, cancel: CancellationToken) -> i32 {
    let journal_path = config.journal_path();
    let (journal, journal_handle) = StatusJournal::open(journal_path.clone(), cancel.clone());

    let seeded = match StatusJournal::replay(&journal_path) {
        Ok(seeded) => seeded,
        Err(e) => {
            error!("journal replay failed: {e}");
            Default::default()
        }
    };
    let recorder = Arc::new(TransferRecorder::new());
    recorder.seed(seeded);

    let http = Client::new();
    let token = match auth::authenticate(&http, &config.token_url, &config.client_id, &config.secret).await
    {
        Ok(token) => token,
        Err(e) => {
            journal.record("Supervisor", "trueConnectAuthentication", "Failed", "", &e.to_string());
            cancel.cancel();
            let _ = journal_handle.await;
            return EXIT_FATAL;
        }
    };

    let upload_client = Arc::new(UploadClient::new(http, config.endpoint.clone(), config.chunk_size));
    let exit_code = Arc::new(AtomicI32::new(EXIT_OK));

    let ctx = Arc::new(WorkerContext {
        recorder,
        journal: journal.clone(),
        upload: upload_client,
        token,
        cancel: cancel.clone(),
        exit_code: exit_code.clone(),
    });

    let concurrent_uploads = config.concurrent_uploads;
    let channel_capacity = concurrent_uploads.max(1) * 4;
    let (sender, receiver) = mpsc::channel(channel_capacity);
    let requeue = if run_as_service { Some(sender.clone()) } else { None };

    let mut target_set =
        target::spawn_all(config.targets, sender, journal.clone(), run_as_service, cancel.clone());

    let worker_ctx = ctx.clone();
    let worker_handle = tokio::spawn(async move {
        worker::run_pool(concurrent_uploads, receiver, requeue, worker_ctx).await;
    });

    while target_set.join_next().await.is_some() {}
    let _ = worker_handle.await;

    journal.record("Supervisor", "Stopping", "Success", "", "");
    cancel.cancel();
    let _ = journal_handle.await;

    exit_code.load(Ordering::SeqCst)
}
