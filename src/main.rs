use buzzline::{
    AppConfig, Buzzer, LineTransport, PlayerContext, PlayerError, SettingsWatcher, SharedSettings,
    SystemClock, ToneOutput, controls, spawn_player,
};
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "buzzline.ron";

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("{}", usage(&args));
        return ExitCode::FAILURE;
    }
    let song = PathBuf::from(&args[1]);
    let config_path = PathBuf::from(args.get(2).map_or(DEFAULT_CONFIG, String::as_str));

    let config = match AppConfig::load_or_default(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(&song, &config_path, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "buzzline stopped");
            ExitCode::FAILURE
        }
    }
}

fn usage(args: &[String]) -> String {
    let program = args.first().map_or("buzzline", String::as_str);
    format!("Usage: {program} <song.mid> [config.ron]")
}

fn run(song: &Path, config_path: &Path, config: AppConfig) -> Result<(), PlayerError> {
    let transport = LineTransport::open(
        &config.device,
        config.baud_rate,
        config.timing.write_timeout(),
    )
    .map_err(PlayerError::Transport)?;
    info!(
        device = %config.device.display(),
        baud_rate = config.baud_rate,
        "device opened, waiting for it to settle"
    );
    std::thread::sleep(config.timing.connect_settle());

    let buzzer = Arc::new(Buzzer::new(transport));
    let settings = SharedSettings::new(config.settings.clamped());

    let _watcher = if config_path.exists() {
        SettingsWatcher::spawn(config_path, settings.clone())
            .inspect(|w| info!(path = %w.path().display(), "watching config for changes"))
            .inspect_err(|e| warn!(error = %e, "live config reload disabled"))
            .ok()
    } else {
        None
    };

    let player = spawn_player(PlayerContext {
        clock: Arc::new(SystemClock::new()),
        output: buzzer.clone(),
        settings: Arc::new(settings.clone()),
        timing: config.timing.clone(),
    });

    let result = controls::run(&player, &settings, song, config.mode);

    player.shutdown();
    buzzer.silence();
    result
}
