use ledgerboot_log as logging;
use ledgerboot_log::{log_error, log_info, log_warn};

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use ledgerboot_bootstrap::{
    BootstrapContext, BootstrapController, BootstrapEvent, BootstrapMode, BootstrapParams,
    ControllerSettings, RunError, Stage,
};
use ledgerboot_consensus::Network;

const DEFAULT_DATA_DIR: &str = "data";
const DATADIR_POINTER_FILE_NAME: &str = "ledgerboot.datadir";
const CONF_FILE_NAME: &str = "ledgerboot.conf";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Command {
    StageOne,
    StageTwo,
    Run,
    Status,
    Cleanup,
}

impl Command {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "stage1" => Some(Self::StageOne),
            "stage2" => Some(Self::StageTwo),
            "run" => Some(Self::Run),
            "status" => Some(Self::Status),
            "cleanup" => Some(Self::Cleanup),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
struct Config {
    command: Command,
    data_dir: PathBuf,
    conf_path: PathBuf,
    network: Network,
    mode: BootstrapMode,
    source_file: Option<PathBuf>,
    bootstrap_url: Option<String>,
    log_level: logging::Level,
    log_format: logging::Format,
    log_timestamps: bool,
}

enum CliAction {
    Run(Config),
    PrintHelp,
    PrintVersion,
}

pub fn run_entry() -> Result<(), String> {
    match parse_args()? {
        CliAction::PrintHelp => {
            println!("{}", usage());
            Ok(())
        }
        CliAction::PrintVersion => {
            println!("ledgerboot {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliAction::Run(config) => run_with_config(config),
    }
}

fn run_with_config(config: Config) -> Result<(), String> {
    logging::init(logging::LogConfig {
        level: config.log_level,
        format: config.log_format,
        timestamps: config.log_timestamps,
    });

    let mut params = BootstrapParams::for_network(config.network);
    if let Some(url) = &config.bootstrap_url {
        params = params.with_bootstrap_url(url.clone());
    }
    let settings = ControllerSettings::new(&config.data_dir, &config.conf_path, params);

    let context = BootstrapContext::new();
    let controller = context.open(settings).map_err(|err| err.to_string())?;
    controller
        .set_mode(config.mode)
        .map_err(|err| err.to_string())?;
    if let Some(source) = &config.source_file {
        controller
            .set_source_path(source)
            .map_err(|err| err.to_string())?;
    }

    let result = match config.command {
        Command::StageOne => run_stage(&controller, Stage::One),
        Command::StageTwo => run_stage(&controller, Stage::Two),
        Command::Run => {
            run_stage(&controller, Stage::One).and_then(|()| run_stage(&controller, Stage::Two))
        }
        Command::Status => {
            print_status(&controller);
            Ok(())
        }
        Command::Cleanup => controller.cleanup().map_err(|err| err.to_string()),
    };
    drop(controller);
    drop(context.close());
    result
}

fn run_stage(controller: &Arc<BootstrapController>, stage: Stage) -> Result<(), String> {
    let events = controller.subscribe();
    let started = match stage {
        Stage::One => controller.run_stage_one(),
        Stage::Two => controller.run_stage_two(),
    };
    started.map_err(|err| format!("cannot start bootstrap {stage}: {err}"))?;

    let outcome = follow_run(&events);
    controller.wait();
    match outcome.or_else(|| controller.last_run_result().err().map(Err)) {
        Some(Err(err)) => Err(format!("bootstrap {stage} failed ({}): {err}", err.kind)),
        _ => {
            if stage == Stage::Two && controller.config_merged() {
                log_info!("bootstrap config fragment merged into the node config");
            }
            Ok(())
        }
    }
}

/// Logs progress until the run's closing state change and returns its outcome.
fn follow_run(events: &Receiver<BootstrapEvent>) -> Option<Result<(), RunError>> {
    let mut outcome = None;
    for event in events.iter() {
        match event {
            BootstrapEvent::Progress { message, percent } => {
                log_info!("[{percent:>3}%] {message}");
            }
            BootstrapEvent::StageCompleted { stage, outcome: result } => {
                if let Err(err) = &result {
                    log_error!("bootstrap {stage} finished with {} error", err.kind);
                }
                outcome = Some(result);
            }
            BootstrapEvent::StateChanged(status) if !status.running && outcome.is_some() => break,
            BootstrapEvent::StateChanged(_) => {}
        }
    }
    outcome
}

fn print_status(controller: &BootstrapController) {
    let params = controller.params();
    let status = controller.status();
    println!("network: {}", params.network);
    println!("data dir: {}", controller.layout().data_dir().display());
    println!("mode: {}", status.mode);
    if let Some(source) = &status.source_path {
        println!(
            "source file: {} ({})",
            source.display(),
            if controller.source_path_ok() { "present" } else { "missing" }
        );
    }
    if params.bootstrap_url.is_empty() {
        println!("bootstrap url: (none)");
    } else {
        println!("bootstrap url: {}", params.bootstrap_url);
    }
    println!("stage II prepared: {}", controller.stage_two_prepared());
    match controller.can_run_stage_one() {
        Ok(()) => println!("ready: yes"),
        Err(err) => println!("ready: no ({err})"),
    }
}

fn parse_args() -> Result<CliAction, String> {
    parse_args_from(std::env::args().skip(1))
}

fn parse_args_from<I>(raw_args: I) -> Result<CliAction, String>
where
    I: IntoIterator<Item = String>,
{
    let mut command: Option<Command> = None;
    let mut data_dir: Option<PathBuf> = None;
    let mut conf_path: Option<PathBuf> = None;
    let mut network = Network::Mainnet;
    let mut network_set = false;
    let mut mode: Option<BootstrapMode> = None;
    let mut source_file: Option<PathBuf> = None;
    let mut bootstrap_url: Option<String> = None;
    let mut log_level = logging::Level::Info;
    let mut log_format = logging::Format::Text;
    let mut log_timestamps = true;
    let mut args = raw_args.into_iter().peekable();

    if let Some(first) = args.peek().map(|value| value.as_str()) {
        match first {
            "help" => return Ok(CliAction::PrintHelp),
            "version" => return Ok(CliAction::PrintVersion),
            other => {
                if let Some(parsed) = Command::parse(other) {
                    command = Some(parsed);
                    let _ = args.next();
                }
            }
        }
    }
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--data-dir" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --data-dir\n{}", usage()))?;
                data_dir = Some(PathBuf::from(value));
            }
            "--conf" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --conf\n{}", usage()))?;
                conf_path = Some(PathBuf::from(value));
            }
            "--network" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --network\n{}", usage()))?;
                network = Network::parse(&value)
                    .ok_or_else(|| format!("invalid network '{value}'\n{}", usage()))?;
                network_set = true;
            }
            "--testnet" => {
                network = Network::Testnet;
                network_set = true;
            }
            "--regtest" => {
                network = Network::Regtest;
                network_set = true;
            }
            "--mode" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --mode\n{}", usage()))?;
                mode = Some(
                    BootstrapMode::parse(&value)
                        .ok_or_else(|| format!("invalid mode '{value}'\n{}", usage()))?,
                );
            }
            "--file" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --file\n{}", usage()))?;
                source_file = Some(PathBuf::from(value));
            }
            "--bootstrap-url" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --bootstrap-url\n{}", usage()))?;
                bootstrap_url = Some(value);
            }
            "--log-level" | "--loglevel" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --log-level\n{}", usage()))?;
                log_level = logging::Level::parse(&value)
                    .ok_or_else(|| format!("invalid log level '{value}'\n{}", usage()))?;
            }
            "--log-format" | "--logformat" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --log-format\n{}", usage()))?;
                log_format = logging::Format::parse(&value)
                    .ok_or_else(|| format!("invalid log format '{value}'\n{}", usage()))?;
            }
            "--log-timestamps" => log_timestamps = true,
            "--no-log-timestamps" => log_timestamps = false,
            "--help" | "-h" => return Ok(CliAction::PrintHelp),
            "--version" | "-V" => return Ok(CliAction::PrintVersion),
            other => {
                if command.is_none() {
                    if let Some(parsed) = Command::parse(other) {
                        command = Some(parsed);
                        continue;
                    }
                }
                return Err(format!("unknown argument '{other}'\n{}", usage()));
            }
        }
    }

    let command = command.ok_or_else(|| format!("missing command\n{}", usage()))?;
    let data_dir = data_dir.unwrap_or_else(resolve_default_data_dir);
    let conf_path = conf_path.unwrap_or_else(|| data_dir.join(CONF_FILE_NAME));

    if let Some(conf) = load_conf(&conf_path)? {
        if !network_set {
            if conf_flag(&conf, "regtest", &conf_path)? {
                network = Network::Regtest;
            } else if conf_flag(&conf, "testnet", &conf_path)? {
                network = Network::Testnet;
            }
        }
        if bootstrap_url.is_none() {
            if let Some(value) = conf.get("bootstrapurl").and_then(|values| values.last()) {
                bootstrap_url = Some(value.clone());
            }
        }
    }

    let mode = match (mode, &source_file) {
        (Some(mode), _) => mode,
        (None, Some(_)) => BootstrapMode::File,
        (None, None) => BootstrapMode::Cloud,
    };
    if mode == BootstrapMode::File && source_file.is_none() {
        return Err(format!("--mode file requires --file <path>\n{}", usage()));
    }
    if mode == BootstrapMode::Cloud && source_file.is_some() {
        log_warn!("--file is ignored in cloud mode");
    }

    Ok(CliAction::Run(Config {
        command,
        data_dir,
        conf_path,
        network,
        mode,
        source_file,
        bootstrap_url,
        log_level,
        log_format,
        log_timestamps,
    }))
}

fn conf_flag(conf: &HashMap<String, Vec<String>>, key: &str, path: &Path) -> Result<bool, String> {
    let Some(raw) = conf.get(key).and_then(|values| values.last()) else {
        return Ok(false);
    };
    parse_conf_bool(raw)
        .ok_or_else(|| format!("invalid {key} value '{raw}' in {}", path.display()))
}

fn load_conf(path: &Path) -> Result<Option<HashMap<String, Vec<String>>>, String> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(format!("failed to read {}: {err}", path.display())),
    };

    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for raw_line in contents.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(idx) = line.find('#') {
            line = &line[..idx];
        }
        if let Some(idx) = line.find(';') {
            line = &line[..idx];
        }
        line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (line, "1"),
        };
        if key.is_empty() {
            continue;
        }
        out.entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.to_string());
    }
    Ok(Some(out))
}

fn parse_conf_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.is_empty() {
        return Some(true);
    }
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn project_root_from_exe() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    for ancestor in exe.ancestors() {
        if ancestor.file_name().and_then(|value| value.to_str()) == Some("target") {
            return ancestor.parent().map(|path| path.to_path_buf());
        }
    }
    None
}

fn read_datadir_pointer(pointer: &Path) -> Option<PathBuf> {
    let contents = fs::read_to_string(pointer).ok()?;
    let line = contents
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))?;
    let candidate = PathBuf::from(line);
    if candidate.is_absolute() {
        return Some(candidate);
    }
    Some(pointer.parent()?.join(candidate))
}

fn resolve_default_data_dir() -> PathBuf {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(dir) = read_datadir_pointer(&cwd.join(DATADIR_POINTER_FILE_NAME)) {
            return dir;
        }
    }
    match project_root_from_exe() {
        Some(root) => read_datadir_pointer(&root.join(DATADIR_POINTER_FILE_NAME))
            .unwrap_or_else(|| root.join(DEFAULT_DATA_DIR)),
        None => PathBuf::from(DEFAULT_DATA_DIR),
    }
}

fn usage() -> String {
    [
        "Usage:",
        "  ledgerboot <command> [options]",
        "",
        "Commands:",
        "  stage1   Acquire and verify a bootstrap archive into <data-dir>/bootstrap",
        "  stage2   Replace the ledger with the verified bootstrap (keeps <name>.bak backups)",
        "  run      stage1 followed by stage2",
        "  status   Print bootstrap readiness and exit",
        "  cleanup  Remove staging data and downloaded archives",
        "  help     Print this help and exit",
        "  version  Print version and exit",
        "",
        "Options:",
        "  --help, -h  Print this help and exit",
        "  --version, -V  Print version and exit",
        "  --data-dir  Node data directory (default: ./data)",
        "  --conf  Node config file (default: <data-dir>/ledgerboot.conf)",
        "  --network  mainnet|testnet|regtest (default: mainnet)",
        "  --testnet  Alias for --network testnet",
        "  --regtest  Alias for --network regtest",
        "  --mode  cloud|file (default: cloud, or file when --file is given)",
        "  --file  Local bootstrap archive for file mode",
        "  --bootstrap-url  Override the network's bootstrap download URL",
        "  --log-level  Log verbosity (error|warn|info|debug|trace) (default: info)",
        "  --log-format  Log output format (text|json) (default: text)",
        "  --log-timestamps  Enable timestamps in text logs (default: on)",
        "  --no-log-timestamps  Disable timestamps in text logs",
        "",
        "Config file keys: testnet, regtest, bootstrapurl. Command-line flags take precedence.",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|value| value.to_string()).collect()
    }

    fn parse_config(raw: &[&str]) -> Config {
        match parse_args_from(args(raw)) {
            Ok(CliAction::Run(config)) => config,
            Ok(_) => panic!("expected a run action"),
            Err(err) => panic!("parse failed: {err}"),
        }
    }

    #[test]
    fn help_and_version_short_circuit() {
        assert!(matches!(parse_args_from(args(&["help"])), Ok(CliAction::PrintHelp)));
        assert!(matches!(
            parse_args_from(args(&["stage1", "--version"])),
            Ok(CliAction::PrintVersion)
        ));
    }

    #[test]
    fn file_flag_selects_file_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data = dir.path().to_string_lossy().to_string();
        let config = parse_config(&[
            "stage1",
            "--data-dir",
            &data,
            "--file",
            "/tmp/b.zip",
            "--regtest",
        ]);
        assert_eq!(config.command, Command::StageOne);
        assert_eq!(config.mode, BootstrapMode::File);
        assert_eq!(config.network, Network::Regtest);
        assert_eq!(config.conf_path, dir.path().join(CONF_FILE_NAME));
    }

    #[test]
    fn file_mode_without_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data = dir.path().to_string_lossy().to_string();
        let err = parse_args_from(args(&["run", "--data-dir", &data, "--mode", "file"]))
            .err()
            .expect("rejected");
        assert!(err.contains("--mode file requires --file"));
    }

    #[test]
    fn unknown_flags_and_missing_command_fail() {
        assert!(parse_args_from(args(&["stage1", "--bogus"])).is_err());
        assert!(parse_args_from(args(&["--regtest"])).is_err());
        assert!(parse_args_from(args(&["stage1", "--network", "moon"])).is_err());
    }

    #[test]
    fn conf_file_supplies_network_and_url() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join(CONF_FILE_NAME),
            "# node settings\ntestnet=1\nbootstrapurl=https://mirror.example/test.zip ; mirror\n",
        )
        .expect("conf");
        let data = dir.path().to_string_lossy().to_string();

        let config = parse_config(&["status", "--data-dir", &data]);
        assert_eq!(config.network, Network::Testnet);
        assert_eq!(
            config.bootstrap_url.as_deref(),
            Some("https://mirror.example/test.zip")
        );

        let config = parse_config(&[
            "status",
            "--data-dir",
            &data,
            "--network",
            "mainnet",
            "--bootstrap-url",
            "https://other.example/boot.zip",
        ]);
        assert_eq!(config.network, Network::Mainnet);
        assert_eq!(
            config.bootstrap_url.as_deref(),
            Some("https://other.example/boot.zip")
        );
    }

    #[test]
    fn invalid_conf_flag_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(CONF_FILE_NAME), "regtest=maybe\n").expect("conf");
        let data = dir.path().to_string_lossy().to_string();
        let err = parse_args_from(args(&["status", "--data-dir", &data]))
            .err()
            .expect("invalid");
        assert!(err.contains("invalid regtest value 'maybe'"));
    }

    #[test]
    fn conf_parser_follows_node_rules() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("node.conf");
        fs::write(
            &path,
            "A=1\n;skip\naddnode=1.2.3.4\naddnode=5.6.7.8 # second\nflag\n",
        )
        .expect("conf");
        let conf = load_conf(&path).expect("read").expect("present");
        assert_eq!(conf["a"], ["1"]);
        assert_eq!(conf["addnode"], ["1.2.3.4", "5.6.7.8"]);
        assert_eq!(conf["flag"], ["1"]);
        assert!(load_conf(&dir.path().join("absent.conf")).expect("missing").is_none());
    }

    #[test]
    fn datadir_pointer_resolves_relative_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pointer = dir.path().join(DATADIR_POINTER_FILE_NAME);
        fs::write(&pointer, "# where the node lives\nnode-data\n").expect("pointer");
        assert_eq!(read_datadir_pointer(&pointer), Some(dir.path().join("node-data")));
    }

    #[test]
    fn status_runs_against_empty_data_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data = dir.path().to_string_lossy().to_string();
        let config = parse_config(&["status", "--data-dir", &data, "--regtest"]);
        run_with_config(config).expect("status");
    }
}
