use std::collections::BTreeMap;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use serde::Serialize;

use crate::config::EffectiveConfig;
use crate::core::{
    Finding, ScanSession, ScanStatus, ScannerKind, ScannerResult, SecurityHeaderAnalysis,
    VulnStage,
};
use crate::engine::{Engine, ScanRequest};
use crate::logging::LogSettings;
use crate::scanners::{ProcessInvoker, ScannerInvoker};
use crate::ui::UiConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Parser)]
#[command(
    name = "webscan",
    version,
    about = "nmap/nikto/whatweb/curl の結果を集約し、所見と脆弱性段階を判定してレポートを生成する"
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,
    #[arg(long, global = true)]
    pub verbose: bool,
    #[arg(long, global = true)]
    pub quiet: bool,
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the scanners against a target and build a report.
    Scan(ScanArgs),
    /// Apply the finding rules to saved scanner outputs.
    Analyze(AnalyzeArgs),
    /// Check a raw HTTP header blob for security headers.
    Headers(HeadersArgs),
    /// Show which scanner binaries are available.
    Tools,
    Completion(CompletionArgs),
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// all, nmap, nikto, curl, whatweb (or 1-5)
    #[arg(long = "type", default_value = "all")]
    pub scan_type: String,
    #[arg(long)]
    pub target: String,
    #[arg(long)]
    pub requester: Option<String>,
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    #[arg(long)]
    pub nmap: Option<PathBuf>,
    #[arg(long)]
    pub nikto: Option<PathBuf>,
    #[arg(long)]
    pub whatweb: Option<PathBuf>,
    #[arg(long)]
    pub curl: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct HeadersArgs {
    /// File with the headers, `-` or nothing for stdin.
    pub file: Option<PathBuf>,
    /// Fetch the headers with curl instead of reading them.
    #[arg(long, conflicts_with = "file")]
    pub url: Option<String>,
}

#[derive(Debug, Args)]
pub struct CompletionArgs {
    pub shell: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub show: bool,
}

#[derive(Debug, Serialize)]
struct AnalysisOutput<'a> {
    results: &'a BTreeMap<ScannerKind, ScannerResult>,
    findings: &'a [Finding],
    vuln_stage: VulnStage,
}

#[derive(Debug, Serialize)]
struct ToolStatus {
    scanner: ScannerKind,
    path: Option<String>,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let stdout_is_tty = io::stdout().is_terminal();
    let stderr_is_tty = io::stderr().is_terminal();

    let home_dir = crate::platform::effective_home_dir()?;

    let env_config_path = std::env::var_os("WEBSCAN_CONFIG").map(PathBuf::from);
    let cfg = crate::config::load(
        cli.config.as_deref().or(env_config_path.as_deref()),
        &home_dir,
    )
    .map_err(crate::exit::invalid_args_err)?;

    crate::logging::init(&log_settings(&cfg, cli.verbose, cli.quiet));

    let color = stdout_is_tty && cfg.ui.color && !cli.no_color;
    let ui_cfg = UiConfig {
        color,
        stdout_is_tty,
        stderr_is_tty,
        max_table_rows: cfg.ui.max_table_rows,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Scan(args) => {
            let engine = Engine::from_config(&cfg)?;
            let requester = args
                .requester
                .unwrap_or_else(|| cfg.scanlog.requester.clone());
            let scan_id = engine.submit(ScanRequest {
                scan_type: args.scan_type,
                target: args.target,
                requester,
            })?;

            let show_progress = ui_cfg.stderr_is_tty && !cli.quiet && !cli.json;
            let session = wait_with_progress(&engine, &scan_id, show_progress)?;

            if cli.json {
                write_json(&session)?;
            } else {
                crate::ui::print_session(&session, &ui_cfg);
            }
            if session.status == ScanStatus::Failed {
                return Err(crate::exit::scan_failed(
                    &session.id,
                    session.error.as_deref(),
                ));
            }
        }
        Commands::Analyze(args) => {
            let results = load_saved_outputs(&args)?;
            let findings = crate::rules::extract_findings(&results);
            let vuln_stage = crate::scoring::determine_vuln_stage(&findings);
            if cli.json {
                write_json(&AnalysisOutput {
                    results: &results,
                    findings: &findings,
                    vuln_stage,
                })?;
            } else {
                crate::ui::print_analysis(&results, &findings, vuln_stage, &ui_cfg);
            }
        }
        Commands::Headers(args) => {
            let analysis = match &args.url {
                Some(url) => fetch_header_analysis(&cfg, url)?,
                None => {
                    let raw = read_input(args.file.as_deref())?;
                    crate::headers::analyze_security_headers(&raw)
                }
            };
            if cli.json {
                write_json(&analysis)?;
            } else {
                crate::ui::print_header_analysis(&analysis, &ui_cfg);
            }
        }
        Commands::Tools => {
            let tools: Vec<(ScannerKind, Option<PathBuf>)> = ScannerKind::ALL
                .iter()
                .map(|&kind| {
                    let program = crate::scanners::command_spec(kind, "").program;
                    (kind, crate::platform::find_in_path(program))
                })
                .collect();
            if cli.json {
                let status: Vec<ToolStatus> = tools
                    .iter()
                    .map(|(scanner, path)| ToolStatus {
                        scanner: *scanner,
                        path: path.as_ref().map(|p| p.display().to_string()),
                    })
                    .collect();
                write_json(&status)?;
            } else {
                crate::ui::print_tools(&tools, &ui_cfg);
            }
        }
        Commands::Completion(args) => {
            let shell = parse_shell(&args.shell)?;
            let mut cmd = Cli::command();
            let mut out = io::stdout().lock();
            clap_complete::generate(shell, &mut cmd, "webscan", &mut out);
        }
        Commands::Config(args) => {
            if args.show {
                if cli.json {
                    write_json(&cfg)?;
                } else {
                    println!("{}", toml::to_string_pretty(&cfg)?);
                }
            } else if !ui_cfg.quiet {
                eprintln!("config: `webscan config --show` を使用してください");
            }
        }
    }

    Ok(())
}

fn log_settings(cfg: &EffectiveConfig, verbose: bool, quiet: bool) -> LogSettings {
    let level = if verbose {
        "debug".to_string()
    } else if quiet {
        "error".to_string()
    } else {
        cfg.log.level.clone()
    };
    let settings = LogSettings::new().level(level).format(cfg.log.format);
    if verbose {
        settings.with_thread_ids().with_target()
    } else {
        settings
    }
}

fn wait_with_progress(engine: &Engine, scan_id: &str, show_progress: bool) -> Result<ScanSession> {
    let pb = if show_progress {
        let pb = indicatif::ProgressBar::new_spinner();
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb.set_message("スキャン中...");
        pb.enable_steady_tick(Duration::from_millis(120));
        Some(pb)
    } else {
        None
    };

    let session = engine.wait_with(scan_id, POLL_INTERVAL, |session| {
        if let Some(pb) = &pb {
            let done: Vec<&str> = session.results.keys().map(|k| k.as_str()).collect();
            if !done.is_empty() {
                pb.set_message(format!("スキャン中...（完了: {}）", done.join(", ")));
            }
        }
    });

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    session.with_context(|| format!("スキャンが見つかりません: {scan_id}"))
}

fn load_saved_outputs(args: &AnalyzeArgs) -> Result<BTreeMap<ScannerKind, ScannerResult>> {
    let inputs = [
        (ScannerKind::Nmap, args.nmap.as_deref()),
        (ScannerKind::Nikto, args.nikto.as_deref()),
        (ScannerKind::Whatweb, args.whatweb.as_deref()),
        (ScannerKind::Curl, args.curl.as_deref()),
    ];

    let mut results = BTreeMap::new();
    for (kind, path) in inputs {
        let Some(path) = path else {
            continue;
        };
        let output = read_input(Some(path)).map_err(crate::exit::invalid_args_err)?;
        let result = if kind == ScannerKind::Curl {
            let analysis = crate::headers::analyze_security_headers(&output);
            ScannerResult::succeeded(output).with_security_analysis(analysis)
        } else {
            ScannerResult::succeeded(output)
        };
        results.insert(kind, result);
    }

    if results.is_empty() {
        return Err(crate::exit::invalid_args(
            "analyze: --nmap/--nikto/--whatweb/--curl のいずれかを指定してください",
        ));
    }
    Ok(results)
}

fn fetch_header_analysis(cfg: &EffectiveConfig, url: &str) -> Result<SecurityHeaderAnalysis> {
    if url.trim().is_empty() {
        return Err(crate::exit::invalid_args("headers: --url が空です"));
    }
    let invoker = ProcessInvoker::new(cfg.scanners.timeouts());
    let result = invoker.invoke(ScannerKind::Curl, url.trim());
    if !result.success {
        return Err(crate::exit::external_cmd(format!(
            "外部コマンドが失敗しました: curl -I {url}\n{}",
            result.error.as_deref().unwrap_or("")
        )));
    }
    Ok(result
        .security_analysis
        .unwrap_or_else(|| crate::headers::analyze_security_headers(&result.output)))
}

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        None => read_stdin(),
        Some(p) if p.as_os_str() == "-" => read_stdin(),
        Some(p) => std::fs::read_to_string(p)
            .with_context(|| format!("ファイルを読み込めませんでした: {}", p.display())),
    }
}

fn read_stdin() -> Result<String> {
    let mut buf = String::new();
    io::stdin()
        .lock()
        .read_to_string(&mut buf)
        .context("標準入力を読み込めませんでした")?;
    Ok(buf)
}

fn write_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    use std::io::Write;

    let buf = serde_json::to_vec_pretty(value)?;

    let mut stdout = io::stdout().lock();
    match stdout.write_all(&buf) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => return Ok(()),
        Err(err) => return Err(err.into()),
    }
    match stdout.write_all(b"\n") {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn parse_shell(s: &str) -> Result<clap_complete::Shell> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "bash" => Ok(clap_complete::Shell::Bash),
        "zsh" => Ok(clap_complete::Shell::Zsh),
        "fish" => Ok(clap_complete::Shell::Fish),
        other => Err(crate::exit::invalid_args(format!(
            "未対応のシェルです: {other}（bash|zsh|fish を指定してください）"
        ))),
    }
}
