use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use miette::{IntoDiagnostic, Result, WrapErr};
use sage_analysis::{Analyzer, UsageTracker};
use sage_core::{
    AnalysisRequest, AnalysisResult, OutputFormat, PipelineEvent, SageConfig, CONFIG_FILE_NAME,
};
use sage_gitfetch::{GitCli, GitRunner};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "upgradesage",
    version,
    about = "Find the breaking changes between two revisions of a repository",
    long_about = "UpgradeSage fetches two revisions of a git repository into a throwaway mirror,\n\
                   diffs them, and asks an LLM which changes will break consumers and how to\n\
                   migrate.\n\n\
                   Examples:\n  \
                     upgradesage analyze --repo https://github.com/serde-rs/serde --from v1.0.200 --to v1.0.210\n  \
                     upgradesage analyze --repo https://github.com/o/r --from main --to release --format json\n  \
                     upgradesage doctor                Check setup and environment\n  \
                     upgradesage init                  Create a .upgradesage.toml"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (default: ./.upgradesage.toml, then ~/.upgradesage.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text      Human-readable summary (default)\n  \
                         json      Machine-readable JSON with camelCase keys\n  \
                         markdown  The model's Markdown report"
    )]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    verbose: bool,

    /// When to use colors
    #[arg(long, global = true, default_value = "auto")]
    color: ColorChoice,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze the upgrade between two revisions
    #[command(long_about = "Analyze the upgrade between two revisions.\n\n\
        Fetches both revisions (tags, branches, or commit SHAs) into a temporary bare\n\
        mirror, computes their unified diff, and sends it to the configured LLM.\n\
        Progress is streamed to stderr; the result goes to stdout.\n\n\
        Examples:\n  upgradesage analyze --repo https://github.com/o/r --from v1.0.0 --to v2.0.0\n  \
        upgradesage analyze --repo https://github.com/o/private --from v1 --to v2 --github-token ghp_...")]
    Analyze {
        /// Repository URL
        #[arg(long)]
        repo: String,
        /// Revision to upgrade from
        #[arg(long)]
        from: String,
        /// Revision to upgrade to
        #[arg(long)]
        to: String,
        /// Access token for private GitHub repositories
        #[arg(
            long,
            long_help = "Access token for private GitHub repositories.\n\n\
                Falls back to [github] token in the config file, then GITHUB_TOKEN / GH_TOKEN.\n\
                Only injected into https://github.com URLs."
        )]
        github_token: Option<String>,
    },
    /// Print the effective configuration (secrets redacted)
    Config,
    /// Create a default .upgradesage.toml configuration file
    #[command(long_about = "Create a default .upgradesage.toml configuration file.\n\n\
        Generates a commented-out template with all available options.\n\
        Fails if .upgradesage.toml already exists.")]
    Init,
    /// Check your UpgradeSage setup and environment
    #[command(long_about = "Check your UpgradeSage setup and environment.\n\n\
        Runs diagnostics for the config file, git, the LLM endpoint and key, the GitHub\n\
        token, and token monitoring. Use --format json for machine-readable output.")]
    Doctor,
    /// Generate shell completion scripts
    #[command(hide = true)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Clone, PartialEq, Eq, ValueEnum)]
enum ColorChoice {
    /// Auto-detect based on terminal
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

fn print_welcome(use_color: bool) {
    let version = env!("CARGO_PKG_VERSION");

    if use_color {
        println!("\x1b[1m\x1b[33m\u{1f9ed}\x1b[0m \x1b[1mupgradesage\x1b[0m v{version} \u{2014} know what breaks before you upgrade\n");

        println!("Quick start:");
        println!("  \x1b[36mupgradesage init\x1b[0m                              Create a .upgradesage.toml config file");
        println!("  \x1b[36mupgradesage analyze --repo URL --from A --to B\x1b[0m  Analyze an upgrade\n");

        println!("All commands:");
        println!("  \x1b[32manalyze\x1b[0m   Breaking-change analysis between two revisions");
        println!("  \x1b[32mconfig\x1b[0m    Show the effective configuration");
        println!("  \x1b[32mdoctor\x1b[0m    Check your setup and environment");
        println!("  \x1b[32minit\x1b[0m      Create default configuration\n");
    } else {
        println!("upgradesage v{version} \u{2014} know what breaks before you upgrade\n");

        println!("Quick start:");
        println!("  upgradesage init                              Create a .upgradesage.toml config file");
        println!("  upgradesage analyze --repo URL --from A --to B  Analyze an upgrade\n");

        println!("All commands:");
        println!("  analyze   Breaking-change analysis between two revisions");
        println!("  config    Show the effective configuration");
        println!("  doctor    Check your setup and environment");
        println!("  init      Create default configuration\n");
    }

    println!("Run 'upgradesage <command> --help' for details.");
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Load the configuration and report which file it came from.
fn load_config(explicit: Option<&Path>) -> Result<(SageConfig, Option<PathBuf>)> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let cwd = std::env::current_dir().into_diagnostic()?;
            let home = std::env::var_os("HOME").map(PathBuf::from);
            SageConfig::discover(&cwd, home.as_deref())
        }
    };
    let config = match &path {
        Some(path) => SageConfig::from_file(path)
            .wrap_err_with(|| format!("loading {}", path.display()))?,
        None => SageConfig::default(),
    };
    Ok((config.with_env(sage_core::process_env), path))
}

#[derive(serde::Serialize)]
struct CheckResult {
    name: &'static str,
    status: &'static str,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

impl CheckResult {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: "pass",
            detail: detail.into(),
            hint: None,
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            name,
            status: "fail",
            detail: detail.into(),
            hint: Some(hint.into()),
        }
    }

    fn info(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: "info",
            detail: detail.into(),
            hint: None,
        }
    }

    fn symbol(&self) -> &'static str {
        match self.status {
            "pass" => "\u{2713}",
            "fail" => "\u{2717}",
            _ => "~",
        }
    }

    fn colored_symbol(&self) -> String {
        match self.status {
            "pass" => "\x1b[32m\u{2713}\x1b[0m".into(),
            "fail" => "\x1b[31m\u{2717}\x1b[0m".into(),
            _ => "\x1b[33m~\x1b[0m".into(),
        }
    }
}

async fn run_doctor(
    config: &SageConfig,
    config_path: Option<&Path>,
    format: OutputFormat,
    use_color: bool,
) -> Result<()> {
    let mut checks: Vec<CheckResult> = Vec::new();

    // 1. Config file
    match config_path {
        Some(path) => checks.push(CheckResult::pass(
            "config_file",
            format!("{} found", path.display()),
        )),
        None => checks.push(CheckResult::info(
            "config_file",
            format!("{CONFIG_FILE_NAME} not found, using defaults (run 'upgradesage init')"),
        )),
    }

    // 2. Git
    let cwd = std::env::current_dir().into_diagnostic()?;
    let git = GitCli::new(config.git.binary.clone());
    match git
        .run(&cwd, &["--version".to_string()], Duration::from_secs(10))
        .await
    {
        Ok(out) if out.success() => {
            checks.push(CheckResult::pass("git", out.stdout.trim().to_string()))
        }
        Ok(out) => checks.push(CheckResult::fail(
            "git",
            format!("'{} --version' exited with {}", config.git.binary, out.exit_code),
            "check the [git] binary setting",
        )),
        Err(e) => checks.push(CheckResult::fail(
            "git",
            e.to_string(),
            "install git or set [git] binary in the config file",
        )),
    }

    // 3. LLM provider, endpoint, and key
    let llm = &config.llm;
    let (endpoint_var, key_var, _) = llm.env_vars();
    checks.push(CheckResult::pass(
        "llm_provider",
        format!("{} (model: {})", llm.provider, llm.model()),
    ));
    match &llm.base_url {
        Some(url) => checks.push(CheckResult::pass("llm_endpoint", url.clone())),
        None => checks.push(CheckResult::fail(
            "llm_endpoint",
            "not set",
            format!("export {endpoint_var}=... or set base_url in {CONFIG_FILE_NAME} [llm]"),
        )),
    }
    if llm.api_key.is_some() {
        checks.push(CheckResult::pass("llm_api_key", "configured"));
    } else {
        checks.push(CheckResult::fail(
            "llm_api_key",
            format!("{key_var} not set"),
            format!("export {key_var}=... or set api_key in {CONFIG_FILE_NAME} [llm]"),
        ));
    }

    // 4. GitHub token
    if config.github.token.is_some() {
        checks.push(CheckResult::pass("github_token", "configured"));
    } else {
        checks.push(CheckResult::info(
            "github_token",
            "not set (only needed for private GitHub repositories)",
        ));
    }

    // 5. Token monitoring
    let usage = &config.usage;
    if usage.enable_token_monitoring {
        checks.push(CheckResult::info(
            "token_monitoring",
            format!(
                "alert at {}% of {} tokens",
                usage.token_usage_threshold,
                sage_core::text::group_thousands(usage.max_tokens_per_request as usize)
            ),
        ));
    } else {
        checks.push(CheckResult::info("token_monitoring", "disabled"));
    }

    match format {
        OutputFormat::Json => {
            let version = env!("CARGO_PKG_VERSION");
            let json = serde_json::json!({
                "version": version,
                "checks": checks,
            });
            println!("{}", serde_json::to_string_pretty(&json).into_diagnostic()?);
        }
        _ => {
            let version = env!("CARGO_PKG_VERSION");
            println!("UpgradeSage v{version} \u{2014} Environment Check\n");

            for check in &checks {
                let sym = if use_color {
                    check.colored_symbol()
                } else {
                    check.symbol().to_string()
                };
                let label = check.name.replace('_', " ");
                println!("  {sym} {label:<20} {}", check.detail);
                if let Some(hint) = &check.hint {
                    println!("    hint: {hint}");
                }
            }

            let passed = checks.iter().filter(|c| c.status == "pass").count();
            let failed = checks.iter().filter(|c| c.status == "fail").count();
            let info = checks.iter().filter(|c| c.status == "info").count();
            println!("\n{passed} checks passed, {failed} failed, {info} info");
        }
    }

    Ok(())
}

async fn run_analyze(
    config: SageConfig,
    config_path: Option<PathBuf>,
    request: AnalysisRequest,
    format: OutputFormat,
) -> Result<()> {
    let config = Arc::new(config);
    let runner = Arc::new(GitCli::new(config.git.binary.clone()));
    let analyzer = Analyzer::new(config, Arc::new(UsageTracker::new()), runner)
        .with_config_source(config_path);

    let spinner = if std::io::stderr().is_terminal() {
        let pb = indicatif::ProgressBar::new_spinner();
        pb.set_style(
            indicatif::ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})")
                .into_diagnostic()?,
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        Some(pb)
    } else {
        None
    };

    let mut events = analyzer.analyze(request);
    while let Some(event) = events.recv().await {
        match event {
            PipelineEvent::Progress(progress) => match &spinner {
                Some(pb) => {
                    pb.println(&progress.message);
                    pb.set_message(progress.message);
                }
                None => eprintln!("{}", progress.message),
            },
            PipelineEvent::Result(verdict) => {
                if let Some(pb) = &spinner {
                    pb.finish_and_clear();
                }
                let degraded = verdict.is_degraded();
                print_result(&verdict.into_result(), format)?;
                if degraded {
                    tracing::warn!("model reply was not valid JSON; showing raw output");
                }
                return Ok(());
            }
            PipelineEvent::Error { message } => {
                if let Some(pb) = &spinner {
                    pb.finish_with_message("Failed");
                }
                miette::bail!("{message}");
            }
        }
    }

    miette::bail!("analysis ended without a result")
}

fn print_result(result: &AnalysisResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result).into_diagnostic()?);
        }
        OutputFormat::Markdown => {
            if result.markdown_report.trim().is_empty() {
                println!("{}", render_markdown(result));
            } else {
                println!("{}", result.markdown_report);
            }
        }
        OutputFormat::Text => print!("{result}"),
    }
    Ok(())
}

/// Markdown for a result whose model reply carried no report.
fn render_markdown(result: &AnalysisResult) -> String {
    use std::fmt::Write;

    let mut md = String::from("# Upgrade Risk\n\n");
    if result.risk_score < 0 {
        md.push_str("**Risk score:** unavailable\n\n");
    } else {
        let _ = writeln!(
            md,
            "**Risk score:** {}/100 ({})\n",
            result.risk_score,
            result.risk_label()
        );
    }
    if result.breaking_changes.is_empty() {
        md.push_str("No breaking changes reported.\n");
    }
    for change in &result.breaking_changes {
        let _ = writeln!(md, "## {}\n", change.title);
        if !change.details.is_empty() {
            let _ = writeln!(md, "{}\n", change.details);
        }
        for step in &change.mitigations {
            let _ = writeln!(md, "- {step}");
        }
        md.push('\n');
    }
    md
}

const DEFAULT_CONFIG: &str = r#"# UpgradeSage Configuration
# Values left commented out use the defaults shown.

# Print the config source at the start of every analysis
# show_startup_check = true

[llm]
# "azure" (Azure AI Foundry) or "openai" (any OpenAI-compatible endpoint)
# provider = "azure"
# model = "gpt-4o"
# base_url = "https://<resource>.services.ai.azure.com"   # or AZURE_AI_FOUNDRY_ENDPOINT / OPENAI_BASE_URL
# api_key = "..."                                         # or AZURE_AI_FOUNDRY_API_KEY / OPENAI_API_KEY
# api_version = "2024-12-01-preview"
# temperature = 0.2
# max_tokens = 4096
# timeout_secs = 180

[github]
# token = "ghp_..."   # or GITHUB_TOKEN / GH_TOKEN
# include_public_repos = true

[usage]
# enable_token_monitoring = true
# token_usage_threshold = 80
# max_tokens_per_request = 120000

[analysis]
# breaking_changes_only = false
# include_migration_paths = true
# validate_upgrade_logic = true

[git]
# binary = "git"
# mirror_root = "/tmp"
# local_timeout_secs = 10
# network_timeout_secs = 300
# diff_timeout_secs = 120
"#;

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let use_color = match cli.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => std::io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    };

    match cli.command {
        None => {
            print_welcome(use_color);
        }
        Some(Command::Analyze {
            repo,
            from,
            to,
            github_token,
        }) => {
            let (config, config_path) = load_config(cli.config.as_deref())?;
            let request = AnalysisRequest::new(repo, from, to, github_token)?;
            run_analyze(config, config_path, request, cli.format).await?;
        }
        Some(Command::Config) => {
            let (config, config_path) = load_config(cli.config.as_deref())?;
            let redacted = config.redacted();
            match cli.format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&redacted).into_diagnostic()?);
                }
                _ => {
                    match &config_path {
                        Some(path) => println!("# source: {}", path.display()),
                        None => println!("# source: defaults"),
                    }
                    print!("{}", toml::to_string_pretty(&redacted).into_diagnostic()?);
                }
            }
        }
        Some(Command::Init) => {
            let path = Path::new(CONFIG_FILE_NAME);
            if path.exists() {
                miette::bail!("{CONFIG_FILE_NAME} already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created {CONFIG_FILE_NAME} with default configuration");
        }
        Some(Command::Doctor) => {
            let (config, config_path) = load_config(cli.config.as_deref())?;
            run_doctor(&config, config_path.as_deref(), cli.format, use_color).await?;
        }
        Some(Command::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "upgradesage", &mut std::io::stdout());
        }
    }

    Ok(())
}
