//! devguard CLI - evaluate device-integrity signals from a settings snapshot.
//!
//! Runs the same probes, policies and bridge as the mobile build, reading
//! platform settings from a JSON snapshot file instead of the OS.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use devguard_core::{
    BridgeDispatcher, BridgeRequest, EvidenceRule, FileSettings, GuardConfig, PolicyKind,
    SignalCheck, UnsupportedLauncher, Verdict,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// devguard - device-integrity signal evaluator.
///
/// Reads platform settings from a JSON snapshot, for example:
///
///   {"global": {"adb_enabled": 1}, "secure": {"mock_location": 0},
///    "denied": ["global/development_settings_enabled"]}
#[derive(Parser)]
#[command(name = "devguard")]
#[command(version = VERSION)]
#[command(about = "Device-integrity signal evaluator")]
#[command(long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Settings snapshot file
    #[arg(long, env = "DEVGUARD_SETTINGS", default_value = "devguard-settings.json")]
    settings: PathBuf,

    /// Evaluation policy (overrides DEVGUARD_POLICY)
    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,

    /// Evidence rule for the mock-location probe of the developer-mode check
    #[arg(long, value_enum)]
    mock_location_rule: Option<RuleArg>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    DecisiveShortCircuit,
    FlatOr,
}

impl From<PolicyArg> for PolicyKind {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::DecisiveShortCircuit => PolicyKind::DecisiveShortCircuit,
            PolicyArg::FlatOr => PolicyKind::FlatOr,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum RuleArg {
    Enabled,
    AnyBitSet,
    Readable,
}

impl From<RuleArg> for EvidenceRule {
    fn from(arg: RuleArg) -> Self {
        match arg {
            RuleArg::Enabled => EvidenceRule::Enabled,
            RuleArg::AnyBitSet => EvidenceRule::AnyBitSet,
            RuleArg::Readable => EvidenceRule::Readable,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CheckArg {
    DeveloperMode,
    MockLocation,
}

impl From<CheckArg> for SignalCheck {
    fn from(arg: CheckArg) -> Self {
        match arg {
            CheckArg::DeveloperMode => SignalCheck::DeveloperMode,
            CheckArg::MockLocation => SignalCheck::MockLocation,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a signal group and show the evidence trail
    Check {
        /// Signal group
        #[arg(value_enum, default_value = "developer-mode")]
        name: CheckArg,
    },

    /// List registered probes in evaluation order
    Probes,

    /// Send a raw bridge request and print the response
    Dispatch {
        /// Request JSON, e.g. {"operation":"checkSignal","args":{"name":"mock-location"}}
        request: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let json_output = cli.format == "json";

    // Initialize logging (suppress for JSON output)
    if json_output {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::ERROR)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_target(false)
            .init();
    }

    let mut config = match GuardConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("devguard: {e}");
            std::process::exit(2);
        },
    };
    if let Some(policy) = cli.policy {
        config.policy = policy.into();
    }
    if let Some(rule) = cli.mock_location_rule {
        config.mock_location_rule = rule.into();
    }

    let dispatcher = BridgeDispatcher::with_settings(
        config,
        Arc::new(FileSettings::new(cli.settings.clone())),
        Arc::new(UnsupportedLauncher),
    );

    match cli.command.unwrap_or(Commands::Check {
        name: CheckArg::DeveloperMode,
    }) {
        Commands::Check { name } => run_check(&dispatcher, name.into(), json_output),
        Commands::Probes => show_probes(&dispatcher, json_output),
        Commands::Dispatch { request } => {
            let response = dispatcher.dispatch_json(request.as_bytes());
            println!("{}", String::from_utf8_lossy(&response));
        },
    }
}

fn run_check(dispatcher: &BridgeDispatcher, check: SignalCheck, json: bool) {
    let result = dispatcher.evaluate(check);

    if json {
        match serde_json::to_string_pretty(&result) {
            Ok(out) => println!("{out}"),
            Err(e) => eprintln!("devguard: cannot encode result: {e}"),
        }
        return;
    }

    println!("\nCHECK: {}", check.as_str());
    println!("Policy: {}\n", result.policy_version);
    println!("Evidence:");
    for outcome in &result.evidence {
        let (color, label) = match outcome.verdict {
            Verdict::Positive => ("\x1b[31m", "POSITIVE"),
            Verdict::Negative => ("\x1b[32m", "NEGATIVE"),
            Verdict::Inconclusive => ("\x1b[33m", "INCONCLUSIVE"),
        };
        println!(
            "  {color}[{label}]\x1b[0m {}  {}",
            outcome.signal,
            outcome.detail.as_deref().unwrap_or("")
        );
    }
    let skipped = dispatcher
        .registry(check)
        .len()
        .saturating_sub(result.evidence.len());
    if skipped > 0 {
        println!("  ({skipped} probe(s) not run after decisive positive)");
    }
    println!();

    if let Some(fault) = &result.fault {
        println!("  \x1b[33m[FAULT]\x1b[0m {fault}");
    }
    if result.verdict {
        println!("Verdict: \x1b[31mREDUCED TRUST\x1b[0m");
    } else {
        println!("Verdict: \x1b[32mno trust-reducing signal\x1b[0m");
    }
    println!("Digest:  {}", result.digest());
}

fn show_probes(dispatcher: &BridgeDispatcher, json: bool) {
    let mut rows = Vec::new();
    for check in [SignalCheck::DeveloperMode, SignalCheck::MockLocation] {
        for spec in dispatcher.registry(check).probes_in_priority_order() {
            rows.push(serde_json::json!({
                "check": check.as_str(),
                "signal": spec.signal,
                "priority": spec.priority,
                "decisive": spec.decisive,
                "rule": spec.rule(),
            }));
        }
    }

    if json {
        println!("{}", serde_json::Value::Array(rows));
        return;
    }

    println!("\nREGISTERED PROBES");
    println!("=================\n");
    println!("Policy: {}\n", dispatcher.config().policy);
    for row in rows {
        println!(
            "  {:<15} {:>4}  {:<30} decisive={:<5} rule={}",
            row["check"].as_str().unwrap_or(""),
            row["priority"],
            row["signal"].as_str().unwrap_or(""),
            row["decisive"],
            row["rule"].as_str().unwrap_or("-"),
        );
    }
    println!();
    println!("Bridge request example:");
    println!(
        "  devguard dispatch '{}'",
        serde_json::to_string(&BridgeRequest::check_signal(SignalCheck::MockLocation))
            .unwrap_or_default()
    );
}
