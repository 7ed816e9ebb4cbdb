use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{exit, Command};

use clap::{Parser, Subcommand, ValueEnum};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const LAMBDA_PACKAGE: &str = "event_ingest_lambda";
const LAMBDA_BINARY: &str = "ingest_runtime";
const WORKSPACE_CRATES: [&str; 2] = ["event_ingest_core", "event_ingest_lambda"];

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the event ingestion workspace"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run CI checks
    Ci {
        #[arg(value_enum, default_value_t = CiJob::All)]
        job: CiJob,
    },
    /// Build the ingest Lambda and zip it as a `bootstrap` deployment artifact
    ServerlessPackage {
        /// Compilation target triple for the Lambda binary
        #[arg(long, default_value = "x86_64-unknown-linux-gnu")]
        target: String,
        #[arg(value_enum, long, default_value_t = BuildProfile::Release)]
        profile: BuildProfile,
        /// Directory the zip lands in
        #[arg(long, env = "INGEST_DIST_DIR", default_value = "dist")]
        out_dir: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CiJob {
    /// rustfmt in check mode
    Fmt,
    /// clippy with warnings denied
    Lint,
    /// unit and integration tests of every crate
    Test,
    All,
}

#[derive(Clone, Copy, ValueEnum)]
enum BuildProfile {
    Debug,
    Release,
}

impl BuildProfile {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }
}

type TaskResult = Result<(), String>;

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn run_cargo(args: &[&str]) -> TaskResult {
    eprintln!("+ cargo {}", args.join(" "));
    let status = Command::new("cargo")
        .args(args)
        .status()
        .map_err(|error| format!("failed to execute cargo: {error}"))?;
    if status.success() {
        Ok(())
    } else {
        Err(format!(
            "`cargo {}` exited with {}",
            args.join(" "),
            status
                .code()
                .map_or_else(|| "a signal".to_string(), |code| code.to_string())
        ))
    }
}

fn run_ci(job: CiJob) -> TaskResult {
    if matches!(job, CiJob::Fmt | CiJob::All) {
        step("Check formatting");
        run_cargo(&["fmt", "--all", "--", "--check"])?;
    }
    if matches!(job, CiJob::Lint | CiJob::All) {
        step("Clippy");
        run_cargo(&["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"])?;
    }
    if matches!(job, CiJob::Test | CiJob::All) {
        for crate_name in WORKSPACE_CRATES {
            step(&format!("Test {crate_name}"));
            run_cargo(&["test", "-p", crate_name])?;
        }
    }
    eprintln!("\nCI job passed.");
    Ok(())
}

fn package_ingest_lambda(target: &str, profile: BuildProfile, out_dir: &Path) -> TaskResult {
    ensure_rust_target_installed(target)?;
    ensure_c_compiler_available(target)?;

    step("Build ingest lambda binary");
    let mut cargo_args = vec![
        "build",
        "-p",
        LAMBDA_PACKAGE,
        "--bin",
        LAMBDA_BINARY,
        "--target",
        target,
    ];
    if matches!(profile, BuildProfile::Release) {
        cargo_args.push("--release");
    }
    run_cargo(&cargo_args)?;

    step("Package lambda zip");
    let binary_path = Path::new("target")
        .join(target)
        .join(profile.dir_name())
        .join(LAMBDA_BINARY);
    fs::create_dir_all(out_dir)
        .map_err(|error| format!("failed to create {}: {error}", out_dir.display()))?;
    let zip_path = out_dir.join(format!("{LAMBDA_BINARY}.zip"));
    write_bootstrap_zip(&binary_path, &zip_path)?;

    eprintln!("\nPackaged artifact: {}", zip_path.display());
    Ok(())
}

fn ensure_rust_target_installed(target: &str) -> TaskResult {
    let output = match Command::new("rustup")
        .args(["target", "list", "--installed"])
        .output()
    {
        Ok(output) if output.status.success() => output,
        Ok(_) | Err(_) => {
            eprintln!("warning: could not list installed rust targets; skipping target preflight");
            return Ok(());
        }
    };

    let installed = String::from_utf8_lossy(&output.stdout);
    if installed.lines().any(|line| line.trim() == target) {
        Ok(())
    } else {
        Err(format!(
            "rust target `{target}` is not installed; run `rustup target add {target}`"
        ))
    }
}

// The AWS SDK's TLS stack builds C sources, so cross builds need a C compiler for the target.
fn ensure_c_compiler_available(target: &str) -> TaskResult {
    if !target.contains("linux") || cfg!(target_os = "linux") {
        return Ok(());
    }

    let overrides = [
        format!("CC_{}", target.replace('-', "_")),
        format!("CC_{target}"),
        "TARGET_CC".to_string(),
    ];
    let configured = overrides
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .any(|value| compiler_responds(value.trim()));
    if configured {
        return Ok(());
    }

    let arch = target.split('-').next().unwrap_or("x86_64");
    let fallback = format!("{arch}-linux-gnu-gcc");
    if compiler_responds(&fallback) {
        return Ok(());
    }

    Err(format!(
        "no C compiler found for `{target}`; install `{fallback}` or set CC_{}",
        target.replace('-', "_")
    ))
}

fn compiler_responds(program: &str) -> bool {
    let mut parts = program.split_whitespace();
    let Some(bin) = parts.next() else {
        return false;
    };

    Command::new(bin)
        .args(parts)
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn write_bootstrap_zip(binary_path: &Path, zip_path: &Path) -> TaskResult {
    let binary = fs::read(binary_path).map_err(|error| {
        format!(
            "failed to read lambda binary at {}: {error}",
            binary_path.display()
        )
    })?;
    let file = fs::File::create(zip_path)
        .map_err(|error| format!("failed to create {}: {error}", zip_path.display()))?;

    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);
    zip.start_file("bootstrap", options)
        .map_err(|error| format!("failed to start bootstrap entry: {error}"))?;
    zip.write_all(&binary)
        .map_err(|error| format!("failed to write bootstrap entry: {error}"))?;
    zip.finish()
        .map_err(|error| format!("failed to finish lambda zip: {error}"))?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Ci { job } => run_ci(job),
        Commands::ServerlessPackage {
            target,
            profile,
            out_dir,
        } => package_ingest_lambda(&target, profile, &out_dir),
    };

    if let Err(message) = result {
        eprintln!("error: {message}");
        exit(1);
    }
}
