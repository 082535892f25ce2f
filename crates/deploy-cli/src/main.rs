use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use deploy_config::DeployConfig;
use deploy_jdwp::{ClientState, DeviceState, DispatchTable, FakeDeviceServer, JdwpService};
use deploy_model::App;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "deploy", version, about = "Device protocol tools for app deployment")]
struct Cli {
    /// Path to a `deploy.toml` configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the adb `jdwp:<pid>` service for a set of fake processes
    FakeDevice(FakeDeviceArgs),
    /// Classify APK and baseline profile paths and print the resulting app as JSON
    DescribeApp(DescribeAppArgs),
}

#[derive(Args)]
struct FakeDeviceArgs {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:0")]
    listen: String,
    /// Device API level (overrides the config file)
    #[arg(long)]
    api_level: Option<u32>,
    /// Device serial (overrides the config file)
    #[arg(long)]
    serial: Option<String>,
    /// A running process, as PID:PACKAGE[:ABI]
    #[arg(long = "client", value_parser = parse_client)]
    clients: Vec<ClientArg>,
}

#[derive(Args)]
struct DescribeAppArgs {
    /// Application id
    #[arg(long)]
    app_id: String,
    /// Also report which baseline profile files apply at this API level
    #[arg(long)]
    api_level: Option<u32>,
    /// `.apk` and `.dm` files
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

#[derive(Clone, Debug)]
struct ClientArg {
    pid: u32,
    package: String,
    abi: Option<String>,
}

fn parse_client(value: &str) -> Result<ClientArg, String> {
    let mut parts = value.splitn(3, ':');
    let pid = parts
        .next()
        .and_then(|pid| pid.parse::<u32>().ok())
        .ok_or_else(|| format!("invalid pid in `{value}`; expected PID:PACKAGE[:ABI]"))?;
    let package = match parts.next() {
        Some(package) if !package.is_empty() => package.to_string(),
        _ => return Err(format!("missing package in `{value}`; expected PID:PACKAGE[:ABI]")),
    };
    let abi = parts.next().filter(|abi| !abi.is_empty()).map(str::to_string);
    Ok(ClientArg { pid, package, abi })
}

#[derive(Serialize)]
struct AppDescription<'a> {
    app: &'a App,
    /// ABI the app would run with on the configured device.
    abi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    baseline_profile: Option<&'a [PathBuf]>,
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            2
        }
    };

    std::process::exit(exit_code);
}

fn load_config(path: Option<&Path>) -> Result<DeployConfig> {
    match path {
        Some(path) => DeployConfig::load_from_path(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(DeployConfig::default()),
    }
}

fn run(cli: Cli) -> Result<i32> {
    let config = load_config(cli.config.as_deref())?;
    deploy_config::init_tracing(&config.logging);

    match cli.command {
        Command::FakeDevice(args) => fake_device(&config, args),
        Command::DescribeApp(args) => describe_app(&config, args),
    }
}

fn fake_device(config: &DeployConfig, args: FakeDeviceArgs) -> Result<i32> {
    if args.clients.is_empty() {
        bail!("at least one --client PID:PACKAGE[:ABI] is required");
    }

    let serial = args.serial.unwrap_or_else(|| config.device.serial.clone());
    let api_level = args.api_level.unwrap_or(config.device.api_level);
    let device = Arc::new(DeviceState::new(serial, api_level).with_abis(config.device.abis.clone()));
    for arg in args.clients {
        let mut client = ClientState::new(arg.pid, 10_000, &arg.package, &arg.package, false);
        if let Some(abi) = arg.abi {
            client = client.with_abi(abi);
        }
        device.start_client(client);
    }

    let service = JdwpService::new(
        device,
        Arc::new(DispatchTable::with_defaults()),
        config.session.settings(),
    );
    let server = FakeDeviceServer::bind(&args.listen, service)
        .with_context(|| format!("failed to listen on {}", args.listen))?;
    let addr = server.local_addr()?;

    tracing::info!(target: "deploy.cli", %addr, api_level, "fake device listening");
    let mut stdout = std::io::stdout();
    writeln!(stdout, "listening on {addr}")?;
    stdout.flush()?;

    server.serve().context("fake device accept loop failed")?;
    Ok(0)
}

fn describe_app(config: &DeployConfig, args: DescribeAppArgs) -> Result<i32> {
    let app = App::from_paths(args.app_id, &args.paths)?;
    let abi = deploy_live::abi_for_apks(&config.device.abis, app.apks()).ok();
    let description = AppDescription {
        app: &app,
        abi,
        baseline_profile: args.api_level.map(|api| app.baseline_profile(api)),
    };
    println!("{}", serde_json::to_string_pretty(&description)?);
    Ok(0)
}
