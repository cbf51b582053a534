use std::process::ExitCode;

use bpaf::Bpaf;
use camino::Utf8PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use curo::config::Config;
use curo::notify::{Notifier, NotifierCapability};
use curo::service::RoleService;
use curo::types::{PortStatus, Role, Status};

#[derive(Debug, Clone, Bpaf)]
enum Command {
    #[bpaf(command)]
    /// Print the current status of every Type-C port.
    Status,
    #[bpaf(command)]
    /// Switch a port role and wait for the partner to confirm it.
    Switch {
        /// Port name, e.g. port0.
        #[bpaf(positional("PORT"))]
        port: String,
        /// Role axis: power, data or mode.
        #[bpaf(positional("AXIS"))]
        axis: String,
        /// Requested role, e.g. source, sink, host, device, ufp, dfp, drp.
        #[bpaf(positional("ROLE"))]
        role: String,
    },
    #[bpaf(command)]
    /// Run the monitoring daemon until interrupted.
    Monitor,
}

#[derive(Debug, Clone, Bpaf)]
#[bpaf(options, version)]
struct Options {
    /// Path to the service configuration file.
    #[bpaf(short('c'), long("config"), argument("PATH"))]
    config: Option<Utf8PathBuf>,
    #[bpaf(external(command))]
    command: Command,
}

/// Prints every callback the service delivers.
struct LogNotifier;

impl Notifier for LogNotifier {
    fn on_status_changed(&self, ports: &[PortStatus], status: Status) {
        info!("status changed ({status:?})");
        for port in ports {
            print_port(port);
        }
    }

    fn on_role_switch_result(&self, port: &str, role: Role, success: bool) {
        info!("switch of {port} to {role} {}", if success { "succeeded" } else { "failed" });
    }
}

fn print_port(port: &PortStatus) {
    println!(
        "{}: {} power={} data={} mode={}{}",
        port.name,
        if port.connected { "connected" } else { "disconnected" },
        port.power_role,
        port.data_role,
        port.mode,
        match port.contaminant {
            Some(contaminant) => format!(" contaminant={contaminant:?}"),
            None => String::new(),
        },
    );
}

fn parse_role(axis: &str, role: &str) -> curo::Result<Role> {
    Ok(match axis {
        "power" => Role::Power(role.parse()?),
        "data" => Role::Data(role.parse()?),
        "mode" => Role::Mode(role.parse()?),
        _ => return Err(curo::Error::InvalidArgument),
    })
}

fn run(opts: Options) -> curo::Result<()> {
    let config = match &opts.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let service = RoleService::new(config);

    match opts.command {
        Command::Status => {
            for port in service.port_statuses()? {
                print_port(&port);
            }
        }
        Command::Switch { port, axis, role } => {
            let role = parse_role(&axis, &role)?;
            service.register_notifier(Box::new(LogNotifier), NotifierCapability::ContaminantAware)?;
            service.switch_role(&port, role)?;
        }
        Command::Monitor => {
            service.register_notifier(Box::new(LogNotifier), NotifierCapability::ContaminantAware)?;
            service.query_port_status();
            info!("monitoring, ^C to exit");
            loop {
                std::thread::park();
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let opts = options().run();
    match run(opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
