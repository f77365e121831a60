//! fpmd - FastCGI-style process manager.

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;

use fpmd::cli::Cli;
use fpmd::config::{EndpointAddr, FpmConfig};
use fpmd::engine::EchoEngine;
use fpmd::logging::{self, LogConfig};
use fpmd::supervisor::{PidFile, Supervisor, daemonize};
use fpmd::worker::{self, EnvAcceptor, WorkerOptions};
use fpmd::{net, privs};

fn main() {
    let cli = Cli::parse();

    logging::init(
        LogConfig::new()
            .with_verbosity(cli.verbose)
            .with_env_overrides(),
    );

    if let Err(e) = run(cli) {
        eprintln!("fpmd: {}", e);
        for cause in e.chain().skip(1) {
            eprintln!("  caused by: {}", cause);
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = cli.into_config()?;

    // A set-uid binary would make the privilege logic below lie about
    // who we really are.
    if !privs::is_root() && privs::is_setugid() {
        bail!("refusing to run set-uid; drop privileges with -u/-g as root instead");
    }

    let mut pid_file = match &config.pid_file {
        Some(path) => Some(PidFile::create(path).context("opening pid file")?),
        None => None,
    };

    let listener = if privs::is_root() {
        let creds = privs::resolve(config.user.as_deref(), config.group.as_deref())
            .context("resolving privilege-drop identity")?;
        let sock_creds = privs::resolve(
            config.socket_user.as_deref(),
            config.socket_group.as_deref(),
        )
        .context("resolving socket owner")?;

        // The socket owner defaults to the privilege-drop identity.
        config.endpoint.owner_uid = if sock_creds.uid.as_raw() != 0 {
            sock_creds.uid.as_raw()
        } else {
            creds.uid.as_raw()
        };
        config.endpoint.owner_gid = if sock_creds.gid.as_raw() != 0 {
            sock_creds.gid.as_raw()
        } else {
            creds.gid.as_raw()
        };

        let mut listener = None;
        if config.bind_before_chroot {
            listener = Some(net::bind_endpoint(&config.endpoint)?);
        }

        // Group before chroot: the group database may be unreachable
        // afterwards.
        privs::drop_group(&creds)?;
        if let Some(dir) = &config.chroot {
            privs::enter_chroot(dir)?;
        }

        let listener = match listener {
            Some(fd) => fd,
            None => net::bind_endpoint(&config.endpoint)?,
        };

        privs::drop_user(&creds)?;
        listener
    } else {
        net::bind_endpoint(&config.endpoint)?
    };

    if let Some(dir) = &config.chdir {
        nix::unistd::chdir(dir.as_path())
            .with_context(|| format!("chdir('{}') failed", dir.display()))?;
    }

    let workers = config.worker_count();
    if workers > 1 {
        info!("initialization succeeded; becoming a daemon");
        daemonize().context("daemonize failed")?;
    }

    let endpoint_desc = match &config.endpoint.addr {
        EndpointAddr::Unix(path) => path.display().to_string(),
        EndpointAddr::Inet { addr, port } => {
            format!("{}:{}", addr.as_deref().unwrap_or("*"), port)
        }
    };
    info!(endpoint = %endpoint_desc, workers, "starting worker pool");

    let worker_entry = worker_entry(&config);
    let mut supervisor = Supervisor::new(listener, pid_file.take(), worker_entry);
    supervisor.spawn_initial(workers)?;
    supervisor.run()?;
    Ok(())
}

/// The closure each forked worker runs: wire the default transport and
/// engine to the worker loop and map the result onto an exit status.
fn worker_entry(config: &FpmConfig) -> impl Fn() -> i32 {
    let options = WorkerOptions {
        max_executions: config.max_executions,
        upload_dir: config.upload_dir.clone(),
        verbose: config.verbose,
    };

    move || {
        let mut acceptor = EnvAcceptor::new();
        let mut engine = EchoEngine;
        let result = worker::run(&mut acceptor, &mut engine, &options);
        worker::exit_status(&result)
    }
}
