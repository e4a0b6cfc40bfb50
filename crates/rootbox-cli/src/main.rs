#[cfg(target_os = "linux")]
mod config;

#[cfg(target_os = "linux")]
mod linux {
    use anyhow::Result;
    use clap::{Args, Parser, Subcommand};
    use rootbox::reexec::INFRASTRUCTURE_EXIT_CODE;
    use rootbox::{SandboxSpec, StdioCaps, Stream, Termination};
    use std::ffi::OsString;
    use std::path::PathBuf;
    use tracing::debug;

    use crate::config::RunConfig;

    #[derive(Parser)]
    #[command(
        name = "rootbox",
        version,
        about = "Run a command in fresh Linux namespaces with its own root filesystem"
    )]
    struct Cli {
        #[command(subcommand)]
        command: Commands,
    }

    #[derive(Subcommand)]
    enum Commands {
        /// Run a command in new mount/UTS/IPC/PID/network/user namespaces
        Run(RunArgs),
    }

    #[derive(Args, Debug)]
    struct RunArgs {
        /// Root filesystem the command sees as `/`
        #[arg(long)]
        rootfs: PathBuf,

        /// Host mount, `PATH` or `SOURCE:TARGET` (repeatable)
        #[arg(long = "mount", value_name = "SPEC")]
        mounts: Vec<OsString>,

        /// Environment entry for the command (repeatable)
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<OsString>,

        /// Attach host stdin
        #[arg(long)]
        stdin: bool,

        /// Attach host stdout
        #[arg(long)]
        stdout: bool,

        /// Attach host stderr
        #[arg(long)]
        stderr: bool,

        /// Config file (default: $XDG_CONFIG_HOME/rootbox/config.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Command to run inside the sandbox
        command: OsString,

        /// Arguments for the command
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<OsString>,
    }

    impl RunArgs {
        fn stdio(&self, fallback: StdioCaps) -> StdioCaps {
            let mut caps = StdioCaps::NONE;
            for (requested, stream) in [
                (self.stdin, Stream::Stdin),
                (self.stdout, Stream::Stdout),
                (self.stderr, Stream::Stderr),
            ] {
                if requested {
                    caps = caps.with(stream);
                }
            }
            if caps == StdioCaps::NONE {
                fallback
            } else {
                caps
            }
        }

        fn into_spec(self, config: RunConfig) -> SandboxSpec {
            let stdio = self.stdio(config.stdio);
            let mut spec = SandboxSpec::new(self.rootfs, self.command)
                .args(self.args)
                .stdio(stdio);
            for mount in config.mounts.into_iter().map(OsString::from).chain(self.mounts) {
                spec = spec.mount(mount);
            }
            for entry in config.env.into_iter().map(OsString::from).chain(self.env) {
                spec = spec.env(entry);
            }
            spec
        }
    }

    pub fn init_tracing() {
        use std::io::IsTerminal;

        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "rootbox=info".into()),
            )
            .with_writer(std::io::stderr)
            .with_ansi(std::io::stderr().is_terminal())
            .init();
    }

    /// Returns the process exit code.
    pub fn main(raw: Vec<OsString>) -> i32 {
        if raw
            .get(1)
            .is_some_and(|arg| rootbox::protocol::is_marker(arg))
        {
            return rootbox::reexec::run(raw.into_iter().skip(2));
        }

        let cli = Cli::parse_from(raw);
        match cli.command {
            Commands::Run(args) => match run(args) {
                Ok(termination) => termination.code(),
                Err(err) => {
                    eprintln!("rootbox: {err:#}");
                    INFRASTRUCTURE_EXIT_CODE
                }
            },
        }
    }

    fn run(args: RunArgs) -> Result<Termination> {
        let config = RunConfig::load(args.config.as_deref())?;
        let spec = args.into_spec(config);
        debug!(?spec, "launching");
        Ok(rootbox::launch(spec)?)
    }

}

fn main() {
    #[cfg(target_os = "linux")]
    {
        linux::init_tracing();
        std::process::exit(linux::main(std::env::args_os().collect()));
    }

    #[cfg(not(target_os = "linux"))]
    {
        eprintln!("rootbox is only supported on Linux");
        std::process::exit(125);
    }
}
