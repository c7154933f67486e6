mod cli;
mod error;
mod host;
mod pty;

use clap::Parser;

fn main() {
    let raw_args: Vec<String> = std::env::args().collect();

    #[cfg(unix)]
    if let Some((slave_path, argv)) = cli::parse_pty_exec(&raw_args) {
        pty::run_pty_exec_entry(&slave_path, &argv);
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = cli::HostArgs::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("pty-host: failed to start tokio runtime: {e}");
            std::process::exit(5);
        }
    };

    let result = runtime.block_on(host::run(host::HostArgs {
        session_id: args.session_id,
        shell: args.shell,
        cwd: args.cwd,
        cols: args.cols,
        rows: args.rows,
        scrollback_bytes: args.scrollback_bytes,
    }));

    if let Err((err, code)) = result {
        tracing::error!(error = %err, kind = ?err.kind(), "pty host exiting");
        std::process::exit(code);
    }
}
