/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Command line interface shared by stub hosts. Each host is a standalone
//! executable that flattens these arguments into its own CLI.

use std::io;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::path::Path;
use std::path::PathBuf;

use chrono::Local;
use clap::Parser;
use rspd::Config;
use rspd::DEFAULT_PORT;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

// Session settings common to every stub host. Using Clap, this is designed
// to be set from CLI args, or to be flattened into a host's own arguments.
//
// NOTE: Not a doc comment, it would become the host's `--help` about text.
#[derive(Debug, Clone, Parser)]
pub struct CommonStubArguments {
    /// TCP port to wait for the debugger on. 0 picks a free port.
    #[clap(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to listen on.
    #[clap(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Trace every packet exchanged with the debugger.
    #[clap(long)]
    pub debug: bool,

    /// Negatively acknowledge packets with a bad checksum instead of
    /// accepting them.
    #[clap(long = "strict-checksum")]
    pub strict_checksum: bool,

    /// Direct logging to a file.  This can also be set with the RUST_LOG_FILE environment
    /// variable, but the CLI flag takes precedence.
    #[clap(long = "log-file", value_name = "PATH", env = "RUST_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

impl CommonStubArguments {
    /// The session configuration these arguments describe.
    pub fn config(&self) -> Config {
        Config::new(self.port)
            .host(self.host)
            .debug(self.debug)
            .strict_checksum(self.strict_checksum)
    }

    /// Install the global tracing subscriber, filtered by `RUST_LOG`.
    ///
    /// Logs go to `--log-file` when given, otherwise to stderr. An existing
    /// log file is never overwritten: a timestamp suffix is appended to the
    /// name instead. The returned guard flushes the file when dropped.
    pub fn init_tracing(&self) -> Option<WorkerGuard> {
        fn set_subscriber_with_writer<
            T: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
        >(
            writer: T,
        ) {
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::from_default_env())
                .with_writer(writer)
                .finish();
            if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(" [rspd] WARNING: could not install tracing subscriber: {}", err);
            }
        }

        self.log_file
            .as_ref()
            .and_then(|lf| {
                let parent = lf.parent()?;
                let filename = fresh_file_name(parent, lf)?;
                let file_writer = tracing_appender::rolling::never(parent, &filename);
                let (file_writer, guard) = tracing_appender::non_blocking(file_writer);

                eprintln!(" [rspd] Logging to file at {:?}", parent.join(&filename));
                set_subscriber_with_writer(file_writer);
                Some(guard)
            })
            .or_else(|| {
                set_subscriber_with_writer(io::stderr);
                None
            })
    }
}

impl From<&CommonStubArguments> for Config {
    fn from(args: &CommonStubArguments) -> Self {
        args.config()
    }
}

/// Pick a name for the log file that does not exist yet in `parent`.
fn fresh_file_name(parent: &Path, log_file: &Path) -> Option<PathBuf> {
    let orig_filename = log_file.file_name()?.to_os_string();
    let mut filename = orig_filename.clone();

    for _ in 0..100 {
        if parent.join(&filename).exists() {
            filename = orig_filename.clone();
            filename.push(format!("{}", Local::now().format(".%Y%m%d.%H%M%S.%f")));
        } else {
            return Some(PathBuf::from(filename));
        }
    }

    eprintln!(" [rspd] WARNING: could not open log file, falling back to stderr");
    None
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let args = CommonStubArguments::try_parse_from(["stub"]).unwrap();
        let config = args.config();
        assert_eq!(config, Config::default());
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn flags_reach_config() {
        let args = CommonStubArguments::try_parse_from([
            "stub",
            "--port",
            "4242",
            "--host",
            "127.0.0.1",
            "--debug",
            "--strict-checksum",
            "--log-file",
            "/tmp/stub.log",
        ])
        .unwrap();
        let config = Config::from(&args);
        assert_eq!(config.addr(), "127.0.0.1:4242".parse().unwrap());
        assert!(config.debug);
        assert!(config.strict_checksum);
        assert_eq!(args.log_file, Some(PathBuf::from("/tmp/stub.log")));
    }

    #[test]
    fn bad_port_is_rejected() {
        assert!(CommonStubArguments::try_parse_from(["stub", "--port", "70000"]).is_err());
    }

    #[test]
    fn existing_log_file_gets_suffix() {
        let dir = std::env::temp_dir();
        let taken = dir.join(format!("rspd-util-test-{}.log", std::process::id()));
        std::fs::write(&taken, b"").unwrap();

        let name = fresh_file_name(&dir, &taken).unwrap();
        assert_ne!(name.as_os_str(), taken.file_name().unwrap());
        assert!(name
            .to_str()
            .unwrap()
            .starts_with(taken.file_name().unwrap().to_str().unwrap()));

        std::fs::remove_file(&taken).unwrap();
    }
}
