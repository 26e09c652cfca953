//! Certificate renewal through an operator-supplied command.
//!
//! The command runs with the node's certificate settings exported as
//! `PANELSYNC_CERT_*` variables, plus the configured DNS provider
//! environment. A non-zero exit is a renewal failure, and so is a command
//! still running when `cert.timeout` expires; it is killed.

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use panelsync_core::{CertConfig, CertRenewer, CoreError};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct CommandRenewer {
    program: String,
    args: Vec<String>,
}

impl CommandRenewer {
    /// Build from `[program, args...]`; `None` when empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn command(&self, cert: &CertConfig) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env("PANELSYNC_CERT_MODE", cert.mode.to_string())
            .envs(&cert.dns_env);
        for (key, value) in [
            ("PANELSYNC_CERT_DOMAIN", &cert.domain),
            ("PANELSYNC_CERT_EMAIL", &cert.email),
            ("PANELSYNC_CERT_PROVIDER", &cert.provider),
        ] {
            if let Some(value) = value {
                cmd.env(key, value);
            }
        }
        cmd
    }
}

impl CertRenewer for CommandRenewer {
    fn renew(&self, cert: &CertConfig) -> Result<(), CoreError> {
        debug!(program = %self.program, domain = ?cert.domain, "running renewal command");
        let failed = |message: String| CoreError::CertRenewal { message };

        let mut child = self
            .command(cert)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| failed(format!("cannot run {}: {e}", self.program)))?;

        // Drain stderr off-thread so a chatty command cannot fill the pipe.
        let stderr = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text);
                text
            })
        });

        let deadline = Instant::now() + cert.timeout;
        let status = loop {
            if let Some(status) = child
                .try_wait()
                .map_err(|e| failed(format!("waiting on {}: {e}", self.program)))?
            {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(failed(format!(
                    "{} killed after {}s",
                    self.program,
                    cert.timeout.as_secs()
                )));
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        if status.success() {
            info!(domain = ?cert.domain, "certificate renewal command succeeded");
            return Ok(());
        }
        let stderr = stderr
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();
        Err(failed(format!("{} exited with {status}: {}", self.program, stderr.trim())))
    }
}
