//! rsync command construction
//!
//! Every strategy builds its transfer command here, so options such as
//! `--delete` mean the same thing whichever strategy runs.

use crate::manifests::{DEST_MOUNT_PATH, SOURCE_MOUNT_PATH};

const BASE_FLAGS: &[&str] = &[
    "-azv",
    "--info=progress2,misc0,flist0",
    "--no-inc-recursive",
];

/// Remote end of an rsync-over-ssh transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    /// Host name or IP address of the sshd service
    pub host: String,
    /// Port of the sshd service
    pub port: u16,
    /// Private key path inside the client pod
    pub key_path: String,
}

impl SshTarget {
    fn remote_shell(&self) -> String {
        format!(
            "ssh -i {} -p {} -o StrictHostKeyChecking=no \
             -o UserKnownHostsFile=/dev/null -o ConnectTimeout=5",
            self.key_path, self.port
        )
    }

    fn remote_path(&self, path: &str) -> String {
        if self.host.contains(':') {
            format!("root@[{}]:{}", self.host, path)
        } else {
            format!("root@{}:{}", self.host, path)
        }
    }
}

/// An rsync invocation copying `/source/` into `/dest/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsyncCommand {
    ssh: Option<SshTarget>,
    delete: bool,
}

impl RsyncCommand {
    /// Copy between two paths of the same pod
    pub fn local(delete: bool) -> Self {
        Self { ssh: None, delete }
    }

    /// Copy from the local source to `/dest/` on an sshd host
    pub fn over_ssh(target: SshTarget, delete: bool) -> Self {
        Self {
            ssh: Some(target),
            delete,
        }
    }

    /// Whether files missing from the source are removed from the destination
    pub fn deletes_extraneous(&self) -> bool {
        self.delete
    }

    /// The argv to exec
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["rsync".to_string()];
        args.extend(BASE_FLAGS.iter().map(|f| f.to_string()));
        if self.delete {
            args.push("--delete".to_string());
        }

        let source = format!("{}/", SOURCE_MOUNT_PATH);
        let dest = format!("{}/", DEST_MOUNT_PATH);
        match &self.ssh {
            Some(target) => {
                args.push("-e".to_string());
                args.push(target.remote_shell());
                args.push(source);
                args.push(target.remote_path(&dest));
            }
            None => {
                args.push(source);
                args.push(dest);
            }
        }
        args
    }
}

/// Exit codes caused by connectivity rather than by the data itself
pub fn is_retryable_exit_code(code: i32) -> bool {
    matches!(code, 10 | 12 | 30 | 35 | 255)
}

/// Short description of an rsync exit code
pub fn describe_exit_code(code: i32) -> &'static str {
    match code {
        0 => "success",
        1 => "syntax or usage error",
        2 => "protocol incompatibility",
        3 => "errors selecting input/output files",
        5 => "error starting client-server protocol",
        10 => "error in socket I/O",
        11 => "error in file I/O",
        12 => "error in rsync protocol data stream",
        20 => "received SIGUSR1 or SIGINT",
        23 => "partial transfer due to error",
        24 => "partial transfer due to vanished source files",
        30 => "timeout in data send/receive",
        35 => "timeout waiting for daemon connection",
        255 => "ssh connection failed",
        _ => "unknown error",
    }
}
