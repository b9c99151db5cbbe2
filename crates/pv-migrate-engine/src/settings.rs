//! Tunables shared by all strategies

use std::time::Duration;

/// Default image used to run rsync (local copy and SSH client side)
pub const DEFAULT_RSYNC_IMAGE: &str = "docker.io/utkuozdemir/pv-migrate-rsync:1.0.0";

/// Default image running the SSH server on the destination side
pub const DEFAULT_SSHD_IMAGE: &str = "docker.io/utkuozdemir/pv-migrate-sshd:1.1.0";

/// Default bound for a transient pod to report ready
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(120);

/// Default bound for a load balancer to publish an address
pub const DEFAULT_LOAD_BALANCER_TIMEOUT: Duration = Duration::from_secs(300);

/// Port sshd listens on inside its container
pub const SSHD_CONTAINER_PORT: u16 = 22;

/// Default number of rsync runs before giving up on connection errors
pub const DEFAULT_TRANSFER_ATTEMPTS: u32 = 3;

/// Settings handed to every strategy attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSettings {
    /// Image for pods running rsync
    pub rsync_image: String,
    /// Image for the destination sshd pod
    pub sshd_image: String,
    /// How long to wait for each transient pod to become ready
    pub ready_timeout: Duration,
    /// How long to wait for a load balancer address
    pub load_balancer_timeout: Duration,
    /// Port the sshd service exposes
    pub ssh_port: u16,
    /// rsync runs per attempt when the connection fails
    pub transfer_attempts: u32,
    /// First backoff delay between rsync runs
    pub transfer_retry_delay: Duration,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            rsync_image: DEFAULT_RSYNC_IMAGE.to_string(),
            sshd_image: DEFAULT_SSHD_IMAGE.to_string(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
            load_balancer_timeout: DEFAULT_LOAD_BALANCER_TIMEOUT,
            ssh_port: SSHD_CONTAINER_PORT,
            transfer_attempts: DEFAULT_TRANSFER_ATTEMPTS,
            transfer_retry_delay: Duration::from_secs(2),
        }
    }
}
