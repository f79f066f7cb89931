//! CLI command definitions.

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Decide whether the application may start
    Status,

    /// Validate a license key
    Validate {
        /// License key
        key: String,

        /// Fail on any failed check and always ask the license server
        #[arg(short, long)]
        strict: bool,

        /// Ask the license server even when the key is cached
        #[arg(long)]
        online: bool,
    },

    /// Activate a license on this machine
    Activate {
        /// License key
        key: String,

        /// Use the local database only
        #[arg(long)]
        offline: bool,
    },

    /// Show or start this machine's trial
    Trial,

    /// Print this machine's fingerprint
    Fingerprint,

    /// License counts
    Stats,

    /// Inspect and repair local licenses
    License {
        #[command(subcommand)]
        command: LicenseCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum LicenseCommands {
    /// Show a license and its activations (latest if no key given)
    Show {
        /// License key
        key: Option<String>,
    },

    /// Override a license's local status
    SetStatus {
        /// License key
        key: String,

        /// active, inactive, expired or suspended
        status: String,
    },

    /// Release this machine's activation
    Deactivate {
        /// License key
        key: String,
    },

    /// Delete a license and its activations
    Remove {
        /// License key
        key: String,

        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },
}
