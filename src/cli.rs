use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::{DEFAULT_BUFFER_SIZE, HttpConfig};
use crate::io::{AuthScheme, Credentials};
use crate::package::ObjectKind;

#[derive(Parser, Debug)]
#[command(name = "vmpack")]
#[command(version)]
#[command(about = "Inspect, extract and create virtual machine packages", long_about = None)]
#[command(after_help = "Examples:\n  \
  vmpack inspect https://example.com/vm.nxpk       show package contents\n  \
  vmpack extract vm.nxpk disk disk.img             copy the disk image out\n  \
  vmpack create vm.nxpk --name VM --domain d.xml --disk disk.img")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub auth: AuthArgs,

    /// Look-ahead / look-behind margin for HTTP reads, in bytes
    #[arg(long, global = true, value_name = "BYTES", default_value_t = DEFAULT_BUFFER_SIZE)]
    pub buffer_size: u64,

    /// Per-request timeout in seconds (0 disables it)
    #[arg(long, global = true, value_name = "SECS", default_value_t = 30)]
    pub timeout: u64,

    /// Log debug output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the package name, validators and object extents
    Inspect {
        /// Package path or URL
        #[arg(value_name = "URL")]
        url: String,
    },
    /// Copy one object out of a package
    Extract {
        /// Package path or URL
        #[arg(value_name = "URL")]
        url: String,
        /// domain, disk or memory
        #[arg(value_name = "OBJECT")]
        object: ObjectKind,
        /// Destination file
        #[arg(value_name = "OUT")]
        out: PathBuf,
    },
    /// Write a new package
    Create {
        /// Destination archive
        #[arg(value_name = "OUT")]
        out: PathBuf,
        /// Package name
        #[arg(long)]
        name: String,
        /// Domain descriptor (XML)
        #[arg(long, value_name = "FILE")]
        domain: PathBuf,
        /// Disk image
        #[arg(long, value_name = "FILE")]
        disk: PathBuf,
        /// Memory image
        #[arg(long, value_name = "FILE")]
        memory: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
pub struct AuthArgs {
    /// Username for HTTP authentication
    #[arg(long, global = true, requires = "password")]
    pub user: Option<String>,

    /// Password for HTTP authentication
    #[arg(long, global = true, requires = "user")]
    pub password: Option<String>,

    /// Authentication scheme: basic or digest
    #[arg(long, global = true, default_value_t = AuthScheme::Basic)]
    pub scheme: AuthScheme,
}

impl Cli {
    pub fn credentials(&self) -> Option<(AuthScheme, Credentials)> {
        match (&self.auth.user, &self.auth.password) {
            (Some(user), Some(password)) => {
                Some((self.auth.scheme, Credentials::new(user, password)))
            }
            _ => None,
        }
    }

    pub fn http_config(&self) -> HttpConfig {
        let timeout = (self.timeout > 0).then(|| Duration::from_secs(self.timeout));
        HttpConfig::default()
            .with_buffer_size(self.buffer_size)
            .with_timeout(timeout)
    }
}
