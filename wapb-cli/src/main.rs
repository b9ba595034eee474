mod logging;
mod pull;
mod push;
mod server;
mod upload;

use clap::{ArgAction, Parser, Subcommand};

use crate::push::RecordFlags;
use crate::server::config::WapbConfig;

#[derive(Parser, Debug)]
#[command(name = "wapb")]
#[command(version)]
#[command(about = "Self-hosted paste bin, link shortener and file drop", long_about = None)]
struct Args {
    /// Path to the config file
    #[arg(short = 'c', long = "config", default_value = "wapb.toml", global = true)]
    config: String,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long = "json", global = true)]
    json: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server
    Serve {
        /// Port to listen on
        #[arg(short = 'p', long = "port")]
        port: Option<u16>,

        /// Data directory, or :MEMORY: for a non-persistent store
        #[arg(short = 's', long = "storage")]
        storage: Option<String>,

        /// Directory of static files served for unmatched paths
        #[arg(long = "static-dir")]
        static_dir: Option<String>,
    },
    /// Paste text (or a link) from a file or stdin
    Push {
        /// Server URL
        #[arg(short = 'r', long = "remote", env = "WAPB_REMOTE")]
        remote: Option<String>,

        /// Store the input as a link instead of text
        #[arg(short = 'l', long = "link")]
        link: bool,

        #[command(flatten)]
        flags: RecordFlags,

        /// Input file, `-` or nothing for stdin
        file: Option<String>,
    },
    /// Fetch a record and print it
    Pull {
        /// Server URL
        #[arg(short = 'r', long = "remote", env = "WAPB_REMOTE")]
        remote: Option<String>,

        /// Record kind
        #[arg(value_parser = ["text", "link", "file"])]
        kind: String,

        /// Record id
        id: String,

        /// File id inside a file group
        file_id: Option<String>,
    },
    /// Create a file group and upload files into it
    Upload {
        /// Server URL
        #[arg(short = 'r', long = "remote", env = "WAPB_REMOTE")]
        remote: Option<String>,

        #[command(flatten)]
        flags: RecordFlags,

        /// Files to upload
        #[arg(required = true)]
        files: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Args::parse();
    logging::init(cli.verbose, cli.json);

    let mut config = WapbConfig::load(&cli.config);

    match cli.cmd {
        Command::Serve {
            port,
            storage,
            static_dir,
        } => {
            config.apply_env_overrides();
            config.apply_cli(port, storage.as_deref(), static_dir);
            server::run_serve(config).await;
        }
        Command::Push {
            remote,
            link,
            flags,
            file,
        } => {
            let remote = push::resolve_remote_url(remote.as_deref(), &config.remote);
            push::run_push(&remote, link, &flags, file.as_deref()).await;
        }
        Command::Pull {
            remote,
            kind,
            id,
            file_id,
        } => {
            let remote = push::resolve_remote_url(remote.as_deref(), &config.remote);
            pull::run_pull(&remote, &kind, &id, file_id.as_deref()).await;
        }
        Command::Upload {
            remote,
            flags,
            files,
        } => {
            let remote = push::resolve_remote_url(remote.as_deref(), &config.remote);
            upload::run_upload(&remote, &flags, &files).await;
        }
    }
}
