use clap::Parser;
use redkiss::aof::FsyncPolicy;
use redkiss::config::{Config, DEFAULT_AOF_PATH, DEFAULT_PORT};
use redkiss::{server, Error};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// The address to bind to
    #[arg(short, long, default_value = "127.0.0.1")]
    bind: String,

    /// The port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Append only file, replayed on startup
    #[arg(long, env = "REDKISS_AOF_PATH", default_value = DEFAULT_AOF_PATH)]
    aof_path: PathBuf,

    /// Run without the append only file
    #[arg(long)]
    no_aof: bool,

    /// When appended commands are synced to disk: always, everysec or no
    #[arg(long, default_value_t = FsyncPolicy::Everysec)]
    appendfsync: FsyncPolicy,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Config {
            bind: args.bind,
            port: args.port,
            aof_path: (!args.no_aof).then_some(args.aof_path),
            appendfsync: args.appendfsync,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    server::run(args.into()).await
}
