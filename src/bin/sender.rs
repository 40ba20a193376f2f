use std::fs::File;
use std::io::Cursor;
use std::net::{SocketAddr, ToSocketAddrs};
use std::process::ExitCode;

use clap::Parser;

use reliable_udp::sender::synthetic_payload;
use reliable_udp::Sender;

const CLIENT_ADVERTISED_WINDOW: u16 = 64;

#[derive(Parser, Debug)]
#[command(about = "Sends a reliable byte stream to a receiver over UDP")]
struct Args {
    server_ip: String,
    server_port: u16,

    /// Path of the file to send. Mutually exclusive with --synthetic.
    file_path: Option<String>,

    /// Send this many bytes of synthetic data instead of reading a file.
    #[arg(long)]
    synthetic: Option<usize>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), reliable_udp::Error> {
    let addr: SocketAddr = (args.server_ip.as_str(), args.server_port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "unresolvable server address"))?;

    let mut sender = Sender::connect(addr, CLIENT_ADVERTISED_WINDOW)?;

    let result = match (&args.file_path, args.synthetic) {
        (Some(path), None) => {
            let file = File::open(path)?;
            sender.send_all(file)
        }
        (None, Some(len)) => {
            let payload = synthetic_payload(len);
            sender.send_all(Cursor::new(payload))
        }
        _ => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "specify exactly one of <file_path> or --synthetic <bytes>",
            )
            .into())
        }
    };

    sender.close()?;
    result
}
