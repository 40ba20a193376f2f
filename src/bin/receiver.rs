use std::fs::File;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::process::ExitCode;

use clap::Parser;

use reliable_udp::Receiver;

#[derive(Parser, Debug)]
#[command(about = "Listens for a reliable byte stream over UDP and writes it to a file")]
struct Args {
    listen_port: u16,
    output_file: String,

    /// Probability in [0, 1) of simulating loss of an incoming DATA packet.
    packet_loss_rate: Option<f64>,
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
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), args.listen_port);
    let mut receiver = Receiver::accept(addr, args.packet_loss_rate.unwrap_or(0.0))?;

    let output = File::create(&args.output_file)?;
    receiver.receive_all(output)
}
