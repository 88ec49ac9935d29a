//! Talk to an emulated SCPI supply and print the I/O statistics.
//!
//! Run with `RUST_LOG=debug` to see every exchange.

use benchpsu_link::{
    config::ClientConfig, emulator::EmulatorOpener, psu::PsuClient, types::Dialect,
};

const ROUNDS: usize = 100;

fn main() {
    env_logger::init();

    let config = ClientConfig::new(Dialect::Scpi);
    let mut psu: PsuClient<EmulatorOpener> =
        match PsuClient::connect(EmulatorOpener::new(Dialect::Scpi), config) {
            Ok(psu) => psu,
            Err(e) => {
                eprintln!("Cannot open emulator: {e}");
                std::process::exit(1);
            }
        };

    for _ in 0..ROUNDS {
        for command in ["*IDN?", "VOLT?"] {
            let start = std::time::Instant::now();
            let ok = psu.send_command(command, None);
            let dt = start.elapsed().as_millis();
            println!("{} {command} -> {} {ok} {dt:4} ms", psu.port(), psu.response());
        }
    }

    println!("Errors {:?}", psu.read_errors());
    let stats = psu.stats();
    println!("Total I/O: {}", stats.count);
    println!("Total Errors: {}", stats.error_count);
    println!("min I/O time: {:?}", stats.min);
    println!("max I/O time: {:?}", stats.max);
    println!("avg I/O time: {:?}", stats.avg);
}
