use std::env;

use benchpsu_link::{
    config::ClientConfig,
    psu::PsuClient,
    serial::SerialOpener,
    types::{Dialect, State},
};

// Configuration constants - adjust these for your setup
const BAUD_RATE: u32 = 115200;
// The PSU can take a while to respond, a reasonably large time out is required.
const SERIAL_TIMEOUT_MS: u64 = 300;
const OUTPUT_VOLTAGE: f64 = 5.5;
const CURRENT_LIMIT: f64 = 0.1;
const STABILIZATION_DELAY_MS: u64 = 1000;

fn main() {
    env_logger::init();

    // Port from the command line, SCPI unless told otherwise, e.g. `serial /dev/ttyUSB0 genesys`
    let Some(port_name) = env::args().nth(1) else {
        eprintln!("Usage: serial <port> [scpi|genesys]");
        std::process::exit(1);
    };
    let dialect = match env::args().nth(2).as_deref() {
        Some("genesys") => Dialect::Genesys,
        _ => Dialect::Scpi,
    };

    println!("Using port: {}", port_name);

    let opener = SerialOpener::new(&port_name)
        .with_timeout(std::time::Duration::from_millis(SERIAL_TIMEOUT_MS));
    let config = ClientConfig::new(dialect).with_baud_rate(BAUD_RATE);
    let mut psu: PsuClient<SerialOpener> =
        PsuClient::connect(opener, config).expect("Failed to open serial port");

    if !psu.is_ready() {
        println!("No answer at {BAUD_RATE} baud, searching");
        match psu.detect_baud_rate() {
            Some(baud_rate) => println!("Found supply at {baud_rate} baud"),
            None => {
                eprintln!("No supply found on {port_name}");
                std::process::exit(1);
            }
        }
    }

    println!("Product: {} (serial {})", psu.device_type(), psu.serial());
    println!("Limits: {} V, {} A", psu.max_voltage(), psu.max_current());

    // Set output voltage
    if psu.write_voltage(OUTPUT_VOLTAGE) {
        println!("Set output voltage to {OUTPUT_VOLTAGE}V");
    }

    // Set current limit
    if psu.write_current(CURRENT_LIMIT) {
        println!("Set current limit to {CURRENT_LIMIT}A");
    }

    // Enable the output
    if psu.write_output(State::On) {
        println!("Output enabled");
    }

    // Wait for output to stabilize
    std::thread::sleep(std::time::Duration::from_millis(STABILIZATION_DELAY_MS));

    println!("Measured output voltage: {:?} V", psu.read_voltage());
    println!("Measured output current: {:?} A", psu.read_current());
    println!("Measured output power: {:?} W", psu.read_power());
    println!("Errors: {:?}", psu.read_errors());
}
