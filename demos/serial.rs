use std::{env, time::Duration};

use inquire::Select;
use serialport::SerialPort;
use sinilink_xy_poller::{Instant, PagerState, PresetGroup, State, XyPsu, XyRegister};

// Configuration constants - adjust these for your setup
const BAUD_RATE: u32 = 115200;
// Reads only happen once bytes are waiting, so this never stalls the loop for long.
const SERIAL_TIMEOUT_MS: u64 = 10;
const MODBUS_UNIT_ID: u8 = 0x01;
const OUTPUT_CENTIVOLTS: u16 = 550; // 5.5V
const CURRENT_LIMIT_CENTIAMPS: u16 = 10; // 0.1A
const STABILIZATION_DELAY_MS: u32 = 1000;
const LOOP_PERIOD_MS: u64 = 1;

pub struct PortWrapper(Box<dyn SerialPort>);

#[derive(Debug)]
pub struct IoError(std::io::Error);

impl core::fmt::Display for IoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl embedded_io::Error for IoError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self.0.kind() {
            std::io::ErrorKind::NotFound => embedded_io::ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => embedded_io::ErrorKind::PermissionDenied,
            std::io::ErrorKind::ConnectionRefused => embedded_io::ErrorKind::ConnectionRefused,
            std::io::ErrorKind::ConnectionReset => embedded_io::ErrorKind::ConnectionReset,
            std::io::ErrorKind::ConnectionAborted => embedded_io::ErrorKind::ConnectionAborted,
            std::io::ErrorKind::NotConnected => embedded_io::ErrorKind::NotConnected,
            std::io::ErrorKind::AddrInUse => embedded_io::ErrorKind::AddrInUse,
            std::io::ErrorKind::AddrNotAvailable => embedded_io::ErrorKind::AddrNotAvailable,
            std::io::ErrorKind::BrokenPipe => embedded_io::ErrorKind::BrokenPipe,
            std::io::ErrorKind::AlreadyExists => embedded_io::ErrorKind::AlreadyExists,
            std::io::ErrorKind::InvalidInput => embedded_io::ErrorKind::InvalidInput,
            std::io::ErrorKind::InvalidData => embedded_io::ErrorKind::InvalidData,
            std::io::ErrorKind::TimedOut => embedded_io::ErrorKind::TimedOut,
            std::io::ErrorKind::Interrupted => embedded_io::ErrorKind::Interrupted,
            std::io::ErrorKind::Unsupported => embedded_io::ErrorKind::Unsupported,
            std::io::ErrorKind::OutOfMemory => embedded_io::ErrorKind::OutOfMemory,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for PortWrapper {
    type Error = IoError;
}

impl embedded_io::Read for PortWrapper {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        std::io::Read::read(&mut self.0, buf).map_err(IoError)
    }
}

impl embedded_io::ReadReady for PortWrapper {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        self.0
            .bytes_to_read()
            .map(|pending| pending > 0)
            .map_err(|e| IoError(e.into()))
    }
}

impl embedded_io::Write for PortWrapper {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        std::io::Write::write(&mut self.0, buf).map_err(IoError)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        std::io::Write::flush(&mut self.0).map_err(IoError)
    }
}

/// Keeps the driver ticking against a wall clock.
struct Clock(std::time::Instant);

impl Clock {
    fn now(&self) -> Instant {
        Instant::from_ticks(self.0.elapsed().as_millis() as u32)
    }

    /// Tick `psu` for `ms` milliseconds.
    fn run_for(&self, psu: &mut XyPsu<PortWrapper>, ms: u32) {
        let until = self.now().ticks() + ms;
        while self.now().ticks() < until {
            if let Err(e) = psu.tick(self.now()) {
                eprintln!("Tick failed: {e}");
            }
            std::thread::sleep(Duration::from_millis(LOOP_PERIOD_MS));
        }
    }

    /// Tick `psu` until `done` holds or `ms` milliseconds pass.
    fn run_until(
        &self,
        psu: &mut XyPsu<PortWrapper>,
        ms: u32,
        mut done: impl FnMut(&mut XyPsu<PortWrapper>) -> bool,
    ) -> bool {
        let until = self.now().ticks() + ms;
        while self.now().ticks() < until {
            if let Err(e) = psu.tick(self.now()) {
                eprintln!("Tick failed: {e}");
            }
            if done(psu) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(LOOP_PERIOD_MS));
        }
        false
    }
}

fn main() {
    // Get serial port from command line arg or interactive selection
    let port_name = env::args().nth(1).unwrap_or_else(|| {
        // List available serial ports
        let ports = serialport::available_ports().expect("Failed to enumerate serial ports");

        if ports.is_empty() {
            eprintln!("No serial ports found!");
            std::process::exit(1);
        }

        let port_names: Vec<String> = ports.iter().map(|p| p.port_name.clone()).collect();

        // Interactive selection
        Select::new("Select a serial port:", port_names)
            .prompt()
            .expect("Failed to select port")
    });

    println!("Using port: {}", port_name);

    // Open serial port
    let port = serialport::new(&port_name, BAUD_RATE)
        .timeout(Duration::from_millis(SERIAL_TIMEOUT_MS))
        .open()
        .expect("Failed to open serial port");

    let port = PortWrapper(port);

    // Create a PSU object
    let mut psu: XyPsu<PortWrapper> = XyPsu::new(port, MODBUS_UNIT_ID).expect("Invalid unit ID");
    let clock = Clock(std::time::Instant::now());

    // Wait for the first refresh of the register map
    if !clock.run_until(&mut psu, 2000, |psu| psu.registers_updated()) {
        eprintln!("PSU did not answer");
        std::process::exit(1);
    }
    println!(
        "Product model: {} firmware: {}",
        psu.read_register(XyRegister::Model),
        psu.read_register(XyRegister::Version)
    );

    // Queue up the new settings, they go out one per transmit slot
    psu.enqueue_register_write(XyRegister::VSet, OUTPUT_CENTIVOLTS);
    psu.enqueue_register_write(XyRegister::ISet, CURRENT_LIMIT_CENTIAMPS);
    psu.enqueue_register_write(XyRegister::OnOff, State::On);
    clock.run_until(&mut psu, 1000, |psu| psu.tx_idle());
    println!("Output enabled at {}V", OUTPUT_CENTIVOLTS as f32 / 100.0);

    // Wait for output to stabilize
    clock.run_for(&mut psu, STABILIZATION_DELAY_MS);

    println!(
        "Measured output: {:.2}V {:.2}A {:.1}W",
        psu.read_register(XyRegister::VOut) as f32 / 100.0,
        psu.read_register(XyRegister::IOut) as f32 / 100.0,
        psu.read_register(XyRegister::Power) as f32 / 10.0,
    );

    // Read back preset group 0
    println!("\n--- Preset group 0 ---");
    psu.request_preset(PresetGroup::Group0).expect("Failed to request preset");
    let mut preset = None;
    clock.run_until(&mut psu, 1000, |psu| {
        preset = psu.poll_preset_ready();
        preset.is_some() || psu.preset_state() == PagerState::Send
    });
    match preset {
        Some(bank) => println!("{:#?}", bank),
        None => println!("Preset read failed, last exception: {:?}", psu.last_exception()),
    }

    psu.enqueue_register_write(XyRegister::OnOff, State::Off);
    clock.run_until(&mut psu, 1000, |psu| psu.tx_idle());
    println!("Output disabled");
    println!("{:#?}", psu.stats());
}
