mod updater;

use clap::{Args, Parser, Subcommand};
use clap_num::maybe_hex_range;
use colored::Colorize;
use panic_message::panic_message;
use std::{
    fs::File,
    io::{stdout, Read, Write},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
    {panic, process},
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected devices ready for a firmware update
    List,

    /// Print metadata of a UF2 firmware file
    Info(InfoArgs),

    /// Flatten a UF2 firmware file into a raw binary image
    Extract(ExtractArgs),

    /// Stream a UF2 firmware file to a device over a serial port
    Send(SendArgs),
}

#[derive(Args)]
struct InfoArgs {
    /// Path to the firmware file
    firmware: PathBuf,
}

#[derive(Args)]
struct ExtractArgs {
    /// Path to the firmware file
    firmware: PathBuf,

    /// Path to the output file
    output: PathBuf,

    /// Emulated flash capacity in bytes
    #[arg(long, value_name = "bytes", value_parser = |s: &str| maybe_hex_range::<u32>(s, 4096, 0x1000_0000), default_value = "0x200000")]
    capacity: u32,
}

#[derive(Args)]
struct SendArgs {
    /// Path to the firmware file
    firmware: PathBuf,

    /// Serial port of the target device (autodetected when omitted)
    #[arg(short, long)]
    port: Option<String>,

    /// Transfer chunk length in bytes
    #[arg(long, value_name = "bytes", value_parser = |s: &str| maybe_hex_range::<usize>(s, 1, 0x10000), default_value = "0x1000")]
    chunk: usize,
}

fn main() {
    let cli = Cli::parse();

    #[cfg(not(debug_assertions))]
    {
        panic::set_hook(Box::new(|_| {}));
    }

    match panic::catch_unwind(|| handle_command(&cli.command)) {
        Ok(_) => {}
        Err(payload) => {
            eprintln!("{}", panic_message(&payload).red());
            process::exit(1);
        }
    }
}

fn handle_command(command: &Commands) {
    let result = match command {
        Commands::List => handle_list_command(),
        Commands::Info(args) => handle_info_command(args),
        Commands::Extract(args) => handle_extract_command(args),
        Commands::Send(args) => handle_send_command(args),
    };
    match result {
        Ok(()) => {}
        Err(error) => panic!("{error}"),
    };
}

fn handle_list_command() -> Result<(), updater::Error> {
    let devices = updater::list_devices()?;

    if devices.is_empty() {
        println!("No devices found");
        return Ok(());
    }

    println!("{}", "Found devices:".bold());
    for (i, d) in devices.iter().enumerate() {
        println!(" {i}: [{}] at port [{}]", d.serial_number, d.port);
    }

    Ok(())
}

fn handle_info_command(args: &InfoArgs) -> Result<(), updater::Error> {
    let (mut firmware_file, _, firmware_length) = open_file(&args.firmware)?;

    let mut firmware = vec![0u8; firmware_length];
    firmware_file.read_exact(&mut firmware)?;

    let metadata = updater::firmware::verify(&firmware)?;
    println!("{}", "Firmware metadata:".bold());
    println!("{}", metadata);

    Ok(())
}

fn handle_extract_command(args: &ExtractArgs) -> Result<(), updater::Error> {
    let (mut firmware_file, firmware_name, firmware_length) = open_file(&args.firmware)?;

    let mut firmware = vec![0u8; firmware_length];
    firmware_file.read_exact(&mut firmware)?;

    let metadata = updater::firmware::verify(&firmware)?;
    println!("{}", "Firmware metadata:".bold());
    println!("{}", metadata);

    let mut updater = updater::Updater::new(updater::MemoryFlash::new(args.capacity));

    let event = log_wait(format!("Flattening firmware [{firmware_name}]"), || {
        updater.feed(&firmware)
    })?;
    if event != updater::WriteEvent::Complete {
        return Err(updater::Error::new(
            format!(
                "Firmware stream ended before the final block, updater status: {}",
                updater.status()
            )
            .as_str(),
        ));
    }

    let erased: u32 = updater
        .flash()
        .erase_operations()
        .iter()
        .map(|(_, length)| *length)
        .sum();
    let programmed = updater.flash().program_operations().len();
    println!(
        "Update complete: erased {erased} bytes, programmed {programmed} blocks, device restart requested"
    );

    let image_length = metadata.image_length() as usize;
    let flash = updater.into_flash();

    let (mut output_file, output_name) = create_file(&args.output)?;
    output_file.write_all(&flash.data()[0..image_length])?;
    println!("Raw image saved to [{output_name}] ({image_length} bytes)");

    Ok(())
}

fn handle_send_command(args: &SendArgs) -> Result<(), updater::Error> {
    let (mut firmware_file, firmware_name, firmware_length) = open_file(&args.firmware)?;

    let mut firmware = vec![0u8; firmware_length];
    firmware_file.read_exact(&mut firmware)?;

    updater::firmware::verify(&firmware)?;

    let port = match args.port.clone() {
        Some(port) => port,
        None => autodetect_port()?,
    };

    let mut link = updater::SerialLink::open(&port)?;
    println!("Sending firmware [{firmware_name}] to device at port [{port}]");

    let exit = setup_exit_flag();
    let mut sent = 0;
    for chunk in firmware.chunks(args.chunk) {
        if exit.load(Ordering::Relaxed) {
            println!();
            println!(
                "{}",
                "Transfer interrupted, the device was left mid-update and needs a reset".yellow()
            );
            return Err(updater::Error::new("Firmware transfer aborted"));
        }
        link.send(chunk)?;
        sent += chunk.len();
        print!("\rSending: {}%", 100 * sent / firmware.len());
        stdout().flush()?;
        echo_device_console(&mut link)?;
    }
    println!();

    // The device programs the final block and restarts, which drops the CDC
    // port. Echo whatever console text it manages to print until then.
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if echo_device_console(&mut link).is_err() {
            break;
        }
    }

    println!(
        "Firmware sent ({} bytes), device restarts when the update finishes",
        firmware.len()
    );

    Ok(())
}

fn echo_device_console(link: &mut updater::SerialLink) -> Result<(), updater::Error> {
    let text = link.drain_console()?;
    if !text.is_empty() {
        print!("{}", String::from_utf8_lossy(&text));
        stdout().flush()?;
    }
    Ok(())
}

fn autodetect_port() -> Result<String, updater::Error> {
    let devices = updater::list_devices()?;
    match devices.len() {
        0 => Err(updater::Error::new(
            "No devices found, specify the serial port manually",
        )),
        1 => Ok(devices[0].port.clone()),
        _ => Err(updater::Error::new(
            "Multiple devices found, specify the serial port manually",
        )),
    }
}

fn log_wait<F: FnOnce() -> Result<T, E>, T, E>(message: String, operation: F) -> Result<T, E> {
    print!("{}... ", message);
    stdout().flush().unwrap();
    let result = operation();
    println!("done");
    result
}

fn open_file(path: &PathBuf) -> Result<(File, String, usize), updater::Error> {
    let name: String = path.file_name().unwrap().to_string_lossy().to_string();
    let file = File::open(path)?;
    let length = file.metadata()?.len() as usize;
    Ok((file, name, length))
}

fn create_file(path: &PathBuf) -> Result<(File, String), updater::Error> {
    let name: String = path.file_name().unwrap().to_string_lossy().to_string();
    let file = File::create(path)?;
    Ok((file, name))
}

fn setup_exit_flag() -> Arc<AtomicBool> {
    let exit_flag = Arc::new(AtomicBool::new(false));
    let handler_exit_flag = exit_flag.clone();

    ctrlc::set_handler(move || {
        handler_exit_flag.store(true, Ordering::Relaxed);
    })
    .unwrap();

    exit_flag
}
