//! Developer tool for the memload loader.
//!
//! `inspect` dumps the headers of a PE32+ image on any host (format layer
//! only); `run` feeds a DLL file's bytes through the in-memory loader and
//! optionally resolves and calls an export, which needs a 64-bit Windows
//! host.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use memload_core::PeImage;

const DIRECTORY_NAMES: [&str; 16] = [
    "export",
    "import",
    "resource",
    "exception",
    "certificate",
    "basereloc",
    "debug",
    "architecture",
    "globalptr",
    "tls",
    "loadconfig",
    "boundimport",
    "iat",
    "delayimport",
    "comdescriptor",
    "reserved",
];

#[derive(Parser, Debug)]
#[command(name = "memload-cli", version, about = "In-memory PE32+ module loader tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Print headers, data directories and sections of a PE32+ image
    Inspect {
        /// Input PE file path
        input: PathBuf,
    },
    /// Load a DLL file through the in-memory loader (Windows only)
    Run {
        /// Input DLL file path
        input: PathBuf,
        /// Export name to resolve after loading
        #[arg(short, long)]
        resolve: Option<String>,
        /// Call the resolved export as `fn() -> i32` and print the result
        #[arg(long, requires = "resolve")]
        call: bool,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    match Cli::parse().command {
        Command::Inspect { input } => inspect(&input),
        Command::Run {
            input,
            resolve,
            call,
        } => run(&input, resolve.as_deref(), call),
    }
}

fn read_file(path: &Path) -> Option<Vec<u8>> {
    match fs::read(path) {
        Ok(data) => Some(data),
        Err(err) => {
            eprintln!("error: reading {}: {err}", path.display());
            None
        }
    }
}

fn inspect(path: &Path) -> ExitCode {
    let Some(data) = read_file(path) else {
        return ExitCode::FAILURE;
    };
    let pe = match PeImage::parse(&data) {
        Ok(pe) => pe,
        Err(err) => {
            eprintln!("error: {}: {err}", path.display());
            return ExitCode::FAILURE;
        }
    };

    let optional = pe.optional_header();
    println!("{}", path.display());
    println!("  machine            AMD64");
    println!("  image base         {:#x}", optional.image_base);
    println!("  size of image      {:#x}", optional.size_of_image);
    println!("  size of headers    {:#x}", optional.size_of_headers);
    println!("  section alignment  {:#x}", optional.section_alignment);
    println!("  file alignment     {:#x}", optional.file_alignment);
    println!("  entry point rva    {:#x}", optional.address_of_entry_point);

    println!("  directories:");
    for (index, name) in DIRECTORY_NAMES.iter().enumerate() {
        if let Some(dir) = pe.data_directory(index) {
            println!(
                "    {name:<14} rva {:#010x}  size {:#x}",
                dir.virtual_address, dir.size
            );
        }
    }

    println!("  sections:");
    for section in pe.sections() {
        println!(
            "    {:<8} rva {:#010x}  vsize {:#08x}  raw {:#08x} @ {:#08x}  flags {:#010x}",
            section.name_str(),
            section.virtual_address,
            section.misc,
            section.size_of_raw_data,
            section.pointer_to_raw_data,
            section.characteristics,
        );
    }
    ExitCode::SUCCESS
}

#[cfg(all(target_os = "windows", target_arch = "x86_64"))]
fn run(path: &Path, resolve: Option<&str>, call: bool) -> ExitCode {
    let Some(data) = read_file(path) else {
        return ExitCode::FAILURE;
    };
    let module = match memload::load(&data) {
        Ok(module) => module,
        Err(err) => {
            eprintln!("error: loading {}: {err}", path.display());
            return ExitCode::FAILURE;
        }
    };
    println!("loaded at {:p}", module.base());

    if let Some(name) = resolve {
        let address = match module.resolve(name) {
            Ok(address) => address,
            Err(err) => {
                eprintln!("error: {err}");
                return ExitCode::FAILURE;
            }
        };
        println!("{name} -> {address:p}");
        if call {
            let function: unsafe extern "system" fn() -> i32 =
                unsafe { core::mem::transmute(address) };
            println!("{name}() = {}", unsafe { function() });
        }
    }
    ExitCode::SUCCESS
}

#[cfg(not(all(target_os = "windows", target_arch = "x86_64")))]
fn run(_path: &Path, _resolve: Option<&str>, _call: bool) -> ExitCode {
    eprintln!("error: `run` needs a 64-bit Windows host");
    ExitCode::FAILURE
}
