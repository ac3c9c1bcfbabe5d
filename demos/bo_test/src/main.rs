use std::fs::File;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::exit;

use anyhow::bail;
use anyhow::Context;
use clap::Parser;
use clap::Subcommand;
use drm_vendor::open_device;
use drm_vendor::BufferObject;
use drm_vendor::Device;
use drm_vendor::DeviceBuilder;
use drm_vendor::DrmBoDebug;
use drm_vendor::DrmBoDebugHandler;
use drm_vendor::SystemGem;
use drm_vendor::Vendor;
use log::error;
use log::info;
use log::LevelFilter;

mod pattern;

use pattern::Checkerboard;

#[derive(Parser, Debug)]
#[command(version, about = "Exercises buffer objects of a vendor DRM driver")]
struct Args {
    /// mediatek, exynos, rockchip, or system for the memfd-backed software backend
    #[arg(long, default_value = "system")]
    vendor: String,

    /// Device node to use instead of searching /dev/dri for the vendor's driver
    #[arg(long)]
    device: Option<PathBuf>,

    /// Allocation flags passed to the driver untouched
    #[arg(long, default_value_t = 0, value_parser = parse_flags)]
    flags: u32,

    #[arg(long, default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Export a buffer by name, import it again and check both views agree
    Share {
        #[arg(long, default_value_t = 4096)]
        size: u64,

        #[arg(long, default_value_t = 0x5a)]
        marker: u8,
    },
    /// Fill a source buffer with a checkerboard and copy it into a destination buffer
    Fill {
        #[arg(long, default_value_t = 640)]
        width: u32,

        #[arg(long, default_value_t = 480)]
        height: u32,

        #[arg(long, default_value_t = 32)]
        tile: u32,
    },
}

fn parse_flags(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid flags '{s}': {e}"))
}

enum Backend {
    Hardware(Vendor, File),
    System,
}

fn open_backend(args: &Args) -> anyhow::Result<Backend> {
    if args.vendor == "system" {
        return Ok(Backend::System);
    }

    let vendor: Vendor = args.vendor.parse()?;
    let file = match &args.device {
        Some(path) => OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?,
        None => open_device(vendor.driver_name())
            .with_context(|| format!("no device for {vendor}"))?,
    };

    Ok(Backend::Hardware(vendor, file))
}

fn share_test(device: &Device<'_>, flags: u32, size: u64, marker: u8) -> anyhow::Result<()> {
    let mut bo = BufferObject::create(device, size, flags).context("failed to create buffer")?;
    bo.map().context("failed to map buffer")?;
    bo.write_obj(0, marker)?;

    let name = bo.name().context("failed to export buffer")?;
    info!("handle {} exported as name {}", bo.handle(), name);

    let mut imported = BufferObject::from_name(device, name).context("failed to import buffer")?;
    imported.map().context("failed to map imported buffer")?;
    let read: u8 = imported.read_obj(0)?;

    info!(
        "handle {} imported as handle {}, read {:#x}",
        bo.handle(),
        imported.handle(),
        read
    );

    if read != marker {
        bail!("marker mismatch: wrote {:#x}, read {:#x}", marker, read);
    }
    Ok(())
}

fn fill_test(
    device: &Device<'_>,
    flags: u32,
    width: u32,
    height: u32,
    tile: u32,
) -> anyhow::Result<()> {
    let pattern = Checkerboard::new(width, height, tile)?;
    let bytes = pattern.as_bytes();

    let mut src = device.create_bo(bytes.len() as u64, flags)?;
    let mut dst = device.create_bo(bytes.len() as u64, flags)?;

    src.write_slice(0, bytes)?;

    let mut staging = vec![0u8; bytes.len()];
    src.read_slice(0, &mut staging)?;
    dst.write_slice(0, &staging)?;

    let mut check = vec![0u8; bytes.len()];
    dst.read_slice(0, &mut check)?;
    if check != bytes {
        bail!("destination does not match the source pattern");
    }

    info!(
        "copied {}x{} checkerboard ({} bytes) from handle {} to handle {}",
        width,
        height,
        bytes.len(),
        src.handle(),
        dst.handle()
    );
    Ok(())
}

fn run(args: Args) -> anyhow::Result<()> {
    let backend = open_backend(&args)?;

    let builder = DeviceBuilder::new().set_debug_handler(Some(DrmBoDebugHandler::new(
        |debug: DrmBoDebug| error!("teardown of handle {} failed: {}", debug.handle, debug.message),
    )));
    let device = match &backend {
        Backend::Hardware(vendor, file) => builder.build(file, *vendor)?,
        Backend::System => builder.build_with_backend(SystemGem::init()?),
    };
    info!("using {:?}", device);

    match args.command {
        Command::Share { size, marker } => share_test(&device, args.flags, size, marker),
        Command::Fill {
            width,
            height,
            tile,
        } => fill_test(&device, args.flags, width, height, tile),
    }
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .parse_default_env()
        .init();

    if let Err(e) = run(args) {
        error!("{:#}", e);
        exit(1);
    }
}
