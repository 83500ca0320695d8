//! Host-side development harness for the Videocart firmware core.
//!
//! Loads a .bin/.chf image (or a directory of them) exactly the way the
//! firmware would, prints the resulting memory map, and can replay a
//! recorded ROMC bus trace against the loaded cartridge. Useful for checking
//! an image before burning it to storage, and for debugging dispatcher
//! behavior against traces captured from real hardware.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::Parser;

use vcart_core::chips::ChipType;
use vcart_core::file_cache::DirectoryCache;
use vcart_core::hal::{BusLines, Cp437Encoder, Delay, EntropySource, Storage, StorageEntry};
use vcart_core::logging::{LogCategory, LogConfig, LogLevel};
use vcart_core::romc::ROMC_IDLE;
use vcart_core::Videocart;

#[derive(Parser)]
#[command(name = "vcart", about = "Videocart firmware core harness")]
struct Args {
    /// Image file (.bin / .chf) or a directory of images
    path: PathBuf,

    /// Directory entry to load when PATH is a directory
    #[arg(long, default_value_t = 0)]
    index: u16,

    /// Replay a bus trace: one "ROMC DBUS" hex pair per line
    #[arg(long)]
    trace: Option<PathBuf>,

    /// Dump the save-state JSON to this file
    #[arg(long)]
    save: Option<PathBuf>,

    /// Core log spec: LEVEL or CATEGORY=LEVEL (repeatable)
    #[arg(long = "log")]
    log: Vec<String>,

    /// Suppress the directory listing and memory map
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

/// Flat directory on the host filesystem.
struct DirStorage {
    root: PathBuf,
}

impl Storage for DirStorage {
    fn entries(&mut self) -> Vec<StorageEntry> {
        let mut entries: Vec<StorageEntry> = match fs::read_dir(&self.root) {
            Ok(dir) => dir
                .filter_map(|entry| entry.ok())
                .map(|entry| StorageEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    is_dir: entry.path().is_dir(),
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    fn read(&mut self, name: &str) -> Option<Vec<u8>> {
        fs::read(self.root.join(name)).ok()
    }
}

/// ASCII passthrough stand-in for the firmware's CP437 table.
struct AsciiCp437;

impl Cp437Encoder for AsciiCp437 {
    fn encode(&self, source: &str, dest: &mut [u8]) -> usize {
        let mut written = 0;
        for ch in source.chars() {
            if written == dest.len() {
                break;
            }
            dest[written] = if ch.is_ascii() && !ch.is_ascii_control() {
                ch as u8
            } else {
                b'?'
            };
            written += 1;
        }
        written
    }
}

/// xorshift bits seeded from the wall clock; stands in for the board's ring
/// oscillator.
struct HostEntropy(u64);

impl HostEntropy {
    fn seeded() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or(0x9E37_79B9_7F4A_7C15);
        Self(nanos | 1)
    }
}

impl EntropySource for HostEntropy {
    fn random_bit(&mut self) -> bool {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0 & 1 != 0
    }
}

/// Blink pacing is meaningless on a workstation; don't actually sleep.
struct NoDelay;

impl Delay for NoDelay {
    fn delay_ms(&mut self, _ms: u32) {}
}

/// Replays a recorded (ROMC, data) trace and records every byte the
/// cartridge drives back.
struct TraceBus {
    script: VecDeque<(u8, u8)>,
    current: (u8, u8),
    cycle: usize,
    driven: Vec<(usize, u8, u8)>,
}

impl TraceBus {
    fn new(script: Vec<(u8, u8)>) -> Self {
        Self {
            script: script.into(),
            current: (ROMC_IDLE, 0),
            cycle: 0,
            driven: Vec::new(),
        }
    }
}

impl BusLines for TraceBus {
    fn sample_romc(&mut self) -> u8 {
        self.current.0
    }

    fn sample_dbus(&mut self) -> u8 {
        self.current.1
    }

    fn drive_dbus(&mut self, value: u8) {
        self.driven.push((self.cycle, self.current.0, value));
    }

    fn release_dbus(&mut self) {}

    fn wait_write_rising(&mut self) {
        if let Some(next) = self.script.pop_front() {
            self.current = next;
            self.cycle += 1;
        }
    }

    fn wait_write_falling(&mut self) {}

    fn bus_present(&mut self) -> bool {
        !self.script.is_empty()
    }

    fn set_intrq(&mut self, _raised: bool) {}
}

fn apply_log_specs(specs: &[String]) -> Result<()> {
    let config = LogConfig::global();
    for spec in specs {
        match spec.split_once('=') {
            Some((category, level)) => {
                let category = LogCategory::from_name(category)
                    .with_context(|| format!("unknown log category: {}", category))?;
                let level = LogLevel::from_str(level)
                    .with_context(|| format!("unknown log level: {}", level))?;
                config.set_level(category, level);
            }
            None => {
                let level = LogLevel::from_str(spec)
                    .with_context(|| format!("unknown log level: {}", spec))?;
                config.set_global_level(level);
            }
        }
    }
    Ok(())
}

fn parse_trace(path: &PathBuf) -> Result<Vec<(u8, u8)>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read trace {}", path.display()))?;
    let mut script = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let (Some(romc), Some(dbus)) = (tokens.next(), tokens.next()) else {
            bail!("trace line {}: expected \"ROMC DBUS\"", number + 1);
        };
        let romc = u8::from_str_radix(romc, 16)
            .with_context(|| format!("trace line {}: bad ROMC", number + 1))?;
        let dbus = u8::from_str_radix(dbus, 16)
            .with_context(|| format!("trace line {}: bad data byte", number + 1))?;
        script.push((romc & 0x1F, dbus));
    }
    Ok(script)
}

fn chip_name(id: u8) -> String {
    match ChipType::from_id(id) {
        ChipType::Reserved if id != ChipType::RESERVED_ID => format!("RESERVED (id {})", id),
        chip => format!("{:?}", chip).to_uppercase(),
    }
}

/// Print the attribute plane as coalesced regions.
fn print_memory_map(cart: &Videocart) {
    println!("memory map:");
    let mut start: u32 = 0;
    let mut current = cart.memory.attribute_id(0);
    for address in 1..=0x10000u32 {
        let id = if address == 0x10000 {
            None
        } else {
            Some(cart.memory.attribute_id(address as u16))
        };
        if id != Some(current) {
            if current != ChipType::RESERVED_ID {
                println!(
                    "  [{:#06x}, {:#06x})  {}",
                    start,
                    address,
                    chip_name(current)
                );
            }
            start = address;
            if let Some(id) = id {
                current = id;
            }
        }
    }
}

fn print_ports(cart: &Videocart) {
    let installed: Vec<u8> = (0..=255u8)
        .filter(|&port| cart.ports.is_installed(port))
        .collect();
    if installed.is_empty() {
        println!("ports: none");
        return;
    }
    let list: Vec<String> = installed
        .iter()
        .map(|port| format!("{:#04x}", port))
        .collect();
    println!("ports: {}", list.join(" "));
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    apply_log_specs(&args.log)?;

    let entropy = Rc::new(RefCell::new(HostEntropy::seeded()));
    let mut cart = Videocart::new(entropy);

    let mut storage = if args.path.is_dir() {
        DirStorage {
            root: args.path.clone(),
        }
    } else {
        let root = args
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(|parent| parent.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        DirStorage { root }
    };

    let cache = DirectoryCache::build(&mut storage, &AsciiCp437);
    if !args.quiet {
        println!("directory ({} entries):", cache.len());
        for (index, record) in cache.iter().enumerate() {
            println!("  {:3}  {}", index, record.title_text());
        }
    }
    cart.set_directory(cache);

    let image = if args.path.is_dir() {
        let record = cart
            .directory()
            .get(args.index)
            .with_context(|| format!("no directory entry {}", args.index))?
            .clone();
        if !record.is_file {
            bail!("entry {} ({}) is a directory", args.index, record.title_text());
        }
        storage.read(&record.name)
    } else {
        fs::read(&args.path).ok()
    };

    cart.load_game(image.as_deref(), &mut NoDelay);
    if cart.led.toggle_count() > 0 {
        bail!("image rejected by the loader (LED blink code raised)");
    }

    if !args.quiet {
        print_memory_map(&cart);
        print_ports(&cart);
    }

    if let Some(trace_path) = &args.trace {
        let script = parse_trace(trace_path)?;
        let cycles = script.len();
        let mut bus = TraceBus::new(script);
        cart.run(&mut bus, &mut storage, &mut NoDelay);

        println!("trace: {} cycles, {} drives", cycles, bus.driven.len());
        for (cycle, romc, value) in &bus.driven {
            println!("  cycle {:5}  romc {:02X}  drove {:02X}", cycle, romc, value);
        }
        println!(
            "registers: pc0={:04X} pc1={:04X} dc0={:04X} dc1={:04X}",
            cart.regs.pc0, cart.regs.pc1, cart.regs.dc0, cart.regs.dc1
        );
    }

    if let Some(save_path) = &args.save {
        let state = cart.save_state();
        fs::write(save_path, serde_json::to_string_pretty(&state)?)
            .with_context(|| format!("cannot write {}", save_path.display()))?;
        if !args.quiet {
            println!("save state written to {}", save_path.display());
        }
    }

    Ok(())
}
