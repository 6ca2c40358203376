//! Dry run of a preset against the classes of a jar.
//!
//! ```text
//! jar_patch_check JAR_PATH [AGENT_OPTIONS]
//! ```
//!
//! Every targeted class is patched in memory and the outcome counted; nothing
//! is written. `-v` turns on debug logs, `-vv` trace logs.

use std::env;
use std::fs::File;
use std::io::Read;
use std::time::Instant;

use tracing::{error, Level};
use zip::ZipArchive;

use classpatch::{presets, PatcherConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut verbosity = 0;
    let mut positional = Vec::new();
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "-v" => verbosity += 1,
            "-vv" => verbosity += 2,
            _ => positional.push(arg),
        }
    }
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).with_writer(std::io::stderr).init();

    let jar_path = positional.first().ok_or("usage: jar_patch_check JAR_PATH [AGENT_OPTIONS]")?;
    let config: PatcherConfig = positional.get(1).map_or("", String::as_str).parse()?;
    let manager = presets::for_preset(config.preset)?.build();

    let file = File::open(jar_path)?;
    let mut zip = ZipArchive::new(file)?;

    let mut class_files: u64 = 0;
    let mut targeted: u64 = 0;
    let mut patched: u64 = 0;
    let mut unchanged: u64 = 0;
    let mut failed: u64 = 0;
    let mut bytes_in: u64 = 0;
    let mut bytes_out: u64 = 0;

    let start = Instant::now();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(class_name) = entry.name().strip_suffix(".class").map(str::to_owned) else {
            continue;
        };
        class_files += 1;
        if !manager.is_target(&class_name) {
            continue;
        }
        targeted += 1;

        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        bytes_in += bytes.len() as u64;
        match manager.apply(&class_name, &bytes) {
            Ok(Some(out)) => {
                patched += 1;
                bytes_out += out.len() as u64;
            }
            Ok(None) => unchanged += 1,
            Err(err) => {
                failed += 1;
                error!(class = %class_name, error = %err, "patch failed");
            }
        }
    }
    let dur = start.elapsed();

    println!("jar_path={}", jar_path);
    println!("preset={:?}", config.preset);
    println!("class_files={}", class_files);
    println!("targeted={} of {} target classes", targeted, manager.target_classes().len());
    println!("patched={} unchanged={} failed={}", patched, unchanged, failed);
    println!("bytes_in={} bytes_out={}", bytes_in, bytes_out);
    println!("time_ms={:.3}", dur.as_secs_f64() * 1000.0);

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
