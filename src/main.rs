//! CLI entry point: parses mount options, builds the caches and recursion
//! state, probes every top-level archive under the source root, then hands
//! off to `fuser::mount2`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{crate_version, Arg, ArgAction, Command};
use fuser::MountOption;
use log::{info, warn, LevelFilter};

use rarfs::archive::decoder::UnrarDecoder;
use rarfs::archive::prober::archive_virtual_root;
use rarfs::archive::volume::VolumeResolver;
use rarfs::config::ArchiveConfigTable;
use rarfs::fs::RarFs;
use rarfs::options::{Options, DEFAULT_MAX_UNPACK_SIZE};
use rarfs::recursion::RecursionState;
use rarfs::Caches;

fn main() {
    let matches = Command::new("rarfs")
        .version(crate_version!())
        .about("Mounts RAR archives under a source directory as a read-only filesystem")
        .arg(Arg::new("source").required(true).help("Directory tree to scan for archives"))
        .arg(Arg::new("mountpoint").required(true).help("Where to mount the filesystem"))
        .arg(Arg::new("v").short('v').action(ArgAction::Count).help("Increase logging verbosity"))
        .arg(Arg::new("seek-length").long("seek-length").default_value("16384"))
        .arg(Arg::new("save-eof").long("save-eof").action(ArgAction::SetTrue))
        .arg(Arg::new("direct-io").long("direct-io").action(ArgAction::SetTrue))
        .arg(Arg::new("flat-only").long("flat-only").action(ArgAction::SetTrue))
        .arg(Arg::new("no-idx-mmap").long("no-idx-mmap").action(ArgAction::SetTrue))
        .arg(Arg::new("worker-threads").long("worker-threads").default_value("4"))
        .arg(Arg::new("no-recursive").long("no-recursive").action(ArgAction::SetTrue))
        .arg(Arg::new("recursion-depth").long("recursion-depth").default_value("10"))
        .arg(Arg::new("max-unpack-size").long("max-unpack-size").default_value(
            Box::leak(DEFAULT_MAX_UNPACK_SIZE.to_string().into_boxed_str()) as &str,
        ))
        .arg(Arg::new("fake-inode-generation").long("fake-inode-generation").action(ArgAction::SetTrue))
        .arg(Arg::new("decoder-timeout-secs").long("decoder-timeout-secs").default_value("30"))
        .arg(Arg::new("mount-option").short('o').long("mount-option").action(ArgAction::Append))
        .get_matches();

    let verbosity = matches.get_count("v");
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::builder().format_timestamp_nanos().filter_level(level).init();

    let source_root = PathBuf::from(matches.get_one::<String>("source").unwrap());
    let mount_point = PathBuf::from(matches.get_one::<String>("mountpoint").unwrap());
    let extra_mount_options: Vec<String> = matches
        .get_many::<String>("mount-option")
        .map(|vals| vals.cloned().collect())
        .unwrap_or_default();

    let options = match Options::new(
        source_root.clone(),
        mount_point.clone(),
        parse_arg(&matches, "seek-length", 16384),
        matches.get_flag("save-eof"),
        matches.get_flag("direct-io"),
        matches.get_flag("flat-only"),
        matches.get_flag("no-idx-mmap"),
        parse_arg(&matches, "worker-threads", 4),
        !matches.get_flag("no-recursive"),
        parse_arg(&matches, "recursion-depth", 10),
        parse_arg(&matches, "max-unpack-size", DEFAULT_MAX_UNPACK_SIZE),
        matches.get_flag("fake-inode-generation"),
        extra_mount_options,
        Duration::from_secs(parse_arg(&matches, "decoder-timeout-secs", 30)),
    ) {
        Ok(options) => Arc::new(options),
        Err(e) => {
            eprintln!("rarfs: {e}");
            std::process::exit(1);
        }
    };

    let config = match ArchiveConfigTable::load(&source_root) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("rarfs: {e}");
            std::process::exit(1);
        }
    };
    let caches = Caches::new(config);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(options.worker_threads)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("rarfs: failed to start async runtime: {e}");
            std::process::exit(1);
        }
    };

    let decoder = Arc::new(UnrarDecoder);
    let recursion = RecursionState::new(options.max_unpack_size);

    if options.flat_only {
        info!("flat-only: archives are left as passthrough files, none materialized as directories");
    } else {
        for archive_path in discover_first_volumes(&source_root) {
            let virtual_root = archive_virtual_root(&archive_path, &source_root);
            match recursion.mount_archive(&caches, &options, decoder.as_ref(), &archive_path, &virtual_root) {
                Ok(()) => info!("mounted {} at /{virtual_root}", archive_path.display()),
                Err(e) => warn!("skipping {}: {e}", archive_path.display()),
            }
        }
    }

    let mut mount_options: Vec<MountOption> =
        vec![MountOption::RO, MountOption::FSName("rarfs".to_string())];
    mount_options.extend(options.extra_mount_options.iter().cloned().map(MountOption::CUSTOM));

    let mut mount_config = fuser::Config::default();
    mount_config.mount_options = mount_options;

    let fs = RarFs::new(caches, Arc::clone(&options), decoder, runtime.handle().clone());
    if let Err(e) = fuser::mount2(fs, &mount_point, &mount_config) {
        eprintln!("rarfs: mount failed: {e}");
        std::process::exit(2);
    }
}

fn parse_arg<T: std::str::FromStr>(matches: &clap::ArgMatches, name: &str, default: T) -> T {
    matches
        .get_one::<String>(name)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Walks `root` for `.rar`-family files, yielding only each archive set's
/// first volume so continuation volumes are never probed as their own
/// top-level archive.
fn discover_first_volumes(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    walk(root, &mut found);
    found
}

fn walk(dir: &Path, found: &mut Vec<PathBuf>) {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in read_dir.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            walk(&path, found);
            continue;
        }
        if !file_type.is_file() {
            continue;
        }
        let Some(resolver) = VolumeResolver::detect(&path) else {
            continue;
        };
        if resolver.volume_path(0).as_deref() == Some(path.as_path()) {
            found.push(path);
        }
    }
}
