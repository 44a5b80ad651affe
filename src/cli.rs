// Command-line interface for oxidiff.
//
// Subcommands map onto the library: `diff` and `patch` pick single-file or
// directory mode on their own, `info` prints diff headers, `manifest`
// records and checks directory listings.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};

use crate::checksum::ChecksumKind;
use crate::compress::codec::Compression;
use crate::compress::decoder::{DEFAULT_CACHE_SIZE, MIN_CACHE_SIZE, PatchOptions};
use crate::compress::encoder::{DiffOptions, default_compression};
use crate::dir::header::DirDiffInfo;
use crate::dir::manifest::{Manifest, ManifestError};
use crate::dir::patch::MIN_OPEN_FILES;
use crate::dir::{DirDiffOptions, DirPatchOptions, DirPatcher, IgnoreList, dir_diff};
use crate::format::header::DiffHeader;
use crate::format::{DiffKind, detect};
use crate::hash::config_for_level;
use crate::io::{BUF_SIZE, diff_file, patch_file};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

const DEFAULT_LEVEL: u32 = 6;
const DEFAULT_MAX_OPEN_FILES: usize = 48;

// ---------------------------------------------------------------------------
// Byte size parsing (supports K, M, G suffixes)
// ---------------------------------------------------------------------------

fn parse_byte_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".into());
    }
    let (num_part, multiplier) = match s.as_bytes().last() {
        Some(b'k' | b'K') => (&s[..s.len() - 1], 1024u64),
        Some(b'm' | b'M') => (&s[..s.len() - 1], 1024 * 1024),
        Some(b'g' | b'G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1u64),
    };
    let num: u64 = num_part
        .trim()
        .parse()
        .map_err(|e| format!("invalid size '{s}': {e}"))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size overflow: '{s}'"))
}

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// Binary and directory diff/patch.
#[derive(Parser, Debug)]
#[command(
    name = "oxidiff",
    version,
    about = "Binary and directory diff/patch",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Force overwrite existing output files.
    #[arg(short = 'f', long, global = true)]
    force: bool,

    /// Quiet mode (suppress non-error output).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Output stats as JSON to stderr.
    #[arg(long = "json", global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Create a diff from OLD to NEW (files or directories).
    Diff(DiffArgs),
    /// Apply a diff to OLD, writing OUT.
    Patch(PatchArgs),
    /// Print the header of a diff.
    Info(InfoArgs),
    /// Create or verify a directory manifest.
    #[command(subcommand)]
    Manifest(ManifestCmd),
    /// Print build/configuration details.
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CompressArg {
    None,
    Zlib,
    Zstd,
    Lzma,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ChecksumArg {
    None,
    Adler32,
    Fadler64,
    Crc32,
    Sha256,
}

impl From<ChecksumArg> for ChecksumKind {
    fn from(arg: ChecksumArg) -> Self {
        match arg {
            ChecksumArg::None => ChecksumKind::None,
            ChecksumArg::Adler32 => ChecksumKind::Adler32,
            ChecksumArg::Fadler64 => ChecksumKind::Fadler64,
            ChecksumArg::Crc32 => ChecksumKind::Crc32,
            ChecksumArg::Sha256 => ChecksumKind::Sha256,
        }
    }
}

#[derive(Args, Debug)]
struct DiffArgs {
    /// Old file or directory.
    #[arg(value_hint = ValueHint::AnyPath)]
    old: PathBuf,

    /// New file or directory.
    #[arg(value_hint = ValueHint::AnyPath)]
    new: PathBuf,

    /// Diff output file.
    #[arg(value_hint = ValueHint::FilePath)]
    diff: PathBuf,

    /// Compression level (0-9); 1-3 use the block matcher.
    #[arg(long, short = 'l', value_parser = clap::value_parser!(u32).range(0..=9), default_value_t = DEFAULT_LEVEL)]
    level: u32,

    /// Section compressor (default: best available).
    #[arg(long, short = 'c', value_enum)]
    compress: Option<CompressArg>,

    /// Checksum plugin for directory diffs.
    #[arg(long, value_enum, default_value_t = ChecksumArg::Fadler64)]
    checksum: ChecksumArg,

    /// Minimum match length.
    #[arg(long = "min-match", short = 'm')]
    min_match: Option<usize>,

    /// Use the block matcher with this block size (supports K/M/G suffix).
    #[arg(long = "block-size", short = 'b', value_parser = parse_byte_size)]
    block_size: Option<u64>,

    /// Ignore patterns for directory diffs, `#`-separated (repeatable).
    #[arg(long)]
    ignore: Vec<String>,

    /// Write a directory diff even when both inputs are files.
    #[arg(long = "dir")]
    force_dir: bool,
}

#[derive(Args, Debug)]
struct PatchArgs {
    /// Old file or directory.
    #[arg(value_hint = ValueHint::AnyPath)]
    old: PathBuf,

    /// Diff file.
    #[arg(value_hint = ValueHint::FilePath)]
    diff: PathBuf,

    /// Output file or directory (omit with --in-place).
    #[arg(value_hint = ValueHint::AnyPath, required_unless_present = "in_place")]
    out: Option<PathBuf>,

    /// Patch the old directory in place.
    #[arg(long = "in-place", conflicts_with = "out")]
    in_place: bool,

    /// Reconstruction buffer size (supports K/M/G suffix).
    #[arg(long = "cache-size", value_parser = parse_byte_size, default_value_t = DEFAULT_CACHE_SIZE as u64)]
    cache_size: u64,

    /// Maximum files held open by a directory patch.
    #[arg(long = "max-open-files", default_value_t = DEFAULT_MAX_OPEN_FILES)]
    max_open_files: usize,

    /// Skip checksum verification.
    #[arg(long = "no-checksum")]
    no_checksum: bool,
}

#[derive(Args, Debug)]
struct InfoArgs {
    /// Diff file.
    #[arg(value_hint = ValueHint::FilePath)]
    diff: PathBuf,
}

#[derive(Subcommand, Debug)]
enum ManifestCmd {
    /// Record the listing and checksums of DIR.
    Create(ManifestCreateArgs),
    /// Check DIR against a saved manifest.
    Verify(ManifestVerifyArgs),
}

#[derive(Args, Debug)]
struct ManifestCreateArgs {
    #[arg(value_hint = ValueHint::AnyPath)]
    dir: PathBuf,

    /// Manifest output file.
    #[arg(value_hint = ValueHint::FilePath)]
    out: PathBuf,

    /// Per-file checksum plugin.
    #[arg(long, value_enum, default_value_t = ChecksumArg::Sha256)]
    checksum: ChecksumArg,

    /// Ignore patterns, `#`-separated (repeatable).
    #[arg(long)]
    ignore: Vec<String>,
}

#[derive(Args, Debug)]
struct ManifestVerifyArgs {
    #[arg(value_hint = ValueHint::AnyPath)]
    dir: PathBuf,

    /// Manifest file.
    #[arg(value_hint = ValueHint::FilePath)]
    manifest: PathBuf,
}

// ---------------------------------------------------------------------------
// Resolved command + options (flattened from Cli)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Diff,
    Patch,
    Info,
    ManifestCreate,
    ManifestVerify,
    Config,
}

#[derive(Debug)]
struct Options {
    command: Command,
    force: bool,
    quiet: bool,
    verbose: u8,
    json_output: bool,
    level: u32,
    compress: Option<CompressArg>,
    checksum: ChecksumKind,
    min_match: Option<usize>,
    block_size: Option<u64>,
    ignore: Vec<String>,
    force_dir: bool,
    in_place: bool,
    cache_size: u64,
    max_open_files: usize,
    no_checksum: bool,
    /// Old input, manifest directory, or diff for `info`.
    input: Option<PathBuf>,
    /// New input for `diff`, diff for `patch`, manifest for `manifest verify`.
    second: Option<PathBuf>,
    output: Option<PathBuf>,
}

impl Options {
    fn base(command: Command, cli: &Cli) -> Self {
        Self {
            command,
            force: cli.force,
            quiet: cli.quiet,
            verbose: cli.verbose.min(2),
            json_output: cli.json_output,
            level: DEFAULT_LEVEL,
            compress: None,
            checksum: ChecksumKind::default(),
            min_match: None,
            block_size: None,
            ignore: Vec::new(),
            force_dir: false,
            in_place: false,
            cache_size: DEFAULT_CACHE_SIZE as u64,
            max_open_files: DEFAULT_MAX_OPEN_FILES,
            no_checksum: false,
            input: None,
            second: None,
            output: None,
        }
    }
}

fn resolve_options(cli: Cli) -> Options {
    match &cli.command {
        Cmd::Diff(args) => Options {
            level: args.level,
            compress: args.compress,
            checksum: args.checksum.into(),
            min_match: args.min_match,
            block_size: args.block_size,
            ignore: args.ignore.clone(),
            force_dir: args.force_dir,
            input: Some(args.old.clone()),
            second: Some(args.new.clone()),
            output: Some(args.diff.clone()),
            ..Options::base(Command::Diff, &cli)
        },
        Cmd::Patch(args) => Options {
            in_place: args.in_place,
            cache_size: args.cache_size,
            max_open_files: args.max_open_files,
            no_checksum: args.no_checksum,
            input: Some(args.old.clone()),
            second: Some(args.diff.clone()),
            output: args.out.clone(),
            ..Options::base(Command::Patch, &cli)
        },
        Cmd::Info(args) => Options {
            input: Some(args.diff.clone()),
            ..Options::base(Command::Info, &cli)
        },
        Cmd::Manifest(ManifestCmd::Create(args)) => Options {
            checksum: args.checksum.into(),
            ignore: args.ignore.clone(),
            input: Some(args.dir.clone()),
            output: Some(args.out.clone()),
            ..Options::base(Command::ManifestCreate, &cli)
        },
        Cmd::Manifest(ManifestCmd::Verify(args)) => Options {
            input: Some(args.dir.clone()),
            second: Some(args.manifest.clone()),
            ..Options::base(Command::ManifestVerify, &cli)
        },
        Cmd::Config => Options::base(Command::Config, &cli),
    }
}

#[cfg(any(test, feature = "fuzzing"))]
pub fn fuzz_try_parse_args(args: &[String]) {
    let argv: Vec<String> = std::iter::once("oxidiff".to_string())
        .chain(args.iter().cloned())
        .collect();
    if let Ok(cli) = Cli::try_parse_from(argv) {
        let _ = resolve_options(cli);
    }
}

// ---------------------------------------------------------------------------
// Option helpers
// ---------------------------------------------------------------------------

fn compression_for(arg: Option<CompressArg>) -> Result<Compression, String> {
    let Some(arg) = arg else {
        return Ok(default_compression());
    };
    match arg {
        CompressArg::None => Ok(Compression::None),
        #[cfg(feature = "zlib")]
        CompressArg::Zlib => Ok(Compression::Zlib { level: 9 }),
        #[cfg(feature = "zstd")]
        CompressArg::Zstd => Ok(Compression::Zstd { level: 19 }),
        #[cfg(feature = "lzma")]
        CompressArg::Lzma => Ok(Compression::Lzma),
        #[allow(unreachable_patterns)]
        other => Err(format!("compressor {other:?} is not enabled in this build")),
    }
}

fn build_diff_options(opts: &Options) -> Result<DiffOptions, String> {
    let block_size = opts
        .block_size
        .map(|b| usize::try_from(b).map_err(|_| format!("block size {b} too large")))
        .transpose()?;
    Ok(DiffOptions {
        level: opts.level,
        compression: compression_for(opts.compress)?,
        min_match: opts.min_match,
        block_size,
    })
}

fn build_ignore(patterns: &[String]) -> IgnoreList {
    let mut list = IgnoreList::default();
    for p in patterns {
        list.extend(p);
    }
    list
}

/// The checksum must be usable by a patcher built like this one.
fn check_checksum(kind: ChecksumKind) -> Result<(), String> {
    if kind.is_available() {
        Ok(())
    } else {
        Err(format!("checksum {kind} is not enabled in this build"))
    }
}

fn cache_size(opts: &Options) -> usize {
    usize::try_from(opts.cache_size)
        .unwrap_or(usize::MAX)
        .max(MIN_CACHE_SIZE)
}

/// Refuse to replace an existing output unless `-f` was given.
fn check_output(path: &Path, force: bool) -> Result<(), String> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            let empty = fs::read_dir(path)
                .map(|mut d| d.next().is_none())
                .unwrap_or(false);
            if empty || force {
                Ok(())
            } else {
                Err(format!(
                    "output directory is not empty, use -f to write into it: {}",
                    path.display()
                ))
            }
        }
        Ok(_) if !force => Err(format!(
            "output file exists, use -f to overwrite: {}",
            path.display()
        )),
        _ => Ok(()),
    }
}

/// Detect the diff kind from its magic.
fn sniff(path: &Path) -> io::Result<Option<DiffKind>> {
    let mut prefix = Vec::with_capacity(8);
    File::open(path)?.take(8).read_to_end(&mut prefix)?;
    Ok(detect(&prefix))
}

fn hex(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        "-".into()
    } else {
        ::hex::encode(bytes)
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => eprintln!("{s}"),
        Err(e) => eprintln!("oxidiff: json: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Config command
// ---------------------------------------------------------------------------

fn cmd_config() -> i32 {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!("oxidiff version {version} (Rust)");

    let zlib = cfg!(feature = "zlib") as u8;
    let zstd = cfg!(feature = "zstd") as u8;
    let lzma = cfg!(feature = "lzma") as u8;
    let adler32 = cfg!(feature = "adler32") as u8;
    let file_io = cfg!(feature = "file-io") as u8;
    let parallel = cfg!(feature = "parallel") as u8;
    let ptr_size = std::mem::size_of::<*const ()>();
    let profile = config_for_level(DEFAULT_LEVEL);

    eprintln!("COMPRESS_ZLIB={zlib}");
    eprintln!("COMPRESS_ZSTD={zstd}");
    eprintln!("COMPRESS_LZMA={lzma}");
    eprintln!("ADLER32_SIMD={adler32}");
    eprintln!("FILE_IO={file_io}");
    eprintln!("PARALLEL={parallel}");
    eprintln!("DEFAULT_COMPRESS={}", default_compression().name());
    eprintln!("DEFAULT_LEVEL={DEFAULT_LEVEL} ({})", profile.name);
    eprintln!("DEFAULT_MIN_MATCH={}", profile.min_match);
    eprintln!("DEFAULT_CACHE_SIZE={DEFAULT_CACHE_SIZE}");
    eprintln!("DEFAULT_MAX_OPEN_FILES={DEFAULT_MAX_OPEN_FILES}");
    eprintln!("sizeof(usize)={ptr_size}");

    0
}

// ---------------------------------------------------------------------------
// Diff command
// ---------------------------------------------------------------------------

fn cmd_diff(opts: &Options) -> i32 {
    let (Some(old), Some(new), Some(out)) = (&opts.input, &opts.second, &opts.output) else {
        eprintln!("oxidiff: diff requires OLD NEW DIFF");
        return 1;
    };
    let diff_opts = match build_diff_options(opts) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("oxidiff: {e}");
            return 1;
        }
    };
    if let Err(e) = check_output(out, opts.force) {
        eprintln!("oxidiff: {e}");
        return 1;
    }

    let is_dir = |p: &Path| fs::metadata(p).map(|m| m.is_dir()).unwrap_or(false);
    if opts.force_dir || is_dir(old) || is_dir(new) {
        return cmd_dir_diff(opts, old, new, out, diff_opts);
    }

    match diff_file(old, new, out, &diff_opts) {
        Ok(stats) => {
            if opts.verbose > 0 && !opts.quiet {
                eprintln!(
                    "oxidiff: diff: old {} bytes, new {} bytes, diff {} bytes, {} covers",
                    stats.old_size, stats.new_size, stats.diff_size, stats.cover_count
                );
            }
            if opts.json_output {
                print_json(&serde_json::json!({
                    "command": "diff",
                    "mode": "file",
                    "old_size": stats.old_size,
                    "new_size": stats.new_size,
                    "diff_size": stats.diff_size,
                    "cover_count": stats.cover_count,
                    "covered_bytes": stats.covered_bytes,
                    "compress_type": stats.compress_type,
                    "level": opts.level,
                    "old_sha256": stats.old_sha256.map(|h| hex(&h)),
                    "new_sha256": stats.new_sha256.map(|h| hex(&h)),
                }));
            }
            0
        }
        Err(e) => {
            eprintln!("oxidiff: diff error: {e}");
            1
        }
    }
}

fn cmd_dir_diff(opts: &Options, old: &Path, new: &Path, out: &Path, diff: DiffOptions) -> i32 {
    if let Err(e) = check_checksum(opts.checksum) {
        eprintln!("oxidiff: {e}");
        return 1;
    }
    let dir_opts = DirDiffOptions {
        diff,
        checksum: opts.checksum,
        ignore: build_ignore(&opts.ignore),
        extern_data: Vec::new(),
    };
    let file = match File::create(out) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("oxidiff: output file: {}: {e}", out.display());
            return 1;
        }
    };
    let mut writer = BufWriter::with_capacity(BUF_SIZE, file);
    let result = dir_diff(old, new, &mut writer, &dir_opts)
        .and_then(|stats| writer.flush().map(|()| stats).map_err(Into::into));
    let stats = match result {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("oxidiff: diff error: {e}");
            let _ = fs::remove_file(out);
            return 1;
        }
    };

    if opts.verbose > 0 && !opts.quiet {
        eprintln!(
            "oxidiff: dir diff: {} -> {} paths, {} same files, refs {} -> {} bytes, diff {} bytes",
            stats.old_path_count,
            stats.new_path_count,
            stats.same_file_pairs,
            stats.old_ref_size,
            stats.new_ref_size,
            stats.diff_size
        );
    }
    if opts.json_output {
        print_json(&serde_json::json!({
            "command": "diff",
            "mode": "dir",
            "old_paths": stats.old_path_count,
            "new_paths": stats.new_path_count,
            "old_ref_files": stats.old_ref_files,
            "new_ref_files": stats.new_ref_files,
            "old_ref_size": stats.old_ref_size,
            "new_ref_size": stats.new_ref_size,
            "same_file_pairs": stats.same_file_pairs,
            "same_file_size": stats.same_file_size,
            "diff_size": stats.diff_size,
            "cover_count": stats.main.cover_count,
            "checksum": opts.checksum.name(),
            "level": opts.level,
        }));
    }
    0
}

// ---------------------------------------------------------------------------
// Patch command
// ---------------------------------------------------------------------------

fn cmd_patch(opts: &Options) -> i32 {
    let (Some(old), Some(diff)) = (&opts.input, &opts.second) else {
        eprintln!("oxidiff: patch requires OLD DIFF OUT");
        return 1;
    };
    let kind = match sniff(diff) {
        Ok(Some(kind)) => kind,
        Ok(None) => {
            eprintln!("oxidiff: {}: not an oxidiff diff", diff.display());
            return 1;
        }
        Err(e) => {
            eprintln!("oxidiff: {}: {e}", diff.display());
            return 1;
        }
    };

    match kind {
        DiffKind::Single => cmd_file_patch(opts, old, diff),
        DiffKind::Dir => cmd_dir_patch(opts, old, diff),
    }
}

fn cmd_file_patch(opts: &Options, old: &Path, diff: &Path) -> i32 {
    if opts.in_place {
        eprintln!("oxidiff: --in-place needs a directory diff");
        return 1;
    }
    let Some(out) = &opts.output else {
        eprintln!("oxidiff: patch requires an output path");
        return 1;
    };
    if let Err(e) = check_output(out, opts.force) {
        eprintln!("oxidiff: {e}");
        return 1;
    }

    let patch_opts = PatchOptions {
        cache_size: cache_size(opts),
    };
    match patch_file(old, diff, out, patch_opts) {
        Ok(stats) => {
            if opts.verbose > 0 && !opts.quiet {
                eprintln!(
                    "oxidiff: patch: old {} bytes, output {} bytes, {} covers",
                    stats.old_size, stats.output_size, stats.cover_count
                );
            }
            if opts.json_output {
                print_json(&serde_json::json!({
                    "command": "patch",
                    "mode": "file",
                    "old_size": stats.old_size,
                    "diff_size": stats.diff_size,
                    "output_size": stats.output_size,
                    "cover_count": stats.cover_count,
                    "output_sha256": stats.output_sha256.map(|h| hex(&h)),
                }));
            }
            0
        }
        Err(e) => {
            eprintln!("oxidiff: patch error: {e}");
            let _ = fs::remove_file(out);
            1
        }
    }
}

fn cmd_dir_patch(opts: &Options, old: &Path, diff: &Path) -> i32 {
    let file = match File::open(diff) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("oxidiff: {}: {e}", diff.display());
            return 1;
        }
    };
    let patcher = match DirPatcher::open(BufReader::with_capacity(BUF_SIZE, file)) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("oxidiff: invalid directory diff: {e}");
            return 1;
        }
    };
    let dir_opts = DirPatchOptions {
        cache_size: cache_size(opts),
        max_open_files: opts.max_open_files.max(MIN_OPEN_FILES),
        verify_checksum: !opts.no_checksum,
    };

    let result = if opts.in_place {
        patcher.patch_in_place(old, &dir_opts)
    } else {
        let Some(out) = &opts.output else {
            eprintln!("oxidiff: patch requires an output path or --in-place");
            return 1;
        };
        if let Err(e) = check_output(out, opts.force) {
            eprintln!("oxidiff: {e}");
            return 1;
        }
        patcher.patch(old, out, &dir_opts)
    };
    let stats = match result {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("oxidiff: patch error: {e}");
            return 1;
        }
    };

    if opts.verbose > 0 && !opts.quiet {
        eprintln!(
            "oxidiff: dir patch: {} dirs, {} copied, {} empty, {} patched files, checksum {}",
            stats.dirs_created,
            stats.same_files_copied,
            stats.empty_files_created,
            stats.new_ref_files,
            if stats.checksum_verified { "verified" } else { "skipped" }
        );
    }
    if opts.json_output {
        print_json(&serde_json::json!({
            "command": "patch",
            "mode": if opts.in_place { "dir-in-place" } else { "dir" },
            "dirs_created": stats.dirs_created,
            "same_files_copied": stats.same_files_copied,
            "empty_files_created": stats.empty_files_created,
            "new_ref_files": stats.new_ref_files,
            "new_ref_size": stats.new_ref_size,
            "old_ref_size": stats.old_ref_size,
            "exec_files": stats.exec_files,
            "removed_paths": stats.removed_paths,
            "checksum_verified": stats.checksum_verified,
        }));
    }
    0
}

// ---------------------------------------------------------------------------
// Info command
// ---------------------------------------------------------------------------

fn cmd_info(opts: &Options) -> i32 {
    let Some(path) = &opts.input else {
        eprintln!("oxidiff: info requires a diff file");
        return 1;
    };
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("oxidiff: {}: {e}", path.display());
            return 1;
        }
    };
    let mut reader = BufReader::with_capacity(BUF_SIZE, file);
    let kind = match sniff(path) {
        Ok(Some(kind)) => kind,
        Ok(None) => {
            eprintln!("oxidiff: {}: not an oxidiff diff", path.display());
            return 1;
        }
        Err(e) => {
            eprintln!("oxidiff: {}: {e}", path.display());
            return 1;
        }
    };

    match kind {
        DiffKind::Single => match DiffHeader::read(&mut reader) {
            Ok(h) => print_single_header(&h, opts.json_output),
            Err(e) => {
                eprintln!("oxidiff: invalid diff header: {e}");
                return 1;
            }
        },
        DiffKind::Dir => match DirDiffInfo::read(&mut reader) {
            Ok(info) => print_dir_info(&info, opts.json_output),
            Err(e) => {
                eprintln!("oxidiff: invalid directory diff: {e}");
                return 1;
            }
        },
    }
    0
}

fn print_single_header(h: &DiffHeader, json: bool) {
    let compress = if h.compress_type.is_empty() { "none" } else { h.compress_type.as_str() };
    println!("format:             HDIFF13");
    println!("compress type:      {compress}");
    println!("old size:           {}", h.old_size);
    println!("new size:           {}", h.new_size);
    println!("cover count:        {}", h.cover_count);
    let names = ["covers", "rle ctrl", "rle code", "new data"];
    for (name, s) in names.iter().zip(h.sections()) {
        if s.is_compressed() {
            println!("{:<20}{} ({} stored)", format!("{name}:"), s.size, s.compressed);
        } else {
            println!("{:<20}{}", format!("{name}:"), s.size);
        }
    }
    if json {
        print_json(&serde_json::json!({
            "command": "info",
            "format": "HDIFF13",
            "compress_type": h.compress_type,
            "old_size": h.old_size,
            "new_size": h.new_size,
            "cover_count": h.cover_count,
            "sections": h.sections().iter().map(|s| serde_json::json!({
                "size": s.size,
                "compressed": s.compressed,
            })).collect::<Vec<_>>(),
        }));
    }
}

fn print_dir_info(info: &DirDiffInfo, json: bool) {
    let h = &info.header;
    let kind = |d: bool| if d { "directory" } else { "file" };
    let compress = if h.compress_type.is_empty() { "none" } else { h.compress_type.as_str() };
    let checksum = if h.checksum_type.is_empty() { "none" } else { h.checksum_type.as_str() };
    println!("format:             HDIFF19");
    println!("compress type:      {compress}");
    println!("checksum type:      {checksum}");
    println!("old:                {} ({} paths)", kind(h.old_is_dir), h.old_path_count);
    println!("new:                {} ({} paths)", kind(h.new_is_dir), h.new_path_count);
    println!("old ref files:      {} ({} bytes)", h.old_ref_file_count, h.old_ref_size);
    println!("new ref files:      {} ({} bytes)", h.new_ref_file_count, h.new_ref_size);
    println!("same file pairs:    {} ({} bytes)", h.same_file_pair_count, h.same_file_size);
    println!("executable files:   {}", h.new_execute_count);
    println!("head data:          {} ({} stored)", h.head_data_size, h.head_data_compressed_size);
    println!("extern data:        {}", h.extern_data_size);
    let slots = ["old ref data", "new ref data", "same file data", "diff data"];
    for (name, sum) in slots.iter().zip(&info.checksums) {
        println!("{:<20}{}", format!("{name}:"), hex(sum));
    }
    if json {
        print_json(&serde_json::json!({
            "command": "info",
            "format": "HDIFF19",
            "compress_type": h.compress_type,
            "checksum_type": h.checksum_type,
            "old_is_dir": h.old_is_dir,
            "new_is_dir": h.new_is_dir,
            "old_paths": h.old_path_count,
            "new_paths": h.new_path_count,
            "old_ref_files": h.old_ref_file_count,
            "old_ref_size": h.old_ref_size,
            "new_ref_files": h.new_ref_file_count,
            "new_ref_size": h.new_ref_size,
            "same_file_pairs": h.same_file_pair_count,
            "same_file_size": h.same_file_size,
            "exec_files": h.new_execute_count,
            "checksums": info.checksums.iter().map(|c| hex(c)).collect::<Vec<_>>(),
        }));
    }
}

// ---------------------------------------------------------------------------
// Manifest commands
// ---------------------------------------------------------------------------

fn cmd_manifest_create(opts: &Options) -> i32 {
    let (Some(dir), Some(out)) = (&opts.input, &opts.output) else {
        eprintln!("oxidiff: manifest create requires DIR OUT");
        return 1;
    };
    if let Err(e) = check_output(out, opts.force) {
        eprintln!("oxidiff: {e}");
        return 1;
    }
    let mut manifest = match Manifest::scan(dir, &build_ignore(&opts.ignore)) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("oxidiff: {e}");
            return 1;
        }
    };
    if let Err(e) = check_checksum(opts.checksum) {
        eprintln!("oxidiff: {e}");
        return 1;
    }
    if let Err(e) = manifest.digest_files(opts.checksum) {
        eprintln!("oxidiff: {e}");
        return 1;
    }
    let result = File::create(out).map_err(ManifestError::from).and_then(|f| {
        let mut w = BufWriter::new(f);
        manifest.save(&mut w)?;
        w.flush()?;
        Ok(())
    });
    if let Err(e) = result {
        eprintln!("oxidiff: {}: {e}", out.display());
        return 1;
    }

    let files = manifest.files().count();
    if !opts.quiet && opts.verbose > 0 {
        eprintln!(
            "oxidiff: manifest: {} entries, {files} files, {} bytes",
            manifest.entries().len(),
            manifest.total_size()
        );
    }
    if opts.json_output {
        print_json(&serde_json::json!({
            "command": "manifest-create",
            "entries": manifest.entries().len(),
            "files": files,
            "total_size": manifest.total_size(),
            "checksum": manifest.checksum_kind().name(),
        }));
    }
    0
}

fn cmd_manifest_verify(opts: &Options) -> i32 {
    let (Some(dir), Some(path)) = (&opts.input, &opts.second) else {
        eprintln!("oxidiff: manifest verify requires DIR MANIFEST");
        return 1;
    };
    let manifest = match File::open(path)
        .map_err(ManifestError::from)
        .and_then(|f| Manifest::load(BufReader::new(f)))
    {
        Ok(m) => m,
        Err(e) => {
            eprintln!("oxidiff: {}: {e}", path.display());
            return 1;
        }
    };
    let mismatches = match manifest.verify(dir) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("oxidiff: {e}");
            return 1;
        }
    };

    if !opts.quiet {
        for m in &mismatches {
            eprintln!("oxidiff: {m}");
        }
    }
    if opts.json_output {
        print_json(&serde_json::json!({
            "command": "manifest-verify",
            "entries": manifest.entries().len(),
            "mismatches": mismatches.iter().map(ToString::to_string).collect::<Vec<_>>(),
        }));
    }
    if mismatches.is_empty() {
        if opts.verbose > 0 && !opts.quiet {
            eprintln!("oxidiff: {} matches manifest", dir.display());
        }
        0
    } else {
        1
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Main CLI entry point. Parses arguments via clap, dispatches commands.
pub fn run() -> ! {
    let cli = Cli::parse();
    let opts = resolve_options(cli);

    let filter = match (opts.quiet, opts.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let exit_code = match opts.command {
        Command::Diff => cmd_diff(&opts),
        Command::Patch => cmd_patch(&opts),
        Command::Info => cmd_info(&opts),
        Command::ManifestCreate => cmd_manifest_create(&opts),
        Command::ManifestVerify => cmd_manifest_verify(&opts),
        Command::Config => cmd_config(),
    };

    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_opts(args: &[&str]) -> Options {
        let argv: Vec<String> = std::iter::once("oxidiff".to_string())
            .chain(args.iter().map(|s| s.to_string()))
            .collect();
        let cli = Cli::try_parse_from(argv).expect("cli parse failed");
        resolve_options(cli)
    }

    #[test]
    fn parse_byte_size_suffixes() {
        assert_eq!(parse_byte_size("1").unwrap(), 1);
        assert_eq!(parse_byte_size("2K").unwrap(), 2 * 1024);
        assert_eq!(parse_byte_size("3m").unwrap(), 3 * 1024 * 1024);
        assert_eq!(parse_byte_size("4G").unwrap(), 4 * 1024 * 1024 * 1024);
        assert!(parse_byte_size("").is_err());
        assert!(parse_byte_size("12x").is_err());
    }

    #[test]
    fn diff_subcommand_maps_correctly() {
        let opts = parse_opts(&[
            "diff",
            "--level",
            "9",
            "--compress",
            "none",
            "--checksum",
            "sha256",
            "--min-match",
            "12",
            "--ignore",
            "*.tmp#build/",
            "--ignore",
            "*.log",
            "old",
            "new",
            "out.diff",
        ]);
        assert_eq!(opts.command, Command::Diff);
        assert_eq!(opts.level, 9);
        assert_eq!(opts.compress, Some(CompressArg::None));
        assert_eq!(opts.checksum, ChecksumKind::Sha256);
        assert_eq!(opts.min_match, Some(12));
        assert_eq!(opts.input, Some(PathBuf::from("old")));
        assert_eq!(opts.second, Some(PathBuf::from("new")));
        assert_eq!(opts.output, Some(PathBuf::from("out.diff")));
        assert_eq!(build_ignore(&opts.ignore).len(), 3);

        let d = build_diff_options(&opts).unwrap();
        assert_eq!(d.level, 9);
        assert_eq!(d.compression, Compression::None);
    }

    #[test]
    fn block_size_accepts_suffix() {
        let opts = parse_opts(&["diff", "--block-size", "1K", "a", "b", "c"]);
        assert_eq!(build_diff_options(&opts).unwrap().block_size, Some(1024));
    }

    #[test]
    fn patch_subcommand_maps_correctly() {
        let opts = parse_opts(&[
            "--quiet",
            "patch",
            "--cache-size",
            "64K",
            "--max-open-files",
            "8",
            "--no-checksum",
            "old",
            "d.diff",
            "out",
        ]);
        assert_eq!(opts.command, Command::Patch);
        assert!(opts.quiet);
        assert!(opts.no_checksum);
        assert_eq!(cache_size(&opts), 64 * 1024);
        assert_eq!(opts.max_open_files, 8);
        assert_eq!(opts.output, Some(PathBuf::from("out")));
    }

    #[test]
    fn in_place_needs_no_output() {
        let opts = parse_opts(&["patch", "--in-place", "root", "d.diff"]);
        assert!(opts.in_place);
        assert!(opts.output.is_none());

        let argv = ["oxidiff", "patch", "root", "d.diff"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn tiny_cache_is_clamped() {
        let opts = parse_opts(&["patch", "--cache-size", "1", "a", "b", "c"]);
        assert_eq!(cache_size(&opts), MIN_CACHE_SIZE);
    }

    #[test]
    fn manifest_subcommands_map() {
        let create = parse_opts(&["manifest", "create", "--checksum", "crc32", "dir", "m.txt"]);
        assert_eq!(create.command, Command::ManifestCreate);
        assert_eq!(create.checksum, ChecksumKind::Crc32);
        assert_eq!(create.output, Some(PathBuf::from("m.txt")));

        let verify = parse_opts(&["manifest", "verify", "dir", "m.txt"]);
        assert_eq!(verify.command, Command::ManifestVerify);
        assert_eq!(verify.second, Some(PathBuf::from("m.txt")));
    }

    #[test]
    fn global_flags_and_verbose_cap() {
        let opts = parse_opts(&["-f", "--json", "-vvv", "info", "x.diff"]);
        assert!(opts.force);
        assert!(opts.json_output);
        assert_eq!(opts.verbose, 2);
        assert_eq!(opts.command, Command::Info);
        assert_eq!(parse_opts(&["config"]).command, Command::Config);
    }

    #[test]
    fn existing_output_needs_force() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        assert!(check_output(&file, false).is_ok());
        fs::write(&file, b"x").unwrap();
        assert!(check_output(&file, false).is_err());
        assert!(check_output(&file, true).is_ok());
        // Non-empty directory.
        assert!(check_output(dir.path(), false).is_err());
        assert!(check_output(dir.path(), true).is_ok());
    }

    #[test]
    fn fuzz_parser_does_not_panic() {
        fuzz_try_parse_args(&["diff".into(), "--level".into(), "42".into()]);
        fuzz_try_parse_args(&["patch".into(), "--in-place".into()]);
    }
}
