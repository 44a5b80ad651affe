// Directory listings.
//
// A Manifest is the sorted list of entries under a root. For a directory
// root, paths are relative and `/`-separated, directories end in `/`, and
// the root itself is the directory `""`. A file root yields a single file
// entry `""`.
//
// Manifests can be saved and verified later:
//
//   oxidiff-manifest 1
//   checksum <name>
//   ignore <pattern list>            (only when non-empty)
//   <d|f|x> <size> <hex checksum or -> <path>

use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use thiserror::Error;
use walkdir::WalkDir;

use super::ignore::IgnoreList;
use crate::checksum::{ChecksumKind, Hasher};

const MAGIC_LINE: &str = "oxidiff-manifest 1";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("walking directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("{0}: not found")]
    NotFound(PathBuf),
    #[error("{0}: file name is not valid UTF-8")]
    NonUtf8(PathBuf),
    #[error("manifest line {line}: {msg}")]
    Parse { line: usize, msg: String },
    #[error("unknown checksum plugin {0:?}")]
    UnknownChecksum(String),
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Listing path; directories end in `/`, the root is `""`.
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub executable: bool,
    /// Per-file checksum once `digest_files` ran.
    pub checksum: Option<Vec<u8>>,
}

impl Entry {
    fn kind_char(&self) -> char {
        match (self.is_dir, self.executable) {
            (true, _) => 'd',
            (false, true) => 'x',
            (false, false) => 'f',
        }
    }
}

/// One difference found by `Manifest::verify`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    Missing(String),
    Extra(String),
    KindChanged(String),
    Resized { path: String, expected: u64, actual: u64 },
    Changed(String),
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing(p) => write!(f, "missing: {p}"),
            Self::Extra(p) => write!(f, "extra: {p}"),
            Self::KindChanged(p) => write!(f, "kind changed: {p}"),
            Self::Resized {
                path,
                expected,
                actual,
            } => write!(f, "size changed: {path} ({expected} -> {actual})"),
            Self::Changed(p) => write!(f, "content changed: {p}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Manifest {
    root: PathBuf,
    root_is_dir: bool,
    entries: Vec<Entry>,
    checksum: ChecksumKind,
    ignore: IgnoreList,
}

impl Manifest {
    /// List `root`, skipping entries matched by `ignore`.
    pub fn scan(root: &Path, ignore: &IgnoreList) -> Result<Self, ManifestError> {
        let meta = fs::metadata(root).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ManifestError::NotFound(root.to_path_buf()),
            _ => ManifestError::Io(e),
        })?;

        let mut entries = Vec::new();
        if !meta.is_dir() {
            entries.push(Entry {
                path: String::new(),
                is_dir: false,
                size: meta.len(),
                executable: is_executable(&meta),
                checksum: None,
            });
        } else {
            let walker = WalkDir::new(root)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !ignored(root, e, ignore));
            for entry in walker {
                let entry = entry?;
                let ft = entry.file_type();
                if ft.is_symlink() {
                    warn!("skipping symlink {}", entry.path().display());
                    continue;
                }
                let mut path = listing_path(root, entry.path())?;
                let meta = entry.metadata()?;
                if ft.is_dir() {
                    if !path.is_empty() {
                        path.push('/');
                    }
                    entries.push(Entry {
                        path,
                        is_dir: true,
                        size: 0,
                        executable: false,
                        checksum: None,
                    });
                } else if ft.is_file() {
                    entries.push(Entry {
                        path,
                        is_dir: false,
                        size: meta.len(),
                        executable: is_executable(&meta),
                        checksum: None,
                    });
                } else {
                    warn!("skipping special file {}", entry.path().display());
                }
            }
            entries.sort_by(|a, b| a.path.as_bytes().cmp(b.path.as_bytes()));
        }

        debug!("scanned {}: {} entries", root.display(), entries.len());
        Ok(Self {
            root: root.to_path_buf(),
            root_is_dir: meta.is_dir(),
            entries,
            checksum: ChecksumKind::None,
            ignore: ignore.clone(),
        })
    }

    /// Compute per-file checksums for every file entry.
    pub fn digest_files(&mut self, kind: ChecksumKind) -> Result<(), ManifestError> {
        if !kind.is_available() {
            return Err(ManifestError::UnknownChecksum(kind.name().to_string()));
        }
        self.checksum = kind;
        for e in &mut self.entries {
            e.checksum = if e.is_dir || kind == ChecksumKind::None {
                None
            } else {
                Some(digest_file(&super::resolve(&self.root, &e.path), kind)?)
            };
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn root_is_dir(&self) -> bool {
        self.root_is_dir
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn checksum_kind(&self) -> ChecksumKind {
        self.checksum
    }

    pub fn ignore(&self) -> &IgnoreList {
        &self.ignore
    }

    /// Entries that are files.
    pub fn files(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|e| !e.is_dir)
    }

    /// Sum of file sizes.
    pub fn total_size(&self) -> u64 {
        self.files().map(|e| e.size).sum()
    }

    pub fn get(&self, path: &str) -> Option<&Entry> {
        self.entries
            .binary_search_by(|e| e.path.as_bytes().cmp(path.as_bytes()))
            .ok()
            .map(|i| &self.entries[i])
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn save<W: Write>(&self, w: &mut W) -> Result<(), ManifestError> {
        writeln!(w, "{MAGIC_LINE}")?;
        writeln!(w, "checksum {}", self.checksum.name())?;
        if !self.ignore.source().is_empty() {
            writeln!(w, "ignore {}", self.ignore.source())?;
        }
        for e in &self.entries {
            let sum = e.checksum.as_deref().map_or_else(|| "-".to_string(), hex::encode);
            writeln!(w, "{} {} {} {}", e.kind_char(), e.size, sum, e.path)?;
        }
        Ok(())
    }

    pub fn load<R: Read>(r: R) -> Result<Self, ManifestError> {
        let mut lines = BufReader::new(r).lines().enumerate();
        let parse_err = |line: usize, msg: &str| ManifestError::Parse {
            line: line + 1,
            msg: msg.to_string(),
        };

        let first = lines.next().map(|(_, line)| line).transpose()?;
        if first.as_deref() != Some(MAGIC_LINE) {
            return Err(parse_err(0, "not an oxidiff manifest"));
        }
        let checksum = match lines.next() {
            Some((n, line)) => {
                let line = line?;
                let name = line
                    .strip_prefix("checksum")
                    .ok_or_else(|| parse_err(n, "expected checksum line"))?
                    .trim_start();
                ChecksumKind::from_name(name)
                    .ok_or_else(|| ManifestError::UnknownChecksum(name.to_string()))?
            }
            None => return Err(parse_err(1, "missing checksum line")),
        };

        let mut ignore = IgnoreList::default();
        let mut entries: Vec<Entry> = Vec::new();
        for (n, line) in lines {
            let line = line?;
            if let Some(list) = line.strip_prefix("ignore ") {
                ignore = IgnoreList::parse(list);
                continue;
            }
            let mut parts = line.splitn(4, ' ');
            let (Some(kind), Some(size), Some(sum), Some(path)) =
                (parts.next(), parts.next(), parts.next(), parts.next())
            else {
                return Err(parse_err(n, "expected `<kind> <size> <checksum> <path>`"));
            };
            let size: u64 = size.parse().map_err(|_| parse_err(n, "bad size"))?;
            let (is_dir, executable) = match kind {
                "d" => (true, false),
                "f" => (false, false),
                "x" => (false, true),
                _ => return Err(parse_err(n, "bad entry kind")),
            };
            let checksum = match sum {
                "-" => None,
                hex_sum => Some(hex::decode(hex_sum).map_err(|_| parse_err(n, "bad checksum"))?),
            };
            if let Some(prev) = entries.last() {
                if prev.path.as_bytes() >= path.as_bytes() {
                    return Err(parse_err(n, "entries not sorted"));
                }
            }
            entries.push(Entry {
                path: path.to_string(),
                is_dir,
                size,
                executable,
                checksum,
            });
        }

        let root_is_dir = entries.first().is_none_or(|e| e.is_dir);
        Ok(Self {
            root: PathBuf::new(),
            root_is_dir,
            entries,
            checksum,
            ignore,
        })
    }

    // -----------------------------------------------------------------------
    // Verification
    // -----------------------------------------------------------------------

    /// Rescan `root` and report every difference from this manifest.
    pub fn verify(&self, root: &Path) -> Result<Vec<Mismatch>, ManifestError> {
        let mut current = Self::scan(root, &self.ignore)?;
        current.digest_files(self.checksum)?;

        let mut out = Vec::new();
        let (mut i, mut j) = (0usize, 0usize);
        let (a, b) = (&self.entries, &current.entries);
        while i < a.len() || j < b.len() {
            let ord = match (a.get(i), b.get(j)) {
                (Some(x), Some(y)) => x.path.as_bytes().cmp(y.path.as_bytes()),
                (Some(_), None) => std::cmp::Ordering::Less,
                _ => std::cmp::Ordering::Greater,
            };
            match ord {
                std::cmp::Ordering::Less => {
                    out.push(Mismatch::Missing(a[i].path.clone()));
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    out.push(Mismatch::Extra(b[j].path.clone()));
                    j += 1;
                }
                std::cmp::Ordering::Equal => {
                    let (x, y) = (&a[i], &b[j]);
                    if x.is_dir != y.is_dir {
                        out.push(Mismatch::KindChanged(x.path.clone()));
                    } else if x.size != y.size {
                        out.push(Mismatch::Resized {
                            path: x.path.clone(),
                            expected: x.size,
                            actual: y.size,
                        });
                    } else if x.checksum.is_some() && x.checksum != y.checksum {
                        out.push(Mismatch::Changed(x.path.clone()));
                    }
                    i += 1;
                    j += 1;
                }
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn listing_path(root: &Path, path: &Path) -> Result<String, ManifestError> {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let mut out = String::new();
    for part in rel.components() {
        let s = part
            .as_os_str()
            .to_str()
            .ok_or_else(|| ManifestError::NonUtf8(path.to_path_buf()))?;
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(s);
    }
    Ok(out)
}

fn ignored(root: &Path, entry: &walkdir::DirEntry, ignore: &IgnoreList) -> bool {
    if ignore.is_empty() {
        return false;
    }
    let Ok(mut path) = listing_path(root, entry.path()) else {
        return false;
    };
    if entry.file_type().is_dir() {
        path.push('/');
    }
    let hit = ignore.is_ignored(&path);
    if hit {
        debug!("ignoring {path}");
    }
    hit
}

/// Stream a file through a checksum.
pub fn digest_file(path: &Path, kind: ChecksumKind) -> io::Result<Vec<u8>> {
    let mut hasher = kind.hasher();
    feed_file(&mut hasher, path)?;
    Ok(hasher.finish())
}

/// Append a file's contents to a running checksum; returns the bytes read.
pub(crate) fn feed_file(hasher: &mut Hasher, path: &Path) -> io::Result<u64> {
    let mut file = fs::File::open(path)?;
    let mut buf = vec![0u8; crate::io::BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            return Ok(total);
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
}

#[cfg(unix)]
pub(crate) fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
pub(crate) fn is_executable(_meta: &fs::Metadata) -> bool {
    false
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
