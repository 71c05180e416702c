// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! The burn-in workload: loading the power-virus image bundle and the
//! register sequence that starts and stops it on a chip.
//!
//! A bundle is a TTX archive, or the same archive extracted to a directory,
//! holding `<x>-<y>/{image,ckernels}.{bin,hex}`. Burn-in always broadcasts
//! the image of logical core `0-0` to every tensix core, so any other core
//! with an image is rejected.

pub mod cores;
pub mod image;

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::board::BoardKind;
use cores::CoreCoord;
use image::{ImageChunk, BIN_HEADER_SIZE};

pub const TENSIX_SOFT_RESET_ADDR: u64 = 0xFFB121B0;

pub const BRISC_SOFT_RESET: u32 = 1 << 11;
pub const TRISC_SOFT_RESETS: u32 = (1 << 12) | (1 << 13) | (1 << 14);
pub const NCRISC_SOFT_RESET: u32 = 1 << 18;
pub const STAGGERED_START_ENABLE: u32 = 1 << 31;

pub const ALL_SOFT_RESETS: u32 = BRISC_SOFT_RESET | TRISC_SOFT_RESETS | NCRISC_SOFT_RESET;

pub const ARC_MSG_DEASSERT_RISCV_RESET: u32 = 0xBA;
pub const ARC_MSG_GO_BUSY: u32 = 0x52;
pub const ARC_MSG_GO_LONG_IDLE: u32 = 0x54;

pub const TTX_EXTENSION: &str = "ttx";

const BROADCAST_CORE: &str = "0-0";
const CORE_FILES: [&str; 4] = ["image.bin", "image.hex", "ckernels.bin", "ckernels.hex"];

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Workload image {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Workload archive {path} is unreadable: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Workload image is malformed: {0}")]
    Format(String),

    #[error("Workload bundle {0} is empty")]
    Empty(PathBuf),

    #[error("Workload bundle {path} has cores with ckernels but no image ({core})")]
    CkernelsWithoutImage { path: PathBuf, core: String },

    #[error("Workload bundle {path} has images for cores with no physical mapping ({cores})")]
    UnmappedCores { path: PathBuf, cores: String },

    #[error("Workload readback mismatch at {address:#x} on core {x}-{y}")]
    Readback { address: u64, x: u8, y: u8 },
}

impl ImageError {
    pub fn format(message: impl Into<String>) -> Self {
        ImageError::Format(message.into())
    }
}

/// The decoded image of one workload bundle, in load order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadImage {
    pub source: PathBuf,
    pub chunks: Vec<ImageChunk>,
}

/// Core files of a bundle keyed by `<x>-<y>/<file>`.
type BundleFiles = BTreeMap<String, Vec<u8>>;

fn is_core_dir(name: &str) -> bool {
    name.split_once('-')
        .map(|(x, y)| x.parse::<u8>().is_ok() && y.parse::<u8>().is_ok())
        .unwrap_or(false)
}

fn is_core_file(name: &str) -> bool {
    name.split_once('/')
        .map(|(core, file)| is_core_dir(core) && CORE_FILES.contains(&file))
        .unwrap_or(false)
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ImageError {
    let path = path.to_path_buf();
    move |source| ImageError::Io { path, source }
}

fn read_dir_bundle(bundle: &Path) -> Result<BundleFiles, ImageError> {
    let mut files = BundleFiles::new();
    for entry in std::fs::read_dir(bundle).map_err(io_err(bundle))?.flatten() {
        let core = entry.file_name().to_string_lossy().into_owned();
        if !is_core_dir(&core) || !entry.path().is_dir() {
            continue;
        }
        for file in CORE_FILES {
            let path = entry.path().join(file);
            if path.is_file() {
                let data = std::fs::read(&path).map_err(io_err(&path))?;
                files.insert(format!("{core}/{file}"), data);
            }
        }
    }
    Ok(files)
}

fn read_ttx(archive: &Path) -> Result<BundleFiles, ImageError> {
    let zip_err = |source| ImageError::Archive {
        path: archive.to_path_buf(),
        source,
    };
    let file = File::open(archive).map_err(io_err(archive))?;
    let mut zip = zip::ZipArchive::new(file).map_err(zip_err)?;

    let mut files = BundleFiles::new();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(zip_err)?;
        if entry.is_dir() || !is_core_file(entry.name()) {
            continue;
        }
        let name = entry.name().to_string();
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut data)
            .map_err(io_err(&archive.join(&name)))?;
        files.insert(name, data);
    }
    Ok(files)
}

/// A bin shadows the hex of the same name. Header-only bins and empty hex
/// files do not count.
fn pick<'f>(files: &'f BundleFiles, core: &str, stem: &str) -> Option<(&'f str, &'f [u8])> {
    let found = move |ext: &str, header: usize| {
        files
            .get_key_value(&format!("{core}/{stem}.{ext}"))
            .filter(|(_, data)| data.len() > header)
            .map(|(name, data)| (name.as_str(), data.as_slice()))
    };
    found("bin", BIN_HEADER_SIZE).or_else(|| found("hex", 0))
}

fn decode(bundle: &Path, name: &str, data: &[u8]) -> Result<Vec<ImageChunk>, ImageError> {
    if name.ends_with(".hex") {
        let text = std::str::from_utf8(data).map_err(|e| {
            ImageError::format(format!("{} is not text: {e}", bundle.join(name).display()))
        })?;
        image::parse_hex(text)
    } else {
        image::parse_bin(data)
    }
}

impl WorkloadImage {
    /// Load a `.ttx` archive, or an extracted bundle directory.
    pub fn load(bundle: &Path) -> Result<Self, ImageError> {
        let files = if bundle.is_file() {
            read_ttx(bundle)?
        } else {
            read_dir_bundle(bundle)?
        };
        Self::from_files(bundle, &files)
    }

    fn from_files(bundle: &Path, files: &BundleFiles) -> Result<Self, ImageError> {
        let unmapped: BTreeSet<&str> = files
            .keys()
            .filter_map(|name| name.split_once('/').map(|(core, _)| core))
            .filter(|&core| core != BROADCAST_CORE)
            .filter(|&core| pick(files, core, "image").is_some())
            .collect();
        if !unmapped.is_empty() {
            return Err(ImageError::UnmappedCores {
                path: bundle.to_path_buf(),
                cores: unmapped.into_iter().collect::<Vec<_>>().join(", "),
            });
        }

        let image = pick(files, BROADCAST_CORE, "image");
        let ckernels = pick(files, BROADCAST_CORE, "ckernels");

        let Some(image) = image else {
            return Err(match ckernels {
                Some(_) => ImageError::CkernelsWithoutImage {
                    path: bundle.to_path_buf(),
                    core: BROADCAST_CORE.to_string(),
                },
                None => ImageError::Empty(bundle.to_path_buf()),
            });
        };

        let mut parts = vec![image];
        parts.extend(ckernels);
        // hex images go down before bin images
        parts.sort_by_key(|(name, _)| !name.ends_with(".hex"));

        let mut chunks = Vec::new();
        for (name, data) in parts {
            chunks.extend(decode(bundle, name, data)?);
        }

        Ok(Self {
            source: bundle.to_path_buf(),
            chunks,
        })
    }
}

/// Root directory holding one bundle per board kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadLibrary {
    pub root: PathBuf,
}

impl WorkloadLibrary {
    pub const DEFAULT_ROOT: &'static str = "/usr/share/tt-burnin/workloads";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<root>/<kind>.ttx` when present, otherwise the extracted
    /// `<root>/<kind>/` directory.
    pub fn bundle_path(&self, kind: BoardKind) -> PathBuf {
        let archive = self
            .root
            .join(kind.workload_dir_name())
            .with_extension(TTX_EXTENSION);
        if archive.is_file() {
            archive
        } else {
            self.root.join(kind.workload_dir_name())
        }
    }
}

impl Default for WorkloadLibrary {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ROOT)
    }
}

/// Knobs for how the cores are released once the image is in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkloadSettings {
    pub stagger_start: bool,
    pub keep_trisc_under_reset: bool,
    pub verify_load: bool,
}

impl WorkloadSettings {
    /// Soft reset word that takes the cores out of reset.
    pub fn release_value(&self) -> u32 {
        let stagger = if self.stagger_start {
            STAGGERED_START_ENABLE
        } else {
            0
        };
        if self.keep_trisc_under_reset {
            NCRISC_SOFT_RESET | TRISC_SOFT_RESETS | stagger
        } else {
            NCRISC_SOFT_RESET | stagger
        }
    }
}

/// The register level operations the workload sequence needs from a chip.
pub trait TensixTarget {
    type Error: std::fmt::Display;

    /// Write `value` at `addr` in every functional tensix core.
    fn broadcast32(&self, addr: u64, value: u32) -> Result<(), Self::Error>;

    /// Write `data` at `addr` in every functional tensix core.
    fn broadcast(&self, addr: u64, data: &[u8]) -> Result<(), Self::Error>;

    fn read(&self, core: CoreCoord, addr: u64, data: &mut [u8]) -> Result<(), Self::Error>;

    fn arc_msg(&self, msg: u32) -> Result<(), Self::Error>;

    fn tensix_cores(&self) -> Result<BTreeSet<CoreCoord>, Self::Error>;
}

#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("{0}")]
    Target(String),
    #[error(transparent)]
    Image(#[from] ImageError),
}

fn target_err(err: impl std::fmt::Display) -> SequenceError {
    SequenceError::Target(err.to_string())
}

fn verify<T: TensixTarget>(target: &T, image: &WorkloadImage) -> Result<(), SequenceError> {
    let cores = target.tensix_cores().map_err(target_err)?;
    for chunk in &image.chunks {
        let mut buffer = vec![0u8; chunk.data.len()];
        for &(x, y) in &cores {
            target
                .read((x, y), chunk.address, &mut buffer)
                .map_err(target_err)?;
            if buffer != chunk.data {
                return Err(ImageError::Readback {
                    address: chunk.address,
                    x,
                    y,
                }
                .into());
            }
        }
    }
    Ok(())
}

/// Hold the cores in reset, load the image and let them go.
pub fn start<T: TensixTarget>(
    target: &T,
    image: &WorkloadImage,
    settings: WorkloadSettings,
) -> Result<(), SequenceError> {
    target
        .broadcast32(TENSIX_SOFT_RESET_ADDR, ALL_SOFT_RESETS)
        .map_err(target_err)?;
    target
        .arc_msg(ARC_MSG_DEASSERT_RISCV_RESET)
        .map_err(target_err)?;
    target
        .arc_msg(ARC_MSG_GO_BUSY)
        .map_err(target_err)?;

    for chunk in &image.chunks {
        target
            .broadcast(chunk.address, &chunk.data)
            .map_err(target_err)?;
    }
    if settings.verify_load {
        verify(target, image)?;
    }

    target
        .broadcast32(TENSIX_SOFT_RESET_ADDR, settings.release_value())
        .map_err(target_err)
}

/// Drop the clocks back to idle and put the cores back under reset.
pub fn stop<T: TensixTarget>(target: &T) -> Result<(), SequenceError> {
    target
        .arc_msg(ARC_MSG_GO_LONG_IDLE)
        .map_err(target_err)?;
    target
        .broadcast32(TENSIX_SOFT_RESET_ADDR, ALL_SOFT_RESETS)
        .map_err(target_err)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Op {
        Broadcast32(u64, u32),
        Broadcast(u64, usize),
        Arc(u32),
    }

    #[derive(Default)]
    struct Recorder {
        ops: RefCell<Vec<Op>>,
        memory: RefCell<HashMap<u64, Vec<u8>>>,
        corrupt: bool,
    }

    impl TensixTarget for Recorder {
        type Error = String;

        fn broadcast32(&self, addr: u64, value: u32) -> Result<(), String> {
            self.ops.borrow_mut().push(Op::Broadcast32(addr, value));
            Ok(())
        }

        fn broadcast(&self, addr: u64, data: &[u8]) -> Result<(), String> {
            self.ops.borrow_mut().push(Op::Broadcast(addr, data.len()));
            let mut data = data.to_vec();
            if self.corrupt {
                data[0] ^= 1;
            }
            self.memory.borrow_mut().insert(addr, data);
            Ok(())
        }

        fn read(&self, _core: CoreCoord, addr: u64, data: &mut [u8]) -> Result<(), String> {
            let memory = self.memory.borrow();
            let stored = memory.get(&addr).ok_or("unmapped")?;
            data.copy_from_slice(stored);
            Ok(())
        }

        fn arc_msg(&self, msg: u32) -> Result<(), String> {
            if msg == 0 {
                return Err("bad message".to_string());
            }
            self.ops.borrow_mut().push(Op::Arc(msg));
            Ok(())
        }

        fn tensix_cores(&self) -> Result<BTreeSet<CoreCoord>, String> {
            Ok(cores::wormhole_tensix_cores(0))
        }
    }

    fn image() -> WorkloadImage {
        WorkloadImage {
            source: PathBuf::from("test"),
            chunks: vec![
                ImageChunk {
                    address: 0x0,
                    data: vec![1; 16],
                },
                ImageChunk {
                    address: 0x4000,
                    data: vec![2; 8],
                },
            ],
        }
    }

    #[test]
    fn test_start_sequence() {
        let target = Recorder::default();
        start(&target, &image(), WorkloadSettings::default()).unwrap();
        assert_eq!(
            *target.ops.borrow(),
            vec![
                Op::Broadcast32(TENSIX_SOFT_RESET_ADDR, 0x4_7800),
                Op::Arc(0xBA),
                Op::Arc(0x52),
                Op::Broadcast(0x0, 16),
                Op::Broadcast(0x4000, 8),
                Op::Broadcast32(TENSIX_SOFT_RESET_ADDR, NCRISC_SOFT_RESET),
            ]
        );
    }

    #[test]
    fn test_stop_sequence() {
        let target = Recorder::default();
        stop(&target).unwrap();
        assert_eq!(
            *target.ops.borrow(),
            vec![
                Op::Arc(0x54),
                Op::Broadcast32(TENSIX_SOFT_RESET_ADDR, ALL_SOFT_RESETS)
            ]
        );
    }

    #[test]
    fn test_release_values() {
        let settings = WorkloadSettings {
            stagger_start: true,
            keep_trisc_under_reset: true,
            verify_load: false,
        };
        assert_eq!(settings.release_value(), 0x8000_7000 | NCRISC_SOFT_RESET);
        assert_eq!(
            WorkloadSettings {
                keep_trisc_under_reset: false,
                ..settings
            }
            .release_value(),
            STAGGERED_START_ENABLE | NCRISC_SOFT_RESET
        );
    }

    #[test]
    fn test_verify_load_detects_mismatch() {
        let settings = WorkloadSettings {
            verify_load: true,
            ..Default::default()
        };
        start(&Recorder::default(), &image(), settings).unwrap();

        let corrupt = Recorder {
            corrupt: true,
            ..Default::default()
        };
        let err = start(&corrupt, &image(), settings).unwrap_err();
        assert!(matches!(
            err,
            SequenceError::Image(ImageError::Readback { address: 0x0, .. })
        ));
        // Cores are never released after a failed readback
        assert!(!corrupt
            .ops
            .borrow()
            .contains(&Op::Broadcast32(TENSIX_SOFT_RESET_ADDR, NCRISC_SOFT_RESET)));
    }

    fn write_bundle(root: &Path, files: &[(&str, Vec<u8>)]) {
        for (name, data) in files {
            let path = root.join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, data).unwrap();
        }
    }

    #[test]
    fn test_load_bundle_prefers_bin_and_orders_hex_first() {
        let dir = tempfile::tempdir().unwrap();
        let bin = image::encode_bin(&[ImageChunk {
            address: 0x100,
            data: vec![5; 4],
        }]);
        write_bundle(
            dir.path(),
            &[
                ("0-0/image.bin", bin),
                ("0-0/image.hex", b"@0\n00000001\n".to_vec()),
                ("0-0/ckernels.hex", b"@10\n00000002\n".to_vec()),
                ("1-1/image.bin", image::encode_bin(&[])),
                ("test.yaml", b"test: {}\n".to_vec()),
            ],
        );

        let image = WorkloadImage::load(dir.path()).unwrap();
        assert_eq!(
            image.chunks,
            vec![
                ImageChunk {
                    address: 0x40,
                    data: vec![2, 0, 0, 0]
                },
                ImageChunk {
                    address: 0x100,
                    data: vec![5; 4]
                },
            ]
        );
    }

    #[test]
    fn test_load_bundle_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            WorkloadImage::load(&dir.path().join("missing")),
            Err(ImageError::Io { .. })
        ));
        assert!(matches!(
            WorkloadImage::load(dir.path()),
            Err(ImageError::Empty(_))
        ));

        write_bundle(dir.path(), &[("0-0/ckernels.hex", b"@0\n1\n".to_vec())]);
        assert!(matches!(
            WorkloadImage::load(dir.path()),
            Err(ImageError::CkernelsWithoutImage { .. })
        ));

        write_bundle(
            dir.path(),
            &[
                ("0-0/image.hex", b"@0\n1\n".to_vec()),
                ("2-3/image.hex", b"@0\n1\n".to_vec()),
            ],
        );
        match WorkloadImage::load(dir.path()) {
            Err(ImageError::UnmappedCores { cores, .. }) => assert_eq!(cores, "2-3"),
            other => panic!("unexpected {other:?}"),
        }
    }

    fn write_ttx(path: &Path, files: &[(&str, Vec<u8>)]) {
        use std::io::Write;

        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, data) in files {
            zip.start_file(*name, options.clone()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_load_ttx_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("wormhole.ttx");
        write_ttx(
            &archive,
            &[
                ("test.yaml", b"test: {}\n".to_vec()),
                ("0-0/image.bin", image::encode_bin(&[])),
                ("0-0/image.hex", b"@0\n00000001\n".to_vec()),
                (
                    "0-0/ckernels.bin",
                    image::encode_bin(&[ImageChunk {
                        address: 0x200,
                        data: vec![7; 8],
                    }]),
                ),
                ("3-4/ckernels.hex", b"@0\n1\n".to_vec()),
            ],
        );

        let image = WorkloadImage::load(&archive).unwrap();
        assert_eq!(image.source, archive);
        assert_eq!(
            image.chunks,
            vec![
                ImageChunk {
                    address: 0x0,
                    data: vec![1, 0, 0, 0]
                },
                ImageChunk {
                    address: 0x200,
                    data: vec![7; 8]
                },
            ]
        );
    }

    #[test]
    fn test_load_ttx_errors() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("blackhole.ttx");

        write_ttx(
            &archive,
            &[
                ("0-0/image.hex", b"@0\n1\n".to_vec()),
                ("1-0/image.hex", b"@0\n1\n".to_vec()),
            ],
        );
        match WorkloadImage::load(&archive) {
            Err(ImageError::UnmappedCores { cores, .. }) => assert_eq!(cores, "1-0"),
            other => panic!("unexpected {other:?}"),
        }

        write_ttx(&archive, &[("0-0/ckernels.hex", b"@0\n1\n".to_vec())]);
        assert!(matches!(
            WorkloadImage::load(&archive),
            Err(ImageError::CkernelsWithoutImage { .. })
        ));

        write_ttx(&archive, &[("0-0/image.hex", Vec::new())]);
        assert!(matches!(
            WorkloadImage::load(&archive),
            Err(ImageError::Empty(_))
        ));

        std::fs::write(&archive, b"not a zip").unwrap();
        assert!(matches!(
            WorkloadImage::load(&archive),
            Err(ImageError::Archive { .. })
        ));
    }

    #[test]
    fn test_library_layout() {
        let dir = tempfile::tempdir().unwrap();
        let library = WorkloadLibrary::new(dir.path());
        assert_eq!(
            library.bundle_path(BoardKind::Blackhole),
            dir.path().join("blackhole")
        );

        write_ttx(&dir.path().join("blackhole.ttx"), &[]);
        assert_eq!(
            library.bundle_path(BoardKind::Blackhole),
            dir.path().join("blackhole.ttx")
        );
        assert_eq!(
            library.bundle_path(BoardKind::Wormhole),
            dir.path().join("wormhole")
        );

        assert_eq!(
            WorkloadLibrary::default().root,
            PathBuf::from(WorkloadLibrary::DEFAULT_ROOT)
        );
    }
}
